pub mod audit;
pub mod campaign;
pub mod payment;

pub use audit::AuditEntry;
pub use campaign::{
    CampaignFilter, CampaignStatus, CampaignType, DunningCampaign, RetryStep, StepAction,
    TriggerConditions,
};
pub use payment::{
    FailedPayment, FailedPaymentFilter, PaymentStatus, RetryActor, RetryAttempt, TimelineEvent,
};
