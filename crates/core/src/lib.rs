pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{DunningError, DunningResult};
pub use models::{
    AuditEntry, CampaignFilter, CampaignStatus, CampaignType, DunningCampaign, FailedPayment,
    FailedPaymentFilter, PaymentStatus, RetryActor, RetryAttempt, RetryStep, StepAction,
    TriggerConditions,
};
pub use traits::{
    AuditSink, CampaignRepository, ChargeOutcome, ChargeRequest, DunningNotice,
    FailedPaymentRepository, NotificationChannel, NotificationDispatcher, PaymentGateway,
    RecoveryStats, SubscriptionService,
};
