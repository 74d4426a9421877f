pub mod repository;
pub mod services;

pub use repository::{AuditSink, CampaignRepository, FailedPaymentRepository, RecoveryStats};
pub use services::{
    ChargeOutcome, ChargeRequest, DunningNotice, NotificationChannel, NotificationDispatcher,
    PaymentGateway, SubscriptionService,
};

#[cfg(feature = "mocks")]
pub use repository::{MockAuditSink, MockCampaignRepository, MockFailedPaymentRepository};
#[cfg(feature = "mocks")]
pub use services::{MockNotificationDispatcher, MockPaymentGateway, MockSubscriptionService};
