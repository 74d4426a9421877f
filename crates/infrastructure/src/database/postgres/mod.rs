mod postgres_audit_sink;
mod postgres_campaign_repository;
mod postgres_payment_repository;

pub use postgres_audit_sink::PostgresAuditSink;
pub use postgres_campaign_repository::PostgresCampaignRepository;
pub use postgres_payment_repository::PostgresFailedPaymentRepository;
