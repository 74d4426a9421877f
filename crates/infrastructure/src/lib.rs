//! 基础设施层：Postgres仓储、内存仓储、外部服务HTTP适配器与测试假实现

pub mod database;
pub mod gateway;
pub mod memory;
pub mod notifier;
pub mod subscription;
pub mod testing;

pub use database::create_pool;
pub use database::postgres::{
    PostgresAuditSink, PostgresCampaignRepository, PostgresFailedPaymentRepository,
};
pub use gateway::HttpPaymentGateway;
pub use memory::{MemoryAuditSink, MemoryCampaignRepository, MemoryFailedPaymentRepository};
pub use notifier::WebhookNotificationDispatcher;
pub use subscription::HttpSubscriptionService;
