use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use dunning_core::traits::{AuditSink, CampaignRepository, FailedPaymentRepository};
use dunning_engine::{BulkOrchestrator, DunningProcessor, MetricsAggregator};

use crate::handlers::{
    campaigns::{create_campaign, get_campaign, list_campaigns, update_campaign},
    dunning::{get_analytics, process_dunning},
    health::health_check,
    payments::{
        abandon_payment, bulk_retry_payments, get_failed_payment, ingest_failed_payment,
        list_failed_payments, retry_payment,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub payments: Arc<dyn FailedPaymentRepository>,
    pub audit: Arc<dyn AuditSink>,
    pub processor: Arc<DunningProcessor>,
    pub bulk: Arc<BulkOrchestrator>,
    pub metrics: Arc<MetricsAggregator>,
    /// 批量重试未指定批大小时的默认值
    pub default_batch_size: usize,
    /// 批间默认等待毫秒数
    pub default_batch_delay_ms: u64,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 催缴活动管理
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/api/campaigns/{id}",
            get(get_campaign).put(update_campaign),
        )
        // 失败支付记录
        .route(
            "/api/failed-payments",
            get(list_failed_payments).post(ingest_failed_payment),
        )
        .route("/api/failed-payments/bulk-retry", post(bulk_retry_payments))
        .route("/api/failed-payments/{id}", get(get_failed_payment))
        .route("/api/failed-payments/{id}/retry", post(retry_payment))
        .route("/api/failed-payments/{id}/abandon", post(abandon_payment))
        // 催缴引擎
        .route("/api/dunning/process", post(process_dunning))
        .route("/api/dunning/analytics", get(get_analytics))
        .with_state(state)
}
