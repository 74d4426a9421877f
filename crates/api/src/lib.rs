//! # Dunning API
//!
//! 催缴系统的管理HTTP接口，基于Axum构建。
//!
//! ## API 端点
//!
//! ### 催缴活动
//! - `GET /api/campaigns` - 活动列表（分页）
//! - `POST /api/campaigns` - 创建活动
//! - `GET /api/campaigns/{id}?include_metrics=true` - 活动详情与聚合指标
//! - `PUT /api/campaigns/{id}` - 更新活动
//!
//! ### 失败支付记录
//! - `GET /api/failed-payments` - 记录列表（过滤/分页）+ 汇总统计
//! - `POST /api/failed-payments` - 接入失败支付事件（生命周期入口）
//! - `GET /api/failed-payments/{id}` - 记录详情与时间线
//! - `POST /api/failed-payments/{id}/retry` - 手动重试
//! - `POST /api/failed-payments/{id}/abandon` - 放弃回收
//! - `POST /api/failed-payments/bulk-retry` - 批量重试
//!
//! ### 催缴引擎
//! - `POST /api/dunning/process` - 触发一轮扫描（支持 dry_run）
//! - `GET /api/dunning/analytics?period=7d|30d|90d|1y` - 窗口回收统计
//!
//! 所有成功响应使用 `ApiResponse` 信封，错误响应为结构化的
//! `{error: {code, message, type}}` JSON，状态码由 `ApiError` 统一映射。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState) -> Router {
    create_routes(state).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use dunning_engine::{
        BackoffPolicy, BulkOrchestrator, DunningProcessor, MetricsAggregator, StepExecutor,
    };
    use dunning_infrastructure::memory::{
        MemoryAuditSink, MemoryCampaignRepository, MemoryFailedPaymentRepository,
    };
    use dunning_infrastructure::testing::{
        RecordingNotifier, RecordingSubscriptionService, ScriptedGateway,
    };

    fn test_app() -> Router {
        let campaigns = Arc::new(MemoryCampaignRepository::new());
        let payments = Arc::new(MemoryFailedPaymentRepository::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let subscriptions = Arc::new(RecordingSubscriptionService::new());

        let executor = Arc::new(StepExecutor::new(
            payments.clone(),
            gateway.clone(),
            notifier,
            subscriptions.clone(),
            audit.clone(),
            BackoffPolicy::default(),
        ));
        let state = AppState {
            campaigns: campaigns.clone(),
            payments: payments.clone(),
            audit: audit.clone(),
            processor: Arc::new(DunningProcessor::new(
                campaigns.clone(),
                payments.clone(),
                executor.clone(),
            )),
            bulk: Arc::new(BulkOrchestrator::new(
                executor,
                payments.clone(),
                gateway,
                subscriptions,
                audit,
            )),
            metrics: Arc::new(MetricsAggregator::new(campaigns, payments)),
            default_batch_size: 10,
            default_batch_delay_ms: 0,
        };
        create_app(state)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_campaign_lifecycle_endpoints() {
        let app = test_app();

        let body = serde_json::json!({
            "name": "standard-recovery",
            "campaign_type": "multi",
            "retry_schedule": [
                {"step_number": 1, "delay_days": 1, "action": "retry_payment", "escalation_level": 1},
                {"step_number": 2, "delay_days": 3, "action": "send_email", "escalation_level": 2}
            ],
            "status": "active",
            "priority": 5
        });
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/campaigns", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/campaigns")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/campaigns/1?include_metrics=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_campaign_is_rejected() {
        let app = test_app();
        // 空计划在校验层被拒绝
        let body = serde_json::json!({
            "name": "broken",
            "campaign_type": "email",
            "retry_schedule": []
        });
        let response = app
            .oneshot(json_request("POST", "/api/campaigns", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_payment_ingestion_and_retry() {
        let app = test_app();

        let body = serde_json::json!({
            "user_id": 1,
            "subscription_id": 10,
            "amount": "49.99",
            "currency": "USD",
            "plan_code": "pro",
            "initial_failure_reason": "card_declined"
        });
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/failed-payments", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/failed-payments/1/retry",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // 已恢复的记录再次重试返回冲突
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/failed-payments/1/retry",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_missing_payment_returns_not_found() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/failed-payments/999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_process_and_analytics_endpoints() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/dunning/process",
                serde_json::json!({ "dry_run": true }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/dunning/analytics?period=30d")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/dunning/analytics?period=2w")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
