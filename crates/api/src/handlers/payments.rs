use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use dunning_core::{
    models::{AuditEntry, FailedPayment, FailedPaymentFilter, PaymentStatus, TimelineEvent},
    traits::RecoveryStats,
    DunningError,
};
use dunning_engine::{AbandonOptions, BulkRetryRequest, RetryOverrides, StepOutcome};

use crate::{
    error::ApiResult,
    response::{created, success, ApiResponse, PaginatedResponse},
    routes::AppState,
};

/// 失败支付事件接入请求
///
/// 上游账务系统或支付网关 webhook 在扣款失败时调用，创建的记录
/// 即为催缴生命周期的入口。
#[derive(Debug, Deserialize)]
pub struct IngestFailedPaymentRequest {
    pub user_id: i64,
    pub subscription_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub plan_code: String,
    #[serde(default)]
    pub trial_user: bool,
    pub initial_failure_reason: Option<String>,
    /// 原始失败扣款在网关侧的支付ID，放弃时部分退款的对象
    pub original_payment_id: Option<String>,
    pub payment_method_id: Option<String>,
}

/// 记录查询参数
#[derive(Debug, Deserialize)]
pub struct PaymentQueryParams {
    pub status: Option<PaymentStatus>,
    pub user_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// 手动重试请求
#[derive(Debug, Deserialize, Default)]
pub struct RetryPaymentRequest {
    pub payment_method_id: Option<String>,
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

/// 放弃回收请求
#[derive(Debug, Deserialize)]
pub struct AbandonPaymentRequest {
    pub reason: String,
    #[serde(default)]
    pub cancel_subscription: bool,
    pub refund_amount: Option<Decimal>,
}

/// 批量重试请求
#[derive(Debug, Deserialize)]
pub struct BulkRetryPaymentsRequest {
    pub payment_ids: Vec<i64>,
    pub batch_size: Option<usize>,
    pub delay_between_batches_ms: Option<u64>,
    pub reason: Option<String>,
}

/// 列表响应：分页记录 + 窗口内的汇总统计
#[derive(Debug, Serialize)]
pub struct FailedPaymentListResponse {
    #[serde(flatten)]
    pub page: PaginatedResponse<FailedPayment>,
    pub summary: RecoveryStats,
}

/// 记录详情：完整记录 + 由账本重建的时间线 + 审计轨迹
#[derive(Debug, Serialize)]
pub struct FailedPaymentDetail {
    #[serde(flatten)]
    pub payment: FailedPayment,
    pub timeline: Vec<TimelineEvent>,
    pub audit_trail: Vec<AuditEntry>,
}

/// 手动重试结果
#[derive(Debug, Serialize)]
pub struct RetryPaymentResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// 接入失败支付事件
pub async fn ingest_failed_payment(
    State(state): State<AppState>,
    Json(request): Json<IngestFailedPaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.amount <= Decimal::ZERO {
        return Err(DunningError::InvalidRequest("金额必须大于0".to_string()).into());
    }
    if request.currency.trim().is_empty() {
        return Err(DunningError::InvalidRequest("币种不能为空".to_string()).into());
    }

    let mut payment = FailedPayment::new(
        request.user_id,
        request.subscription_id,
        request.amount,
        request.currency,
        request.plan_code,
    );
    payment.trial_user = request.trial_user;
    payment.initial_failure_reason = request.initial_failure_reason;
    payment.original_payment_id = request.original_payment_id;
    payment.payment_method_id = request.payment_method_id;

    let stored = state.payments.create(&payment).await?;
    Ok(created(stored))
}

/// 查询失败支付记录，附带汇总统计块
pub async fn list_failed_payments(
    State(state): State<AppState>,
    Query(params): Query<PaymentQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = FailedPaymentFilter {
        status: params.status,
        user_id: params.user_id,
        campaign_id: params.campaign_id,
        created_after: params.created_after,
        created_before: params.created_before,
        limit: None,
        offset: None,
    };
    let all = state.payments.list(&filter).await?;

    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);
    let total = all.len() as i64;
    let items: Vec<FailedPayment> = all
        .into_iter()
        .skip(((page - 1) * page_size) as usize)
        .take(page_size as usize)
        .collect();

    let since = params.created_after.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let summary = state
        .payments
        .recovery_stats(since, params.campaign_id)
        .await?;

    Ok(success(FailedPaymentListResponse {
        page: PaginatedResponse::new(items, total, page, page_size),
        summary,
    }))
}

/// 获取单条记录及其时间线
pub async fn get_failed_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let payment = state
        .payments
        .get_by_id(id)
        .await?
        .ok_or(DunningError::PaymentNotFound { id })?;

    let timeline = payment.timeline();
    let audit_trail = state.audit.list_for_payment(id).await?;
    Ok(success(FailedPaymentDetail {
        payment,
        timeline,
        audit_trail,
    }))
}

/// 手动重试单条记录
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RetryPaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let overrides = RetryOverrides {
        payment_method_id: request.payment_method_id,
        amount: request.amount,
        reason: request.reason,
    };
    let outcome = state.bulk.retry_single(id, overrides).await?;

    let response = match outcome {
        StepOutcome::Recovered {
            gateway_payment_id,
            amount,
        } => RetryPaymentResponse {
            outcome: "recovered",
            gateway_payment_id: Some(gateway_payment_id),
            recovered_amount: Some(amount),
            failure_reason: None,
            next_retry_at: None,
        },
        StepOutcome::RetryFailed {
            reason,
            next_retry_at,
        } => RetryPaymentResponse {
            outcome: "declined",
            gateway_payment_id: None,
            recovered_amount: None,
            failure_reason: Some(reason),
            next_retry_at,
        },
        other => {
            return Err(
                DunningError::Internal(format!("意外的手动重试结果: {other:?}")).into(),
            )
        }
    };
    Ok(success(response))
}

/// 放弃回收
pub async fn abandon_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AbandonPaymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let options = AbandonOptions {
        reason: request.reason,
        cancel_subscription: request.cancel_subscription,
        refund_amount: request.refund_amount,
    };
    state.bulk.abandon(id, options).await?;
    Ok(ApiResponse::success_empty_with_message(format!(
        "记录 {id} 已放弃回收"
    )))
}

/// 批量重试
pub async fn bulk_retry_payments(
    State(state): State<AppState>,
    Json(request): Json<BulkRetryPaymentsRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .bulk
        .bulk_retry(BulkRetryRequest {
            payment_ids: request.payment_ids,
            batch_size: request.batch_size.unwrap_or(state.default_batch_size),
            delay_between_batches: Duration::from_millis(
                request
                    .delay_between_batches_ms
                    .unwrap_or(state.default_batch_delay_ms),
            ),
            reason: request.reason,
        })
        .await?;
    Ok(success(report))
}
