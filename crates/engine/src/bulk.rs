//! 批量编排器
//!
//! 操作员发起的手动/批量重试与放弃操作。批量重试把 id 列表切成
//! 固定大小的批：批内并发执行，批与批之间显式等待，构成保护下游
//! 网关的固定窗口限流。单条失败（拒付、记录不存在、版本冲突、
//! 基础设施故障）只计入该条的结果，不会中断批次。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use dunning_core::{
    models::AuditEntry,
    traits::{AuditSink, FailedPaymentRepository, PaymentGateway, SubscriptionService},
    DunningError, DunningResult,
};

use crate::executor::{RetryOverrides, StepExecutor, StepOutcome};

/// 批量重试请求
#[derive(Debug, Clone)]
pub struct BulkRetryRequest {
    pub payment_ids: Vec<i64>,
    pub batch_size: usize,
    pub delay_between_batches: Duration,
    pub reason: Option<String>,
}

/// 放弃回收的选项
#[derive(Debug, Clone, Default)]
pub struct AbandonOptions {
    pub reason: String,
    pub cancel_subscription: bool,
    /// 对原始扣款发起的部分退款金额，要求记录携带 original_payment_id
    pub refund_amount: Option<Decimal>,
}

/// 单条批量项的结果
#[derive(Debug, Clone, Serialize)]
pub struct BulkItemResult {
    pub payment_id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// 批量重试的汇总报告
///
/// 批量操作永远返回逐条结果，而不是单一的成败判定。
#[derive(Debug, Clone, Serialize)]
pub struct BulkRetryReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_recovered_amount: Decimal,
    pub results: Vec<BulkItemResult>,
}

pub struct BulkOrchestrator {
    executor: Arc<StepExecutor>,
    payments: Arc<dyn FailedPaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    subscriptions: Arc<dyn SubscriptionService>,
    audit: Arc<dyn AuditSink>,
}

impl BulkOrchestrator {
    pub fn new(
        executor: Arc<StepExecutor>,
        payments: Arc<dyn FailedPaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        subscriptions: Arc<dyn SubscriptionService>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            executor,
            payments,
            gateway,
            subscriptions,
            audit,
        }
    }

    /// 单条手动重试，绕过活动到期门槛
    pub async fn retry_single(
        &self,
        payment_id: i64,
        overrides: RetryOverrides,
    ) -> DunningResult<StepOutcome> {
        self.executor
            .retry_now(payment_id, &overrides, Utc::now())
            .await
    }

    /// 批量重试
    ///
    /// 空 id 列表和零批大小在入口处拒绝。返回的逐条结果与请求
    /// id 顺序一致。
    pub async fn bulk_retry(&self, request: BulkRetryRequest) -> DunningResult<BulkRetryReport> {
        if request.payment_ids.is_empty() {
            return Err(DunningError::InvalidRequest(
                "payment_ids 不能为空".to_string(),
            ));
        }
        if request.batch_size == 0 {
            return Err(DunningError::InvalidRequest(
                "batch_size 必须大于0".to_string(),
            ));
        }

        let overrides = RetryOverrides {
            reason: request.reason.clone(),
            ..Default::default()
        };
        let batch_count = request.payment_ids.len().div_ceil(request.batch_size);
        info!(
            "开始批量重试: {} 条记录, 批大小 {}, 共 {} 批",
            request.payment_ids.len(),
            request.batch_size,
            batch_count
        );

        let mut results = Vec::with_capacity(request.payment_ids.len());
        for (batch_index, batch) in request.payment_ids.chunks(request.batch_size).enumerate() {
            if batch_index > 0 && !request.delay_between_batches.is_zero() {
                tokio::time::sleep(request.delay_between_batches).await;
            }

            let futures = batch
                .iter()
                .map(|&id| self.retry_item(id, overrides.clone()));
            results.extend(join_all(futures).await);
        }

        let successful = results.iter().filter(|r| r.success).count();
        let total_recovered_amount = results
            .iter()
            .filter_map(|r| r.recovered_amount)
            .sum::<Decimal>();
        let report = BulkRetryReport {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            total_recovered_amount,
            results,
        };
        info!(
            "批量重试完成: 成功 {}/{}, 回收金额 {}",
            report.successful, report.total, report.total_recovered_amount
        );
        Ok(report)
    }

    /// 显式放弃回收，独立于自动计划
    ///
    /// 可选动作：取消订阅、对已回收金额发起部分退款。
    pub async fn abandon(
        &self,
        payment_id: i64,
        options: AbandonOptions,
    ) -> DunningResult<()> {
        if options.reason.trim().is_empty() {
            return Err(DunningError::InvalidRequest(
                "放弃原因不能为空".to_string(),
            ));
        }
        if options.refund_amount.is_some_and(|a| a <= Decimal::ZERO) {
            return Err(DunningError::InvalidRequest(
                "退款金额必须大于0".to_string(),
            ));
        }
        let payment = self
            .payments
            .get_by_id(payment_id)
            .await?
            .ok_or(DunningError::PaymentNotFound { id: payment_id })?;
        payment.ensure_open()?;

        let now = Utc::now();
        let mut updated = payment.clone();
        updated.mark_abandoned(options.reason.clone(), now)?;
        self.payments.update(&updated, payment.version).await?;

        if options.cancel_subscription {
            self.subscriptions.cancel(payment.subscription_id).await?;
            self.subscriptions
                .lower_access(payment.subscription_id)
                .await?;
        }
        if let Some(refund_amount) = options.refund_amount {
            match &payment.original_payment_id {
                Some(gateway_payment_id) => {
                    self.gateway.refund(gateway_payment_id, refund_amount).await?;
                    info!(
                        "记录 {} 已对原始扣款 {} 退款 {}",
                        payment.id, gateway_payment_id, refund_amount
                    );
                }
                None => warn!(
                    "记录 {} 未携带原始网关支付ID，忽略退款请求",
                    payment.id
                ),
            }
        }

        let entry = AuditEntry::new(payment.id, "abandoned", "operator")
            .with_detail(serde_json::json!({
                "reason": options.reason,
                "refund_amount": options.refund_amount,
            }));
        if let Err(e) = self.audit.record(&entry).await {
            warn!("记录 {} 的审计写入失败: {}", payment.id, e);
        }
        info!("记录 {} 已由操作员放弃回收", payment.id);
        Ok(())
    }

    /// 单条批量项：所有错误折叠进结果，绝不向外传播
    async fn retry_item(&self, payment_id: i64, overrides: RetryOverrides) -> BulkItemResult {
        match self
            .executor
            .retry_now(payment_id, &overrides, Utc::now())
            .await
        {
            Ok(StepOutcome::Recovered { amount, .. }) => BulkItemResult {
                payment_id,
                success: true,
                recovered_amount: Some(amount),
                failure_reason: None,
            },
            Ok(StepOutcome::RetryFailed { reason, .. }) => BulkItemResult {
                payment_id,
                success: false,
                recovered_amount: None,
                failure_reason: Some(reason),
            },
            Ok(other) => BulkItemResult {
                payment_id,
                success: false,
                recovered_amount: None,
                failure_reason: Some(format!("意外的执行结果: {other:?}")),
            },
            Err(e) => BulkItemResult {
                payment_id,
                success: false,
                recovered_amount: None,
                failure_reason: Some(e.to_string()),
            },
        }
    }
}
