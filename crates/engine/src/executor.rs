//! 步骤执行器
//!
//! 对一条失败支付记录，确定当前应执行的步骤并执行其动作。
//! 所有状态变更都走仓储的乐观锁更新：自动扫描和手动重试并发
//! 触碰同一条记录时，只有一方能写入，另一方收到 `VersionConflict`。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use dunning_core::{
    models::{
        AuditEntry, DunningCampaign, FailedPayment, RetryActor, RetryAttempt, StepAction,
    },
    traits::{
        AuditSink, ChargeOutcome, ChargeRequest, DunningNotice, FailedPaymentRepository,
        NotificationChannel, NotificationDispatcher, PaymentGateway, SubscriptionService,
    },
    DunningError, DunningResult,
};

use crate::backoff::BackoffPolicy;

/// 计划耗尽时写入的放弃原因
pub const EXHAUSTED_REASON: &str = "retry schedule exhausted";

/// 单步执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// 步骤未到期，本轮跳过，下轮扫描重新评估
    NotDue { due_at: DateTime<Utc> },
    /// 计划槽位耗尽，记录已转为 abandoned
    Exhausted,
    /// 扣款成功，记录已转为 recovered
    Recovered {
        gateway_payment_id: String,
        amount: Decimal,
    },
    /// 网关拒付，已计入账本并重新排期
    RetryFailed {
        reason: String,
        next_retry_at: Option<DateTime<Utc>>,
    },
    /// 通知已分发并消耗一个计划槽位
    NotificationSent { channel: NotificationChannel },
    /// 取消步骤已执行，记录转为 abandoned，订阅已取消
    Cancelled,
    /// 试运行：仅返回将要执行的动作，无任何副作用
    DryRun { planned_action: String },
}

/// 手动重试的覆盖参数
#[derive(Debug, Clone, Default)]
pub struct RetryOverrides {
    pub payment_method_id: Option<String>,
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

pub struct StepExecutor {
    payments: Arc<dyn FailedPaymentRepository>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationDispatcher>,
    subscriptions: Arc<dyn SubscriptionService>,
    audit: Arc<dyn AuditSink>,
    backoff: BackoffPolicy,
}

impl StepExecutor {
    pub fn new(
        payments: Arc<dyn FailedPaymentRepository>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationDispatcher>,
        subscriptions: Arc<dyn SubscriptionService>,
        audit: Arc<dyn AuditSink>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            payments,
            gateway,
            notifier,
            subscriptions,
            audit,
            backoff,
        }
    }

    /// 执行活动计划中的当前步骤
    ///
    /// 到期判定：步骤的 delay_days 是相对记录 created_at 的累计天数
    /// 偏移，`now >= created_at + delay_days` 即到期。水平触发：错过的
    /// 步骤在下一轮扫描补上，没有持久化定时器，进程重启安全。
    pub async fn execute_step(
        &self,
        payment: &FailedPayment,
        campaign: &DunningCampaign,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> DunningResult<StepOutcome> {
        payment.ensure_open()?;

        let step = match campaign.step_for_attempt(payment.retry_attempts) {
            Some(step) => step.clone(),
            None => {
                if dry_run {
                    return Ok(StepOutcome::DryRun {
                        planned_action: format!("abandon ({EXHAUSTED_REASON})"),
                    });
                }
                let mut updated = payment.clone();
                updated.mark_abandoned(EXHAUSTED_REASON.to_string(), now)?;
                self.payments.update(&updated, payment.version).await?;
                self.audit_action(payment, Some(campaign.id), "abandoned", "scheduler", None)
                    .await;
                info!("记录 {} 计划槽位耗尽，已放弃回收", payment.id);
                return Ok(StepOutcome::Exhausted);
            }
        };

        let due_at = payment.created_at + Duration::days(step.delay_days as i64);
        if now < due_at {
            return Ok(StepOutcome::NotDue { due_at });
        }

        if dry_run {
            return Ok(StepOutcome::DryRun {
                planned_action: step.action.as_str().to_string(),
            });
        }

        match step.action {
            StepAction::RetryPayment => self.charge_step(payment, campaign, now).await,
            StepAction::SendEmail => {
                self.notify_step(payment, campaign, &step, NotificationChannel::Email, now)
                    .await
            }
            StepAction::SendSms => {
                self.notify_step(payment, campaign, &step, NotificationChannel::Sms, now)
                    .await
            }
            StepAction::CancelSubscription => self.cancel_step(payment, campaign, &step, now).await,
        }
    }

    /// 手动重试，绕过活动的到期门槛
    ///
    /// 操作员可覆盖支付方式和金额。未绑定活动的记录拒付后按指数
    /// 退避重新排期；绑定活动的记录仍由下一轮扫描按计划推进。
    pub async fn retry_now(
        &self,
        payment_id: i64,
        overrides: &RetryOverrides,
        now: DateTime<Utc>,
    ) -> DunningResult<StepOutcome> {
        let payment = self
            .payments
            .get_by_id(payment_id)
            .await?
            .ok_or(DunningError::PaymentNotFound { id: payment_id })?;
        payment.ensure_open()?;

        let amount = overrides.amount.unwrap_or(payment.amount);
        if amount <= Decimal::ZERO {
            return Err(DunningError::InvalidRequest(
                "重试金额必须大于0".to_string(),
            ));
        }
        let payment_method_id = overrides
            .payment_method_id
            .clone()
            .or_else(|| payment.payment_method_id.clone());

        let request = ChargeRequest {
            user_id: payment.user_id,
            subscription_id: payment.subscription_id,
            amount,
            currency: payment.currency.clone(),
            payment_method_id: payment_method_id.clone(),
            idempotency_key: format!(
                "{}-manual-{}",
                payment.payment_ref,
                payment.retry_attempts + 1
            ),
        };
        let outcome = self.gateway.charge(&request).await?;

        let note = overrides
            .reason
            .clone()
            .unwrap_or_else(|| "manual_retry".to_string());
        let mut updated = payment.clone();
        match outcome {
            ChargeOutcome::Succeeded { gateway_payment_id } => {
                updated.record_attempt(RetryAttempt {
                    attempted_at: now,
                    amount,
                    payment_method_id,
                    success: true,
                    failure_reason: None,
                    actor: RetryActor::Operator,
                    note: Some(note),
                });
                updated.mark_recovered(gateway_payment_id.clone(), now)?;
                self.payments.update(&updated, payment.version).await?;
                self.subscriptions
                    .mark_payment_current(payment.subscription_id)
                    .await?;
                self.audit_action(&payment, payment.campaign_id, "manual_retry_recovered", "operator", None)
                    .await;
                info!("记录 {} 手动重试成功，金额 {} {}", payment.id, amount, payment.currency);
                Ok(StepOutcome::Recovered {
                    gateway_payment_id,
                    amount,
                })
            }
            ChargeOutcome::Declined { reason } => {
                updated.record_attempt(RetryAttempt {
                    attempted_at: now,
                    amount,
                    payment_method_id,
                    success: false,
                    failure_reason: Some(reason.clone()),
                    actor: RetryActor::Operator,
                    note: Some(note),
                });
                updated.mark_retrying();
                if updated.campaign_id.is_none() {
                    updated.next_retry_at =
                        Some(self.backoff.next_retry_at(updated.retry_attempts, now));
                }
                self.payments.update(&updated, payment.version).await?;
                self.audit_action(
                    &payment,
                    payment.campaign_id,
                    "manual_retry_declined",
                    "operator",
                    Some(serde_json::json!({ "reason": reason })),
                )
                .await;
                warn!("记录 {} 手动重试被拒付: {}", payment.id, reason);
                Ok(StepOutcome::RetryFailed {
                    reason,
                    next_retry_at: updated.next_retry_at,
                })
            }
        }
    }

    async fn charge_step(
        &self,
        payment: &FailedPayment,
        campaign: &DunningCampaign,
        now: DateTime<Utc>,
    ) -> DunningResult<StepOutcome> {
        let request = ChargeRequest {
            user_id: payment.user_id,
            subscription_id: payment.subscription_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            payment_method_id: payment.payment_method_id.clone(),
            idempotency_key: format!("{}-{}", payment.payment_ref, payment.retry_attempts + 1),
        };
        let outcome = self.gateway.charge(&request).await?;

        let mut updated = payment.clone();
        match outcome {
            ChargeOutcome::Succeeded { gateway_payment_id } => {
                updated.record_attempt(RetryAttempt {
                    attempted_at: now,
                    amount: payment.amount,
                    payment_method_id: payment.payment_method_id.clone(),
                    success: true,
                    failure_reason: None,
                    actor: RetryActor::Scheduler,
                    note: Some("retry_payment".to_string()),
                });
                updated.mark_recovered(gateway_payment_id.clone(), now)?;
                self.payments.update(&updated, payment.version).await?;
                self.subscriptions
                    .mark_payment_current(payment.subscription_id)
                    .await?;
                self.audit_action(payment, Some(campaign.id), "recovered", "scheduler", None)
                    .await;
                info!(
                    "记录 {} 扣款成功，回收金额 {} {}",
                    payment.id, payment.amount, payment.currency
                );
                Ok(StepOutcome::Recovered {
                    gateway_payment_id,
                    amount: payment.amount,
                })
            }
            ChargeOutcome::Declined { reason } => {
                updated.record_attempt(RetryAttempt {
                    attempted_at: now,
                    amount: payment.amount,
                    payment_method_id: payment.payment_method_id.clone(),
                    success: false,
                    failure_reason: Some(reason.clone()),
                    actor: RetryActor::Scheduler,
                    note: Some("retry_payment".to_string()),
                });
                updated.mark_retrying();
                updated.next_retry_at = Self::next_step_due_at(&updated, campaign);
                self.payments.update(&updated, payment.version).await?;
                self.audit_action(
                    payment,
                    Some(campaign.id),
                    "retry_declined",
                    "scheduler",
                    Some(serde_json::json!({ "reason": reason })),
                )
                .await;
                warn!("记录 {} 扣款被拒付: {}", payment.id, reason);
                Ok(StepOutcome::RetryFailed {
                    reason,
                    next_retry_at: updated.next_retry_at,
                })
            }
        }
    }

    async fn notify_step(
        &self,
        payment: &FailedPayment,
        campaign: &DunningCampaign,
        step: &dunning_core::models::RetryStep,
        channel: NotificationChannel,
        now: DateTime<Utc>,
    ) -> DunningResult<StepOutcome> {
        let notice = DunningNotice {
            user_id: payment.user_id,
            channel,
            template: step.template.clone(),
            escalation_level: step.escalation_level,
            amount: payment.amount,
            currency: payment.currency.clone(),
            failure_count: payment.failure_count(),
        };
        let dispatch_result = self.notifier.dispatch(&notice).await;

        // 通知消耗一个计划槽位，分发失败也入账，保证催缴时间线继续推进
        let mut updated = payment.clone();
        updated.record_attempt(RetryAttempt {
            attempted_at: now,
            amount: payment.amount,
            payment_method_id: None,
            success: dispatch_result.is_ok(),
            failure_reason: dispatch_result.as_ref().err().map(|e| e.to_string()),
            actor: RetryActor::Scheduler,
            note: Some(step.action.as_str().to_string()),
        });
        updated.mark_retrying();
        updated.next_retry_at = Self::next_step_due_at(&updated, campaign);
        self.payments.update(&updated, payment.version).await?;
        self.audit_action(
            payment,
            Some(campaign.id),
            step.action.as_str(),
            "scheduler",
            None,
        )
        .await;

        dispatch_result?;
        info!(
            "记录 {} 已通过 {} 渠道发送催缴通知（升级等级 {}）",
            payment.id,
            channel.as_str(),
            step.escalation_level
        );
        Ok(StepOutcome::NotificationSent { channel })
    }

    async fn cancel_step(
        &self,
        payment: &FailedPayment,
        campaign: &DunningCampaign,
        step: &dunning_core::models::RetryStep,
        now: DateTime<Utc>,
    ) -> DunningResult<StepOutcome> {
        let mut updated = payment.clone();
        updated.record_attempt(RetryAttempt {
            attempted_at: now,
            amount: payment.amount,
            payment_method_id: None,
            success: true,
            failure_reason: None,
            actor: RetryActor::Scheduler,
            note: Some(step.action.as_str().to_string()),
        });
        updated.mark_abandoned(
            format!("cancelled by campaign '{}' step {}", campaign.name, step.step_number),
            now,
        )?;
        self.payments.update(&updated, payment.version).await?;
        self.subscriptions.cancel(payment.subscription_id).await?;
        self.subscriptions
            .lower_access(payment.subscription_id)
            .await?;
        self.audit_action(payment, Some(campaign.id), "cancel_subscription", "scheduler", None)
            .await;
        info!(
            "记录 {} 执行取消步骤，订阅 {} 已取消",
            payment.id, payment.subscription_id
        );
        Ok(StepOutcome::Cancelled)
    }

    /// 绑定活动时下一步的到期时间，仅用于展示
    fn next_step_due_at(
        payment: &FailedPayment,
        campaign: &DunningCampaign,
    ) -> Option<DateTime<Utc>> {
        campaign
            .step_for_attempt(payment.retry_attempts)
            .map(|next| payment.created_at + Duration::days(next.delay_days as i64))
    }

    /// 审计是旁路写入：失败只告警，不影响主流程
    async fn audit_action(
        &self,
        payment: &FailedPayment,
        campaign_id: Option<i64>,
        action: &str,
        actor: &str,
        detail: Option<serde_json::Value>,
    ) {
        let mut entry = AuditEntry::new(payment.id, action, actor);
        if let Some(id) = campaign_id {
            entry = entry.with_campaign(id);
        }
        if let Some(detail) = detail {
            entry = entry.with_detail(detail);
        }
        if let Err(e) = self.audit.record(&entry).await {
            warn!("记录 {} 的审计写入失败: {}", payment.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dunning_core::models::{CampaignType, PaymentStatus, RetryStep, TriggerConditions};
    use dunning_core::traits::{
        MockAuditSink, MockFailedPaymentRepository, MockNotificationDispatcher,
        MockPaymentGateway, MockSubscriptionService,
    };
    use rust_decimal_macros::dec;

    struct Mocks {
        payments: MockFailedPaymentRepository,
        gateway: MockPaymentGateway,
        notifier: MockNotificationDispatcher,
        subscriptions: MockSubscriptionService,
        audit: MockAuditSink,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                payments: MockFailedPaymentRepository::new(),
                gateway: MockPaymentGateway::new(),
                notifier: MockNotificationDispatcher::new(),
                subscriptions: MockSubscriptionService::new(),
                audit: MockAuditSink::new(),
            }
        }

        fn into_executor(self) -> StepExecutor {
            StepExecutor::new(
                Arc::new(self.payments),
                Arc::new(self.gateway),
                Arc::new(self.notifier),
                Arc::new(self.subscriptions),
                Arc::new(self.audit),
                BackoffPolicy::default(),
            )
        }
    }

    fn campaign() -> DunningCampaign {
        let mut c = DunningCampaign::new(
            "standard".to_string(),
            CampaignType::Multi,
            TriggerConditions::default(),
            vec![
                RetryStep {
                    step_number: 1,
                    delay_days: 1,
                    action: StepAction::RetryPayment,
                    escalation_level: 1,
                    template: None,
                },
                RetryStep {
                    step_number: 2,
                    delay_days: 3,
                    action: StepAction::SendEmail,
                    escalation_level: 2,
                    template: None,
                },
            ],
        );
        c.id = 1;
        c
    }

    fn payment() -> FailedPayment {
        let mut p = FailedPayment::new(1, 10, dec!(50.00), "USD".to_string(), "pro".to_string());
        p.id = 100;
        p.campaign_id = Some(1);
        p
    }

    #[tokio::test]
    async fn test_step_not_due_has_no_side_effects() {
        // 未配置任何mock期望：任何网关/仓储调用都会panic
        let executor = Mocks::new().into_executor();
        let p = payment();
        let c = campaign();
        let now = p.created_at + Duration::hours(12);

        let outcome = executor.execute_step(&p, &c, false, now).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::NotDue {
                due_at: p.created_at + Duration::days(1)
            }
        );
    }

    #[tokio::test]
    async fn test_dry_run_reports_action_without_side_effects() {
        let executor = Mocks::new().into_executor();
        let p = payment();
        let c = campaign();
        let now = p.created_at + Duration::days(2);

        let outcome = executor.execute_step(&p, &c, true, now).await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::DryRun {
                planned_action: "retry_payment".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_terminal_record_is_rejected() {
        let executor = Mocks::new().into_executor();
        let mut p = payment();
        p.status = PaymentStatus::Abandoned;
        let c = campaign();

        let result = executor.execute_step(&p, &c, false, Utc::now()).await;
        assert!(matches!(result, Err(DunningError::TerminalState { .. })));
    }

    #[tokio::test]
    async fn test_charge_success_recovers_and_marks_subscription() {
        let mut mocks = Mocks::new();
        mocks.gateway.expect_charge().times(1).returning(|_| {
            Ok(ChargeOutcome::Succeeded {
                gateway_payment_id: "pay_ok".to_string(),
            })
        });
        mocks
            .payments
            .expect_update()
            .times(1)
            .withf(|p, expected_version| {
                p.status == PaymentStatus::Recovered
                    && p.retry_attempts == 1
                    && p.retry_history.len() == 1
                    && *expected_version == 0
            })
            .returning(|_, _| Ok(()));
        mocks
            .subscriptions
            .expect_mark_payment_current()
            .times(1)
            .returning(|_| Ok(()));
        mocks.audit.expect_record().returning(|_| Ok(()));

        let executor = mocks.into_executor();
        let p = payment();
        let c = campaign();
        let now = p.created_at + Duration::days(1);

        let outcome = executor.execute_step(&p, &c, false, now).await.unwrap();
        assert!(matches!(outcome, StepOutcome::Recovered { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_schedule_abandons_record() {
        let mut mocks = Mocks::new();
        mocks
            .payments
            .expect_update()
            .times(1)
            .withf(|p, _| {
                p.status == PaymentStatus::Abandoned
                    && p.abandonment_reason.as_deref() == Some(EXHAUSTED_REASON)
            })
            .returning(|_, _| Ok(()));
        mocks.audit.expect_record().returning(|_| Ok(()));

        let executor = mocks.into_executor();
        let mut p = payment();
        p.retry_attempts = 2;
        p.retry_history = vec![]; // 测试中不关心账本内容
        let c = campaign();

        let outcome = executor
            .execute_step(&p, &c, false, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Exhausted);
    }

    #[tokio::test]
    async fn test_manual_retry_on_missing_record() {
        let mut mocks = Mocks::new();
        mocks
            .payments
            .expect_get_by_id()
            .times(1)
            .returning(|_| Ok(None));

        let executor = mocks.into_executor();
        let result = executor
            .retry_now(999, &RetryOverrides::default(), Utc::now())
            .await;
        assert!(matches!(
            result,
            Err(DunningError::PaymentNotFound { id: 999 })
        ));
    }
}
