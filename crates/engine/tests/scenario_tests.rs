//! 端到端场景测试：内存仓储 + 脚本化网关/通知/订阅假实现

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use dunning_core::{
    models::{
        CampaignStatus, CampaignType, DunningCampaign, FailedPayment, PaymentStatus, RetryStep,
        StepAction, TriggerConditions,
    },
    traits::{CampaignRepository, FailedPaymentRepository},
    DunningError,
};
use dunning_engine::{
    AbandonOptions, BackoffPolicy, BulkOrchestrator, BulkRetryRequest, DunningProcessor,
    RetryOverrides, StepExecutor, StepOutcome,
};
use dunning_infrastructure::memory::{
    MemoryAuditSink, MemoryCampaignRepository, MemoryFailedPaymentRepository,
};
use dunning_infrastructure::testing::{
    RecordingNotifier, RecordingSubscriptionService, ScriptedGateway,
};

struct Harness {
    campaigns: Arc<MemoryCampaignRepository>,
    payments: Arc<MemoryFailedPaymentRepository>,
    gateway: Arc<ScriptedGateway>,
    notifier: Arc<RecordingNotifier>,
    subscriptions: Arc<RecordingSubscriptionService>,
    processor: DunningProcessor,
    bulk: BulkOrchestrator,
}

impl Harness {
    fn new() -> Self {
        let campaigns = Arc::new(MemoryCampaignRepository::new());
        let payments = Arc::new(MemoryFailedPaymentRepository::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let subscriptions = Arc::new(RecordingSubscriptionService::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let executor = Arc::new(StepExecutor::new(
            payments.clone(),
            gateway.clone(),
            notifier.clone(),
            subscriptions.clone(),
            audit.clone(),
            BackoffPolicy::default(),
        ));
        let processor = DunningProcessor::new(campaigns.clone(), payments.clone(), executor.clone());
        let bulk = BulkOrchestrator::new(
            executor,
            payments.clone(),
            gateway.clone(),
            subscriptions.clone(),
            audit,
        );

        Self {
            campaigns,
            payments,
            gateway,
            notifier,
            subscriptions,
            processor,
            bulk,
        }
    }

    async fn create_campaign(&self, steps: Vec<(i32, StepAction)>, priority: i32) -> DunningCampaign {
        let schedule = steps
            .into_iter()
            .enumerate()
            .map(|(idx, (delay_days, action))| RetryStep {
                step_number: idx as i32 + 1,
                delay_days,
                action,
                escalation_level: idx as i32 + 1,
                template: None,
            })
            .collect();
        let mut campaign = DunningCampaign::new(
            "standard-recovery".to_string(),
            CampaignType::Multi,
            TriggerConditions::default(),
            schedule,
        );
        campaign.status = CampaignStatus::Active;
        campaign.priority = priority;
        self.campaigns.create(&campaign).await.unwrap()
    }

    async fn create_payment(
        &self,
        user_id: i64,
        amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> FailedPayment {
        let mut payment = FailedPayment::new(
            user_id,
            user_id * 10,
            amount,
            "USD".to_string(),
            "pro".to_string(),
        );
        payment.created_at = created_at;
        self.payments.create(&payment).await.unwrap()
    }

    async fn reload(&self, id: i64) -> FailedPayment {
        self.payments.get_by_id(id).await.unwrap().unwrap()
    }
}

fn assert_ledger_invariant(payment: &FailedPayment) {
    assert_eq!(
        payment.retry_history.len(),
        payment.retry_attempts as usize,
        "账本长度必须等于已消耗的槽位数"
    );
}

// 场景A：[1d retry, 3d email, 7d cancel]，网关持续拒付
#[tokio::test]
async fn scenario_a_full_campaign_timeline() {
    let h = Harness::new();
    let t0 = Utc::now();
    h.create_campaign(
        vec![
            (1, StepAction::RetryPayment),
            (3, StepAction::SendEmail),
            (7, StepAction::CancelSubscription),
        ],
        10,
    )
    .await;
    let payment = h.create_payment(1, dec!(50.00), t0).await;
    h.gateway.decline_for_users([1]).await;

    // t0+12h：步骤1未到期
    h.processor
        .process_at(None, false, t0 + Duration::hours(12))
        .await
        .unwrap();
    let p = h.reload(payment.id).await;
    assert_eq!(p.status, PaymentStatus::Pending);
    assert_eq!(p.retry_attempts, 0);

    // t0+1d：步骤1执行，网关拒付
    h.processor
        .process_at(None, false, t0 + Duration::days(1))
        .await
        .unwrap();
    let p = h.reload(payment.id).await;
    assert_eq!(p.status, PaymentStatus::Retrying);
    assert_eq!(p.retry_attempts, 1);
    assert_eq!(h.gateway.charge_count().await, 1);
    assert_ledger_invariant(&p);
    assert!(!p.retry_history[0].success);

    // t0+3d：步骤2发送邮件，消耗一个槽位
    h.processor
        .process_at(None, false, t0 + Duration::days(3))
        .await
        .unwrap();
    let p = h.reload(payment.id).await;
    assert_eq!(p.retry_attempts, 2);
    assert_eq!(h.notifier.notice_count().await, 1);
    assert_eq!(h.gateway.charge_count().await, 1);
    assert_ledger_invariant(&p);

    // t0+10d：步骤3（7d已过期）补上执行，取消订阅
    h.processor
        .process_at(None, false, t0 + Duration::days(10))
        .await
        .unwrap();
    let p = h.reload(payment.id).await;
    assert_eq!(p.status, PaymentStatus::Abandoned);
    assert_eq!(h.subscriptions.cancelled().await, vec![payment.subscription_id]);
    assert_ledger_invariant(&p);

    // 终态后再扫描不再有任何动作
    h.processor
        .process_at(None, false, t0 + Duration::days(20))
        .await
        .unwrap();
    let after = h.reload(payment.id).await;
    assert_eq!(after.version, p.version);
    assert_eq!(h.gateway.charge_count().await, 1);
}

// 场景B：pending记录手动重试成功
#[tokio::test]
async fn scenario_b_manual_retry_recovers() {
    let h = Harness::new();
    let payment = h.create_payment(2, dec!(100.00), Utc::now()).await;

    let outcome = h
        .bulk
        .retry_single(payment.id, RetryOverrides::default())
        .await
        .unwrap();
    assert!(matches!(outcome, StepOutcome::Recovered { .. }));

    let p = h.reload(payment.id).await;
    assert_eq!(p.status, PaymentStatus::Recovered);
    assert!(p.recovered_payment_id.is_some());
    assert_ledger_invariant(&p);
    assert_eq!(
        h.subscriptions.payment_current().await,
        vec![payment.subscription_id]
    );
}

// 场景C：批量重试25条，11-15号用户被拒付
#[tokio::test]
async fn scenario_c_bulk_retry_partial_failure() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for user_id in 1..=25 {
        let p = h.create_payment(user_id, dec!(20.00), Utc::now()).await;
        ids.push(p.id);
    }
    h.gateway.decline_for_users(11..=15).await;

    let report = h
        .bulk
        .bulk_retry(BulkRetryRequest {
            payment_ids: ids.clone(),
            batch_size: 10,
            delay_between_batches: StdDuration::from_millis(0),
            reason: Some("月末批量催收".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(report.total, 25);
    assert_eq!(report.successful, 20);
    assert_eq!(report.failed, 5);
    assert_eq!(report.total_recovered_amount, dec!(400.00));
    assert_eq!(report.results.len(), 25);

    for result in &report.results {
        let payment = h.reload(result.payment_id).await;
        if result.success {
            assert_eq!(payment.status, PaymentStatus::Recovered);
        } else {
            assert_eq!(payment.status, PaymentStatus::Retrying);
            assert!(result.failure_reason.is_some());
        }
        assert_ledger_invariant(&payment);
    }
}

// 幂等性：同一id列表重复批量重试，不产生第二次成功扣款
#[tokio::test]
async fn bulk_retry_is_idempotent_on_terminal_records() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for user_id in 1..=3 {
        let p = h.create_payment(user_id, dec!(10.00), Utc::now()).await;
        ids.push(p.id);
    }

    let request = BulkRetryRequest {
        payment_ids: ids.clone(),
        batch_size: 10,
        delay_between_batches: StdDuration::from_millis(0),
        reason: None,
    };
    let first = h.bulk.bulk_retry(request.clone()).await.unwrap();
    assert_eq!(first.successful, 3);
    assert_eq!(h.gateway.charge_count().await, 3);

    // 第二次调用：全部已终态，逐条拒绝，零新增扣款
    let second = h.bulk.bulk_retry(request).await.unwrap();
    assert_eq!(second.successful, 0);
    assert_eq!(second.failed, 3);
    assert_eq!(h.gateway.charge_count().await, 3);
}

// 场景D：对已放弃记录重试被拒绝，状态零变更
#[tokio::test]
async fn scenario_d_terminal_record_rejects_retry() {
    let h = Harness::new();
    let payment = h.create_payment(4, dec!(30.00), Utc::now()).await;
    h.bulk
        .abandon(
            payment.id,
            AbandonOptions {
                reason: "user requested".to_string(),
                cancel_subscription: false,
                refund_amount: None,
            },
        )
        .await
        .unwrap();

    let before = h.reload(payment.id).await;
    let result = h
        .bulk
        .retry_single(payment.id, RetryOverrides::default())
        .await;
    assert!(matches!(result, Err(DunningError::TerminalState { .. })));

    let after = h.reload(payment.id).await;
    assert_eq!(after.version, before.version);
    assert_eq!(after.retry_attempts, before.retry_attempts);
    assert_eq!(h.gateway.charge_count().await, 0);
}

// 试运行：报告计划动作但不产生任何副作用
#[tokio::test]
async fn dry_run_has_no_side_effects() {
    let h = Harness::new();
    let t0 = Utc::now();
    let campaign = h
        .create_campaign(vec![(1, StepAction::RetryPayment)], 5)
        .await;
    let payment = h.create_payment(6, dec!(45.00), t0).await;

    let report = h
        .processor
        .process_at(Some(campaign.id), true, t0 + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(report.total_executed(), 1);

    let p = h.reload(payment.id).await;
    assert_eq!(p.version, 0);
    assert_eq!(p.retry_attempts, 0);
    assert!(p.campaign_id.is_none());
    assert_eq!(h.gateway.charge_count().await, 0);
    let c = h.campaigns.get_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(c.total_executions, 0);
}

// 绑定裁决：高优先级活动胜出，绑定后排他
#[tokio::test]
async fn binding_prefers_higher_priority_campaign() {
    let h = Harness::new();
    let t0 = Utc::now();
    let low = h.create_campaign(vec![(0, StepAction::SendEmail)], 1).await;
    let high = h.create_campaign(vec![(0, StepAction::SendSms)], 9).await;
    let payment = h.create_payment(7, dec!(60.00), t0).await;

    h.processor
        .process_at(None, false, t0 + Duration::hours(1))
        .await
        .unwrap();
    let p = h.reload(payment.id).await;
    assert_eq!(p.campaign_id, Some(high.id));
    assert_ne!(p.campaign_id, Some(low.id));

    // 后续扫描继续沿高优先级活动推进，低优先级活动永不接手
    let notices = h.notifier.notices().await;
    assert_eq!(notices.len(), 1);
    assert_eq!(
        notices[0].channel,
        dunning_core::traits::NotificationChannel::Sms
    );
}

// 首次选中即落盘绑定：步骤未到期也一样，后来激活的高优先级活动不能改绑
#[tokio::test]
async fn binding_persists_before_first_step_is_due() {
    let h = Harness::new();
    let t0 = Utc::now();
    let first = h
        .create_campaign(vec![(2, StepAction::RetryPayment)], 1)
        .await;
    let payment = h.create_payment(9, dec!(80.00), t0).await;

    // t0+1h：步骤要到 t0+2d 才到期，但绑定必须已经写入
    h.processor
        .process_at(None, false, t0 + Duration::hours(1))
        .await
        .unwrap();
    let p = h.reload(payment.id).await;
    assert_eq!(p.campaign_id, Some(first.id));
    assert_eq!(p.retry_attempts, 0);
    assert_eq!(h.gateway.charge_count().await, 0);

    // 更高优先级活动随后激活，下一轮扫描不能抢走已绑定的记录
    let _later = h.create_campaign(vec![(0, StepAction::SendEmail)], 9).await;
    h.processor
        .process_at(None, false, t0 + Duration::hours(2))
        .await
        .unwrap();
    let p = h.reload(payment.id).await;
    assert_eq!(p.campaign_id, Some(first.id));
    assert_eq!(h.notifier.notice_count().await, 0);
}

// 放弃时的部分退款打到原始扣款的网关支付ID上
#[tokio::test]
async fn abandon_with_refund_reaches_gateway() {
    let h = Harness::new();
    let mut payment =
        FailedPayment::new(8, 80, dec!(50.00), "USD".to_string(), "pro".to_string());
    payment.original_payment_id = Some("ch_original_8".to_string());
    let payment = h.payments.create(&payment).await.unwrap();

    h.bulk
        .abandon(
            payment.id,
            AbandonOptions {
                reason: "chargeback settled".to_string(),
                cancel_subscription: false,
                refund_amount: Some(dec!(25.00)),
            },
        )
        .await
        .unwrap();

    let p = h.reload(payment.id).await;
    assert_eq!(p.status, PaymentStatus::Abandoned);
    assert_eq!(
        h.gateway.refunds().await,
        vec![("ch_original_8".to_string(), dec!(25.00))]
    );

    // 未携带原始支付ID的记录：放弃成功，退款被跳过
    let other = h.create_payment(12, dec!(40.00), Utc::now()).await;
    h.bulk
        .abandon(
            other.id,
            AbandonOptions {
                reason: "no charge to refund".to_string(),
                cancel_subscription: false,
                refund_amount: Some(dec!(10.00)),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.gateway.refunds().await.len(), 1);
}

// 活动执行计数随每个已执行动作自增
#[tokio::test]
async fn campaign_execution_counter_tracks_actions() {
    let h = Harness::new();
    let t0 = Utc::now();
    let campaign = h
        .create_campaign(vec![(0, StepAction::RetryPayment)], 3)
        .await;
    for user_id in 1..=4 {
        h.create_payment(user_id, dec!(15.00), t0).await;
    }

    h.processor
        .process_at(None, false, t0 + Duration::hours(1))
        .await
        .unwrap();
    let c = h.campaigns.get_by_id(campaign.id).await.unwrap().unwrap();
    assert_eq!(c.total_executions, 4);
}
