//! 可脚本化的外部服务假实现
//!
//! 引擎场景测试使用：网关按用户维度预设拒付，通知与订阅调用全量
//! 记录，便于断言副作用次数与顺序。

use std::collections::HashSet;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use dunning_core::{
    traits::{
        ChargeOutcome, ChargeRequest, DunningNotice, NotificationDispatcher, PaymentGateway,
        SubscriptionService,
    },
    DunningError, DunningResult,
};

/// 按脚本出结果的网关假实现
#[derive(Default)]
pub struct ScriptedGateway {
    charges: Mutex<Vec<ChargeRequest>>,
    decline_users: Mutex<HashSet<i64>>,
    /// 为 true 时模拟传输层故障
    fail_transport: Mutex<bool>,
    refunds: Mutex<Vec<(String, Decimal)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定这些用户的扣款一律拒付
    pub async fn decline_for_users(&self, user_ids: impl IntoIterator<Item = i64>) {
        let mut decline = self.decline_users.lock().await;
        decline.extend(user_ids);
    }

    pub async fn clear_declines(&self) {
        self.decline_users.lock().await.clear();
    }

    pub async fn set_fail_transport(&self, fail: bool) {
        *self.fail_transport.lock().await = fail;
    }

    /// 实际发生的扣款调用次数
    pub async fn charge_count(&self) -> usize {
        self.charges.lock().await.len()
    }

    pub async fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().await.clone()
    }

    pub async fn refunds(&self) -> Vec<(String, Decimal)> {
        self.refunds.lock().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: &ChargeRequest) -> DunningResult<ChargeOutcome> {
        if *self.fail_transport.lock().await {
            return Err(DunningError::Gateway("connection refused".to_string()));
        }
        let mut charges = self.charges.lock().await;
        charges.push(request.clone());
        let sequence = charges.len();
        drop(charges);

        if self.decline_users.lock().await.contains(&request.user_id) {
            Ok(ChargeOutcome::Declined {
                reason: "card_declined".to_string(),
            })
        } else {
            Ok(ChargeOutcome::Succeeded {
                gateway_payment_id: format!("pay_{sequence}"),
            })
        }
    }

    async fn refund(&self, gateway_payment_id: &str, amount: Decimal) -> DunningResult<()> {
        self.refunds
            .lock()
            .await
            .push((gateway_payment_id.to_string(), amount));
        Ok(())
    }
}

/// 记录所有分发调用的通知假实现
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<DunningNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notices(&self) -> Vec<DunningNotice> {
        self.notices.lock().await.clone()
    }

    pub async fn notice_count(&self) -> usize {
        self.notices.lock().await.len()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn dispatch(&self, notice: &DunningNotice) -> DunningResult<()> {
        self.notices.lock().await.push(notice.clone());
        Ok(())
    }
}

/// 记录所有订阅状态变更的假实现
#[derive(Default)]
pub struct RecordingSubscriptionService {
    payment_current: Mutex<Vec<i64>>,
    cancelled: Mutex<Vec<i64>>,
    access_lowered: Mutex<Vec<i64>>,
}

impl RecordingSubscriptionService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payment_current(&self) -> Vec<i64> {
        self.payment_current.lock().await.clone()
    }

    pub async fn cancelled(&self) -> Vec<i64> {
        self.cancelled.lock().await.clone()
    }

    pub async fn access_lowered(&self) -> Vec<i64> {
        self.access_lowered.lock().await.clone()
    }
}

#[async_trait]
impl SubscriptionService for RecordingSubscriptionService {
    async fn mark_payment_current(&self, subscription_id: i64) -> DunningResult<()> {
        self.payment_current.lock().await.push(subscription_id);
        Ok(())
    }

    async fn cancel(&self, subscription_id: i64) -> DunningResult<()> {
        self.cancelled.lock().await.push(subscription_id);
        Ok(())
    }

    async fn lower_access(&self, subscription_id: i64) -> DunningResult<()> {
        self.access_lowered.lock().await.push(subscription_id);
        Ok(())
    }
}
