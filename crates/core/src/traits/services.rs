//! 外部服务接口定义
//!
//! 催缴引擎通过这组接口与外部系统交互：
//! - 支付网关 (PaymentGateway) - 重新扣款与退款
//! - 通知分发 (NotificationDispatcher) - 邮件 / 短信催缴提醒
//! - 订阅服务 (SubscriptionService) - 订阅状态联动
//!
//! 接口语义上的一条重要约定：网关拒付（卡被拒、余额不足）是正常的
//! 业务结果，通过 `ChargeOutcome::Declined` 返回并写入重试账本；
//! 只有基础设施层面的故障（网络、超时、网关 5xx）才走 `Err`。

use crate::errors::DunningResult;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 扣款请求
#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub user_id: i64,
    pub subscription_id: i64,
    pub amount: Decimal,
    pub currency: String,
    /// 指定支付方式，None 时由网关选用户默认支付方式
    pub payment_method_id: Option<String>,
    /// 幂等键，同一次重试槽位的重复提交不会二次扣款
    pub idempotency_key: String,
}

/// 扣款结果
///
/// 两种值都是业务上的"成功调用"，由调用方决定后续状态转换。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeOutcome {
    /// 扣款成功，携带网关侧支付ID
    Succeeded { gateway_payment_id: String },
    /// 网关拒付，携带拒付原因码
    Declined { reason: String },
}

impl ChargeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChargeOutcome::Succeeded { .. })
    }
}

/// 支付网关接口
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// 发起重新扣款
    ///
    /// # 错误
    ///
    /// * `Gateway` - 网关通信失败（网络、超时、5xx），拒付不算错误
    async fn charge(&self, request: &ChargeRequest) -> DunningResult<ChargeOutcome>;

    /// 对已成功的支付发起退款（放弃回收时可选触发）
    async fn refund(&self, gateway_payment_id: &str, amount: Decimal) -> DunningResult<()>;
}

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Sms => "sms",
        }
    }
}

/// 催缴通知内容
#[derive(Debug, Clone, Serialize)]
pub struct DunningNotice {
    pub user_id: i64,
    pub channel: NotificationChannel,
    /// 活动配置中的模板标识，None 时使用渠道默认模板
    pub template: Option<String>,
    /// 升级等级，模板渲染时控制措辞严厉程度
    pub escalation_level: i32,
    pub amount: Decimal,
    pub currency: String,
    /// 用户层面的失败次数（原始失败 + 已消耗的重试槽位）
    pub failure_count: i32,
}

/// 通知分发接口
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// 分发一条催缴通知
    ///
    /// # 错误
    ///
    /// * `Notification` - 分发失败，该步骤计入账本但标记失败
    async fn dispatch(&self, notice: &DunningNotice) -> DunningResult<()>;
}

/// 订阅服务接口
///
/// 催缴结果与订阅状态的联动：恢复成功恢复服务，放弃时取消或降级。
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    /// 恢复成功后将订阅标记为已缴费
    async fn mark_payment_current(&self, subscription_id: i64) -> DunningResult<()>;

    /// 执行取消动作或放弃回收时取消订阅
    async fn cancel(&self, subscription_id: i64) -> DunningResult<()>;

    /// 催缴进行中限制订阅的访问等级
    async fn lower_access(&self, subscription_id: i64) -> DunningResult<()>;
}
