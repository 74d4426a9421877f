use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{DunningError, DunningResult};

/// 失败支付记录
///
/// 记录是只追加的账本：创建后永不删除，`recovered`/`abandoned`
/// 终态即为其"关闭"。所有变更路径都必须带期望版本号走
/// `FailedPaymentRepository::update` 的乐观锁比较交换。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPayment {
    pub id: i64,
    /// 对外业务标识
    pub payment_ref: Uuid,
    pub user_id: i64,
    pub subscription_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub plan_code: String,
    pub trial_user: bool,
    pub status: PaymentStatus,
    /// 已消耗的计划槽位数，不变量：等于 retry_history.len()
    pub retry_attempts: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// 只追加、按执行顺序排列的重试账本
    pub retry_history: Vec<RetryAttempt>,
    /// 绑定的催缴活动，首次被扫描选中时写入，之后不再改绑
    pub campaign_id: Option<i64>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub recovered_payment_id: Option<String>,
    pub abandoned_at: Option<DateTime<Utc>>,
    pub abandonment_reason: Option<String>,
    /// 原始失败事件携带的拒付原因
    pub initial_failure_reason: Option<String>,
    /// 原始扣款在网关侧的支付ID，接入事件携带，放弃时部分退款的对象
    pub original_payment_id: Option<String>,
    pub payment_method_id: Option<String>,
    /// 乐观锁版本号，仓储每次更新自增
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "retrying")]
    Retrying,
    #[serde(rename = "recovered")]
    Recovered,
    #[serde(rename = "abandoned")]
    Abandoned,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Retrying => "retrying",
            PaymentStatus::Recovered => "recovered",
            PaymentStatus::Abandoned => "abandoned",
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for PaymentStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for PaymentStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "retrying" => Ok(PaymentStatus::Retrying),
            "recovered" => Ok(PaymentStatus::Recovered),
            "abandoned" => Ok(PaymentStatus::Abandoned),
            _ => Err(format!("Invalid payment status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for PaymentStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 重试账本条目
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryAttempt {
    pub attempted_at: DateTime<Utc>,
    pub amount: Decimal,
    pub payment_method_id: Option<String>,
    /// 扣款成功，或通知类动作成功分发
    pub success: bool,
    pub failure_reason: Option<String>,
    pub actor: RetryActor,
    /// 动作说明（retry_payment / send_email / 操作员备注等）
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetryActor {
    /// 自动扫描
    Scheduler,
    /// 手动/批量操作
    Operator,
}

/// 失败支付查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct FailedPaymentFilter {
    pub status: Option<PaymentStatus>,
    pub user_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 时间线事件（管理界面展示用，由账本重建）
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub detail: Option<String>,
}

impl FailedPayment {
    pub fn new(
        user_id: i64,
        subscription_id: i64,
        amount: Decimal,
        currency: String,
        plan_code: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由数据库生成
            payment_ref: Uuid::new_v4(),
            user_id,
            subscription_id,
            amount,
            currency,
            plan_code,
            trial_user: false,
            status: PaymentStatus::Pending,
            retry_attempts: 0,
            last_retry_at: None,
            next_retry_at: None,
            retry_history: Vec::new(),
            campaign_id: None,
            recovered_at: None,
            recovered_payment_id: None,
            abandoned_at: None,
            abandonment_reason: None,
            initial_failure_reason: None,
            original_payment_id: None,
            payment_method_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Recovered | PaymentStatus::Abandoned
        )
    }

    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// 终态守卫：对终态记录的任何变更请求都被拒绝
    pub fn ensure_open(&self) -> DunningResult<()> {
        if self.is_terminal() {
            return Err(DunningError::TerminalState {
                id: self.id,
                status: self.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// 用户层面的失败次数：原始失败事件计 1 次，加上已消耗的重试槽位
    pub fn failure_count(&self) -> i32 {
        self.retry_attempts + 1
    }

    /// 追加账本条目并消耗一个计划槽位
    ///
    /// 维护不变量 len(retry_history) == retry_attempts。
    pub fn record_attempt(&mut self, attempt: RetryAttempt) {
        self.last_retry_at = Some(attempt.attempted_at);
        self.retry_history.push(attempt);
        self.retry_attempts += 1;
        self.updated_at = Utc::now();
    }

    /// 扣款失败后的状态推进：pending → retrying（幂等）
    pub fn mark_retrying(&mut self) {
        if self.status == PaymentStatus::Pending {
            self.status = PaymentStatus::Retrying;
        }
    }

    /// 终态转换：恢复成功
    pub fn mark_recovered(
        &mut self,
        gateway_payment_id: String,
        now: DateTime<Utc>,
    ) -> DunningResult<()> {
        self.ensure_open()?;
        self.status = PaymentStatus::Recovered;
        self.recovered_at = Some(now);
        self.recovered_payment_id = Some(gateway_payment_id);
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// 终态转换：放弃回收
    pub fn mark_abandoned(&mut self, reason: String, now: DateTime<Utc>) -> DunningResult<()> {
        self.ensure_open()?;
        self.status = PaymentStatus::Abandoned;
        self.abandoned_at = Some(now);
        self.abandonment_reason = Some(reason);
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// 由账本重建完整时间线
    pub fn timeline(&self) -> Vec<TimelineEvent> {
        let mut events = Vec::with_capacity(self.retry_history.len() + 2);
        events.push(TimelineEvent {
            timestamp: self.created_at,
            event: "payment_failed".to_string(),
            detail: self.initial_failure_reason.clone(),
        });
        for attempt in &self.retry_history {
            let event = match (&attempt.note, attempt.success) {
                (Some(note), _) => note.clone(),
                (None, true) => "attempt_succeeded".to_string(),
                (None, false) => "attempt_failed".to_string(),
            };
            events.push(TimelineEvent {
                timestamp: attempt.attempted_at,
                event,
                detail: attempt.failure_reason.clone(),
            });
        }
        if let Some(at) = self.recovered_at {
            events.push(TimelineEvent {
                timestamp: at,
                event: "recovered".to_string(),
                detail: self.recovered_payment_id.clone(),
            });
        }
        if let Some(at) = self.abandoned_at {
            events.push(TimelineEvent {
                timestamp: at,
                event: "abandoned".to_string(),
                detail: self.abandonment_reason.clone(),
            });
        }
        events
    }

    pub fn entity_description(&self) -> String {
        format!(
            "失败支付 (ID: {}, 用户: {}, 金额: {} {}, 状态: {})",
            self.id,
            self.user_id,
            self.amount,
            self.currency,
            self.status.as_str()
        )
    }
}
