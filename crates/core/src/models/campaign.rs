use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{DunningError, DunningResult};
use crate::models::payment::FailedPayment;

/// 催缴活动：命名的重试/升级策略
///
/// 一条活动由资格条件（triggerConditions）和有序的步骤计划
/// （retry_schedule）组成，调度扫描按优先级顺序将其应用到
/// 符合条件的失败支付记录上。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DunningCampaign {
    pub id: i64,
    pub name: String,
    pub campaign_type: CampaignType,
    pub trigger_conditions: TriggerConditions,
    /// 有序步骤计划，step_number 从 1 开始严格递增
    pub retry_schedule: Vec<RetryStep>,
    /// 各渠道模板配置（由通知分发器解释）
    pub channel_templates: serde_json::Value,
    pub status: CampaignStatus,
    /// 多活动同时匹配时，优先级高者先绑定
    pub priority: i32,
    pub total_executions: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Email,
    Sms,
    Webhook,
    Multi,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CampaignStatus {
    #[serde(rename = "draft")]
    Draft,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "paused")]
    Paused,
}

impl sqlx::Type<sqlx::Postgres> for CampaignStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for CampaignStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            _ => Err(format!("Invalid campaign status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for CampaignStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
        };
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
    }
}

impl sqlx::Type<sqlx::Postgres> for CampaignType {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for CampaignType {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "email" => Ok(CampaignType::Email),
            "sms" => Ok(CampaignType::Sms),
            "webhook" => Ok(CampaignType::Webhook),
            "multi" => Ok(CampaignType::Multi),
            _ => Err(format!("Invalid campaign type: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for CampaignType {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        let s = match self {
            CampaignType::Email => "email",
            CampaignType::Sms => "sms",
            CampaignType::Webhook => "webhook",
            CampaignType::Multi => "multi",
        };
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(s, buf)
    }
}

/// 单个催缴步骤
///
/// `delay_days` 是相对于支付失败时刻（记录 created_at）的累计天数
/// 偏移：day 1 重试、day 3 邮件、day 7 取消，属于经典催缴时间线。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryStep {
    pub step_number: i32,
    pub delay_days: i32,
    pub action: StepAction,
    pub escalation_level: i32,
    /// 覆盖默认渠道模板（send_email / send_sms 步骤使用）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    RetryPayment,
    SendEmail,
    SendSms,
    CancelSubscription,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::RetryPayment => "retry_payment",
            StepAction::SendEmail => "send_email",
            StepAction::SendSms => "send_sms",
            StepAction::CancelSubscription => "cancel_subscription",
        }
    }
}

/// 活动资格条件
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TriggerConditions {
    /// 最少失败次数（原始失败事件本身计为 1 次）
    pub min_failure_count: i32,
    pub min_days_since_failure: i32,
    /// 金额下限，None 表示不限
    pub amount_threshold: Option<Decimal>,
    pub exclude_trial_users: bool,
    /// 适用套餐白名单，空表示全部
    #[serde(default)]
    pub plan_whitelist: Vec<String>,
}

impl TriggerConditions {
    /// 纯谓词：判断一条失败支付记录是否满足本活动的资格条件
    pub fn matches(&self, payment: &FailedPayment, now: DateTime<Utc>) -> bool {
        if payment.failure_count() < self.min_failure_count {
            return false;
        }
        let age_days = (now - payment.created_at).num_days();
        if age_days < self.min_days_since_failure as i64 {
            return false;
        }
        if let Some(threshold) = self.amount_threshold {
            if payment.amount < threshold {
                return false;
            }
        }
        if self.exclude_trial_users && payment.trial_user {
            return false;
        }
        if !self.plan_whitelist.is_empty() && !self.plan_whitelist.contains(&payment.plan_code) {
            return false;
        }
        true
    }
}

/// 活动查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct CampaignFilter {
    pub status: Option<CampaignStatus>,
    pub campaign_type: Option<CampaignType>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl DunningCampaign {
    pub fn new(
        name: String,
        campaign_type: CampaignType,
        trigger_conditions: TriggerConditions,
        retry_schedule: Vec<RetryStep>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由数据库生成
            name,
            campaign_type,
            trigger_conditions,
            retry_schedule,
            channel_templates: serde_json::Value::Null,
            status: CampaignStatus::Draft,
            priority: 0,
            total_executions: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, CampaignStatus::Active)
    }

    /// 校验步骤计划的不变量，入库前调用
    ///
    /// 要求：计划非空；step_number 从 1 开始严格递增；
    /// delay_days 非负且不回退。违反时返回 `InvalidCampaign`。
    pub fn validate(&self) -> DunningResult<()> {
        if self.name.trim().is_empty() {
            return Err(DunningError::InvalidCampaign("活动名称不能为空".to_string()));
        }
        if self.retry_schedule.is_empty() {
            return Err(DunningError::InvalidCampaign(
                "重试计划不能为空".to_string(),
            ));
        }
        let mut last_delay = -1i32;
        for (idx, step) in self.retry_schedule.iter().enumerate() {
            let expected = idx as i32 + 1;
            if step.step_number != expected {
                return Err(DunningError::InvalidCampaign(format!(
                    "步骤编号必须从1开始连续递增，位置 {} 上的编号是 {}",
                    idx + 1,
                    step.step_number
                )));
            }
            if step.delay_days < 0 {
                return Err(DunningError::InvalidCampaign(format!(
                    "步骤 {} 的 delay_days 不能为负数",
                    step.step_number
                )));
            }
            if step.delay_days < last_delay {
                return Err(DunningError::InvalidCampaign(format!(
                    "步骤 {} 的 delay_days ({}) 早于前一步骤",
                    step.step_number, step.delay_days
                )));
            }
            last_delay = step.delay_days;
        }
        Ok(())
    }

    /// 按已消耗的计划槽位取当前应执行的步骤，耗尽时返回 None
    pub fn step_for_attempt(&self, retry_attempts: i32) -> Option<&RetryStep> {
        if retry_attempts < 0 {
            return None;
        }
        self.retry_schedule.get(retry_attempts as usize)
    }

    pub fn entity_description(&self) -> String {
        format!(
            "催缴活动 '{}' (ID: {}, 类型: {:?}, 步骤数: {})",
            self.name,
            self.id,
            self.campaign_type,
            self.retry_schedule.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn step(n: i32, delay: i32, action: StepAction) -> RetryStep {
        RetryStep {
            step_number: n,
            delay_days: delay,
            action,
            escalation_level: n,
            template: None,
        }
    }

    fn campaign_with_steps(steps: Vec<RetryStep>) -> DunningCampaign {
        DunningCampaign::new(
            "standard".to_string(),
            CampaignType::Multi,
            TriggerConditions::default(),
            steps,
        )
    }

    #[test]
    fn test_validate_accepts_ordered_schedule() {
        let campaign = campaign_with_steps(vec![
            step(1, 1, StepAction::RetryPayment),
            step(2, 3, StepAction::SendEmail),
            step(3, 7, StepAction::CancelSubscription),
        ]);
        assert!(campaign.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_schedule() {
        let campaign = campaign_with_steps(vec![]);
        assert!(matches!(
            campaign.validate(),
            Err(DunningError::InvalidCampaign(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_step_numbers() {
        let campaign = campaign_with_steps(vec![
            step(1, 1, StepAction::RetryPayment),
            step(3, 3, StepAction::SendEmail),
        ]);
        assert!(campaign.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_delay() {
        let campaign = campaign_with_steps(vec![step(1, -1, StepAction::RetryPayment)]);
        assert!(campaign.validate().is_err());
    }

    #[test]
    fn test_step_for_attempt_exhaustion() {
        let campaign = campaign_with_steps(vec![
            step(1, 1, StepAction::RetryPayment),
            step(2, 3, StepAction::SendEmail),
        ]);
        assert_eq!(
            campaign.step_for_attempt(0).map(|s| s.action),
            Some(StepAction::RetryPayment)
        );
        assert_eq!(
            campaign.step_for_attempt(1).map(|s| s.action),
            Some(StepAction::SendEmail)
        );
        assert!(campaign.step_for_attempt(2).is_none());
    }

    #[test]
    fn test_trigger_conditions_amount_threshold() {
        let mut payment = crate::models::payment::FailedPayment::new(
            1,
            10,
            dec!(25.00),
            "USD".to_string(),
            "pro".to_string(),
        );
        payment.trial_user = false;

        let conditions = TriggerConditions {
            min_failure_count: 1,
            min_days_since_failure: 0,
            amount_threshold: Some(dec!(50.00)),
            exclude_trial_users: false,
            plan_whitelist: vec![],
        };
        assert!(!conditions.matches(&payment, Utc::now()));

        payment.amount = dec!(75.00);
        assert!(conditions.matches(&payment, Utc::now()));
    }

    #[test]
    fn test_trigger_conditions_trial_and_plan() {
        let mut payment = crate::models::payment::FailedPayment::new(
            1,
            10,
            dec!(99.00),
            "USD".to_string(),
            "basic".to_string(),
        );
        payment.trial_user = true;

        let conditions = TriggerConditions {
            min_failure_count: 1,
            min_days_since_failure: 0,
            amount_threshold: None,
            exclude_trial_users: true,
            plan_whitelist: vec!["pro".to_string()],
        };
        // 试用用户被排除
        assert!(!conditions.matches(&payment, Utc::now()));

        payment.trial_user = false;
        // 套餐不在白名单内
        assert!(!conditions.matches(&payment, Utc::now()));

        payment.plan_code = "pro".to_string();
        assert!(conditions.matches(&payment, Utc::now()));
    }
}
