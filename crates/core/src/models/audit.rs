use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 审计日志条目
///
/// 所有变更路径（自动扫描、手动重试、放弃、批量操作）都写一条，
/// 终态转换永不回滚，审计日志即为事实来源。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub payment_id: i64,
    pub campaign_id: Option<i64>,
    pub action: String,
    pub actor: String,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(payment_id: i64, action: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            id: 0, // 由数据库生成
            payment_id,
            campaign_id: None,
            action: action.into(),
            actor: actor.into(),
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_campaign(mut self, campaign_id: i64) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_campaign_and_detail() {
        let entry = AuditEntry::new(7, "abandoned", "operator")
            .with_campaign(3)
            .with_detail(serde_json::json!({ "reason": "user requested" }));
        assert_eq!(entry.payment_id, 7);
        assert_eq!(entry.campaign_id, Some(3));
        assert_eq!(
            entry.detail.unwrap()["reason"],
            serde_json::json!("user requested")
        );
    }
}
