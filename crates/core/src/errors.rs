use thiserror::Error;

/// 催缴系统错误类型定义
///
/// 注意：支付网关拒付不是错误，而是正常的业务结果，
/// 通过 `ChargeOutcome` 建模并写入重试账本。
#[derive(Debug, Error)]
pub enum DunningError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("催缴活动未找到: {id}")]
    CampaignNotFound { id: i64 },

    #[error("失败支付记录未找到: {id}")]
    PaymentNotFound { id: i64 },

    #[error("无效的催缴活动配置: {0}")]
    InvalidCampaign(String),

    #[error("无效的请求参数: {0}")]
    InvalidRequest(String),

    #[error("记录 {id} 已处于终态 {status}，拒绝变更")]
    TerminalState { id: i64, status: String },

    #[error("记录 {id} 版本冲突，存在并发修改")]
    VersionConflict { id: i64 },

    #[error("支付网关错误: {0}")]
    Gateway(String),

    #[error("通知分发错误: {0}")]
    Notification(String),

    #[error("订阅服务错误: {0}")]
    Subscription(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for DunningError {
    fn from(e: serde_json::Error) -> Self {
        DunningError::Serialization(e.to_string())
    }
}

impl DunningError {
    /// 判断该错误是否可由调用方重试（并发冲突类）
    pub fn is_retryable(&self) -> bool {
        matches!(self, DunningError::VersionConflict { .. })
    }
}

/// 统一的Result类型
pub type DunningResult<T> = std::result::Result<T, DunningError>;
