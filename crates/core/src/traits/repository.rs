//! 数据仓储层接口定义
//!
//! 此模块定义了数据持久化层的核心抽象接口，包括：
//! - 催缴活动仓储接口 (CampaignRepository)
//! - 失败支付仓储接口 (FailedPaymentRepository)
//! - 审计日志写入接口 (AuditSink)
//!
//! ## 设计原则
//!
//! ### 接口隔离
//! 每个仓储接口职责单一，只负责特定实体的数据操作。
//!
//! ### 乐观并发控制
//! 失败支付记录的所有更新都带期望版本号。仓储实现用
//! `UPDATE ... WHERE id = ? AND version = ?` 做比较交换，
//! 未命中任何行时返回 `VersionConflict`，调用方重新加载后重试。
//!
//! ### 异步设计
//! 所有数据库操作都是异步的，返回 `DunningResult<T>` 统一错误处理，
//! 实现 `Send + Sync` 确保线程安全。

use crate::errors::DunningResult;
use crate::models::{
    AuditEntry, CampaignFilter, DunningCampaign, FailedPayment, FailedPaymentFilter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// 催缴活动仓储接口
///
/// 定义催缴活动的数据访问和持久化操作，支持活动的生命周期管理
/// 以及扫描时的优先级排序查询。
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// 创建新活动
    ///
    /// 将活动对象持久化到数据库中，并返回包含自动生成ID的活动实例。
    /// 创建前调用方须先通过 `DunningCampaign::validate` 校验重试计划。
    async fn create(&self, campaign: &DunningCampaign) -> DunningResult<DunningCampaign>;

    /// 根据ID获取活动
    async fn get_by_id(&self, id: i64) -> DunningResult<Option<DunningCampaign>>;

    /// 更新活动
    ///
    /// # 错误
    ///
    /// * `CampaignNotFound` - 活动不存在
    /// * `Database` - 数据库操作失败
    async fn update(&self, campaign: &DunningCampaign) -> DunningResult<()>;

    /// 删除活动
    ///
    /// 已绑定该活动的失败支付记录保留其 campaign_id，历史数据不回滚。
    async fn delete(&self, id: i64) -> DunningResult<()>;

    /// 根据过滤条件查询活动列表
    async fn list(&self, filter: &CampaignFilter) -> DunningResult<Vec<DunningCampaign>>;

    /// 获取所有激活态活动
    ///
    /// 这是扫描器的核心查询：返回 status = active 的活动，
    /// 按优先级降序、created_at 升序排列。排序即为绑定裁决顺序，
    /// 列表中第一个触发条件匹配的活动胜出。
    async fn get_active(&self) -> DunningResult<Vec<DunningCampaign>>;

    /// 活动执行计数自增
    ///
    /// 每次扫描对某条失败支付执行了该活动的一个步骤时调用。
    async fn increment_executions(&self, id: i64) -> DunningResult<()>;
}

/// 失败支付仓储接口
///
/// 管理失败支付记录从进入到终态的完整生命周期。记录只追加不删除，
/// `update` 走乐观锁比较交换。
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait FailedPaymentRepository: Send + Sync {
    /// 创建失败支付记录
    ///
    /// 由支付网关 webhook 或上游账务系统的失败事件触发。
    /// 新记录 status = pending，version = 0。
    async fn create(&self, payment: &FailedPayment) -> DunningResult<FailedPayment>;

    /// 根据ID获取记录
    async fn get_by_id(&self, id: i64) -> DunningResult<Option<FailedPayment>>;

    /// 乐观锁更新
    ///
    /// 仅当数据库中的版本号等于 `expected_version` 时写入，
    /// 写入后版本号自增。
    ///
    /// # 错误
    ///
    /// * `VersionConflict` - 版本号不匹配，存在并发修改
    /// * `PaymentNotFound` - 记录不存在
    async fn update(&self, payment: &FailedPayment, expected_version: i64) -> DunningResult<()>;

    /// 根据过滤条件查询记录列表
    async fn list(&self, filter: &FailedPaymentFilter) -> DunningResult<Vec<FailedPayment>>;

    /// 获取所有未关闭记录（pending / retrying）
    ///
    /// 扫描器的输入集合，按 created_at 升序排列。
    async fn get_open(&self) -> DunningResult<Vec<FailedPayment>>;

    /// 统计指定时间窗口内的回收指标
    ///
    /// `campaign_id` 为 None 时统计全局，否则仅统计绑定到该活动的记录。
    /// 窗口按记录的 created_at 过滤。
    async fn recovery_stats(
        &self,
        since: DateTime<Utc>,
        campaign_id: Option<i64>,
    ) -> DunningResult<RecoveryStats>;
}

/// 审计日志写入接口
///
/// 审计是旁路操作：写入失败只记日志告警，不影响主流程。
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> DunningResult<()>;

    /// 查询某条失败支付的审计轨迹，按时间升序
    async fn list_for_payment(&self, payment_id: i64) -> DunningResult<Vec<AuditEntry>>;
}

/// 回收统计信息
///
/// 指标口径：恢复率 = recovered / total（窗口内记录总数），
/// 平均重试次数只统计已关闭（recovered / abandoned）的记录。
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RecoveryStats {
    /// 窗口内失败支付记录总数
    pub total: i64,
    /// 已恢复记录数
    pub recovered: i64,
    /// 已放弃记录数
    pub abandoned: i64,
    /// 仍在处理中的记录数（pending + retrying）
    pub in_progress: i64,
    /// 窗口内失败金额合计
    pub total_amount: Decimal,
    /// 已恢复金额合计
    pub recovered_amount: Decimal,
    /// 已放弃金额合计
    pub lost_amount: Decimal,
    /// 已关闭记录的平均重试次数
    pub avg_attempts_to_close: Option<f64>,
}

impl RecoveryStats {
    /// 计算恢复率（百分比）
    ///
    /// 窗口内无记录时为 0。
    pub fn recovery_rate(&self) -> f64 {
        if self.total > 0 {
            (self.recovered as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }
}
