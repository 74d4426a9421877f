//! 催缴回收引擎
//!
//! 策略驱动的失败支付重试调度：资格过滤、步骤执行、退避策略、
//! 扫描处理器、批量编排与指标聚合。

pub mod backoff;
pub mod bulk;
pub mod eligibility;
pub mod executor;
pub mod metrics;
pub mod processor;

pub use backoff::BackoffPolicy;
pub use bulk::{
    AbandonOptions, BulkItemResult, BulkOrchestrator, BulkRetryReport, BulkRetryRequest,
};
pub use executor::{RetryOverrides, StepExecutor, StepOutcome};
pub use metrics::{AnalyticsPeriod, AnalyticsReport, CampaignMetrics, MetricsAggregator};
pub use processor::{CampaignScanReport, DunningProcessor, ProcessReport};
