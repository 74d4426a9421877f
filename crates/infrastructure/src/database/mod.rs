//! 数据库连接与Postgres仓储实现

pub mod postgres;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use dunning_core::config::DatabaseConfig;
use dunning_core::DunningResult;

/// 按配置创建Postgres连接池
pub async fn create_pool(config: &DatabaseConfig) -> DunningResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
        .connect(&config.url)
        .await?;
    info!(
        "数据库连接池已建立 (max={}, min={})",
        config.max_connections, config.min_connections
    );
    Ok(pool)
}
