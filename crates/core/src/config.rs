//! 系统配置
//!
//! 加载顺序：默认值 → TOML配置文件 → 环境变量覆盖（前缀 DUNNING__，
//! 层级分隔符也是双下划线，如 DUNNING__DATABASE__MAX_CONNECTIONS）。

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::{DunningError, DunningResult};

/// 系统配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub engine: EngineConfig,
    pub gateway: GatewayConfig,
    pub notifier: NotifierConfig,
    pub subscription: SubscriptionConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub cors_enabled: bool,
    pub request_timeout_seconds: u64,
}

/// 催缴引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 扫描开关，关闭后仅保留手动操作入口
    pub enabled: bool,
    /// 扫描周期，0 表示仅由HTTP接口触发。扫描是水平触发的：
    /// 错过的步骤在下一轮补上
    pub scan_interval_seconds: u64,
    /// 无活动绑定时指数退避的天数上限
    pub backoff_cap_days: i64,
    /// 退避抖动系数上限，实际抖动取 [0, jitter) 均匀分布
    pub backoff_jitter: f64,
    /// 批量重试的默认批大小
    pub default_batch_size: usize,
    /// 批与批之间的默认间隔（毫秒）
    pub default_batch_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// json 或 pretty
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/dunning".to_string(),
                max_connections: 10,
                min_connections: 1,
                connection_timeout_seconds: 30,
                idle_timeout_seconds: 600,
            },
            api: ApiConfig {
                enabled: true,
                bind_address: "0.0.0.0:8080".to_string(),
                cors_enabled: true,
                request_timeout_seconds: 30,
            },
            engine: EngineConfig {
                enabled: true,
                scan_interval_seconds: 3600,
                backoff_cap_days: 16,
                backoff_jitter: 0.2,
                default_batch_size: 10,
                default_batch_delay_ms: 1000,
            },
            gateway: GatewayConfig {
                base_url: "http://localhost:9100".to_string(),
                api_key: String::new(),
                request_timeout_seconds: 30,
            },
            notifier: NotifierConfig {
                base_url: "http://localhost:9200".to_string(),
                api_key: String::new(),
                request_timeout_seconds: 10,
            },
            subscription: SubscriptionConfig {
                base_url: "http://localhost:9300".to_string(),
                request_timeout_seconds: 10,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                log_format: "pretty".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀 DUNNING__，优先级最高；层级分隔符为
    ///    双下划线，snake_case 叶子键因此不会被误切分）
    pub fn load(config_path: Option<&str>) -> DunningResult<Self> {
        let defaults = AppConfig::default();
        let mut builder = ConfigBuilder::builder()
            .add_source(config::Config::try_from(&defaults).map_err(|e| {
                DunningError::Configuration(format!("构建默认配置失败: {e}"))
            })?);

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(DunningError::Configuration(format!(
                    "配置文件不存在: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = [
                "config/dunning.toml",
                "dunning.toml",
                "/etc/dunning/config.toml",
            ];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("DUNNING")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| DunningError::Configuration(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| DunningError::Configuration(format!("反序列化配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置有效性
    pub fn validate(&self) -> DunningResult<()> {
        if self.database.url.is_empty() {
            return Err(DunningError::Configuration(
                "database.url 不能为空".to_string(),
            ));
        }
        if self.database.max_connections < self.database.min_connections {
            return Err(DunningError::Configuration(
                "database.max_connections 不能小于 min_connections".to_string(),
            ));
        }
        if self.engine.backoff_cap_days <= 0 {
            return Err(DunningError::Configuration(
                "engine.backoff_cap_days 必须大于0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.engine.backoff_jitter) {
            return Err(DunningError::Configuration(
                "engine.backoff_jitter 必须在 [0, 1) 区间内".to_string(),
            ));
        }
        if self.engine.default_batch_size == 0 {
            return Err(DunningError::Configuration(
                "engine.default_batch_size 必须大于0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_scan_interval_means_external_trigger_only() {
        let mut config = AppConfig::default();
        config.engine.scan_interval_seconds = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_reaches_snake_case_leaf_keys() {
        std::env::set_var("DUNNING__ENGINE__BACKOFF_CAP_DAYS", "20");
        std::env::set_var("DUNNING__DATABASE__MAX_CONNECTIONS", "42");
        let config = AppConfig::load(None).unwrap();
        std::env::remove_var("DUNNING__ENGINE__BACKOFF_CAP_DAYS");
        std::env::remove_var("DUNNING__DATABASE__MAX_CONNECTIONS");

        assert_eq!(config.engine.backoff_cap_days, 20);
        assert_eq!(config.database.max_connections, 42);
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let mut config = AppConfig::default();
        config.engine.backoff_jitter = 1.5;
        assert!(config.validate().is_err());
    }
}
