use std::sync::Arc;

use anyhow::{Context, Result};
use dunning_api::{create_app, routes::AppState};
use dunning_core::config::AppConfig;
use dunning_engine::{
    BackoffPolicy, BulkOrchestrator, DunningProcessor, MetricsAggregator, StepExecutor,
};
use dunning_infrastructure::{
    create_pool, HttpPaymentGateway, HttpSubscriptionService, PostgresAuditSink,
    PostgresCampaignRepository, PostgresFailedPaymentRepository, WebhookNotificationDispatcher,
};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info};

/// 主应用程序
///
/// 装配顺序：数据库连接池 → 仓储 → 外部服务适配器 → 引擎组件 →
/// HTTP状态。扫描循环与API服务器各自订阅关闭信号。
pub struct Application {
    config: AppConfig,
    state: AppState,
    processor: Arc<DunningProcessor>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化催缴系统");

        let pool = create_pool(&config.database)
            .await
            .context("创建数据库连接池失败")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("运行数据库迁移失败")?;
        info!("数据库连接成功");

        let campaigns = Arc::new(PostgresCampaignRepository::new(pool.clone()));
        let payments = Arc::new(PostgresFailedPaymentRepository::new(pool.clone()));
        let audit = Arc::new(PostgresAuditSink::new(pool));

        let gateway =
            Arc::new(HttpPaymentGateway::new(&config.gateway).context("创建支付网关适配器失败")?);
        let notifier = Arc::new(
            WebhookNotificationDispatcher::new(&config.notifier)
                .context("创建通知分发适配器失败")?,
        );
        let subscriptions = Arc::new(
            HttpSubscriptionService::new(&config.subscription).context("创建订阅服务适配器失败")?,
        );

        let backoff = BackoffPolicy::new(config.engine.backoff_cap_days, config.engine.backoff_jitter);
        let executor = Arc::new(StepExecutor::new(
            payments.clone(),
            gateway.clone(),
            notifier,
            subscriptions.clone(),
            audit.clone(),
            backoff,
        ));
        let processor = Arc::new(DunningProcessor::new(
            campaigns.clone(),
            payments.clone(),
            executor.clone(),
        ));
        let bulk = Arc::new(BulkOrchestrator::new(
            executor,
            payments.clone(),
            gateway,
            subscriptions,
            audit.clone(),
        ));
        let metrics = Arc::new(MetricsAggregator::new(campaigns.clone(), payments.clone()));

        let state = AppState {
            campaigns,
            payments,
            audit,
            processor: processor.clone(),
            bulk,
            metrics,
            default_batch_size: config.engine.default_batch_size,
            default_batch_delay_ms: config.engine.default_batch_delay_ms,
        };

        Ok(Self {
            config,
            state,
            processor,
        })
    }

    /// 运行应用程序
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut handles = Vec::new();

        // 进程内周期扫描，interval 为 0 时仅由HTTP接口触发
        if self.config.engine.enabled && self.config.engine.scan_interval_seconds > 0 {
            let processor = Arc::clone(&self.processor);
            let interval = self.config.engine.scan_interval_seconds;
            let scan_shutdown_rx = shutdown_rx.resubscribe();

            handles.push(tokio::spawn(async move {
                run_scan_loop(processor, interval, scan_shutdown_rx).await;
            }));
        } else {
            info!("进程内扫描已禁用，催缴扫描仅由HTTP接口触发");
        }

        if self.config.api.enabled {
            let state = self.state.clone();
            let bind_address = self.config.api.bind_address.clone();
            let api_shutdown_rx = shutdown_rx.resubscribe();

            handles.push(tokio::spawn(async move {
                if let Err(e) = run_api_server(state, bind_address, api_shutdown_rx).await {
                    error!("API服务器运行失败: {e}");
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("所有组件已停止");
        Ok(())
    }
}

/// 周期扫描循环
async fn run_scan_loop(
    processor: Arc<DunningProcessor>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));
    info!("启动催缴扫描循环，周期 {interval_seconds} 秒");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match processor.process(None, false).await {
                    Ok(report) => {
                        info!("周期扫描完成，执行 {} 个动作", report.total_executed());
                    }
                    Err(e) => {
                        error!("周期扫描失败: {e}");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("扫描循环收到关闭信号");
                break;
            }
        }
    }
}

/// 运行API服务器
async fn run_api_server(
    state: AppState,
    bind_address: String,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = create_app(state);
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("绑定地址失败: {bind_address}"))?;

    info!("API服务器启动在 http://{bind_address}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("API服务器收到关闭信号");
        })
        .await
        .context("API服务器运行失败")?;

    info!("API服务器已停止");
    Ok(())
}
