use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use dunning_engine::AnalyticsPeriod;

use crate::{error::ApiResult, response::success, routes::AppState};

/// 扫描触发请求
#[derive(Debug, Deserialize, Default)]
pub struct ProcessRequest {
    /// 指定时只扫描该活动，否则扫描全部激活态活动
    pub campaign_id: Option<i64>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    pub period: Option<String>,
}

/// 触发一轮催缴扫描
pub async fn process_dunning(
    State(state): State<AppState>,
    Json(request): Json<ProcessRequest>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .processor
        .process(request.campaign_id, request.dry_run)
        .await?;
    Ok(success(report))
}

/// 窗口回收统计
pub async fn get_analytics(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> ApiResult<impl IntoResponse> {
    let period: AnalyticsPeriod = params.period.as_deref().unwrap_or("30d").parse()?;
    let report = state.metrics.analytics(period).await?;
    Ok(success(report))
}
