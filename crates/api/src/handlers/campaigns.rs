use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use dunning_core::{
    models::{
        CampaignFilter, CampaignStatus, CampaignType, DunningCampaign, RetryStep,
        TriggerConditions,
    },
    DunningError,
};
use dunning_engine::CampaignMetrics;

use crate::{
    error::ApiResult,
    response::{created, success, PaginatedResponse},
    routes::AppState,
};

/// 活动创建请求
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub campaign_type: CampaignType,
    #[serde(default)]
    pub trigger_conditions: TriggerConditions,
    pub retry_schedule: Vec<RetryStep>,
    pub channel_templates: Option<serde_json::Value>,
    pub status: Option<CampaignStatus>,
    pub priority: Option<i32>,
}

/// 活动更新请求，未提供的字段保持不变
#[derive(Debug, Deserialize)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub trigger_conditions: Option<TriggerConditions>,
    pub retry_schedule: Option<Vec<RetryStep>>,
    pub channel_templates: Option<serde_json::Value>,
    pub status: Option<CampaignStatus>,
    pub priority: Option<i32>,
}

/// 活动查询参数
#[derive(Debug, Deserialize)]
pub struct CampaignQueryParams {
    pub status: Option<CampaignStatus>,
    pub campaign_type: Option<CampaignType>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CampaignDetailParams {
    pub include_metrics: Option<bool>,
}

/// 活动详情，可选附带聚合指标
#[derive(Debug, Serialize)]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: DunningCampaign,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CampaignMetrics>,
}

/// 获取活动列表
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(params): Query<CampaignQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = CampaignFilter {
        status: params.status,
        campaign_type: params.campaign_type,
        limit: None,
        offset: None,
    };
    let all = state.campaigns.list(&filter).await?;

    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(20).clamp(1, 100);
    let total = all.len() as i64;
    let items: Vec<DunningCampaign> = all
        .into_iter()
        .skip(((page - 1) * page_size) as usize)
        .take(page_size as usize)
        .collect();

    Ok(success(PaginatedResponse::new(items, total, page, page_size)))
}

/// 创建活动
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut campaign = DunningCampaign::new(
        request.name,
        request.campaign_type,
        request.trigger_conditions,
        request.retry_schedule,
    );
    if let Some(templates) = request.channel_templates {
        campaign.channel_templates = templates;
    }
    if let Some(status) = request.status {
        campaign.status = status;
    }
    if let Some(priority) = request.priority {
        campaign.priority = priority;
    }
    campaign.validate()?;

    let stored = state.campaigns.create(&campaign).await?;
    Ok(created(stored))
}

/// 获取单个活动，`include_metrics=true` 时附带聚合指标
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<CampaignDetailParams>,
) -> ApiResult<impl IntoResponse> {
    let campaign = state
        .campaigns
        .get_by_id(id)
        .await?
        .ok_or(DunningError::CampaignNotFound { id })?;

    let metrics = if params.include_metrics.unwrap_or(false) {
        Some(state.metrics.campaign_metrics(id).await?)
    } else {
        None
    };

    Ok(success(CampaignDetail { campaign, metrics }))
}

/// 更新活动
pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateCampaignRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut campaign = state
        .campaigns
        .get_by_id(id)
        .await?
        .ok_or(DunningError::CampaignNotFound { id })?;

    if let Some(name) = request.name {
        campaign.name = name;
    }
    if let Some(conditions) = request.trigger_conditions {
        campaign.trigger_conditions = conditions;
    }
    if let Some(schedule) = request.retry_schedule {
        campaign.retry_schedule = schedule;
    }
    if let Some(templates) = request.channel_templates {
        campaign.channel_templates = templates;
    }
    if let Some(status) = request.status {
        campaign.status = status;
    }
    if let Some(priority) = request.priority {
        campaign.priority = priority;
    }
    campaign.validate()?;

    state.campaigns.update(&campaign).await?;
    Ok(success(campaign))
}
