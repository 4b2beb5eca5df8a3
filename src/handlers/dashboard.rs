use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;

use crate::{
    services::dashboard::{DashboardSummary, DateRange},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Default)]
pub struct DashboardQuery {
    #[serde(default)]
    pub range: DateRange,
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    Query(query): Query<DashboardQuery>,
) -> ApiResult<DashboardSummary> {
    let summary = state.services.dashboard.summary(query.range).await?;
    Ok(Json(ApiResponse::success(summary)))
}
