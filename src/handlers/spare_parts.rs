use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    entities::spare_part,
    errors::ServiceError,
    services::inventory::{CreateSparePart, SparePartPatch, StockAdjustment},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Default)]
pub struct SparePartListQuery {
    pub brand_id: Option<Uuid>,
    pub model_id: Option<Uuid>,
    /// Case-insensitive match on name or part type
    pub search: Option<String>,
}

impl SparePartListQuery {
    fn matches(&self, part: &spare_part::Model) -> bool {
        if self.brand_id.is_some_and(|id| id != part.brand_id) {
            return false;
        }
        if self.model_id.is_some_and(|id| id != part.model_id) {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(term) => {
                let term = term.to_lowercase();
                part.name.to_lowercase().contains(&term)
                    || part.part_type.to_lowercase().contains(&term)
            }
            None => true,
        }
    }
}

pub async fn list_spare_parts(
    State(state): State<AppState>,
    Query(query): Query<SparePartListQuery>,
) -> ApiResult<Vec<spare_part::Model>> {
    let parts = state
        .services
        .inventory
        .list_parts()
        .await?
        .into_iter()
        .filter(|part| query.matches(part))
        .collect();
    Ok(Json(ApiResponse::success(parts)))
}

pub async fn low_stock_spare_parts(
    State(state): State<AppState>,
) -> ApiResult<Vec<spare_part::Model>> {
    let parts = state.services.inventory.low_stock().await?;
    Ok(Json(ApiResponse::success(parts)))
}

pub async fn get_spare_part(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<spare_part::Model> {
    let part = state.services.inventory.get_part(id).await?;
    Ok(Json(ApiResponse::success(part)))
}

pub async fn create_spare_part(
    State(state): State<AppState>,
    Json(payload): Json<CreateSparePart>,
) -> Result<(StatusCode, Json<ApiResponse<spare_part::Model>>), ServiceError> {
    let part = state.services.inventory.create_part(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(part))))
}

pub async fn update_spare_part(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SparePartPatch>,
) -> ApiResult<spare_part::Model> {
    let part = state.services.inventory.update_part(id, payload).await?;
    Ok(Json(ApiResponse::success(part)))
}

pub async fn adjust_spare_part_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StockAdjustment>,
) -> ApiResult<spare_part::Model> {
    let part = state.services.inventory.adjust_stock(id, payload).await?;
    Ok(Json(ApiResponse::success(part)))
}

pub async fn delete_spare_part(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.inventory.delete_part(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
