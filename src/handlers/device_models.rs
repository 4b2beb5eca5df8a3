use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    entities::device_model,
    errors::ServiceError,
    services::catalog::{CreateDeviceModel, DeviceModelPatch},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, Default)]
pub struct DeviceModelListQuery {
    /// Only models of this brand
    pub brand_id: Option<Uuid>,
}

pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<DeviceModelListQuery>,
) -> ApiResult<Vec<device_model::Model>> {
    let models = state.services.catalog.list_models(query.brand_id).await?;
    Ok(Json(ApiResponse::success(models)))
}

pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<device_model::Model> {
    let model = state.services.catalog.get_model(id).await?;
    Ok(Json(ApiResponse::success(model)))
}

pub async fn create_model(
    State(state): State<AppState>,
    Json(payload): Json<CreateDeviceModel>,
) -> Result<(StatusCode, Json<ApiResponse<device_model::Model>>), ServiceError> {
    let model = state.services.catalog.create_model(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(model))))
}

pub async fn update_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DeviceModelPatch>,
) -> ApiResult<device_model::Model> {
    let model = state.services.catalog.update_model(id, payload).await?;
    Ok(Json(ApiResponse::success(model)))
}

pub async fn delete_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.catalog.delete_model(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
