use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;

use crate::{
    entities::brand,
    errors::ServiceError,
    services::catalog::CreateBrand,
    ApiResponse, ApiResult, AppState,
};

pub async fn list_brands(State(state): State<AppState>) -> ApiResult<Vec<brand::Model>> {
    let brands = state.services.catalog.list_brands().await?;
    Ok(Json(ApiResponse::success(brands)))
}

pub async fn get_brand(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<brand::Model> {
    let brand = state.services.catalog.get_brand(id).await?;
    Ok(Json(ApiResponse::success(brand)))
}

pub async fn create_brand(
    State(state): State<AppState>,
    Json(payload): Json<CreateBrand>,
) -> Result<(StatusCode, Json<ApiResponse<brand::Model>>), ServiceError> {
    let brand = state.services.catalog.create_brand(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(brand))))
}

pub async fn update_brand(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateBrand>,
) -> ApiResult<brand::Model> {
    let brand = state.services.catalog.rename_brand(id, payload).await?;
    Ok(Json(ApiResponse::success(brand)))
}

pub async fn delete_brand(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.catalog.delete_brand(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
