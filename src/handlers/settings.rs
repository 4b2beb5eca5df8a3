use axum::{extract::State, response::Json};

use crate::{
    entities::workshop_settings, services::settings::SettingsPatch, ApiResponse, ApiResult,
    AppState,
};

pub async fn get_settings(State(state): State<AppState>) -> ApiResult<workshop_settings::Model> {
    let settings = state.services.settings.get().await?;
    Ok(Json(ApiResponse::success(settings)))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(payload): Json<SettingsPatch>,
) -> ApiResult<workshop_settings::Model> {
    let settings = state.services.settings.update(payload).await?;
    Ok(Json(ApiResponse::success(settings)))
}
