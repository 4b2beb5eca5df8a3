//! RepairDesk API Library
//!
//! Brands, spare-parts inventory, inventory-aware repair tickets and the
//! workshop profile, served over one storage backend chosen at startup.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod locks;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod store;
pub mod tracing;

use axum::{
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use http::HeaderValue;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::ReadModelCache;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::services::AppServices;
use crate::store::Store;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub services: AppServices,
    pub cache: Arc<ReadModelCache>,
    pub config: AppConfig,
}

impl AppState {
    /// Wires services and the read-model cache over `store`. The cache is
    /// not synchronised until [`ReadModelCache::spawn_sync`] is called.
    pub fn new(store: Store, config: AppConfig) -> Self {
        Self {
            services: AppServices::from_config(store.clone(), &config),
            cache: ReadModelCache::new(store.clone()),
            store,
            config,
        }
    }
}

// Common response wrappers
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let catalog = Router::new()
        .route(
            "/brands",
            get(handlers::brands::list_brands).post(handlers::brands::create_brand),
        )
        .route(
            "/brands/:id",
            get(handlers::brands::get_brand)
                .put(handlers::brands::update_brand)
                .delete(handlers::brands::delete_brand),
        )
        .route(
            "/models",
            get(handlers::device_models::list_models).post(handlers::device_models::create_model),
        )
        .route(
            "/models/:id",
            get(handlers::device_models::get_model)
                .put(handlers::device_models::update_model)
                .delete(handlers::device_models::delete_model),
        );

    let inventory = Router::new()
        .route(
            "/spare-parts",
            get(handlers::spare_parts::list_spare_parts)
                .post(handlers::spare_parts::create_spare_part),
        )
        .route(
            "/spare-parts/low-stock",
            get(handlers::spare_parts::low_stock_spare_parts),
        )
        .route(
            "/spare-parts/:id",
            get(handlers::spare_parts::get_spare_part)
                .put(handlers::spare_parts::update_spare_part)
                .delete(handlers::spare_parts::delete_spare_part),
        )
        .route(
            "/spare-parts/:id/adjust",
            post(handlers::spare_parts::adjust_spare_part_stock),
        );

    let repairs = Router::new()
        .route(
            "/repairs",
            get(handlers::repairs::list_repairs).post(handlers::repairs::create_repair),
        )
        .route(
            "/repairs/:id",
            get(handlers::repairs::get_repair).delete(handlers::repairs::delete_repair),
        )
        .route(
            "/repairs/:id/status",
            put(handlers::repairs::update_repair_status),
        )
        .route("/repairs/:id/parts", put(handlers::repairs::update_repair_parts));

    let workshop = Router::new()
        .route(
            "/settings",
            get(handlers::settings::get_settings).put(handlers::settings::update_settings),
        )
        .route("/dashboard", get(handlers::dashboard::get_dashboard));

    Router::new()
        .merge(catalog)
        .merge(inventory)
        .merge(repairs)
        .merge(workshop)
}

/// CORS from config: explicit origins win, permissive only where allowed.
pub fn cors_layer(config: &AppConfig) -> Result<CorsLayer, ServiceError> {
    let configured_origins: Option<Vec<HeaderValue>> = config
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if config.should_allow_permissive_cors() {
        Ok(CorsLayer::permissive())
    } else {
        Err(ServiceError::ValidationError(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
                .to_string(),
        ))
    }
}

/// Full application router: health, the v1 API and the shared HTTP layers.
pub fn build_router(state: AppState) -> Result<Router, ServiceError> {
    let cors = cors_layer(&state.config)?;

    Ok(Router::<AppState>::new()
        .route("/", get(|| async { "repairdesk-api up" }))
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(cors)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state))
}
