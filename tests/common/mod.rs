#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use repairdesk_api::{
    config::{AppConfig, StorageBackend},
    entities::{brand, device_model, spare_part},
    services::ledger::{NewRepairTicket, UsedPart},
    store::{open_store, Store, WriteBatch, WriteOp},
    AppState,
};

/// Which backend a test run is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Sql,
}

/// Helper harness for spinning up an application state over either backend.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new(backend: Backend) -> Self {
        Self::with_config(backend, |_| {}).await
    }

    /// Fresh state per call: a new temp directory or a new in-memory database.
    pub async fn with_config(backend: Backend, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut cfg = match backend {
            Backend::Local => AppConfig::new(
                StorageBackend::Local,
                "",
                dir.path().to_string_lossy().to_string(),
            ),
            Backend::Sql => {
                let mut cfg = AppConfig::new(StorageBackend::Database, "sqlite::memory:", "");
                cfg.auto_migrate = true;
                // One connection so every query sees the same in-memory database
                cfg.db_max_connections = 1;
                cfg.db_min_connections = 1;
                cfg
            }
        };
        cfg.environment = "test".to_string();
        cfg.cors_allow_any_origin = true;
        tweak(&mut cfg);

        let store = open_store(&cfg).await.expect("open store");
        let state = AppState::new(store, cfg);
        let router = repairdesk_api::build_router(state.clone()).expect("router");

        Self {
            router,
            state,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &Store {
        &self.state.store
    }

    /// Writes a brand and one of its models straight to the store.
    pub async fn seed_device(&self, brand_name: &str, model_name: &str) -> (Uuid, Uuid) {
        let now = Utc::now();
        let brand = brand::Model {
            id: Uuid::new_v4(),
            name: brand_name.to_string(),
            created_at: now,
        };
        let model = device_model::Model {
            id: Uuid::new_v4(),
            name: model_name.to_string(),
            brand_id: brand.id,
            created_at: now,
        };
        let mut batch = WriteBatch::new();
        batch
            .push(WriteOp::PutBrand(brand.clone()))
            .push(WriteOp::PutDeviceModel(model.clone()));
        self.store().commit(batch).await.expect("seed device");
        (brand.id, model.id)
    }

    pub async fn seed_part(
        &self,
        brand_id: Uuid,
        model_id: Uuid,
        name: &str,
        quantity: i32,
        purchase_price: Decimal,
        selling_price: Decimal,
    ) -> Uuid {
        let now = Utc::now();
        let part = spare_part::Model {
            id: Uuid::new_v4(),
            name: name.to_string(),
            part_type: "screen".to_string(),
            screen_quality: None,
            brand_id,
            model_id,
            quantity,
            purchase_price,
            selling_price,
            low_stock_alert: 1,
            created_at: now,
            updated_at: now,
        };
        let id = part.id;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSparePart(part));
        self.store().commit(batch).await.expect("seed part");
        id
    }

    pub async fn stock(&self, part_id: Uuid) -> i32 {
        self.store()
            .spare_part(part_id)
            .await
            .expect("read part")
            .expect("part exists")
            .quantity
    }

    pub fn new_ticket(&self, brand_id: Uuid, model_id: Uuid) -> NewRepairTicket {
        NewRepairTicket {
            customer_name: "Amira".to_string(),
            customer_phone: "55 123 456".to_string(),
            device_brand_id: brand_id,
            device_model_id: model_id,
            issue_type: "screen".to_string(),
            description: "cracked glass".to_string(),
            labor_cost: Decimal::from(20),
            status: None,
        }
    }

    /// Sends one request through the full router and decodes the JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}

pub fn used(spare_part_id: Uuid, quantity_used: i32) -> UsedPart {
    UsedPart {
        spare_part_id,
        quantity_used,
        price_at_time: None,
    }
}
