use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::entities::workshop_settings;
use crate::errors::ServiceError;
use crate::store::{Store, WriteBatch, WriteOp};

pub const DEFAULT_WORKSHOP_NAME: &str = "Phone Repair Workshop";
pub const DEFAULT_THANK_YOU_MESSAGE: &str = "Thank you for your trust!";

/// Partial update of the workshop settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SettingsPatch {
    #[validate(length(min = 1, max = 200, message = "Workshop name cannot be empty"))]
    pub name: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    #[validate(length(max = 50))]
    pub phone: Option<String>,
    #[validate(length(max = 1000))]
    pub thank_you_message: Option<String>,
}

/// The workshop settings singleton, created with defaults on first read.
#[derive(Clone)]
pub struct SettingsService {
    store: Store,
    init: Arc<Mutex<()>>,
}

impl SettingsService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            init: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get(&self) -> Result<workshop_settings::Model, ServiceError> {
        if let Some(settings) = self.store.settings().await? {
            return Ok(settings);
        }

        let _guard = self.init.lock().await;
        // Another caller may have created it while we waited
        if let Some(settings) = self.store.settings().await? {
            return Ok(settings);
        }

        let now = Utc::now();
        let settings = workshop_settings::Model {
            id: Uuid::new_v4(),
            name: DEFAULT_WORKSHOP_NAME.to_string(),
            address: String::new(),
            phone: String::new(),
            thank_you_message: DEFAULT_THANK_YOU_MESSAGE.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSettings(settings.clone()));
        self.store.commit(batch).await?;

        info!(settings_id = %settings.id, "Workshop settings initialised with defaults");
        Ok(settings)
    }

    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        patch: SettingsPatch,
    ) -> Result<workshop_settings::Model, ServiceError> {
        patch.validate()?;
        let mut settings = self.get().await?;
        let _guard = self.init.lock().await;

        if let Some(name) = patch.name {
            settings.name = name.trim().to_string();
        }
        if let Some(address) = patch.address {
            settings.address = address.trim().to_string();
        }
        if let Some(phone) = patch.phone {
            settings.phone = phone.trim().to_string();
        }
        if let Some(message) = patch.thank_you_message {
            settings.thank_you_message = message;
        }
        settings.updated_at = Utc::now();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutSettings(settings.clone()));
        self.store.commit(batch).await?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;

    async fn service() -> (SettingsService, Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(Arc::new(LocalStore::open(dir.path()).await.unwrap()));
        (SettingsService::new(store.clone()), store, dir)
    }

    #[tokio::test]
    async fn first_read_creates_defaults_once() {
        let (settings, store, _dir) = service().await;

        let (a, b) = tokio::join!(settings.get(), settings.get());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, b.id);
        assert_eq!(a.name, DEFAULT_WORKSHOP_NAME);
        assert_eq!(a.thank_you_message, DEFAULT_THANK_YOU_MESSAGE);
        assert!(a.address.is_empty());
        assert!(store.settings().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn patch_keeps_unset_fields() {
        let (settings, _store, _dir) = service().await;
        let updated = settings
            .update(SettingsPatch {
                phone: Some("71 000 000".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.phone, "71 000 000");
        assert_eq!(updated.name, DEFAULT_WORKSHOP_NAME);
        assert_eq!(settings.get().await.unwrap().phone, "71 000 000");
    }
}
