use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::entities::{brand, device_model};
use crate::errors::ServiceError;
use crate::store::{Store, WriteBatch, WriteOp};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBrand {
    #[validate(length(min = 1, max = 100, message = "Brand name cannot be empty"))]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateDeviceModel {
    #[validate(length(min = 1, max = 100, message = "Model name cannot be empty"))]
    pub name: String,
    pub brand_id: Uuid,
}

/// Partial update of a device model; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct DeviceModelPatch {
    #[validate(length(min = 1, max = 100, message = "Model name cannot be empty"))]
    pub name: Option<String>,
    pub brand_id: Option<Uuid>,
}

fn trimmed_name(name: &str, what: &str) -> Result<String, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::ValidationError(format!("{} name cannot be blank", what)));
    }
    Ok(name.to_string())
}

/// Brands and the device models that belong to them.
#[derive(Clone)]
pub struct CatalogService {
    store: Store,
}

impl CatalogService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list_brands(&self) -> Result<Vec<brand::Model>, ServiceError> {
        self.store.brands().await
    }

    pub async fn get_brand(&self, id: Uuid) -> Result<brand::Model, ServiceError> {
        self.store
            .brand(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Brand", id))
    }

    #[instrument(skip(self))]
    pub async fn create_brand(&self, input: CreateBrand) -> Result<brand::Model, ServiceError> {
        input.validate()?;
        let name = trimmed_name(&input.name, "Brand")?;
        self.ensure_brand_name_free(&name, None).await?;

        let brand = brand::Model {
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutBrand(brand.clone()));
        self.store.commit(batch).await?;

        info!(brand_id = %brand.id, name = %brand.name, "Brand created");
        Ok(brand)
    }

    #[instrument(skip(self))]
    pub async fn rename_brand(
        &self,
        id: Uuid,
        input: CreateBrand,
    ) -> Result<brand::Model, ServiceError> {
        input.validate()?;
        let mut brand = self.get_brand(id).await?;
        let name = trimmed_name(&input.name, "Brand")?;
        self.ensure_brand_name_free(&name, Some(id)).await?;

        brand.name = name;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutBrand(brand.clone()));
        self.store.commit(batch).await?;
        Ok(brand)
    }

    /// Deletes the brand only; its device models stay and keep pointing at it.
    #[instrument(skip(self))]
    pub async fn delete_brand(&self, id: Uuid) -> Result<(), ServiceError> {
        self.get_brand(id).await?;
        let orphaned = self
            .store
            .device_models()
            .await?
            .iter()
            .filter(|m| m.brand_id == id)
            .count();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteBrand(id));
        self.store.commit(batch).await?;

        if orphaned > 0 {
            warn!(brand_id = %id, orphaned, "Brand deleted; device models left without a brand");
        } else {
            info!(brand_id = %id, "Brand deleted");
        }
        Ok(())
    }

    async fn ensure_brand_name_free(
        &self,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let taken = self
            .store
            .brands()
            .await?
            .iter()
            .any(|b| Some(b.id) != except && b.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(ServiceError::Conflict(format!("Brand '{}' already exists", name)));
        }
        Ok(())
    }

    /// All models, or those of one brand, oldest first.
    pub async fn list_models(
        &self,
        brand_id: Option<Uuid>,
    ) -> Result<Vec<device_model::Model>, ServiceError> {
        let models = self.store.device_models().await?;
        Ok(match brand_id {
            Some(brand_id) => models.into_iter().filter(|m| m.brand_id == brand_id).collect(),
            None => models,
        })
    }

    pub async fn get_model(&self, id: Uuid) -> Result<device_model::Model, ServiceError> {
        self.store
            .device_model(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Device model", id))
    }

    #[instrument(skip(self))]
    pub async fn create_model(
        &self,
        input: CreateDeviceModel,
    ) -> Result<device_model::Model, ServiceError> {
        input.validate()?;
        self.get_brand(input.brand_id).await?;
        let name = trimmed_name(&input.name, "Model")?;
        self.ensure_model_name_free(input.brand_id, &name, None).await?;

        let model = device_model::Model {
            id: Uuid::new_v4(),
            name,
            brand_id: input.brand_id,
            created_at: Utc::now(),
        };
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutDeviceModel(model.clone()));
        self.store.commit(batch).await?;

        info!(model_id = %model.id, brand_id = %model.brand_id, "Device model created");
        Ok(model)
    }

    #[instrument(skip(self))]
    pub async fn update_model(
        &self,
        id: Uuid,
        patch: DeviceModelPatch,
    ) -> Result<device_model::Model, ServiceError> {
        patch.validate()?;
        let mut model = self.get_model(id).await?;

        if let Some(brand_id) = patch.brand_id {
            self.get_brand(brand_id).await?;
            model.brand_id = brand_id;
        }
        if let Some(name) = patch.name {
            model.name = trimmed_name(&name, "Model")?;
        }
        self.ensure_model_name_free(model.brand_id, &model.name, Some(id))
            .await?;

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutDeviceModel(model.clone()));
        self.store.commit(batch).await?;
        Ok(model)
    }

    #[instrument(skip(self))]
    pub async fn delete_model(&self, id: Uuid) -> Result<(), ServiceError> {
        self.get_model(id).await?;
        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteDeviceModel(id));
        self.store.commit(batch).await?;
        info!(model_id = %id, "Device model deleted");
        Ok(())
    }

    async fn ensure_model_name_free(
        &self,
        brand_id: Uuid,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let taken = self.store.device_models().await?.iter().any(|m| {
            Some(m.id) != except && m.brand_id == brand_id && m.name.eq_ignore_ascii_case(name)
        });
        if taken {
            return Err(ServiceError::Conflict(format!(
                "Model '{}' already exists for this brand",
                name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use std::sync::Arc;

    async fn service() -> (CatalogService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(Arc::new(LocalStore::open(dir.path()).await.unwrap()));
        (CatalogService::new(store), dir)
    }

    #[tokio::test]
    async fn deleting_a_brand_orphans_its_models() {
        let (catalog, _dir) = service().await;
        let brand = catalog
            .create_brand(CreateBrand {
                name: "Huawei".into(),
            })
            .await
            .unwrap();
        let model = catalog
            .create_model(CreateDeviceModel {
                name: "P30".into(),
                brand_id: brand.id,
            })
            .await
            .unwrap();

        catalog.delete_brand(brand.id).await.unwrap();

        let models = catalog.list_models(None).await.unwrap();
        assert_eq!(models, vec![model]);
        assert!(matches!(
            catalog.get_brand(brand.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn model_requires_existing_brand() {
        let (catalog, _dir) = service().await;
        let err = catalog
            .create_model(CreateDeviceModel {
                name: "Pixel 7".into(),
                brand_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_brand_names_conflict() {
        let (catalog, _dir) = service().await;
        catalog
            .create_brand(CreateBrand {
                name: "Oppo".into(),
            })
            .await
            .unwrap();
        let err = catalog
            .create_brand(CreateBrand {
                name: " oppo ".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn model_patch_moves_between_brands() {
        let (catalog, _dir) = service().await;
        let a = catalog
            .create_brand(CreateBrand { name: "A".into() })
            .await
            .unwrap();
        let b = catalog
            .create_brand(CreateBrand { name: "B".into() })
            .await
            .unwrap();
        let model = catalog
            .create_model(CreateDeviceModel {
                name: "One".into(),
                brand_id: a.id,
            })
            .await
            .unwrap();

        let moved = catalog
            .update_model(
                model.id,
                DeviceModelPatch {
                    brand_id: Some(b.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.brand_id, b.id);
        assert_eq!(moved.name, "One");
        assert!(catalog.list_models(Some(a.id)).await.unwrap().is_empty());
        assert!(catalog
            .update_model(model.id, DeviceModelPatch {
                name: Some(String::new()),
                ..Default::default()
            })
            .await
            .is_err());
    }
}
