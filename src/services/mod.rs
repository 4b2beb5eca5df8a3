// Ledger and the catalog it depends on
pub mod catalog;
pub mod inventory;
pub mod ledger;

// Read side and workshop profile
pub mod dashboard;
pub mod settings;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::locks::KeyedLocks;
use crate::services::{
    catalog::CatalogService,
    dashboard::{CostPolicy, DashboardService},
    inventory::InventoryService,
    ledger::{LedgerSettings, RepairLedger},
    settings::SettingsService,
};
use crate::store::Store;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: CatalogService,
    pub inventory: InventoryService,
    pub ledger: RepairLedger,
    pub dashboard: DashboardService,
    pub settings: SettingsService,
}

impl AppServices {
    /// Builds every service over one store. The ledger and inventory share
    /// a lock table so stock edits and ticket mutations exclude each other.
    pub fn new(store: Store, ledger_settings: LedgerSettings, cost_policy: CostPolicy) -> Self {
        let locks = Arc::new(KeyedLocks::new(ledger_settings.lock_timeout));
        let ledger = RepairLedger::new(store.clone(), locks.clone(), ledger_settings);

        Self {
            catalog: CatalogService::new(store.clone()),
            inventory: InventoryService::new(store.clone(), locks),
            dashboard: DashboardService::new(ledger.clone(), cost_policy),
            ledger,
            settings: SettingsService::new(store),
        }
    }

    pub fn from_config(store: Store, config: &AppConfig) -> Self {
        Self::new(store, config.ledger_settings(), config.cost_policy())
    }
}
