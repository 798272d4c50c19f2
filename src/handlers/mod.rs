pub mod common;
pub mod inventory;
pub mod reservations;
pub mod sales;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::middleware_helpers::retry::RetryConfig;
use crate::services::{
    expiration::ExpirationService, inventory::InventoryService, reservations::ReservationService,
    sales::SaleService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub reservations: Arc<ReservationService>,
    pub sales: Arc<SaleService>,
    pub inventory: Arc<InventoryService>,
    pub expiration: Arc<ExpirationService>,
}

impl AppServices {
    /// Builds every service over one shared pool with the configured retry policy.
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig) -> Self {
        let retry = RetryConfig::from_app_config(config);
        Self {
            reservations: Arc::new(ReservationService::new(
                db_pool.clone(),
                retry.clone(),
                config.reservation_horizon(),
            )),
            sales: Arc::new(SaleService::new(db_pool.clone(), retry.clone())),
            inventory: Arc::new(InventoryService::new(db_pool.clone(), retry.clone())),
            expiration: Arc::new(ExpirationService::new(db_pool, retry)),
        }
    }
}
