use std::sync::Arc;

use metrics::counter;
use sea_orm::DatabaseConnection;
use tracing::{info, instrument};

use crate::auth::AuthUser;
use crate::db::with_retrying_transaction;
use crate::entities::stock_movement::MovementKind;
use crate::errors::ServiceError;
use crate::middleware_helpers::retry::RetryConfig;
use crate::services::ledger::{self, MovementFilter, MovementView};
use crate::services::stock::{self, AdjustmentOutcome, Availability, LedgerNote, StockRef};

/// Manual stock correction entered by staff.
#[derive(Debug, Clone)]
pub struct NewAdjustment {
    pub target: StockRef,
    pub kind: MovementKind,
    pub quantity: i32,
    pub reference: Option<String>,
    pub description: Option<String>,
}

/// Staff-facing stock maintenance: counts, receipts, corrections and the ledger.
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    retry: RetryConfig,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, retry: RetryConfig) -> Self {
        Self { db, retry }
    }

    /// Applies `kind.signed_delta(quantity)` to on-hand and ledgers it.
    /// Quantities whose delta does not fit the counters are a validation error.
    #[instrument(skip(self, input), fields(actor_id = actor.user_id, target = %input.target, kind = %input.kind))]
    pub async fn adjust(&self, actor: &AuthUser, input: NewAdjustment) -> Result<AdjustmentOutcome, ServiceError> {
        if !actor.is_staff() {
            return Err(ServiceError::Forbidden("only staff can adjust stock".into()));
        }
        let delta = input.kind.signed_delta(input.quantity).ok_or_else(|| {
            ServiceError::ValidationError(format!("adjustment quantity {} is out of range", input.quantity))
        })?;
        if delta == 0 {
            return Err(ServiceError::ValidationError(
                "adjustment quantity must not be zero".into(),
            ));
        }

        let actor_id = actor.user_id;
        let outcome = with_retrying_transaction(&self.db, &self.retry, move |txn| {
            let note = LedgerNote {
                actor_id,
                kind: input.kind,
                reference: input.reference.clone(),
                description: input.description.clone(),
            };
            let target = input.target;
            Box::pin(async move { stock::adjust(txn, target, delta, note).await })
        })
        .await?;

        counter!("ortomediq.inventory.adjustments", 1);
        info!(
            previous = outcome.previous_on_hand,
            new = outcome.new_on_hand,
            "Stock adjusted"
        );
        Ok(outcome)
    }

    pub async fn availability(&self, target: StockRef) -> Result<Availability, ServiceError> {
        stock::availability(&*self.db, target).await
    }

    pub async fn movements(&self, filter: &MovementFilter) -> Result<Vec<MovementView>, ServiceError> {
        ledger::list(&*self.db, filter).await
    }
}
