//! Periodic expiration of overdue reservations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::db::with_retrying_transaction;
use crate::entities::reservation::{self, Entity as ReservationEntity, ReservationStatus};
use crate::errors::ServiceError;
use crate::middleware_helpers::retry::RetryConfig;
use crate::services::reservations::{close_if_active, release_lines};

#[derive(Clone)]
pub struct ExpirationService {
    db: Arc<DatabaseConnection>,
    retry: RetryConfig,
}

impl ExpirationService {
    pub fn new(db: Arc<DatabaseConnection>, retry: RetryConfig) -> Self {
        Self { db, retry }
    }

    pub async fn sweep(&self) -> Result<u64, ServiceError> {
        self.sweep_at(Utc::now()).await
    }

    /// Expires every active reservation whose deadline is before `now` and
    /// returns how many this sweep expired.
    ///
    /// Each reservation is handled in its own unit. One that was canceled,
    /// converted or expired by someone else in the meantime is skipped
    /// without releasing anything; a failure on one is logged and the sweep
    /// moves on.
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let overdue: Vec<(i32, String)> = ReservationEntity::find()
            .select_only()
            .column(reservation::Column::Id)
            .column(reservation::Column::Code)
            .filter(reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(reservation::Column::ExpiresAt.lt(now))
            .order_by_asc(reservation::Column::ExpiresAt)
            .into_tuple()
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut expired = 0u64;
        for (reservation_id, code) in overdue {
            let outcome = with_retrying_transaction(&self.db, &self.retry, move |txn| {
                Box::pin(async move {
                    if !close_if_active(txn, reservation_id, ReservationStatus::Expired).await? {
                        return Ok(false);
                    }
                    release_lines(txn, reservation_id).await?;
                    Ok(true)
                })
            })
            .await;

            match outcome {
                Ok(true) => {
                    expired += 1;
                    info!(reservation_id, code = %code, "Reservation expired");
                }
                Ok(false) => {
                    debug!(reservation_id, code = %code, "Reservation left active state before expiry; skipped");
                }
                Err(e) => {
                    error!(reservation_id, code = %code, error = %e, "Failed to expire reservation");
                }
            }
        }

        if expired > 0 {
            counter!("reservations_expired_total", expired);
        }
        Ok(expired)
    }
}

/// Runs [`ExpirationService::sweep`] every `interval` until `shutdown`
/// flips to `true` (or its sender is dropped). A sweep already running when
/// shutdown is signalled is allowed to finish.
pub fn spawn_scheduler(
    service: Arc<ExpirationService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "Expiration scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let span = info_span!("expiration_sweep");
                    match service.sweep().instrument(span).await {
                        Ok(0) => debug!("Expiration sweep found nothing to expire"),
                        Ok(count) => info!(count, "Expiration sweep finished"),
                        Err(e) => warn!(error = %e, "Expiration sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiration scheduler stopped");
    })
}
