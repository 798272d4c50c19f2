/*!
 * Transactional units of work
 *
 * Every stock mutation runs inside one database transaction. Transient
 * storage failures (deadlock, lock wait timeout, busy database) roll the unit
 * back and run it again from scratch, up to the configured attempt count.
 */

use crate::errors::ServiceError;
use crate::middleware_helpers::retry::{with_retry, RetryConfig, TransientStoragePolicy};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs `f` inside a transaction: commit on `Ok`, rollback on `Err`.
///
/// ```rust,ignore
/// let code = with_transaction(&db, |txn| {
///     Box::pin(async move {
///         stock::reserve(txn, StockRef::Product(1), 2).await?;
///         Ok(())
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T>(db: &DatabaseConnection, f: F) -> Result<T, ServiceError>
where
    F: for<'a> FnOnce(&'a DatabaseTransaction) -> BoxFuture<'a, Result<T, ServiceError>>,
{
    let txn = db.begin().await.map_err(ServiceError::db_error)?;
    match f(&txn).await {
        Ok(value) => {
            txn.commit().await.map_err(ServiceError::db_error)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}

/// Like [`with_transaction`], but re-runs the whole unit when it fails with a
/// transient storage error. The closure must therefore be repeatable: clone
/// owned inputs into each attempt.
pub async fn with_retrying_transaction<F, T>(
    db: &DatabaseConnection,
    retry: &RetryConfig,
    f: F,
) -> Result<T, ServiceError>
where
    F: for<'a> Fn(&'a DatabaseTransaction) -> BoxFuture<'a, Result<T, ServiceError>>,
{
    let f = &f;
    with_retry(retry, TransientStoragePolicy, move || async move {
        with_transaction(db, f).await
    })
    .await
    .map_err(|err| match err {
        // Still failing after every attempt: surface as transient, never as a generic DB error
        ServiceError::DatabaseError(db_err) => ServiceError::db_error(db_err),
        other => other,
    })
}
