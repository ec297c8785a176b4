//! Run a body inside one store transaction.

use crate::error::{DormError, DormResult};
use dorm_storage::{StoreTransaction, UnitOfWork};
use futures::future::BoxFuture;

/// Begin a transaction, run `body`, commit on `Ok` and roll back on `Err`.
///
/// If the returned future is dropped mid-flight, or `body` panics, the
/// transaction guard is dropped and the backend rolls back on its own.
pub async fn transact<U, T, F>(uow: &U, operation: &'static str, body: F) -> DormResult<T>
where
    U: UnitOfWork + ?Sized,
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> BoxFuture<'t, DormResult<T>> + Send,
{
    let mut tx = uow
        .begin()
        .await
        .map_err(|e| DormError::store(operation, e))?;

    match body(tx.as_mut()).await {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DormError::store(operation, e))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(
                    operation,
                    error = %rollback_err,
                    "rollback failed after aborted unit of work"
                );
            }
            Err(err)
        }
    }
}
