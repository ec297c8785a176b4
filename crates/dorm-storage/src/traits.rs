use crate::model::{
    IdentityId, IdentityRecord, RangeFilter, Reservation, ReservationId, ResourceKind, TimeWindow,
};
use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read-side reservation queries. Listings run outside any transaction and may
/// observe a slightly stale snapshot.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Reservations of `kind` admitted by `filter`, ordered by start ascending.
    async fn list_reservations(
        &self,
        kind: ResourceKind,
        filter: RangeFilter,
    ) -> StorageResult<Vec<Reservation>>;

    /// Reservations of `kind` owned by `owner`, ordered by start ascending.
    async fn list_reservations_for(
        &self,
        kind: ResourceKind,
        owner: IdentityId,
    ) -> StorageResult<Vec<Reservation>>;
}

/// Read-side identity queries.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_identity(&self, id: IdentityId) -> StorageResult<Option<IdentityRecord>>;

    /// Whether `id` owns at least one reservation of any kind.
    async fn has_active_reservations(&self, id: IdentityId) -> StorageResult<bool>;

    /// Identities whose TTL deadline is at or before `now`.
    async fn list_expired_identities(&self, now: DateTime<Utc>)
        -> StorageResult<Vec<IdentityId>>;
}

/// Reservation writes, only reachable through an open transaction.
#[async_trait]
pub trait ReservationWrites: Send {
    /// Insert a reservation unless an overlapping one of the same kind exists.
    ///
    /// Returns [`StorageError::Conflict`](crate::StorageError::Conflict) and
    /// writes nothing when the window is taken, and
    /// [`StorageError::InvalidInput`](crate::StorageError::InvalidInput) when
    /// `owner` does not exist or is deleted concurrently.
    async fn create_if_free(
        &mut self,
        kind: ResourceKind,
        owner: IdentityId,
        window: TimeWindow,
    ) -> StorageResult<ReservationId>;

    /// Delete a reservation owned by `owner`.
    ///
    /// Returns [`StorageError::NotFound`](crate::StorageError::NotFound) both
    /// when the row is missing and when it belongs to someone else.
    async fn delete_if_owner(
        &mut self,
        kind: ResourceKind,
        id: ReservationId,
        owner: IdentityId,
    ) -> StorageResult<()>;
}

/// Identity writes, only reachable through an open transaction.
#[async_trait]
pub trait IdentityWrites: Send {
    async fn create_identity(
        &mut self,
        display_name: &str,
        ttl_deadline: DateTime<Utc>,
    ) -> StorageResult<IdentityRecord>;

    /// Read an identity and hold it against concurrent writers until the
    /// transaction ends.
    async fn lock_identity(&mut self, id: IdentityId) -> StorageResult<Option<IdentityRecord>>;

    /// Transaction-consistent variant of [`IdentityStore::has_active_reservations`].
    async fn holds_reservations(&mut self, id: IdentityId) -> StorageResult<bool>;

    /// Delete an identity and its TTL marker. Returns whether a row was removed.
    async fn delete_identity(&mut self, id: IdentityId) -> StorageResult<bool>;
}

/// An open transaction. Dropping it without [`commit`](StoreTransaction::commit)
/// rolls back every write made through it.
#[async_trait]
pub trait StoreTransaction: ReservationWrites + IdentityWrites + Send {
    async fn commit(&mut self) -> StorageResult<()>;

    async fn rollback(&mut self) -> StorageResult<()>;
}

/// Source of transactions.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>>;
}

/// Unified storage bundle used by the booking and identity services.
pub trait DormStorage: ReservationStore + IdentityStore + UnitOfWork + Send + Sync {}

impl<T> DormStorage for T where T: ReservationStore + IdentityStore + UnitOfWork + Send + Sync {}
