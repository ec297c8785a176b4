//! In-memory reference implementation of the storage traits.
//!
//! Transactions take an owned lock on the whole state and work on a staged
//! copy, so they are serializable: two overlapping `create_if_free` calls can
//! never both observe a free slot. Production deployments should use the
//! PostgreSQL adapter.

use crate::model::{
    IdentityId, IdentityRecord, RangeFilter, Reservation, ReservationId, ResourceKind, TimeWindow,
};
use crate::traits::{
    IdentityStore, IdentityWrites, ReservationStore, ReservationWrites, StoreTransaction,
    UnitOfWork,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    identities: BTreeMap<IdentityId, IdentityRecord>,
    reservations: BTreeMap<ResourceKind, BTreeMap<ReservationId, Reservation>>,
    next_identity_id: i64,
    next_reservation_id: i64,
}

impl MemoryState {
    fn sorted(mut values: Vec<Reservation>) -> Vec<Reservation> {
        values.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        values
    }

    fn list(&self, kind: ResourceKind, filter: RangeFilter) -> Vec<Reservation> {
        let values = self
            .reservations
            .get(&kind)
            .map(|rows| {
                rows.values()
                    .filter(|r| filter.admits(&r.window()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Self::sorted(values)
    }

    fn list_for(&self, kind: ResourceKind, owner: IdentityId) -> Vec<Reservation> {
        let values = self
            .reservations
            .get(&kind)
            .map(|rows| rows.values().filter(|r| r.owner == owner).cloned().collect())
            .unwrap_or_default();
        Self::sorted(values)
    }

    fn holds_reservations(&self, id: IdentityId) -> bool {
        self.reservations
            .values()
            .any(|rows| rows.values().any(|r| r.owner == id))
    }
}

/// In-memory storage adapter.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDormStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryDormStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationStore for InMemoryDormStorage {
    async fn list_reservations(
        &self,
        kind: ResourceKind,
        filter: RangeFilter,
    ) -> StorageResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.list(kind, filter))
    }

    async fn list_reservations_for(
        &self,
        kind: ResourceKind,
        owner: IdentityId,
    ) -> StorageResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        Ok(state.list_for(kind, owner))
    }
}

#[async_trait]
impl IdentityStore for InMemoryDormStorage {
    async fn get_identity(&self, id: IdentityId) -> StorageResult<Option<IdentityRecord>> {
        let state = self.state.lock().await;
        Ok(state.identities.get(&id).cloned())
    }

    async fn has_active_reservations(&self, id: IdentityId) -> StorageResult<bool> {
        let state = self.state.lock().await;
        Ok(state.holds_reservations(id))
    }

    async fn list_expired_identities(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<IdentityId>> {
        let state = self.state.lock().await;
        Ok(state
            .identities
            .values()
            .filter(|record| record.is_expired_at(now))
            .map(|record| record.id)
            .collect())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryDormStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            staged,
        }))
    }
}

/// Transaction over [`InMemoryDormStorage`]. Writes land in `staged` and are
/// published on commit; dropping the transaction discards them.
struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    staged: MemoryState,
}

impl MemoryTransaction {
    fn state(&mut self) -> StorageResult<&mut MemoryState> {
        if self.guard.is_none() {
            return Err(StorageError::Backend(
                "transaction already finished".to_string(),
            ));
        }
        Ok(&mut self.staged)
    }
}

#[async_trait]
impl ReservationWrites for MemoryTransaction {
    async fn create_if_free(
        &mut self,
        kind: ResourceKind,
        owner: IdentityId,
        window: TimeWindow,
    ) -> StorageResult<ReservationId> {
        let state = self.state()?;
        if !state.identities.contains_key(&owner) {
            return Err(StorageError::InvalidInput(format!(
                "identity {owner} does not exist"
            )));
        }

        let rows = state.reservations.entry(kind).or_default();
        let overlapping = rows.values().filter(|r| r.window().overlaps(&window)).count();
        if overlapping > 0 {
            return Err(StorageError::Conflict(format!(
                "{kind} slot {} - {} is already booked",
                window.start, window.end
            )));
        }

        state.next_reservation_id += 1;
        let id = ReservationId(state.next_reservation_id);
        state.reservations.entry(kind).or_default().insert(
            id,
            Reservation {
                id,
                kind,
                owner,
                start: window.start,
                end: window.end,
            },
        );
        Ok(id)
    }

    async fn delete_if_owner(
        &mut self,
        kind: ResourceKind,
        id: ReservationId,
        owner: IdentityId,
    ) -> StorageResult<()> {
        let state = self.state()?;
        let rows = state.reservations.entry(kind).or_default();
        match rows.get(&id) {
            Some(reservation) if reservation.owner == owner => {
                rows.remove(&id);
                Ok(())
            }
            _ => Err(StorageError::NotFound(format!(
                "{kind} reservation {id} not found or not owned by caller"
            ))),
        }
    }
}

#[async_trait]
impl IdentityWrites for MemoryTransaction {
    async fn create_identity(
        &mut self,
        display_name: &str,
        ttl_deadline: DateTime<Utc>,
    ) -> StorageResult<IdentityRecord> {
        let state = self.state()?;
        state.next_identity_id += 1;
        let record = IdentityRecord {
            id: IdentityId(state.next_identity_id),
            display_name: display_name.to_string(),
            ttl_deadline,
        };
        state.identities.insert(record.id, record.clone());
        Ok(record)
    }

    async fn lock_identity(&mut self, id: IdentityId) -> StorageResult<Option<IdentityRecord>> {
        let state = self.state()?;
        Ok(state.identities.get(&id).cloned())
    }

    async fn holds_reservations(&mut self, id: IdentityId) -> StorageResult<bool> {
        let state = self.state()?;
        Ok(state.holds_reservations(id))
    }

    async fn delete_identity(&mut self, id: IdentityId) -> StorageResult<bool> {
        let state = self.state()?;
        let removed = state.identities.remove(&id).is_some();
        if removed {
            // Mirrors ON DELETE CASCADE on the relational schema.
            for rows in state.reservations.values_mut() {
                rows.retain(|_, r| r.owner != id);
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(&mut self) -> StorageResult<()> {
        let mut guard = self.guard.take().ok_or_else(|| {
            StorageError::Backend("transaction already finished".to_string())
        })?;
        *guard = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.guard.take();
        self.staged = MemoryState::default();
        Ok(())
    }
}
