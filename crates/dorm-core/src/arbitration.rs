//! Reservation arbitration.
//!
//! The service is the only writer of reservation rows. It validates the
//! requested interval against the kind's ceiling, then hands the
//! count-then-insert to the store inside one unit of work so that two
//! overlapping requests can never both commit.

use crate::error::{DormError, DormResult};
use crate::unit_of_work::transact;
use chrono::{DateTime, Duration, Utc};
use dorm_storage::{
    DormStorage, IdentityId, RangeFilter, Reservation, ReservationId, ReservationStore,
    ReservationWrites, ResourceKind, StorageError, TimeWindow,
};
use std::sync::Arc;

/// Longest bookable interval per resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationPolicy {
    pub laundry_max: Duration,
    pub kitchen_max: Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            laundry_max: ResourceKind::Laundry.default_ceiling(),
            kitchen_max: ResourceKind::Kitchen.default_ceiling(),
        }
    }
}

impl ReservationPolicy {
    pub fn ceiling(&self, kind: ResourceKind) -> Duration {
        match kind {
            ResourceKind::Laundry => self.laundry_max,
            ResourceKind::Kitchen => self.kitchen_max,
        }
    }
}

pub struct ReservationService {
    store: Arc<dyn DormStorage>,
    policy: ReservationPolicy,
}

impl ReservationService {
    pub fn new(store: Arc<dyn DormStorage>, policy: ReservationPolicy) -> Self {
        Self { store, policy }
    }

    /// Book `[start, end)` of `kind` for `owner`.
    ///
    /// Fails with [`DormError::InvalidInterval`] before touching the store
    /// when the interval is empty, reversed or longer than the ceiling, and
    /// with [`DormError::SlotConflict`] when any reservation of the same kind
    /// overlaps it.
    pub async fn create(
        &self,
        kind: ResourceKind,
        owner: IdentityId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DormResult<ReservationId> {
        let window = self.validate(kind, start, end)?;

        let id = transact(&*self.store, "create_reservation", move |tx| {
            Box::pin(async move {
                tx.create_if_free(kind, owner, window)
                    .await
                    .map_err(|err| match err {
                        StorageError::Conflict(msg) => DormError::SlotConflict(msg),
                        StorageError::InvalidInput(_) => DormError::UnknownIdentity(owner),
                        other => DormError::store("create_reservation", other),
                    })
            })
        })
        .await?;

        tracing::info!(
            kind = %kind,
            reservation_id = %id,
            owner = %owner,
            start = %start,
            end = %end,
            "reservation created"
        );
        Ok(id)
    }

    /// Reservations with `start >= from` and `end <= to`, either bound
    /// optional, ordered by start.
    pub async fn list_by_range(
        &self,
        kind: ResourceKind,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> DormResult<Vec<Reservation>> {
        self.store
            .list_reservations(kind, RangeFilter::new(from, to))
            .await
            .map_err(|e| DormError::store("list_reservations", e))
    }

    pub async fn list_by_identity(
        &self,
        kind: ResourceKind,
        owner: IdentityId,
    ) -> DormResult<Vec<Reservation>> {
        self.store
            .list_reservations_for(kind, owner)
            .await
            .map_err(|e| DormError::store("list_own_reservations", e))
    }

    /// Delete a reservation owned by `owner`. Missing and foreign
    /// reservations are reported identically.
    pub async fn delete(
        &self,
        kind: ResourceKind,
        id: ReservationId,
        owner: IdentityId,
    ) -> DormResult<()> {
        transact(&*self.store, "delete_reservation", move |tx| {
            Box::pin(async move {
                tx.delete_if_owner(kind, id, owner)
                    .await
                    .map_err(|err| match err {
                        StorageError::NotFound(_) => DormError::NotFoundOrNotOwner,
                        other => DormError::store("delete_reservation", other),
                    })
            })
        })
        .await?;

        tracing::info!(kind = %kind, reservation_id = %id, owner = %owner, "reservation deleted");
        Ok(())
    }

    fn validate(
        &self,
        kind: ResourceKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> DormResult<TimeWindow> {
        if end <= start {
            return Err(DormError::InvalidInterval(
                "end must be after start".to_string(),
            ));
        }
        let window = TimeWindow::new(start, end);
        let ceiling = self.policy.ceiling(kind);
        if window.duration() > ceiling {
            return Err(DormError::InvalidInterval(format!(
                "{kind} reservations are limited to {} minutes",
                ceiling.num_minutes()
            )));
        }
        Ok(window)
    }
}
