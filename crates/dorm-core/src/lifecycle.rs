//! Ephemeral identity lifecycle.
//!
//! Callers never register. [`IdentityLifecycle::resolve`] turns whatever
//! credential the caller presented (possibly none) into a usable identity,
//! and [`IdentityLifecycle::reclaim_expired`] is the background sweep that
//! removes identities whose TTL has lapsed.
//!
//! Decision procedure, first match wins:
//!
//! 1. no credential: provision a new identity
//! 2. credential fails verification: provision a new identity
//! 3. identity TTL not elapsed: reuse identity and credential
//! 4. TTL elapsed but the identity holds a reservation: reuse
//! 5. TTL elapsed, no reservation: delete and provision in one transaction
//!
//! A verified credential whose identity row is gone provisions anew.

use crate::clock::Clock;
use crate::credential::{Claims, CredentialCodec};
use crate::error::{DormError, DormResult};
use crate::unit_of_work::transact;
use chrono::{DateTime, Duration, Utc};
use dorm_storage::{DormStorage, IdentityId, IdentityRecord, IdentityStore, IdentityWrites};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Identity lifetime and sweep behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityPolicy {
    pub identity_ttl: Duration,
    /// When set, the sweep leaves expired identities that still own a
    /// reservation in place, matching decision state 4.
    pub sweep_protects_reservation_holders: bool,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            identity_ttl: Duration::days(7),
            sweep_protects_reservation_holders: true,
        }
    }
}

/// Which branch of the decision procedure produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// No credential was presented.
    Provisioned,
    /// The credential did not verify.
    ReplacedInvalidCredential,
    /// Identity still within its TTL.
    Reused,
    /// Identity expired but kept alive by a reservation.
    RetainedForReservations,
    /// Expired identity deleted and a fresh one issued.
    Replaced,
    /// Credential verified but its identity no longer exists.
    ReplacedMissing,
}

impl ResolveOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioned => "provisioned",
            Self::ReplacedInvalidCredential => "replaced_invalid_credential",
            Self::Reused => "reused",
            Self::RetainedForReservations => "retained_for_reservations",
            Self::Replaced => "replaced",
            Self::ReplacedMissing => "replaced_missing",
        }
    }

    /// Whether the caller keeps the credential it presented.
    pub fn is_reuse(&self) -> bool {
        matches!(self, Self::Reused | Self::RetainedForReservations)
    }
}

impl fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub identity_id: IdentityId,
    pub display_name: String,
    pub credential: String,
    pub outcome: ResolveOutcome,
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub reclaimed: usize,
    pub retained: usize,
    pub failed: usize,
}

enum SweepAction {
    Reclaimed,
    Retained,
    Gone,
}

pub struct IdentityLifecycle {
    store: Arc<dyn DormStorage>,
    codec: Arc<CredentialCodec>,
    clock: Arc<dyn Clock>,
    policy: IdentityPolicy,
}

impl IdentityLifecycle {
    pub fn new(
        store: Arc<dyn DormStorage>,
        codec: Arc<CredentialCodec>,
        clock: Arc<dyn Clock>,
        policy: IdentityPolicy,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            policy,
        }
    }

    /// Verify a credential against the current time without touching the
    /// store.
    pub fn authenticate(&self, token: &str) -> DormResult<Claims> {
        self.codec.verify(token, self.clock.now())
    }

    /// Turn an optional bearer credential into an identity.
    ///
    /// Verification failures are never surfaced; only store failures are.
    pub async fn resolve(&self, credential: Option<&str>) -> DormResult<ResolvedIdentity> {
        let now = self.clock.now();

        let Some(token) = credential.map(str::trim).filter(|t| !t.is_empty()) else {
            tracing::debug!("no credential presented");
            return self
                .provision_at(None, now, ResolveOutcome::Provisioned)
                .await;
        };

        let claims = match self.codec.verify(token, now) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(reason = %err, "credential rejected, provisioning new identity");
                return self
                    .provision_at(None, now, ResolveOutcome::ReplacedInvalidCredential)
                    .await;
            }
        };

        let identity = claims.identity();
        let record = self
            .store
            .get_identity(identity)
            .await
            .map_err(|e| DormError::store("resolve_identity", e))?;

        let Some(record) = record else {
            tracing::debug!(identity_id = %identity, "credential references a missing identity");
            return self
                .provision_at(None, now, ResolveOutcome::ReplacedMissing)
                .await;
        };

        if !record.is_expired_at(now) {
            tracing::debug!(identity_id = %identity, "identity within ttl");
            return Ok(reuse(record, token, ResolveOutcome::Reused));
        }

        let holds = self
            .store
            .has_active_reservations(identity)
            .await
            .map_err(|e| DormError::store("resolve_identity", e))?;
        if holds {
            tracing::debug!(identity_id = %identity, "expired identity retained for reservations");
            return Ok(reuse(record, token, ResolveOutcome::RetainedForReservations));
        }

        self.replace(identity, token, now).await
    }

    /// Provision an identity, with `display_name` or a generated one when
    /// absent or blank.
    pub async fn provision(&self, display_name: Option<&str>) -> DormResult<ResolvedIdentity> {
        let now = self.clock.now();
        self.provision_at(display_name, now, ResolveOutcome::Provisioned)
            .await
    }

    /// Delete identities whose TTL deadline is at or before now, each in its
    /// own transaction. Individual failures are logged and skipped.
    pub async fn reclaim_expired(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let expired = match self.store.list_expired_identities(now).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::error!(error = %err, "failed to list expired identities");
                return report;
            }
        };

        let protect = self.policy.sweep_protects_reservation_holders;
        for id in expired {
            report.examined += 1;

            let result = transact(&*self.store, "reclaim_identity", move |tx| {
                Box::pin(async move {
                    let locked = tx
                        .lock_identity(id)
                        .await
                        .map_err(|e| DormError::store("reclaim_identity", e))?;
                    match locked {
                        Some(record) if record.is_expired_at(now) => {}
                        _ => return Ok(SweepAction::Gone),
                    }

                    if protect {
                        let holds = tx
                            .holds_reservations(id)
                            .await
                            .map_err(|e| DormError::store("reclaim_identity", e))?;
                        if holds {
                            return Ok(SweepAction::Retained);
                        }
                    }

                    let removed = tx
                        .delete_identity(id)
                        .await
                        .map_err(|e| DormError::store("reclaim_identity", e))?;
                    Ok::<_, DormError>(if removed {
                        SweepAction::Reclaimed
                    } else {
                        SweepAction::Gone
                    })
                })
            })
            .await;

            match result {
                Ok(SweepAction::Reclaimed) => report.reclaimed += 1,
                Ok(SweepAction::Retained) => {
                    report.retained += 1;
                    tracing::debug!(identity_id = %id, "expired identity holds reservations, kept");
                }
                Ok(SweepAction::Gone) => {}
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(identity_id = %id, error = %err, "failed to reclaim identity");
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            reclaimed = report.reclaimed,
            retained = report.retained,
            failed = report.failed,
            protects_holders = protect,
            "identity sweep finished"
        );
        report
    }

    async fn provision_at(
        &self,
        display_name: Option<&str>,
        now: DateTime<Utc>,
        outcome: ResolveOutcome,
    ) -> DormResult<ResolvedIdentity> {
        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(generate_display_name);
        let deadline = now + self.policy.identity_ttl;
        let codec = self.codec.clone();

        let resolved = transact(&*self.store, "provision_identity", move |tx| {
            Box::pin(async move {
                let record = tx
                    .create_identity(&name, deadline)
                    .await
                    .map_err(|e| DormError::store("provision_identity", e))?;
                fresh(&codec, record, now, outcome)
            })
        })
        .await?;

        tracing::info!(
            identity_id = %resolved.identity_id,
            display_name = %resolved.display_name,
            outcome = %outcome,
            "identity provisioned"
        );
        Ok(resolved)
    }

    /// Decision state 5. The identity is re-read under a row lock so that a
    /// reservation created since the unlocked check keeps it alive.
    async fn replace(
        &self,
        identity: IdentityId,
        token: &str,
        now: DateTime<Utc>,
    ) -> DormResult<ResolvedIdentity> {
        let name = generate_display_name();
        let deadline = now + self.policy.identity_ttl;
        let codec = self.codec.clone();
        let token = token.to_string();

        let resolved = transact(&*self.store, "replace_identity", move |tx| {
            Box::pin(async move {
                let locked = tx
                    .lock_identity(identity)
                    .await
                    .map_err(|e| DormError::store("replace_identity", e))?;

                let outcome = match locked {
                    Some(record) => {
                        if !record.is_expired_at(now) {
                            return Ok(reuse(record, &token, ResolveOutcome::Reused));
                        }
                        let holds = tx
                            .holds_reservations(identity)
                            .await
                            .map_err(|e| DormError::store("replace_identity", e))?;
                        if holds {
                            return Ok(reuse(
                                record,
                                &token,
                                ResolveOutcome::RetainedForReservations,
                            ));
                        }
                        tx.delete_identity(identity)
                            .await
                            .map_err(|e| DormError::store("replace_identity", e))?;
                        ResolveOutcome::Replaced
                    }
                    None => ResolveOutcome::ReplacedMissing,
                };

                let record = tx
                    .create_identity(&name, deadline)
                    .await
                    .map_err(|e| DormError::store("replace_identity", e))?;
                fresh(&codec, record, now, outcome)
            })
        })
        .await?;

        if !resolved.outcome.is_reuse() {
            tracing::info!(
                previous_identity_id = %identity,
                identity_id = %resolved.identity_id,
                outcome = %resolved.outcome,
                "expired identity replaced"
            );
        }
        Ok(resolved)
    }
}

fn reuse(record: IdentityRecord, token: &str, outcome: ResolveOutcome) -> ResolvedIdentity {
    ResolvedIdentity {
        identity_id: record.id,
        display_name: record.display_name,
        credential: token.to_string(),
        outcome,
    }
}

fn fresh(
    codec: &CredentialCodec,
    record: IdentityRecord,
    now: DateTime<Utc>,
    outcome: ResolveOutcome,
) -> DormResult<ResolvedIdentity> {
    let credential = codec.issue(record.id, &record.display_name, now)?;
    Ok(ResolvedIdentity {
        identity_id: record.id,
        display_name: record.display_name,
        credential,
        outcome,
    })
}

/// `user_` followed by 12 lowercase hex characters.
pub fn generate_display_name() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("user_{}", &hex[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::{ReservationPolicy, ReservationService};
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use dorm_storage::memory::InMemoryDormStorage;
    use async_trait::async_trait;
    use dorm_storage::{
        RangeFilter, Reservation, ReservationStore, ReservationWrites, ResourceKind,
        StorageResult, StoreTransaction, TimeWindow, UnitOfWork,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    const SECRET: &str = "test-secret-test-secret-test-secret";

    struct Harness {
        store: InMemoryDormStorage,
        clock: Arc<ManualClock>,
        lifecycle: IdentityLifecycle,
        reservations: ReservationService,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
    }

    /// Identity TTL of one day against a 30 day credential, so identities can
    /// expire while their credential still verifies.
    fn harness(protect: bool) -> Harness {
        let store = InMemoryDormStorage::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let codec = Arc::new(CredentialCodec::new(SECRET, Duration::days(30)).unwrap());
        let shared: Arc<dyn DormStorage> = Arc::new(store.clone());
        let lifecycle = IdentityLifecycle::new(
            shared.clone(),
            codec,
            clock.clone(),
            IdentityPolicy {
                identity_ttl: Duration::days(1),
                sweep_protects_reservation_holders: protect,
            },
        );
        let reservations = ReservationService::new(shared, ReservationPolicy::default());
        Harness {
            store,
            clock,
            lifecycle,
            reservations,
        }
    }

    #[tokio::test]
    async fn missing_credential_always_provisions() {
        let h = harness(true);

        let first = h.lifecycle.resolve(None).await.unwrap();
        let second = h.lifecycle.resolve(Some("   ")).await.unwrap();

        assert_eq!(first.outcome, ResolveOutcome::Provisioned);
        assert_eq!(second.outcome, ResolveOutcome::Provisioned);
        assert_ne!(first.identity_id, second.identity_id);
        assert_ne!(first.credential, second.credential);
        assert!(first.display_name.starts_with("user_"));
    }

    #[tokio::test]
    async fn valid_credential_is_reused_verbatim() {
        let h = harness(true);
        let issued = h.lifecycle.resolve(None).await.unwrap();

        h.clock.advance(Duration::hours(5));
        let again = h
            .lifecycle
            .resolve(Some(&issued.credential))
            .await
            .unwrap();
        let third = h
            .lifecycle
            .resolve(Some(&issued.credential))
            .await
            .unwrap();

        for resolved in [&again, &third] {
            assert_eq!(resolved.outcome, ResolveOutcome::Reused);
            assert_eq!(resolved.identity_id, issued.identity_id);
            assert_eq!(resolved.credential, issued.credential);
            assert_eq!(resolved.display_name, issued.display_name);
        }
    }

    #[tokio::test]
    async fn unverifiable_credential_provisions_without_error() {
        let h = harness(true);
        let issued = h.lifecycle.resolve(None).await.unwrap();

        let resolved = h.lifecycle.resolve(Some("garbage.token.here")).await.unwrap();
        assert_eq!(resolved.outcome, ResolveOutcome::ReplacedInvalidCredential);
        assert_ne!(resolved.identity_id, issued.identity_id);

        // Credential past its own expiry is treated the same way, and the old
        // identity is left for the sweep.
        h.clock.advance(Duration::days(31));
        let resolved = h
            .lifecycle
            .resolve(Some(&issued.credential))
            .await
            .unwrap();
        assert_eq!(resolved.outcome, ResolveOutcome::ReplacedInvalidCredential);
        assert!(h
            .store
            .get_identity(issued.identity_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn reservation_keeps_expired_identity_until_deleted() {
        let h = harness(true);
        let issued = h.lifecycle.resolve(None).await.unwrap();
        let booking = h
            .reservations
            .create(
                ResourceKind::Kitchen,
                issued.identity_id,
                t0() + Duration::days(3),
                t0() + Duration::days(3) + Duration::hours(1),
            )
            .await
            .unwrap();

        h.clock.advance(Duration::days(2));
        let retained = h
            .lifecycle
            .resolve(Some(&issued.credential))
            .await
            .unwrap();
        assert_eq!(retained.outcome, ResolveOutcome::RetainedForReservations);
        assert_eq!(retained.identity_id, issued.identity_id);
        assert_eq!(retained.credential, issued.credential);

        h.reservations
            .delete(ResourceKind::Kitchen, booking, issued.identity_id)
            .await
            .unwrap();

        let replaced = h
            .lifecycle
            .resolve(Some(&issued.credential))
            .await
            .unwrap();
        assert_eq!(replaced.outcome, ResolveOutcome::Replaced);
        assert_ne!(replaced.identity_id, issued.identity_id);
        assert_ne!(replaced.credential, issued.credential);
        assert!(h
            .store
            .get_identity(issued.identity_id)
            .await
            .unwrap()
            .is_none());

        let record = h
            .store
            .get_identity(replaced.identity_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.ttl_deadline, t0() + Duration::days(3));
    }

    #[tokio::test]
    async fn verified_credential_for_missing_identity_provisions() {
        let h = harness(true);
        let issued = h.lifecycle.resolve(None).await.unwrap();

        let mut tx = h.store.begin().await.unwrap();
        assert!(tx.delete_identity(issued.identity_id).await.unwrap());
        tx.commit().await.unwrap();

        let resolved = h
            .lifecycle
            .resolve(Some(&issued.credential))
            .await
            .unwrap();
        assert_eq!(resolved.outcome, ResolveOutcome::ReplacedMissing);
        assert_ne!(resolved.identity_id, issued.identity_id);
    }

    #[tokio::test]
    async fn explicit_display_name_is_kept() {
        let h = harness(true);
        let resolved = h.lifecycle.provision(Some("room-214")).await.unwrap();
        assert_eq!(resolved.display_name, "room-214");

        let claims = h.lifecycle.authenticate(&resolved.credential).unwrap();
        assert_eq!(claims.identity(), resolved.identity_id);
        assert_eq!(claims.display_name, "room-214");

        let generated = h.lifecycle.provision(Some("  ")).await.unwrap();
        assert!(generated.display_name.starts_with("user_"));
    }

    #[tokio::test]
    async fn sweep_reclaims_expired_and_is_idempotent() {
        let h = harness(true);
        let a = h.lifecycle.resolve(None).await.unwrap();
        let b = h.lifecycle.resolve(None).await.unwrap();
        let holder = h.lifecycle.resolve(None).await.unwrap();
        h.reservations
            .create(
                ResourceKind::Laundry,
                holder.identity_id,
                t0() + Duration::days(2),
                t0() + Duration::days(2) + Duration::hours(2),
            )
            .await
            .unwrap();

        // Deadline equal to now counts as expired.
        h.clock.advance(Duration::days(1));
        let fresh = h.lifecycle.resolve(None).await.unwrap();

        let report = h.lifecycle.reclaim_expired().await;
        assert_eq!(report.examined, 3);
        assert_eq!(report.reclaimed, 2);
        assert_eq!(report.retained, 1);
        assert_eq!(report.failed, 0);

        for gone in [&a, &b] {
            assert!(h
                .store
                .get_identity(gone.identity_id)
                .await
                .unwrap()
                .is_none());
        }
        for kept in [&holder, &fresh] {
            assert!(h
                .store
                .get_identity(kept.identity_id)
                .await
                .unwrap()
                .is_some());
        }

        let again = h.lifecycle.reclaim_expired().await;
        assert_eq!(again.reclaimed, 0);
        assert_eq!(again.retained, 1);
    }

    #[tokio::test]
    async fn unprotected_sweep_cascades_reservations() {
        let h = harness(false);
        let holder = h.lifecycle.resolve(None).await.unwrap();
        h.reservations
            .create(
                ResourceKind::Laundry,
                holder.identity_id,
                t0() + Duration::days(2),
                t0() + Duration::days(2) + Duration::hours(1),
            )
            .await
            .unwrap();

        h.clock.advance(Duration::days(1) + Duration::seconds(1));
        let report = h.lifecycle.reclaim_expired().await;
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.retained, 0);

        assert!(h
            .reservations
            .list_by_range(ResourceKind::Laundry, None, None)
            .await
            .unwrap()
            .is_empty());
    }

    /// Books a laundry slot for an identity right after reporting it free of
    /// reservations, so only the locked re-check in `replace` can see it.
    struct BookAfterCheck {
        inner: InMemoryDormStorage,
        booked: AtomicBool,
    }

    #[async_trait]
    impl ReservationStore for BookAfterCheck {
        async fn list_reservations(
            &self,
            kind: ResourceKind,
            filter: RangeFilter,
        ) -> StorageResult<Vec<Reservation>> {
            self.inner.list_reservations(kind, filter).await
        }

        async fn list_reservations_for(
            &self,
            kind: ResourceKind,
            owner: IdentityId,
        ) -> StorageResult<Vec<Reservation>> {
            self.inner.list_reservations_for(kind, owner).await
        }
    }

    #[async_trait]
    impl IdentityStore for BookAfterCheck {
        async fn get_identity(&self, id: IdentityId) -> StorageResult<Option<IdentityRecord>> {
            self.inner.get_identity(id).await
        }

        async fn has_active_reservations(&self, id: IdentityId) -> StorageResult<bool> {
            let holds = self.inner.has_active_reservations(id).await?;
            if !self.booked.swap(true, Ordering::SeqCst) {
                let start = t0() + Duration::days(5);
                let mut tx = self.inner.begin().await?;
                tx.create_if_free(
                    ResourceKind::Laundry,
                    id,
                    TimeWindow::new(start, start + Duration::hours(1)),
                )
                .await?;
                tx.commit().await?;
            }
            Ok(holds)
        }

        async fn list_expired_identities(
            &self,
            now: DateTime<Utc>,
        ) -> StorageResult<Vec<IdentityId>> {
            self.inner.list_expired_identities(now).await
        }
    }

    #[async_trait]
    impl UnitOfWork for BookAfterCheck {
        async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
            self.inner.begin().await
        }
    }

    #[tokio::test]
    async fn replace_retains_identity_booked_after_unlocked_check() {
        let store = InMemoryDormStorage::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let codec = Arc::new(CredentialCodec::new(SECRET, Duration::days(30)).unwrap());
        let lifecycle = IdentityLifecycle::new(
            Arc::new(BookAfterCheck {
                inner: store.clone(),
                booked: AtomicBool::new(false),
            }),
            codec,
            clock.clone(),
            IdentityPolicy {
                identity_ttl: Duration::days(1),
                sweep_protects_reservation_holders: true,
            },
        );

        let issued = lifecycle.resolve(None).await.unwrap();
        clock.advance(Duration::days(2));

        let resolved = lifecycle.resolve(Some(&issued.credential)).await.unwrap();
        assert_eq!(resolved.outcome, ResolveOutcome::RetainedForReservations);
        assert_eq!(resolved.identity_id, issued.identity_id);
        assert_eq!(resolved.credential, issued.credential);

        assert!(store
            .get_identity(issued.identity_id)
            .await
            .unwrap()
            .is_some());
        let booked = store
            .list_reservations_for(ResourceKind::Laundry, issued.identity_id)
            .await
            .unwrap();
        assert_eq!(booked.len(), 1);
    }

    #[test]
    fn generated_names_are_prefixed_hex() {
        let name = generate_display_name();
        let suffix = name.strip_prefix("user_").unwrap();
        assert_eq!(suffix.len(), 12);
        assert!(suffix
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(generate_display_name(), name);
    }
}
