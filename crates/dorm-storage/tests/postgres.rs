use chrono::{DateTime, Duration, TimeZone, Utc};
use dorm_storage::postgres::PostgresDormStorage;
use dorm_storage::{
    IdentityId, IdentityStore, IdentityWrites, RangeFilter, ReservationStore, ReservationWrites,
    ResourceKind, StorageError, StoreTransaction, TimeWindow, UnitOfWork,
};

const DATABASE_URL_ENV: &str = "DORM_TEST_DATABASE_URL";

async fn connect() -> Option<PostgresDormStorage> {
    let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
        eprintln!("skipping postgres test because {DATABASE_URL_ENV} is missing");
        return None;
    };
    Some(
        PostgresDormStorage::connect(&url)
            .await
            .expect("postgres should be reachable"),
    )
}

async fn new_identity(store: &PostgresDormStorage, deadline: DateTime<Utc>) -> IdentityId {
    let mut tx = store.begin().await.expect("begin");
    let record = tx
        .create_identity("user_pgtest", deadline)
        .await
        .expect("create identity");
    tx.commit().await.expect("commit");
    record.id
}

/// Windows are placed on a day derived from the identity id so tests sharing
/// a database never contend for the same slot.
fn window_for(owner: IdentityId, hour: u32, minutes: i64) -> TimeWindow {
    let day = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap() + Duration::days(owner.0);
    let start = day + Duration::hours(hour as i64);
    TimeWindow::new(start, start + Duration::minutes(minutes))
}

#[tokio::test]
async fn overlapping_insert_is_rejected_and_touching_is_accepted() {
    let Some(store) = connect().await else { return };
    let owner = new_identity(&store, Utc::now() + Duration::hours(1)).await;

    let mut tx = store.begin().await.unwrap();
    let first = window_for(owner, 10, 60);
    tx.create_if_free(ResourceKind::Laundry, owner, first)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let overlapping = TimeWindow::new(
        first.start + Duration::minutes(30),
        first.end + Duration::minutes(30),
    );
    let err = tx
        .create_if_free(ResourceKind::Laundry, owner, overlapping)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let touching = TimeWindow::new(first.end, first.end + Duration::minutes(30));
    tx.create_if_free(ResourceKind::Laundry, owner, touching)
        .await
        .unwrap();
    // Same interval on the other kind is independent.
    tx.create_if_free(ResourceKind::Kitchen, owner, first)
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let listed = store
        .list_reservations(ResourceKind::Laundry, RangeFilter::new(Some(first.start), None))
        .await
        .unwrap();
    let mine: Vec<_> = listed.iter().filter(|r| r.owner == owner).collect();
    assert_eq!(mine.len(), 2);
    assert!(mine[0].start < mine[1].start);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_conflicting_inserts_admit_exactly_one() {
    let Some(store) = connect().await else { return };
    let owner = new_identity(&store, Utc::now() + Duration::hours(1)).await;
    let window = window_for(owner, 14, 90);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut tx = store.begin().await?;
            tx.create_if_free(ResourceKind::Kitchen, owner, window)
                .await?;
            tx.commit().await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => committed += 1,
            Err(StorageError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(committed, 1);

    let mine = store
        .list_reservations_for(ResourceKind::Kitchen, owner)
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
}

#[tokio::test]
async fn delete_requires_ownership_and_identity_delete_cascades() {
    let Some(store) = connect().await else { return };
    let owner = new_identity(&store, Utc::now() + Duration::hours(1)).await;
    let stranger = new_identity(&store, Utc::now() + Duration::hours(1)).await;

    let mut tx = store.begin().await.unwrap();
    let id = tx
        .create_if_free(ResourceKind::Laundry, owner, window_for(owner, 8, 30))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .delete_if_owner(ResourceKind::Laundry, id, stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
    tx.rollback().await.unwrap();

    assert!(store.has_active_reservations(owner).await.unwrap());

    let mut tx = store.begin().await.unwrap();
    assert!(tx.lock_identity(owner).await.unwrap().is_some());
    assert!(tx.delete_identity(owner).await.unwrap());
    tx.commit().await.unwrap();

    assert!(store.get_identity(owner).await.unwrap().is_none());
    assert!(store
        .list_reservations_for(ResourceKind::Laundry, owner)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unknown_owner_is_invalid_input() {
    let Some(store) = connect().await else { return };

    let mut tx = store.begin().await.unwrap();
    let ghost = IdentityId(i64::MAX - 7);
    let err = tx
        .create_if_free(ResourceKind::Kitchen, ghost, window_for(IdentityId(1), 3, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn insert_racing_identity_delete_sees_unknown_owner() {
    let Some(store) = connect().await else { return };
    let owner = new_identity(&store, Utc::now() - Duration::minutes(1)).await;

    let deleter = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut tx = store.begin().await?;
            tx.lock_identity(owner).await?;
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            let deleted = tx.delete_identity(owner).await?;
            tx.commit().await?;
            Ok::<_, StorageError>(deleted)
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let mut tx = store.begin().await.unwrap();
    let err = tx
        .create_if_free(ResourceKind::Laundry, owner, window_for(owner, 9, 30))
        .await
        .unwrap_err();
    assert!(
        matches!(err, StorageError::InvalidInput(_)),
        "unexpected error: {err}"
    );
    tx.rollback().await.unwrap();

    assert!(deleter.await.unwrap().unwrap());
    assert!(store
        .list_reservations_for(ResourceKind::Laundry, owner)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn expired_identities_are_listed_inclusive_of_deadline() {
    let Some(store) = connect().await else { return };
    let deadline = Utc::now() - Duration::minutes(5);
    let expired = new_identity(&store, deadline).await;
    let fresh = new_identity(&store, Utc::now() + Duration::hours(2)).await;

    let listed = store.list_expired_identities(deadline).await.unwrap();
    assert!(listed.contains(&expired));
    assert!(!listed.contains(&fresh));
}
