//! PostgreSQL adapter for dormitory storage.
//!
//! This adapter is the transactional source of truth. Overlap arbitration is
//! enforced twice: `create_if_free` locks the kind's table in
//! `SHARE ROW EXCLUSIVE` mode before counting overlaps, and every reservation
//! table carries a gist exclusion constraint on `tstzrange(start, end, '[)')`.
//!
//! Lock order is identity row first, reservation table second. Identity
//! deletes take the row `FOR UPDATE` before cascading into the tables, so
//! `create_if_free` takes the owner row `FOR KEY SHARE` before its table lock.

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
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;

const SCHEMA_LOCK_KEY: i64 = 0x646f_726d;

/// PostgreSQL-backed storage adapter.
#[derive(Debug, Clone)]
pub struct PostgresDormStorage {
    pool: PgPool,
}

impl PostgresDormStorage {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let mut ddl = vec![
            r#"
            CREATE TABLE IF NOT EXISTS identities (
                id BIGSERIAL PRIMARY KEY,
                display_name TEXT NOT NULL
            )
            "#
            .to_string(),
            r#"
            CREATE TABLE IF NOT EXISTS identity_ttl (
                identity_id BIGINT PRIMARY KEY REFERENCES identities(id) ON DELETE CASCADE,
                ttl_deadline TIMESTAMPTZ NOT NULL
            )
            "#
            .to_string(),
            "CREATE INDEX IF NOT EXISTS identity_ttl_deadline ON identity_ttl(ttl_deadline)"
                .to_string(),
        ];

        for kind in ResourceKind::ALL {
            let table = kind.table();
            ddl.push(format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id BIGSERIAL PRIMARY KEY,
                    owner_identity_id BIGINT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
                    start_time TIMESTAMPTZ NOT NULL,
                    end_time TIMESTAMPTZ NOT NULL,
                    CONSTRAINT {table}_ordered CHECK (end_time > start_time),
                    CONSTRAINT {table}_no_overlap
                        EXCLUDE USING gist (tstzrange(start_time, end_time, '[)') WITH &&)
                )
                "#
            ));
            ddl.push(format!(
                "CREATE INDEX IF NOT EXISTS {table}_owner ON {table}(owner_identity_id)"
            ));
        }

        // Concurrent initializers would race on the catalog; serialize them.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        for stmt in &ddl {
            sqlx::query(stmt)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))
    }
}

#[async_trait]
impl ReservationStore for PostgresDormStorage {
    async fn list_reservations(
        &self,
        kind: ResourceKind,
        filter: RangeFilter,
    ) -> StorageResult<Vec<Reservation>> {
        let sql = format!(
            r#"
            SELECT id, owner_identity_id, start_time, end_time
              FROM {}
             WHERE ($1::TIMESTAMPTZ IS NULL OR start_time >= $1)
               AND ($2::TIMESTAMPTZ IS NULL OR end_time <= $2)
             ORDER BY start_time, id
            "#,
            kind.table()
        );
        let rows = sqlx::query(&sql)
            .bind(filter.from)
            .bind(filter.to)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| reservation_row_to_record(kind, row))
            .collect()
    }

    async fn list_reservations_for(
        &self,
        kind: ResourceKind,
        owner: IdentityId,
    ) -> StorageResult<Vec<Reservation>> {
        let sql = format!(
            r#"
            SELECT id, owner_identity_id, start_time, end_time
              FROM {}
             WHERE owner_identity_id = $1
             ORDER BY start_time, id
            "#,
            kind.table()
        );
        let rows = sqlx::query(&sql)
            .bind(owner.0)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| reservation_row_to_record(kind, row))
            .collect()
    }
}

#[async_trait]
impl IdentityStore for PostgresDormStorage {
    async fn get_identity(&self, id: IdentityId) -> StorageResult<Option<IdentityRecord>> {
        let row = sqlx::query(
            r#"
            SELECT i.id, i.display_name, t.ttl_deadline
              FROM identities i
              JOIN identity_ttl t ON t.identity_id = i.id
             WHERE i.id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(identity_row_to_record).transpose()
    }

    async fn has_active_reservations(&self, id: IdentityId) -> StorageResult<bool> {
        sqlx::query_scalar::<_, bool>(&holds_reservations_sql())
            .bind(id.0)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn list_expired_identities(
        &self,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<IdentityId>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT identity_id
              FROM identity_ttl
             WHERE ttl_deadline <= $1
             ORDER BY identity_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(ids.into_iter().map(IdentityId).collect())
    }
}

#[async_trait]
impl UnitOfWork for PostgresDormStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(format!("failed to begin transaction: {e}")))?;
        Ok(Box::new(PgStoreTransaction { tx: Some(tx) }))
    }
}

/// Open PostgreSQL transaction. sqlx rolls the transaction back when it is
/// dropped uncommitted, and returns the connection to the pool.
struct PgStoreTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgStoreTransaction {
    fn conn(&mut self) -> StorageResult<&mut PgConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| StorageError::Backend("transaction already finished".to_string()))
    }
}

#[async_trait]
impl ReservationWrites for PgStoreTransaction {
    async fn create_if_free(
        &mut self,
        kind: ResourceKind,
        owner: IdentityId,
        window: TimeWindow,
    ) -> StorageResult<ReservationId> {
        let table = kind.table();
        let conn = self.conn()?;

        let owner_exists = sqlx::query("SELECT 1 FROM identities WHERE id = $1 FOR KEY SHARE")
            .bind(owner.0)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .is_some();
        if !owner_exists {
            return Err(StorageError::InvalidInput(format!(
                "identity {owner} does not exist"
            )));
        }

        let lock = format!("LOCK TABLE {table} IN SHARE ROW EXCLUSIVE MODE");
        sqlx::query(&lock)
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let count = format!("SELECT COUNT(*) FROM {table} WHERE start_time < $2 AND $1 < end_time");
        let overlapping: i64 = sqlx::query_scalar(&count)
            .bind(window.start)
            .bind(window.end)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if overlapping > 0 {
            return Err(StorageError::Conflict(format!(
                "{kind} slot {} - {} is already booked",
                window.start, window.end
            )));
        }

        let insert = format!(
            r#"
            INSERT INTO {table} (owner_identity_id, start_time, end_time)
            VALUES ($1, $2, $3)
            RETURNING id
            "#
        );
        let id: i64 = sqlx::query_scalar(&insert)
            .bind(owner.0)
            .bind(window.start)
            .bind(window.end)
            .fetch_one(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        Ok(ReservationId(id))
    }

    async fn delete_if_owner(
        &mut self,
        kind: ResourceKind,
        id: ReservationId,
        owner: IdentityId,
    ) -> StorageResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE id = $1 AND owner_identity_id = $2",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(id.0)
            .bind(owner.0)
            .execute(self.conn()?)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!(
                "{kind} reservation {id} not found or not owned by caller"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityWrites for PgStoreTransaction {
    async fn create_identity(
        &mut self,
        display_name: &str,
        ttl_deadline: DateTime<Utc>,
    ) -> StorageResult<IdentityRecord> {
        let conn = self.conn()?;
        let id: i64 =
            sqlx::query_scalar("INSERT INTO identities (display_name) VALUES ($1) RETURNING id")
                .bind(display_name)
                .fetch_one(&mut *conn)
                .await
                .map_err(|e| StorageError::Backend(format!("failed to create identity: {e}")))?;

        sqlx::query("INSERT INTO identity_ttl (identity_id, ttl_deadline) VALUES ($1, $2)")
            .bind(id)
            .bind(ttl_deadline)
            .execute(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to create identity ttl: {e}")))?;

        Ok(IdentityRecord {
            id: IdentityId(id),
            display_name: display_name.to_string(),
            ttl_deadline,
        })
    }

    async fn lock_identity(&mut self, id: IdentityId) -> StorageResult<Option<IdentityRecord>> {
        let row = sqlx::query(
            r#"
            SELECT i.id, i.display_name, t.ttl_deadline
              FROM identities i
              JOIN identity_ttl t ON t.identity_id = i.id
             WHERE i.id = $1
               FOR UPDATE OF i
            "#,
        )
        .bind(id.0)
        .fetch_optional(self.conn()?)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(identity_row_to_record).transpose()
    }

    async fn holds_reservations(&mut self, id: IdentityId) -> StorageResult<bool> {
        sqlx::query_scalar::<_, bool>(&holds_reservations_sql())
            .bind(id.0)
            .fetch_one(self.conn()?)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn delete_identity(&mut self, id: IdentityId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM identities WHERE id = $1")
            .bind(id.0)
            .execute(self.conn()?)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to delete identity {id}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn commit(&mut self) -> StorageResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StorageError::Backend("transaction already finished".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(format!("failed to commit transaction: {e}")))
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        match self.tx.take() {
            Some(tx) => tx
                .rollback()
                .await
                .map_err(|e| StorageError::Backend(format!("failed to roll back: {e}"))),
            None => Ok(()),
        }
    }
}

fn holds_reservations_sql() -> String {
    let branches = ResourceKind::ALL
        .iter()
        .map(|kind| format!("SELECT 1 FROM {} WHERE owner_identity_id = $1", kind.table()))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    format!("SELECT EXISTS ({branches})")
}

fn reservation_row_to_record(kind: ResourceKind, row: PgRow) -> StorageResult<Reservation> {
    Ok(Reservation {
        id: ReservationId(
            row.try_get("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        kind,
        owner: IdentityId(
            row.try_get("owner_identity_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        start: row
            .try_get("start_time")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        end: row
            .try_get("end_time")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn identity_row_to_record(row: PgRow) -> StorageResult<IdentityRecord> {
    Ok(IdentityRecord {
        id: IdentityId(
            row.try_get("id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        display_name: row
            .try_get("display_name")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        ttl_deadline: row
            .try_get("ttl_deadline")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

/// Exclusion violations surface as slot conflicts, foreign-key violations as
/// an unknown owner.
fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23P01") => return StorageError::Conflict(db_err.message().to_string()),
            Some("23503") => return StorageError::InvalidInput(db_err.message().to_string()),
            _ => {}
        }
    }
    StorageError::Backend(err.to_string())
}
