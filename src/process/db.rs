//! PostgreSQL process store
//!
//! One table per process kind. Every lease decision is a single conditional
//! UPDATE whose `rows_affected()` says whether the caller won; the database
//! clock is authoritative for expiry.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::error;

use super::error::StoreError;
use super::state::ProcessState;
use super::store::ProcessStore;
use super::types::{Lease, ProcessEntity, ProcessId, ProcessPayload, ProcessRole};

/// Open a connection pool for the process tables
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!("PostgreSQL connection pool established");
    Ok(pool)
}

pub struct PgProcessStore<S, P> {
    pool: PgPool,
    table: &'static str,
    _kind: PhantomData<fn() -> (S, P)>,
}

const COLUMNS: &str = "id, role, state, state_count, state_timestamp, correlation_id, \
     error_detail, retry_count, payload, lease_holder, leased_at, lease_expires_at, \
     created_at, updated_at";

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

impl<S: ProcessState, P: ProcessPayload> PgProcessStore<S, P> {
    pub fn new(pool: PgPool, table: &'static str) -> Self {
        Self {
            pool,
            table,
            _kind: PhantomData,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table and its polling indexes if missing
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let table = self.table;
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id               TEXT PRIMARY KEY,
                role             SMALLINT NOT NULL,
                state            INTEGER NOT NULL,
                state_count      INTEGER NOT NULL DEFAULT 0,
                state_timestamp  TIMESTAMPTZ NOT NULL,
                correlation_id   TEXT,
                error_detail     TEXT,
                retry_count      INTEGER NOT NULL DEFAULT 0,
                payload          JSONB NOT NULL,
                lease_holder     TEXT,
                leased_at        TIMESTAMPTZ,
                lease_expires_at TIMESTAMPTZ,
                created_at       TIMESTAMPTZ NOT NULL,
                updated_at       TIMESTAMPTZ NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_state_idx ON {table} (state, updated_at)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_correlation_idx ON {table} (correlation_id)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_entity(&self, row: &PgRow) -> Result<ProcessEntity<S, P>, StoreError> {
        let id: String = row.try_get("id")?;
        let id: ProcessId = id
            .parse()
            .map_err(|e| StoreError::Corrupted(format!("bad id {id}: {e}")))?;

        let role_id: i16 = row.try_get("role")?;
        let role = ProcessRole::from_id(role_id)
            .ok_or_else(|| StoreError::Corrupted(format!("{id}: unknown role {role_id}")))?;

        let code: i32 = row.try_get("state")?;
        let state = S::from_code(code)
            .ok_or_else(|| StoreError::Corrupted(format!("{id}: unknown state {code}")))?;

        let payload: Json<P> = row.try_get("payload")?;

        let holder: Option<String> = row.try_get("lease_holder")?;
        let leased_at: Option<DateTime<Utc>> = row.try_get("leased_at")?;
        let expires_at: Option<DateTime<Utc>> = row.try_get("lease_expires_at")?;
        let lease = match (holder, leased_at, expires_at) {
            (Some(holder_id), Some(leased_at), Some(expires_at)) => Some(Lease {
                holder_id,
                leased_at,
                expires_at,
            }),
            _ => None,
        };

        let state_count: i32 = row.try_get("state_count")?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(ProcessEntity {
            id,
            role,
            state,
            state_count: state_count.max(0) as u32,
            state_timestamp: row.try_get("state_timestamp")?,
            correlation_id: row.try_get("correlation_id")?,
            error_detail: row.try_get("error_detail")?,
            retry_count: retry_count.max(0) as u32,
            payload: payload.0,
            lease,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Move an undecodable row to the error state so it stops coming back in
    /// every batch. Only touches the row while it is still in `polled` and
    /// unleased.
    async fn quarantine(&self, id: &str, polled: S, detail: &str) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            UPDATE {}
            SET state = $2,
                error_detail = $3,
                state_count = state_count + 1,
                state_timestamp = NOW(),
                updated_at = NOW()
            WHERE id = $1
              AND state = $4
              AND (lease_holder IS NULL OR lease_expires_at < NOW())
            "#,
            self.table
        ))
        .bind(id)
        .bind(S::error().code())
        .bind(format!("corrupted record: {detail}"))
        .bind(polled.code())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exists(&self, id: &ProcessId) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i32>(&format!(
            "SELECT 1 FROM {} WHERE id = $1",
            self.table
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl<S: ProcessState, P: ProcessPayload> ProcessStore<S, P> for PgProcessStore<S, P> {
    async fn create(&self, process: &ProcessEntity<S, P>) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {}
                (id, role, state, state_count, state_timestamp, correlation_id,
                 error_detail, retry_count, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
            self.table
        ))
        .bind(process.id.to_string())
        .bind(process.role.id())
        .bind(process.state.code())
        .bind(process.state_count as i32)
        .bind(process.state_timestamp)
        .bind(&process.correlation_id)
        .bind(&process.error_detail)
        .bind(process.retry_count as i32)
        .bind(Json(&process.payload))
        .bind(process.created_at)
        .bind(process.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateId(process.id));
        }
        Ok(())
    }

    async fn find(&self, id: &ProcessId) -> Result<Option<ProcessEntity<S, P>>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM {} WHERE id = $1",
            self.table
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_by_correlation_id(
        &self,
        role: ProcessRole,
        correlation_id: &str,
    ) -> Result<Option<ProcessEntity<S, P>>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM {} WHERE correlation_id = $1 AND role = $2 \
             ORDER BY created_at, id LIMIT 1",
            self.table
        ))
        .bind(correlation_id)
        .bind(role.id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn next_for_state(
        &self,
        state: S,
        max: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProcessEntity<S, P>>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM {}
            WHERE state = $1
              AND (lease_holder IS NULL OR lease_expires_at < $2)
            ORDER BY updated_at ASC
            LIMIT $3
            "#,
            self.table
        ))
        .bind(state.code())
        .bind(now)
        .bind(i64::try_from(max).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let mut found = Vec::with_capacity(rows.len());
        for row in &rows {
            match self.row_to_entity(row) {
                Ok(process) => found.push(process),
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    error!(
                        table = %self.table,
                        process_id = %id,
                        error = %e,
                        "Undecodable process row, moving it to the error state"
                    );
                    if !id.is_empty() {
                        self.quarantine(&id, state, &e.to_string()).await?;
                    }
                }
            }
        }
        Ok(found)
    }

    async fn acquire_lease(
        &self,
        id: &ProcessId,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET lease_holder = $2,
                leased_at = NOW(),
                lease_expires_at = NOW() + INTERVAL '1 millisecond' * $3
            WHERE id = $1
              AND (lease_holder IS NULL OR lease_expires_at < NOW() OR lease_holder = $2)
            "#,
            self.table
        ))
        .bind(id.to_string())
        .bind(holder_id)
        .bind(ttl_millis(ttl))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if !self.exists(id).await? {
            return Err(StoreError::NotFound(*id));
        }
        Ok(false)
    }

    async fn renew_lease(
        &self,
        id: &ProcessId,
        holder_id: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET lease_expires_at = NOW() + INTERVAL '1 millisecond' * $3
            WHERE id = $1 AND lease_holder = $2 AND lease_expires_at >= NOW()
            "#,
            self.table
        ))
        .bind(id.to_string())
        .bind(holder_id)
        .bind(ttl_millis(ttl))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(())
        } else {
            Err(StoreError::LeaseLost(*id))
        }
    }

    async fn update_and_release(
        &self,
        process: &ProcessEntity<S, P>,
        holder_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {}
            SET state = $3,
                state_count = $4,
                state_timestamp = $5,
                correlation_id = $6,
                error_detail = $7,
                retry_count = $8,
                payload = $9,
                lease_holder = NULL,
                leased_at = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND lease_holder = $2 AND lease_expires_at >= NOW()
            "#,
            self.table
        ))
        .bind(process.id.to_string())
        .bind(holder_id)
        .bind(process.state.code())
        .bind(process.state_count as i32)
        .bind(process.state_timestamp)
        .bind(&process.correlation_id)
        .bind(&process.error_detail)
        .bind(process.retry_count as i32)
        .bind(Json(&process.payload))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        if !self.exists(&process.id).await? {
            return Err(StoreError::NotFound(process.id));
        }
        Err(StoreError::LeaseLost(process.id))
    }

    async fn release_lease(&self, id: &ProcessId, holder_id: &str) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            UPDATE {}
            SET lease_holder = NULL, leased_at = NULL, lease_expires_at = NULL
            WHERE id = $1 AND lease_holder = $2
            "#,
            self.table
        ))
        .bind(id.to_string())
        .bind(holder_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
