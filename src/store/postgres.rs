//! PostgreSQL [`AttemptStore`] over a shared `sqlx::PgPool`.
//!
//! Schema is provisioned by the embedding application; this store assumes:
//!
//! ```sql
//! CREATE TABLE stepline_attempts (
//!     execution_id       BIGINT      NOT NULL,
//!     step_id            BIGINT      NOT NULL,
//!     retry_index        INTEGER     NOT NULL,
//!     status             TEXT        NOT NULL,
//!     created_at         TIMESTAMPTZ NOT NULL,
//!     started_at         TIMESTAMPTZ,
//!     ended_at           TIMESTAMPTZ,
//!     stopped_by         TEXT,
//!     correlation_handle TEXT,
//!     info               JSONB       NOT NULL DEFAULT '[]',
//!     warnings           JSONB       NOT NULL DEFAULT '[]',
//!     errors             JSONB       NOT NULL DEFAULT '[]',
//!     output             JSONB,
//!     PRIMARY KEY (execution_id, step_id, retry_index)
//! );
//! CREATE TABLE stepline_parameters (
//!     parameter_id BIGINT PRIMARY KEY,
//!     value        JSONB NOT NULL
//! );
//! CREATE TABLE stepline_executions (
//!     execution_id    BIGINT PRIMARY KEY,
//!     dependency_mode BOOLEAN NOT NULL DEFAULT FALSE,
//!     outcome         TEXT
//! );
//! CREATE TABLE stepline_step_edges (
//!     step_id            BIGINT NOT NULL,
//!     depends_on_step_id BIGINT NOT NULL,
//!     PRIMARY KEY (step_id, depends_on_step_id)
//! );
//! ```
//!
//! Status validation happens in Rust inside a row-locking transaction, so the
//! transition table lives in one place for every store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};

use crate::models::{
    AttemptKey, AttemptRecord, CorrelationHandle, ExecutionOutcome, MessageChannel, MessageSet,
    NewAttempt, StatusUpdate,
};
use crate::state_machine::Status;

use super::{
    validate_initial_status, validate_mutable, validate_transition, AttemptStore, StoreError,
};

const ATTEMPT_COLUMNS: &str = "execution_id, step_id, retry_index, status, created_at, \
     started_at, ended_at, stopped_by, correlation_handle, info, warnings, errors, output";

#[derive(Debug, Clone)]
pub struct PgAttemptStore {
    pool: PgPool,
}

impl PgAttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock and decode one attempt row inside `tx`.
    async fn lock_attempt(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        key: AttemptKey,
    ) -> Result<AttemptRecord, StoreError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM stepline_attempts \
             WHERE execution_id = $1 AND step_id = $2 AND retry_index = $3 FOR UPDATE"
        );
        let row: Option<AttemptRow> = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(key.execution_id)
            .bind(key.step_id)
            .bind(key.retry_index)
            .fetch_optional(&mut **tx)
            .await?;
        row.ok_or(StoreError::AttemptNotFound { key })?.into_record()
    }
}

/// Raw attempt row; decoding into [`AttemptRecord`] validates the status and
/// message channels.
#[derive(Debug, Clone, FromRow)]
struct AttemptRow {
    execution_id: i64,
    step_id: i64,
    retry_index: i32,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    stopped_by: Option<String>,
    correlation_handle: Option<String>,
    info: Value,
    warnings: Value,
    errors: Value,
    output: Option<Value>,
}

impl AttemptRow {
    fn into_record(self) -> Result<AttemptRecord, StoreError> {
        let status: Status = self
            .status
            .parse()
            .map_err(|err: crate::state_machine::InvalidStatus| StoreError::Decode(err.to_string()))?;
        Ok(AttemptRecord {
            key: AttemptKey {
                execution_id: self.execution_id,
                step_id: self.step_id,
                retry_index: self.retry_index,
            },
            status,
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            stopped_by: self.stopped_by,
            correlation_handle: self.correlation_handle.map(CorrelationHandle::new),
            messages: MessageSet {
                info: decode_channel(self.info)?,
                warnings: decode_channel(self.warnings)?,
                errors: decode_channel(self.errors)?,
            },
            output: self.output,
        })
    }
}

fn decode_channel(value: Value) -> Result<Vec<String>, StoreError> {
    serde_json::from_value(value).map_err(|err| StoreError::Decode(err.to_string()))
}

#[derive(Debug, FromRow)]
struct KeyRow {
    execution_id: i64,
    step_id: i64,
    retry_index: i32,
}

impl From<KeyRow> for AttemptKey {
    fn from(row: KeyRow) -> Self {
        Self {
            execution_id: row.execution_id,
            step_id: row.step_id,
            retry_index: row.retry_index,
        }
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn create_attempt(&self, new_attempt: NewAttempt) -> Result<AttemptRecord, StoreError> {
        validate_initial_status(&new_attempt)?;
        let key = new_attempt.key;
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO stepline_attempts (execution_id, step_id, retry_index, status, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (execution_id, step_id, retry_index) DO NOTHING",
        )
        .bind(key.execution_id)
        .bind(key.step_id)
        .bind(key.retry_index)
        .bind(new_attempt.status.to_string())
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AttemptExists { key });
        }

        Ok(AttemptRecord {
            key,
            status: new_attempt.status,
            created_at,
            started_at: None,
            ended_at: None,
            stopped_by: None,
            correlation_handle: None,
            messages: MessageSet::new(),
            output: None,
        })
    }

    async fn update_status(
        &self,
        key: AttemptKey,
        update: StatusUpdate,
    ) -> Result<AttemptRecord, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_attempt(&mut tx, key).await?;
        validate_transition(key, current.status, update.status)?;

        let sql = format!(
            "UPDATE stepline_attempts SET \
                 status = $4, \
                 started_at = COALESCE($5, started_at), \
                 ended_at = COALESCE($6, ended_at), \
                 stopped_by = COALESCE($7, stopped_by), \
                 output = COALESCE($8, output) \
             WHERE execution_id = $1 AND step_id = $2 AND retry_index = $3 \
             RETURNING {ATTEMPT_COLUMNS}"
        );
        let row: AttemptRow = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(key.execution_id)
            .bind(key.step_id)
            .bind(key.retry_index)
            .bind(update.status.to_string())
            .bind(update.started_at)
            .bind(update.ended_at)
            .bind(update.stopped_by)
            .bind(update.output)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        row.into_record()
    }

    async fn append_message(
        &self,
        key: AttemptKey,
        channel: MessageChannel,
        text: &str,
    ) -> Result<(), StoreError> {
        let column = match channel {
            MessageChannel::Info => "info",
            MessageChannel::Warning => "warnings",
            MessageChannel::Error => "errors",
        };

        let mut tx = self.pool.begin().await?;
        let current = Self::lock_attempt(&mut tx, key).await?;
        validate_mutable(key, current.status)?;

        let sql = format!(
            "UPDATE stepline_attempts SET {column} = {column} || $4::jsonb \
             WHERE execution_id = $1 AND step_id = $2 AND retry_index = $3"
        );
        sqlx::query(&sql)
            .bind(key.execution_id)
            .bind(key.step_id)
            .bind(key.retry_index)
            .bind(json!([text]))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_correlation_handle(
        &self,
        key: AttemptKey,
        handle: &CorrelationHandle,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_attempt(&mut tx, key).await?;
        validate_mutable(key, current.status)?;

        sqlx::query(
            "UPDATE stepline_attempts SET correlation_handle = $4 \
             WHERE execution_id = $1 AND step_id = $2 AND retry_index = $3",
        )
        .bind(key.execution_id)
        .bind(key.step_id)
        .bind(key.retry_index)
        .bind(handle.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_attempt(&self, key: AttemptKey) -> Result<AttemptRecord, StoreError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM stepline_attempts \
             WHERE execution_id = $1 AND step_id = $2 AND retry_index = $3"
        );
        let row: Option<AttemptRow> = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(key.execution_id)
            .bind(key.step_id)
            .bind(key.retry_index)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(StoreError::AttemptNotFound { key })?.into_record()
    }

    async fn list_attempts_for_step(
        &self,
        execution_id: i64,
        step_id: i64,
    ) -> Result<Vec<AttemptRecord>, StoreError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM stepline_attempts \
             WHERE execution_id = $1 AND step_id = $2 ORDER BY retry_index"
        );
        let rows: Vec<AttemptRow> = sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(execution_id)
            .bind(step_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(AttemptRow::into_record).collect()
    }

    async fn active_duplicate_attempts(
        &self,
        step_id: i64,
        exclude_execution: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttemptKey>, StoreError> {
        let rows: Vec<KeyRow> = sqlx::query_as::<_, KeyRow>(
            "SELECT execution_id, step_id, retry_index FROM stepline_attempts \
             WHERE step_id = $1 AND execution_id <> $2 \
               AND status IN ('running', 'awaiting_retry') \
               AND created_at >= $3 \
             ORDER BY execution_id, retry_index",
        )
        .bind(step_id)
        .bind(exclude_execution)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AttemptKey::from).collect())
    }

    async fn active_dependant_attempts(
        &self,
        step_id: i64,
        exclude_execution: i64,
    ) -> Result<Vec<AttemptKey>, StoreError> {
        let rows: Vec<KeyRow> = sqlx::query_as::<_, KeyRow>(
            "SELECT a.execution_id, a.step_id, a.retry_index \
             FROM stepline_attempts a \
             JOIN stepline_step_edges e ON e.step_id = a.step_id \
             JOIN stepline_executions x ON x.execution_id = a.execution_id \
             WHERE e.depends_on_step_id = $1 \
               AND a.execution_id <> $2 \
               AND a.status IN ('running', 'awaiting_retry') \
               AND x.dependency_mode \
             ORDER BY a.execution_id, a.step_id, a.retry_index",
        )
        .bind(step_id)
        .bind(exclude_execution)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AttemptKey::from).collect())
    }

    async fn active_dependency_attempts(
        &self,
        step_ids: &[i64],
        exclude_execution: i64,
    ) -> Result<Vec<AttemptKey>, StoreError> {
        let rows: Vec<KeyRow> = sqlx::query_as::<_, KeyRow>(
            "SELECT execution_id, step_id, retry_index FROM stepline_attempts \
             WHERE step_id = ANY($1) AND execution_id <> $2 \
               AND status IN ('running', 'awaiting_retry') \
             ORDER BY execution_id, step_id, retry_index",
        )
        .bind(step_ids)
        .bind(exclude_execution)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AttemptKey::from).collect())
    }

    async fn read_parameter_value(&self, parameter_id: i64) -> Result<Value, StoreError> {
        let value: Option<Value> =
            sqlx::query_scalar("SELECT value FROM stepline_parameters WHERE parameter_id = $1")
                .bind(parameter_id)
                .fetch_optional(&self.pool)
                .await?;
        value.ok_or(StoreError::ParameterNotFound { parameter_id })
    }

    async fn write_parameter_value(
        &self,
        parameter_id: i64,
        value: Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO stepline_parameters (parameter_id, value) VALUES ($1, $2) \
             ON CONFLICT (parameter_id) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(parameter_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn execution_dependency_mode(&self, execution_id: i64) -> Result<bool, StoreError> {
        let mode: Option<bool> = sqlx::query_scalar(
            "SELECT dependency_mode FROM stepline_executions WHERE execution_id = $1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;
        mode.ok_or(StoreError::ExecutionNotFound { execution_id })
    }

    async fn execution_outcome(
        &self,
        execution_id: i64,
    ) -> Result<Option<ExecutionOutcome>, StoreError> {
        let outcome: Option<Option<String>> =
            sqlx::query_scalar("SELECT outcome FROM stepline_executions WHERE execution_id = $1")
                .bind(execution_id)
                .fetch_optional(&self.pool)
                .await?;
        let outcome = outcome.ok_or(StoreError::ExecutionNotFound { execution_id })?;
        outcome
            .map(|raw| {
                raw.parse::<ExecutionOutcome>()
                    .map_err(|err| StoreError::Decode(err.to_string()))
            })
            .transpose()
    }
}
