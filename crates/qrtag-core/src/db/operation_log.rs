//! Durable operation log (the sync queue)

use std::str::FromStr;
use std::time::Duration;

use libsql::{params, Connection, Row};

use super::rows::{count, optional_text};
use crate::error::{Error, Result};
use crate::models::{FailureOutcome, Operation, OperationKind, OperationPayload, OperationState};
use crate::sync::backoff::BackoffPolicy;

const OPERATION_COLUMNS: &str =
    "local_id, payload, state, created_at, attempt_count, next_retry_at, last_error";

/// Trait for operation log storage (async)
///
/// Operations leave the log when they succeed or are rejected; abandoned ones
/// stay behind in the dead-letter state until retried or discarded.
#[allow(async_fn_in_trait)]
pub trait OperationLog {
    /// Get an operation by key
    async fn get(&self, local_id: i64) -> Result<Option<Operation>>;

    /// Append an operation; returns its key.
    ///
    /// A `DeleteEvent` cancels the queued code work of the same event.
    async fn enqueue(&self, payload: &OperationPayload, now: i64) -> Result<i64>;

    /// Oldest operation that may be sent now
    async fn peek_next(&self, now: i64) -> Result<Option<Operation>> {
        Ok(self.ready(now, 1).await?.into_iter().next())
    }

    /// Eligible operations in FIFO order, at most one per entity.
    ///
    /// An operation is eligible when it is queued, its retry time has passed,
    /// and no older operation of the same entity is still in the log.
    async fn ready(&self, now: i64, limit: usize) -> Result<Vec<Operation>>;

    async fn mark_in_flight(&self, local_id: i64) -> Result<()>;

    /// Remove a confirmed operation. Removing a missing one is a no-op.
    async fn mark_succeeded(&self, local_id: i64) -> Result<()>;

    /// Record a transient failure and reschedule with backoff, or abandon
    /// once the retry ceiling is reached
    async fn mark_failed(&self, local_id: i64, error: &str, now: i64) -> Result<FailureOutcome>;

    /// Move an operation to dead-letter
    async fn abandon(&self, local_id: i64, error: &str) -> Result<()>;

    /// Return an in-flight operation to the queue without counting an attempt
    async fn release(&self, local_id: i64) -> Result<()>;

    /// Return every in-flight operation to the queue; returns how many
    async fn recover_in_flight(&self) -> Result<u64>;

    /// Dead-lettered operations, oldest first
    async fn dead_letters(&self) -> Result<Vec<Operation>>;

    /// Requeue a dead letter with a fresh attempt budget
    async fn retry_dead_letter(&self, local_id: i64, now: i64) -> Result<()>;

    /// Drop a dead letter from the log; returns it
    async fn discard_dead_letter(&self, local_id: i64) -> Result<Operation>;

    /// Queued and in-flight operations, oldest first
    async fn pending(&self) -> Result<Vec<Operation>>;

    /// Number of queued and in-flight operations
    async fn pending_count(&self) -> Result<u64>;

    async fn dead_letter_count(&self) -> Result<u64>;

    /// Point every operation that targets `temp_id` at `remote_id`
    async fn substitute_entity_id(&self, temp_id: &str, remote_id: &str) -> Result<u64>;

    /// Remove every operation of an entity except `keep`; returns how many
    async fn cancel_for_entity(&self, entity_key: &str, keep: Option<i64>) -> Result<u64>;

    /// Entities with operations still in the log, in any state
    async fn pending_entities(&self) -> Result<Vec<String>>;
}

/// libSQL implementation of `OperationLog`
pub struct LibSqlOperationLog<'a> {
    conn: &'a Connection,
    backoff: BackoffPolicy,
}

impl<'a> LibSqlOperationLog<'a> {
    /// Create a new log with the default backoff policy
    pub fn new(conn: &'a Connection) -> Self {
        Self::with_backoff(conn, BackoffPolicy::default())
    }

    pub const fn with_backoff(conn: &'a Connection, backoff: BackoffPolicy) -> Self {
        Self { conn, backoff }
    }

    fn parse_operation(row: &Row) -> Result<Operation> {
        let payload: String = row.get(1)?;
        let state: String = row.get(2)?;
        let attempt_count: i64 = row.get(4)?;

        Ok(Operation {
            local_id: row.get(0)?,
            payload: serde_json::from_str(&payload)?,
            state: OperationState::from_str(&state).map_err(Error::Database)?,
            created_at: row.get(3)?,
            attempt_count: u32::try_from(attempt_count).unwrap_or(u32::MAX),
            next_retry_at: row.get(5)?,
            last_error: optional_text(row, 6)?,
        })
    }

    async fn query_operations(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<Operation>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(Self::parse_operation(&row)?);
        }
        Ok(operations)
    }

    async fn count_where(&self, condition: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(&format!("SELECT COUNT(*) FROM operations WHERE {condition}"), ())
            .await?;
        match rows.next().await? {
            Some(row) => count(&row, 0),
            None => Ok(0),
        }
    }

    async fn require(&self, local_id: i64) -> Result<Operation> {
        self.get(local_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("operation {local_id}")))
    }
}

impl OperationLog for LibSqlOperationLog<'_> {
    async fn get(&self, local_id: i64) -> Result<Option<Operation>> {
        let operations = self
            .query_operations(
                &format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE local_id = ?"),
                [local_id],
            )
            .await?;
        Ok(operations.into_iter().next())
    }

    async fn enqueue(&self, payload: &OperationPayload, now: i64) -> Result<i64> {
        let kind = payload.kind();

        if kind == OperationKind::DeleteEvent {
            let cancelled = self
                .conn
                .execute(
                    "DELETE FROM operations
                     WHERE entity_key = ?1 AND state = 'queued' AND kind IN (?2, ?3)",
                    [
                        payload.event_id(),
                        OperationKind::AddCode.as_str(),
                        OperationKind::ProcessCodes.as_str(),
                    ],
                )
                .await?;
            if cancelled > 0 {
                tracing::debug!(
                    "Cancelled {cancelled} queued operation(s) superseded by delete of {}",
                    payload.event_id()
                );
            }
        }

        let json = serde_json::to_string(payload)?;
        self.conn
            .execute(
                "INSERT INTO operations (kind, entity_key, payload, state, created_at,
                    attempt_count, next_retry_at)
                 VALUES (?1, ?2, ?3, 'queued', ?4, 0, ?4)",
                params![kind.as_str(), payload.event_id(), json, now],
            )
            .await?;

        let local_id = self.conn.last_insert_rowid();
        tracing::debug!("Enqueued {kind} #{local_id} for {}", payload.event_id());
        Ok(local_id)
    }

    async fn ready(&self, now: i64, limit: usize) -> Result<Vec<Operation>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_operations(
            &format!(
                "SELECT {OPERATION_COLUMNS} FROM operations AS op
                 WHERE op.state = 'queued'
                   AND op.next_retry_at <= ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM operations AS earlier
                       WHERE earlier.entity_key = op.entity_key
                         AND (earlier.local_id < op.local_id OR earlier.state = 'in_flight')
                   )
                 ORDER BY op.local_id ASC
                 LIMIT ?2"
            ),
            params![now, limit],
        )
        .await
    }

    async fn mark_in_flight(&self, local_id: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations SET state = 'in_flight' WHERE local_id = ? AND state = 'queued'",
                [local_id],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("queued operation {local_id}")));
        }
        Ok(())
    }

    async fn mark_succeeded(&self, local_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM operations WHERE local_id = ?", [local_id])
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, local_id: i64, error: &str, now: i64) -> Result<FailureOutcome> {
        let operation = self.require(local_id).await?;
        let attempt = operation.attempt_count.saturating_add(1);

        if self.backoff.is_exhausted(attempt) {
            self.conn
                .execute(
                    "UPDATE operations SET state = 'dead_letter', attempt_count = ?1, last_error = ?2
                     WHERE local_id = ?3",
                    params![i64::from(attempt), error, local_id],
                )
                .await?;
            tracing::warn!(
                "Abandoned {} #{local_id} after {attempt} attempts: {error}",
                operation.kind()
            );
            return Ok(FailureOutcome::Abandoned { attempt });
        }

        let delay = self.backoff.delay_for(attempt);
        let next_retry_at = now.saturating_add(duration_millis(delay));
        self.conn
            .execute(
                "UPDATE operations SET state = 'queued', attempt_count = ?1, next_retry_at = ?2,
                    last_error = ?3
                 WHERE local_id = ?4",
                params![i64::from(attempt), next_retry_at, error, local_id],
            )
            .await?;
        tracing::warn!(
            "{} #{local_id} failed (attempt {attempt}/{}), retrying in {delay:?}: {error}",
            operation.kind(),
            self.backoff.max_attempts
        );

        Ok(FailureOutcome::Rescheduled {
            attempt,
            delay,
            next_retry_at,
        })
    }

    async fn abandon(&self, local_id: i64, error: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations SET state = 'dead_letter', last_error = ?1 WHERE local_id = ?2",
                params![error, local_id],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("operation {local_id}")));
        }
        Ok(())
    }

    async fn release(&self, local_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE operations SET state = 'queued' WHERE local_id = ? AND state = 'in_flight'",
                [local_id],
            )
            .await?;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations SET state = 'queued' WHERE state = 'in_flight'",
                (),
            )
            .await?;
        if rows > 0 {
            tracing::info!("Requeued {rows} operation(s) interrupted by shutdown");
        }
        Ok(rows)
    }

    async fn dead_letters(&self) -> Result<Vec<Operation>> {
        self.query_operations(
            &format!(
                "SELECT {OPERATION_COLUMNS} FROM operations
                 WHERE state = 'dead_letter' ORDER BY local_id ASC"
            ),
            (),
        )
        .await
    }

    async fn retry_dead_letter(&self, local_id: i64, now: i64) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE operations SET state = 'queued', attempt_count = 0, next_retry_at = ?1
                 WHERE local_id = ?2 AND state = 'dead_letter'",
                params![now, local_id],
            )
            .await?;
        if rows == 0 {
            return Err(Error::NotFound(format!("dead-lettered operation {local_id}")));
        }
        Ok(())
    }

    async fn discard_dead_letter(&self, local_id: i64) -> Result<Operation> {
        let operation = self.require(local_id).await?;
        if operation.state != OperationState::DeadLetter {
            return Err(Error::InvalidInput(format!(
                "operation {local_id} is {}, not dead-lettered",
                operation.state.as_str()
            )));
        }
        self.mark_succeeded(local_id).await?;
        Ok(operation)
    }

    async fn pending(&self) -> Result<Vec<Operation>> {
        self.query_operations(
            &format!(
                "SELECT {OPERATION_COLUMNS} FROM operations
                 WHERE state IN ('queued', 'in_flight') ORDER BY local_id ASC"
            ),
            (),
        )
        .await
    }

    async fn pending_count(&self) -> Result<u64> {
        self.count_where("state IN ('queued', 'in_flight')").await
    }

    async fn dead_letter_count(&self) -> Result<u64> {
        self.count_where("state = 'dead_letter'").await
    }

    async fn substitute_entity_id(&self, temp_id: &str, remote_id: &str) -> Result<u64> {
        let operations = self
            .query_operations(
                &format!("SELECT {OPERATION_COLUMNS} FROM operations WHERE entity_key = ?"),
                [temp_id],
            )
            .await?;

        let mut updated = 0;
        for mut operation in operations {
            operation.payload.substitute_event_id(temp_id, remote_id);
            let json = serde_json::to_string(&operation.payload)?;
            updated += self
                .conn
                .execute(
                    "UPDATE operations SET entity_key = ?1, payload = ?2 WHERE local_id = ?3",
                    params![remote_id, json, operation.local_id],
                )
                .await?;
        }
        Ok(updated)
    }

    async fn cancel_for_entity(&self, entity_key: &str, keep: Option<i64>) -> Result<u64> {
        let rows = self
            .conn
            .execute(
                "DELETE FROM operations WHERE entity_key = ?1 AND local_id != ?2",
                params![entity_key, keep.unwrap_or(-1)],
            )
            .await?;
        Ok(rows)
    }

    async fn pending_entities(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query("SELECT DISTINCT entity_key FROM operations", ())
            .await?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            entities.push(row.get(0)?);
        }
        Ok(entities)
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
