//! SQLite store implementation
//!
//! Backs all three store seams with one `sqlx::SqlitePool`. `commit`
//! runs a transaction combining the optimistic version check and the
//! slot-collision probe; the partial unique index on `flow_readings`
//! catches any race the probe misses and maps to `Conflict`.
//!
//! Transient `database is locked` errors are retried with exponential
//! backoff before propagating.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use flowline_common::model::{
    EntityRef, FlowReading, FlowThreshold, Measurements, NotificationEvent, SlotKey, Severity,
    ValidationStatus,
};
use flowline_common::{Error, Result};

use super::{Authority, AuthorityProvider, NotificationStore, ReadingStore};

/// Lock retry parameters: base 10 ms doubling to a 1 s cap, 5 attempts
const LOCK_RETRY_BASE_MS: u64 = 10;
const LOCK_RETRY_CAP_MS: u64 = 1000;
const LOCK_RETRY_ATTEMPTS: u32 = 5;

/// SQLite implementation of every store seam
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Retry an operation while it fails with `database is locked`
async fn with_lock_retry<F, Fut, T>(operation_name: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff_ms = LOCK_RETRY_BASE_MS;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Database operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = matches!(
                    &err,
                    Error::Database(db_err) if db_err.to_string().contains("database is locked")
                );
                if !is_lock_error || attempt >= LOCK_RETRY_ATTEMPTS {
                    return Err(err);
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(LOCK_RETRY_CAP_MS);
            }
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed")
    )
}

fn reading_from_row(row: &SqliteRow) -> Result<FlowReading> {
    let status: String = row.try_get("status")?;
    Ok(FlowReading {
        id: row.try_get("id")?,
        pipeline_id: row.try_get("pipeline_id")?,
        reading_date: row.try_get::<NaiveDate, _>("reading_date")?,
        slot_id: row.try_get("slot_id")?,
        measurements: Measurements {
            pressure: row.try_get("pressure")?,
            temperature: row.try_get("temperature")?,
            flow_rate: row.try_get("flow_rate")?,
            contained_volume: row.try_get("contained_volume")?,
        },
        recorded_by: row.try_get("recorded_by")?,
        recorded_at: row.try_get::<Option<DateTime<Utc>>, _>("recorded_at")?,
        notes: row.try_get("notes")?,
        status: ValidationStatus::parse(&status)?,
        validated_by: row.try_get("validated_by")?,
        validated_at: row.try_get::<Option<DateTime<Utc>>, _>("validated_at")?,
        rejection_reason: row.try_get("rejection_reason")?,
        version: row.try_get("version")?,
    })
}

fn threshold_from_row(row: &SqliteRow) -> Result<FlowThreshold> {
    Ok(FlowThreshold {
        id: row.try_get("id")?,
        pipeline_id: row.try_get("pipeline_id")?,
        pressure_min: row.try_get("pressure_min")?,
        pressure_max: row.try_get("pressure_max")?,
        temperature_min: row.try_get("temperature_min")?,
        temperature_max: row.try_get("temperature_max")?,
        flow_rate_min: row.try_get("flow_rate_min")?,
        flow_rate_max: row.try_get("flow_rate_max")?,
        contained_volume_min: row.try_get("contained_volume_min")?,
        contained_volume_max: row.try_get("contained_volume_max")?,
        alert_tolerance_percent: row.try_get("alert_tolerance_percent")?,
        active: row.try_get::<i64, _>("active")? != 0,
    })
}

fn notification_from_row(row: &SqliteRow) -> Result<NotificationEvent> {
    let severity: String = row.try_get("severity")?;
    let severity = match severity.as_str() {
        "NORMAL" => Severity::Normal,
        "HIGH" => Severity::High,
        "URGENT" => Severity::Urgent,
        other => {
            return Err(Error::Storage(format!(
                "unknown notification severity '{}'",
                other
            )))
        }
    };
    let entity_type: String = row.try_get("entity_type")?;
    let entity_id: Uuid = row.try_get("entity_id")?;
    let entity = match entity_type.as_str() {
        "reading" => EntityRef::Reading(entity_id),
        "pipeline" => EntityRef::Pipeline(entity_id),
        other => {
            return Err(Error::Storage(format!(
                "unknown notification entity type '{}'",
                other
            )))
        }
    };
    Ok(NotificationEvent {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        severity,
        entity,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn severity_code(severity: Severity) -> &'static str {
    match severity {
        Severity::Normal => "NORMAL",
        Severity::High => "HIGH",
        Severity::Urgent => "URGENT",
    }
}

fn entity_parts(entity: &EntityRef) -> (&'static str, Uuid) {
    match entity {
        EntityRef::Reading(id) => ("reading", *id),
        EntityRef::Pipeline(id) => ("pipeline", *id),
    }
}

#[async_trait]
impl ReadingStore for SqliteStore {
    async fn load(&self, id: Uuid) -> Result<Option<FlowReading>> {
        let row = sqlx::query("SELECT * FROM flow_readings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(reading_from_row).transpose()
    }

    async fn find_active_in_slot(&self, key: &SlotKey) -> Result<Option<FlowReading>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM flow_readings
            WHERE pipeline_id = ? AND reading_date = ? AND slot_id = ? AND status != 'REJECTED'
            "#,
        )
        .bind(key.pipeline_id)
        .bind(key.reading_date)
        .bind(key.slot_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(reading_from_row).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<FlowReading>> {
        let rows = sqlx::query(
            "SELECT * FROM flow_readings WHERE status = 'SUBMITTED' ORDER BY recorded_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(reading_from_row).collect()
    }

    async fn commit(&self, reading: FlowReading, expected_version: i64) -> Result<FlowReading> {
        with_lock_retry("reading commit", || {
            let reading = reading.clone();
            async move { commit_once(&self.pool, reading, expected_version).await }
        })
        .await
    }

    async fn active_threshold(&self, pipeline_id: Uuid) -> Result<Option<FlowThreshold>> {
        let row = sqlx::query(
            "SELECT * FROM flow_thresholds WHERE pipeline_id = ? AND active = 1",
        )
        .bind(pipeline_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(threshold_from_row).transpose()
    }

    async fn upsert_threshold(&self, threshold: FlowThreshold) -> Result<()> {
        threshold.validate()?;
        let mut tx = self.pool.begin().await?;

        if threshold.active {
            // The partial unique index allows only one active row per pipeline
            sqlx::query("UPDATE flow_thresholds SET active = 0 WHERE pipeline_id = ? AND id != ?")
                .bind(threshold.pipeline_id)
                .bind(threshold.id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO flow_thresholds (
                id, pipeline_id,
                pressure_min, pressure_max, temperature_min, temperature_max,
                flow_rate_min, flow_rate_max, contained_volume_min, contained_volume_max,
                alert_tolerance_percent, active
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(threshold.id)
        .bind(threshold.pipeline_id)
        .bind(threshold.pressure_min)
        .bind(threshold.pressure_max)
        .bind(threshold.temperature_min)
        .bind(threshold.temperature_max)
        .bind(threshold.flow_rate_min)
        .bind(threshold.flow_rate_max)
        .bind(threshold.contained_volume_min)
        .bind(threshold.contained_volume_max)
        .bind(threshold.alert_tolerance_percent)
        .bind(threshold.active as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// One transactional check-and-set attempt
async fn commit_once(
    pool: &SqlitePool,
    reading: FlowReading,
    expected_version: i64,
) -> Result<FlowReading> {
    let mut tx = pool.begin().await?;

    // Slot-collision probe: name the colliding reading when there is one
    if reading.status.occupies_slot() {
        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM flow_readings
            WHERE pipeline_id = ? AND reading_date = ? AND slot_id = ?
              AND status != 'REJECTED' AND id != ?
            "#,
        )
        .bind(reading.pipeline_id)
        .bind(reading.reading_date)
        .bind(reading.slot_id)
        .bind(reading.id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = existing {
            return Err(Error::Conflict {
                existing: Some(existing),
            });
        }
    }

    let mut committed = reading;
    committed.version = expected_version + 1;

    let result = if expected_version == 0 {
        sqlx::query(
            r#"
            INSERT INTO flow_readings (
                id, pipeline_id, reading_date, slot_id,
                pressure, temperature, flow_rate, contained_volume,
                recorded_by, recorded_at, notes, status,
                validated_by, validated_at, rejection_reason, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(committed.id)
        .bind(committed.pipeline_id)
        .bind(committed.reading_date)
        .bind(committed.slot_id)
        .bind(committed.measurements.pressure)
        .bind(committed.measurements.temperature)
        .bind(committed.measurements.flow_rate)
        .bind(committed.measurements.contained_volume)
        .bind(committed.recorded_by)
        .bind(committed.recorded_at)
        .bind(&committed.notes)
        .bind(committed.status.as_str())
        .bind(committed.validated_by)
        .bind(committed.validated_at)
        .bind(&committed.rejection_reason)
        .bind(committed.version)
        .execute(&mut *tx)
        .await
    } else {
        sqlx::query(
            r#"
            UPDATE flow_readings SET
                pressure = ?, temperature = ?, flow_rate = ?, contained_volume = ?,
                recorded_at = ?, notes = ?, status = ?,
                validated_by = ?, validated_at = ?, rejection_reason = ?, version = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(committed.measurements.pressure)
        .bind(committed.measurements.temperature)
        .bind(committed.measurements.flow_rate)
        .bind(committed.measurements.contained_volume)
        .bind(committed.recorded_at)
        .bind(&committed.notes)
        .bind(committed.status.as_str())
        .bind(committed.validated_by)
        .bind(committed.validated_at)
        .bind(&committed.rejection_reason)
        .bind(committed.version)
        .bind(committed.id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
    };

    match result {
        Ok(done) => {
            if expected_version != 0 && done.rows_affected() == 0 {
                // Version mismatch: someone committed in between
                return Err(Error::Conflict { existing: None });
            }
        }
        Err(err) if is_unique_violation(&err) => {
            // The partial unique index caught a racing insert
            return Err(Error::Conflict { existing: None });
        }
        Err(err) => return Err(err.into()),
    }

    tx.commit().await?;
    Ok(committed)
}

#[async_trait]
impl AuthorityProvider for SqliteStore {
    async fn has_authority(&self, user_id: Uuid, authority: Authority) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_authorities WHERE user_id = ? AND authority = ?)",
        )
        .bind(user_id)
        .bind(authority.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn holders(&self, authority: Authority) -> Result<Vec<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM user_authorities WHERE authority = ? ORDER BY user_id",
        )
        .bind(authority.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn append(&self, recipient: Uuid, event: &NotificationEvent) -> Result<()> {
        let (entity_type, entity_id) = entity_parts(&event.entity);
        with_lock_retry("notification append", || async {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO notifications (
                    id, recipient_id, title, message, severity,
                    entity_type, entity_id, created_at, is_read
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
                "#,
            )
            .bind(event.id)
            .bind(recipient)
            .bind(&event.title)
            .bind(&event.message)
            .bind(severity_code(event.severity))
            .bind(entity_type)
            .bind(entity_id)
            .bind(event.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn list_unread(&self, recipient: Uuid) -> Result<Vec<NotificationEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = ? AND is_read = 0
            ORDER BY created_at ASC
            "#,
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn count_unread(&self, recipient: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(recipient)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn mark_read(&self, recipient: Uuid, event_id: Uuid) -> Result<bool> {
        let known: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM notifications WHERE id = ? AND recipient_id = ?)",
        )
        .bind(event_id)
        .bind(recipient)
        .fetch_one(&self.pool)
        .await?;
        if !known {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE notifications SET is_read = 1, read_at = ?
            WHERE id = ? AND recipient_id = ? AND is_read = 0
            "#,
        )
        .bind(Utc::now())
        .bind(event_id)
        .bind(recipient)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }
}
