//! Database initialization
//!
//! Creates the database file on first run, applies the SQLite pragmas
//! required for concurrent use, creates every table idempotently, and
//! seeds default settings and reading slots.
//!
//! The partial unique index on `flow_readings` is the storage-level
//! enforcement of the one-active-reading-per-slot invariant: a second
//! non-rejected reading for the same (pipeline, date, slot) fails with
//! a unique violation even if two commits race past the probe query.

use flowline_common::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while a commit is in flight
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Busy timeout before `database is locked` surfaces to retry logic
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    // Idempotent schema creation
    create_settings_table(&pool).await?;
    create_reading_slots_table(&pool).await?;
    create_flow_readings_table(&pool).await?;
    create_flow_thresholds_table(&pool).await?;
    create_notifications_table(&pool).await?;
    create_user_authorities_table(&pool).await?;

    // Seed defaults
    init_default_settings(&pool).await?;
    seed_reading_slots(&pool).await?;

    Ok(pool)
}

async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_reading_slots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_slots (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            ends_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_flow_readings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flow_readings (
            id TEXT PRIMARY KEY,
            pipeline_id TEXT NOT NULL,
            reading_date TEXT NOT NULL,
            slot_id TEXT NOT NULL,
            pressure REAL,
            temperature REAL,
            flow_rate REAL,
            contained_volume REAL,
            recorded_by TEXT NOT NULL,
            recorded_at TEXT,
            notes TEXT,
            status TEXT NOT NULL,
            validated_by TEXT,
            validated_at TEXT,
            rejection_reason TEXT,
            version INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One non-rejected reading per slot; last line of defense for
    // concurrent submissions
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_flow_readings_active_slot
        ON flow_readings (pipeline_id, reading_date, slot_id)
        WHERE status != 'REJECTED'
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_flow_readings_status
        ON flow_readings (status)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_flow_thresholds_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flow_thresholds (
            id TEXT PRIMARY KEY,
            pipeline_id TEXT NOT NULL,
            pressure_min REAL,
            pressure_max REAL,
            temperature_min REAL,
            temperature_max REAL,
            flow_rate_min REAL,
            flow_rate_max REAL,
            contained_volume_min REAL,
            contained_volume_max REAL,
            alert_tolerance_percent REAL NOT NULL,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one active threshold per pipeline
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_flow_thresholds_active_pipeline
        ON flow_thresholds (pipeline_id)
        WHERE active = 1
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_notifications_table(pool: &SqlitePool) -> Result<()> {
    // One row per (event, recipient): read state is per-recipient
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id TEXT NOT NULL,
            recipient_id TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            severity TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            read_at TEXT,
            PRIMARY KEY (id, recipient_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_notifications_recipient_unread
        ON notifications (recipient_id, is_read)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_authorities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_authorities (
            user_id TEXT NOT NULL,
            authority TEXT NOT NULL,
            PRIMARY KEY (user_id, authority)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    super::settings::ensure_setting(pool, "heartbeat_interval_secs", "15").await?;
    super::settings::ensure_setting(pool, "heartbeat_miss_limit", "3").await?;
    super::settings::ensure_setting(pool, "session_queue_capacity", "64").await?;
    super::settings::ensure_setting(pool, "event_bus_capacity", "256").await?;
    super::settings::ensure_setting(pool, "reconnect_base_delay_ms", "500").await?;
    super::settings::ensure_setting(pool, "reconnect_max_delay_ms", "30000").await?;
    Ok(())
}

/// Seed the four default six-hour reading slots when the table is empty
async fn seed_reading_slots(pool: &SqlitePool) -> Result<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reading_slots")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let slots = [
        ("00:00 - 06:00", "00:00:00", "06:00:00"),
        ("06:00 - 12:00", "06:00:00", "12:00:00"),
        ("12:00 - 18:00", "12:00:00", "18:00:00"),
        ("18:00 - 24:00", "18:00:00", "23:59:59"),
    ];

    for (label, starts_at, ends_at) in slots {
        sqlx::query(
            "INSERT INTO reading_slots (id, label, starts_at, ends_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(label)
        .bind(starts_at)
        .bind(ends_at)
        .execute(pool)
        .await?;
    }

    info!("Seeded {} default reading slots", slots.len());
    Ok(())
}
