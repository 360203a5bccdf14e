//! Database schema management for `floodwatch-ingest`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// DDL statements, applied in order inside one transaction.
const STATEMENTS: &[&str] = &[
    // Canonical readings; sensor/gateway ids double as the queryable metadata block
    r#"
    CREATE TABLE IF NOT EXISTS sensor_readings (
        id                  UUID PRIMARY KEY,
        sensor_id           TEXT             NOT NULL,
        gateway_id          TEXT,
        ts                  TIMESTAMPTZ      NOT NULL,
        received_at         TIMESTAMPTZ      NOT NULL,
        water_level_cm      DOUBLE PRECISION NOT NULL,
        rain_accumulated_mm DOUBLE PRECISION NOT NULL,
        flow_rate_lmin      DOUBLE PRECISION NOT NULL,
        temperature_c       DOUBLE PRECISION NOT NULL,
        humidity_percent    DOUBLE PRECISION NOT NULL,
        battery_percent     DOUBLE PRECISION NOT NULL,
        rssi                DOUBLE PRECISION,
        snr                 DOUBLE PRECISION,
        signal_quality      TEXT,
        seq                 BIGINT,
        wire_format         TEXT             NOT NULL
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_sensor_readings_sensor_ts
        ON sensor_readings (sensor_id, ts DESC);
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_sensor_readings_ts
        ON sensor_readings (ts DESC);
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_sensor_readings_gateway
        ON sensor_readings (gateway_id);
    "#,
    // Per-sensor thresholds, maintained by operators
    r#"
    CREATE TABLE IF NOT EXISTS sensors (
        sensor_id               TEXT PRIMARY KEY,
        name                    TEXT,
        enabled                 BOOLEAN     NOT NULL DEFAULT TRUE,
        water_level_critical_cm DOUBLE PRECISION,
        water_level_warning_cm  DOUBLE PRECISION,
        rainfall_heavy_mm       DOUBLE PRECISION,
        flow_excessive_lmin     DOUBLE PRECISION,
        lat                     DOUBLE PRECISION,
        lng                     DOUBLE PRECISION,
        updated_at              TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_sensors_enabled
        ON sensors (enabled);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gateways (
        gateway_id    TEXT PRIMARY KEY,
        name          TEXT        NOT NULL,
        lat           DOUBLE PRECISION,
        lng           DOUBLE PRECISION,
        status        TEXT        NOT NULL,
        last_seen     TIMESTAMPTZ NOT NULL,
        reading_count BIGINT      NOT NULL DEFAULT 0,
        registered_at TIMESTAMPTZ,
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    );
    "#,
    // Append-only alerts; rows older than the retention period are swept
    r#"
    CREATE TABLE IF NOT EXISTS alerts (
        id               UUID PRIMARY KEY,
        sensor_id        TEXT             NOT NULL,
        gateway_id       TEXT,
        alert_type       TEXT             NOT NULL,
        severity         TEXT             NOT NULL,
        value            DOUBLE PRECISION NOT NULL,
        threshold        DOUBLE PRECISION NOT NULL,
        message          TEXT             NOT NULL,
        detected_at      TIMESTAMPTZ      NOT NULL,
        status           TEXT             NOT NULL,
        acknowledged_at  TIMESTAMPTZ,
        acknowledged_by  TEXT,
        resolved_at      TIMESTAMPTZ,
        escalation_level INTEGER          NOT NULL DEFAULT 0
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_alerts_sensor_detected
        ON alerts (sensor_id, detected_at DESC);
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_alerts_status_detected
        ON alerts (status, detected_at DESC);
    "#,
];

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    for statement in STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::debug!(statements = STATEMENTS.len(), "schema ensured");
    Ok(())
}
