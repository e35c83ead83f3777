use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

const SCHEMA: [&str; 8] = [
    r#"
    CREATE TABLE IF NOT EXISTS obligations (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        owner_member_id TEXT,
        program_id UUID NOT NULL,
        slot INTEGER,
        label TEXT NOT NULL,
        amount_due NUMERIC(18, 2) NOT NULL CHECK (amount_due > 0),
        due_period JSONB,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS obligations_program_slot_idx
        ON obligations (program_id, slot)
        WHERE slot IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS obligations_owner_idx ON obligations (owner_member_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS settlements (
        id UUID PRIMARY KEY,
        obligation_id UUID NOT NULL REFERENCES obligations (id),
        declared_by_member_id TEXT NOT NULL,
        amount NUMERIC(18, 2) NOT NULL CHECK (amount > 0),
        method TEXT NOT NULL,
        external_reference TEXT,
        idempotency_key TEXT UNIQUE,
        on_behalf BOOLEAN NOT NULL DEFAULT FALSE,
        status TEXT NOT NULL,
        rejection_note TEXT,
        declared_at TIMESTAMPTZ NOT NULL,
        resolved_at TIMESTAMPTZ,
        resolved_by TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS settlements_obligation_idx
        ON settlements (obligation_id, declared_at)
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS settlements_confirmed_reference_idx
        ON settlements (method, external_reference)
        WHERE status = 'confirmed' AND external_reference IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_events (
        sequence BIGSERIAL PRIMARY KEY,
        stream_id UUID NOT NULL,
        kind TEXT NOT NULL,
        event JSONB NOT NULL,
        stored_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ledger_events_stream_idx ON ledger_events (stream_id, sequence)
    "#,
];

pub async fn connect_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    Ok(pool)
}

pub async fn bootstrap_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("failed to apply ledger schema")?;
    }
    info!("ledger schema ready");
    Ok(())
}
