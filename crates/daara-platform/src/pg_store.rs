use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use daara_core::{
    DeleteOutcome, DomainEvent, DuePeriod, EventEnvelope, EventStore, InsertOutcome, LedgerStore,
    Obligation, ObligationFilter, PaymentMethod, Resolution, ResolveOutcome, Settlement,
    SettlementFilter, SettlementStatus, UpdateGuard, UpdateOutcome,
};
use daara_finance::check_confirmation;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow, types::Json};
use uuid::Uuid;

const OBLIGATION_COLUMNS: &str =
    "id, kind, owner_member_id, program_id, slot, label, amount_due, due_period, created_at";

const SETTLEMENT_COLUMNS: &str = "id, obligation_id, declared_by_member_id, amount, method, \
     external_reference, idempotency_key, on_behalf, status, rejection_note, declared_at, \
     resolved_at, resolved_by";

/// Postgres ledger. Every conditional write locks the obligation row with
/// `FOR UPDATE` for the length of its transaction, so guards hold across
/// processes sharing the database.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_obligation(
        tx: &mut Transaction<'_, Postgres>,
        obligation_id: Uuid,
    ) -> Result<Option<Obligation>> {
        let row = sqlx::query(&format!(
            "SELECT {OBLIGATION_COLUMNS} FROM obligations WHERE id = $1 FOR UPDATE"
        ))
        .bind(obligation_id)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(obligation_from_row).transpose()
    }

    async fn confirmed_with_reference<'e, E>(
        executor: E,
        settlement_id: Uuid,
        method: PaymentMethod,
        reference: &str,
    ) -> Result<Option<Uuid>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let existing = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM settlements
            WHERE status = 'confirmed'
              AND method = $1
              AND external_reference = $2
              AND id <> $3
            LIMIT 1
            "#,
        )
        .bind(method.as_str())
        .bind(reference)
        .bind(settlement_id)
        .fetch_optional(executor)
        .await?;
        Ok(existing)
    }

    async fn confirmed_total(
        tx: &mut Transaction<'_, Postgres>,
        obligation_id: Uuid,
    ) -> Result<Decimal> {
        let total = sqlx::query_scalar::<_, Option<Decimal>>(
            "SELECT SUM(amount) FROM settlements WHERE obligation_id = $1 AND status = 'confirmed'",
        )
        .bind(obligation_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(total.unwrap_or(Decimal::ZERO))
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_obligation(&self, obligation: &Obligation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO obligations (
                id, kind, owner_member_id, program_id, slot, label, amount_due, due_period, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(obligation.id)
        .bind(obligation.kind.as_str())
        .bind(&obligation.owner_member_id)
        .bind(obligation.program_id)
        .bind(slot_to_db(obligation.slot)?)
        .bind(&obligation.label)
        .bind(obligation.amount_due)
        .bind(obligation.due_period.map(Json))
        .bind(obligation.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert obligation {}", obligation.id))?;
        Ok(())
    }

    async fn update_obligation(
        &self,
        obligation: &Obligation,
        guard: UpdateGuard,
    ) -> Result<UpdateOutcome> {
        let mut tx = self.pool.begin().await?;
        if Self::lock_obligation(&mut tx, obligation.id).await?.is_none() {
            return Ok(UpdateOutcome::Missing);
        }
        if guard == UpdateGuard::NoConfirmedSettlements
            && Self::confirmed_total(&mut tx, obligation.id).await? > Decimal::ZERO
        {
            return Ok(UpdateOutcome::HasConfirmedSettlements);
        }

        sqlx::query(
            r#"
            UPDATE obligations
            SET owner_member_id = $2,
                slot = $3,
                label = $4,
                amount_due = $5,
                due_period = $6
            WHERE id = $1
            "#,
        )
        .bind(obligation.id)
        .bind(&obligation.owner_member_id)
        .bind(slot_to_db(obligation.slot)?)
        .bind(&obligation.label)
        .bind(obligation.amount_due)
        .bind(obligation.due_period.map(Json))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(UpdateOutcome::Applied)
    }

    async fn delete_obligation(&self, obligation_id: Uuid) -> Result<DeleteOutcome> {
        let mut tx = self.pool.begin().await?;
        if Self::lock_obligation(&mut tx, obligation_id).await?.is_none() {
            return Ok(DeleteOutcome::Missing);
        }
        let referenced =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM settlements WHERE obligation_id = $1")
                .bind(obligation_id)
                .fetch_one(&mut *tx)
                .await?;
        if referenced > 0 {
            return Ok(DeleteOutcome::Referenced(usize::try_from(referenced)?));
        }

        sqlx::query("DELETE FROM obligations WHERE id = $1")
            .bind(obligation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(DeleteOutcome::Deleted)
    }

    async fn obligation(&self, obligation_id: Uuid) -> Result<Option<Obligation>> {
        let row = sqlx::query(&format!(
            "SELECT {OBLIGATION_COLUMNS} FROM obligations WHERE id = $1"
        ))
        .bind(obligation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(obligation_from_row).transpose()
    }

    async fn obligations(&self, filter: &ObligationFilter) -> Result<Vec<Obligation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OBLIGATION_COLUMNS}
            FROM obligations
            WHERE ($1::text IS NULL OR owner_member_id = $1)
              AND ($2::uuid IS NULL OR program_id = $2)
              AND ($3::text IS NULL OR kind = $3)
              AND ($4::integer IS NULL OR slot = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at <= $6)
            ORDER BY created_at ASC, slot ASC NULLS FIRST, id ASC
            "#
        ))
        .bind(&filter.member)
        .bind(filter.program_id)
        .bind(filter.kind.map(|kind| kind.as_str()))
        .bind(slot_to_db(filter.slot)?)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(obligation_from_row).collect()
    }

    async fn insert_settlement(&self, settlement: &Settlement) -> Result<InsertOutcome> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO settlements ({SETTLEMENT_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#
        ))
        .bind(settlement.id)
        .bind(settlement.obligation_id)
        .bind(&settlement.declared_by_member_id)
        .bind(settlement.amount)
        .bind(settlement.method.as_str())
        .bind(&settlement.external_reference)
        .bind(&settlement.idempotency_key)
        .bind(settlement.on_behalf)
        .bind(settlement.status.as_str())
        .bind(&settlement.rejection_note)
        .bind(settlement.declared_at)
        .bind(settlement.resolved_at)
        .bind(&settlement.resolved_by)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to insert settlement {}", settlement.id))?;
        if inserted.rows_affected() == 1 {
            return Ok(InsertOutcome::Inserted);
        }

        let key = settlement
            .idempotency_key
            .as_deref()
            .with_context(|| format!("settlement {} was not inserted", settlement.id))?;
        let existing = self
            .settlement_by_idempotency_key(key)
            .await?
            .with_context(|| format!("idempotency key {key} conflicted but is not stored"))?;
        Ok(InsertOutcome::KeyTaken(existing))
    }

    async fn settlement(&self, settlement_id: Uuid) -> Result<Option<Settlement>> {
        let row = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE id = $1"
        ))
        .bind(settlement_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(settlement_from_row).transpose()
    }

    async fn settlements(&self, filter: &SettlementFilter) -> Result<Vec<Settlement>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SETTLEMENT_COLUMNS}
            FROM settlements
            WHERE ($1::uuid[] IS NULL OR obligation_id = ANY($1))
              AND ($2::text IS NULL OR declared_by_member_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::text IS NULL OR method = $4)
              AND ($5::text IS NULL OR external_reference = $5)
              AND ($6::timestamptz IS NULL OR declared_at < $6)
            ORDER BY declared_at ASC, id ASC
            "#
        ))
        .bind(&filter.obligation_ids)
        .bind(&filter.declared_by)
        .bind(filter.status.map(|status| status.as_str()))
        .bind(filter.method.map(|method| method.as_str()))
        .bind(&filter.external_reference)
        .bind(filter.declared_before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(settlement_from_row).collect()
    }

    async fn settlement_by_idempotency_key(&self, key: &str) -> Result<Option<Settlement>> {
        let row = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(settlement_from_row).transpose()
    }

    async fn resolve_settlement(
        &self,
        settlement_id: Uuid,
        resolved_by: &str,
        resolved_at: DateTime<Utc>,
        resolution: &Resolution,
    ) -> Result<ResolveOutcome> {
        let mut tx = self.pool.begin().await?;

        let obligation_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT obligation_id FROM settlements WHERE id = $1",
        )
        .bind(settlement_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(obligation_id) = obligation_id else {
            return Ok(ResolveOutcome::Missing);
        };
        // Obligation row first, matching update and delete.
        let Some(obligation) = Self::lock_obligation(&mut tx, obligation_id).await? else {
            return Ok(ResolveOutcome::Missing);
        };

        let row = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE id = $1 FOR UPDATE"
        ))
        .bind(settlement_id)
        .fetch_one(&mut *tx)
        .await?;
        let mut resolved = settlement_from_row(&row)?;
        if !resolved.is_pending() {
            return Ok(ResolveOutcome::NotPending(resolved));
        }

        match resolution {
            Resolution::Confirm {
                expected_confirmed_total,
            } => {
                let current_total = Self::confirmed_total(&mut tx, obligation_id).await?;
                if current_total != *expected_confirmed_total {
                    return Ok(ResolveOutcome::TotalChanged { current_total });
                }
                if check_confirmation(&obligation, current_total, resolved.amount).is_err() {
                    return Ok(ResolveOutcome::CeilingExceeded {
                        amount_due: obligation.amount_due,
                        confirmed_total: current_total,
                    });
                }
                if let Some(reference) = &resolved.external_reference
                    && let Some(existing) = Self::confirmed_with_reference(
                        &mut *tx,
                        settlement_id,
                        resolved.method,
                        reference,
                    )
                    .await?
                {
                    return Ok(ResolveOutcome::ReferenceTaken { existing });
                }
                resolved.status = SettlementStatus::Confirmed;
            }
            Resolution::Reject { note } => {
                resolved.status = SettlementStatus::Rejected;
                resolved.rejection_note = note.clone();
            }
        }
        resolved.resolved_at = Some(resolved_at);
        resolved.resolved_by = Some(resolved_by.to_string());

        let updated = sqlx::query(
            r#"
            UPDATE settlements
            SET status = $2,
                rejection_note = $3,
                resolved_at = $4,
                resolved_by = $5
            WHERE id = $1
            "#,
        )
        .bind(settlement_id)
        .bind(resolved.status.as_str())
        .bind(&resolved.rejection_note)
        .bind(resolved.resolved_at)
        .bind(&resolved.resolved_by)
        .execute(&mut *tx)
        .await;
        if let Err(err) = updated {
            // A concurrent confirmation on another obligation took the reference first.
            let reference_race = err
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation());
            drop(tx);
            if let (true, Some(reference)) = (reference_race, &resolved.external_reference)
                && let Some(existing) = Self::confirmed_with_reference(
                    &self.pool,
                    settlement_id,
                    resolved.method,
                    reference,
                )
                .await?
            {
                return Ok(ResolveOutcome::ReferenceTaken { existing });
            }
            return Err(err.into());
        }
        tx.commit().await?;

        Ok(ResolveOutcome::Applied(resolved))
    }
}

#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, stream_id: Uuid, event: DomainEvent) -> Result<EventEnvelope> {
        let kind = serde_json::to_value(event.kind)?;
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_events (stream_id, kind, event)
            VALUES ($1, $2, $3)
            RETURNING sequence, stored_at
            "#,
        )
        .bind(stream_id)
        .bind(kind.as_str().unwrap_or_default())
        .bind(Json(&event))
        .fetch_one(&self.pool)
        .await?;

        Ok(EventEnvelope {
            sequence: row.try_get("sequence")?,
            stream_id,
            event,
            stored_at: row.try_get("stored_at")?,
        })
    }

    async fn stream(&self, stream_id: Uuid) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT sequence, stream_id, event, stored_at
            FROM ledger_events
            WHERE stream_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let Json(event): Json<DomainEvent> = row.try_get("event")?;
            items.push(EventEnvelope {
                sequence: row.try_get("sequence")?,
                stream_id: row.try_get("stream_id")?,
                event,
                stored_at: row.try_get("stored_at")?,
            });
        }
        Ok(items)
    }
}

fn slot_to_db(slot: Option<u32>) -> Result<Option<i32>> {
    slot.map(i32::try_from)
        .transpose()
        .context("slot number out of range")
}

fn obligation_from_row(row: &PgRow) -> Result<Obligation> {
    let kind: String = row.try_get("kind")?;
    let slot: Option<i32> = row.try_get("slot")?;
    let due_period: Option<Json<DuePeriod>> = row.try_get("due_period")?;

    Ok(Obligation {
        id: row.try_get("id")?,
        kind: kind.parse()?,
        owner_member_id: row.try_get("owner_member_id")?,
        program_id: row.try_get("program_id")?,
        slot: slot
            .map(u32::try_from)
            .transpose()
            .context("stored slot is negative")?,
        label: row.try_get("label")?,
        amount_due: row.try_get("amount_due")?,
        due_period: due_period.map(|Json(period)| period),
        created_at: row.try_get("created_at")?,
    })
}

fn settlement_from_row(row: &PgRow) -> Result<Settlement> {
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;

    Ok(Settlement {
        id: row.try_get("id")?,
        obligation_id: row.try_get("obligation_id")?,
        declared_by_member_id: row.try_get("declared_by_member_id")?,
        amount: row.try_get("amount")?,
        method: method.parse()?,
        external_reference: row.try_get("external_reference")?,
        idempotency_key: row.try_get("idempotency_key")?,
        on_behalf: row.try_get("on_behalf")?,
        status: status.parse()?,
        rejection_note: row.try_get("rejection_note")?,
        declared_at: row.try_get("declared_at")?,
        resolved_at: row.try_get("resolved_at")?,
        resolved_by: row.try_get("resolved_by")?,
    })
}
