use chrono::{Duration, Utc};
use daara_core::{
    DomainEventKind, EngineError, EngineResult, Resolution, ResolveOutcome, Settlement,
    SettlementFilter, SettlementStatus,
};
use daara_finance::{check_confirmation, settled_amount};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{CONFIRM_ATTEMPTS, SettlementEngine, normalize_text};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ExpirySummary {
    pub rejected: Vec<Uuid>,
    /// Settlements resolved by someone else between listing and rejecting.
    pub skipped: usize,
}

impl SettlementEngine {
    /// `pending -> confirmed`. A settlement that would overflow the amount
    /// due stays `pending` for manual reconciliation.
    pub async fn confirm(&self, settlement_id: Uuid, resolved_by: &str) -> EngineResult<Settlement> {
        let declared = self.pending_settlement(settlement_id, SettlementStatus::Confirmed).await?;
        let obligation_id = declared.obligation_id;
        let _guard = self.locks.acquire(obligation_id).await;

        for attempt in 1..=CONFIRM_ATTEMPTS {
            let obligation = self.get_obligation(obligation_id).await?;
            let ledger = self.obligation_settlements(obligation_id).await?;
            let Some(current) = ledger.iter().find(|s| s.id == settlement_id) else {
                return Err(EngineError::SettlementNotFound(settlement_id));
            };
            if !current.is_pending() {
                return Err(EngineError::InvalidTransition {
                    settlement_id,
                    from: current.status,
                    to: SettlementStatus::Confirmed,
                });
            }

            let confirmed_total = settled_amount(&obligation, &ledger);
            if let Err(err) = check_confirmation(&obligation, confirmed_total, current.amount) {
                warn!("settlement {settlement_id} left pending: {err}");
                return Err(err);
            }

            let resolution = Resolution::Confirm {
                expected_confirmed_total: confirmed_total,
            };
            match self
                .store
                .resolve_settlement(settlement_id, resolved_by, Utc::now(), &resolution)
                .await?
            {
                ResolveOutcome::Applied(confirmed) => {
                    info!(
                        "settlement {settlement_id} confirmed by {resolved_by}: {} toward obligation {obligation_id}",
                        confirmed.amount
                    );
                    self.record(
                        obligation_id,
                        DomainEventKind::SettlementConfirmed,
                        Some(resolved_by),
                        json!(confirmed),
                    )
                    .await;
                    return Ok(confirmed);
                }
                ResolveOutcome::Missing => {
                    return Err(EngineError::SettlementNotFound(settlement_id));
                }
                ResolveOutcome::NotPending(resolved) => {
                    return Err(EngineError::InvalidTransition {
                        settlement_id,
                        from: resolved.status,
                        to: SettlementStatus::Confirmed,
                    });
                }
                ResolveOutcome::TotalChanged { current_total } => {
                    warn!(
                        "confirmed total of obligation {obligation_id} moved from {confirmed_total} to {current_total} (attempt {attempt})"
                    );
                }
                ResolveOutcome::CeilingExceeded {
                    amount_due,
                    confirmed_total,
                } => {
                    let err = EngineError::OverpaymentDetected {
                        obligation_id,
                        amount_due,
                        confirmed: confirmed_total,
                        attempted: current.amount,
                    };
                    warn!("settlement {settlement_id} left pending: {err}");
                    return Err(err);
                }
                ResolveOutcome::ReferenceTaken { existing } => {
                    let reference = current.external_reference.clone().unwrap_or_default();
                    warn!(
                        "settlement {settlement_id} reuses reference {reference} of confirmed settlement {existing}"
                    );
                    return Err(EngineError::DuplicateReference {
                        reference,
                        existing,
                    });
                }
            }
        }

        Err(EngineError::Storage(format!(
            "confirmed total of obligation {obligation_id} kept changing; retry the confirmation"
        )))
    }

    pub async fn reject(
        &self,
        settlement_id: Uuid,
        resolved_by: &str,
        note: Option<String>,
    ) -> EngineResult<Settlement> {
        let declared = self.pending_settlement(settlement_id, SettlementStatus::Rejected).await?;
        let obligation_id = declared.obligation_id;
        let _guard = self.locks.acquire(obligation_id).await;

        let resolution = Resolution::Reject {
            note: normalize_text(note),
        };
        match self
            .store
            .resolve_settlement(settlement_id, resolved_by, Utc::now(), &resolution)
            .await?
        {
            ResolveOutcome::Applied(rejected) => {
                info!("settlement {settlement_id} rejected by {resolved_by}");
                self.record(
                    obligation_id,
                    DomainEventKind::SettlementRejected,
                    Some(resolved_by),
                    json!(rejected),
                )
                .await;
                Ok(rejected)
            }
            ResolveOutcome::Missing => Err(EngineError::SettlementNotFound(settlement_id)),
            ResolveOutcome::NotPending(resolved) => Err(EngineError::InvalidTransition {
                settlement_id,
                from: resolved.status,
                to: SettlementStatus::Rejected,
            }),
            ResolveOutcome::TotalChanged { .. }
            | ResolveOutcome::CeilingExceeded { .. }
            | ResolveOutcome::ReferenceTaken { .. } => Err(EngineError::Storage(
                "store applied a confirmation guard to a rejection".to_string(),
            )),
        }
    }

    /// Rejects every settlement still pending after `max_age`.
    pub async fn expire_pending(
        &self,
        max_age: Duration,
        resolved_by: &str,
    ) -> EngineResult<ExpirySummary> {
        let cutoff = Utc::now() - max_age;
        let stale = self
            .list_pending(SettlementFilter {
                declared_before: Some(cutoff),
                ..SettlementFilter::default()
            })
            .await?;

        let note = format!(
            "expired after {} days without validation",
            max_age.num_days()
        );
        let mut summary = ExpirySummary::default();
        for settlement in stale {
            match self.reject(settlement.id, resolved_by, Some(note.clone())).await {
                Ok(rejected) => summary.rejected.push(rejected.id),
                Err(EngineError::InvalidTransition { .. } | EngineError::SettlementNotFound(_)) => {
                    summary.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if !summary.rejected.is_empty() {
            info!(
                "expired {} pending settlement(s) older than {cutoff}",
                summary.rejected.len()
            );
        }
        Ok(summary)
    }

    async fn pending_settlement(
        &self,
        settlement_id: Uuid,
        target: SettlementStatus,
    ) -> EngineResult<Settlement> {
        let settlement = self.get_settlement(settlement_id).await?;
        if !settlement.is_pending() {
            return Err(EngineError::InvalidTransition {
                settlement_id,
                from: settlement.status,
                to: target,
            });
        }
        Ok(settlement)
    }
}
