use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use daara_core::{
    DuePeriod, EngineError, MemberId, ObligationKind, PaymentMethod, Settlement, SettlementStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SETTLEMENTS_CONFIRMED_CHANNEL: &str = "settlements.confirmed";
pub const SETTLEMENTS_REJECTED_CHANNEL: &str = "settlements.rejected";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclareSettlementRequest {
    /// Defaults to the acting member.
    pub declared_by_member_id: Option<MemberId>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReassignRequest {
    pub owner_member_id: Option<MemberId>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviseAmountRequest {
    pub amount_due: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectSettlementRequest {
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSlotsRequest {
    pub label_prefix: String,
    pub count: Option<u32>,
    pub amount_due: Decimal,
    pub due_period: Option<DuePeriod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignSlotsRequest {
    /// Slot number to new owner; `null` vacates the slot.
    pub assignments: BTreeMap<u32, Option<MemberId>>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueDuesRequest {
    pub members: Vec<MemberId>,
    pub period: DuePeriod,
    pub amount_due: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObligationQuery {
    pub member: Option<MemberId>,
    pub program: Option<Uuid>,
    pub kind: Option<ObligationKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingQuery {
    pub declared_by: Option<MemberId>,
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioQuery {
    pub program: Option<Uuid>,
    pub kind: Option<ObligationKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryQuery {
    pub group_by: Option<String>,
    pub program: Option<Uuid>,
    pub kind: Option<ObligationKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error_kind: String,
    pub message: String,
}

impl From<&EngineError> for ErrorResponse {
    fn from(err: &EngineError) -> Self {
        Self {
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem<K, T> {
    pub key: K,
    pub result: Option<T>,
    pub error: Option<ErrorResponse>,
}

impl<K, T> BatchItem<K, T> {
    pub fn from_result(key: K, result: Result<T, EngineError>) -> Self {
        match result {
            Ok(value) => Self {
                key,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                key,
                result: None,
                error: Some(ErrorResponse::from(&err)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsResponse<T> {
    pub items: Vec<T>,
}

/// Published on the Redis bus whenever a settlement leaves `pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementResolvedEvent {
    pub settlement_id: Uuid,
    pub obligation_id: Uuid,
    pub status: SettlementStatus,
    pub amount: Decimal,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl SettlementResolvedEvent {
    pub fn channel(&self) -> &'static str {
        match self.status {
            SettlementStatus::Rejected => SETTLEMENTS_REJECTED_CHANNEL,
            _ => SETTLEMENTS_CONFIRMED_CHANNEL,
        }
    }
}

impl From<&Settlement> for SettlementResolvedEvent {
    fn from(settlement: &Settlement) -> Self {
        Self {
            settlement_id: settlement.id,
            obligation_id: settlement.obligation_id,
            status: settlement.status,
            amount: settlement.amount,
            resolved_by: settlement.resolved_by.clone(),
            resolved_at: settlement.resolved_at,
            note: settlement.rejection_note.clone(),
        }
    }
}
