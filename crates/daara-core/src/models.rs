use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

pub type MemberId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ObligationKind {
    RecurringDue,
    ProgramChapter,
    CampaignPledge,
}

impl ObligationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RecurringDue => "recurring-due",
            Self::ProgramChapter => "program-chapter",
            Self::CampaignPledge => "campaign-pledge",
        }
    }
}

impl fmt::Display for ObligationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObligationKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "recurring-due" => Ok(Self::RecurringDue),
            "program-chapter" => Ok(Self::ProgramChapter),
            "campaign-pledge" => Ok(Self::CampaignPledge),
            other => anyhow::bail!("unsupported obligation kind: {other}"),
        }
    }
}

/// Billing window of an obligation: a calendar month for dues, a date range otherwise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DuePeriod {
    Month { year: i32, month: u32 },
    Window { start: NaiveDate, end: NaiveDate },
}

impl DuePeriod {
    pub fn validate(&self) -> EngineResult<()> {
        match *self {
            Self::Month { year, month } => {
                if !(1..=12).contains(&month) {
                    return Err(EngineError::InvalidPeriod(format!(
                        "month must be between 1 and 12, got {month}"
                    )));
                }
                if !(1900..=9999).contains(&year) {
                    return Err(EngineError::InvalidPeriod(format!(
                        "year out of range: {year}"
                    )));
                }
                Ok(())
            }
            Self::Window { start, end } => {
                if end < start {
                    return Err(EngineError::InvalidPeriod(format!(
                        "window ends ({end}) before it starts ({start})"
                    )));
                }
                Ok(())
            }
        }
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        match *self {
            Self::Month { year, month } => {
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
                NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
            }
            Self::Window { end, .. } => Some(end),
        }
    }

    pub fn month_key(&self) -> String {
        match *self {
            Self::Month { year, month } => format!("{year:04}-{month:02}"),
            Self::Window { start, .. } => format!("{:04}-{:02}", start.year(), start.month()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Obligation {
    pub id: Uuid,
    pub kind: ObligationKind,
    pub owner_member_id: Option<MemberId>,
    pub program_id: Uuid,
    /// Chapter number inside a program; only set for `program-chapter`.
    pub slot: Option<u32>,
    pub label: String,
    pub amount_due: Decimal,
    pub due_period: Option<DuePeriod>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObligation {
    pub kind: ObligationKind,
    pub owner_member_id: Option<MemberId>,
    pub program_id: Uuid,
    #[serde(default)]
    pub slot: Option<u32>,
    pub label: String,
    pub amount_due: Decimal,
    #[serde(default)]
    pub due_period: Option<DuePeriod>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Unpaid,
    PartiallySettled,
    Settled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl SettlementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            other => anyhow::bail!("unsupported settlement status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentMethod {
    MobileWallet,
    Cash,
    BankTransfer,
    Other,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MobileWallet => "mobile-wallet",
            Self::Cash => "cash",
            Self::BankTransfer => "bank-transfer",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "mobile-wallet" => Ok(Self::MobileWallet),
            "cash" => Ok(Self::Cash),
            "bank-transfer" => Ok(Self::BankTransfer),
            "other" => Ok(Self::Other),
            other => anyhow::bail!("unsupported payment method: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settlement {
    pub id: Uuid,
    pub obligation_id: Uuid,
    pub declared_by_member_id: MemberId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub external_reference: Option<String>,
    pub idempotency_key: Option<String>,
    /// Declarer was not the obligation owner when the settlement was recorded.
    pub on_behalf: bool,
    pub status: SettlementStatus,
    pub rejection_note: Option<String>,
    pub declared_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<MemberId>,
}

impl Settlement {
    pub fn is_pending(&self) -> bool {
        self.status == SettlementStatus::Pending
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == SettlementStatus::Confirmed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSettlement {
    pub obligation_id: Uuid,
    pub declared_by_member_id: MemberId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}
