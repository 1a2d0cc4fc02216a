use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub const KIND_TX: &str = "tx";
pub const KIND_INTERNAL_TX: &str = "internaltx";
pub const KIND_TOKEN_TX: &str = "tokentx";

pub const ORIGIN_DAPP: &str = "dapp";
pub const ORIGIN_INTERNAL: &str = "internal";
pub const ORIGIN_HISTORY: &str = "history";

/// Lifecycle of a tracked transaction.
///
/// `Unapproved -> Approved -> Signed -> Submitted -> Confirmed | Failed`, with the
/// side exits `Unapproved -> Rejected` and `Approved | Signed | Submitted -> Cancelled`
/// (a same-nonce replacement landed first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Unapproved,
    Approved,
    Signed,
    Submitted,
    Confirmed,
    Failed,
    Rejected,
    Cancelled,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Unapproved => "unapproved",
            TxStatus::Approved => "approved",
            TxStatus::Signed => "signed",
            TxStatus::Submitted => "submitted",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
            TxStatus::Rejected => "rejected",
            TxStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed | TxStatus::Failed | TxStatus::Rejected | TxStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        use TxStatus::*;
        match (self, next) {
            (Unapproved, Approved) | (Unapproved, Rejected) => true,
            (Approved, Signed) | (Approved, Cancelled) => true,
            (Signed, Submitted) | (Signed, Cancelled) => true,
            (Submitted, Confirmed) | (Submitted, Cancelled) => true,
            // configuration and validation failures can hit any non-terminal state
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl Display for TxStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "unapproved" => TxStatus::Unapproved,
            "approved" => TxStatus::Approved,
            "signed" => TxStatus::Signed,
            "submitted" => TxStatus::Submitted,
            "confirmed" => TxStatus::Confirmed,
            "failed" => TxStatus::Failed,
            "rejected" => TxStatus::Rejected,
            "cancelled" => TxStatus::Cancelled,
            _ => return Err(format!("Unknown transaction status: {}", s)),
        })
    }
}

/// One row of `transactions`: a lifecycle record (`kind = tx`, local origin) or a
/// history record mirrored from an explorer. Quantities are 0x hex strings.
#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TxDao {
    pub id: String,
    pub owner_addr: String,
    pub chain_type: String,
    pub kind: String,
    pub chain_id: i64,
    pub from_addr: String,
    pub to_addr: Option<String>,
    pub val: String,
    #[serde(skip_serializing)]
    pub call_data: Option<String>,
    pub method_id: Option<String>,
    pub nonce: Option<String>,
    pub gas_limit: Option<String>,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub status: String,
    pub origin: String,
    pub created_date: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub signed_raw_data: Option<String>,
    pub tx_hash: Option<String>,
    pub submitted_date: Option<DateTime<Utc>>,
    pub block_number: Option<i64>,
    pub confirm_date: Option<DateTime<Utc>>,
    pub gas_used: Option<String>,
    pub is_contract_recipient: bool,
    pub speed_up_of: Option<String>,
    pub cancel_tx_hash: Option<String>,
    pub cancel_date: Option<DateTime<Utc>>,
    pub token_addr: Option<String>,
    pub token_symbol: Option<String>,
    pub token_decimals: Option<i64>,
    pub token_amount: Option<String>,
    pub error: Option<String>,
}

impl TxDao {
    pub fn tx_status(&self) -> Result<TxStatus, String> {
        TxStatus::from_str(&self.status)
    }
}
