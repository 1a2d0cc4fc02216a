use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DIRECTION_DEPOSIT: &str = "deposit";
pub const DIRECTION_WITHDRAW: &str = "withdraw";

/// Deposit into or withdrawal out of a rollup. `processed` implies `done`; the table
/// enforces it with a CHECK constraint as well.
#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransferDao {
    pub id: i64,
    pub route: String,
    pub direction: String,
    pub source_chain_id: i64,
    pub tx_hash: String,
    pub owner_addr: String,
    pub dest_addr: Option<String>,
    /// `None` for the native currency.
    pub token_addr: Option<String>,
    pub token_symbol: Option<String>,
    pub token_decimals: Option<i64>,
    pub amount: Option<String>,
    pub block_number: Option<i64>,
    pub deposit_index: Option<String>,
    pub batch_number: Option<String>,
    pub index_in_batch: Option<String>,
    pub message_hash: Option<String>,
    pub settlement_timestamp: Option<i64>,
    pub done: bool,
    pub processed: bool,
    pub unconfirmed_timestamp: Option<DateTime<Utc>>,
    pub claim_tx_hash: Option<String>,
    pub created_date: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl BridgeTransferDao {
    pub fn new(route: &str, direction: &str, source_chain_id: i64, tx_hash: &str, owner: &str) -> Self {
        BridgeTransferDao {
            id: 0,
            route: route.to_string(),
            direction: direction.to_string(),
            source_chain_id,
            tx_hash: tx_hash.to_lowercase(),
            owner_addr: owner.to_lowercase(),
            dest_addr: None,
            token_addr: None,
            token_symbol: None,
            token_decimals: None,
            amount: None,
            block_number: None,
            deposit_index: None,
            batch_number: None,
            index_in_batch: None,
            message_hash: None,
            settlement_timestamp: None,
            done: false,
            processed: false,
            unconfirmed_timestamp: None,
            claim_tx_hash: None,
            created_date: chrono::Utc::now(),
            last_checked: None,
        }
    }

    pub fn is_deposit(&self) -> bool {
        self.direction == DIRECTION_DEPOSIT
    }

    pub fn mark_done(&mut self) {
        self.done = true;
    }

    pub fn mark_processed(&mut self) {
        self.done = true;
        self.processed = true;
    }
}

#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRouteStateDao {
    pub route: String,
    pub done_block_number: i64,
}
