use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// One (owner, chain, token, spender) approval. `checked_date` is `None` while the
/// live allowance still has to be read from the chain.
#[derive(Serialize, sqlx::FromRow, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDao {
    pub id: i64,
    pub owner: String,
    pub chain_id: i64,
    pub token_addr: String,
    pub spender: String,
    pub initial_allowance: String,
    pub allowance: String,
    pub approve_date: DateTime<Utc>,
    pub tx_hash: String,
    pub checked_date: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEntry {
    pub initial_allowance: String,
    pub allowance: String,
    pub timestamp: DateTime<Utc>,
}

/// Approvals of one token by one owner on one chain, keyed by spender.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEventGroup {
    pub owner: String,
    pub chain_id: i64,
    pub token_addr: String,
    pub spenders: BTreeMap<String, ApprovalEntry>,
}

impl ApprovalEventGroup {
    pub fn from_rows(rows: Vec<ApprovalDao>) -> Vec<ApprovalEventGroup> {
        let mut groups: BTreeMap<(String, i64, String), ApprovalEventGroup> = BTreeMap::new();
        for row in rows {
            let key = (row.owner.clone(), row.chain_id, row.token_addr.clone());
            let group = groups.entry(key).or_insert_with(|| ApprovalEventGroup {
                owner: row.owner.clone(),
                chain_id: row.chain_id,
                token_addr: row.token_addr.clone(),
                spenders: BTreeMap::new(),
            });
            group.spenders.insert(
                row.spender,
                ApprovalEntry {
                    initial_allowance: row.initial_allowance,
                    allowance: row.allowance,
                    timestamp: row.approve_date,
                },
            );
        }
        groups.into_values().collect()
    }
}
