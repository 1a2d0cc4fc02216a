use crate::db::model::*;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

pub const TRANSACTION_FILTER_ALL: &str = "id IS NOT NULL";
pub const TRANSACTION_FILTER_LIFECYCLE: &str = "kind = 'tx' AND origin <> 'history'";
pub const TRANSACTION_FILTER_SUBMITTED: &str = "status = 'submitted'";
pub const TRANSACTION_FILTER_PENDING: &str =
    "status IN ('unapproved', 'approved', 'signed', 'submitted')";
pub const TRANSACTION_ORDER_BY_CREATE_DATE: &str = "created_date ASC";
pub const TRANSACTION_ORDER_BY_BLOCK_DESC: &str = "block_number DESC, created_date DESC";

const TX_COLUMNS: &str = r"id, owner_addr, chain_type, kind, chain_id, from_addr, to_addr, val, call_data, method_id,
nonce, gas_limit, gas_price, max_fee_per_gas, max_priority_fee_per_gas, status, origin, created_date,
signed_raw_data, tx_hash, submitted_date, block_number, confirm_date, gas_used, is_contract_recipient,
speed_up_of, cancel_tx_hash, cancel_date, token_addr, token_symbol, token_decimals, token_amount, error";

const TX_VALUES: &str = r"$1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18,
$19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33";

macro_rules! bind_tx {
    ($query:expr, $tx:expr) => {
        $query
            .bind(&$tx.id)
            .bind(&$tx.owner_addr)
            .bind(&$tx.chain_type)
            .bind(&$tx.kind)
            .bind($tx.chain_id)
            .bind(&$tx.from_addr)
            .bind(&$tx.to_addr)
            .bind(&$tx.val)
            .bind(&$tx.call_data)
            .bind(&$tx.method_id)
            .bind(&$tx.nonce)
            .bind(&$tx.gas_limit)
            .bind(&$tx.gas_price)
            .bind(&$tx.max_fee_per_gas)
            .bind(&$tx.max_priority_fee_per_gas)
            .bind(&$tx.status)
            .bind(&$tx.origin)
            .bind($tx.created_date)
            .bind(&$tx.signed_raw_data)
            .bind(&$tx.tx_hash)
            .bind($tx.submitted_date)
            .bind($tx.block_number)
            .bind($tx.confirm_date)
            .bind(&$tx.gas_used)
            .bind($tx.is_contract_recipient)
            .bind(&$tx.speed_up_of)
            .bind(&$tx.cancel_tx_hash)
            .bind($tx.cancel_date)
            .bind(&$tx.token_addr)
            .bind(&$tx.token_symbol)
            .bind($tx.token_decimals)
            .bind(&$tx.token_amount)
            .bind(&$tx.error)
    };
}

pub async fn insert_tx(conn: &mut SqliteConnection, tx: &TxDao) -> Result<TxDao, sqlx::Error> {
    let res = bind_tx!(
        sqlx::query_as::<_, TxDao>(
            format!(
                "INSERT INTO transactions ({}) VALUES ({}) RETURNING *;",
                TX_COLUMNS, TX_VALUES
            )
            .as_str()
        ),
        tx
    )
    .fetch_one(conn)
    .await?;
    Ok(res)
}

/// Whole-row write keyed by id. Last write wins.
pub async fn update_tx(conn: &mut SqliteConnection, tx: &TxDao) -> Result<TxDao, sqlx::Error> {
    let _res = bind_tx!(
        sqlx::query(
            r"UPDATE transactions SET
owner_addr = $2,
chain_type = $3,
kind = $4,
chain_id = $5,
from_addr = $6,
to_addr = $7,
val = $8,
call_data = $9,
method_id = $10,
nonce = $11,
gas_limit = $12,
gas_price = $13,
max_fee_per_gas = $14,
max_priority_fee_per_gas = $15,
status = $16,
origin = $17,
created_date = $18,
signed_raw_data = $19,
tx_hash = $20,
submitted_date = $21,
block_number = $22,
confirm_date = $23,
gas_used = $24,
is_contract_recipient = $25,
speed_up_of = $26,
cancel_tx_hash = $27,
cancel_date = $28,
token_addr = $29,
token_symbol = $30,
token_decimals = $31,
token_amount = $32,
error = $33
WHERE id = $1
"
        ),
        tx
    )
    .execute(conn)
    .await?;
    Ok(tx.clone())
}

/// Inserts a history record, or overwrites the history row sharing its
/// (owner, chain type, kind, chain id, hash) identity. Rows the lifecycle manager
/// owns are left alone, its poller settles them. Returns true for a new row.
pub async fn upsert_history_tx(
    conn: &mut SqliteConnection,
    tx: &TxDao,
) -> Result<bool, sqlx::Error> {
    let existing = sqlx::query_as::<_, (String, String)>(
        r"SELECT id, origin FROM transactions
WHERE owner_addr = $1 AND chain_type = $2 AND kind = $3 AND chain_id = $4 AND tx_hash = $5",
    )
    .bind(&tx.owner_addr)
    .bind(&tx.chain_type)
    .bind(&tx.kind)
    .bind(tx.chain_id)
    .bind(&tx.tx_hash)
    .fetch_optional(&mut *conn)
    .await?;

    match existing {
        Some((id, origin)) if origin == ORIGIN_HISTORY => {
            let mut tx = tx.clone();
            tx.id = id;
            update_tx(conn, &tx).await?;
            Ok(false)
        }
        Some((id, _)) => {
            log::debug!("History row {} belongs to local record {}, skipped", tx.id, id);
            Ok(false)
        }
        None => {
            insert_tx(conn, tx).await?;
            Ok(true)
        }
    }
}

/// Stores a cancellation attempt on a record that is still `submitted`.
/// Returns false when the record moved on meanwhile.
pub async fn set_cancel_attempt(
    conn: &mut SqliteConnection,
    id: &str,
    cancel_tx_hash: &str,
    cancel_date: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r"UPDATE transactions SET cancel_tx_hash = $2, cancel_date = $3
WHERE id = $1 AND status = 'submitted'",
    )
    .bind(id)
    .bind(cancel_tx_hash)
    .bind(cancel_date)
    .execute(conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn get_tx(conn: &mut SqliteConnection, id: &str) -> Result<Option<TxDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, TxDao>(r"SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}

pub async fn delete_tx(conn: &mut SqliteConnection, id: &str) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(r"DELETE FROM transactions WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn get_transactions(
    conn: &mut SqliteConnection,
    filter: Option<&str>,
    limit: Option<i64>,
    order: Option<&str>,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let limit = limit.unwrap_or(i64::MAX);
    let filter = filter.unwrap_or(TRANSACTION_FILTER_ALL);
    let order = order.unwrap_or(TRANSACTION_ORDER_BY_CREATE_DATE);
    let rows = sqlx::query_as::<_, TxDao>(
        format!(
            r"SELECT * FROM transactions WHERE {} ORDER BY {} LIMIT {}",
            filter, order, limit
        )
        .as_str(),
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn get_txs_by_hash(
    conn: &mut SqliteConnection,
    tx_hash: &str,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TxDao>(
        r"SELECT * FROM transactions WHERE tx_hash = $1 ORDER BY created_date ASC",
    )
    .bind(tx_hash.to_lowercase())
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Records on `chain_id` whose input starts with `method_id`, limited to `status` when given.
pub async fn get_txs_by_method_id(
    conn: &mut SqliteConnection,
    chain_id: i64,
    method_id: &str,
    status: Option<TxStatus>,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TxDao>(
        r"SELECT * FROM transactions
WHERE chain_id = $1 AND method_id = $2 AND ($3 IS NULL OR status = $3)
ORDER BY block_number ASC, created_date ASC",
    )
    .bind(chain_id)
    .bind(method_id.to_lowercase())
    .bind(status.map(|s| s.as_str()))
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Records of `owner` that were sent to or received from `counterparty`.
pub async fn get_txs_by_counterparty(
    conn: &mut SqliteConnection,
    owner: &str,
    counterparty: &str,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TxDao>(
        r"SELECT * FROM transactions
WHERE owner_addr = $1 AND (to_addr = $2 OR from_addr = $2)
ORDER BY created_date DESC",
    )
    .bind(owner.to_lowercase())
    .bind(counterparty.to_lowercase())
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// One page of an address history on a chain, newest block first.
pub async fn get_history_page(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
    kind: Option<&str>,
    page: i64,
    page_size: i64,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TxDao>(
        format!(
            r"SELECT * FROM transactions
WHERE owner_addr = $1 AND chain_id = $2 AND ($3 IS NULL OR kind = $3)
ORDER BY {} LIMIT $4 OFFSET $5",
            TRANSACTION_ORDER_BY_BLOCK_DESC
        )
        .as_str(),
    )
    .bind(owner.to_lowercase())
    .bind(chain_id)
    .bind(kind)
    .bind(page_size)
    .bind(page.max(0) * page_size)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Backfill watermark for one (owner, chain, kind). Only explorer rows count, a
/// locally sent record says nothing about older history.
pub async fn get_max_block_number(
    conn: &mut SqliteConnection,
    owner: &str,
    chain_id: i64,
    kind: &str,
) -> Result<Option<i64>, sqlx::Error> {
    let max = sqlx::query_scalar::<_, Option<i64>>(
        r"SELECT MAX(block_number) FROM transactions
WHERE owner_addr = $1 AND chain_id = $2 AND kind = $3 AND origin = 'history'",
    )
    .bind(owner.to_lowercase())
    .bind(chain_id)
    .bind(kind)
    .fetch_one(conn)
    .await?;
    Ok(max)
}

/// Records sharing the sender and nonce of `tx` on its chain, `tx` itself excluded.
pub async fn get_same_nonce_txs(
    conn: &mut SqliteConnection,
    tx: &TxDao,
) -> Result<Vec<TxDao>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TxDao>(
        r"SELECT * FROM transactions
WHERE kind = 'tx' AND chain_id = $1 AND from_addr = $2 AND nonce = $3 AND id <> $4",
    )
    .bind(tx.chain_id)
    .bind(&tx.from_addr)
    .bind(&tx.nonce)
    .bind(&tx.id)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn get_status_counts(
    conn: &mut SqliteConnection,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r"SELECT status, COUNT(*) FROM transactions WHERE kind = 'tx' GROUP BY status",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn get_tracked_owners(
    conn: &mut SqliteConnection,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r"SELECT DISTINCT owner_addr, chain_id FROM transactions ORDER BY owner_addr, chain_id",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Removes every record owned by `owner`, approvals included.
pub async fn delete_by_owner(conn: &mut SqliteConnection, owner: &str) -> Result<u64, sqlx::Error> {
    let owner = owner.to_lowercase();
    let res = sqlx::query(r"DELETE FROM transactions WHERE owner_addr = $1")
        .bind(&owner)
        .execute(&mut *conn)
        .await?;
    sqlx::query(r"DELETE FROM approval WHERE owner = $1")
        .bind(&owner)
        .execute(&mut *conn)
        .await?;
    sqlx::query(r"DELETE FROM revoked_approval WHERE owner = $1")
        .bind(&owner)
        .execute(conn)
        .await?;
    Ok(res.rows_affected())
}
