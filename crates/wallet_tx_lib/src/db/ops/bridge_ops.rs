use crate::db::model::*;
use sqlx::SqliteConnection;

pub const BRIDGE_FILTER_PENDING_DEPOSITS: &str = "direction = 'deposit' AND done = FALSE";
pub const BRIDGE_FILTER_PENDING_WITHDRAWS: &str = "direction = 'withdraw' AND processed = FALSE";

/// Returns `Some` with the stored row when the transfer was new, `None` when a row
/// with the same (route, source chain, hash) already exists.
pub async fn insert_bridge_transfer_if_absent(
    conn: &mut SqliteConnection,
    transfer: &BridgeTransferDao,
) -> Result<Option<BridgeTransferDao>, sqlx::Error> {
    let res = sqlx::query_as::<_, BridgeTransferDao>(
        r"INSERT INTO bridge_transfer
(route, direction, source_chain_id, tx_hash, owner_addr, dest_addr, token_addr, token_symbol, token_decimals,
amount, block_number, deposit_index, batch_number, index_in_batch, message_hash, settlement_timestamp,
done, processed, unconfirmed_timestamp, claim_tx_hash, created_date, last_checked)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
ON CONFLICT (route, source_chain_id, tx_hash) DO NOTHING
RETURNING *;
",
    )
    .bind(&transfer.route)
    .bind(&transfer.direction)
    .bind(transfer.source_chain_id)
    .bind(transfer.tx_hash.to_lowercase())
    .bind(&transfer.owner_addr)
    .bind(&transfer.dest_addr)
    .bind(&transfer.token_addr)
    .bind(&transfer.token_symbol)
    .bind(transfer.token_decimals)
    .bind(&transfer.amount)
    .bind(transfer.block_number)
    .bind(&transfer.deposit_index)
    .bind(&transfer.batch_number)
    .bind(&transfer.index_in_batch)
    .bind(&transfer.message_hash)
    .bind(transfer.settlement_timestamp)
    .bind(transfer.done)
    .bind(transfer.processed)
    .bind(transfer.unconfirmed_timestamp)
    .bind(&transfer.claim_tx_hash)
    .bind(transfer.created_date)
    .bind(transfer.last_checked)
    .fetch_optional(conn)
    .await?;
    Ok(res)
}

/// Writes the progress fields of a transfer. Flags only move forward: a stale copy
/// can never clear `done` or `processed`.
pub async fn update_bridge_transfer(
    conn: &mut SqliteConnection,
    transfer: &BridgeTransferDao,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"UPDATE bridge_transfer SET
block_number = COALESCE($2, block_number),
deposit_index = COALESCE($3, deposit_index),
batch_number = COALESCE($4, batch_number),
index_in_batch = COALESCE($5, index_in_batch),
message_hash = COALESCE($6, message_hash),
settlement_timestamp = COALESCE($7, settlement_timestamp),
done = (done OR $8 OR $9),
processed = (processed OR $9),
unconfirmed_timestamp = COALESCE($10, unconfirmed_timestamp),
claim_tx_hash = COALESCE($11, claim_tx_hash),
last_checked = $12
WHERE id = $1
",
    )
    .bind(transfer.id)
    .bind(transfer.block_number)
    .bind(&transfer.deposit_index)
    .bind(&transfer.batch_number)
    .bind(&transfer.index_in_batch)
    .bind(&transfer.message_hash)
    .bind(transfer.settlement_timestamp)
    .bind(transfer.done)
    .bind(transfer.processed)
    .bind(transfer.unconfirmed_timestamp)
    .bind(&transfer.claim_tx_hash)
    .bind(transfer.last_checked)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn get_bridge_transfers(
    conn: &mut SqliteConnection,
    route: &str,
    filter: Option<&str>,
) -> Result<Vec<BridgeTransferDao>, sqlx::Error> {
    let filter = filter.unwrap_or("id >= 0");
    let rows = sqlx::query_as::<_, BridgeTransferDao>(
        format!(
            r"SELECT * FROM bridge_transfer WHERE route = $1 AND {} ORDER BY id ASC",
            filter
        )
        .as_str(),
    )
    .bind(route)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub async fn get_bridge_transfer(
    conn: &mut SqliteConnection,
    route: &str,
    source_chain_id: i64,
    tx_hash: &str,
) -> Result<Option<BridgeTransferDao>, sqlx::Error> {
    let row = sqlx::query_as::<_, BridgeTransferDao>(
        r"SELECT * FROM bridge_transfer WHERE route = $1 AND source_chain_id = $2 AND tx_hash = $3",
    )
    .bind(route)
    .bind(source_chain_id)
    .bind(tx_hash.to_lowercase())
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

pub async fn get_done_block_number(
    conn: &mut SqliteConnection,
    route: &str,
) -> Result<i64, sqlx::Error> {
    let block = sqlx::query_scalar::<_, i64>(
        r"SELECT done_block_number FROM bridge_route_state WHERE route = $1",
    )
    .bind(route)
    .fetch_optional(conn)
    .await?;
    Ok(block.unwrap_or(0))
}

/// Raises the route high-water mark. Never lowers it.
pub async fn set_done_block_number(
    conn: &mut SqliteConnection,
    route: &str,
    block_number: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"INSERT INTO bridge_route_state (route, done_block_number) VALUES ($1, $2)
ON CONFLICT (route) DO UPDATE SET done_block_number = MAX(done_block_number, excluded.done_block_number)",
    )
    .bind(route)
    .bind(block_number)
    .execute(conn)
    .await?;
    Ok(())
}
