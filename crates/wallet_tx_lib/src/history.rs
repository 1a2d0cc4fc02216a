//! Ingests address history from Etherscan compatible explorers into the ledger.

use crate::db::model::*;
use crate::db::ops::*;
use crate::error::WalletError;
use crate::events::{EngineEvent, EventBus};
use crate::observable::{ChangedKeys, Observable};
use crate::service::PollTarget;
use crate::setup::{ChainRoute, ChainRoutes, ExplorerSetup};
use crate::utils::{hex_to_bytes, method_id_of, parse_quantity, u256_to_hex};
use crate::{err_custom_create, err_from};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use sqlx::SqliteConnection;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Tx,
    InternalTx,
    TokenTx,
}

impl HistoryKind {
    pub const ALL: [HistoryKind; 3] = [HistoryKind::Tx, HistoryKind::InternalTx, HistoryKind::TokenTx];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryKind::Tx => KIND_TX,
            HistoryKind::InternalTx => KIND_INTERNAL_TX,
            HistoryKind::TokenTx => KIND_TOKEN_TX,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            HistoryKind::Tx => "txlist",
            HistoryKind::InternalTx => "txlistinternal",
            HistoryKind::TokenTx => "tokentx",
        }
    }
}

/// One row of an explorer `account` listing. Numbers arrive as decimal strings.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerTx {
    pub block_number: String,
    pub time_stamp: String,
    pub hash: String,
    #[serde(default)]
    pub nonce: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub is_error: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub token_symbol: Option<String>,
    #[serde(default)]
    pub token_decimal: Option<String>,
}

#[async_trait]
pub trait ExplorerClient: Send + Sync {
    /// Records of `address` of the given kind from `start_block` on, oldest first.
    async fn fetch(
        &self,
        address: &str,
        kind: HistoryKind,
        start_block: u64,
    ) -> Result<Vec<ExplorerTx>, WalletError>;
}

#[derive(Deserialize, Debug)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: serde_json::Value,
}

pub struct EtherscanClient {
    url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl EtherscanClient {
    pub fn new(setup: &ExplorerSetup, timeout: Duration) -> Result<Self, WalletError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(err_from!())?;
        Ok(EtherscanClient {
            url: setup.url.clone(),
            api_key: setup.api_key.clone(),
            http,
        })
    }
}

#[async_trait]
impl ExplorerClient for EtherscanClient {
    async fn fetch(
        &self,
        address: &str,
        kind: HistoryKind,
        start_block: u64,
    ) -> Result<Vec<ExplorerTx>, WalletError> {
        let start_block = start_block.to_string();
        let mut query = vec![
            ("module", "account"),
            ("action", kind.action()),
            ("address", address),
            ("startblock", start_block.as_str()),
            ("sort", "asc"),
        ];
        if let Some(api_key) = &self.api_key {
            query.push(("apikey", api_key.as_str()));
        }
        let response = self
            .http
            .get(&self.url)
            .query(&query)
            .send()
            .await
            .map_err(err_from!())?
            .error_for_status()
            .map_err(err_from!())?
            .json::<ExplorerResponse>()
            .await
            .map_err(err_from!())?;
        parse_response(response)
    }
}

fn parse_response(response: ExplorerResponse) -> Result<Vec<ExplorerTx>, WalletError> {
    match response.result {
        serde_json::Value::Array(_) => {
            serde_json::from_value(response.result).map_err(err_from!())
        }
        other => {
            // explorers answer "No transactions found" with status 0 and an empty list
            if response.status == "0" && response.message.starts_with("No ") {
                Ok(Vec::new())
            } else {
                Err(err_custom_create!(
                    "Explorer error {}: {} {}",
                    response.status,
                    response.message,
                    other
                ))
            }
        }
    }
}

fn decimal_to_hex(val: &str) -> Result<String, WalletError> {
    Ok(u256_to_hex(parse_quantity(val).map_err(err_from!())?))
}

fn optional_hex(val: &Option<String>) -> Result<Option<String>, WalletError> {
    match val.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(val) => decimal_to_hex(val).map(Some),
    }
}

fn parse_timestamp(val: &str) -> Result<DateTime<Utc>, WalletError> {
    let secs = val
        .trim()
        .parse::<i64>()
        .map_err(|e| err_custom_create!("Invalid timestamp {}: {}", val, e))?;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| err_custom_create!("Timestamp out of range: {}", secs))
}

/// Turns an explorer row into a ledger record owned by `owner`.
pub fn history_tx_dao(
    route: &ChainRoute,
    owner: &str,
    kind: HistoryKind,
    row: &ExplorerTx,
) -> Result<TxDao, WalletError> {
    let timestamp = parse_timestamp(&row.time_stamp)?;
    let input = row
        .input
        .as_deref()
        .filter(|input| input.starts_with("0x") && input.len() > 2)
        .map(|input| hex_to_bytes(input).map_err(err_from!()))
        .transpose()?;
    let failed = row.is_error.as_deref() == Some("1");
    let to = row
        .to
        .as_deref()
        .map(str::trim)
        .filter(|to| !to.is_empty())
        .map(str::to_lowercase);
    let mut dao = TxDao {
        id: uuid::Uuid::new_v4().to_string(),
        owner_addr: owner.to_lowercase(),
        chain_type: route.chain_type.to_string(),
        kind: kind.as_str().to_string(),
        chain_id: route.chain_id as i64,
        from_addr: row.from.to_lowercase(),
        to_addr: to,
        val: decimal_to_hex(&row.value)?,
        call_data: input.as_deref().map(crate::utils::bytes_to_hex),
        method_id: input.as_deref().and_then(method_id_of),
        nonce: optional_hex(&row.nonce)?,
        gas_limit: optional_hex(&row.gas)?,
        gas_price: optional_hex(&row.gas_price)?,
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        status: if failed {
            TxStatus::Failed
        } else {
            TxStatus::Confirmed
        }
        .to_string(),
        origin: ORIGIN_HISTORY.to_string(),
        created_date: timestamp,
        signed_raw_data: None,
        tx_hash: Some(row.hash.to_lowercase()),
        submitted_date: None,
        block_number: Some(
            row.block_number
                .trim()
                .parse::<i64>()
                .map_err(|e| err_custom_create!("Invalid block number {}: {}", row.block_number, e))?,
        ),
        confirm_date: Some(timestamp),
        gas_used: optional_hex(&row.gas_used)?,
        is_contract_recipient: input.is_some(),
        speed_up_of: None,
        cancel_tx_hash: None,
        cancel_date: None,
        token_addr: None,
        token_symbol: None,
        token_decimals: None,
        token_amount: None,
        error: if failed {
            Some("Reverted on chain".to_string())
        } else {
            None
        },
    };
    if kind == HistoryKind::TokenTx {
        dao.token_addr = row.contract_address.as_deref().map(str::to_lowercase);
        dao.token_symbol = row.token_symbol.clone();
        dao.token_decimals = row
            .token_decimal
            .as_deref()
            .and_then(|d| d.trim().parse::<i64>().ok());
        dao.token_amount = Some(dao.val.clone());
        dao.val = "0x0".to_string();
    }
    Ok(dao)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySyncConfig {
    pub kinds: Vec<HistoryKind>,
}

impl ChangedKeys for HistorySyncConfig {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
        if self.kinds != previous.kinds {
            vec!["kinds"]
        } else {
            vec![]
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistorySyncState {
    pub ingested: usize,
    pub last_poll: Option<DateTime<Utc>>,
}

impl ChangedKeys for HistorySyncState {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.ingested != previous.ingested {
            keys.push("ingested");
        }
        if self.last_poll != previous.last_poll {
            keys.push("lastPoll");
        }
        keys
    }
}

pub struct HistorySync {
    conn: Arc<Mutex<SqliteConnection>>,
    routes: Arc<ChainRoutes>,
    bus: EventBus,
    /// Explorer per chain route name.
    explorers: HashMap<String, Arc<dyn ExplorerClient>>,
    watched: std::sync::Mutex<BTreeSet<(String, u64)>>,
    component: Observable<HistorySyncConfig, HistorySyncState>,
}

impl HistorySync {
    pub fn new(
        conn: Arc<Mutex<SqliteConnection>>,
        routes: Arc<ChainRoutes>,
        bus: EventBus,
        explorers: HashMap<String, Arc<dyn ExplorerClient>>,
    ) -> Self {
        HistorySync {
            conn,
            routes,
            bus,
            explorers,
            watched: std::sync::Mutex::new(BTreeSet::new()),
            component: Observable::new(
                HistorySyncConfig {
                    kinds: HistoryKind::ALL.to_vec(),
                },
                HistorySyncState::default(),
            ),
        }
    }

    pub fn component(&self) -> &Observable<HistorySyncConfig, HistorySyncState> {
        &self.component
    }

    /// Adds an address to sync even before it has any record in the ledger.
    pub fn watch(&self, address: &str, chain_id: u64) {
        self.watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((address.to_lowercase(), chain_id));
    }

    async fn targets(&self) -> Result<BTreeSet<(String, u64)>, WalletError> {
        let mut targets = self
            .watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut conn = self.conn.lock().await;
        for (owner, chain_id) in get_tracked_owners(&mut conn).await.map_err(err_from!())? {
            targets.insert((owner, chain_id as u64));
        }
        Ok(targets)
    }

    /// Pulls new records of one kind for `owner`, starting right after the highest
    /// block already stored. Returns the number of new rows.
    pub async fn sync_kind(
        &self,
        route: &ChainRoute,
        explorer: &dyn ExplorerClient,
        owner: &str,
        kind: HistoryKind,
    ) -> Result<usize, WalletError> {
        let watermark = {
            let mut conn = self.conn.lock().await;
            get_max_block_number(&mut conn, owner, route.chain_id as i64, kind.as_str())
                .await
                .map_err(err_from!())?
        };
        let start_block = watermark.map(|b| b as u64 + 1).unwrap_or(0);
        let rows = explorer.fetch(owner, kind, start_block).await?;
        let mut created = 0;
        for row in rows {
            let dao = match history_tx_dao(route, owner, kind, &row) {
                Ok(dao) => dao,
                Err(err) => {
                    log::warn!("Skipping explorer row {}: {}", row.hash, err);
                    continue;
                }
            };
            let mut conn = self.conn.lock().await;
            if upsert_history_tx(&mut conn, &dao).await.map_err(err_from!())? {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn sync_owner(&self, owner: &str, chain_id: u64) -> Result<usize, WalletError> {
        let route = self.routes.resolve(chain_id)?;
        let explorer = match self.explorers.get(&route.name) {
            Some(explorer) => explorer.clone(),
            None => return Ok(0),
        };
        let mut created = 0;
        for kind in self.component.config().kinds {
            match self.sync_kind(&route, explorer.as_ref(), owner, kind).await {
                Ok(n) => created += n,
                Err(err) => log::warn!(
                    "History sync of {} {} on {} failed: {}",
                    owner,
                    kind.as_str(),
                    route.name,
                    err
                ),
            }
        }
        if created > 0 && self.routes.is_current(chain_id) {
            log::info!("Ingested {} history records of {} on {}", created, owner, route.name);
            self.bus.publish(EngineEvent::TransactionActivity {
                address: owner.to_string(),
                chain_id,
            });
        }
        Ok(created)
    }

    pub async fn poll(&self) -> Result<usize, WalletError> {
        let mut created = 0;
        for (owner, chain_id) in self.targets().await? {
            match self.sync_owner(&owner, chain_id).await {
                Ok(n) => created += n,
                Err(err) => log::warn!("History of {} on {} skipped: {}", owner, chain_id, err),
            }
        }
        self.component.update(|s| {
            s.ingested += created;
            s.last_poll = Some(Utc::now());
        });
        Ok(created)
    }
}

#[async_trait]
impl PollTarget for HistorySync {
    fn name(&self) -> &str {
        "history"
    }

    async fn poll_once(&self) {
        if let Err(err) = self.poll().await {
            log::error!("History poll failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_sqlite_connection;
    use crate::setup::ChainType;
    use crate::test_utils::MockChainClient;

    const OWNER: &str = "0x001066290077e38f222cc6009c0c7a91d5192303";

    #[derive(Default)]
    struct ScriptedExplorer {
        rows: std::sync::Mutex<HashMap<&'static str, Vec<ExplorerTx>>>,
        requests: std::sync::Mutex<Vec<(HistoryKind, u64)>>,
    }

    #[async_trait]
    impl ExplorerClient for ScriptedExplorer {
        async fn fetch(
            &self,
            _address: &str,
            kind: HistoryKind,
            start_block: u64,
        ) -> Result<Vec<ExplorerTx>, WalletError> {
            self.requests.lock().unwrap().push((kind, start_block));
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(kind.as_str())
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|r| r.block_number.parse::<u64>().unwrap() >= start_block)
                .collect())
        }
    }

    fn row(block: u64, hash: u64, input: &str) -> ExplorerTx {
        ExplorerTx {
            block_number: block.to_string(),
            time_stamp: "1700000000".to_string(),
            hash: format!("{:#x}", web3::types::H256::from_low_u64_be(hash)),
            nonce: Some("7".to_string()),
            from: OWNER.to_uppercase().replace("0X", "0x"),
            to: Some("0x00000000000000000000000000000000000000aa".to_string()),
            value: "1000".to_string(),
            gas: Some("21000".to_string()),
            gas_price: Some("1000000000".to_string()),
            gas_used: Some("21000".to_string()),
            is_error: Some("0".to_string()),
            input: Some(input.to_string()),
            ..Default::default()
        }
    }

    async fn setup() -> (HistorySync, Arc<ScriptedExplorer>, Arc<Mutex<SqliteConnection>>) {
        let conn = Arc::new(Mutex::new(create_sqlite_connection(None, true).await.unwrap()));
        let routes = Arc::new(ChainRoutes::new());
        routes.register(ChainRoute::new(
            "mainnet",
            ChainType::Ethereum,
            1,
            Arc::new(MockChainClient::new()),
        ));
        let explorer = Arc::new(ScriptedExplorer::default());
        let mut explorers: HashMap<String, Arc<dyn ExplorerClient>> = HashMap::new();
        explorers.insert("mainnet".to_string(), explorer.clone());
        let sync = HistorySync::new(conn.clone(), routes, EventBus::default(), explorers);
        sync.watch(OWNER, 1);
        (sync, explorer, conn)
    }

    #[test]
    fn test_parse_empty_response() {
        let response: ExplorerResponse = serde_json::from_str(
            r#"{"status":"0","message":"No transactions found","result":[]}"#,
        )
        .unwrap();
        assert!(parse_response(response).unwrap().is_empty());
        let response: ExplorerResponse = serde_json::from_str(
            r#"{"status":"0","message":"NOTOK","result":"Invalid API Key"}"#,
        )
        .unwrap();
        assert!(parse_response(response).is_err());
    }

    #[test]
    fn test_parse_rows() {
        let response: ExplorerResponse = serde_json::from_str(
            r#"{"status":"1","message":"OK","result":[{"blockNumber":"14923678","timeStamp":"1654646411",
            "hash":"0xc52783ad354aecc04c670047754f062e3d6d04e8f5b24774472651f9c3882c60","nonce":"1",
            "from":"0x9aa99c23f67c81701c772b106b4f83f6e858dd2e","to":"0x","value":"0","gas":"6000000",
            "gasPrice":"30000000000","isError":"0","input":"0x60806040","contractAddress":"","gasUsed":"5000000"}]}"#,
        )
        .unwrap();
        let rows = parse_response(response).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].block_number, "14923678");
        assert_eq!(rows[0].gas_price.as_deref(), Some("30000000000"));
    }

    #[tokio::test]
    async fn test_ingest_from_watermark() {
        let (sync, explorer, conn) = setup().await;
        explorer.rows.lock().unwrap().insert(
            KIND_TX,
            vec![
                row(100, 1, "0x"),
                row(105, 2, "0x095ea7b3"),
            ],
        );
        let mut events = sync.bus.subscribe();
        assert_eq!(sync.poll().await.unwrap(), 2);
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::TransactionActivity {
                address: OWNER.to_string(),
                chain_id: 1
            }
        );

        let rows = get_history_page(&mut *conn.lock().await, OWNER, 1, Some(KIND_TX), 0, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].block_number, Some(105));
        assert_eq!(rows[0].method_id.as_deref(), Some("0x095ea7b3"));
        assert_eq!(rows[0].status, "confirmed");
        assert_eq!(rows[1].val, "0x3e8");
        assert_eq!(rows[1].nonce.as_deref(), Some("0x7"));
        assert_eq!(rows[1].from_addr, OWNER);
        assert!(rows[1].call_data.is_none());

        assert_eq!(sync.poll().await.unwrap(), 0);
        let requests = explorer.requests.lock().unwrap().clone();
        assert!(requests.contains(&(HistoryKind::Tx, 0)));
        assert!(requests.contains(&(HistoryKind::Tx, 106)));
        assert!(requests.contains(&(HistoryKind::TokenTx, 0)));
    }

    #[tokio::test]
    async fn test_failed_and_token_rows() {
        let (sync, explorer, conn) = setup().await;
        let mut failed = row(100, 1, "0x");
        failed.is_error = Some("1".to_string());
        let mut token = row(101, 2, "");
        token.contract_address = Some("0x00000000000000000000000000000000000070C3".to_string());
        token.token_symbol = Some("USDC".to_string());
        token.token_decimal = Some("6".to_string());
        {
            let mut rows = explorer.rows.lock().unwrap();
            rows.insert(KIND_TX, vec![failed]);
            rows.insert(KIND_TOKEN_TX, vec![token]);
        }
        sync.poll().await.unwrap();
        let mut conn = conn.lock().await;
        let failed = get_history_page(&mut conn, OWNER, 1, Some(KIND_TX), 0, 10).await.unwrap();
        assert_eq!(failed[0].status, "failed");
        let tokens = get_history_page(&mut conn, OWNER, 1, Some(KIND_TOKEN_TX), 0, 10)
            .await
            .unwrap();
        assert_eq!(tokens[0].token_symbol.as_deref(), Some("USDC"));
        assert_eq!(tokens[0].token_decimals, Some(6));
        assert_eq!(tokens[0].token_amount.as_deref(), Some("0x3e8"));
        assert_eq!(tokens[0].val, "0x0");
        assert_eq!(
            tokens[0].token_addr.as_deref(),
            Some("0x00000000000000000000000000000000000070c3")
        );
    }

    #[tokio::test]
    async fn test_local_records_kept_out_of_history_sync() {
        let (sync, explorer, conn) = setup().await;
        let to = web3::types::Address::from_low_u64_be(0xaa);
        let mut mined = crate::test_utils::confirmed_tx(OWNER, 1, to, &[], 101);
        mined.origin = ORIGIN_DAPP.to_string();
        mined.signed_raw_data = Some("0xf86b".to_string());
        let mut pending = crate::test_utils::confirmed_tx(OWNER, 1, to, &[], 102);
        pending.origin = ORIGIN_DAPP.to_string();
        pending.status = TxStatus::Submitted.to_string();
        pending.block_number = None;
        pending.confirm_date = None;
        pending.signed_raw_data = Some("0xf86c".to_string());
        {
            let mut conn = conn.lock().await;
            insert_tx(&mut conn, &mined).await.unwrap();
            insert_tx(&mut conn, &pending).await.unwrap();
        }
        explorer.rows.lock().unwrap().insert(
            KIND_TX,
            vec![
                row(50, 1, "0x095ea7b3"),
                row(101, 101 + 0x1_0000, "0x"),
                row(102, 102 + 0x1_0000, "0x"),
            ],
        );

        assert_eq!(sync.poll().await.unwrap(), 1);
        assert!(explorer
            .requests
            .lock()
            .unwrap()
            .contains(&(HistoryKind::Tx, 0)));

        let mut conn = conn.lock().await;
        let rows = get_history_page(&mut conn, OWNER, 1, Some(KIND_TX), 0, 10)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows
            .iter()
            .any(|r| r.block_number == Some(50) && r.origin == ORIGIN_HISTORY));
        let still_mined = get_tx(&mut conn, &mined.id).await.unwrap().unwrap();
        assert_eq!(still_mined.origin, ORIGIN_DAPP);
        assert_eq!(still_mined.signed_raw_data.as_deref(), Some("0xf86b"));
        let still_pending = get_tx(&mut conn, &pending.id).await.unwrap().unwrap();
        assert_eq!(still_pending.status, "submitted");
        assert_eq!(still_pending.origin, ORIGIN_DAPP);
        assert_eq!(still_pending.signed_raw_data.as_deref(), Some("0xf86c"));
        assert_eq!(
            get_max_block_number(&mut conn, OWNER, 1, KIND_TX).await.unwrap(),
            Some(50)
        );
    }
}
