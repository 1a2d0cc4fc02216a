//! Settlement tracking of deposits into and withdrawals out of rollups.
//!
//! One [`BridgeMonitor`] runs per configured route. The monitor owns the state
//! machine (resolve the cursor from the receipt, wait for the confirmation window,
//! query the outgoing message state) and delegates every protocol specific call
//! to a [`RouteAdapter`].

pub mod adapter;
pub mod arbitrum;
pub mod optimism;

pub use adapter::*;

use crate::config::BridgeRoute;
use crate::db::model::*;
use crate::db::ops::*;
use crate::error::WalletError;
use crate::events::{EngineEvent, EventBus};
use crate::observable::{ChangedKeys, Observable};
use crate::service::PollTarget;
use crate::setup::{BridgeSetup, ChainRoute, ChainRoutes};
use crate::utils::{hex_to_bytes, hex_to_u256, parse_address, parse_hash, u256_to_hex};
use crate::{err_configuration, err_from};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tokio::sync::Mutex;
use web3::ethabi::Token;
use web3::types::{Address, U256};

pub fn create_adapter(setup: &BridgeSetup) -> Result<Arc<dyn RouteAdapter>, WalletError> {
    Ok(match setup.route {
        BridgeRoute::Arbitrum => Arc::new(arbitrum::ArbitrumAdapter::new(setup)?),
        BridgeRoute::Optimism => Arc::new(optimism::OptimismAdapter::new(setup)?),
    })
}

/// Asset moved by a transfer the caller registers. `token_addr` is `None` for the
/// native currency.
#[derive(Debug, Clone, Default)]
pub struct BridgeAsset {
    pub token_addr: Option<Address>,
    pub token_symbol: Option<String>,
    pub token_decimals: Option<i64>,
    pub amount: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeMonitorConfig {
    pub confirmation_window: u64,
}

impl ChangedKeys for BridgeMonitorConfig {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
        if self.confirmation_window != previous.confirmation_window {
            vec!["confirmationWindow"]
        } else {
            vec![]
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeMonitorState {
    pub pending_deposits: usize,
    pub pending_withdrawals: usize,
    pub done_block_number: i64,
    pub last_poll: Option<DateTime<Utc>>,
}

impl ChangedKeys for BridgeMonitorState {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.pending_deposits != previous.pending_deposits {
            keys.push("pendingDeposits");
        }
        if self.pending_withdrawals != previous.pending_withdrawals {
            keys.push("pendingWithdrawals");
        }
        if self.done_block_number != previous.done_block_number {
            keys.push("doneBlockNumber");
        }
        if self.last_poll != previous.last_poll {
            keys.push("lastPoll");
        }
        keys
    }
}

/// Per cycle view of the two chains of a route.
struct Cycle {
    parent: Arc<ChainRoute>,
    child: Arc<ChainRoute>,
    parent_timestamp: Option<u64>,
    done_block_number: i64,
}

pub struct BridgeMonitor {
    name: String,
    parent_chain: String,
    child_chain: String,
    adapter: Arc<dyn RouteAdapter>,
    conn: Arc<Mutex<SqliteConnection>>,
    routes: Arc<ChainRoutes>,
    bus: EventBus,
    component: Observable<BridgeMonitorConfig, BridgeMonitorState>,
    merge_lock: Mutex<()>,
}

impl BridgeMonitor {
    pub fn new(
        setup: &BridgeSetup,
        adapter: Arc<dyn RouteAdapter>,
        conn: Arc<Mutex<SqliteConnection>>,
        routes: Arc<ChainRoutes>,
        bus: EventBus,
    ) -> Self {
        BridgeMonitor {
            name: setup.name.clone(),
            parent_chain: setup.parent_chain.clone(),
            child_chain: setup.child_chain.clone(),
            component: Observable::new(
                BridgeMonitorConfig {
                    confirmation_window: adapter.confirmation_window(),
                },
                BridgeMonitorState::default(),
            ),
            adapter,
            conn,
            routes,
            bus,
            merge_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn component(&self) -> &Observable<BridgeMonitorConfig, BridgeMonitorState> {
        &self.component
    }

    fn chains(&self) -> Result<(Arc<ChainRoute>, Arc<ChainRoute>), WalletError> {
        let parent = self.routes.by_name(&self.parent_chain).ok_or_else(|| {
            err_configuration!("Bridge {}: unknown chain {}", self.name, self.parent_chain)
        })?;
        let child = self.routes.by_name(&self.child_chain).ok_or_else(|| {
            err_configuration!("Bridge {}: unknown chain {}", self.name, self.child_chain)
        })?;
        Ok((parent, child))
    }

    /// Starts tracking a bridge transaction submitted by the user. Returns false when
    /// the hash is already tracked.
    pub async fn register_transfer(
        &self,
        direction: Direction,
        tx_hash: &str,
        owner: &str,
        dest: Option<Address>,
        asset: BridgeAsset,
    ) -> Result<bool, WalletError> {
        let hash = parse_hash(tx_hash).map_err(err_from!())?;
        let (parent, child) = self.chains()?;
        let source = match direction {
            Direction::Deposit => &parent,
            Direction::Withdraw => &child,
        };
        let mut transfer = BridgeTransferDao::new(
            &self.name,
            direction.as_str(),
            source.chain_id as i64,
            &format!("{:#x}", hash),
            owner,
        );
        transfer.dest_addr = dest.map(|d| format!("{:#x}", d));
        transfer.token_addr = asset.token_addr.map(|t| format!("{:#x}", t));
        transfer.token_symbol = asset.token_symbol;
        transfer.token_decimals = asset.token_decimals;
        transfer.amount = asset.amount.map(u256_to_hex);
        let inserted = {
            let mut conn = self.conn.lock().await;
            insert_bridge_transfer_if_absent(&mut conn, &transfer)
                .await
                .map_err(err_from!())?
        };
        if inserted.is_some() {
            log::info!("Bridge {}: tracking {} {:#x}", self.name, direction.as_str(), hash);
            self.refresh_counts().await?;
        }
        Ok(inserted.is_some())
    }

    /// Records a claim transaction for a withdrawal so duplicate claims can be
    /// suppressed until the claim is observed on chain.
    pub async fn add_claim_tx_hash(
        &self,
        withdraw_tx_hash: &str,
        claim_tx_hash: &str,
    ) -> Result<(), WalletError> {
        let (_, child) = self.chains()?;
        let claim = parse_hash(claim_tx_hash).map_err(err_from!())?;
        let _guard = self.merge_lock.lock().await;
        let mut conn = self.conn.lock().await;
        let mut transfer =
            get_bridge_transfer(&mut conn, &self.name, child.chain_id as i64, withdraw_tx_hash)
                .await
                .map_err(err_from!())?
                .ok_or_else(|| {
                    crate::err_validation!("Unknown withdrawal {}", withdraw_tx_hash)
                })?;
        transfer.claim_tx_hash = Some(format!("{:#x}", claim));
        transfer.unconfirmed_timestamp = Some(Utc::now());
        update_bridge_transfer(&mut conn, &transfer)
            .await
            .map_err(err_from!())?;
        Ok(())
    }

    pub async fn transfers(&self) -> Result<Vec<BridgeTransferDao>, WalletError> {
        let mut conn = self.conn.lock().await;
        get_bridge_transfers(&mut conn, &self.name, None)
            .await
            .map_err(err_from!())
    }

    async fn load(&self, filter: &str) -> Result<Vec<BridgeTransferDao>, WalletError> {
        let mut conn = self.conn.lock().await;
        get_bridge_transfers(&mut conn, &self.name, Some(filter))
            .await
            .map_err(err_from!())
    }

    /// Writes the progress found for one record. Store side merging keeps the
    /// flags monotonic whatever another writer did meanwhile.
    async fn merge(&self, before: &BridgeTransferDao, after: &mut BridgeTransferDao) -> Result<(), WalletError> {
        after.last_checked = Some(Utc::now());
        {
            let _guard = self.merge_lock.lock().await;
            let mut conn = self.conn.lock().await;
            update_bridge_transfer(&mut conn, after)
                .await
                .map_err(err_from!())?;
        }
        if before.done != after.done || before.processed != after.processed {
            log::info!(
                "Bridge {}: {} {} done={} processed={}",
                self.name,
                after.direction,
                after.tx_hash,
                after.done,
                after.processed
            );
            self.bus.publish(EngineEvent::BridgeTransferUpdated {
                route: self.name.clone(),
                tx_hash: after.tx_hash.clone(),
            });
        }
        Ok(())
    }

    async fn begin_cycle(&self) -> Result<Cycle, WalletError> {
        let (parent, child) = self.chains()?;
        let done_block_number = {
            let mut conn = self.conn.lock().await;
            get_done_block_number(&mut conn, &self.name)
                .await
                .map_err(err_from!())?
        };
        let parent_timestamp = match parent.client().get_latest_block().await {
            Ok(block) => Some(block.timestamp),
            Err(err) => {
                log::warn!("Bridge {}: no parent block this cycle: {}", self.name, err);
                None
            }
        };
        Ok(Cycle {
            parent,
            child,
            parent_timestamp,
            done_block_number,
        })
    }

    /// Marks deposits done once the child chain consumed their queue position.
    async fn advance_deposits(
        &self,
        cycle: &Cycle,
        deposits: Vec<BridgeTransferDao>,
    ) -> usize {
        if deposits.is_empty() {
            return 0;
        }
        let counter = match self
            .adapter
            .deposit_counter(cycle.parent.client(), cycle.child.client())
            .await
        {
            Ok(counter) => Some(counter),
            Err(err) => {
                log::warn!("Bridge {}: deposit counter unavailable: {}", self.name, err);
                None
            }
        };
        let mut advanced = 0;
        for deposit in deposits {
            match self.advance_deposit(cycle, counter, &deposit).await {
                Ok(true) => advanced += 1,
                Ok(false) => {}
                Err(err) => log::warn!(
                    "Bridge {}: deposit {} not advanced: {}",
                    self.name,
                    deposit.tx_hash,
                    err
                ),
            }
        }
        advanced
    }

    async fn advance_deposit(
        &self,
        cycle: &Cycle,
        counter: Option<U256>,
        deposit: &BridgeTransferDao,
    ) -> Result<bool, WalletError> {
        if deposit.done {
            return Ok(false);
        }
        let mut next = deposit.clone();
        if next.deposit_index.is_none() {
            let hash = parse_hash(&deposit.tx_hash).map_err(err_from!())?;
            let receipt = match cycle.parent.client().get_transaction_receipt(hash).await? {
                Some(receipt) => receipt,
                None => return Ok(false),
            };
            if !self.routes.is_current(cycle.parent.chain_id) {
                return Ok(false);
            }
            next.block_number = receipt.block_number.map(|b| b as i64);
            match self.adapter.resolve_deposit_index(&receipt).await? {
                Some(index) => next.deposit_index = Some(u256_to_hex(index)),
                None => {
                    log::warn!("Bridge {}: no deposit message in {}", self.name, deposit.tx_hash);
                    return Ok(false);
                }
            }
        }
        if let (Some(counter), Some(index)) = (counter, next.deposit_index.as_deref()) {
            if counter >= hex_to_u256(index).map_err(err_from!())? {
                next.mark_done();
            }
        }
        self.merge(deposit, &mut next).await?;
        Ok(next.done && !deposit.done)
    }

    /// Walks withdrawals through cursor resolution, the confirmation window and the
    /// outgoing message state.
    async fn advance_withdrawals(&self, cycle: &Cycle, withdrawals: Vec<BridgeTransferDao>) -> usize {
        let mut advanced = 0;
        for withdrawal in withdrawals {
            match self.advance_withdrawal(cycle, &withdrawal).await {
                Ok(true) => advanced += 1,
                Ok(false) => {}
                Err(err) => log::warn!(
                    "Bridge {}: withdrawal {} not advanced: {}",
                    self.name,
                    withdrawal.tx_hash,
                    err
                ),
            }
        }
        advanced
    }

    async fn advance_withdrawal(
        &self,
        cycle: &Cycle,
        withdrawal: &BridgeTransferDao,
    ) -> Result<bool, WalletError> {
        if withdrawal.processed {
            return Ok(false);
        }
        let mut next = withdrawal.clone();
        if next.settlement_timestamp.is_none() {
            let hash = parse_hash(&withdrawal.tx_hash).map_err(err_from!())?;
            let receipt = match cycle.child.client().get_transaction_receipt(hash).await? {
                Some(receipt) => receipt,
                None => return Ok(false),
            };
            let info = match self
                .adapter
                .resolve_batch_info(cycle.child.client(), &receipt)
                .await?
            {
                Some(info) => info,
                None => {
                    log::warn!("Bridge {}: no withdrawal message in {}", self.name, withdrawal.tx_hash);
                    return Ok(false);
                }
            };
            if !self.routes.is_current(cycle.child.chain_id) {
                return Ok(false);
            }
            next.block_number = receipt.block_number.map(|b| b as i64);
            next.batch_number = Some(u256_to_hex(info.batch_number));
            next.index_in_batch = Some(u256_to_hex(info.index_in_batch));
            next.message_hash = info.message_hash.map(|h| format!("{:#x}", h));
            next.settlement_timestamp = Some(info.settlement_timestamp as i64);
        }

        let known_past_window = matches!(next.block_number, Some(block) if block <= cycle.done_block_number);
        let window_passed = known_past_window
            || match (cycle.parent_timestamp, next.settlement_timestamp) {
                (Some(now), Some(ts)) => {
                    now >= ts as u64 + self.component.config().confirmation_window
                }
                _ => false,
            };

        if window_passed {
            // a failed state query still keeps the cursor resolved above
            match self
                .adapter
                .outgoing_message_state(cycle.parent.client(), &next)
                .await
            {
                Ok(_) if !self.routes.is_current(cycle.parent.chain_id) => {
                    log::debug!(
                        "Bridge {}: chain {} switched during check of {}",
                        self.name,
                        cycle.parent.chain_id,
                        withdrawal.tx_hash
                    );
                }
                Ok(state) => {
                    match state {
                        OutgoingMessageState::Executed => next.mark_processed(),
                        OutgoingMessageState::Confirmed => next.mark_done(),
                        OutgoingMessageState::Unconfirmed => {}
                    }
                    if !known_past_window {
                        if let Some(block) = next.block_number {
                            self.raise_done_block_number(block).await?;
                        }
                    }
                }
                Err(err) => log::warn!(
                    "Bridge {}: outgoing state of {} unavailable: {}",
                    self.name,
                    withdrawal.tx_hash,
                    err
                ),
            }
        }
        self.merge(withdrawal, &mut next).await?;
        Ok(next.done != withdrawal.done || next.processed != withdrawal.processed)
    }

    async fn raise_done_block_number(&self, block: i64) -> Result<(), WalletError> {
        {
            let mut conn = self.conn.lock().await;
            set_done_block_number(&mut conn, &self.name, block)
                .await
                .map_err(err_from!())?;
        }
        self.component.update(|s| {
            if block > s.done_block_number {
                s.done_block_number = block;
            }
        });
        Ok(())
    }

    /// Synthesizes transfers for confirmed ledger transactions that called one of
    /// the route's entry points but are not tracked yet, resolving each eagerly.
    /// Returns how many new transfers were created.
    pub async fn backfill(&self) -> Result<usize, WalletError> {
        let cycle = self.begin_cycle().await?;
        let mut created = 0;
        for entry in self.adapter.entry_points() {
            let source = match entry.direction {
                Direction::Deposit => &cycle.parent,
                Direction::Withdraw => &cycle.child,
            };
            let candidates = {
                let mut conn = self.conn.lock().await;
                get_txs_by_method_id(
                    &mut conn,
                    source.chain_id as i64,
                    &entry.method_id(),
                    Some(TxStatus::Confirmed),
                )
                .await
                .map_err(err_from!())?
            };
            let contract = format!("{:#x}", entry.contract);
            for tx in candidates
                .iter()
                .filter(|tx| tx.to_addr.as_deref() == Some(contract.as_str()))
            {
                let transfer = match self.transfer_from_history(entry, source, tx).await {
                    Ok(transfer) => transfer,
                    Err(err) => {
                        log::warn!("Bridge {}: cannot backfill {:?}: {}", self.name, tx.tx_hash, err);
                        continue;
                    }
                };
                let inserted = {
                    let mut conn = self.conn.lock().await;
                    insert_bridge_transfer_if_absent(&mut conn, &transfer)
                        .await
                        .map_err(err_from!())?
                };
                let inserted = match inserted {
                    Some(inserted) => inserted,
                    None => continue,
                };
                created += 1;
                log::info!(
                    "Bridge {}: backfilled {} {}",
                    self.name,
                    inserted.direction,
                    inserted.tx_hash
                );
                let res = match entry.direction {
                    Direction::Deposit => {
                        let counter = self
                            .adapter
                            .deposit_counter(cycle.parent.client(), cycle.child.client())
                            .await
                            .ok();
                        self.advance_deposit(&cycle, counter, &inserted).await
                    }
                    Direction::Withdraw => self.advance_withdrawal(&cycle, &inserted).await,
                };
                if let Err(err) = res {
                    log::warn!("Bridge {}: eager check of {} failed: {}", self.name, inserted.tx_hash, err);
                }
            }
        }
        Ok(created)
    }

    async fn transfer_from_history(
        &self,
        entry: &EntryPoint,
        source: &ChainRoute,
        tx: &TxDao,
    ) -> Result<BridgeTransferDao, WalletError> {
        let tx_hash = tx
            .tx_hash
            .as_deref()
            .ok_or_else(|| crate::err_custom_create!("History record {} has no hash", tx.id))?;
        let data = hex_to_bytes(tx.call_data.as_deref().unwrap_or_default()).map_err(err_from!())?;
        let args = if data.len() >= 4 {
            web3::ethabi::decode(&entry.params, &data[4..]).map_err(err_from!())?
        } else {
            Vec::new()
        };
        let address_arg = |idx: Option<usize>| match idx.and_then(|i| args.get(i)) {
            Some(Token::Address(addr)) => Some(*addr),
            _ => None,
        };
        let amount = match entry.amount_arg.and_then(|i| args.get(i)) {
            Some(Token::Uint(amount)) => *amount,
            _ => hex_to_u256(&tx.val).map_err(err_from!())?,
        };
        let token = address_arg(entry.token_arg)
            .filter(|token| Some(*token) != self.adapter.native_token_alias());
        let from = parse_address(&tx.from_addr).map_err(err_from!())?;

        let mut transfer = BridgeTransferDao::new(
            &self.name,
            entry.direction.as_str(),
            source.chain_id as i64,
            tx_hash,
            &tx.owner_addr,
        );
        transfer.dest_addr = Some(format!("{:#x}", address_arg(entry.dest_arg).unwrap_or(from)));
        transfer.amount = Some(u256_to_hex(amount));
        transfer.block_number = tx.block_number;
        if let Some(token) = token {
            let token = format!("{:#x}", token);
            let metadata = {
                let mut conn = self.conn.lock().await;
                get_static_token(&mut conn, &token, &source.chain_type.to_string())
                    .await
                    .map_err(err_from!())?
            };
            if let Some(metadata) = metadata {
                transfer.token_symbol = Some(metadata.symbol);
                transfer.token_decimals = Some(metadata.decimals);
            }
            transfer.token_addr = Some(token);
        }
        Ok(transfer)
    }

    async fn refresh_counts(&self) -> Result<(), WalletError> {
        let deposits = self.load(BRIDGE_FILTER_PENDING_DEPOSITS).await?.len();
        let withdrawals = self.load(BRIDGE_FILTER_PENDING_WITHDRAWS).await?.len();
        self.component.update(|s| {
            s.pending_deposits = deposits;
            s.pending_withdrawals = withdrawals;
        });
        Ok(())
    }

    /// One monitor cycle: backfill from history, then advance both queues. Errors
    /// of single records are logged and retried next cycle.
    pub async fn poll(&self) -> Result<(), WalletError> {
        match self.backfill().await {
            Ok(0) => {}
            Ok(created) => log::info!("Bridge {}: {} transfers backfilled", self.name, created),
            Err(err) => log::warn!("Bridge {}: backfill failed: {}", self.name, err),
        }
        let cycle = self.begin_cycle().await?;
        let deposits = self.load(BRIDGE_FILTER_PENDING_DEPOSITS).await?;
        let withdrawals = self.load(BRIDGE_FILTER_PENDING_WITHDRAWS).await?;
        let deposits_done = self.advance_deposits(&cycle, deposits).await;
        let withdrawals_advanced = self.advance_withdrawals(&cycle, withdrawals).await;
        log::debug!(
            "Bridge {}: {} deposits done, {} withdrawals advanced",
            self.name,
            deposits_done,
            withdrawals_advanced
        );
        self.refresh_counts().await?;
        self.component.update(|s| s.last_poll = Some(Utc::now()));
        Ok(())
    }
}

#[async_trait]
impl PollTarget for BridgeMonitor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll_once(&self) {
        if let Err(err) = self.poll().await {
            log::error!("Bridge {} poll failed: {}", self.name, err);
        }
    }
}
