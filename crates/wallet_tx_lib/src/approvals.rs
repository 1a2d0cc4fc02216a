//! Derives the token allowances an owner granted from confirmed `approve` calls in
//! the ledger, then keeps them in line with the live on-chain value.

use crate::chain::CallParams;
use crate::contracts::{
    decode_erc20_approve, decode_multicall_aggregate, decode_u256, get_erc20_allowance,
    get_multicall_aggregate, ERC20_APPROVE_SELECTOR,
};
use crate::db::model::*;
use crate::db::ops::*;
use crate::err_from;
use crate::error::WalletError;
use crate::events::{EngineEvent, EventBus};
use crate::observable::{ChangedKeys, Observable};
use crate::service::{PollTarget, PollTrigger};
use crate::setup::{ChainRoute, ChainRoutes};
use crate::utils::{bytes_to_hex, hex_to_bytes, parse_address, u256_to_hex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use web3::types::{Address, U256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDeriverConfig {
    /// Maximum number of allowance reads folded into one multicall.
    pub batch_size: usize,
    pub refresh_all: bool,
}

impl ChangedKeys for ApprovalDeriverConfig {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.batch_size != previous.batch_size {
            keys.push("batchSize");
        }
        if self.refresh_all != previous.refresh_all {
            keys.push("refreshAll");
        }
        keys
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalDeriverState {
    pub derived: usize,
    pub allowance_reads: usize,
    pub last_poll: Option<DateTime<Utc>>,
}

impl ChangedKeys for ApprovalDeriverState {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.derived != previous.derived {
            keys.push("derived");
        }
        if self.allowance_reads != previous.allowance_reads {
            keys.push("allowanceReads");
        }
        if self.last_poll != previous.last_poll {
            keys.push("lastPoll");
        }
        keys
    }
}


pub struct ApprovalDeriver {
    conn: Arc<Mutex<SqliteConnection>>,
    routes: Arc<ChainRoutes>,
    bus: EventBus,
    component: Observable<ApprovalDeriverConfig, ApprovalDeriverState>,
    write_lock: Mutex<()>,
}

impl ApprovalDeriver {
    pub fn new(
        conn: Arc<Mutex<SqliteConnection>>,
        routes: Arc<ChainRoutes>,
        bus: EventBus,
        config: ApprovalDeriverConfig,
    ) -> Self {
        ApprovalDeriver {
            conn,
            routes,
            bus,
            component: Observable::new(config, ApprovalDeriverState::default()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn component(&self) -> &Observable<ApprovalDeriverConfig, ApprovalDeriverState> {
        &self.component
    }

    pub async fn approvals(
        &self,
        owner: &str,
        chain_id: u64,
    ) -> Result<Vec<ApprovalEventGroup>, WalletError> {
        let mut conn = self.conn.lock().await;
        get_approval_groups(&mut conn, &owner.to_lowercase(), chain_id as i64)
            .await
            .map_err(err_from!())
    }

    /// Records every confirmed `approve` call on `chain_id` that is newer than what is
    /// known for its (owner, token, spender). Returns how many entries now wait for a
    /// live read.
    pub async fn scan_chain(&self, chain_id: u64) -> Result<usize, WalletError> {
        let txs = {
            let mut conn = self.conn.lock().await;
            get_txs_by_method_id(
                &mut conn,
                chain_id as i64,
                &bytes_to_hex(&ERC20_APPROVE_SELECTOR[..]),
                Some(TxStatus::Confirmed),
            )
            .await
            .map_err(err_from!())?
        };
        let mut written = 0;
        for tx in txs {
            let approval = match approval_from_tx(&tx) {
                Some(approval) => approval,
                None => {
                    log::debug!("Skipping malformed approve call {}", tx.id);
                    continue;
                }
            };
            let mut conn = self.conn.lock().await;
            if upsert_approval_if_newer(&mut conn, &approval)
                .await
                .map_err(err_from!())?
            {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Reads the live allowance of every entry and writes it back. Entries read as
    /// zero are deleted. Returns the number of reads that succeeded.
    async fn refresh(
        &self,
        route: &ChainRoute,
        entries: Vec<ApprovalDao>,
    ) -> Result<usize, WalletError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let batch_size = self.component.config().batch_size.max(1);
        let mut read = 0;
        let mut changed_owners = BTreeSet::new();
        for chunk in entries.chunks(batch_size) {
            let allowances = self.read_allowances(route, chunk).await;
            for (entry, allowance) in chunk.iter().zip(allowances) {
                let allowance = match allowance {
                    Some(allowance) => allowance,
                    None => continue,
                };
                read += 1;
                match self.write_back(entry, allowance).await {
                    Ok(true) => {
                        changed_owners.insert(entry.owner.clone());
                    }
                    Ok(false) => {}
                    Err(err) => log::warn!(
                        "Cannot store allowance of {} for {}: {}",
                        entry.token_addr,
                        entry.spender,
                        err
                    ),
                }
            }
        }
        for owner in changed_owners {
            self.bus.publish(EngineEvent::ApprovalsUpdated {
                owner,
                chain_id: route.chain_id,
            });
        }
        self.component.update(|s| s.allowance_reads += read);
        Ok(read)
    }

    /// Stores a live read unless a newer approval replaced the entry meanwhile.
    async fn write_back(&self, entry: &ApprovalDao, allowance: U256) -> Result<bool, WalletError> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.conn.lock().await;
        let current = find_approval(
            &mut conn,
            &entry.owner,
            entry.chain_id,
            &entry.token_addr,
            &entry.spender,
        )
        .await
        .map_err(err_from!())?;
        let current = match current {
            Some(current) if current.approve_date == entry.approve_date => current,
            _ => return Ok(false),
        };
        if allowance.is_zero() {
            revoke_approval(&mut conn, &current)
                .await
                .map_err(err_from!())?;
            log::info!(
                "Allowance of {} for {} revoked, entry removed",
                current.token_addr,
                current.spender
            );
            return Ok(true);
        }
        let allowance = u256_to_hex(allowance);
        update_approval_allowance(&mut conn, current.id, &allowance, Utc::now())
            .await
            .map_err(err_from!())?;
        Ok(current.allowance != allowance || current.checked_date.is_none())
    }

    /// One result per entry, `None` where the read failed. Uses one multicall per
    /// chunk when the chain has one, individual calls otherwise or when it reverts.
    async fn read_allowances(&self, route: &ChainRoute, chunk: &[ApprovalDao]) -> Vec<Option<U256>> {
        let calls = match chunk
            .iter()
            .map(allowance_call)
            .collect::<Result<Vec<_>, WalletError>>()
        {
            Ok(calls) => calls,
            Err(err) => {
                log::warn!("Cannot encode allowance reads on {}: {}", route.name, err);
                return vec![None; chunk.len()];
            }
        };
        if let Some(multicall) = route.multicall_address {
            match self.read_multicall(route, multicall, &calls).await {
                Ok(results) if results.len() == calls.len() => return results,
                Ok(results) => log::warn!(
                    "Multicall on {} returned {} results for {} calls",
                    route.name,
                    results.len(),
                    calls.len()
                ),
                Err(err) => log::warn!(
                    "Multicall on {} failed, reading one by one: {}",
                    route.name,
                    err
                ),
            }
        }
        let reads = calls.into_iter().map(|(token, data)| async move {
            let out = route.client().call(&CallParams::call(token, data)).await?;
            decode_u256(&out).map_err(err_from!())
        });
        futures::future::join_all(reads)
            .await
            .into_iter()
            .zip(chunk)
            .map(|(res, entry)| match res {
                Ok(allowance) => Some(allowance),
                Err(err) => {
                    log::warn!(
                        "Allowance read of {} for {} failed: {}",
                        entry.token_addr,
                        entry.spender,
                        err
                    );
                    None
                }
            })
            .collect()
    }

    async fn read_multicall(
        &self,
        route: &ChainRoute,
        multicall: Address,
        calls: &[(Address, Vec<u8>)],
    ) -> Result<Vec<Option<U256>>, WalletError> {
        let data = get_multicall_aggregate(calls).map_err(err_from!())?;
        let out = route.client().call(&CallParams::call(multicall, data)).await?;
        Ok(decode_multicall_aggregate(&out)
            .map_err(err_from!())?
            .iter()
            .map(|res| decode_u256(res).ok())
            .collect())
    }

    async fn chains(&self) -> Result<Vec<u64>, WalletError> {
        let owners = {
            let mut conn = self.conn.lock().await;
            get_tracked_owners(&mut conn).await.map_err(err_from!())?
        };
        let chains: BTreeSet<u64> = owners.into_iter().map(|(_, chain_id)| chain_id as u64).collect();
        Ok(chains.into_iter().collect())
    }

    async fn poll_chain(&self, chain_id: u64, refresh_all: bool) -> Result<(), WalletError> {
        let route = self.routes.resolve(chain_id)?;
        let derived = self.scan_chain(chain_id).await?;
        let entries = {
            let mut conn = self.conn.lock().await;
            let res = if refresh_all {
                get_all_approvals_on_chain(&mut conn, chain_id as i64).await
            } else {
                get_pending_approvals(&mut conn, chain_id as i64).await
            };
            res.map_err(err_from!())?
        };
        let read = self.refresh(&route, entries).await?;
        if derived > 0 || read > 0 {
            log::info!(
                "Approvals on {}: {} derived, {} allowances read",
                route.name,
                derived,
                read
            );
        }
        self.component.update(|s| s.derived += derived);
        Ok(())
    }

    /// Scans every chain with tracked activity and reads pending allowances.
    pub async fn poll(&self) -> Result<(), WalletError> {
        let refresh_all = self.component.config().refresh_all;
        for chain_id in self.chains().await? {
            if let Err(err) = self.poll_chain(chain_id, refresh_all).await {
                log::warn!("Approval scan of chain {} failed: {}", chain_id, err);
            }
        }
        self.component.update(|s| s.last_poll = Some(Utc::now()));
        Ok(())
    }

    /// Re-reads every known entry on every chain, not only those pending a read.
    pub async fn refresh_all(&self) -> Result<usize, WalletError> {
        let mut read = 0;
        for chain_id in self.chains().await? {
            let route = match self.routes.resolve(chain_id) {
                Ok(route) => route,
                Err(err) => {
                    log::warn!("{}", err);
                    continue;
                }
            };
            let entries = {
                let mut conn = self.conn.lock().await;
                get_all_approvals_on_chain(&mut conn, chain_id as i64)
                    .await
                    .map_err(err_from!())?
            };
            read += self.refresh(&route, entries).await?;
        }
        Ok(read)
    }
}

fn allowance_call(entry: &ApprovalDao) -> Result<(Address, Vec<u8>), WalletError> {
    let token = parse_address(&entry.token_addr).map_err(err_from!())?;
    let owner = parse_address(&entry.owner).map_err(err_from!())?;
    let spender = parse_address(&entry.spender).map_err(err_from!())?;
    Ok((
        token,
        get_erc20_allowance(owner, spender).map_err(err_from!())?,
    ))
}

/// The approval an `approve` ledger record stands for, allowance still unread.
fn approval_from_tx(tx: &TxDao) -> Option<ApprovalDao> {
    let data = hex_to_bytes(tx.call_data.as_deref()?).ok()?;
    let (spender, amount) = decode_erc20_approve(&data)?;
    Some(ApprovalDao {
        id: 0,
        owner: tx.from_addr.to_lowercase(),
        chain_id: tx.chain_id,
        token_addr: tx.to_addr.as_deref()?.to_lowercase(),
        spender: format!("{:#x}", spender),
        initial_allowance: u256_to_hex(amount),
        allowance: "0x0".to_string(),
        approve_date: tx.confirm_date.unwrap_or(tx.created_date),
        tx_hash: tx.tx_hash.clone()?,
        checked_date: None,
    })
}

#[async_trait]
impl PollTarget for ApprovalDeriver {
    fn name(&self) -> &str {
        "approvals"
    }

    async fn poll_once(&self) {
        if let Err(err) = self.poll().await {
            log::error!("Approval poll failed: {}", err);
        }
    }
}

/// Wakes the deriver whenever new transaction activity is announced on the bus.
pub fn listen_for_activity(bus: &EventBus, trigger: PollTrigger) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(EngineEvent::TransactionActivity { address, chain_id }) => {
                    log::debug!("Activity of {} on {}, rescanning approvals", address, chain_id);
                    trigger.request();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Approval listener skipped {} events", skipped);
                    trigger.request();
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
