use crate::db::model::*;
use crate::db::ops::*;
use crate::error::{TransactionFailedError, WalletError};
use crate::events::{EngineEvent, EventBus};
use crate::observable::{ChangedKeys, Observable};
use crate::service::PollTarget;
use crate::setup::ChainRoutes;
use crate::signer::{FeeParams, TxSigner, UnsignedTx};
use crate::transaction::*;
use crate::utils::{bytes_to_hex, hex_to_u256, parse_address, parse_hash, u256_to_hex};
use crate::{err_configuration, err_create, err_custom_create, err_from, err_validation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use web3::types::U256;

#[derive(Debug, Clone, PartialEq)]
pub struct TxManagerConfig {
    pub poll_interval: Duration,
    pub transaction_timeout: Duration,
    pub speed_up_factor: f64,
}

impl ChangedKeys for TxManagerConfig {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.poll_interval != previous.poll_interval {
            keys.push("pollInterval");
        }
        if self.transaction_timeout != previous.transaction_timeout {
            keys.push("transactionTimeout");
        }
        if self.speed_up_factor != previous.speed_up_factor {
            keys.push("speedUpFactor");
        }
        keys
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxManagerState {
    pub status_counts: HashMap<String, i64>,
    pub last_poll: Option<DateTime<Utc>>,
}

impl ChangedKeys for TxManagerState {
    fn changed_keys(&self, previous: &Self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.status_counts != previous.status_counts {
            keys.push("statusCounts");
        }
        if self.last_poll != previous.last_poll {
            keys.push("lastPoll");
        }
        keys
    }
}

/// Resolves once the record it was issued for reaches a terminal status.
#[derive(Debug)]
pub struct TxHandle {
    pub id: String,
    receiver: watch::Receiver<TxStatus>,
}

impl TxHandle {
    pub fn current(&self) -> TxStatus {
        *self.receiver.borrow()
    }

    pub async fn wait(mut self) -> TxStatus {
        loop {
            let status = *self.receiver.borrow();
            if status.is_terminal() {
                return status;
            }
            if self.receiver.changed().await.is_err() {
                return *self.receiver.borrow();
            }
        }
    }
}

/// Lifecycle of locally originated transactions: submit, approve (sign and
/// broadcast), cancel, stop, speed up and confirmation polling.
pub struct TxManager {
    conn: Arc<Mutex<SqliteConnection>>,
    routes: Arc<ChainRoutes>,
    signer: Option<Arc<dyn TxSigner>>,
    bus: EventBus,
    component: Observable<TxManagerConfig, TxManagerState>,
    waiters: std::sync::Mutex<HashMap<String, watch::Sender<TxStatus>>>,
}

impl TxManager {
    pub fn new(
        conn: Arc<Mutex<SqliteConnection>>,
        routes: Arc<ChainRoutes>,
        signer: Option<Arc<dyn TxSigner>>,
        bus: EventBus,
        config: TxManagerConfig,
    ) -> Self {
        TxManager {
            conn,
            routes,
            signer,
            bus,
            component: Observable::new(config, TxManagerState::default()),
            waiters: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn component(&self) -> &Observable<TxManagerConfig, TxManagerState> {
        &self.component
    }

    pub async fn get_transaction(&self, id: &str) -> Result<Option<TxDao>, WalletError> {
        let mut conn = self.conn.lock().await;
        get_tx(&mut conn, id).await.map_err(err_from!())
    }

    async fn load(&self, id: &str) -> Result<TxDao, WalletError> {
        self.get_transaction(id)
            .await?
            .ok_or_else(|| err_validation!("Unknown transaction id {}", id))
    }

    fn register_waiter(&self, id: &str, status: TxStatus) -> TxHandle {
        let (sender, receiver) = watch::channel(status);
        self.waiters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), sender);
        TxHandle {
            id: id.to_string(),
            receiver,
        }
    }

    fn notify(&self, id: &str, status: TxStatus) {
        {
            let mut waiters = self.waiters.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(sender) = waiters.get(id) {
                let _ = sender.send(status);
            }
            if status.is_terminal() {
                waiters.remove(id);
            }
        }
        self.bus.publish(EngineEvent::TransactionStatusChanged {
            id: id.to_string(),
            status: status.to_string(),
        });
    }

    /// Moves a record along one edge of the state machine and persists it together
    /// with any fields already set on `tx`. Refused when the stored record moved on
    /// since `tx` was read.
    async fn transition(&self, tx: &mut TxDao, next: TxStatus) -> Result<(), WalletError> {
        let current = {
            let mut conn = self.conn.lock().await;
            let stored = get_tx(&mut conn, &tx.id)
                .await
                .map_err(err_from!())?
                .ok_or_else(|| err_custom_create!("Transaction {} no longer exists", tx.id))?;
            if stored.status != tx.status {
                return Err(err_custom_create!(
                    "Transaction {} changed concurrently to {}",
                    tx.id,
                    stored.status
                ));
            }
            let current =
                TxStatus::from_str(&stored.status).map_err(|e| err_custom_create!("{}", e))?;
            if !current.can_transition_to(next) {
                return Err(err_custom_create!(
                    "Transaction {} cannot move from {} to {}",
                    tx.id,
                    current,
                    next
                ));
            }
            if tx.cancel_tx_hash.is_none() {
                tx.cancel_tx_hash = stored.cancel_tx_hash;
                tx.cancel_date = stored.cancel_date;
            }
            tx.status = next.to_string();
            update_tx(&mut conn, tx).await.map_err(err_from!())?;
            current
        };
        log::debug!("Transaction {}: {} -> {}", tx.id, current, next);
        self.notify(&tx.id, next);
        Ok(())
    }

    /// Marks a record failed with `err`, unless it already reached a terminal status.
    async fn fail(&self, tx: &mut TxDao, err: &WalletError) {
        tx.error = Some(err.to_string());
        if let Err(e) = self.transition(tx, TxStatus::Failed).await {
            log::error!("Could not mark transaction {} failed: {}", tx.id, e);
        }
    }

    async fn refresh_counts(&self) -> Result<(), WalletError> {
        let counts = {
            let mut conn = self.conn.lock().await;
            get_status_counts(&mut conn).await.map_err(err_from!())?
        };
        self.component.update(|s| {
            s.status_counts = counts.into_iter().collect();
        });
        Ok(())
    }

    /// Validates, estimates and stores a new `unapproved` record.
    pub async fn submit(&self, request: TxRequest, origin: TxOrigin) -> Result<TxHandle, WalletError> {
        let mut validated = validate_request(&request)?;
        let route = self.routes.resolve(validated.chain_id)?;
        let is_contract_recipient = estimate_gas(route.client(), &mut validated).await?;
        let tx = create_tx_dao(&route, &validated, is_contract_recipient, origin);
        {
            let mut conn = self.conn.lock().await;
            insert_tx(&mut conn, &tx).await.map_err(err_from!())?;
        }
        log::info!(
            "New transaction {} from {} on chain {}",
            tx.id,
            tx.from_addr,
            tx.chain_id
        );
        let handle = self.register_waiter(&tx.id, TxStatus::Unapproved);
        self.refresh_counts().await?;
        Ok(handle)
    }

    /// Signs and broadcasts an `unapproved` record. Any failure past the status
    /// check marks the record `failed`; nothing is retried.
    pub async fn approve(&self, id: &str) -> Result<TxDao, WalletError> {
        let mut tx = self.load(id).await?;
        if tx.status != TxStatus::Unapproved.as_str() {
            return Err(err_validation!(
                "Transaction {} is {}, only unapproved transactions can be approved",
                id,
                tx.status
            ));
        }
        let res = self.approve_and_send(&mut tx).await;
        if let Err(err) = &res {
            log::error!("Failed to send transaction {}: {}", tx.id, err);
            self.fail(&mut tx, err).await;
        }
        self.refresh_counts().await?;
        res.map(|_| tx)
    }

    async fn approve_and_send(&self, tx: &mut TxDao) -> Result<(), WalletError> {
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| err_configuration!("No signer configured"))?;
        let chain_id = tx.chain_id as u64;
        let route = self.routes.resolve(chain_id)?;
        self.transition(tx, TxStatus::Approved).await?;

        let from = parse_address(&tx.from_addr).map_err(err_from!())?;
        if tx.nonce.is_none() {
            let nonce = route.client().get_transaction_count(from, true).await?;
            tx.nonce = Some(u256_to_hex(nonce));
        }
        let unsigned = dao_to_unsigned_tx(tx)?;
        let signed = signer.sign(&unsigned, from).await?;
        tx.signed_raw_data = Some(bytes_to_hex(&signed.raw));
        self.transition(tx, TxStatus::Signed).await?;

        if !self.routes.is_current(chain_id) {
            return Err(err_configuration!(
                "Chain {} is no longer active, transaction not broadcast",
                chain_id
            ));
        }
        if let Some(original) = &tx.speed_up_of {
            let original = self.load(original).await?;
            if original.status != TxStatus::Submitted.as_str() {
                return Err(err_validation!(
                    "Transaction {} is already {}, speed-up not broadcast",
                    original.id,
                    original.status
                ));
            }
        }
        let hash = route.client().send_raw_transaction(&signed.raw).await?;
        tx.tx_hash = Some(format!("{:#x}", hash));
        tx.submitted_date = Some(Utc::now());
        self.transition(tx, TxStatus::Submitted).await?;
        log::info!(
            "Transaction {} sent with nonce {}, tx hash: {:#x}",
            tx.id,
            unsigned.nonce,
            hash
        );
        self.bus.publish(EngineEvent::TransactionActivity {
            address: tx.owner_addr.clone(),
            chain_id,
        });
        Ok(())
    }

    /// Caller declined the transaction before signing.
    pub async fn reject(&self, id: &str) -> Result<(), WalletError> {
        let mut tx = self.load(id).await?;
        self.transition(&mut tx, TxStatus::Rejected).await?;
        self.refresh_counts().await
    }

    /// Drops a record that was never broadcast and tells its waiters it was
    /// rejected. Returns false for records already on chain.
    pub async fn cancel(&self, id: &str) -> Result<bool, WalletError> {
        let tx = self.load(id).await?;
        let status = tx.tx_status().map_err(|e| err_custom_create!("{}", e))?;
        if tx.tx_hash.is_some() || status.is_terminal() || status == TxStatus::Submitted {
            log::debug!("Transaction {} is {}, cancel ignored", id, status);
            return Ok(false);
        }
        {
            let mut conn = self.conn.lock().await;
            delete_tx(&mut conn, id).await.map_err(err_from!())?;
        }
        self.notify(id, TxStatus::Rejected);
        self.refresh_counts().await?;
        Ok(true)
    }

    /// Neutralizes a stuck transaction with a zero-value self-send on the same nonce.
    /// The original record keeps its status; polling settles it either way.
    pub async fn stop_transaction(
        &self,
        id: &str,
        fee_override: Option<FeeParams>,
    ) -> Result<String, WalletError> {
        let tx = self.load(id).await?;
        if tx.status != TxStatus::Submitted.as_str() {
            return Err(err_validation!("Transaction {} is {}, not submitted", id, tx.status));
        }
        let signer = self
            .signer
            .clone()
            .ok_or_else(|| err_configuration!("No signer configured"))?;
        let route = self.routes.resolve(tx.chain_id as u64)?;
        let factor = self.component.config().speed_up_factor;
        let fee = match fee_override {
            Some(fee) => fee,
            None => bump_fees(&dao_fee_params(&tx)?, factor),
        };
        let from = parse_address(&tx.from_addr).map_err(err_from!())?;
        let unsigned = UnsignedTx {
            chain_id: tx.chain_id as u64,
            nonce: hex_to_u256(tx.nonce.as_deref().unwrap_or_default()).map_err(err_from!())?,
            to: Some(from),
            value: U256::zero(),
            data: Vec::new(),
            gas: U256::from(TRANSFER_GAS),
            fee,
        };
        let signed = signer.sign(&unsigned, from).await?;
        let hash = route.client().send_raw_transaction(&signed.raw).await?;
        let cancel_hash = format!("{:#x}", hash);
        let stored = {
            let mut conn = self.conn.lock().await;
            set_cancel_attempt(&mut conn, &tx.id, &cancel_hash, Utc::now())
                .await
                .map_err(err_from!())?
        };
        if stored {
            log::info!("Cancellation {} sent for transaction {}", cancel_hash, tx.id);
        } else {
            log::warn!(
                "Transaction {} settled while cancellation {} was sent",
                tx.id,
                cancel_hash
            );
        }
        Ok(cancel_hash)
    }

    /// Re-sends a submitted transaction with bumped fees as a new linked record on
    /// the same nonce. Returns the new record.
    pub async fn speed_up(&self, id: &str) -> Result<TxDao, WalletError> {
        let original = self.load(id).await?;
        if original.status != TxStatus::Submitted.as_str() {
            return Err(err_validation!(
                "Transaction {} is {}, not submitted",
                id,
                original.status
            ));
        }
        let factor = self.component.config().speed_up_factor;
        let fee = bump_fees(&dao_fee_params(&original)?, factor);

        let mut faster = original.clone();
        faster.id = uuid::Uuid::new_v4().to_string();
        faster.status = TxStatus::Unapproved.to_string();
        faster.origin = TxOrigin::Internal.as_str().to_string();
        faster.created_date = Utc::now();
        faster.speed_up_of = Some(original.id.clone());
        faster.signed_raw_data = None;
        faster.tx_hash = None;
        faster.submitted_date = None;
        faster.cancel_tx_hash = None;
        faster.cancel_date = None;
        faster.error = None;
        apply_fees(&mut faster, &fee, factor)?;
        {
            let mut conn = self.conn.lock().await;
            insert_tx(&mut conn, &faster).await.map_err(err_from!())?;
        }
        log::info!("Speeding up transaction {} as {}", original.id, faster.id);
        self.approve(&faster.id).await
    }

    /// Removes every record of `owner`.
    pub async fn remove_address(&self, owner: &str) -> Result<u64, WalletError> {
        let removed = {
            let mut conn = self.conn.lock().await;
            delete_by_owner(&mut conn, owner).await.map_err(err_from!())?
        };
        self.refresh_counts().await?;
        Ok(removed)
    }

    /// One confirmation sweep over every submitted record, all checks concurrent.
    pub async fn poll(&self) -> Result<usize, WalletError> {
        let submitted = {
            let mut conn = self.conn.lock().await;
            get_transactions(
                &mut conn,
                Some(TRANSACTION_FILTER_SUBMITTED),
                None,
                Some(TRANSACTION_ORDER_BY_CREATE_DATE),
            )
            .await
            .map_err(err_from!())?
        };
        let count = submitted.len();
        let results = join_all(submitted.into_iter().map(|tx| async move {
            let id = tx.id.clone();
            (id, self.check_submitted(tx).await)
        }))
        .await;
        for (id, res) in results {
            if let Err(err) = res {
                log::warn!("Checking transaction {} failed, will retry: {}", id, err);
            }
        }
        self.refresh_counts().await?;
        self.component.update(|s| s.last_poll = Some(Utc::now()));
        Ok(count)
    }

    async fn check_submitted(&self, mut tx: TxDao) -> Result<(), WalletError> {
        let chain_id = tx.chain_id as u64;
        let route = match self.routes.resolve(chain_id) {
            Ok(route) => route,
            Err(err) => {
                self.fail(&mut tx, &err).await;
                return Ok(());
            }
        };
        let hash = parse_hash(tx.tx_hash.as_deref().unwrap_or_default()).map_err(err_from!())?;
        let found = route.client().get_transaction_by_hash(hash).await?;
        let cancel = match tx.cancel_tx_hash.as_deref() {
            Some(cancel) => {
                let cancel = parse_hash(cancel).map_err(err_from!())?;
                route.client().get_transaction_by_hash(cancel).await?
            }
            None => None,
        };
        if !self.routes.is_current(chain_id) {
            log::debug!("Chain {} switched during check of {}", chain_id, tx.id);
            return Ok(());
        }

        let seen = found.is_some();
        if let Some(mined) = found.filter(|t| t.block_number.is_some()) {
            let receipt = route.client().get_transaction_receipt(hash).await?;
            // re-read: a sibling may have settled this record meanwhile
            let mut tx = self.load(&tx.id).await?;
            if tx.status != TxStatus::Submitted.as_str() {
                return Ok(());
            }
            tx.block_number = mined.block_number.map(|b| b as i64);
            tx.confirm_date = Some(Utc::now());
            if let Some(receipt) = &receipt {
                tx.gas_used = receipt.gas_used.map(u256_to_hex);
            }
            match receipt.and_then(|r| r.status) {
                Some(0) => {
                    let err = err_create!(TransactionFailedError::new(&format!(
                        "Transaction {:#x} reverted",
                        hash
                    )));
                    self.fail(&mut tx, &err).await;
                }
                _ => {
                    self.transition(&mut tx, TxStatus::Confirmed).await?;
                    log::info!("Transaction {} confirmed: {:#x}", tx.id, hash);
                }
            }
            self.settle_same_nonce(&tx).await?;
            self.bus.publish(EngineEvent::TransactionActivity {
                address: tx.owner_addr.clone(),
                chain_id,
            });
            return Ok(());
        }

        let mut tx = self.load(&tx.id).await?;
        if tx.status != TxStatus::Submitted.as_str() {
            return Ok(());
        }

        if let Some(cancel) = cancel.filter(|t| t.block_number.is_some()) {
            tx.error = Some(format!("Replaced by cancellation {:#x}", cancel.hash));
            self.transition(&mut tx, TxStatus::Cancelled).await?;
            log::info!("Transaction {} cancelled by {:#x}", tx.id, cancel.hash);
            return Ok(());
        }

        if !seen {
            let since = tx.cancel_date.or(tx.submitted_date).unwrap_or(tx.created_date);
            let timeout = self.component.config().transaction_timeout;
            let elapsed = Utc::now() - since;
            if elapsed.num_seconds() > timeout.as_secs() as i64 {
                let err = err_custom_create!(
                    "Transaction {:#x} not found on chain after {}s",
                    hash,
                    elapsed.num_seconds()
                );
                log::warn!("Transaction {} timed out", tx.id);
                self.fail(&mut tx, &err).await;
            }
        }
        Ok(())
    }

    /// Once one record of a same-nonce group is mined the others can never be, so
    /// they are moved to `cancelled` naming the winner.
    async fn settle_same_nonce(&self, winner: &TxDao) -> Result<(), WalletError> {
        if winner.nonce.is_none() {
            return Ok(());
        }
        let siblings = {
            let mut conn = self.conn.lock().await;
            get_same_nonce_txs(&mut conn, winner)
                .await
                .map_err(err_from!())?
        };
        for mut sibling in siblings {
            let status = match sibling.tx_status() {
                Ok(status) => status,
                Err(_) => continue,
            };
            if status.is_terminal() || status == TxStatus::Unapproved {
                continue;
            }
            sibling.error = Some(format!(
                "Nonce consumed by {}",
                winner.tx_hash.clone().unwrap_or_default()
            ));
            if let Err(err) = self.transition(&mut sibling, TxStatus::Cancelled).await {
                log::warn!("Could not cancel sibling {}: {}", sibling.id, err);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PollTarget for TxManager {
    fn name(&self) -> &str {
        "transactions"
    }

    async fn poll_once(&self) {
        match self.poll().await {
            Ok(count) => log::debug!("Checked {} submitted transactions", count),
            Err(err) => log::error!("Transaction poll failed: {}", err),
        }
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.component.config().poll_interval)
    }
}
