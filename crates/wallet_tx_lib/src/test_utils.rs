//! Scripted chain client and signer for unit tests.

use crate::chain::{CallParams, ChainBlock, ChainClient, ChainReceipt, ChainTransaction};
use crate::{err_create, err_custom_create};
use crate::db::model::*;
use crate::error::WalletError;
use crate::signer::{SignedTx, TxSigner, UnsignedTx};
use crate::utils::{bytes_to_hex, keccak256, method_id_of, u256_to_hex};
use chrono::{TimeZone, Utc};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use web3::types::{Address, H256, U256};

pub struct MockState {
    pub gas_price: U256,
    pub nonce: U256,
    pub estimate: Result<U256, String>,
    pub latest_block: ChainBlock,
    pub blocks: HashMap<u64, ChainBlock>,
    pub code: HashMap<Address, Vec<u8>>,
    pub transactions: HashMap<H256, ChainTransaction>,
    pub receipts: HashMap<H256, ChainReceipt>,
    /// eth_call answers by exact (to, data), checked before `call_by_selector`.
    pub call_exact: HashMap<(Address, Vec<u8>), Vec<u8>>,
    pub call_by_selector: HashMap<(Address, [u8; 4]), Vec<u8>>,
    pub send_results: VecDeque<Result<H256, String>>,
    pub fail_transport: bool,
    pub delay: Option<Duration>,
    pub sent: Vec<Vec<u8>>,
    pub calls: Vec<&'static str>,
}

impl Default for MockState {
    fn default() -> Self {
        MockState {
            gas_price: U256::from(1_000_000_000u64),
            nonce: U256::zero(),
            estimate: Ok(U256::from(50_000u64)),
            latest_block: ChainBlock {
                number: 1000,
                timestamp: 1_700_000_000,
                gas_limit: U256::from(30_000_000u64),
                base_fee_per_gas: Some(U256::from(1_000_000_000u64)),
            },
            blocks: HashMap::new(),
            code: HashMap::new(),
            transactions: HashMap::new(),
            receipts: HashMap::new(),
            call_exact: HashMap::new(),
            call_by_selector: HashMap::new(),
            send_results: VecDeque::new(),
            fail_transport: false,
            delay: None,
            sent: Vec::new(),
            calls: Vec::new(),
        }
    }
}

#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == name).count()
    }

    async fn enter(&self, name: &'static str) -> Result<(), WalletError> {
        let (delay, fail) = {
            let mut state = self.state();
            state.calls.push(name);
            (state.delay, state.fail_transport)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(err_create!(web3::Error::Unreachable));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_transaction_by_hash(
        &self,
        hash: H256,
    ) -> Result<Option<ChainTransaction>, WalletError> {
        self.enter("eth_getTransactionByHash").await?;
        Ok(self.state().transactions.get(&hash).cloned())
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<ChainReceipt>, WalletError> {
        self.enter("eth_getTransactionReceipt").await?;
        Ok(self.state().receipts.get(&hash).cloned())
    }

    async fn get_transaction_count(
        &self,
        _address: Address,
        _pending: bool,
    ) -> Result<U256, WalletError> {
        self.enter("eth_getTransactionCount").await?;
        Ok(self.state().nonce)
    }

    async fn get_code(&self, address: Address) -> Result<Vec<u8>, WalletError> {
        self.enter("eth_getCode").await?;
        Ok(self.state().code.get(&address).cloned().unwrap_or_default())
    }

    async fn get_latest_block(&self) -> Result<ChainBlock, WalletError> {
        self.enter("eth_getBlockByNumber").await?;
        Ok(self.state().latest_block.clone())
    }

    async fn get_block(&self, number: u64) -> Result<Option<ChainBlock>, WalletError> {
        self.enter("eth_getBlockByNumber").await?;
        Ok(self.state().blocks.get(&number).cloned())
    }

    async fn estimate_gas(&self, _params: &CallParams) -> Result<U256, WalletError> {
        self.enter("eth_estimateGas").await?;
        self.state()
            .estimate
            .clone()
            .map_err(|e| err_custom_create!("{}", e))
    }

    async fn gas_price(&self) -> Result<U256, WalletError> {
        self.enter("eth_gasPrice").await?;
        Ok(self.state().gas_price)
    }

    async fn call(&self, params: &CallParams) -> Result<Vec<u8>, WalletError> {
        self.enter("eth_call").await?;
        let to = params.to.unwrap_or_default();
        let data = params.data.clone().unwrap_or_default();
        let state = self.state();
        if let Some(out) = state.call_exact.get(&(to, data.clone())) {
            return Ok(out.clone());
        }
        let mut selector = [0u8; 4];
        if data.len() >= 4 {
            selector.copy_from_slice(&data[..4]);
        }
        state
            .call_by_selector
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| err_custom_create!("execution reverted"))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, WalletError> {
        self.enter("eth_sendRawTransaction").await?;
        let mut state = self.state();
        state.sent.push(raw.to_vec());
        match state.send_results.pop_front() {
            Some(Ok(hash)) => Ok(hash),
            Some(Err(e)) => Err(err_custom_create!("{}", e)),
            None => Ok(H256::from(keccak256(raw))),
        }
    }
}

/// Signs by hashing a debug rendering of the transaction. Keeps every request.
#[derive(Default)]
pub struct MockSigner {
    pub signed: Mutex<Vec<(UnsignedTx, Address)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_signed(&self) -> Option<(UnsignedTx, Address)> {
        self.signed.lock().unwrap().last().cloned()
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl TxSigner for MockSigner {
    async fn sign(&self, tx: &UnsignedTx, from: Address) -> Result<SignedTx, WalletError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.signed.lock().unwrap().push((tx.clone(), from));
        let raw = format!("{:?}/{:#x}", tx, from).into_bytes();
        Ok(SignedTx {
            hash: H256::from(keccak256(&raw)),
            raw,
        })
    }
}

pub fn word(val: u64) -> Vec<u8> {
    let mut out = [0u8; 32];
    U256::from(val).to_big_endian(&mut out);
    out.to_vec()
}

/// A confirmed ledger record of `owner` calling `to` with `data`, as history sync
/// would store it.
pub fn confirmed_tx(owner: &str, chain_id: i64, to: Address, data: &[u8], block: i64) -> TxDao {
    let created = Utc.timestamp_opt(1_690_000_000 + block * 12, 0).unwrap();
    TxDao {
        id: uuid::Uuid::new_v4().to_string(),
        owner_addr: owner.to_lowercase(),
        chain_type: "ethereum".to_string(),
        kind: KIND_TX.to_string(),
        chain_id,
        from_addr: owner.to_lowercase(),
        to_addr: Some(format!("{:#x}", to)),
        val: "0x0".to_string(),
        call_data: Some(bytes_to_hex(data)),
        method_id: method_id_of(data),
        nonce: Some(u256_to_hex(U256::from(block))),
        gas_limit: None,
        gas_price: None,
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        status: TxStatus::Confirmed.to_string(),
        origin: ORIGIN_HISTORY.to_string(),
        created_date: created,
        signed_raw_data: None,
        tx_hash: Some(format!("{:#x}", H256::from_low_u64_be(block as u64 + 0x1_0000))),
        submitted_date: None,
        block_number: Some(block),
        confirm_date: Some(created),
        gas_used: None,
        is_contract_recipient: true,
        speed_up_of: None,
        cancel_tx_hash: None,
        cancel_date: None,
        token_addr: None,
        token_symbol: None,
        token_decimals: None,
        token_amount: None,
        error: None,
    }
}
