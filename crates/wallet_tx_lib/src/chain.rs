use crate::err_create;
use crate::error::{TimeoutError, WalletError};
use crate::err_from;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use web3::transports::Http;
use web3::types::{
    Address, BlockId, BlockNumber, Bytes, CallRequest, TransactionId, H256, U256, U64,
};
use web3::Web3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: H256,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub nonce: U256,
    pub block_number: Option<u64>,
    pub input: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReceipt {
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    pub status: Option<u64>,
    pub gas_used: Option<U256>,
    pub logs: Vec<ChainLog>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: U256,
    pub base_fee_per_gas: Option<U256>,
}

/// Parameters for `eth_call` and `eth_estimateGas`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallParams {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub data: Option<Vec<u8>>,
}

impl CallParams {
    pub fn call(to: Address, data: Vec<u8>) -> Self {
        CallParams {
            from: None,
            to: Some(to),
            value: None,
            data: Some(data),
        }
    }
}

/// Read-only query handle for one network plus raw transaction broadcast.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_transaction_by_hash(
        &self,
        hash: H256,
    ) -> Result<Option<ChainTransaction>, WalletError>;
    async fn get_transaction_receipt(&self, hash: H256)
        -> Result<Option<ChainReceipt>, WalletError>;
    async fn get_transaction_count(
        &self,
        address: Address,
        pending: bool,
    ) -> Result<U256, WalletError>;
    async fn get_code(&self, address: Address) -> Result<Vec<u8>, WalletError>;
    async fn get_latest_block(&self) -> Result<ChainBlock, WalletError>;
    async fn get_block(&self, number: u64) -> Result<Option<ChainBlock>, WalletError>;
    async fn estimate_gas(&self, params: &CallParams) -> Result<U256, WalletError>;
    async fn gas_price(&self) -> Result<U256, WalletError>;
    async fn call(&self, params: &CallParams) -> Result<Vec<u8>, WalletError>;
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, WalletError>;
}

pub async fn with_timeout<T, F>(duration: Duration, call: &str, fut: F) -> Result<T, WalletError>
where
    F: Future<Output = Result<T, WalletError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(res) => res,
        Err(_elapsed) => Err(err_create!(TimeoutError::new(call, duration))),
    }
}

/// Bounds every call of the wrapped client so a dead endpoint fails instead of hanging.
pub struct TimeoutChainClient {
    inner: Arc<dyn ChainClient>,
    timeout: Duration,
    heavy_timeout: Duration,
}

impl TimeoutChainClient {
    pub fn new(inner: Arc<dyn ChainClient>, timeout: Duration, heavy_timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            heavy_timeout,
        }
    }
}

#[async_trait]
impl ChainClient for TimeoutChainClient {
    async fn get_transaction_by_hash(
        &self,
        hash: H256,
    ) -> Result<Option<ChainTransaction>, WalletError> {
        with_timeout(
            self.timeout,
            "eth_getTransactionByHash",
            self.inner.get_transaction_by_hash(hash),
        )
        .await
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<ChainReceipt>, WalletError> {
        with_timeout(
            self.heavy_timeout,
            "eth_getTransactionReceipt",
            self.inner.get_transaction_receipt(hash),
        )
        .await
    }

    async fn get_transaction_count(
        &self,
        address: Address,
        pending: bool,
    ) -> Result<U256, WalletError> {
        with_timeout(
            self.timeout,
            "eth_getTransactionCount",
            self.inner.get_transaction_count(address, pending),
        )
        .await
    }

    async fn get_code(&self, address: Address) -> Result<Vec<u8>, WalletError> {
        with_timeout(self.timeout, "eth_getCode", self.inner.get_code(address)).await
    }

    async fn get_latest_block(&self) -> Result<ChainBlock, WalletError> {
        with_timeout(
            self.timeout,
            "eth_getBlockByNumber",
            self.inner.get_latest_block(),
        )
        .await
    }

    async fn get_block(&self, number: u64) -> Result<Option<ChainBlock>, WalletError> {
        with_timeout(
            self.timeout,
            "eth_getBlockByNumber",
            self.inner.get_block(number),
        )
        .await
    }

    async fn estimate_gas(&self, params: &CallParams) -> Result<U256, WalletError> {
        with_timeout(
            self.heavy_timeout,
            "eth_estimateGas",
            self.inner.estimate_gas(params),
        )
        .await
    }

    async fn gas_price(&self) -> Result<U256, WalletError> {
        with_timeout(self.timeout, "eth_gasPrice", self.inner.gas_price()).await
    }

    async fn call(&self, params: &CallParams) -> Result<Vec<u8>, WalletError> {
        with_timeout(self.heavy_timeout, "eth_call", self.inner.call(params)).await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, WalletError> {
        with_timeout(
            self.heavy_timeout,
            "eth_sendRawTransaction",
            self.inner.send_raw_transaction(raw),
        )
        .await
    }
}

#[derive(Clone, Debug)]
pub struct Web3ChainClient {
    providers: Vec<Web3<Http>>,
}

impl Web3ChainClient {
    pub fn new(rpc_endpoints: &[String]) -> Result<Self, WalletError> {
        let mut providers = Vec::new();
        for endp in rpc_endpoints {
            let transport = web3::transports::Http::new(endp).map_err(err_from!())?;
            providers.push(Web3::new(transport));
        }
        if providers.is_empty() {
            return Err(crate::err_configuration!("No rpc endpoints given"));
        }
        Ok(Self { providers })
    }

    fn provider(&self) -> &Web3<Http> {
        let mut rng = rand::thread_rng();
        &self.providers[rng.gen_range(0..self.providers.len())]
    }
}

fn to_call_request(params: &CallParams) -> CallRequest {
    CallRequest {
        from: params.from,
        to: params.to,
        gas: None,
        gas_price: None,
        value: params.value,
        data: params.data.clone().map(Bytes),
        transaction_type: None,
        access_list: None,
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
    }
}

fn convert_block(block: web3::types::Block<H256>) -> ChainBlock {
    ChainBlock {
        number: block.number.unwrap_or_default().as_u64(),
        timestamp: block.timestamp.low_u64(),
        gas_limit: block.gas_limit,
        base_fee_per_gas: block.base_fee_per_gas,
    }
}

#[async_trait]
impl ChainClient for Web3ChainClient {
    async fn get_transaction_by_hash(
        &self,
        hash: H256,
    ) -> Result<Option<ChainTransaction>, WalletError> {
        let tx = self
            .provider()
            .eth()
            .transaction(TransactionId::Hash(hash))
            .await
            .map_err(err_from!())?;
        Ok(tx.map(|tx| ChainTransaction {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            nonce: tx.nonce,
            block_number: tx.block_number.map(|n| n.as_u64()),
            input: tx.input.0,
        }))
    }

    async fn get_transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<ChainReceipt>, WalletError> {
        let receipt = self
            .provider()
            .eth()
            .transaction_receipt(hash)
            .await
            .map_err(err_from!())?;
        Ok(receipt.map(|receipt| ChainReceipt {
            transaction_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            status: receipt.status.map(|s| s.as_u64()),
            gas_used: receipt.gas_used,
            logs: receipt
                .logs
                .into_iter()
                .map(|log| ChainLog {
                    address: log.address,
                    topics: log.topics,
                    data: log.data.0,
                })
                .collect(),
        }))
    }

    async fn get_transaction_count(
        &self,
        address: Address,
        pending: bool,
    ) -> Result<U256, WalletError> {
        let nonce_type = match pending {
            true => BlockNumber::Pending,
            false => BlockNumber::Latest,
        };
        self.provider()
            .eth()
            .transaction_count(address, Some(nonce_type))
            .await
            .map_err(err_from!())
    }

    async fn get_code(&self, address: Address) -> Result<Vec<u8>, WalletError> {
        let code = self
            .provider()
            .eth()
            .code(address, None)
            .await
            .map_err(err_from!())?;
        Ok(code.0)
    }

    async fn get_latest_block(&self) -> Result<ChainBlock, WalletError> {
        let block = self
            .provider()
            .eth()
            .block(BlockId::Number(BlockNumber::Latest))
            .await
            .map_err(err_from!())?
            .ok_or_else(|| crate::err_custom_create!("Latest block not returned"))?;
        Ok(convert_block(block))
    }

    async fn get_block(&self, number: u64) -> Result<Option<ChainBlock>, WalletError> {
        let block = self
            .provider()
            .eth()
            .block(BlockId::Number(BlockNumber::Number(U64::from(number))))
            .await
            .map_err(err_from!())?;
        Ok(block.map(convert_block))
    }

    async fn estimate_gas(&self, params: &CallParams) -> Result<U256, WalletError> {
        self.provider()
            .eth()
            .estimate_gas(to_call_request(params), None)
            .await
            .map_err(err_from!())
    }

    async fn gas_price(&self) -> Result<U256, WalletError> {
        self.provider().eth().gas_price().await.map_err(err_from!())
    }

    async fn call(&self, params: &CallParams) -> Result<Vec<u8>, WalletError> {
        let res = self
            .provider()
            .eth()
            .call(to_call_request(params), None)
            .await
            .map_err(err_from!())?;
        Ok(res.0)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<H256, WalletError> {
        self.provider()
            .eth()
            .send_raw_transaction(Bytes(raw.to_vec()))
            .await
            .map_err(err_from!())
    }
}
