use crate::contracts::DUMMY_RPC_PROVIDER;
use crate::error::WalletError;
use crate::eth::get_eth_addr_from_secret;
use crate::{err_configuration, err_from};
use async_trait::async_trait;
use secp256k1::SecretKey;
use web3::types::{Address, Bytes, TransactionParameters, H256, U256, U64};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeParams {
    Legacy {
        gas_price: U256,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Fully populated transaction ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub chain_id: u64,
    pub nonce: U256,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas: U256,
    pub fee: FeeParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub raw: Vec<u8>,
    pub hash: H256,
}

/// Key management lives elsewhere; the engine only asks for signatures.
#[async_trait]
pub trait TxSigner: Send + Sync {
    async fn sign(&self, tx: &UnsignedTx, from: Address) -> Result<SignedTx, WalletError>;
}

pub struct PrivateKeySigner {
    secret_keys: Vec<SecretKey>,
}

impl PrivateKeySigner {
    pub fn new(secret_keys: Vec<SecretKey>) -> Self {
        Self { secret_keys }
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.secret_keys.iter().map(get_eth_addr_from_secret).collect()
    }
}

fn to_transaction_parameters(tx: &UnsignedTx) -> TransactionParameters {
    // every field is filled in so signing never reaches the (dummy) provider
    match &tx.fee {
        FeeParams::Legacy { gas_price } => TransactionParameters {
            nonce: Some(tx.nonce),
            to: tx.to,
            gas: tx.gas,
            gas_price: Some(*gas_price),
            value: tx.value,
            data: Bytes(tx.data.clone()),
            chain_id: Some(tx.chain_id),
            transaction_type: None,
            access_list: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        },
        FeeParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => TransactionParameters {
            nonce: Some(tx.nonce),
            to: tx.to,
            gas: tx.gas,
            gas_price: Some(*max_fee_per_gas),
            value: tx.value,
            data: Bytes(tx.data.clone()),
            chain_id: Some(tx.chain_id),
            transaction_type: Some(U64::from(2)),
            access_list: None,
            max_fee_per_gas: Some(*max_fee_per_gas),
            max_priority_fee_per_gas: Some(*max_priority_fee_per_gas),
        },
    }
}

#[async_trait]
impl TxSigner for PrivateKeySigner {
    async fn sign(&self, tx: &UnsignedTx, from: Address) -> Result<SignedTx, WalletError> {
        let secret_key = self
            .secret_keys
            .iter()
            .find(|sk| get_eth_addr_from_secret(sk) == from)
            .ok_or_else(|| err_configuration!("No private key for address: {:#x}", from))?;

        let tx_object = to_transaction_parameters(tx);
        log::debug!("Signing transaction: {:#?}", tx_object);
        let signed = DUMMY_RPC_PROVIDER
            .accounts()
            .sign_transaction(tx_object, secret_key)
            .await
            .map_err(err_from!())?;
        Ok(SignedTx {
            raw: signed.raw_transaction.0,
            hash: signed.transaction_hash,
        })
    }
}
