use crate::chain::{ChainClient, ChainReceipt};
use crate::db::model::BridgeTransferDao;
use crate::error::WalletError;
use crate::utils::method_selector;
use async_trait::async_trait;
use web3::ethabi::ParamType;
use web3::types::{Address, H256, U256};

/// Progress of a withdrawal message on the parent chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingMessageState {
    Unconfirmed,
    Confirmed,
    Executed,
}

/// Settlement cursor of a withdrawal, read once from its receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalInfo {
    pub batch_number: U256,
    pub index_in_batch: U256,
    pub settlement_timestamp: u64,
    pub message_hash: Option<H256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Deposit,
    Withdraw,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => crate::db::model::DIRECTION_DEPOSIT,
            Direction::Withdraw => crate::db::model::DIRECTION_WITHDRAW,
        }
    }
}

/// A bridge contract function that starts a transfer. Argument indexes point into
/// `params`; a missing amount means the native value of the transaction, a missing
/// destination means the sender.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub direction: Direction,
    pub contract: Address,
    pub signature: &'static str,
    pub params: Vec<ParamType>,
    pub token_arg: Option<usize>,
    pub dest_arg: Option<usize>,
    pub amount_arg: Option<usize>,
}

impl EntryPoint {
    pub fn selector(&self) -> [u8; 4] {
        method_selector(self.signature)
    }

    pub fn method_id(&self) -> String {
        format!("0x{}", hex::encode(self.selector()))
    }
}

/// The parts of the settlement protocol that differ between rollups.
#[async_trait]
pub trait RouteAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Minimum wall-clock delay in seconds before a withdrawal can be finalized.
    fn confirmation_window(&self) -> u64;

    fn entry_points(&self) -> &[EntryPoint];

    /// Token address standing for the native currency, if the route uses one.
    fn native_token_alias(&self) -> Option<Address> {
        None
    }

    /// Position of a deposit in the parent to child message queue.
    async fn resolve_deposit_index(
        &self,
        receipt: &ChainReceipt,
    ) -> Result<Option<U256>, WalletError>;

    /// Number of deposits the child chain has consumed so far.
    async fn deposit_counter(
        &self,
        parent: &dyn ChainClient,
        child: &dyn ChainClient,
    ) -> Result<U256, WalletError>;

    /// Batch, index and timestamp of a withdrawal, `None` when the receipt carries
    /// no withdrawal message.
    async fn resolve_batch_info(
        &self,
        child: &dyn ChainClient,
        receipt: &ChainReceipt,
    ) -> Result<Option<WithdrawalInfo>, WalletError>;

    async fn outgoing_message_state(
        &self,
        parent: &dyn ChainClient,
        transfer: &BridgeTransferDao,
    ) -> Result<OutgoingMessageState, WalletError>;
}
