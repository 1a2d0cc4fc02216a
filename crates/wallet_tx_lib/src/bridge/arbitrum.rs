use super::adapter::*;
use crate::chain::{CallParams, ChainClient, ChainReceipt};
use crate::contracts::{decode_bool, decode_u256, encode_call};
use crate::db::model::BridgeTransferDao;
use crate::error::WalletError;
use crate::setup::BridgeSetup;
use crate::utils::{event_topic, hex_to_u256};
use crate::{err_configuration, err_custom_create, err_from};
use async_trait::async_trait;
use lazy_static::lazy_static;
use std::str::FromStr;
use web3::ethabi::{ParamType, Token};
use web3::types::{Address, H256, U256};

lazy_static! {
    pub static ref ARB_SYS: Address =
        Address::from_str("0000000000000000000000000000000000000064").unwrap();
    static ref INBOX_MESSAGE_DELIVERED: H256 = event_topic("InboxMessageDelivered(uint256,bytes)");
    static ref INBOX_MESSAGE_DELIVERED_FROM_ORIGIN: H256 =
        event_topic("InboxMessageDeliveredFromOrigin(uint256)");
    static ref L2_TO_L1_TRANSACTION: H256 = event_topic(
        "L2ToL1Transaction(address,address,uint256,uint256,uint256,uint256,uint256,uint256,uint256,bytes)"
    );
}

pub struct ArbitrumAdapter {
    confirmation_window: u64,
    sequencer_inbox: Address,
    outbox: Address,
    entry_points: Vec<EntryPoint>,
}

fn contract(setup: &BridgeSetup, key: &str) -> Result<Address, WalletError> {
    setup
        .contracts
        .get(key)
        .copied()
        .ok_or_else(|| err_configuration!("Bridge {} is missing contract {}", setup.name, key))
}

impl ArbitrumAdapter {
    pub fn new(setup: &BridgeSetup) -> Result<Self, WalletError> {
        let inbox = contract(setup, "inbox")?;
        let l1_gateway = contract(setup, "l1-gateway-router")?;
        let l2_gateway = contract(setup, "l2-gateway-router")?;
        let entry_points = vec![
            EntryPoint {
                direction: Direction::Withdraw,
                contract: *ARB_SYS,
                signature: "withdrawEth(address)",
                params: vec![ParamType::Address],
                token_arg: None,
                dest_arg: Some(0),
                amount_arg: None,
            },
            EntryPoint {
                direction: Direction::Withdraw,
                contract: l2_gateway,
                signature: "outboundTransfer(address,address,uint256,bytes)",
                params: vec![
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Bytes,
                ],
                token_arg: Some(0),
                dest_arg: Some(1),
                amount_arg: Some(2),
            },
            EntryPoint {
                direction: Direction::Deposit,
                contract: inbox,
                signature: "depositEth()",
                params: vec![],
                token_arg: None,
                dest_arg: None,
                amount_arg: None,
            },
            EntryPoint {
                direction: Direction::Deposit,
                contract: l1_gateway,
                signature: "outboundTransfer(address,address,uint256,uint256,uint256,bytes)",
                params: vec![
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Uint(256),
                    ParamType::Bytes,
                ],
                token_arg: Some(0),
                dest_arg: Some(1),
                amount_arg: Some(2),
            },
        ];
        Ok(ArbitrumAdapter {
            confirmation_window: setup.confirmation_window,
            sequencer_inbox: contract(setup, "sequencer-inbox")?,
            outbox: contract(setup, "outbox")?,
            entry_points,
        })
    }

    async fn call(
        &self,
        client: &dyn ChainClient,
        to: Address,
        signature: &str,
        params: &[Token],
    ) -> Result<Vec<u8>, WalletError> {
        client
            .call(&CallParams::call(to, encode_call(signature, params)))
            .await
    }
}

fn stored_u256(val: &Option<String>, field: &str) -> Result<U256, WalletError> {
    let val = val
        .as_deref()
        .ok_or_else(|| err_custom_create!("Withdrawal has no {}", field))?;
    hex_to_u256(val).map_err(err_from!())
}

#[async_trait]
impl RouteAdapter for ArbitrumAdapter {
    fn name(&self) -> &'static str {
        "arbitrum"
    }

    fn confirmation_window(&self) -> u64 {
        self.confirmation_window
    }

    fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    async fn resolve_deposit_index(
        &self,
        receipt: &ChainReceipt,
    ) -> Result<Option<U256>, WalletError> {
        Ok(receipt
            .logs
            .iter()
            .find(|log| {
                log.topics.len() >= 2
                    && (log.topics[0] == *INBOX_MESSAGE_DELIVERED
                        || log.topics[0] == *INBOX_MESSAGE_DELIVERED_FROM_ORIGIN)
            })
            .map(|log| U256::from_big_endian(log.topics[1].as_bytes())))
    }

    async fn deposit_counter(
        &self,
        parent: &dyn ChainClient,
        _child: &dyn ChainClient,
    ) -> Result<U256, WalletError> {
        let out = self
            .call(parent, self.sequencer_inbox, "totalDelayedMessagesRead()", &[])
            .await?;
        decode_u256(&out).map_err(err_from!())
    }

    async fn resolve_batch_info(
        &self,
        _child: &dyn ChainClient,
        receipt: &ChainReceipt,
    ) -> Result<Option<WithdrawalInfo>, WalletError> {
        let log = match receipt.logs.iter().find(|log| {
            log.address == *ARB_SYS
                && log.topics.len() == 4
                && log.topics[0] == *L2_TO_L1_TRANSACTION
        }) {
            Some(log) => log,
            None => return Ok(None),
        };
        let tokens = web3::ethabi::decode(
            &[
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Bytes,
            ],
            &log.data,
        )
        .map_err(err_from!())?;
        let uint = |i: usize| match tokens.get(i) {
            Some(Token::Uint(v)) => Ok(*v),
            _ => Err(err_custom_create!("Malformed L2ToL1Transaction log")),
        };
        Ok(Some(WithdrawalInfo {
            batch_number: U256::from_big_endian(log.topics[3].as_bytes()),
            index_in_batch: uint(1)?,
            settlement_timestamp: uint(4)?.low_u64(),
            message_hash: Some(log.topics[2]),
        }))
    }

    async fn outgoing_message_state(
        &self,
        parent: &dyn ChainClient,
        transfer: &BridgeTransferDao,
    ) -> Result<OutgoingMessageState, WalletError> {
        let batch = stored_u256(&transfer.batch_number, "batch number")?;
        let index = stored_u256(&transfer.index_in_batch, "index in batch")?;

        let exists = self
            .call(parent, self.outbox, "outboxEntryExists(uint256)", &[Token::Uint(batch)])
            .await?;
        if !decode_bool(&exists).map_err(err_from!())? {
            return Ok(OutgoingMessageState::Unconfirmed);
        }
        let entry = self
            .call(parent, self.outbox, "outboxEntries(uint256)", &[Token::Uint(batch)])
            .await?;
        let entry = Address::from(H256::from_slice(
            entry
                .get(..32)
                .ok_or_else(|| err_custom_create!("Malformed outbox entry"))?,
        ));
        let spent = self
            .call(parent, entry, "spentOutput(uint256)", &[Token::Uint(index)])
            .await?;
        if decode_bool(&spent).map_err(err_from!())? {
            Ok(OutgoingMessageState::Executed)
        } else {
            Ok(OutgoingMessageState::Confirmed)
        }
    }
}
