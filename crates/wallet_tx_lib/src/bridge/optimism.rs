use super::adapter::*;
use crate::chain::{CallParams, ChainClient, ChainReceipt};
use crate::contracts::{decode_bool, decode_u256, encode_call};
use crate::db::model::BridgeTransferDao;
use crate::error::WalletError;
use crate::setup::BridgeSetup;
use crate::utils::{event_topic, parse_hash};
use crate::{err_configuration, err_custom_create, err_from};
use async_trait::async_trait;
use lazy_static::lazy_static;
use std::str::FromStr;
use web3::ethabi::{ParamType, Token};
use web3::types::{Address, H256, U256};

lazy_static! {
    pub static ref L2_STANDARD_BRIDGE: Address =
        Address::from_str("4200000000000000000000000000000000000010").unwrap();
    pub static ref L1_BLOCK: Address =
        Address::from_str("4200000000000000000000000000000000000015").unwrap();
    pub static ref L2_TO_L1_MESSAGE_PASSER: Address =
        Address::from_str("4200000000000000000000000000000000000016").unwrap();
    /// Stands for ETH in L2StandardBridge withdrawals.
    pub static ref LEGACY_ERC20_ETH: Address =
        Address::from_str("deaddeaddeaddeaddeaddeaddeaddeaddead0000").unwrap();
    static ref MESSAGE_PASSED: H256 =
        event_topic("MessagePassed(uint256,address,address,uint256,uint256,bytes,bytes32)");
}

pub struct OptimismAdapter {
    confirmation_window: u64,
    portal: Address,
    entry_points: Vec<EntryPoint>,
}

impl OptimismAdapter {
    pub fn new(setup: &BridgeSetup) -> Result<Self, WalletError> {
        let get = |key: &str| {
            setup.contracts.get(key).copied().ok_or_else(|| {
                err_configuration!("Bridge {} is missing contract {}", setup.name, key)
            })
        };
        let l1_bridge = get("l1-standard-bridge")?;
        let deposit = |signature, params, token_arg, dest_arg, amount_arg| EntryPoint {
            direction: Direction::Deposit,
            contract: l1_bridge,
            signature,
            params,
            token_arg,
            dest_arg,
            amount_arg,
        };
        let entry_points = vec![
            EntryPoint {
                direction: Direction::Withdraw,
                contract: *L2_STANDARD_BRIDGE,
                signature: "withdraw(address,uint256,uint32,bytes)",
                params: vec![
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Uint(32),
                    ParamType::Bytes,
                ],
                token_arg: Some(0),
                dest_arg: None,
                amount_arg: Some(1),
            },
            EntryPoint {
                direction: Direction::Withdraw,
                contract: *L2_STANDARD_BRIDGE,
                signature: "withdrawTo(address,address,uint256,uint32,bytes)",
                params: vec![
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Uint(32),
                    ParamType::Bytes,
                ],
                token_arg: Some(0),
                dest_arg: Some(1),
                amount_arg: Some(2),
            },
            deposit(
                "depositETH(uint32,bytes)",
                vec![ParamType::Uint(32), ParamType::Bytes],
                None,
                None,
                None,
            ),
            deposit(
                "depositETHTo(address,uint32,bytes)",
                vec![ParamType::Address, ParamType::Uint(32), ParamType::Bytes],
                None,
                Some(0),
                None,
            ),
            deposit(
                "depositERC20(address,address,uint256,uint32,bytes)",
                vec![
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Uint(32),
                    ParamType::Bytes,
                ],
                Some(0),
                None,
                Some(2),
            ),
            deposit(
                "depositERC20To(address,address,address,uint256,uint32,bytes)",
                vec![
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Address,
                    ParamType::Uint(256),
                    ParamType::Uint(32),
                    ParamType::Bytes,
                ],
                Some(0),
                Some(2),
                Some(3),
            ),
        ];
        Ok(OptimismAdapter {
            confirmation_window: setup.confirmation_window,
            portal: get("optimism-portal")?,
            entry_points,
        })
    }
}

#[async_trait]
impl RouteAdapter for OptimismAdapter {
    fn name(&self) -> &'static str {
        "optimism"
    }

    fn confirmation_window(&self) -> u64 {
        self.confirmation_window
    }

    fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    fn native_token_alias(&self) -> Option<Address> {
        Some(*LEGACY_ERC20_ETH)
    }

    /// Deposits are indexed by the parent block that carried them.
    async fn resolve_deposit_index(
        &self,
        receipt: &ChainReceipt,
    ) -> Result<Option<U256>, WalletError> {
        Ok(receipt.block_number.map(U256::from))
    }

    /// Latest parent block the child chain has derived from.
    async fn deposit_counter(
        &self,
        _parent: &dyn ChainClient,
        child: &dyn ChainClient,
    ) -> Result<U256, WalletError> {
        let out = child
            .call(&CallParams::call(*L1_BLOCK, encode_call("number()", &[])))
            .await?;
        decode_u256(&out).map_err(err_from!())
    }

    async fn resolve_batch_info(
        &self,
        child: &dyn ChainClient,
        receipt: &ChainReceipt,
    ) -> Result<Option<WithdrawalInfo>, WalletError> {
        let log = match receipt.logs.iter().find(|log| {
            log.address == *L2_TO_L1_MESSAGE_PASSER
                && log.topics.len() == 4
                && log.topics[0] == *MESSAGE_PASSED
        }) {
            Some(log) => log,
            None => return Ok(None),
        };
        let tokens = web3::ethabi::decode(
            &[
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Bytes,
                ParamType::FixedBytes(32),
            ],
            &log.data,
        )
        .map_err(err_from!())?;
        let withdrawal_hash = match tokens.get(3) {
            Some(Token::FixedBytes(bytes)) if bytes.len() == 32 => H256::from_slice(bytes),
            _ => return Err(err_custom_create!("Malformed MessagePassed log")),
        };
        let block_number = receipt
            .block_number
            .ok_or_else(|| err_custom_create!("Withdrawal receipt without block number"))?;
        let block = match child.get_block(block_number).await? {
            Some(block) => block,
            None => return Ok(None),
        };
        Ok(Some(WithdrawalInfo {
            batch_number: U256::from_big_endian(log.topics[1].as_bytes()),
            index_in_batch: U256::zero(),
            settlement_timestamp: block.timestamp,
            message_hash: Some(withdrawal_hash),
        }))
    }

    async fn outgoing_message_state(
        &self,
        parent: &dyn ChainClient,
        transfer: &BridgeTransferDao,
    ) -> Result<OutgoingMessageState, WalletError> {
        let hash = parse_hash(
            transfer
                .message_hash
                .as_deref()
                .ok_or_else(|| err_custom_create!("Withdrawal has no message hash"))?,
        )
        .map_err(err_from!())?;
        let param = [Token::FixedBytes(hash.as_bytes().to_vec())];

        let finalized = parent
            .call(&CallParams::call(
                self.portal,
                encode_call("finalizedWithdrawals(bytes32)", &param),
            ))
            .await?;
        if decode_bool(&finalized).map_err(err_from!())? {
            return Ok(OutgoingMessageState::Executed);
        }
        let proven = parent
            .call(&CallParams::call(
                self.portal,
                encode_call("provenWithdrawals(bytes32)", &param),
            ))
            .await?;
        let proven = web3::ethabi::decode(
            &[
                ParamType::FixedBytes(32),
                ParamType::Uint(128),
                ParamType::Uint(128),
            ],
            &proven,
        )
        .map_err(err_from!())?;
        match proven.get(1) {
            Some(Token::Uint(timestamp)) if !timestamp.is_zero() => {
                Ok(OutgoingMessageState::Confirmed)
            }
            _ => Ok(OutgoingMessageState::Unconfirmed),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::{ChainBlock, ChainLog};
    use crate::config::BridgeRoute;
    use crate::test_utils::{word, MockChainClient};
    use crate::utils::method_selector;

    pub fn setup() -> BridgeSetup {
        BridgeSetup {
            name: "optimism".to_string(),
            route: BridgeRoute::Optimism,
            parent_chain: "mainnet".to_string(),
            child_chain: "op-mainnet".to_string(),
            confirmation_window: 604_800,
            contracts: [
                ("optimism-portal", Address::from_low_u64_be(0xc001)),
                ("l1-standard-bridge", Address::from_low_u64_be(0xc002)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        }
    }

    fn message_passed_receipt(nonce: u64, withdrawal_hash: H256) -> ChainReceipt {
        ChainReceipt {
            transaction_hash: H256::from_low_u64_be(1),
            block_number: Some(777),
            status: Some(1),
            gas_used: None,
            logs: vec![ChainLog {
                address: *L2_TO_L1_MESSAGE_PASSER,
                topics: vec![
                    *MESSAGE_PASSED,
                    H256::from_low_u64_be(nonce),
                    H256::from_low_u64_be(1),
                    H256::from_low_u64_be(2),
                ],
                data: web3::ethabi::encode(&[
                    Token::Uint(U256::from(1000)),
                    Token::Uint(U256::from(100_000)),
                    Token::Bytes(vec![1, 2, 3]),
                    Token::FixedBytes(withdrawal_hash.as_bytes().to_vec()),
                ]),
            }],
        }
    }

    #[tokio::test]
    async fn test_decode_message_passed() {
        let adapter = OptimismAdapter::new(&setup()).unwrap();
        let child = MockChainClient::new();
        child.state().blocks.insert(
            777,
            ChainBlock {
                number: 777,
                timestamp: 1_690_000_000,
                gas_limit: U256::from(30_000_000u64),
                base_fee_per_gas: None,
            },
        );
        let hash = H256::from_low_u64_be(0xfeed);
        let info = adapter
            .resolve_batch_info(&child, &message_passed_receipt(9, hash))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.batch_number, U256::from(9));
        assert_eq!(info.index_in_batch, U256::zero());
        assert_eq!(info.settlement_timestamp, 1_690_000_000);
        assert_eq!(info.message_hash, Some(hash));
    }

    #[tokio::test]
    async fn test_outgoing_state_from_portal() {
        let adapter = OptimismAdapter::new(&setup()).unwrap();
        let parent = MockChainClient::new();
        let portal = Address::from_low_u64_be(0xc001);
        let mut transfer = BridgeTransferDao::new("optimism", "withdraw", 10, "0x01", "0x02");
        transfer.message_hash = Some(format!("{:#x}", H256::from_low_u64_be(0xfeed)));

        let proven_none = [word(0), word(0), word(0)].concat();
        parent
            .state()
            .call_by_selector
            .insert((portal, method_selector("finalizedWithdrawals(bytes32)")), word(0));
        parent
            .state()
            .call_by_selector
            .insert((portal, method_selector("provenWithdrawals(bytes32)")), proven_none);
        assert_eq!(
            adapter.outgoing_message_state(&parent, &transfer).await.unwrap(),
            OutgoingMessageState::Unconfirmed
        );

        let proven = [word(1), word(1_690_000_500), word(3)].concat();
        parent
            .state()
            .call_by_selector
            .insert((portal, method_selector("provenWithdrawals(bytes32)")), proven);
        assert_eq!(
            adapter.outgoing_message_state(&parent, &transfer).await.unwrap(),
            OutgoingMessageState::Confirmed
        );

        parent
            .state()
            .call_by_selector
            .insert((portal, method_selector("finalizedWithdrawals(bytes32)")), word(1));
        assert_eq!(
            adapter.outgoing_message_state(&parent, &transfer).await.unwrap(),
            OutgoingMessageState::Executed
        );
    }

    #[tokio::test]
    async fn test_deposit_counter_reads_l1_block() {
        let adapter = OptimismAdapter::new(&setup()).unwrap();
        let child = MockChainClient::new();
        child
            .state()
            .call_by_selector
            .insert((*L1_BLOCK, method_selector("number()")), word(18_000_000));
        assert_eq!(
            adapter
                .deposit_counter(&MockChainClient::new(), &child)
                .await
                .unwrap(),
            U256::from(18_000_000)
        );
    }
}
