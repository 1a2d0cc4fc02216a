use crate::chain::{CallParams, ChainClient};
use crate::db::model::*;
use crate::error::WalletError;
use crate::eth::parse_checksummable;
use crate::setup::ChainRoute;
use crate::signer::{FeeParams, UnsignedTx};
use crate::utils::{hex_to_bytes, hex_to_u256, method_id_of, parse_quantity, u256_to_hex};
use crate::{err_custom_create, err_from, err_validation};
use serde::{Deserialize, Serialize};
use web3::types::{Address, U256};

/// Gas of a plain value transfer to an account without code.
pub const TRANSFER_GAS: u64 = 21_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxOrigin {
    Dapp,
    Internal,
}

impl TxOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxOrigin::Dapp => ORIGIN_DAPP,
            TxOrigin::Internal => ORIGIN_INTERNAL,
        }
    }
}

/// Transaction as handed in by a caller. Quantities may be hex or decimal strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    pub chain_id: u64,
    pub from: String,
    pub to: Option<String>,
    pub value: Option<String>,
    pub data: Option<String>,
    pub gas: Option<String>,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTx {
    pub chain_id: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

impl ValidatedTx {
    pub fn has_fee_fields(&self) -> bool {
        self.gas_price.is_some() || self.max_fee_per_gas.is_some()
    }
}

fn non_empty(val: &Option<String>) -> Option<&str> {
    val.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_fee_field(name: &str, val: &Option<String>) -> Result<Option<U256>, WalletError> {
    non_empty(val)
        .map(|v| parse_quantity(v).map_err(|e| err_validation!("Invalid {}: {}", name, e)))
        .transpose()
}

/// Checks a request before anything is stored. Malformed input is a validation
/// error, never coerced.
pub fn validate_request(req: &TxRequest) -> Result<ValidatedTx, WalletError> {
    let from = parse_checksummable(req.from.trim())?;
    let data = match non_empty(&req.data) {
        Some(data) => hex_to_bytes(data).map_err(|e| err_validation!("Invalid data: {}", e))?,
        None => Vec::new(),
    };
    let to = match non_empty(&req.to) {
        Some(to) => Some(parse_checksummable(to)?),
        None if data.is_empty() => {
            return Err(err_validation!(
                "Missing to address, only contract deployments with data may omit it"
            ))
        }
        None => None,
    };
    let value = match non_empty(&req.value) {
        Some(value) if value.starts_with('-') => {
            return Err(err_validation!("Value must be a non-negative integer: {}", value))
        }
        Some(value) => parse_quantity(value)
            .map_err(|e| err_validation!("Value must be a non-negative integer: {}", e))?,
        None => U256::zero(),
    };
    let max_fee_per_gas = parse_fee_field("maxFeePerGas", &req.max_fee_per_gas)?;
    let max_priority_fee_per_gas =
        parse_fee_field("maxPriorityFeePerGas", &req.max_priority_fee_per_gas)?;
    if max_fee_per_gas.is_some() != max_priority_fee_per_gas.is_some() {
        return Err(err_validation!(
            "maxFeePerGas and maxPriorityFeePerGas must be given together"
        ));
    }
    Ok(ValidatedTx {
        chain_id: req.chain_id,
        from,
        to,
        value,
        data,
        gas: parse_fee_field("gas", &req.gas)?,
        gas_price: parse_fee_field("gasPrice", &req.gas_price)?,
        max_fee_per_gas,
        max_priority_fee_per_gas,
    })
}

/// Fills gas and fee fields the caller left out and checks whether the recipient
/// is a contract.
pub async fn estimate_gas(
    client: &dyn ChainClient,
    tx: &mut ValidatedTx,
) -> Result<bool, WalletError> {
    if !tx.has_fee_fields() {
        tx.gas_price = Some(client.gas_price().await?);
    }

    let is_contract_recipient = match tx.to {
        Some(to) => !client.get_code(to).await?.is_empty(),
        None => false,
    };

    if tx.gas.is_none() {
        let gas = if tx.data.is_empty() && tx.to.is_some() && !is_contract_recipient {
            U256::from(TRANSFER_GAS)
        } else {
            let estimated = client
                .estimate_gas(&CallParams {
                    from: Some(tx.from),
                    to: tx.to,
                    value: Some(tx.value),
                    data: Some(tx.data.clone()),
                })
                .await?;
            let padded = estimated * 3 / 2;
            let block = client.get_latest_block().await?;
            let cap = block.gas_limit * 9 / 10;
            if padded > cap {
                log::debug!("Gas estimate {} capped at {}", padded, cap);
                cap
            } else {
                padded
            }
        };
        tx.gas = Some(gas);
    }
    Ok(is_contract_recipient)
}

pub fn create_tx_dao(
    route: &ChainRoute,
    tx: &ValidatedTx,
    is_contract_recipient: bool,
    origin: TxOrigin,
) -> TxDao {
    let from = format!("{:#x}", tx.from);
    TxDao {
        id: uuid::Uuid::new_v4().to_string(),
        owner_addr: from.clone(),
        chain_type: route.chain_type.to_string(),
        kind: KIND_TX.to_string(),
        chain_id: route.chain_id as i64,
        from_addr: from,
        to_addr: tx.to.map(|to| format!("{:#x}", to)),
        val: u256_to_hex(tx.value),
        call_data: if tx.data.is_empty() {
            None
        } else {
            Some(crate::utils::bytes_to_hex(&tx.data))
        },
        method_id: method_id_of(&tx.data),
        nonce: None,
        gas_limit: tx.gas.map(u256_to_hex),
        gas_price: tx.gas_price.map(u256_to_hex),
        max_fee_per_gas: tx.max_fee_per_gas.map(u256_to_hex),
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas.map(u256_to_hex),
        status: TxStatus::Unapproved.to_string(),
        origin: origin.as_str().to_string(),
        created_date: chrono::Utc::now(),
        signed_raw_data: None,
        tx_hash: None,
        submitted_date: None,
        block_number: None,
        confirm_date: None,
        gas_used: None,
        is_contract_recipient,
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

fn opt_hex(val: &Option<String>) -> Result<Option<U256>, WalletError> {
    val.as_deref()
        .map(|v| hex_to_u256(v).map_err(err_from!()))
        .transpose()
}

/// EIP-1559 when both fee fields are on the record, legacy otherwise.
pub fn dao_fee_params(tx: &TxDao) -> Result<FeeParams, WalletError> {
    match (
        opt_hex(&tx.max_fee_per_gas)?,
        opt_hex(&tx.max_priority_fee_per_gas)?,
    ) {
        (Some(max_fee_per_gas), Some(max_priority_fee_per_gas)) => Ok(FeeParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        }),
        _ => Ok(FeeParams::Legacy {
            gas_price: opt_hex(&tx.gas_price)?
                .ok_or_else(|| err_custom_create!("Missing gas price on tx {}", tx.id))?,
        }),
    }
}

pub fn dao_to_unsigned_tx(tx: &TxDao) -> Result<UnsignedTx, WalletError> {
    Ok(UnsignedTx {
        chain_id: tx.chain_id as u64,
        nonce: opt_hex(&tx.nonce)?.ok_or_else(|| err_custom_create!("Missing nonce"))?,
        to: tx
            .to_addr
            .as_deref()
            .map(|to| crate::utils::parse_address(to).map_err(err_from!()))
            .transpose()?,
        value: hex_to_u256(&tx.val).map_err(err_from!())?,
        data: tx
            .call_data
            .as_deref()
            .map(|d| hex_to_bytes(d).map_err(err_from!()))
            .transpose()?
            .unwrap_or_default(),
        gas: opt_hex(&tx.gas_limit)?.ok_or_else(|| err_custom_create!("Missing gas limit"))?,
        fee: dao_fee_params(tx)?,
    })
}

/// `val * factor`, rounded up and always strictly greater than `val`.
pub fn bump_value(val: U256, factor: f64) -> U256 {
    let per_mille = U256::from((factor * 1000.0).round() as u64);
    let bumped = (val * per_mille + U256::from(999)) / U256::from(1000);
    if bumped > val {
        bumped
    } else {
        val + 1
    }
}

pub fn bump_fees(fee: &FeeParams, factor: f64) -> FeeParams {
    match fee {
        FeeParams::Legacy { gas_price } => FeeParams::Legacy {
            gas_price: bump_value(*gas_price, factor),
        },
        FeeParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => FeeParams::Eip1559 {
            max_fee_per_gas: bump_value(*max_fee_per_gas, factor),
            max_priority_fee_per_gas: bump_value(*max_priority_fee_per_gas, factor),
        },
    }
}

/// Writes the fee fields of `fee` onto a record. Legacy price is kept alongside
/// EIP-1559 fields when the record carried both.
pub fn apply_fees(tx: &mut TxDao, fee: &FeeParams, factor: f64) -> Result<(), WalletError> {
    match fee {
        FeeParams::Legacy { gas_price } => tx.gas_price = Some(u256_to_hex(*gas_price)),
        FeeParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            tx.max_fee_per_gas = Some(u256_to_hex(*max_fee_per_gas));
            tx.max_priority_fee_per_gas = Some(u256_to_hex(*max_priority_fee_per_gas));
            if let Some(gas_price) = opt_hex(&tx.gas_price)? {
                tx.gas_price = Some(u256_to_hex(bump_value(gas_price, factor)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::ChainType;
    use crate::test_utils::MockChainClient;
    use std::sync::Arc;

    const A: &str = "0x001066290077e38f222cc6009c0c7a91d5192303";
    const B: &str = "0xb1c4d937a1b9bfc17a2eb92d3577f8b66763bfc1";

    fn request(to: Option<&str>, data: Option<&str>) -> TxRequest {
        TxRequest {
            chain_id: 1,
            from: A.to_string(),
            to: to.map(str::to_string),
            value: Some("0x1".to_string()),
            data: data.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_boundaries() {
        let err = validate_request(&request(None, None)).unwrap_err();
        assert!(err.is_validation());
        assert!(validate_request(&request(None, Some("0x6080"))).is_ok());

        let mut req = request(Some(B), None);
        req.value = Some("-1".to_string());
        assert!(validate_request(&req).unwrap_err().is_validation());
        req.value = Some("1.5".to_string());
        assert!(validate_request(&req).unwrap_err().is_validation());

        let mut req = request(Some(B), None);
        req.from = "".to_string();
        assert!(validate_request(&req).unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_simple_transfer_uses_flat_gas() {
        let client = MockChainClient::new();
        let mut tx = validate_request(&request(Some(B), None)).unwrap();
        let is_contract = estimate_gas(&client, &mut tx).await.unwrap();
        assert!(!is_contract);
        assert_eq!(tx.gas, Some(U256::from(0x5208)));
        assert_eq!(tx.gas_price, Some(U256::from(1_000_000_000u64)));
        assert_eq!(client.call_count("eth_estimateGas"), 0);
    }

    #[tokio::test]
    async fn test_contract_call_padded_and_capped() {
        let client = MockChainClient::new();
        let to = crate::utils::parse_address(B).unwrap();
        client.state().code.insert(to, vec![0x60, 0x80]);
        let mut tx = validate_request(&request(Some(B), Some("0xa9059cbb"))).unwrap();
        assert!(estimate_gas(&client, &mut tx).await.unwrap());
        assert_eq!(tx.gas, Some(U256::from(75_000)));

        client.state().estimate = Ok(U256::from(29_000_000u64));
        let mut tx = validate_request(&request(Some(B), Some("0xa9059cbb"))).unwrap();
        estimate_gas(&client, &mut tx).await.unwrap();
        assert_eq!(tx.gas, Some(U256::from(27_000_000u64)));
    }

    #[test]
    fn test_record_and_unsigned_tx() {
        let route = ChainRoute::new("mainnet", ChainType::Ethereum, 1, Arc::new(MockChainClient::new()));
        let mut tx = validate_request(&request(Some(B), None)).unwrap();
        tx.gas = Some(U256::from(TRANSFER_GAS));
        tx.max_fee_per_gas = Some(U256::from(100));
        tx.max_priority_fee_per_gas = Some(U256::from(2));
        let mut dao = create_tx_dao(&route, &tx, false, TxOrigin::Dapp);
        assert_eq!(dao.status, "unapproved");
        assert_eq!(dao.val, "0x1");
        assert_eq!(dao.gas_limit.as_deref(), Some("0x5208"));

        assert!(dao_to_unsigned_tx(&dao).is_err());
        dao.nonce = Some("0x5".to_string());
        let unsigned = dao_to_unsigned_tx(&dao).unwrap();
        assert_eq!(unsigned.nonce, U256::from(5));
        assert_eq!(
            unsigned.fee,
            FeeParams::Eip1559 {
                max_fee_per_gas: U256::from(100),
                max_priority_fee_per_gas: U256::from(2)
            }
        );
    }

    #[test]
    fn test_bump() {
        assert_eq!(bump_value(U256::from(100), 1.1), U256::from(110));
        assert_eq!(bump_value(U256::from(1), 1.1), U256::from(2));
        assert_eq!(
            bump_fees(&FeeParams::Legacy { gas_price: U256::from(1000) }, 1.25),
            FeeParams::Legacy { gas_price: U256::from(1250) }
        );
    }
}
