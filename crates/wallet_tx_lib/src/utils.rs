use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use web3::types::{Address, H256, U256};

#[derive(Debug, Clone)]
pub struct ConversionError {
    pub msg: String,
}

impl ConversionError {
    pub fn from(msg: String) -> Self {
        Self { msg }
    }
}

impl Display for ConversionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Error during conversion: {}", self.msg)
    }
}

impl Error for ConversionError {
    fn description(&self) -> &str {
        "Conversion error"
    }
}

pub fn gwei_to_u256(gas: f64) -> Result<U256, ConversionError> {
    pub const GWEI: f64 = 1.0E9;
    if gas < 0.0 {
        return Err(ConversionError {
            msg: "Gas price cannot be negative".to_string(),
        });
    }
    if gas > 1.0E9 {
        return Err(ConversionError {
            msg: "Gas price cannot be greater than 1E9".to_string(),
        });
    }
    if gas.is_nan() {
        return Err(ConversionError {
            msg: "Gas price cannot be NaN".to_string(),
        });
    }
    Ok(U256::from((gas * GWEI) as u64))
}

/// Formats a raw token amount with the given number of decimals (18 when unknown).
pub fn u256_to_rust_dec(amount: U256, decimals: Option<u32>) -> Result<Decimal, ConversionError> {
    let decimals = decimals.unwrap_or(18);
    if decimals > 28 {
        return Err(ConversionError::from(format!(
            "Decimals {} out of range",
            decimals
        )));
    }
    let mut dec = Decimal::from_str(&amount.to_string())
        .map_err(|err| ConversionError::from(format!("Invalid decimal {}: {}", amount, err)))?;
    dec.set_scale(decimals)
        .map_err(|err| ConversionError::from(format!("Cannot scale {}: {}", amount, err)))?;
    Ok(dec.normalize())
}

/// Quantities are persisted as 0x-prefixed lowercase hex without leading zeros.
pub fn u256_to_hex(val: U256) -> String {
    format!("{:#x}", val)
}

pub fn hex_to_u256(val: &str) -> Result<U256, ConversionError> {
    let trimmed = val.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| ConversionError::from(format!("Expected 0x prefixed quantity: {}", val)))?;
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|err| ConversionError::from(format!("Invalid hex quantity {}: {}", val, err)))
}

/// Accepts either a 0x-prefixed hex quantity or a plain decimal string.
pub fn parse_quantity(val: &str) -> Result<U256, ConversionError> {
    let trimmed = val.trim();
    if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
        hex_to_u256(trimmed)
    } else {
        U256::from_dec_str(trimmed)
            .map_err(|err| ConversionError::from(format!("Invalid quantity {}: {:?}", val, err)))
    }
}

pub fn bytes_to_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

pub fn hex_to_bytes(data: &str) -> Result<Vec<u8>, ConversionError> {
    let digits = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(digits)
        .map_err(|err| ConversionError::from(format!("Invalid hex data {}: {}", data, err)))
}

pub fn parse_address(addr: &str) -> Result<Address, ConversionError> {
    let digits = addr.trim().strip_prefix("0x").unwrap_or(addr.trim());
    if digits.len() != 40 {
        return Err(ConversionError::from(format!("Invalid address: {}", addr)));
    }
    Address::from_str(digits).map_err(|_| ConversionError::from(format!("Invalid address: {}", addr)))
}

pub fn parse_hash(hash: &str) -> Result<H256, ConversionError> {
    let digits = hash.trim().strip_prefix("0x").unwrap_or(hash.trim());
    if digits.len() != 64 {
        return Err(ConversionError::from(format!("Invalid hash: {}", hash)));
    }
    H256::from_str(digits).map_err(|_| ConversionError::from(format!("Invalid hash: {}", hash)))
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(Keccak256::digest(data).as_slice());
    out
}

/// First four bytes of the keccak of a canonical function signature.
pub fn method_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> H256 {
    H256::from(keccak256(signature.as_bytes()))
}

/// Lowercase 0x-prefixed method id of call data, if it carries one.
pub fn method_id_of(data: &[u8]) -> Option<String> {
    if data.len() >= 4 {
        Some(bytes_to_hex(&data[..4]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_quantities() {
        assert_eq!(u256_to_hex(U256::from(21000)), "0x5208");
        assert_eq!(u256_to_hex(U256::zero()), "0x0");
        assert_eq!(hex_to_u256("0x5208").unwrap(), U256::from(21000));
        assert!(hex_to_u256("5208").is_err());
        assert_eq!(parse_quantity("21000").unwrap(), U256::from(21000));
        assert!(parse_quantity("-1").is_err());
    }

    #[test]
    fn test_selectors() {
        assert_eq!(
            bytes_to_hex(&method_selector("approve(address,uint256)")),
            "0x095ea7b3"
        );
        assert_eq!(
            bytes_to_hex(&method_selector("transfer(address,uint256)")),
            "0xa9059cbb"
        );
        assert_eq!(
            format!("{:#x}", event_topic("Transfer(address,address,uint256)")),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn test_u256_to_rust_dec() {
        let dec = u256_to_rust_dec(U256::from(1_500_000u64), Some(6)).unwrap();
        assert_eq!(dec.to_string(), "1.5");
    }
}
