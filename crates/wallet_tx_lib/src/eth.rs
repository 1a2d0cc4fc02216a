use crate::error::WalletError;
use crate::utils::{keccak256, parse_address};
use crate::{err_custom_create, err_validation};
use secp256k1::{PublicKey, SecretKey};
use sha3::Digest;
use sha3::Keccak256;
use std::str::FromStr;
use web3::types::Address;

pub fn get_eth_addr_from_secret(secret_key: &SecretKey) -> Address {
    Address::from_slice(
        &Keccak256::digest(
            &PublicKey::from_secret_key(&secp256k1::Secp256k1::new(), secret_key)
                .serialize_uncompressed()[1..65],
        )
        .as_slice()[12..],
    )
}

/// EIP-55 mixed case representation of an address.
pub fn to_checksum(address: &Address) -> String {
    let lower = hex::encode(address.as_bytes());
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, ch) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if ch.is_ascii_alphabetic() && nibble >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Parses an address that is either single-cased or carries a valid EIP-55 checksum.
pub fn parse_checksummable(addr: &str) -> Result<Address, WalletError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(err_validation!("address is empty"));
    }
    let address = parse_address(trimmed).map_err(|e| err_validation!("{}", e))?;
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let is_mixed = digits.chars().any(|c| c.is_ascii_lowercase())
        && digits.chars().any(|c| c.is_ascii_uppercase());
    if is_mixed && to_checksum(&address)[2..] != *digits {
        return Err(err_validation!("address {} has an invalid checksum", trimmed));
    }
    Ok(address)
}

/// Reads comma separated hex private keys, as found in `WALLET_PRIVATE_KEYS`.
pub fn load_private_keys(keys: &str) -> Result<(Vec<SecretKey>, Vec<Address>), WalletError> {
    let mut secret_keys = Vec::new();
    let mut addrs = Vec::new();
    for key in keys.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        let key = key.strip_prefix("0x").unwrap_or(key);
        let secret_key = SecretKey::from_str(key)
            .map_err(|e| err_custom_create!("Failed to parse private key: {}", e))?;
        addrs.push(get_eth_addr_from_secret(&secret_key));
        secret_keys.push(secret_key);
    }
    Ok((secret_keys, addrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_eth_addr_from_secret() {
        let sk = SecretKey::from_str(
            "0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let addr = format!("{:#x}", get_eth_addr_from_secret(&sk));
        assert_eq!(addr, "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
    }

    #[test]
    fn test_checksum() {
        let addr = parse_checksummable("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(
            to_checksum(&addr),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        assert!(parse_checksummable("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_ok());
        let err = parse_checksummable("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD").unwrap_err();
        assert!(err.is_validation());
        assert!(parse_checksummable("").unwrap_err().is_validation());
    }
}
