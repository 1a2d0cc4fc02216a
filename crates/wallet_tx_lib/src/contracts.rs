use crate::utils::method_selector;
use lazy_static::lazy_static;
use std::error;
use std::str::FromStr;
use web3::contract::Contract;
use web3::ethabi::{ParamType, Token};
use web3::transports::Http;
use web3::types::{Address, U256};
use web3::{Transport, Web3};

lazy_static! {
    pub static ref DUMMY_RPC_PROVIDER: Web3<Http> = {
        let transport = web3::transports::Http::new("http://noconn").unwrap();
        Web3::new(transport)
    };
    pub static ref ERC20_CONTRACT_TEMPLATE: Contract<Http> =
        prepare_contract_template(include_bytes!("../contracts/ierc20.json")).unwrap();
    pub static ref MULTICALL_CONTRACT_TEMPLATE: Contract<Http> =
        prepare_contract_template(include_bytes!("../contracts/multicall.json")).unwrap();
    pub static ref ERC20_APPROVE_SELECTOR: [u8; 4] = method_selector("approve(address,uint256)");
}

pub fn prepare_contract_template(json_abi: &[u8]) -> Result<Contract<Http>, Box<dyn error::Error>> {
    let contract = Contract::from_json(
        DUMMY_RPC_PROVIDER.eth(),
        Address::from_str("0x0000000000000000000000000000000000000000")?,
        json_abi,
    )?;

    Ok(contract)
}

pub fn contract_encode<T>(
    contract: &Contract<T>,
    func: &str,
    params: &[Token],
) -> Result<Vec<u8>, web3::ethabi::Error>
where
    T: Transport,
{
    contract
        .abi()
        .function(func)
        .and_then(|function| function.encode_input(params))
}

pub fn contract_decode<T>(
    contract: &Contract<T>,
    func: &str,
    output: &[u8],
) -> Result<Vec<Token>, web3::ethabi::Error>
where
    T: Transport,
{
    contract
        .abi()
        .function(func)
        .and_then(|function| function.decode_output(output))
}

/// Encodes a call to a function known only by its canonical signature.
pub fn encode_call(signature: &str, params: &[Token]) -> Vec<u8> {
    let mut data = method_selector(signature).to_vec();
    data.extend(web3::ethabi::encode(params));
    data
}

pub fn get_erc20_approve(spender: Address, amount: U256) -> Result<Vec<u8>, web3::ethabi::Error> {
    contract_encode(
        &ERC20_CONTRACT_TEMPLATE,
        "approve",
        &[Token::Address(spender), Token::Uint(amount)],
    )
}

pub fn get_erc20_allowance(owner: Address, spender: Address) -> Result<Vec<u8>, web3::ethabi::Error> {
    contract_encode(
        &ERC20_CONTRACT_TEMPLATE,
        "allowance",
        &[Token::Address(owner), Token::Address(spender)],
    )
}

/// (spender, amount) of an ERC-20 `approve` call, `None` for any other call data.
pub fn decode_erc20_approve(data: &[u8]) -> Option<(Address, U256)> {
    if data.len() < 4 || data[..4] != ERC20_APPROVE_SELECTOR[..] {
        return None;
    }
    let tokens = web3::ethabi::decode(&[ParamType::Address, ParamType::Uint(256)], &data[4..]).ok()?;
    match (tokens.get(0), tokens.get(1)) {
        (Some(Token::Address(spender)), Some(Token::Uint(amount))) => Some((*spender, *amount)),
        _ => None,
    }
}

pub fn get_multicall_aggregate(calls: &[(Address, Vec<u8>)]) -> Result<Vec<u8>, web3::ethabi::Error> {
    let calls = calls
        .iter()
        .map(|(target, data)| Token::Tuple(vec![Token::Address(*target), Token::Bytes(data.clone())]))
        .collect();
    contract_encode(&MULTICALL_CONTRACT_TEMPLATE, "aggregate", &[Token::Array(calls)])
}

pub fn decode_multicall_aggregate(output: &[u8]) -> Result<Vec<Vec<u8>>, web3::ethabi::Error> {
    let tokens = contract_decode(&MULTICALL_CONTRACT_TEMPLATE, "aggregate", output)?;
    match tokens.get(1) {
        Some(Token::Array(items)) => Ok(items
            .iter()
            .filter_map(|t| match t {
                Token::Bytes(b) => Some(b.clone()),
                _ => None,
            })
            .collect()),
        _ => Err(web3::ethabi::Error::InvalidData),
    }
}

/// A single 32 byte word return value, as returned by `allowance` or counters.
pub fn decode_u256(output: &[u8]) -> Result<U256, web3::ethabi::Error> {
    if output.len() < 32 {
        return Err(web3::ethabi::Error::InvalidData);
    }
    Ok(U256::from_big_endian(&output[..32]))
}

pub fn decode_bool(output: &[u8]) -> Result<bool, web3::ethabi::Error> {
    Ok(!decode_u256(output)?.is_zero())
}
