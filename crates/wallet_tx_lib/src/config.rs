use serde::Deserialize;
use std::collections::btree_map::BTreeMap as Map;

use std::fs;
use std::path::Path;

use crate::error::WalletError;
use crate::setup::ChainType;
use crate::{err_custom_create, err_from};
use web3::types::Address;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub engine: Engine,
    pub chain: Map<String, Chain>,
    #[serde(default)]
    pub bridge: Map<String, Bridge>,
    pub server: Option<Server>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Engine {
    #[serde(default = "default_tx_poll_interval")]
    pub tx_poll_interval: u64,
    #[serde(default = "default_bridge_poll_interval")]
    pub bridge_poll_interval: u64,
    #[serde(default = "default_approval_poll_interval")]
    pub approval_poll_interval: u64,
    #[serde(default = "default_history_poll_interval")]
    pub history_poll_interval: u64,
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_heavy_call_timeout_ms")]
    pub heavy_call_timeout_ms: u64,
    #[serde(default = "default_speed_up_factor")]
    pub speed_up_factor: f64,
    #[serde(default = "default_allowance_batch_size")]
    pub allowance_batch_size: usize,
    #[serde(default)]
    pub refresh_all_allowances: bool,
}

fn default_tx_poll_interval() -> u64 {
    10
}
fn default_bridge_poll_interval() -> u64 {
    60
}
fn default_approval_poll_interval() -> u64 {
    120
}
fn default_history_poll_interval() -> u64 {
    60
}
fn default_transaction_timeout() -> u64 {
    300
}
fn default_call_timeout_ms() -> u64 {
    5000
}
fn default_heavy_call_timeout_ms() -> u64 {
    15000
}
fn default_speed_up_factor() -> f64 {
    1.1
}
fn default_allowance_batch_size() -> usize {
    50
}

impl Default for Engine {
    fn default() -> Self {
        Engine {
            tx_poll_interval: default_tx_poll_interval(),
            bridge_poll_interval: default_bridge_poll_interval(),
            approval_poll_interval: default_approval_poll_interval(),
            history_poll_interval: default_history_poll_interval(),
            transaction_timeout: default_transaction_timeout(),
            call_timeout_ms: default_call_timeout_ms(),
            heavy_call_timeout_ms: default_heavy_call_timeout_ms(),
            speed_up_factor: default_speed_up_factor(),
            allowance_batch_size: default_allowance_batch_size(),
            refresh_all_allowances: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Chain {
    pub chain_type: ChainType,
    pub network_id: u64,
    pub rpc_endpoints: Vec<String>,
    pub currency_symbol: Option<String>,
    pub multicall_address: Option<Address>,
    pub explorer_url: Option<String>,
    pub explorer_api_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeRoute {
    Arbitrum,
    Optimism,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Bridge {
    pub route: BridgeRoute,
    pub parent_chain: String,
    pub child_chain: String,
    pub confirmation_window: u64,
    #[serde(default)]
    pub contracts: Map<String, Address>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Server {
    pub listen: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        Self::from_toml(&fs::read(path).map_err(err_from!())?)
    }

    pub fn from_toml(content: &[u8]) -> Result<Self, WalletError> {
        match toml::from_slice(content) {
            Ok(config) => Ok(config),
            Err(e) => Err(err_custom_create!("Failed to parse toml {:?}", e)),
        }
    }
}
