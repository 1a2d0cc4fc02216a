use crate::chain::{ChainClient, TimeoutChainClient, Web3ChainClient};
use crate::config::{BridgeRoute, Config};
use crate::error::WalletError;
use crate::{err_configuration, err_custom_create};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use web3::types::Address;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Ethereum,
    Arbitrum,
    Optimism,
    Bsc,
    Polygon,
    Heco,
    Avalanche,
    Syscoin,
    Tron,
    Custom(String),
}

impl Display for ChainType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainType::Ethereum => write!(f, "ethereum"),
            ChainType::Arbitrum => write!(f, "arbitrum"),
            ChainType::Optimism => write!(f, "optimism"),
            ChainType::Bsc => write!(f, "bsc"),
            ChainType::Polygon => write!(f, "polygon"),
            ChainType::Heco => write!(f, "heco"),
            ChainType::Avalanche => write!(f, "avalanche"),
            ChainType::Syscoin => write!(f, "syscoin"),
            ChainType::Tron => write!(f, "tron"),
            ChainType::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

impl FromStr for ChainType {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ethereum" => ChainType::Ethereum,
            "arbitrum" => ChainType::Arbitrum,
            "optimism" => ChainType::Optimism,
            "bsc" => ChainType::Bsc,
            "polygon" => ChainType::Polygon,
            "heco" => ChainType::Heco,
            "avalanche" => ChainType::Avalanche,
            "syscoin" => ChainType::Syscoin,
            "tron" => ChainType::Tron,
            other => match other.strip_prefix("custom:") {
                Some(name) if !name.is_empty() => ChainType::Custom(name.to_string()),
                _ => return Err(err_custom_create!("Unknown chain type: {}", s)),
            },
        })
    }
}

/// One supported network. Immutable: switching networks replaces the route.
pub struct ChainRoute {
    pub name: String,
    pub chain_type: ChainType,
    pub chain_id: u64,
    pub currency_symbol: String,
    pub multicall_address: Option<Address>,
    pub explorer: Option<ExplorerSetup>,
    client: Arc<dyn ChainClient>,
}

impl std::fmt::Debug for ChainRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRoute")
            .field("name", &self.name)
            .field("chain_type", &self.chain_type)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl ChainRoute {
    pub fn new(
        name: &str,
        chain_type: ChainType,
        chain_id: u64,
        client: Arc<dyn ChainClient>,
    ) -> Self {
        ChainRoute {
            name: name.to_string(),
            chain_type,
            chain_id,
            currency_symbol: "ETH".to_string(),
            multicall_address: None,
            explorer: None,
            client,
        }
    }

    pub fn client(&self) -> &dyn ChainClient {
        self.client.as_ref()
    }
}

#[derive(Clone, Debug)]
pub struct ExplorerSetup {
    pub url: String,
    pub api_key: Option<String>,
}

/// Registry of every route, including custom RPC chains registered at runtime.
#[derive(Default)]
pub struct ChainRoutes {
    routes: RwLock<Vec<Arc<ChainRoute>>>,
}

impl ChainRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, route: ChainRoute) -> Arc<ChainRoute> {
        let route = Arc::new(route);
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.retain(|r| r.chain_type != route.chain_type);
        routes.push(route.clone());
        log::info!(
            "Registered chain route {} ({}) with chain id {}",
            route.name,
            route.chain_type,
            route.chain_id
        );
        route
    }

    pub fn register_custom(
        &self,
        name: &str,
        chain_id: u64,
        client: Arc<dyn ChainClient>,
    ) -> Arc<ChainRoute> {
        self.register(ChainRoute::new(
            name,
            ChainType::Custom(name.to_string()),
            chain_id,
            client,
        ))
    }

    /// The user switched networks for this chain type: in-flight work against the old
    /// chain id stops being trusted.
    pub fn switch_chain_id(
        &self,
        chain_type: &ChainType,
        chain_id: u64,
        client: Arc<dyn ChainClient>,
    ) -> Result<Arc<ChainRoute>, WalletError> {
        let old = self
            .by_type(chain_type)
            .ok_or_else(|| err_configuration!("No route for chain type {}", chain_type))?;
        let route = ChainRoute {
            name: old.name.clone(),
            chain_type: old.chain_type.clone(),
            chain_id,
            currency_symbol: old.currency_symbol.clone(),
            multicall_address: old.multicall_address,
            explorer: old.explorer.clone(),
            client,
        };
        Ok(self.register(route))
    }

    pub fn resolve(&self, chain_id: u64) -> Result<Arc<ChainRoute>, WalletError> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes
            .iter()
            .find(|r| r.chain_id == chain_id)
            .cloned()
            .ok_or_else(|| err_configuration!("No chain route for chain id: {}", chain_id))
    }

    pub fn by_type(&self, chain_type: &ChainType) -> Option<Arc<ChainRoute>> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.iter().find(|r| &r.chain_type == chain_type).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<ChainRoute>> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.iter().find(|r| r.name == name).cloned()
    }

    /// Target chain id check: is `chain_id` still the live id of its route.
    pub fn is_current(&self, chain_id: u64) -> bool {
        self.resolve(chain_id).is_ok()
    }

    pub fn all(&self) -> Vec<Arc<ChainRoute>> {
        self.routes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Clone, Debug)]
pub struct BridgeSetup {
    pub name: String,
    pub route: BridgeRoute,
    pub parent_chain: String,
    pub child_chain: String,
    pub confirmation_window: u64,
    pub contracts: std::collections::BTreeMap<String, Address>,
}

#[derive(Clone, Debug)]
pub struct WalletSetup {
    pub tx_poll_interval: Duration,
    pub bridge_poll_interval: Duration,
    pub approval_poll_interval: Duration,
    pub history_poll_interval: Duration,
    pub transaction_timeout: Duration,
    pub call_timeout: Duration,
    pub heavy_call_timeout: Duration,
    pub speed_up_factor: f64,
    pub allowance_batch_size: usize,
    pub refresh_all_allowances: bool,
    pub bridges: Vec<BridgeSetup>,
}

/// Bumps below 10% are rejected by most nodes as underpriced replacements.
pub const MIN_SPEED_UP_FACTOR: f64 = 1.1;

impl WalletSetup {
    pub fn new(config: &Config) -> Result<Self, WalletError> {
        let engine = &config.engine;
        let mut bridges = Vec::new();
        for (name, bridge) in &config.bridge {
            for chain in [&bridge.parent_chain, &bridge.child_chain] {
                if !config.chain.contains_key(chain) {
                    return Err(err_configuration!(
                        "Bridge {} references unknown chain {}",
                        name,
                        chain
                    ));
                }
            }
            bridges.push(BridgeSetup {
                name: name.clone(),
                route: bridge.route,
                parent_chain: bridge.parent_chain.clone(),
                child_chain: bridge.child_chain.clone(),
                confirmation_window: bridge.confirmation_window,
                contracts: bridge.contracts.clone(),
            });
        }
        Ok(WalletSetup {
            tx_poll_interval: Duration::from_secs(engine.tx_poll_interval),
            bridge_poll_interval: Duration::from_secs(engine.bridge_poll_interval),
            approval_poll_interval: Duration::from_secs(engine.approval_poll_interval),
            history_poll_interval: Duration::from_secs(engine.history_poll_interval),
            transaction_timeout: Duration::from_secs(engine.transaction_timeout),
            call_timeout: Duration::from_millis(engine.call_timeout_ms),
            heavy_call_timeout: Duration::from_millis(engine.heavy_call_timeout_ms),
            speed_up_factor: engine.speed_up_factor.max(MIN_SPEED_UP_FACTOR),
            allowance_batch_size: engine.allowance_batch_size.max(1),
            refresh_all_allowances: engine.refresh_all_allowances,
            bridges,
        })
    }

    /// Builds the route registry, one timeout-bounded web3 client per configured chain.
    pub fn create_routes(&self, config: &Config) -> Result<ChainRoutes, WalletError> {
        let routes = ChainRoutes::new();
        for (name, chain) in &config.chain {
            let client = Web3ChainClient::new(&chain.rpc_endpoints)?;
            let client: Arc<dyn ChainClient> = Arc::new(TimeoutChainClient::new(
                Arc::new(client),
                self.call_timeout,
                self.heavy_call_timeout,
            ));
            let mut route = ChainRoute::new(name, chain.chain_type.clone(), chain.network_id, client);
            route.currency_symbol = chain
                .currency_symbol
                .clone()
                .unwrap_or_else(|| "ETH".to_string());
            route.multicall_address = chain.multicall_address;
            route.explorer = chain.explorer_url.as_ref().map(|url| ExplorerSetup {
                url: url.clone(),
                api_key: chain.explorer_api_key.clone(),
            });
            routes.register(route);
        }
        Ok(routes)
    }
}
