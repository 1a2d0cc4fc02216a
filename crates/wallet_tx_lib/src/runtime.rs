use crate::approvals::{listen_for_activity, ApprovalDeriver, ApprovalDeriverConfig};
use crate::bridge::{create_adapter, BridgeMonitor};
use crate::config::Config;
use crate::db::create_sqlite_connection;
use crate::error::WalletError;
use crate::events::EventBus;
use crate::history::{EtherscanClient, ExplorerClient, HistorySync};
use crate::process::{TxManager, TxManagerConfig};
use crate::service::{run_poll_worker, PollGuard, PollTarget, PollTrigger};
use crate::setup::{ChainRoutes, WalletSetup};
use crate::signer::TxSigner;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Every controller of a running engine plus the workers driving them.
pub struct WalletRuntime {
    pub setup: WalletSetup,
    pub conn: Arc<Mutex<SqliteConnection>>,
    pub routes: Arc<ChainRoutes>,
    pub bus: EventBus,
    pub tx_manager: Arc<TxManager>,
    pub bridges: Vec<Arc<BridgeMonitor>>,
    pub approvals: Arc<ApprovalDeriver>,
    pub history: Arc<HistorySync>,
    pub tx_trigger: PollTrigger,
    pub approval_trigger: PollTrigger,
    handles: Vec<JoinHandle<()>>,
}

impl WalletRuntime {
    pub fn bridge(&self, name: &str) -> Option<Arc<BridgeMonitor>> {
        self.bridges.iter().find(|b| b.name() == name).cloned()
    }

    /// Stops every worker. In-flight sweeps are dropped at their next await point.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
        log::info!("Wallet engine stopped");
    }
}

fn spawn_worker(
    handles: &mut Vec<JoinHandle<()>>,
    target: Arc<dyn PollTarget>,
    trigger: PollTrigger,
    interval: Duration,
) {
    handles.push(run_poll_worker(
        target,
        Arc::new(PollGuard::new()),
        trigger,
        interval,
    ));
}

/// Opens the store named by `DB_SQLITE_FILENAME` (in memory when unset), builds the
/// chain routes and every controller, and starts one poll worker per controller.
pub async fn start_wallet_engine(
    config: &Config,
    signer: Option<Arc<dyn TxSigner>>,
) -> Result<WalletRuntime, WalletError> {
    let setup = WalletSetup::new(config)?;
    log::debug!("Starting wallet engine: {:#?}", setup);

    let db_filename = env::var("DB_SQLITE_FILENAME").ok();
    match &db_filename {
        Some(file) => log::info!("connecting to sqlite file db: {}", file),
        None => log::warn!("DB_SQLITE_FILENAME not set, using in-memory store"),
    }
    let conn = Arc::new(Mutex::new(
        create_sqlite_connection(db_filename.as_deref(), true).await?,
    ));
    let routes = Arc::new(setup.create_routes(config)?);
    let bus = EventBus::default();
    if signer.is_none() {
        log::warn!("No signer configured, approved transactions will fail");
    }

    let tx_manager = Arc::new(TxManager::new(
        conn.clone(),
        routes.clone(),
        signer,
        bus.clone(),
        TxManagerConfig {
            poll_interval: setup.tx_poll_interval,
            transaction_timeout: setup.transaction_timeout,
            speed_up_factor: setup.speed_up_factor,
        },
    ));

    let mut bridges = Vec::new();
    for bridge in &setup.bridges {
        let adapter = create_adapter(bridge)?;
        log::info!(
            "Monitoring bridge {} ({} -> {}) with {} adapter",
            bridge.name,
            bridge.parent_chain,
            bridge.child_chain,
            adapter.name()
        );
        bridges.push(Arc::new(BridgeMonitor::new(
            bridge,
            adapter,
            conn.clone(),
            routes.clone(),
            bus.clone(),
        )));
    }

    let approvals = Arc::new(ApprovalDeriver::new(
        conn.clone(),
        routes.clone(),
        bus.clone(),
        ApprovalDeriverConfig {
            batch_size: setup.allowance_batch_size,
            refresh_all: setup.refresh_all_allowances,
        },
    ));

    let mut explorers: HashMap<String, Arc<dyn ExplorerClient>> = HashMap::new();
    for route in routes.all() {
        if let Some(explorer) = &route.explorer {
            explorers.insert(
                route.name.clone(),
                Arc::new(EtherscanClient::new(explorer, setup.heavy_call_timeout)?),
            );
        }
    }
    let history = Arc::new(HistorySync::new(
        conn.clone(),
        routes.clone(),
        bus.clone(),
        explorers,
    ));

    let tx_trigger = PollTrigger::new();
    let approval_trigger = PollTrigger::new();
    let mut handles = Vec::new();
    spawn_worker(
        &mut handles,
        tx_manager.clone(),
        tx_trigger.clone(),
        setup.tx_poll_interval,
    );
    for bridge in &bridges {
        spawn_worker(
            &mut handles,
            bridge.clone(),
            PollTrigger::new(),
            setup.bridge_poll_interval,
        );
    }
    spawn_worker(
        &mut handles,
        approvals.clone(),
        approval_trigger.clone(),
        setup.approval_poll_interval,
    );
    spawn_worker(
        &mut handles,
        history.clone(),
        PollTrigger::new(),
        setup.history_poll_interval,
    );
    handles.push(listen_for_activity(&bus, approval_trigger.clone()));

    Ok(WalletRuntime {
        setup,
        conn,
        routes,
        bus,
        tx_manager,
        bridges,
        approvals,
        history,
        tx_trigger,
        approval_trigger,
        handles,
    })
}
