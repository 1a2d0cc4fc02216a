use crate::approvals::ApprovalDeriver;
use crate::bridge::BridgeMonitor;
use crate::db::ops::*;
use crate::process::TxManager;
use crate::runtime::WalletRuntime;
use crate::utils::parse_address;
use actix_web::web::Data;
use actix_web::{web, HttpRequest, Responder};
use serde_json::json;
use sqlx::SqliteConnection;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct ServerData {
    pub db_connection: Arc<Mutex<SqliteConnection>>,
    pub tx_manager: Arc<TxManager>,
    pub bridges: Vec<Arc<BridgeMonitor>>,
    pub approvals: Arc<ApprovalDeriver>,
}

impl ServerData {
    pub fn from_runtime(runtime: &WalletRuntime) -> Self {
        ServerData {
            db_connection: runtime.conn.clone(),
            tx_manager: runtime.tx_manager.clone(),
            bridges: runtime.bridges.clone(),
            approvals: runtime.approvals.clone(),
        }
    }
}

macro_rules! return_on_error {
    ( $e:expr ) => {
        match $e {
            Ok(x) => x,
            Err(err) => {
                return web::Json(json!({
                    "error": err.to_string()
                }))
            },
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/status", web::get().to(status))
        .route("/transactions", web::get().to(transactions))
        .route("/transactions/pending", web::get().to(transactions_pending))
        .route("/tx/{hash}", web::get().to(tx_by_hash))
        .route("/bridge/{route}", web::get().to(bridge_transfers))
        .route("/approvals/{owner}/{chain_id}", web::get().to(approvals))
        .route("/tokens/search/{query}", web::get().to(token_search));
}

pub async fn status(data: Data<Box<ServerData>>) -> impl Responder {
    let tx_state = data.tx_manager.component().state();
    let bridges = data
        .bridges
        .iter()
        .map(|b| {
            let state = b.component().state();
            json!({
                "name": b.name(),
                "pendingDeposits": state.pending_deposits,
                "pendingWithdrawals": state.pending_withdrawals,
                "doneBlockNumber": state.done_block_number,
                "lastPoll": state.last_poll,
            })
        })
        .collect::<Vec<_>>();
    let approvals = data.approvals.component().state();
    web::Json(json!({
        "transactions": tx_state.status_counts,
        "lastTxPoll": tx_state.last_poll,
        "bridges": bridges,
        "approvalReads": approvals.allowance_reads,
    }))
}

pub async fn transactions(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let limit = web::Query::<std::collections::HashMap<String, String>>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.get("limit").and_then(|l| i64::from_str(l).ok()))
        .or(Some(100));
    let txs = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(
            get_transactions(
                &mut db_conn,
                Some(TRANSACTION_FILTER_LIFECYCLE),
                limit,
                Some(TRANSACTION_ORDER_BY_CREATE_DATE)
            )
            .await
        )
    };
    web::Json(json!({
        "txs": txs,
    }))
}

pub async fn transactions_pending(data: Data<Box<ServerData>>) -> impl Responder {
    let txs = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(
            get_transactions(
                &mut db_conn,
                Some(TRANSACTION_FILTER_PENDING),
                None,
                Some(TRANSACTION_ORDER_BY_CREATE_DATE)
            )
            .await
        )
    };
    web::Json(json!({
        "txs": txs,
    }))
}

pub async fn tx_by_hash(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let hash = return_on_error!(req.match_info().get("hash").ok_or("No hash provided"));
    let txs = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(get_txs_by_hash(&mut db_conn, hash).await)
    };
    web::Json(json!({
        "txs": txs,
    }))
}

pub async fn bridge_transfers(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let route = return_on_error!(req.match_info().get("route").ok_or("No route provided"));
    let monitor = return_on_error!(data
        .bridges
        .iter()
        .find(|b| b.name() == route)
        .ok_or("Unknown bridge route"));
    let transfers = return_on_error!(monitor.transfers().await);
    web::Json(json!({
        "route": route,
        "transfers": transfers,
    }))
}

pub async fn approvals(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let owner = return_on_error!(req.match_info().get("owner").ok_or("No owner provided"));
    let owner = return_on_error!(parse_address(owner));
    let chain_id = return_on_error!(req
        .match_info()
        .get("chain_id")
        .map(u64::from_str)
        .unwrap_or(Ok(0)));
    let groups = return_on_error!(
        data.approvals
            .approvals(&format!("{:#x}", owner), chain_id)
            .await
    );
    web::Json(json!({
        "owner": format!("{:#x}", owner),
        "chainId": chain_id,
        "approvals": groups,
    }))
}

pub async fn token_search(data: Data<Box<ServerData>>, req: HttpRequest) -> impl Responder {
    let query = return_on_error!(req.match_info().get("query").ok_or("No query provided"));
    let chain_type = web::Query::<std::collections::HashMap<String, String>>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.get("chainType").cloned());
    let tokens = {
        let mut db_conn = data.db_connection.lock().await;
        return_on_error!(search_static_tokens(&mut db_conn, query, chain_type.as_deref(), 20).await)
    };
    web::Json(json!({
        "tokens": tokens,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approvals::ApprovalDeriverConfig;
    use crate::db::create_sqlite_connection;
    use crate::db::model::StaticTokenDao;
    use crate::events::EventBus;
    use crate::process::TxManagerConfig;
    use crate::setup::ChainRoutes;
    use actix_web::{test, App};
    use std::time::Duration;

    async fn server_data() -> ServerData {
        let conn = Arc::new(Mutex::new(create_sqlite_connection(None, true).await.unwrap()));
        let routes = Arc::new(ChainRoutes::new());
        let bus = EventBus::default();
        ServerData {
            db_connection: conn.clone(),
            tx_manager: Arc::new(TxManager::new(
                conn.clone(),
                routes.clone(),
                None,
                bus.clone(),
                TxManagerConfig {
                    poll_interval: Duration::from_secs(10),
                    transaction_timeout: Duration::from_secs(300),
                    speed_up_factor: 1.1,
                },
            )),
            bridges: vec![],
            approvals: Arc::new(ApprovalDeriver::new(
                conn,
                routes,
                bus,
                ApprovalDeriverConfig {
                    batch_size: 50,
                    refresh_all: false,
                },
            )),
        }
    }

    #[actix_web::test]
    async fn test_token_search_and_errors() {
        let data = server_data().await;
        insert_static_token(
            &mut *data.db_connection.lock().await,
            &StaticTokenDao {
                address: "0x6b175474e89094c44da98b954eedeac495271d0f".to_string(),
                chain_type: "ethereum".to_string(),
                symbol: "DAI".to_string(),
                name: "Dai Stablecoin".to_string(),
                decimals: 18,
                logo: None,
            },
        )
        .await
        .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(Data::new(Box::new(data)))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/tokens/search/da").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["tokens"][0]["symbol"], "DAI");

        let req = test::TestRequest::get().uri("/bridge/nowhere").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["error"], "Unknown bridge route");

        let req = test::TestRequest::get().uri("/approvals/0xnope/1").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["error"].is_string());

        let req = test::TestRequest::get().uri("/transactions?limit=5").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["txs"], json!([]));
    }
}
