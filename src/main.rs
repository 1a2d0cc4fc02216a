mod options;

use actix_cors::Cors;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use std::env;
use std::sync::Arc;
use wallet_tx_lib::config::Config;
use wallet_tx_lib::db::create_sqlite_connection;
use wallet_tx_lib::db::ops::get_history_page;
use wallet_tx_lib::error::WalletError;
use wallet_tx_lib::eth::load_private_keys;
use wallet_tx_lib::runtime::start_wallet_engine;
use wallet_tx_lib::server::{configure, ServerData};
use wallet_tx_lib::signer::{PrivateKeySigner, TxSigner};
use wallet_tx_lib::{err_custom_create, err_from};

use crate::options::{validated_cli, CliOptions, ExportOptions, RunOptions};

const EXPORT_PAGE_SIZE: i64 = 1000;

fn load_signer() -> Result<Option<Arc<dyn TxSigner>>, WalletError> {
    match env::var("WALLET_PRIVATE_KEYS") {
        Ok(keys) => {
            let (secret_keys, addresses) = load_private_keys(&keys)?;
            for address in addresses {
                log::info!("Signing for {:#x}", address);
            }
            Ok(Some(Arc::new(PrivateKeySigner::new(secret_keys))))
        }
        Err(_) => Ok(None),
    }
}

async fn run(opts: RunOptions) -> Result<(), WalletError> {
    let config = Config::load(&opts.config)?;
    let runtime = start_wallet_engine(&config, load_signer()?).await?;

    let listen = opts
        .http_addr
        .or_else(|| config.server.as_ref().map(|s| s.listen.clone()));
    match (opts.http, listen) {
        (true, Some(listen)) => {
            log::info!("Starting status server on {}", listen);
            let server_data = Data::new(Box::new(ServerData::from_runtime(&runtime)));
            HttpServer::new(move || {
                let cors = Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600);
                App::new()
                    .wrap(cors)
                    .app_data(server_data.clone())
                    .configure(configure)
            })
            .bind(listen)
            .map_err(err_from!())?
            .run()
            .await
            .map_err(err_from!())?;
        }
        (true, None) => {
            return Err(err_custom_create!(
                "--http needs --http-addr or [server] listen in the config"
            ));
        }
        (false, _) => {
            tokio::signal::ctrl_c().await.map_err(err_from!())?;
        }
    }
    runtime.shutdown();
    Ok(())
}

async fn export_history(opts: ExportOptions) -> Result<(), WalletError> {
    let db_filename = env::var("DB_SQLITE_FILENAME")
        .map_err(|_| err_custom_create!("DB_SQLITE_FILENAME is required for export"))?;
    let mut conn = create_sqlite_connection(Some(&db_filename), false).await?;
    let mut writer = csv::Writer::from_path(&opts.out).map_err(|e| err_custom_create!("{}", e))?;
    let mut page = 0;
    let mut exported = 0;
    loop {
        let rows = get_history_page(
            &mut conn,
            &opts.owner,
            opts.chain_id,
            opts.kind.as_deref(),
            page,
            EXPORT_PAGE_SIZE,
        )
        .await
        .map_err(err_from!())?;
        for row in &rows {
            writer
                .serialize(row)
                .map_err(|e| err_custom_create!("Cannot write record {}: {}", row.id, e))?;
        }
        exported += rows.len();
        if (rows.len() as i64) < EXPORT_PAGE_SIZE {
            break;
        }
        page += 1;
    }
    writer.flush().map_err(err_from!())?;
    log::info!("Exported {} records to {}", exported, opts.out);
    Ok(())
}

#[actix_web::main]
async fn main() -> Result<(), WalletError> {
    let dotenv_res = dotenv::dotenv();
    env_logger::init();
    if let Err(err) = dotenv_res {
        log::debug!("No .env file loaded: {}", err);
    }

    match validated_cli()? {
        CliOptions::Run(opts) => run(opts).await,
        CliOptions::ExportHistory(opts) => export_history(opts).await,
    }
}
