use structopt::StructOpt;
use wallet_tx_lib::err_validation;
use wallet_tx_lib::error::WalletError;
use wallet_tx_lib::utils::parse_address;

#[derive(Debug, StructOpt)]
pub struct RunOptions {
    #[structopt(long = "config", default_value = "config-wallet.toml")]
    pub config: String,

    #[structopt(long = "http", help = "Start the read-only status server")]
    pub http: bool,

    #[structopt(
        long = "http-addr",
        help = "Listen address, overrides [server] listen from the config"
    )]
    pub http_addr: Option<String>,
}

#[derive(Debug, StructOpt)]
pub struct ExportOptions {
    #[structopt(long = "owner", help = "Address whose records are exported")]
    pub owner: String,

    #[structopt(long = "chain-id")]
    pub chain_id: i64,

    #[structopt(long = "kind", help = "tx, internaltx or tokentx, all kinds when omitted")]
    pub kind: Option<String>,

    #[structopt(long = "out", default_value = "history.csv")]
    pub out: String,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "wallet_tx_engine",
    about = "Transaction lifecycle, bridge settlement and allowance tracking for a multi-chain wallet"
)]
pub enum CliOptions {
    /// Run the engine until interrupted.
    #[structopt(name = "run")]
    Run(RunOptions),
    /// Export the stored history of an address to csv.
    #[structopt(name = "export-history")]
    ExportHistory(ExportOptions),
}

pub fn validated_cli() -> Result<CliOptions, WalletError> {
    let opt = CliOptions::from_args();
    if let CliOptions::ExportHistory(export) = &opt {
        parse_address(&export.owner).map_err(|e| err_validation!("Invalid owner: {}", e))?;
        if let Some(kind) = &export.kind {
            if !["tx", "internaltx", "tokentx"].contains(&kind.as_str()) {
                return Err(err_validation!("Unknown record kind {}", kind));
            }
        }
    }
    Ok(opt)
}
