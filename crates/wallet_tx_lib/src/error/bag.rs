use super::custom::{
    ConfigurationError, CustomError, TimeoutError, TransactionFailedError, ValidationError,
};
use crate::utils::ConversionError;
use thiserror::Error;
use web3::ethabi::ethereum_types::FromDecStrErr;

#[derive(Error, Debug)]
pub enum ErrorBag {
    #[error("{0}")]
    ValidationError(#[from] ValidationError),
    #[error("{0}")]
    ConfigurationError(#[from] ConfigurationError),
    #[error("{0}")]
    TransactionFailedError(#[from] TransactionFailedError),
    #[error("{0}")]
    TimeoutError(#[from] TimeoutError),
    #[error("Hex conversion error: {0}")]
    HexError(#[from] rustc_hex::FromHexError),
    #[error("Hex decode error: {0}")]
    HexDecodeError(#[from] hex::FromHexError),
    #[error("Dec conversion error: {0}")]
    DecError(#[from] FromDecStrErr),
    #[error("sqlx error: {0}")]
    SqlxError(#[from] sqlx::Error),
    #[error("sqlx migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("conversion error: {0}")]
    ConversionError(#[from] ConversionError),
    #[error("web3 error: {0}")]
    Web3Error(#[from] web3::Error),
    #[error("abi error: {0}")]
    Web3AbiError(#[from] web3::ethabi::Error),
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("uuid error: {0}")]
    UuidError(#[from] uuid::Error),
    #[error("{0}")]
    CustomError(#[from] CustomError),
}
