pub mod approvals;
pub mod bridge;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod eth;
pub mod events;
pub mod history;
pub mod observable;
pub mod process;
pub mod runtime;
pub mod server;
pub mod service;
pub mod setup;
pub mod signer;
pub mod transaction;
pub mod utils;

#[cfg(test)]
mod test_utils;
