mod approval_dao;
mod bridge_transfer_dao;
mod static_token_dao;
mod tx_dao;

pub use approval_dao::*;
pub use bridge_transfer_dao::*;
pub use static_token_dao::*;
pub use tx_dao::*;
