mod approval_ops;
mod bridge_ops;
mod static_token_ops;
mod tx_ops;

pub use approval_ops::*;
pub use bridge_ops::*;
pub use static_token_ops::*;
pub use tx_ops::*;
