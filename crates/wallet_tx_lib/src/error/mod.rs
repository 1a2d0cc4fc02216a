mod bag;
mod custom;
mod wrapped;

pub use bag::ErrorBag;
pub use custom::{
    ConfigurationError, CustomError, TimeoutError, TransactionFailedError, ValidationError,
};
pub use wrapped::WalletError;

/// Export macros for creating errors
mod macros;
