use super::ErrorBag;
use std::fmt::{Debug, Display, Formatter};

pub struct WalletError {
    pub inner: ErrorBag,
    pub file: &'static str,
    pub line: u32,
}

impl WalletError {
    /// Transport and timeout failures carry no new information about the record
    /// and are retried on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.inner,
            ErrorBag::TimeoutError(_) | ErrorBag::Web3Error(_) | ErrorBag::HttpError(_)
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.inner, ErrorBag::ValidationError(_))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self.inner, ErrorBag::ConfigurationError(_))
    }
}

impl Display for WalletError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl Debug for WalletError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}:{})", self.inner, self.file, self.line)
    }
}

impl std::error::Error for WalletError {}
