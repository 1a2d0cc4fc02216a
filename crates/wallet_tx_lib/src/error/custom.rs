use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
pub struct CustomError {
    pub msg: String,
}

impl CustomError {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
        }
    }
}

impl Display for CustomError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for CustomError {}

/// Malformed input handed to `submit` or `approve`. Never retried.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub msg: String,
}

impl ValidationError {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid transaction: {}", self.msg)
    }
}

impl std::error::Error for ValidationError {}

/// Missing signer, unknown chain route and the like.
#[derive(Debug, Clone)]
pub struct ConfigurationError {
    pub msg: String,
}

impl ConfigurationError {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
        }
    }
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Configuration error: {}", self.msg)
    }
}

impl std::error::Error for ConfigurationError {}

/// Explicit failure reported by the chain (revert, rejected broadcast).
#[derive(Debug, Clone)]
pub struct TransactionFailedError {
    pub msg: String,
}

impl TransactionFailedError {
    pub fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
        }
    }
}

impl Display for TransactionFailedError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Transaction failed: {}", self.msg)
    }
}

impl std::error::Error for TransactionFailedError {}

#[derive(Debug, Clone)]
pub struct TimeoutError {
    pub call: String,
    pub millis: u128,
}

impl TimeoutError {
    pub fn new(call: &str, duration: std::time::Duration) -> Self {
        Self {
            call: call.to_string(),
            millis: duration.as_millis(),
        }
    }
}

impl Display for TimeoutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Call {} timed out after {}ms", self.call, self.millis)
    }
}

impl std::error::Error for TimeoutError {}
