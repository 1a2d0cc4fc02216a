/// Wraps any error convertible into `ErrorBag`, recording the call site.
/// Use as `.map_err(err_from!())`.
#[macro_export]
macro_rules! err_from {
    () => {
        |e| $crate::error::WalletError {
            inner: $crate::error::ErrorBag::from(e),
            file: file!(),
            line: line!(),
        }
    };
}

#[macro_export]
macro_rules! err_create {
    ($e:expr) => {
        $crate::error::WalletError {
            inner: $crate::error::ErrorBag::from($e),
            file: file!(),
            line: line!(),
        }
    };
}

#[macro_export]
macro_rules! err_custom_create {
    ($($t:tt)*) => {
        $crate::error::WalletError {
            inner: $crate::error::ErrorBag::CustomError($crate::error::CustomError::new(
                &format!($($t)*),
            )),
            file: file!(),
            line: line!(),
        }
    };
}

#[macro_export]
macro_rules! err_validation {
    ($($t:tt)*) => {
        $crate::error::WalletError {
            inner: $crate::error::ErrorBag::ValidationError($crate::error::ValidationError::new(
                &format!($($t)*),
            )),
            file: file!(),
            line: line!(),
        }
    };
}

#[macro_export]
macro_rules! err_configuration {
    ($($t:tt)*) => {
        $crate::error::WalletError {
            inner: $crate::error::ErrorBag::ConfigurationError(
                $crate::error::ConfigurationError::new(&format!($($t)*)),
            ),
            file: file!(),
            line: line!(),
        }
    };
}
