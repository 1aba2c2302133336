//! Shared utilities for termhub.

/// Log-and-discard helpers for fallible calls whose failure is not actionable.
pub trait ResultExt<T> {
    /// Log the error at `error` level and convert to `Option`.
    fn log_err(self) -> Option<T>;
    /// Log the error at `warn` level and convert to `Option`.
    fn warn_on_err(self) -> Option<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    #[track_caller]
    fn log_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                let caller = std::panic::Location::caller();
                tracing::error!("{}:{}: {}", caller.file(), caller.line(), e);
                None
            }
        }
    }

    #[track_caller]
    fn warn_on_err(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                let caller = std::panic::Location::caller();
                tracing::warn!("{}:{}: {}", caller.file(), caller.line(), e);
                None
            }
        }
    }
}
