//! Error primitives shared across the workspace.
//!
//! Structured, component-specific errors are expressed with `snafu`, while anything crossing a component boundary (a
//! backend submission, startup, configuration loading in a binary) is erased into [`GenericError`].
#![deny(warnings)]
#![deny(missing_docs)]

use std::fmt::Display;

/// A type-erased error.
pub type GenericError = anyhow::Error;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string with arguments (as `std::format!`), or any value implementing `Debug` and
/// `Display`. When given an existing `std::error::Error`, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::_anyhow!($msg) };
    ($err:expr $(,)?) => { $crate::_anyhow!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::_anyhow!($fmt, $($arg)*) };
}

#[doc(hidden)]
pub use anyhow::anyhow as _anyhow;

mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Extension methods for attaching context to fallible results.
///
/// This mirrors `anyhow::Context` under different method names so that it can be imported next to `snafu::ResultExt`
/// without the two colliding.
pub trait ErrorContext<T, E>: private::Sealed {
    /// Wraps the error with the given context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error with context that is only built if an error actually occurred.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        <Self as anyhow::Context<T, E>>::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        <Self as anyhow::Context<T, E>>::with_context(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prepended_to_chain() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("connection refused"));
        let err = result.error_context("failed to dial backend").unwrap_err();

        assert_eq!(err.to_string(), "failed to dial backend");
        assert_eq!(err.root_cause().to_string(), "connection refused");
    }

    #[test]
    fn lazy_context_only_built_on_error() {
        let ok: Result<u32, std::io::Error> = Ok(5);
        let value = ok
            .with_error_context(|| -> String { panic!("context should not be evaluated") })
            .unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn macro_formats_arguments() {
        let err = generic_error!("percentile {} out of range", 120);
        assert_eq!(err.to_string(), "percentile 120 out of range");
    }
}
