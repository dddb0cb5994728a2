// src/context.rs
//! Context extension traits + macros for error handling.
//!
//! `.context()` / `.with_context()` on `Result` and `Option`, plus `bail!`,
//! `ensure!` and `ensure_eq!` that return the crate [`Error`].

use crate::error::{Error, Result};

/// Adds `.context()` / `.with_context()` to any `Result` whose error converts into [`Error`].
pub trait Context<T, E> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    /// Lazy variant, the closure only runs on the error path.
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    #[inline(always)]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(err.into().context(context)),
        }
    }

    #[inline(always)]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(err.into().context(f())),
        }
    }
}

/// `Option<T>` → `Result<T>` with a message.
pub trait OptionContext<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>;

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T> OptionContext<T> for Option<T> {
    #[inline(always)]
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Into<String>,
    {
        self.ok_or_else(|| Error::custom(context))
    }

    #[inline(always)]
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.ok_or_else(|| Error::custom(f()))
    }
}

// ====================== CONVENIENCE MACROS ======================

/// Early return with an error: `bail!("msg")`, `bail!(err)` or formatted.
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::error::Error::msg($msg))
    };
    ($err:expr $(,)?) => {
        return Err(Into::<$crate::error::Error>::into($err))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::error::Error::format(format_args!($fmt, $($arg)*)))
    };
}

/// Ensure a condition is true, else `bail!`.
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $msg:literal $(,)?) => {
        if !($cond) {
            $crate::bail!($msg);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::bail!($fmt, $($arg)*);
        }
    };
}

/// Equality check that bails with both values printed.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    $crate::bail!(
                        "assertion failed: `({} == {})`\n  left: `{:?}`\n right: `{:?}`",
                        stringify!($left),
                        stringify!($right),
                        left_val,
                        right_val
                    );
                }
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive(v: f32) -> Result<f32> {
        ensure!(v > 0.0, "value must be positive, got {}", v);
        Ok(v)
    }

    #[test]
    fn option_context_produces_custom_error() {
        let missing: Option<u32> = None;
        let err = missing.context("no wheel").unwrap_err();
        assert!(err.is_custom());
        assert_eq!(err.to_string(), "no wheel");
    }

    #[test]
    fn ensure_bails_with_formatted_message() {
        assert_eq!(positive(2.0).unwrap(), 2.0);
        assert_eq!(positive(-1.0).unwrap_err().to_string(), "value must be positive, got -1");
    }

    #[test]
    fn result_context_chains() {
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = io.with_context(|| "reading save").unwrap_err();
        assert!(err.to_string().starts_with("reading save: I/O error"));
    }
}
