// src/error.rs
//! Error handling for the whole builder crate.
//!
//! One enum for every failure the builder can report. Variants wrapping
//! foreign errors convert with `?`; domain variants carry the ids needed to
//! explain what went wrong. Add context with [`Error::context`] or the
//! extension traits in [`crate::context`].

use std::fmt;
use thiserror::Error;

/// Main error type. `Send + Sync + 'static` so it can cross the event bus.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O errors (save files, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization of saves and config.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Integer parsing failures (telemetry lines).
    #[error("integer parse error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    /// Bad telemetry pattern.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// The proximity search cannot answer queries right now.
    #[error("proximity search unavailable: {0}")]
    ProximityUnavailable(String),

    /// A part id that is not (or no longer) alive in the registry.
    #[error("unknown part instance {0}")]
    UnknownPart(String),

    /// A catalog lookup by definition id failed.
    #[error("unknown part definition '{0}'")]
    UnknownDefinition(String),

    /// A part that must carry a physics body does not.
    #[error("part '{0}' has no physics body")]
    MissingBody(String),

    /// Wheel arrays of a chassis disagree; fatal for that chassis.
    #[error("chassis '{name}' corrupted: {visuals} wheel visuals vs {handles} wheel handles")]
    ChassisCorrupted {
        name: String,
        visuals: usize,
        handles: usize,
    },

    /// Physics backend refused an operation (stale handle, bad input).
    #[error("physics: {0}")]
    Physics(String),

    /// Invalid configuration values.
    #[error("invalid config: {0}")]
    Config(String),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Formatted custom error (like `format!` but returns `Error`).
    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    /// Wrap `self` with a context message.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// True for proximity failures, looking through context layers.
    pub fn is_proximity_unavailable(&self) -> bool {
        match self {
            Error::ProximityUnavailable(_) => true,
            Error::WithContext { source, .. } => source.is_proximity_unavailable(),
            _ => false,
        }
    }

    #[inline]
    pub fn is_custom(&self) -> bool {
        matches!(self, Error::Custom(_))
    }
}

/// Convenient `Result` alias, use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;
