//! Error types.
//!
//! This module defines the canonical error taxonomy for the `dalal` crate.
//! Every broker publishes its own error vocabulary (Kite Connect's
//! `error_type` strings, SmartAPI's `errorcode` values); the per-broker
//! transformers translate those into the variants defined here so that user
//! code can match on one taxonomy regardless of the vendor behind the client.
//!
//! Business-level variants carry the human-readable message from the broker
//! and, where available, the raw vendor error code. Transport-level failures
//! (`reqwest`, `rusqlite`, `tungstenite`, JSON) are wrapped rather than
//! re-described.
//!
use std::fmt;

/// A `Result` alias where the `Err` case is [`DalalError`].
pub type Result<T> = std::result::Result<T, DalalError>;

/// The raw vendor error code attached to a business error, if the vendor
/// supplied one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerCode(pub Option<String>);

impl fmt::Display for BrokerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(code) => write!(f, "[{}]", code),
            None => Ok(()),
        }
    }
}

/// An enumeration of all possible errors that may occur when using `dalal`.
///
/// The first group of variants is the canonical broker-error taxonomy that
/// vendor error codes are folded into; the second group wraps failures from
/// the underlying transport and storage crates.
#[derive(Debug, thiserror::Error)]
pub enum DalalError {
    /// Token missing, invalid or expired; credentials rejected.
    #[error("authentication error {code}: {message}")]
    Authentication { message: String, code: BrokerCode },

    /// The vendor signalled request throttling. Retryable.
    #[error("rate limit error {code}: {message}")]
    RateLimit { message: String, code: BrokerCode },

    /// Order rejected for lack of margin.
    #[error("insufficient funds {code}: {message}")]
    InsufficientFunds { message: String, code: BrokerCode },

    /// Resolver miss, or the vendor rejected the symbol.
    #[error("instrument not found {code}: {message}")]
    InstrumentNotFound { message: String, code: BrokerCode },

    /// A capability check failed, or the vendor lacks a requested operation.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// Order placement/fetch failure not otherwise classified.
    #[error("order error {code}: {message}")]
    Order { message: String, code: BrokerCode },

    /// Missing required fields or bad parameter values on an order.
    #[error("invalid order {code}: {message}")]
    InvalidOrder { message: String, code: BrokerCode },

    /// The referenced order id does not exist at the vendor.
    #[error("order not found {code}: {message}")]
    OrderNotFound { message: String, code: BrokerCode },

    /// Any vendor error that does not map to a more specific kind.
    #[error("broker error {code}: {message}")]
    Broker { message: String, code: BrokerCode },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("WebSocket error: {0}")]
    Websocket(#[from] tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal `dalal` errors.
    #[error("internal `dalal` error: {0}")]
    Internal(String),
}

impl DalalError {
    /// Whether a failed call may be safely retried as-is.
    ///
    /// Only [`DalalError::RateLimit`] is retryable by default; everything
    /// else either already went through the transport retry budget or is a
    /// terminal business rejection.
    pub fn retryable(&self) -> bool {
        matches!(self, DalalError::RateLimit { .. })
    }

    /// The raw vendor error code, if this is a business error that carried one.
    pub fn broker_code(&self) -> Option<&str> {
        match self {
            DalalError::Authentication { code, .. }
            | DalalError::RateLimit { code, .. }
            | DalalError::InsufficientFunds { code, .. }
            | DalalError::InstrumentNotFound { code, .. }
            | DalalError::Order { code, .. }
            | DalalError::InvalidOrder { code, .. }
            | DalalError::OrderNotFound { code, .. }
            | DalalError::Broker { code, .. } => code.0.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn auth(message: impl Into<String>) -> Self {
        DalalError::Authentication {
            message: message.into(),
            code: BrokerCode(None),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        DalalError::UnsupportedFeature {
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        DalalError::InstrumentNotFound {
            message: message.into(),
            code: BrokerCode(None),
        }
    }

    pub(crate) fn broker(message: impl Into<String>, code: Option<String>) -> Self {
        DalalError::Broker {
            message: message.into(),
            code: BrokerCode(code),
        }
    }
}

impl From<&str> for DalalError {
    fn from(value: &str) -> Self {
        DalalError::Internal(value.to_string())
    }
}

impl From<String> for DalalError {
    fn from(value: String) -> Self {
        DalalError::Internal(value)
    }
}

/// Utility to map deserialization errors to `DalalError` while logging the
/// JSON string that caused them.
pub(crate) fn map_deserialization_error(e: serde_json::Error, json_str: &str) -> DalalError {
    tracing::error!("failed deserialization of: {}", json_str);
    DalalError::Json(e)
}
