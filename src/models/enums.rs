//! Canonical trading enums.
//!
//! This module defines the vocabulary shared by every broker adapter:
//! exchanges, order attributes, option types, auth modes and the refresh
//! failure policy. Each enum serializes to the canonical wire string and
//! converts explicitly from vendor strings; unknown inputs never panic.
//!
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DalalError;

/// Exchange segments supported by the canonical model.
///
/// `NSE`/`BSE` are the cash venues; `NFO`/`BFO` are their derivative venues.
/// Canonical `Future`/`Option` values carry the *cash* venue of the
/// underlying - the derivative venue is derived during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// National Stock Exchange
    NSE,
    /// Bombay Stock Exchange
    BSE,
    /// NSE Futures and Options
    NFO,
    /// BSE Futures and Options
    BFO,
    /// Currency Derivatives Segment
    CDS,
    /// Multi Commodity Exchange
    MCX,
}

impl Exchange {
    /// Parse a vendor exchange string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NSE" => Some(Self::NSE),
            "BSE" => Some(Self::BSE),
            "NFO" => Some(Self::NFO),
            "BFO" => Some(Self::BFO),
            "CDS" => Some(Self::CDS),
            "MCX" => Some(Self::MCX),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NSE => "NSE",
            Self::BSE => "BSE",
            Self::NFO => "NFO",
            Self::BFO => "BFO",
            Self::CDS => "CDS",
            Self::MCX => "MCX",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Option contract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    /// Call option
    CE,
    /// Put option
    PE,
}

impl OptionType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CE" => Some(Self::CE),
            "PE" => Some(Self::PE),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CE => "CE",
            Self::PE => "PE",
        }
    }
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Margin product applied to an order or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    /// Cash and carry (delivery)
    CNC,
    /// Margin intraday squareoff
    MIS,
    /// Normal (F&O carry forward)
    NRML,
}

impl ProductType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CNC" => Some(Self::CNC),
            "MIS" => Some(Self::MIS),
            "NRML" => Some(Self::NRML),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CNC => "CNC",
            Self::MIS => "MIS",
            Self::NRML => "NRML",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Order execution type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    /// Market order
    #[serde(rename = "MARKET")]
    Market,
    /// Limit order
    #[serde(rename = "LIMIT")]
    Limit,
    /// Stop-loss limit order
    #[serde(rename = "SL")]
    Sl,
    /// Stop-loss market order
    #[serde(rename = "SL_M")]
    SlM,
}

impl OrderType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MARKET" => Some(Self::Market),
            "LIMIT" => Some(Self::Limit),
            "SL" => Some(Self::Sl),
            "SL_M" | "SL-M" => Some(Self::SlM),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::Sl => "SL",
            Self::SlM => "SL_M",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl Side {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "BUY" => Some(Self::Buy),
            "SELL" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }

    /// The offsetting side, used when closing a position.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The canonical five-state order lifecycle.
///
/// Vendors report a dozen-plus interim statuses (`TRIGGER PENDING`,
/// `AMO REQ RECEIVED`, `MODIFY PENDING`, ...). Each transformer folds those
/// into these five; anything unrecognized folds to `Pending` rather than
/// failing the whole order fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "CANCELLED")]
    Cancelled,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let display_str = match self {
            Self::Pending => "PENDING",
            Self::Open => "OPEN",
            Self::Complete => "COMPLETE",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{}", display_str)
    }
}

/// How a broker session is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    /// User supplies a pre-obtained access token via config; the library
    /// never performs a credential flow.
    #[serde(rename = "manual")]
    Manual,
    /// The library performs the full login (user id + PIN + TOTP) and
    /// refreshes tokens automatically.
    #[serde(rename = "auto")]
    Auto,
}

impl AuthMode {
    /// Parse a config-supplied mode string.
    pub fn parse(value: &str) -> crate::error::Result<Self> {
        match value {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            other => Err(DalalError::unsupported(format!(
                "Unknown auth_mode: '{}'. Valid values: 'manual', 'auto'.",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Policy applied when the daily instrument refresh fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnStale {
    /// Propagate the refresh error.
    #[default]
    Fail,
    /// Log and continue on yesterday's data if any rows exist; otherwise
    /// propagate a clear error.
    Warn,
}

impl OnStale {
    pub fn parse(value: &str) -> crate::error::Result<Self> {
        match value {
            "fail" => Ok(Self::Fail),
            "warn" => Ok(Self::Warn),
            other => Err(DalalError::Internal(format!(
                "Unknown on_stale policy: '{}'. Valid values: 'fail', 'warn'.",
                other
            ))),
        }
    }
}
