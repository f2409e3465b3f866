//! Canonical data types shared by every broker adapter.
//!
//! The structs here are the *output* side of the normalization layer: every
//! vendor response is folded into one of these records by the adapter's
//! transformer before it reaches user code. They deliberately carry fewer
//! fields than any single vendor exposes - only what is meaningful across
//! all of them.
//!
//! # Submodules
//!
//! - `enums`: canonical trading enums (exchange, side, order/product types,
//!     order status, auth mode).
//! - `instrument`: the canonical [`Instrument`] identifier.
//!
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod enums;
pub mod instrument;

pub use enums::{AuthMode, Exchange, OnStale, OptionType, OrderStatus, OrderType, ProductType, Side};
pub use instrument::Instrument;

/// The account profile behind the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// The broker's client/user id.
    pub client_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Available and utilised funds for the equity segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fund {
    /// Cash available for new positions.
    pub available: f64,
    /// Margin currently blocked.
    pub used: f64,
    /// Net account value.
    pub total: f64,
    /// Collateral margin from pledged holdings.
    pub collateral: f64,
    /// Unrealised mark-to-market P&L.
    pub m2m_unrealized: f64,
    /// Realised mark-to-market P&L.
    pub m2m_realized: f64,
}

/// A demat holding (long-term delivery stock).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub instrument: Instrument,
    pub qty: i64,
    pub avg_price: f64,
    /// Last traded price.
    pub ltp: f64,
    pub pnl: f64,
    /// P&L as a percentage of cost. `0.0` when the average price is zero
    /// (corporate-action residue rows).
    pub pnl_percent: f64,
}

/// An open position (derivatives and intraday equity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    /// Net quantity; negative for short positions.
    pub qty: i64,
    pub avg_price: f64,
    pub ltp: f64,
    pub pnl: f64,
    pub product: ProductType,
}

/// A normalized order-book entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Broker order id.
    pub id: String,
    /// Canonical instrument when it could be reconstructed from the vendor
    /// row; `None` when the vendor row carries only an opaque tradingsymbol.
    pub instrument: Option<Instrument>,
    pub side: Side,
    pub qty: i64,
    pub filled_qty: i64,
    pub product: ProductType,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub avg_price: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A normalized trade-book entry (one fill).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// The order this fill belongs to.
    pub order_id: String,
    pub instrument: Option<Instrument>,
    pub side: Side,
    pub qty: i64,
    pub avg_price: f64,
    /// qty × avg_price.
    pub trade_value: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Margin requirement for a prospective order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    /// Total initial margin required.
    pub total: f64,
    pub span: f64,
    pub exposure: f64,
    pub option_premium: f64,
    /// Margin after spread/hedge benefits.
    pub final_total: f64,
    /// total − final_total.
    pub benefit: f64,
}

/// One normalized market-data update.
#[derive(Debug, Clone)]
pub struct Tick {
    pub instrument: Instrument,
    /// Last traded price in rupees.
    pub ltp: f64,
    pub volume: Option<i64>,
    /// Open interest (derivatives).
    pub oi: Option<i64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}
