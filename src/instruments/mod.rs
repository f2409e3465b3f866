//! Instrument master ingestion and resolution.
//!
//! Every broker publishes a daily dump of all tradeable contracts in its own
//! format (Zerodha: gzipped CSV; AngelOne: a JSON scrip master). The types
//! in this module are the uniform output contract of the per-broker parsers:
//! the [`store`] can insert a [`ParsedInstruments`] without knowing anything
//! about the vendor format it came from.
//!
//! Groups are ordered the way the store must insert them - indices and
//! equities first, because futures and options reference them as
//! underlyings.
//!
use chrono::NaiveDate;

use crate::models::enums::{Exchange, OptionType};

pub mod resolver;
pub mod store;

pub use resolver::{InstrumentResolver, ResolvedInstrument};
pub use store::InstrumentStore;

/// A parsed index row (NIFTY 50, SENSEX, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedIndex {
    pub exchange: Exchange,
    /// Canonical symbol - what users write (`NIFTY`, not `NIFTY 50`).
    pub symbol: String,
    /// The broker's display symbol.
    pub broker_symbol: String,
    pub segment: String,
    pub name: Option<String>,
    pub lot_size: i64,
    pub tick_size: f64,
    pub broker_token: String,
}

/// A parsed cash-equity row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEquity {
    pub exchange: Exchange,
    /// Canonical symbol - the tradingsymbol with any vendor suffix stripped.
    pub symbol: String,
    pub broker_symbol: String,
    pub segment: String,
    pub name: Option<String>,
    pub lot_size: i64,
    pub tick_size: f64,
    pub broker_token: String,
    pub isin: Option<String>,
}

/// A parsed futures row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFuture {
    /// The derivative venue (NFO or BFO) - what gets stored on the row.
    pub exchange: Exchange,
    /// Canonical underlying symbol, taken from the vendor `name` field.
    pub symbol: String,
    /// The vendor's tradingsymbol, e.g. `NIFTY26FEBFUT`.
    pub broker_symbol: String,
    pub segment: String,
    pub lot_size: i64,
    pub tick_size: f64,
    pub broker_token: String,
    pub expiry: NaiveDate,
    /// The underlying's cash venue (NSE for NFO, BSE for BFO) - used to
    /// resolve `underlying_id` at insert time.
    pub underlying_exchange: Exchange,
}

/// A parsed options row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOption {
    pub exchange: Exchange,
    pub symbol: String,
    /// The vendor's tradingsymbol, e.g. `NIFTY26FEB23000CE`.
    pub broker_symbol: String,
    pub segment: String,
    pub lot_size: i64,
    pub tick_size: f64,
    pub broker_token: String,
    pub expiry: NaiveDate,
    /// Strike in rupees.
    pub strike: f64,
    pub option_type: OptionType,
    pub underlying_exchange: Exchange,
}

/// The uniform result of parsing one broker's instrument dump.
#[derive(Debug, Clone, Default)]
pub struct ParsedInstruments {
    pub indices: Vec<ParsedIndex>,
    pub equities: Vec<ParsedEquity>,
    pub futures: Vec<ParsedFuture>,
    pub options: Vec<ParsedOption>,
}

impl ParsedInstruments {
    /// Total row count across all four groups.
    pub fn len(&self) -> usize {
        self.indices.len() + self.equities.len() + self.futures.len() + self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The underlying cash venue for a derivative venue. Static by exchange
/// rules: NFO derivatives are NSE underlyings, BFO derivatives are BSE
/// underlyings.
pub(crate) fn underlying_exchange(derivative_venue: Exchange) -> Option<Exchange> {
    match derivative_venue {
        Exchange::NFO => Some(Exchange::NSE),
        Exchange::BFO => Some(Exchange::BSE),
        _ => None,
    }
}
