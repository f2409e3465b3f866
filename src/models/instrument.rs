//! The canonical instrument model.
//!
//! Between multiple exchanges and segments there are millions of contracts
//! in the daily vendor dumps. User code never touches vendor tokens or
//! tradingsymbols; it identifies what to trade with an [`Instrument`] value
//! built from things a trader actually knows - exchange, symbol, expiry,
//! strike. The resolver turns that into the vendor's opaque token at call
//! time.
//!
//! `Instrument` values are immutable, structurally comparable and hashable:
//! they are the cache keys of the resolver and the subscription ledger.
//!
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::enums::{Exchange, OptionType};

/// A canonical, vendor-independent instrument identifier.
///
/// For `Future` and `Option`, `exchange` names the *underlying's* cash venue
/// (NSE/BSE), not the derivative venue (NFO/BFO): users key into a contract
/// by what they know, and the resolver routes to the right venue.
///
/// Strike prices are stored as integer paise so that instruments can be
/// compared and hashed deterministically; use [`Instrument::option`] to
/// construct from a rupee value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instrument {
    /// A market index (NIFTY, SENSEX, BANKNIFTY, ...). Not tradeable -
    /// used for tick subscription and as the F&O underlying reference.
    Index { exchange: Exchange, symbol: String },
    /// A listed stock on a cash venue.
    Equity { exchange: Exchange, symbol: String },
    /// A futures contract, keyed by underlying and expiry.
    Future {
        exchange: Exchange,
        symbol: String,
        expiry: NaiveDate,
    },
    /// An option contract, keyed by underlying, expiry, strike and type.
    Option {
        exchange: Exchange,
        symbol: String,
        expiry: NaiveDate,
        strike_paise: i64,
        option_type: OptionType,
    },
}

impl Instrument {
    /// Construct an index reference.
    pub fn index(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self::Index {
            exchange,
            symbol: symbol.into(),
        }
    }

    /// Construct an equity reference.
    pub fn equity(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self::Equity {
            exchange,
            symbol: symbol.into(),
        }
    }

    /// Construct a futures reference. `exchange` is the underlying's cash
    /// venue (NSE for NFO contracts, BSE for BFO contracts).
    pub fn future(exchange: Exchange, symbol: impl Into<String>, expiry: NaiveDate) -> Self {
        Self::Future {
            exchange,
            symbol: symbol.into(),
            expiry,
        }
    }

    /// Construct an option reference. `strike` is in rupees and is rounded
    /// to the nearest paisa.
    pub fn option(
        exchange: Exchange,
        symbol: impl Into<String>,
        expiry: NaiveDate,
        strike: f64,
        option_type: OptionType,
    ) -> Self {
        Self::Option {
            exchange,
            symbol: symbol.into(),
            expiry,
            strike_paise: (strike * 100.0).round() as i64,
            option_type,
        }
    }

    /// The exchange the user addressed this instrument by.
    pub fn exchange(&self) -> Exchange {
        match self {
            Self::Index { exchange, .. }
            | Self::Equity { exchange, .. }
            | Self::Future { exchange, .. }
            | Self::Option { exchange, .. } => *exchange,
        }
    }

    /// The canonical symbol (underlying symbol for derivatives).
    pub fn symbol(&self) -> &str {
        match self {
            Self::Index { symbol, .. }
            | Self::Equity { symbol, .. }
            | Self::Future { symbol, .. }
            | Self::Option { symbol, .. } => symbol,
        }
    }

    /// Strike price in rupees, for options.
    pub fn strike(&self) -> Option<f64> {
        match self {
            Self::Option { strike_paise, .. } => Some(*strike_paise as f64 / 100.0),
            _ => None,
        }
    }

    /// Contract expiry, for derivatives.
    pub fn expiry(&self) -> Option<NaiveDate> {
        match self {
            Self::Future { expiry, .. } | Self::Option { expiry, .. } => Some(*expiry),
            _ => None,
        }
    }

    /// Indices cannot be traded, only subscribed to.
    pub fn is_tradeable(&self) -> bool {
        !matches!(self, Self::Index { .. })
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index { exchange, symbol } => write!(f, "{}:{} (index)", exchange, symbol),
            Self::Equity { exchange, symbol } => write!(f, "{}:{}", exchange, symbol),
            Self::Future {
                exchange,
                symbol,
                expiry,
            } => write!(f, "{}:{} FUT {}", exchange, symbol, expiry),
            Self::Option {
                exchange,
                symbol,
                expiry,
                strike_paise,
                option_type,
            } => write!(
                f,
                "{}:{} {} {}{}",
                exchange,
                symbol,
                expiry,
                *strike_paise as f64 / 100.0,
                option_type
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 26).unwrap()
    }

    #[test]
    fn structural_equality_and_hashing() {
        let a = Instrument::option(Exchange::NSE, "NIFTY", expiry(), 23000.0, OptionType::CE);
        let b = Instrument::option(Exchange::NSE, "NIFTY", expiry(), 23000.0, OptionType::CE);
        assert_eq!(a, b);

        let mut cache = HashMap::new();
        cache.insert(a, "1000004");
        assert_eq!(cache.get(&b), Some(&"1000004"));
    }

    #[test]
    fn strike_round_trips_through_paise() {
        let opt = Instrument::option(Exchange::NSE, "NIFTY", expiry(), 23000.5, OptionType::PE);
        assert_eq!(opt.strike(), Some(23000.5));
    }

    #[test]
    fn distinct_variants_never_compare_equal() {
        let idx = Instrument::index(Exchange::NSE, "NIFTY");
        let eq = Instrument::equity(Exchange::NSE, "NIFTY");
        assert_ne!(idx, eq);
    }

    #[test]
    fn indices_are_not_tradeable() {
        assert!(!Instrument::index(Exchange::NSE, "NIFTY").is_tradeable());
        assert!(Instrument::equity(Exchange::NSE, "SBIN").is_tradeable());
        assert!(Instrument::future(Exchange::NSE, "NIFTY", expiry()).is_tradeable());
    }
}
