//! Zerodha instrument CSV parser.
//!
//! Kite Connect's `/instruments` endpoint returns a CSV dump of every
//! contract across all exchanges, regenerated once per day. This module
//! owns all classification logic for that dump and produces the uniform
//! [`ParsedInstruments`] container the store inserts from.
//!
//! Rows outside scope (MCX, CDS, bonds, warrants) are silently skipped -
//! the dump carries far more than the canonical model serves.
//!
use csv::Reader;
use serde::Deserialize;
use tracing::warn;

use crate::error::{DalalError, Result};
use crate::instruments::{
    underlying_exchange, ParsedEquity, ParsedFuture, ParsedIndex, ParsedInstruments, ParsedOption,
};
use crate::models::enums::{Exchange, OptionType};

/// Index name translations: canonical symbol ↔ Zerodha's INDICES-segment
/// tradingsymbol.
///
/// Kite's F&O rows identify their underlying index through the `name` field
/// using the canonical spelling, which does NOT always match the
/// tradingsymbol under which the index itself is listed. Every index that
/// appears as an F&O underlying must be present here; indices not listed
/// pass through unchanged.
const INDEX_NAME_MAP: &[(&str, &str)] = &[
    // canonical, broker tradingsymbol
    ("NIFTY", "NIFTY 50"),
    ("BANKNIFTY", "NIFTY BANK"),
    ("MIDCPNIFTY", "NIFTY MID SELECT"),
    ("FINNIFTY", "NIFTY FIN SERVICE"),
    ("NIFTY500", "NIFTY 500"),
    ("NIFTYNXT50", "NIFTY NEXT 50"),
    ("SENSEX", "SENSEX"),
    ("BANKEX", "BANKEX"),
    ("SENSEX50", "SNSX50"),
];

fn canonical_index_symbol(broker_symbol: &str) -> &str {
    INDEX_NAME_MAP
        .iter()
        .find(|(_, broker)| *broker == broker_symbol)
        .map(|(canonical, _)| *canonical)
        .unwrap_or(broker_symbol)
}

/// One row of the Kite instrument dump.
#[derive(Debug, Deserialize)]
struct DumpRow {
    /// Numerical identifier used for WebSocket subscriptions and order
    /// routing lookups.
    instrument_token: String,
    #[allow(dead_code)]
    exchange_token: String,
    tradingsymbol: String,
    /// Company name for equities; canonical underlying symbol for F&O rows.
    name: String,
    #[allow(dead_code)]
    last_price: Option<f64>,
    expiry: Option<String>,
    strike: Option<f64>,
    tick_size: f64,
    lot_size: i64,
    /// EQ, FUT, CE, PE, or an out-of-scope marker.
    instrument_type: String,
    segment: String,
    exchange: String,
}

/// Parse the raw CSV dump. Malformed CSV is an error; rows that merely fall
/// outside the canonical scope are skipped.
pub fn parse(raw_csv: &str) -> Result<ParsedInstruments> {
    let mut result = ParsedInstruments::default();
    let mut reader = Reader::from_reader(raw_csv.as_bytes());

    for record in reader.deserialize() {
        let row: DumpRow =
            record.map_err(|e| DalalError::Internal(format!("Kite CSV parse error: {}", e)))?;

        let Some(exchange) = Exchange::parse(&row.exchange) else {
            continue;
        };

        match exchange {
            Exchange::NSE | Exchange::BSE => {
                if row.segment == "INDICES" {
                    result.indices.push(parse_index(row, exchange));
                } else if row.instrument_type == "EQ" {
                    result.equities.push(parse_equity(row, exchange));
                }
            }
            Exchange::NFO | Exchange::BFO => match row.instrument_type.as_str() {
                "FUT" => {
                    if let Some(future) = parse_future(row, exchange) {
                        result.futures.push(future);
                    }
                }
                "CE" | "PE" => {
                    if let Some(option) = parse_option(row, exchange) {
                        result.options.push(option);
                    }
                }
                _ => {}
            },
            // MCX, CDS - out of canonical scope.
            _ => {}
        }
    }

    Ok(result)
}

fn parse_index(row: DumpRow, exchange: Exchange) -> ParsedIndex {
    let canonical = canonical_index_symbol(&row.tradingsymbol).to_string();
    ParsedIndex {
        exchange,
        symbol: canonical,
        broker_symbol: row.tradingsymbol,
        segment: row.segment,
        name: (!row.name.is_empty()).then_some(row.name),
        lot_size: row.lot_size,
        tick_size: row.tick_size,
        broker_token: row.instrument_token,
    }
}

fn parse_equity(row: DumpRow, exchange: Exchange) -> ParsedEquity {
    ParsedEquity {
        exchange,
        symbol: row.tradingsymbol.clone(),
        broker_symbol: row.tradingsymbol,
        segment: row.segment,
        name: (!row.name.is_empty()).then_some(row.name),
        lot_size: row.lot_size,
        tick_size: row.tick_size,
        broker_token: row.instrument_token,
        isin: None,
    }
}

fn parse_future(row: DumpRow, exchange: Exchange) -> Option<ParsedFuture> {
    let underlying = underlying_exchange(exchange)?;
    let expiry = parse_expiry(row.expiry.as_deref(), &row.tradingsymbol)?;
    Some(ParsedFuture {
        exchange,
        // The name field already carries the canonical symbol for both
        // index and equity underlyings.
        symbol: row.name,
        broker_symbol: row.tradingsymbol,
        segment: row.segment,
        lot_size: row.lot_size,
        tick_size: row.tick_size,
        broker_token: row.instrument_token,
        expiry,
        underlying_exchange: underlying,
    })
}

fn parse_option(row: DumpRow, exchange: Exchange) -> Option<ParsedOption> {
    let underlying = underlying_exchange(exchange)?;
    let expiry = parse_expiry(row.expiry.as_deref(), &row.tradingsymbol)?;
    let option_type = OptionType::parse(&row.instrument_type)?;
    let strike = row.strike.unwrap_or(0.0);
    if strike <= 0.0 {
        // A zero strike marks a malformed contract row, not a tradeable
        // option.
        warn!("skipping option {} with zero strike", row.tradingsymbol);
        return None;
    }
    Some(ParsedOption {
        exchange,
        symbol: row.name,
        broker_symbol: row.tradingsymbol,
        segment: row.segment,
        lot_size: row.lot_size,
        tick_size: row.tick_size,
        broker_token: row.instrument_token,
        expiry,
        strike,
        option_type,
        underlying_exchange: underlying,
    })
}

fn parse_expiry(raw: Option<&str>, tradingsymbol: &str) -> Option<chrono::NaiveDate> {
    match raw {
        Some(value) if !value.is_empty() => {
            match chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
                Ok(date) => Some(date),
                Err(_) => {
                    warn!("skipping {} with unparseable expiry '{}'", tradingsymbol, value);
                    None
                }
            }
        }
        _ => {
            warn!("skipping derivative {} without expiry", tradingsymbol);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange";

    fn fixture_csv() -> String {
        [
            HEADER,
            "256265,1001,NIFTY 50,NIFTY 50,0,,,0.05,1,EQ,INDICES,NSE",
            "256266,1002,SENSEX,SENSEX,0,,,0.05,1,EQ,INDICES,BSE",
            "738561,2884,RELIANCE,RELIANCE INDUSTRIES,0,,,0.05,1,EQ,NSE,NSE",
            "1280641,5002,SBIN,STATE BANK OF INDIA,0,,,0.05,1,EQ,NSE,NSE",
            "1280642,5003,RELIANCE,RELIANCE INDUSTRIES,0,,,0.05,1,EQ,BSE,BSE",
            "1000001,40001,NIFTY26FEBFUT,NIFTY,0,2026-02-26,0,0.05,50,FUT,NFO-FUT,NFO",
            "1000002,40002,RELIANCE26FEBFUT,RELIANCE,0,2026-02-26,0,0.05,250,FUT,NFO-FUT,NFO",
            "1000003,40003,SENSEX26FEBFUT,SENSEX,0,2026-02-26,0,0.05,10,FUT,BFO-FUT,BFO",
            "1000004,40004,NIFTY26FEB23000CE,NIFTY,0,2026-02-26,23000.0,0.05,50,CE,NFO-OPT,NFO",
            "1000005,40005,NIFTY26FEB23000PE,NIFTY,0,2026-02-26,23000.0,0.05,50,PE,NFO-OPT,NFO",
            "1000006,40006,SENSEX26FEB81000CE,SENSEX,0,2026-02-26,81000.0,0.05,10,CE,BFO-OPT,BFO",
            "1000007,40007,RELIANCE26FEB1300CE,RELIANCE,0,2026-02-26,1300.0,0.05,250,CE,NFO-OPT,NFO",
        ]
        .join("\n")
    }

    #[test]
    fn parse_counts() {
        let result = parse(&fixture_csv()).unwrap();
        assert_eq!(result.indices.len(), 2);
        assert_eq!(result.equities.len(), 3);
        assert_eq!(result.futures.len(), 3);
        assert_eq!(result.options.len(), 4);
    }

    #[test]
    fn index_gets_canonical_symbol() {
        let result = parse(&fixture_csv()).unwrap();
        let nifty = result
            .indices
            .iter()
            .find(|i| i.symbol == "NIFTY")
            .expect("NIFTY parsed");
        assert_eq!(nifty.exchange, Exchange::NSE);
        assert_eq!(nifty.broker_symbol, "NIFTY 50");
        assert_eq!(nifty.broker_token, "256265");
    }

    #[test]
    fn future_carries_underlying_exchange() {
        let result = parse(&fixture_csv()).unwrap();
        let nfo = result.futures.iter().find(|f| f.exchange == Exchange::NFO).unwrap();
        assert_eq!(nfo.underlying_exchange, Exchange::NSE);
        let bfo = result.futures.iter().find(|f| f.exchange == Exchange::BFO).unwrap();
        assert_eq!(bfo.underlying_exchange, Exchange::BSE);
    }

    #[test]
    fn option_types_cover_both_sides() {
        let result = parse(&fixture_csv()).unwrap();
        assert!(result.options.iter().any(|o| o.option_type == OptionType::CE));
        assert!(result.options.iter().any(|o| o.option_type == OptionType::PE));
    }

    #[test]
    fn unknown_exchange_row_is_skipped() {
        let csv = format!(
            "{}\n1000008,40008,GOLD26FEBFUT,GOLD,0,2026-02-26,0,0.01,1,FUT,MCX-FUT,MCX",
            HEADER
        );
        let result = parse(&csv).unwrap();
        assert_eq!(result.indices.len(), 0);
        assert_eq!(result.equities.len(), 0);
        assert_eq!(result.futures.len(), 0);
        assert_eq!(result.options.len(), 0);
    }

    #[test]
    fn zero_strike_option_is_rejected() {
        let csv = format!(
            "{}\n1000009,40009,NIFTY26FEB0CE,NIFTY,0,2026-02-26,0,0.05,50,CE,NFO-OPT,NFO",
            HEADER
        );
        let result = parse(&csv).unwrap();
        assert!(result.options.is_empty());
        assert!(result.equities.is_empty());
    }

    #[test]
    fn unknown_instrument_type_is_skipped() {
        let csv = format!(
            "{}\n1000010,40010,SOMEBOND,SOME BOND,0,,,0.01,1,NCD,NSE,NSE",
            HEADER
        );
        let result = parse(&csv).unwrap();
        assert!(result.is_empty());
    }
}
