//! AngelOne scrip master parser.
//!
//! The SmartAPI scrip master is a JSON array of flat records covering every
//! contract the broker serves. Compared to the Kite dump it has two
//! numeric quirks the parser must undo: strikes are quoted in *paise*, and
//! expiries use the `DDMMMYYYY` calendar format (`27JUN2028`).
//!
//! Classification mirrors the Zerodha parser's shape; only the field
//! vocabulary differs.
//!
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{DalalError, Result};
use crate::instruments::{
    underlying_exchange, ParsedEquity, ParsedFuture, ParsedIndex, ParsedInstruments, ParsedOption,
};
use crate::models::enums::{Exchange, OptionType};

/// Equity-series suffixes that mark bonds, mutual funds, SME and other
/// non-equity listings. Rows carrying one of these are dropped.
const REJECTED_SUFFIXES: &[&str] = &["GS", "MF", "SG", "SM", "IL", "BL", "CB", "TB"];

/// Index display names → canonical underlying symbol. F&O rows name their
/// underlying canonically, so every F&O underlying must translate here;
/// indices not listed pass through unchanged.
const INDEX_NAME_MAP: &[(&str, &str)] = &[
    // broker display (uppercased), canonical
    ("NIFTY 50", "NIFTY"),
    ("NIFTY BANK", "BANKNIFTY"),
    ("NIFTY MID SELECT", "MIDCPNIFTY"),
    ("NIFTY FIN SERVICE", "FINNIFTY"),
    ("NIFTY 500", "NIFTY500"),
    ("NIFTY NEXT 50", "NIFTYNXT50"),
    ("SENSEX", "SENSEX"),
    ("BANKEX", "BANKEX"),
    ("SNSX50", "SENSEX50"),
];

fn canonical_index_symbol(display: &str) -> String {
    let upper = display.to_uppercase();
    INDEX_NAME_MAP
        .iter()
        .find(|(broker, _)| *broker == upper)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(upper)
}

/// One record of the scrip master. SmartAPI quotes its numerics as strings.
#[derive(Debug, Deserialize)]
struct ScripRow {
    token: String,
    symbol: String,
    name: String,
    #[serde(default)]
    expiry: String,
    #[serde(default)]
    strike: String,
    #[serde(default)]
    lotsize: String,
    #[serde(default)]
    instrumenttype: String,
    exch_seg: String,
    #[serde(default)]
    tick_size: String,
}

impl ScripRow {
    fn lot_size(&self) -> i64 {
        self.lotsize.parse().unwrap_or(1)
    }

    /// Tick size is quoted in paise, like every other price in the dump.
    fn tick_size_rupees(&self) -> f64 {
        self.tick_size.parse::<f64>().unwrap_or(0.0) / 100.0
    }

    /// Strike is quoted in paise.
    fn strike_rupees(&self) -> f64 {
        self.strike.parse::<f64>().unwrap_or(0.0) / 100.0
    }

    fn expiry_date(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::parse_from_str(&self.expiry, "%d%b%Y").ok()
    }
}

/// Parse the raw scrip master JSON. Malformed JSON is an error; records
/// outside the canonical scope are skipped.
pub fn parse(raw_json: &str) -> Result<ParsedInstruments> {
    let rows: Vec<Value> = serde_json::from_str(raw_json)
        .map_err(|e| DalalError::Internal(format!("SmartAPI scrip master parse error: {}", e)))?;
    parse_rows(rows)
}

pub(crate) fn parse_rows(rows: Vec<Value>) -> Result<ParsedInstruments> {
    let mut result = ParsedInstruments::default();

    for value in rows {
        let Ok(row) = serde_json::from_value::<ScripRow>(value) else {
            continue;
        };
        let Some(exchange) = Exchange::parse(&row.exch_seg) else {
            continue;
        };

        match exchange {
            Exchange::NSE | Exchange::BSE => {
                if row.instrumenttype == "AMXIDX" {
                    result.indices.push(parse_index(row, exchange));
                } else if row.instrumenttype.is_empty() {
                    if let Some(equity) = parse_equity(row, exchange) {
                        result.equities.push(equity);
                    }
                }
            }
            Exchange::NFO | Exchange::BFO => match row.instrumenttype.as_str() {
                "FUTIDX" | "FUTSTK" => {
                    if let Some(future) = parse_future(row, exchange) {
                        result.futures.push(future);
                    }
                }
                "OPTIDX" | "OPTSTK" => {
                    if let Some(option) = parse_option(row, exchange) {
                        result.options.push(option);
                    }
                }
                _ => {}
            },
            _ => {}
        }
    }

    Ok(result)
}

fn parse_index(row: ScripRow, exchange: Exchange) -> ParsedIndex {
    let canonical = canonical_index_symbol(&row.symbol);
    ParsedIndex {
        exchange,
        symbol: canonical,
        broker_symbol: row.symbol.clone(),
        segment: "INDICES".to_string(),
        name: (!row.name.is_empty()).then(|| row.name.clone()),
        lot_size: row.lot_size(),
        tick_size: row.tick_size_rupees(),
        broker_token: row.token,
    }
}

/// Equities carry a series suffix on NSE (`SBIN-EQ`); the canonical symbol
/// strips it, the broker symbol keeps it. Bond/MF/SME series are rejected.
fn parse_equity(row: ScripRow, exchange: Exchange) -> Option<ParsedEquity> {
    let symbol = match row.symbol.rsplit_once('-') {
        Some((base, suffix)) => {
            if REJECTED_SUFFIXES.contains(&suffix) {
                return None;
            }
            base.to_string()
        }
        None => row.symbol.clone(),
    };
    Some(ParsedEquity {
        exchange,
        symbol,
        broker_symbol: row.symbol.clone(),
        segment: exchange.as_str().to_string(),
        name: (!row.name.is_empty()).then(|| row.name.clone()),
        lot_size: row.lot_size(),
        tick_size: row.tick_size_rupees(),
        broker_token: row.token,
        isin: None,
    })
}

fn parse_future(row: ScripRow, exchange: Exchange) -> Option<ParsedFuture> {
    let underlying = underlying_exchange(exchange)?;
    let Some(expiry) = row.expiry_date() else {
        warn!("skipping future {} with unparseable expiry '{}'", row.symbol, row.expiry);
        return None;
    };
    Some(ParsedFuture {
        exchange,
        symbol: row.name.clone(),
        broker_symbol: row.symbol.clone(),
        segment: format!("{}-FUT", exchange),
        lot_size: row.lot_size(),
        tick_size: row.tick_size_rupees(),
        broker_token: row.token,
        expiry,
        underlying_exchange: underlying,
    })
}

fn parse_option(row: ScripRow, exchange: Exchange) -> Option<ParsedOption> {
    let underlying = underlying_exchange(exchange)?;
    let Some(expiry) = row.expiry_date() else {
        warn!("skipping option {} with unparseable expiry '{}'", row.symbol, row.expiry);
        return None;
    };
    // The option side is the tradingsymbol suffix (…23000CE).
    let option_type = if row.symbol.ends_with("CE") {
        OptionType::CE
    } else if row.symbol.ends_with("PE") {
        OptionType::PE
    } else {
        warn!("skipping option {} without a CE/PE suffix", row.symbol);
        return None;
    };
    let strike = row.strike_rupees();
    if strike <= 0.0 {
        warn!("skipping option {} with zero strike", row.symbol);
        return None;
    }
    Some(ParsedOption {
        exchange,
        symbol: row.name.clone(),
        broker_symbol: row.symbol.clone(),
        segment: format!("{}-OPT", exchange),
        lot_size: row.lot_size(),
        tick_size: row.tick_size_rupees(),
        broker_token: row.token,
        expiry,
        strike,
        option_type,
        underlying_exchange: underlying,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn fixture_json() -> String {
        json!([
            {"token": "99926000", "symbol": "Nifty 50", "name": "NIFTY",
             "expiry": "", "strike": "-1.000000", "lotsize": "1",
             "instrumenttype": "AMXIDX", "exch_seg": "NSE", "tick_size": ""},
            {"token": "99919000", "symbol": "SENSEX", "name": "SENSEX",
             "expiry": "", "strike": "-1.000000", "lotsize": "1",
             "instrumenttype": "AMXIDX", "exch_seg": "BSE", "tick_size": ""},
            {"token": "3045", "symbol": "SBIN-EQ", "name": "STATE BANK OF INDIA",
             "expiry": "", "strike": "-1.000000", "lotsize": "1",
             "instrumenttype": "", "exch_seg": "NSE", "tick_size": "5.000000"},
            {"token": "522032", "symbol": "SGBAUG28-GS", "name": "SOVEREIGN GOLD BOND",
             "expiry": "", "strike": "-1.000000", "lotsize": "1",
             "instrumenttype": "", "exch_seg": "NSE", "tick_size": "1.000000"},
            {"token": "43567", "symbol": "NIFTY27JUN2028FUT", "name": "NIFTY",
             "expiry": "27JUN2028", "strike": "-1.000000", "lotsize": "50",
             "instrumenttype": "FUTIDX", "exch_seg": "NFO", "tick_size": "5.000000"},
            {"token": "43568", "symbol": "NIFTY26FEB2623000CE", "name": "NIFTY",
             "expiry": "26FEB2026", "strike": "2300000.000000", "lotsize": "50",
             "instrumenttype": "OPTIDX", "exch_seg": "NFO", "tick_size": "5.000000"},
            {"token": "43569", "symbol": "NIFTY26FEB2623000PE", "name": "NIFTY",
             "expiry": "26FEB2026", "strike": "2300000.000000", "lotsize": "50",
             "instrumenttype": "OPTIDX", "exch_seg": "NFO", "tick_size": "5.000000"},
            {"token": "430000", "symbol": "GOLD27JUN2028FUT", "name": "GOLD",
             "expiry": "27JUN2028", "strike": "-1.000000", "lotsize": "100",
             "instrumenttype": "FUTCOM", "exch_seg": "MCX", "tick_size": "100.000000"}
        ])
        .to_string()
    }

    #[test]
    fn classification_counts() {
        let result = parse(&fixture_json()).unwrap();
        assert_eq!(result.indices.len(), 2);
        assert_eq!(result.equities.len(), 1);
        assert_eq!(result.futures.len(), 1);
        assert_eq!(result.options.len(), 2);
    }

    #[test]
    fn index_display_name_maps_to_canonical() {
        let result = parse(&fixture_json()).unwrap();
        let nifty = &result.indices[0];
        assert_eq!(nifty.symbol, "NIFTY");
        assert_eq!(nifty.broker_symbol, "Nifty 50");
        assert_eq!(nifty.exchange, Exchange::NSE);
    }

    #[test]
    fn equity_suffix_is_stripped_but_kept_on_broker_symbol() {
        let result = parse(&fixture_json()).unwrap();
        let sbin = &result.equities[0];
        assert_eq!(sbin.symbol, "SBIN");
        assert_eq!(sbin.broker_symbol, "SBIN-EQ");
        // Tick size converts from paise.
        assert!((sbin.tick_size - 0.05).abs() < 1e-9);
    }

    #[test]
    fn bond_suffix_rows_are_dropped() {
        let result = parse(&fixture_json()).unwrap();
        assert!(!result.equities.iter().any(|e| e.symbol.contains("SGB")));
    }

    #[test]
    fn ddmmmyyyy_expiry_parses() {
        let result = parse(&fixture_json()).unwrap();
        assert_eq!(
            result.futures[0].expiry,
            NaiveDate::from_ymd_opt(2028, 6, 27).unwrap()
        );
    }

    #[test]
    fn strike_converts_from_paise() {
        let result = parse(&fixture_json()).unwrap();
        let ce = result
            .options
            .iter()
            .find(|o| o.option_type == OptionType::CE)
            .unwrap();
        assert!((ce.strike - 23000.0).abs() < 1e-9);
    }

    #[test]
    fn zero_strike_option_is_rejected() {
        let raw = json!([
            {"token": "1", "symbol": "NIFTY26FEB26XXCE", "name": "NIFTY",
             "expiry": "26FEB2026", "strike": "0.000000", "lotsize": "50",
             "instrumenttype": "OPTIDX", "exch_seg": "NFO", "tick_size": "5.000000"}
        ])
        .to_string();
        let result = parse(&raw).unwrap();
        assert!(result.options.is_empty());
        assert!(result.equities.is_empty());
    }

    #[test]
    fn mcx_rows_are_skipped() {
        let result = parse(&fixture_json()).unwrap();
        assert!(!result.futures.iter().any(|f| f.symbol == "GOLD"));
    }
}
