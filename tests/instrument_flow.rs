//! Instrument store and resolver integration tests: parse → insert →
//! resolve against an in-memory store, plus staleness and refresh-failure
//! policy behavior.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use dalal::adapters::zerodha::parser::parse;
use dalal::error::DalalError;
use dalal::instruments::{InstrumentResolver, InstrumentStore, ParsedInstruments};
use dalal::models::enums::{Exchange, OnStale, OptionType};
use dalal::models::Instrument;

const FIXTURE_CSV: &str = "\
instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange
256265,1001,NIFTY 50,NIFTY 50,0,,,0.05,1,EQ,INDICES,NSE
256266,1002,SENSEX,SENSEX,0,,,0.05,1,EQ,INDICES,BSE
738561,2884,RELIANCE,RELIANCE INDUSTRIES,0,,,0.05,1,EQ,NSE,NSE
1280641,5002,SBIN,STATE BANK OF INDIA,0,,,0.05,1,EQ,NSE,NSE
1280642,5003,RELIANCE,RELIANCE INDUSTRIES,0,,,0.05,1,EQ,BSE,BSE
1000001,40001,NIFTY26FEBFUT,NIFTY,0,2026-02-26,0,0.05,50,FUT,NFO-FUT,NFO
1000002,40002,RELIANCE26FEBFUT,RELIANCE,0,2026-02-26,0,0.05,250,FUT,NFO-FUT,NFO
1000003,40003,SENSEX26FEBFUT,SENSEX,0,2026-02-26,0,0.05,10,FUT,BFO-FUT,BFO
1000004,40004,NIFTY26FEB23000CE,NIFTY,0,2026-02-26,23000.0,0.05,50,CE,NFO-OPT,NFO
1000005,40005,NIFTY26FEB23000PE,NIFTY,0,2026-02-26,23000.0,0.05,50,PE,NFO-OPT,NFO
1000006,40006,SENSEX26FEB81000CE,SENSEX,0,2026-02-26,81000.0,0.05,10,CE,BFO-OPT,BFO
1000007,40007,RELIANCE26FEB1300CE,RELIANCE,0,2026-02-26,1300.0,0.05,250,CE,NFO-OPT,NFO
";

fn expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 26).unwrap()
}

async fn populated_store() -> InstrumentStore {
    let store = InstrumentStore::open_in_memory("zerodha", OnStale::Fail).unwrap();
    store
        .refresh(|| async { parse(FIXTURE_CSV) })
        .await
        .unwrap();
    store
}

async fn count(store: &InstrumentStore, table: &str) -> i64 {
    let conn = store.connection();
    let conn = conn.lock().await;
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })
    .unwrap()
}

#[tokio::test]
async fn refresh_inserts_the_fixture_counts() {
    let store = populated_store().await;
    assert_eq!(count(&store, "instruments").await, 12);
    // Indices live in the equities sub-table too (isin null).
    assert_eq!(count(&store, "equities").await, 5);
    assert_eq!(count(&store, "futures").await, 3);
    assert_eq!(count(&store, "options").await, 4);
    assert_eq!(count(&store, "broker_tokens").await, 12);
}

#[tokio::test]
async fn every_derivative_references_an_existing_underlying() {
    let store = populated_store().await;
    let conn = store.connection();
    let conn = conn.lock().await;
    for table in ["futures", "options"] {
        let orphans: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} d
                     LEFT JOIN instruments u ON u.id = d.underlying_id
                     WHERE u.id IS NULL",
                    table
                ),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(orphans, 0, "{} has orphaned underlyings", table);
    }
}

#[tokio::test]
async fn resolve_index_uses_canonical_symbol() {
    let store = populated_store().await;
    let resolver = InstrumentResolver::new(store.connection(), "zerodha");

    let resolved = resolver
        .resolve(&Instrument::index(Exchange::NSE, "NIFTY"))
        .await
        .unwrap();
    assert_eq!(resolved.token, "256265");
    assert_eq!(resolved.broker_symbol, "NIFTY 50");
    assert_eq!(resolved.exchange, Exchange::NSE);

    let sensex = resolver
        .resolve(&Instrument::index(Exchange::BSE, "SENSEX"))
        .await
        .unwrap();
    assert_eq!(sensex.token, "256266");
}

#[tokio::test]
async fn resolve_equity_disambiguates_by_exchange() {
    let store = populated_store().await;
    let resolver = InstrumentResolver::new(store.connection(), "zerodha");

    let nse = resolver
        .resolve(&Instrument::equity(Exchange::NSE, "RELIANCE"))
        .await
        .unwrap();
    assert_eq!(nse.token, "738561");
    assert_eq!(nse.exchange, Exchange::NSE);

    let bse = resolver
        .resolve(&Instrument::equity(Exchange::BSE, "RELIANCE"))
        .await
        .unwrap();
    assert_eq!(bse.token, "1280642");
}

#[tokio::test]
async fn resolve_future_routes_through_the_underlying() {
    let store = populated_store().await;
    let resolver = InstrumentResolver::new(store.connection(), "zerodha");

    // The user addresses the contract by the cash venue (NSE); the
    // resolved venue is the derivative exchange.
    let nifty_fut = resolver
        .resolve(&Instrument::future(Exchange::NSE, "NIFTY", expiry()))
        .await
        .unwrap();
    assert_eq!(nifty_fut.token, "1000001");
    assert_eq!(nifty_fut.exchange, Exchange::NFO);
    assert_eq!(nifty_fut.broker_symbol, "NIFTY26FEBFUT");

    let sensex_fut = resolver
        .resolve(&Instrument::future(Exchange::BSE, "SENSEX", expiry()))
        .await
        .unwrap();
    assert_eq!(sensex_fut.token, "1000003");
    assert_eq!(sensex_fut.exchange, Exchange::BFO);
}

#[tokio::test]
async fn resolve_option_matches_strike_and_type() {
    let store = populated_store().await;
    let resolver = InstrumentResolver::new(store.connection(), "zerodha");

    let ce = resolver
        .resolve(&Instrument::option(
            Exchange::NSE,
            "NIFTY",
            expiry(),
            23000.0,
            OptionType::CE,
        ))
        .await
        .unwrap();
    assert_eq!(ce.token, "1000004");
    assert_eq!(ce.exchange, Exchange::NFO);

    let pe = resolver
        .resolve(&Instrument::option(
            Exchange::NSE,
            "NIFTY",
            expiry(),
            23000.0,
            OptionType::PE,
        ))
        .await
        .unwrap();
    assert_eq!(pe.token, "1000005");
}

#[tokio::test]
async fn resolve_miss_raises_instrument_not_found() {
    let store = populated_store().await;
    let resolver = InstrumentResolver::new(store.connection(), "zerodha");

    let err = resolver
        .resolve(&Instrument::equity(Exchange::NSE, "NONEXISTENT"))
        .await
        .unwrap_err();
    assert!(matches!(err, DalalError::InstrumentNotFound { .. }));

    // Wrong strike is a miss, not a near-match.
    let err = resolver
        .resolve(&Instrument::option(
            Exchange::NSE,
            "NIFTY",
            expiry(),
            99999.0,
            OptionType::CE,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, DalalError::InstrumentNotFound { .. }));
}

#[tokio::test]
async fn resolution_is_deterministic_and_cached() {
    let store = populated_store().await;
    let resolver = InstrumentResolver::new(store.connection(), "zerodha");
    let sbin = Instrument::equity(Exchange::NSE, "SBIN");

    let first = resolver.resolve(&sbin).await.unwrap();
    assert_eq!(first.token, "1280641");
    let second = resolver.resolve(&sbin).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn refresh_is_idempotent_modulo_primary_keys() {
    let store = populated_store().await;
    store
        .refresh(|| async { parse(FIXTURE_CSV) })
        .await
        .unwrap();
    assert_eq!(count(&store, "instruments").await, 12);
    assert_eq!(count(&store, "broker_tokens").await, 12);
}

#[tokio::test]
async fn ensure_fresh_skips_fetch_when_current() {
    let store = InstrumentStore::open_in_memory("zerodha", OnStale::Fail).unwrap();
    assert!(store.is_stale().await.unwrap());

    let calls = AtomicUsize::new(0);
    store
        .ensure_fresh(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { parse(FIXTURE_CSV) }
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!store.is_stale().await.unwrap());

    // A second ensure_fresh on the same day must not refetch.
    store
        .ensure_fresh(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { parse(FIXTURE_CSV) }
        })
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_dump_yields_empty_tables_and_a_valid_stamp() {
    let store = InstrumentStore::open_in_memory("zerodha", OnStale::Fail).unwrap();
    store
        .refresh(|| async { Ok(ParsedInstruments::default()) })
        .await
        .unwrap();
    assert_eq!(count(&store, "instruments").await, 0);
    assert!(store.last_updated().await.unwrap().is_some());
    assert!(!store.is_stale().await.unwrap());
}

#[tokio::test]
async fn derivative_with_missing_underlying_is_skipped_not_fatal() {
    // TCS never appears as an equity, so its future cannot resolve an
    // underlying id.
    let csv = "\
instrument_token,exchange_token,tradingsymbol,name,last_price,expiry,strike,tick_size,lot_size,instrument_type,segment,exchange
738561,2884,RELIANCE,RELIANCE INDUSTRIES,0,,,0.05,1,EQ,NSE,NSE
1000010,40010,TCS26FEBFUT,TCS,0,2026-02-26,0,0.05,175,FUT,NFO-FUT,NFO
";
    let store = InstrumentStore::open_in_memory("zerodha", OnStale::Fail).unwrap();
    store.refresh(|| async { parse(csv) }).await.unwrap();
    assert_eq!(count(&store, "instruments").await, 1);
    assert_eq!(count(&store, "futures").await, 0);
}

#[tokio::test]
async fn failed_refresh_propagates_under_fail_policy() {
    let store = InstrumentStore::open_in_memory("zerodha", OnStale::Fail).unwrap();
    let err = store
        .ensure_fresh(|| async { Err(DalalError::Internal("download failed".into())) })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("download failed"));
}

#[tokio::test]
async fn failed_refresh_without_prior_data_fails_even_under_warn() {
    let store = InstrumentStore::open_in_memory("zerodha", OnStale::Warn).unwrap();
    let result = store
        .ensure_fresh(|| async { Err(DalalError::Internal("download failed".into())) })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn failed_refresh_keeps_previous_state_intact() {
    let store = populated_store().await;
    let before = count(&store, "instruments").await;

    // The fetch itself fails before any table is touched.
    let result = store
        .refresh(|| async { Err(DalalError::Internal("vendor is down".into())) })
        .await;
    assert!(result.is_err());
    assert_eq!(count(&store, "instruments").await, before);
}
