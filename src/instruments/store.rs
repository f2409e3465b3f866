//! The persistent instrument store.
//!
//! One SQLite database holds the normalized instrument master for a broker:
//! a flat `instruments` table plus one sub-table per segment kind, wired
//! together with foreign keys so a derivative row can never outlive its
//! underlying. The store refreshes itself once per trading day - the same
//! rhythm on which the vendors regenerate their dumps and invalidate
//! sessions - and the whole refresh is a single transaction: a crash
//! mid-refresh leaves yesterday's data intact.
//!
//! The connection is shared behind an async mutex; all access is
//! sequential, which is exactly what SQLite wants from a single-process
//! embedded store.
//!
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{DalalError, Result};
use crate::instruments::ParsedInstruments;
use crate::models::enums::OnStale;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS instruments (
    id        INTEGER PRIMARY KEY,
    exchange  TEXT NOT NULL,
    symbol    TEXT NOT NULL,
    segment   TEXT NOT NULL,
    name      TEXT,
    lot_size  INTEGER,
    tick_size REAL
);

CREATE TABLE IF NOT EXISTS equities (
    instrument_id INTEGER PRIMARY KEY REFERENCES instruments(id),
    isin          TEXT
);

CREATE TABLE IF NOT EXISTS futures (
    instrument_id INTEGER PRIMARY KEY REFERENCES instruments(id),
    underlying_id INTEGER NOT NULL REFERENCES instruments(id),
    expiry        DATE NOT NULL
);

CREATE TABLE IF NOT EXISTS options (
    instrument_id INTEGER PRIMARY KEY REFERENCES instruments(id),
    underlying_id INTEGER NOT NULL REFERENCES instruments(id),
    expiry        DATE NOT NULL,
    strike        REAL NOT NULL,
    option_type   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS broker_tokens (
    instrument_id INTEGER NOT NULL REFERENCES instruments(id),
    broker_id     TEXT NOT NULL,
    token         TEXT NOT NULL,
    broker_symbol TEXT NOT NULL,
    PRIMARY KEY (instrument_id, broker_id)
);

CREATE TABLE IF NOT EXISTS _meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_instruments ON instruments(exchange, symbol);
CREATE INDEX IF NOT EXISTS idx_futures    ON futures(underlying_id, expiry);
CREATE INDEX IF NOT EXISTS idx_options    ON options(underlying_id, expiry, strike, option_type);
";

/// The relational instrument store for one broker.
pub struct InstrumentStore {
    conn: Arc<Mutex<Connection>>,
    broker_id: String,
    on_stale: OnStale,
}

impl InstrumentStore {
    /// Open (or create) the store at `path`, applying the schema
    /// idempotently. The parent directory is created if needed.
    pub fn open(path: impl AsRef<Path>, broker_id: impl Into<String>, on_stale: OnStale) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, broker_id, on_stale)
    }

    /// Open an in-memory store. Used by tests and short-lived tools.
    pub fn open_in_memory(broker_id: impl Into<String>, on_stale: OnStale) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, broker_id, on_stale)
    }

    fn from_connection(
        conn: Connection,
        broker_id: impl Into<String>,
        on_stale: OnStale,
    ) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            broker_id: broker_id.into(),
            on_stale,
        })
    }

    /// The shared connection handle, for the resolver and for ad-hoc reads.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Ensure the store holds today's instrument master, fetching and
    /// rebuilding if stale. This is the entry point called at client init.
    pub async fn init<F, Fut>(&self, fetch: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ParsedInstruments>>,
    {
        self.ensure_fresh(fetch).await
    }

    /// Refresh if stale; on refresh failure apply the configured
    /// [`OnStale`] policy.
    pub async fn ensure_fresh<F, Fut>(&self, fetch: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ParsedInstruments>>,
    {
        if !self.is_stale().await? {
            return Ok(());
        }
        match self.refresh(fetch).await {
            Ok(()) => Ok(()),
            Err(e) => match self.on_stale {
                OnStale::Fail => Err(e),
                OnStale::Warn => {
                    if self.instrument_count().await? > 0 {
                        warn!(
                            "[{}] instrument refresh failed, using stale data: {}",
                            self.broker_id, e
                        );
                        Ok(())
                    } else {
                        Err(DalalError::Internal(format!(
                            "instrument refresh failed and no prior data exists for {}: {}",
                            self.broker_id, e
                        )))
                    }
                }
            },
        }
    }

    /// Fetch a fresh dump and rebuild every table atomically.
    ///
    /// The fetch runs *before* the connection lock is taken so a slow
    /// download never blocks concurrent readers of yesterday's data.
    pub async fn refresh<F, Fut>(&self, fetch: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ParsedInstruments>>,
    {
        info!("[{}] refreshing instrument master", self.broker_id);
        let parsed = fetch().await?;
        let today = Local::now().date_naive().to_string();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        // Children before parents, for the FK constraints.
        for table in ["broker_tokens", "futures", "options", "equities", "instruments"] {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }

        insert_parsed(&tx, &self.broker_id, &parsed)?;

        tx.execute(
            "INSERT OR REPLACE INTO _meta(key, value) VALUES ('last_updated', ?1)",
            [&today],
        )?;
        tx.commit()?;

        info!(
            "[{}] instrument refresh complete: {} indices, {} equities, {} futures, {} options",
            self.broker_id,
            parsed.indices.len(),
            parsed.equities.len(),
            parsed.futures.len(),
            parsed.options.len()
        );
        Ok(())
    }

    /// Stale iff `last_updated` is absent or not today's local date.
    pub async fn is_stale(&self) -> Result<bool> {
        match self.last_updated().await? {
            Some(date) => Ok(date != Local::now().date_naive().to_string()),
            None => Ok(true),
        }
    }

    /// The ISO date of the last completed refresh, if any.
    pub async fn last_updated(&self) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached("SELECT value FROM _meta WHERE key = 'last_updated'")?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    async fn instrument_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count = conn.query_row("SELECT COUNT(*) FROM instruments", [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Insert a parsed dump in dependency order: indices, then equities, then -
/// with an in-memory `(exchange, symbol) → id` lookup over what was just
/// inserted - futures and options. Derivative rows whose underlying is
/// missing from the dump are logged and skipped: that is a vendor-data
/// inconsistency, not a caller error.
fn insert_parsed(
    tx: &rusqlite::Transaction<'_>,
    broker_id: &str,
    parsed: &ParsedInstruments,
) -> Result<()> {
    let mut lookup: HashMap<(String, String), i64> = HashMap::new();

    for index in &parsed.indices {
        let id = insert_instrument(
            tx,
            index.exchange.as_str(),
            &index.symbol,
            &index.segment,
            index.name.as_deref(),
            index.lot_size,
            index.tick_size,
        )?;
        tx.execute(
            "INSERT INTO equities(instrument_id, isin) VALUES (?1, NULL)",
            [id],
        )?;
        insert_broker_token(tx, id, broker_id, &index.broker_token, &index.broker_symbol)?;
        lookup.insert((index.exchange.as_str().to_string(), index.symbol.clone()), id);
    }

    for equity in &parsed.equities {
        let id = insert_instrument(
            tx,
            equity.exchange.as_str(),
            &equity.symbol,
            &equity.segment,
            equity.name.as_deref(),
            equity.lot_size,
            equity.tick_size,
        )?;
        tx.execute(
            "INSERT INTO equities(instrument_id, isin) VALUES (?1, ?2)",
            rusqlite::params![id, equity.isin],
        )?;
        insert_broker_token(tx, id, broker_id, &equity.broker_token, &equity.broker_symbol)?;
        lookup.insert((equity.exchange.as_str().to_string(), equity.symbol.clone()), id);
    }

    for future in &parsed.futures {
        let key = (
            future.underlying_exchange.as_str().to_string(),
            future.symbol.clone(),
        );
        let Some(&underlying_id) = lookup.get(&key) else {
            warn!(
                "skipping future {} - no underlying {}:{} in dump",
                future.broker_symbol, future.underlying_exchange, future.symbol
            );
            continue;
        };
        let id = insert_instrument(
            tx,
            future.exchange.as_str(),
            &future.symbol,
            &future.segment,
            None,
            future.lot_size,
            future.tick_size,
        )?;
        tx.execute(
            "INSERT INTO futures(instrument_id, underlying_id, expiry) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, underlying_id, future.expiry.to_string()],
        )?;
        insert_broker_token(tx, id, broker_id, &future.broker_token, &future.broker_symbol)?;
    }

    for option in &parsed.options {
        let key = (
            option.underlying_exchange.as_str().to_string(),
            option.symbol.clone(),
        );
        let Some(&underlying_id) = lookup.get(&key) else {
            warn!(
                "skipping option {} - no underlying {}:{} in dump",
                option.broker_symbol, option.underlying_exchange, option.symbol
            );
            continue;
        };
        let id = insert_instrument(
            tx,
            option.exchange.as_str(),
            &option.symbol,
            &option.segment,
            None,
            option.lot_size,
            option.tick_size,
        )?;
        tx.execute(
            "INSERT INTO options(instrument_id, underlying_id, expiry, strike, option_type) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                id,
                underlying_id,
                option.expiry.to_string(),
                option.strike,
                option.option_type.as_str()
            ],
        )?;
        insert_broker_token(tx, id, broker_id, &option.broker_token, &option.broker_symbol)?;
    }

    Ok(())
}

fn insert_instrument(
    tx: &rusqlite::Transaction<'_>,
    exchange: &str,
    symbol: &str,
    segment: &str,
    name: Option<&str>,
    lot_size: i64,
    tick_size: f64,
) -> Result<i64> {
    tx.execute(
        "INSERT INTO instruments(exchange, symbol, segment, name, lot_size, tick_size) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![exchange, symbol, segment, name, lot_size, tick_size],
    )?;
    Ok(tx.last_insert_rowid())
}

fn insert_broker_token(
    tx: &rusqlite::Transaction<'_>,
    instrument_id: i64,
    broker_id: &str,
    token: &str,
    broker_symbol: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO broker_tokens(instrument_id, broker_id, token, broker_symbol) \
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![instrument_id, broker_id, token, broker_symbol],
    )?;
    Ok(())
}
