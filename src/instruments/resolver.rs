//! Canonical-instrument resolution.
//!
//! The resolver translates a user-facing [`Instrument`] into the triple a
//! broker actually understands: the opaque token, the broker's own
//! tradingsymbol, and the venue the order must be routed to (NFO/BFO for
//! derivatives even though the user addressed the contract by its cash
//! venue).
//!
//! Resolutions are memoized for the life of the resolver. The cache is safe
//! precisely because a resolver never outlives one instrument refresh -
//! refresh reassigns primary keys, so the client constructs a fresh
//! resolver afterwards.
//!
use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::{DalalError, Result};
use crate::models::enums::Exchange;
use crate::models::instrument::Instrument;

/// The broker-side identity of a resolved instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstrument {
    /// The vendor's opaque wire identifier.
    pub token: String,
    /// The vendor's tradingsymbol for order payloads.
    pub broker_symbol: String,
    /// The venue orders are routed to (NSE/BSE cash, NFO/BFO derivatives).
    pub exchange: Exchange,
}

/// Resolves canonical instruments against a populated [`InstrumentStore`]
/// connection, with per-session memoization.
///
/// [`InstrumentStore`]: crate::instruments::store::InstrumentStore
pub struct InstrumentResolver {
    conn: Arc<Mutex<Connection>>,
    broker_id: String,
    cache: Mutex<HashMap<Instrument, ResolvedInstrument>>,
}

impl InstrumentResolver {
    pub fn new(conn: Arc<Mutex<Connection>>, broker_id: impl Into<String>) -> Self {
        Self {
            conn,
            broker_id: broker_id.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an instrument to its broker token, symbol and routing venue.
    ///
    /// Fails with [`DalalError::InstrumentNotFound`] on a miss - tokens are
    /// never invented.
    pub async fn resolve(&self, instrument: &Instrument) -> Result<ResolvedInstrument> {
        if let Some(hit) = self.cache.lock().await.get(instrument) {
            return Ok(hit.clone());
        }
        let resolved = self.resolve_uncached(instrument).await?;
        self.cache
            .lock()
            .await
            .insert(instrument.clone(), resolved.clone());
        Ok(resolved)
    }

    async fn resolve_uncached(&self, instrument: &Instrument) -> Result<ResolvedInstrument> {
        match instrument {
            Instrument::Index { exchange, symbol } => {
                self.resolve_cash(*exchange, symbol, true)
                    .await?
                    .ok_or_else(|| {
                        DalalError::not_found(format!("No index found: {}:{}", exchange, symbol))
                    })
            }
            Instrument::Equity { exchange, symbol } => {
                self.resolve_cash(*exchange, symbol, false)
                    .await?
                    .ok_or_else(|| {
                        DalalError::not_found(format!("No equity found: {}:{}", exchange, symbol))
                    })
            }
            Instrument::Future {
                exchange,
                symbol,
                expiry,
            } => self
                .query_one(
                    "SELECT bt.token, bt.broker_symbol, i.exchange
                     FROM instruments i
                     JOIN futures f ON f.instrument_id = i.id
                     JOIN instruments u ON u.id = f.underlying_id
                     JOIN broker_tokens bt ON bt.instrument_id = i.id
                     WHERE u.exchange = ?1 AND u.symbol = ?2 AND f.expiry = ?3
                       AND bt.broker_id = ?4",
                    rusqlite::params![
                        exchange.as_str(),
                        symbol,
                        expiry.to_string(),
                        self.broker_id
                    ],
                )
                .await?
                .ok_or_else(|| {
                    DalalError::not_found(format!(
                        "No future found: {}:{} {}",
                        exchange, symbol, expiry
                    ))
                }),
            Instrument::Option {
                exchange,
                symbol,
                expiry,
                strike_paise,
                option_type,
            } => self
                .query_one(
                    "SELECT bt.token, bt.broker_symbol, i.exchange
                     FROM instruments i
                     JOIN options o ON o.instrument_id = i.id
                     JOIN instruments u ON u.id = o.underlying_id
                     JOIN broker_tokens bt ON bt.instrument_id = i.id
                     WHERE u.exchange = ?1 AND u.symbol = ?2 AND o.expiry = ?3
                       AND o.strike = ?4 AND o.option_type = ?5 AND bt.broker_id = ?6",
                    rusqlite::params![
                        exchange.as_str(),
                        symbol,
                        expiry.to_string(),
                        *strike_paise as f64 / 100.0,
                        option_type.as_str(),
                        self.broker_id
                    ],
                )
                .await?
                .ok_or_else(|| {
                    DalalError::not_found(format!(
                        "No option found: {}:{} {} {}{}",
                        exchange,
                        symbol,
                        expiry,
                        *strike_paise as f64 / 100.0,
                        option_type
                    ))
                }),
        }
    }

    async fn resolve_cash(
        &self,
        exchange: Exchange,
        symbol: &str,
        index: bool,
    ) -> Result<Option<ResolvedInstrument>> {
        let segment_clause = if index {
            "i.segment = 'INDICES'"
        } else {
            "i.segment != 'INDICES'"
        };
        let query = format!(
            "SELECT bt.token, bt.broker_symbol, i.exchange
             FROM instruments i
             JOIN equities e ON e.instrument_id = i.id
             JOIN broker_tokens bt ON bt.instrument_id = i.id
             WHERE i.exchange = ?1 AND i.symbol = ?2 AND {} AND bt.broker_id = ?3",
            segment_clause
        );
        self.query_one(
            &query,
            rusqlite::params![exchange.as_str(), symbol, self.broker_id],
        )
        .await
    }

    async fn query_one(
        &self,
        query: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<ResolvedInstrument>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(query)?;
        let row = stmt
            .query_row(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;
        match row {
            Some((token, broker_symbol, exchange)) => {
                let exchange = Exchange::parse(&exchange).ok_or_else(|| {
                    DalalError::Internal(format!("unexpected exchange in store: {}", exchange))
                })?;
                Ok(Some(ResolvedInstrument {
                    token,
                    broker_symbol,
                    exchange,
                }))
            }
            None => Ok(None),
        }
    }
}
