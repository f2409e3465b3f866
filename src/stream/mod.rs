//! Market-data streaming interface.
//!
//! Each broker that supports streaming exposes its WebSocket feed through
//! the uniform [`StreamingClient`] trait: subscribe canonical instruments,
//! receive canonical [`Tick`]s, and let the client own reconnection.
//!
//! Tick delivery is intentionally fire-and-forget: every decoded tick is
//! dispatched to the callback on a detached task so that one slow consumer
//! can never back-pressure the socket read loop. Ticks are *decoded* in
//! wire order, but callback completions may interleave - callers that need
//! inter-tick ordering must serialize on their side.
//!
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::Result;
use crate::instruments::resolver::ResolvedInstrument;
use crate::models::instrument::Instrument;
use crate::models::Tick;

/// The tick callback: an async function invoked once per decoded tick.
///
/// ```ignore
/// let on_tick: OnTick = Arc::new(|tick| {
///     Box::pin(async move {
///         println!("{} ltp={}", tick.instrument, tick.ltp);
///     })
/// });
/// ```
pub type OnTick = Arc<dyn Fn(Tick) -> BoxFuture<'static, ()> + Send + Sync>;

/// A broker's streaming feed, normalized.
#[async_trait]
pub trait StreamingClient: Send + Sync {
    /// Track the given `(instrument, resolved)` pairs and start (or extend)
    /// the feed. The first call installs the tick callback and spawns the
    /// connection loop; later calls add subscriptions to the live socket.
    async fn subscribe(
        &self,
        subscriptions: Vec<(Instrument, ResolvedInstrument)>,
        on_tick: OnTick,
    ) -> Result<()>;

    /// Stop streaming the given instruments and drop them from the ledger.
    async fn unsubscribe(&self, instruments: &[Instrument]) -> Result<()>;

    /// Stop the connection loop, the heartbeat, and close the socket.
    async fn close(&self);
}

/// The subscription ledger every streaming client keeps: which tokens are
/// live, which canonical instrument each belongs to, and which vendor
/// exchange-type code the token must be grouped under when (re)building a
/// subscribe message.
///
/// The ledger is what makes reconnects transparent - on a fresh socket the
/// client replays one subscribe covering everything currently tracked.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionLedger {
    /// token → canonical instrument; the reverse map for inbound ticks.
    instruments: HashMap<String, Instrument>,
    /// token → vendor exchange-type code.
    exchange_types: HashMap<String, u8>,
}

impl SubscriptionLedger {
    /// Track a token. Re-adding an existing token overwrites in place, so
    /// tokens are naturally deduped.
    pub(crate) fn track(&mut self, token: String, instrument: Instrument, exchange_type: u8) {
        self.exchange_types.insert(token.clone(), exchange_type);
        self.instruments.insert(token, instrument);
    }

    /// The tokens currently mapped to any of `instruments`.
    pub(crate) fn tokens_for(&self, instruments: &[Instrument]) -> Vec<String> {
        self.instruments
            .iter()
            .filter(|(_, inst)| instruments.contains(inst))
            .map(|(token, _)| token.clone())
            .collect()
    }

    /// Remove every token mapped to one of `instruments`; returns the
    /// removed tokens so the caller can build the unsubscribe payload.
    pub(crate) fn untrack(&mut self, instruments: &[Instrument]) -> Vec<String> {
        let tokens = self.tokens_for(instruments);
        for token in &tokens {
            self.instruments.remove(token);
            self.exchange_types.remove(token);
        }
        tokens
    }

    /// The canonical instrument for an inbound token, if tracked. Ticks for
    /// unknown tokens are stale leftovers from a prior session and are
    /// dropped by the caller.
    pub(crate) fn instrument(&self, token: &str) -> Option<&Instrument> {
        self.instruments.get(token)
    }

    /// All tracked tokens.
    pub(crate) fn tokens(&self) -> Vec<String> {
        self.instruments.keys().cloned().collect()
    }

    /// Tracked tokens grouped by vendor exchange-type code, the shape the
    /// AngelOne subscribe payload wants.
    pub(crate) fn tokens_by_exchange_type(&self, tokens: &[String]) -> HashMap<u8, Vec<String>> {
        let mut grouped: HashMap<u8, Vec<String>> = HashMap::new();
        for token in tokens {
            let exchange_type = self.exchange_types.get(token).copied().unwrap_or(1);
            grouped.entry(exchange_type).or_default().push(token.clone());
        }
        grouped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::Exchange;

    #[test]
    fn tokens_are_deduped_on_add() {
        let mut ledger = SubscriptionLedger::default();
        let nifty = Instrument::index(Exchange::NSE, "NIFTY");
        ledger.track("256265".into(), nifty.clone(), 1);
        ledger.track("256265".into(), nifty, 1);
        assert_eq!(ledger.tokens().len(), 1);
    }

    #[test]
    fn untrack_returns_removed_tokens() {
        let mut ledger = SubscriptionLedger::default();
        let nifty = Instrument::index(Exchange::NSE, "NIFTY");
        let sbin = Instrument::equity(Exchange::NSE, "SBIN");
        ledger.track("256265".into(), nifty.clone(), 1);
        ledger.track("779521".into(), sbin, 1);

        let removed = ledger.untrack(&[nifty]);
        assert_eq!(removed, vec!["256265".to_string()]);
        assert!(ledger.instrument("256265").is_none());
        assert!(ledger.instrument("779521").is_some());
    }

    #[test]
    fn grouping_by_exchange_type() {
        let mut ledger = SubscriptionLedger::default();
        ledger.track("1".into(), Instrument::equity(Exchange::NSE, "A"), 1);
        ledger.track("2".into(), Instrument::equity(Exchange::NSE, "B"), 1);
        ledger.track("3".into(), Instrument::equity(Exchange::BSE, "C"), 3);

        let grouped = ledger.tokens_by_exchange_type(&ledger.tokens());
        assert_eq!(grouped[&1].len(), 2);
        assert_eq!(grouped[&3], vec!["3".to_string()]);
    }
}
