//! Kite Connect WebSocket ticker.
//!
//! Kite streams market data over `wss://ws.kite.trade` as big-endian binary
//! frames: a two-byte packet count, then length-prefixed quote packets.
//! Subscription management is JSON (`{"a": "subscribe", "v": [...]}`),
//! with a separate `mode` message selecting the packet depth per token.
//!
//! The connection loop owns reconnect-and-resubscribe: every tracked token
//! is replayed onto a fresh socket, with exponential backoff between
//! attempts (2s doubling to a 60s ceiling, reset after a clean session).
//!
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tungstenite::Message;

use crate::adapters::zerodha::auth::ZerodhaAuth;
use crate::error::Result;
use crate::instruments::resolver::ResolvedInstrument;
use crate::models::instrument::Instrument;
use crate::models::Tick;
use crate::stream::{OnTick, StreamingClient, SubscriptionLedger};

/// Default WebSocket API base url.
const KITE_WSS_BASE: &str = "wss://ws.kite.trade";

const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Minimum packet sizes per streaming mode.
const QUOTE_LEN: usize = 44;
const FULL_LEN: usize = 184;

fn reconnect_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(2),
        multiplier: 2.0,
        max_interval: Duration::from_secs(60),
        max_elapsed_time: None,
        randomization_factor: 0.0,
        ..ExponentialBackoff::default()
    }
}

#[derive(Default)]
struct TickerState {
    ledger: Mutex<SubscriptionLedger>,
    on_tick: Mutex<Option<OnTick>>,
    /// Writer into the live socket, when connected.
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    closed: AtomicBool,
}

/// The Kite streaming client.
pub(crate) struct KiteTicker {
    auth: Arc<ZerodhaAuth>,
    ws_base: String,
    state: Arc<TickerState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KiteTicker {
    pub(crate) fn new(auth: Arc<ZerodhaAuth>, ws_base: Option<String>) -> Self {
        Self {
            auth,
            ws_base: ws_base.unwrap_or_else(|| KITE_WSS_BASE.to_string()),
            state: Arc::new(TickerState::default()),
            task: Mutex::new(None),
        }
    }

    fn subscribe_messages(tokens: &[String]) -> Vec<Message> {
        let numeric = numeric_tokens(tokens);
        if numeric.is_empty() {
            return Vec::new();
        }
        vec![
            Message::Text(json!({"a": "subscribe", "v": numeric}).to_string()),
            Message::Text(json!({"a": "mode", "v": ["full", numeric]}).to_string()),
        ]
    }

    fn unsubscribe_message(tokens: &[String]) -> Option<Message> {
        let numeric = numeric_tokens(tokens);
        if numeric.is_empty() {
            return None;
        }
        Some(Message::Text(
            json!({"a": "unsubscribe", "v": numeric}).to_string(),
        ))
    }

    async fn send_outgoing(&self, messages: Vec<Message>) {
        let outgoing = self.state.outgoing.lock().await;
        if let Some(sender) = outgoing.as_ref() {
            for message in messages {
                let _ = sender.send(message);
            }
        }
    }

    async fn run(auth: Arc<ZerodhaAuth>, ws_base: String, state: Arc<TickerState>) {
        let mut backoff = reconnect_policy();
        while !state.closed.load(Ordering::SeqCst) {
            match Self::connect_and_stream(&auth, &ws_base, &state).await {
                Ok(()) => backoff.reset(),
                Err(e) => warn!("Kite ticker error: {}", e),
            }
            if state.closed.load(Ordering::SeqCst) {
                break;
            }
            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| Duration::from_secs(60));
            info!("Kite ticker reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_stream(
        auth: &ZerodhaAuth,
        ws_base: &str,
        state: &Arc<TickerState>,
    ) -> Result<()> {
        let url = format!(
            "{}?api_key={}&access_token={}",
            ws_base,
            auth.api_key(),
            auth.access_token().await?
        );
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!("Kite ticker connected");
        let (mut sink, mut stream) = ws_stream.split();

        // Resubscribe everything currently tracked.
        let tokens = state.ledger.lock().await.tokens();
        for message in Self::subscribe_messages(&tokens) {
            sink.send(message).await?;
        }

        let (sender, mut receiver) = mpsc::unbounded_channel();
        *state.outgoing.lock().await = Some(sender);

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ping.tick().await; // the first tick fires immediately

        let result = loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Binary(frame))) => {
                        Self::dispatch_frame(&frame, state).await;
                    }
                    // Text frames carry order postbacks and error notices;
                    // not part of the tick feed.
                    Some(Ok(Message::Text(text))) => debug!("Kite ticker text frame: {}", text),
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(e.into()),
                },
                Some(message) = receiver.recv() => {
                    sink.send(message).await?;
                }
                _ = ping.tick() => {
                    sink.send(Message::Ping(Vec::new())).await?;
                }
            }
        };

        *state.outgoing.lock().await = None;
        info!("Kite ticker disconnected");
        result
    }

    async fn dispatch_frame(frame: &[u8], state: &Arc<TickerState>) {
        let packets = decode_frame(frame);
        if packets.is_empty() {
            return;
        }
        let callback = state.on_tick.lock().await.clone();
        let Some(callback) = callback else { return };
        let ledger = state.ledger.lock().await;
        for packet in packets {
            // Ticks for untracked tokens are stale leftovers from a prior
            // session.
            let Some(instrument) = ledger.instrument(&packet.token.to_string()) else {
                continue;
            };
            let tick = Tick {
                instrument: instrument.clone(),
                ltp: packet.ltp,
                volume: packet.volume,
                oi: packet.oi,
                bid: packet.bid,
                ask: packet.ask,
                timestamp: packet.timestamp,
            };
            // Fire-and-forget so a slow consumer cannot stall the socket.
            tokio::spawn(callback(tick));
        }
    }
}

#[async_trait]
impl StreamingClient for KiteTicker {
    async fn subscribe(
        &self,
        subscriptions: Vec<(Instrument, ResolvedInstrument)>,
        on_tick: OnTick,
    ) -> Result<()> {
        *self.state.on_tick.lock().await = Some(on_tick);

        let mut new_tokens = Vec::with_capacity(subscriptions.len());
        {
            let mut ledger = self.state.ledger.lock().await;
            for (instrument, resolved) in subscriptions {
                ledger.track(resolved.token.clone(), instrument, 0);
                new_tokens.push(resolved.token);
            }
        }

        let mut task = self.task.lock().await;
        let running = task.as_ref().map(|t| !t.is_finished()).unwrap_or(false);
        if running {
            self.send_outgoing(Self::subscribe_messages(&new_tokens)).await;
        } else {
            self.state.closed.store(false, Ordering::SeqCst);
            *task = Some(tokio::spawn(Self::run(
                Arc::clone(&self.auth),
                self.ws_base.clone(),
                Arc::clone(&self.state),
            )));
        }
        Ok(())
    }

    async fn unsubscribe(&self, instruments: &[Instrument]) -> Result<()> {
        let tokens = self.state.ledger.lock().await.untrack(instruments);
        if let Some(message) = Self::unsubscribe_message(&tokens) {
            self.send_outgoing(vec![message]).await;
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        *self.state.outgoing.lock().await = None;
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

fn numeric_tokens(tokens: &[String]) -> Vec<u32> {
    tokens.iter().filter_map(|t| t.parse::<u32>().ok()).collect()
}

#[derive(Debug, PartialEq)]
struct RawTick {
    token: u32,
    ltp: f64,
    volume: Option<i64>,
    oi: Option<i64>,
    bid: Option<f64>,
    ask: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn be_i32(data: &[u8], offset: usize) -> i32 {
    be_u32(data, offset) as i32
}

/// Split one binary frame into its quote packets and decode each.
///
/// Frame layout: `count(u16) | [len(u16) | packet]*`. One-byte frames are
/// the server heartbeat and decode to nothing.
fn decode_frame(frame: &[u8]) -> Vec<RawTick> {
    let mut ticks = Vec::new();
    if frame.len() < 2 {
        return ticks;
    }
    let count = be_u16(frame, 0) as usize;
    let mut offset = 2;
    for _ in 0..count {
        if offset + 2 > frame.len() {
            break;
        }
        let len = be_u16(frame, offset) as usize;
        offset += 2;
        if offset + len > frame.len() {
            break;
        }
        if let Some(tick) = decode_packet(&frame[offset..offset + len]) {
            ticks.push(tick);
        }
        offset += len;
    }
    ticks
}

/// Decode one quote packet (big-endian, prices in paise).
///
/// LTP mode is 8 bytes; quote mode (44 bytes) adds volume and OHLC; full
/// mode (184 bytes) adds OI, the exchange timestamp and five levels of
/// depth per side, from which the top-of-book bid/ask are taken.
fn decode_packet(packet: &[u8]) -> Option<RawTick> {
    if packet.len() < 8 {
        return None;
    }
    let token = be_u32(packet, 0);
    let ltp = be_i32(packet, 4) as f64 / 100.0;

    let mut tick = RawTick {
        token,
        ltp,
        volume: None,
        oi: None,
        bid: None,
        ask: None,
        timestamp: None,
    };

    if packet.len() >= QUOTE_LEN {
        tick.volume = Some(be_i32(packet, 16) as i64);
    }

    if packet.len() >= FULL_LEN {
        tick.oi = Some(be_i32(packet, 48) as i64);
        let ts = be_u32(packet, 60);
        if ts > 0 {
            tick.timestamp = DateTime::from_timestamp(ts as i64, 0);
        }
        // Depth: ten 12-byte entries from offset 64 - first five buy,
        // last five sell. Top of book is entry 0 and entry 5.
        let bid = be_i32(packet, 64 + 4) as f64 / 100.0;
        if bid > 0.0 {
            tick.bid = Some(bid);
        }
        let ask = be_i32(packet, 64 + 5 * 12 + 4) as f64 / 100.0;
        if ask > 0.0 {
            tick.ask = Some(ask);
        }
    }

    Some(tick)
}
