//! AngelOne SmartStream WebSocket client.
//!
//! SmartStream frames are little-endian binary with a fixed 51-byte header
//! (`mode`, `exchange type`, a 25-byte null-padded token, sequence,
//! timestamp, LTP), extended by the QUOTE and SNAP_QUOTE modes. All prices
//! are in paise. Subscription management is JSON, with tokens grouped by
//! the vendor's integer exchange-type codes.
//!
//! The connection loop owns reconnect-and-resubscribe with the same 2s→60s
//! backoff schedule the Kite ticker uses, plus the vendor-specific text
//! `"ping"` heartbeat every ten seconds.
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
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::Message;

use crate::adapters::angelone::auth::AngelOneAuth;
use crate::error::{DalalError, Result};
use crate::instruments::resolver::ResolvedInstrument;
use crate::models::enums::Exchange;
use crate::models::instrument::Instrument;
use crate::models::Tick;
use crate::stream::{OnTick, StreamingClient, SubscriptionLedger};

/// Default SmartStream url.
const SMARTSTREAM_URL: &str = "wss://smartapisocket.angelone.in/smart-stream";

const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Subscription modes.
const MODE_QUOTE: u8 = 2;
const MODE_SNAP_QUOTE: u8 = 3;

/// Minimum packet sizes per mode.
const LTP_MIN: usize = 51;
const QUOTE_MIN: usize = 123;
const SNAP_QUOTE_MIN: usize = 347;

/// Exchange → SmartStream exchange-type code.
fn exchange_type(exchange: Exchange) -> u8 {
    match exchange {
        Exchange::NSE => 1,
        Exchange::NFO => 2,
        Exchange::BSE => 3,
        Exchange::BFO => 4,
        Exchange::MCX => 5,
        Exchange::CDS => 13,
    }
}

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
struct StreamState {
    ledger: Mutex<SubscriptionLedger>,
    on_tick: Mutex<Option<OnTick>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    closed: AtomicBool,
}

/// The AngelOne streaming client.
pub(crate) struct SmartStream {
    auth: Arc<AngelOneAuth>,
    ws_url: String,
    state: Arc<StreamState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SmartStream {
    pub(crate) fn new(auth: Arc<AngelOneAuth>, ws_url: Option<String>) -> Self {
        Self {
            auth,
            ws_url: ws_url.unwrap_or_else(|| SMARTSTREAM_URL.to_string()),
            state: Arc::new(StreamState::default()),
            task: Mutex::new(None),
        }
    }

    /// The SmartStream subscribe/unsubscribe payload: `action` 1 for
    /// subscribe, 0 for unsubscribe, tokens grouped by exchange type.
    fn action_message(ledger: &SubscriptionLedger, tokens: &[String], action: u8) -> Option<Message> {
        let grouped = ledger.tokens_by_exchange_type(tokens);
        if grouped.is_empty() {
            return None;
        }
        let token_list: Vec<_> = grouped
            .into_iter()
            .map(|(exchange_type, tokens)| {
                json!({"exchangeType": exchange_type, "tokens": tokens})
            })
            .collect();
        Some(Message::Text(
            json!({
                "correlationID": "dalal",
                "action": action,
                "params": {"mode": MODE_QUOTE, "tokenList": token_list},
            })
            .to_string(),
        ))
    }

    async fn send_outgoing(&self, message: Message) {
        let outgoing = self.state.outgoing.lock().await;
        if let Some(sender) = outgoing.as_ref() {
            let _ = sender.send(message);
        }
    }

    async fn run(auth: Arc<AngelOneAuth>, ws_url: String, state: Arc<StreamState>) {
        let mut backoff = reconnect_policy();
        while !state.closed.load(Ordering::SeqCst) {
            match Self::connect_and_stream(&auth, &ws_url, &state).await {
                Ok(()) => backoff.reset(),
                Err(e) => warn!("SmartStream error: {}", e),
            }
            if state.closed.load(Ordering::SeqCst) {
                break;
            }
            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| Duration::from_secs(60));
            info!("SmartStream reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_stream(
        auth: &AngelOneAuth,
        ws_url: &str,
        state: &Arc<StreamState>,
    ) -> Result<()> {
        let (jwt, api_key, client_code, feed_token) = auth.stream_credentials().await?;
        let mut request = ws_url
            .into_client_request()
            .map_err(DalalError::Websocket)?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&jwt)?);
        headers.insert("x-api-key", header_value(&api_key)?);
        headers.insert("x-client-code", header_value(&client_code)?);
        headers.insert("x-feed-token", header_value(&feed_token)?);

        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        info!("SmartStream connected");
        let (mut sink, mut stream) = ws_stream.split();

        // Resubscribe everything currently tracked.
        {
            let ledger = state.ledger.lock().await;
            let tokens = ledger.tokens();
            if let Some(message) = Self::action_message(&ledger, &tokens, 1) {
                sink.send(message).await?;
            }
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
                        Self::dispatch_packet(&frame, state).await;
                    }
                    // Text frames are "pong" heartbeat replies.
                    Some(Ok(Message::Text(text))) => debug!("SmartStream text frame: {}", text),
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
                    sink.send(Message::Text("ping".to_string())).await?;
                }
            }
        };

        *state.outgoing.lock().await = None;
        info!("SmartStream disconnected");
        result
    }

    async fn dispatch_packet(frame: &[u8], state: &Arc<StreamState>) {
        let Some(packet) = decode_packet(frame) else {
            return;
        };
        let callback = state.on_tick.lock().await.clone();
        let Some(callback) = callback else { return };
        let ledger = state.ledger.lock().await;
        // Ticks for untracked tokens are stale leftovers from a prior
        // session.
        let Some(instrument) = ledger.instrument(&packet.token) else {
            debug!("tick for unknown token {:?}", packet.token);
            return;
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

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| DalalError::Internal(format!("invalid SmartStream header value: {}", e)))
}

#[async_trait]
impl StreamingClient for SmartStream {
    async fn subscribe(
        &self,
        subscriptions: Vec<(Instrument, ResolvedInstrument)>,
        on_tick: OnTick,
    ) -> Result<()> {
        *self.state.on_tick.lock().await = Some(on_tick);

        let mut new_tokens = Vec::with_capacity(subscriptions.len());
        let subscribe_message;
        {
            let mut ledger = self.state.ledger.lock().await;
            for (instrument, resolved) in subscriptions {
                ledger.track(
                    resolved.token.clone(),
                    instrument,
                    exchange_type(resolved.exchange),
                );
                new_tokens.push(resolved.token);
            }
            subscribe_message = Self::action_message(&ledger, &new_tokens, 1);
        }

        let mut task = self.task.lock().await;
        let running = task.as_ref().map(|t| !t.is_finished()).unwrap_or(false);
        if running {
            if let Some(message) = subscribe_message {
                self.send_outgoing(message).await;
            }
        } else {
            self.state.closed.store(false, Ordering::SeqCst);
            *task = Some(tokio::spawn(Self::run(
                Arc::clone(&self.auth),
                self.ws_url.clone(),
                Arc::clone(&self.state),
            )));
        }
        Ok(())
    }

    async fn unsubscribe(&self, instruments: &[Instrument]) -> Result<()> {
        // Build the payload before pruning - the grouping needs the
        // exchange-type codes the ledger still holds.
        let message = {
            let mut ledger = self.state.ledger.lock().await;
            let tokens = ledger.tokens_for(instruments);
            let message = Self::action_message(&ledger, &tokens, 0);
            ledger.untrack(instruments);
            message
        };
        if let Some(message) = message {
            self.send_outgoing(message).await;
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

#[derive(Debug, PartialEq)]
struct RawTick {
    token: String,
    ltp: f64,
    volume: Option<i64>,
    oi: Option<i64>,
    bid: Option<f64>,
    ask: Option<f64>,
    timestamp: Option<DateTime<Utc>>,
}

fn le_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn le_i64(data: &[u8], offset: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    i64::from_le_bytes(bytes)
}

/// Decode one SmartStream packet (little-endian, prices in paise).
///
/// Header (bytes 0..51): mode, exchange type, 25-byte null-padded ASCII
/// token, sequence, exchange timestamp (ms), LTP. QUOTE (≥123 bytes) adds
/// traded quantities, volume and OHLC; SNAP_QUOTE (≥347 bytes) adds open
/// interest and the ten 20-byte best-five records. Packets shorter than
/// their mode's minimum are discarded.
fn decode_packet(data: &[u8]) -> Option<RawTick> {
    if data.len() < LTP_MIN {
        return None;
    }
    let mode = data[0];
    let token: String = data[2..27]
        .split(|byte| *byte == 0)
        .next()
        .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
        .unwrap_or_default();

    let ts_ms = le_i64(data, 35);
    let ltp = le_i64(data, 43) as f64 / 100.0;

    let mut tick = RawTick {
        token,
        ltp,
        volume: None,
        oi: None,
        bid: None,
        ask: None,
        timestamp: (ts_ms > 0)
            .then(|| DateTime::from_timestamp_millis(ts_ms))
            .flatten(),
    };

    if mode >= MODE_QUOTE && data.len() >= QUOTE_MIN {
        tick.volume = Some(le_i64(data, 67));
    }

    if mode >= MODE_SNAP_QUOTE && data.len() >= SNAP_QUOTE_MIN {
        tick.oi = Some(le_i64(data, 131));
        let (bid, ask) = parse_best_five(&data[147..347]);
        tick.bid = bid;
        tick.ask = ask;
    }

    Some(tick)
}

/// Walk the 200-byte best-five block: ten 20-byte records of
/// `flag(u16) qty(i64) price(i64) orders(u16)`. `flag == 0` marks the buy
/// side; the first buy record is the best bid, the first sell record the
/// best ask.
fn parse_best_five(block: &[u8]) -> (Option<f64>, Option<f64>) {
    let mut bid = None;
    let mut ask = None;
    for record in 0..10 {
        let offset = record * 20;
        if offset + 20 > block.len() {
            break;
        }
        let flag = le_u16(block, offset);
        let price = le_i64(block, offset + 10) as f64 / 100.0;
        if price <= 0.0 {
            continue;
        }
        if flag == 0 && bid.is_none() {
            bid = Some(price);
        } else if flag != 0 && ask.is_none() {
            ask = Some(price);
        }
        if bid.is_some() && ask.is_some() {
            break;
        }
    }
    (bid, ask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_le_i64(buf: &mut Vec<u8>, value: i64) {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_le_u16(buf: &mut Vec<u8>, value: u16) {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Bytes 0..51: mode, exchange type, token, sequence, ts, ltp.
    fn header(mode: u8, token: &str, ts_ms: i64, ltp_paise: i64) -> Vec<u8> {
        let mut packet = vec![mode, 1];
        let mut token_bytes = token.as_bytes().to_vec();
        token_bytes.resize(25, 0);
        packet.extend_from_slice(&token_bytes);
        put_le_i64(&mut packet, 7); // sequence
        put_le_i64(&mut packet, ts_ms);
        put_le_i64(&mut packet, ltp_paise);
        packet
    }

    fn quote_packet(token: &str, ltp_paise: i64, volume: i64) -> Vec<u8> {
        let mut packet = header(MODE_QUOTE, token, 1_760_000_000_000, ltp_paise);
        put_le_i64(&mut packet, 5); // last traded qty (51)
        put_le_i64(&mut packet, ltp_paise); // avg price (59)
        put_le_i64(&mut packet, volume); // volume (67)
        put_le_i64(&mut packet, 0); // total buy qty (75)
        put_le_i64(&mut packet, 0); // total sell qty (83)
        for _ in 0..4 {
            put_le_i64(&mut packet, 0); // OHLC (91..123)
        }
        assert_eq!(packet.len(), QUOTE_MIN);
        packet
    }

    fn snap_quote_packet(token: &str, oi: i64, bid_paise: i64, ask_paise: i64) -> Vec<u8> {
        let mut packet = quote_packet(token, 2_300_000, 1000);
        packet[0] = MODE_SNAP_QUOTE;
        put_le_i64(&mut packet, 0); // last traded ts (123)
        put_le_i64(&mut packet, oi); // open interest (131)
        put_le_i64(&mut packet, 0); // oi change % (139)
        for record in 0..10 {
            // flag: first five buy (0), last five sell (1)
            let selling = record >= 5;
            put_le_u16(&mut packet, selling as u16);
            put_le_i64(&mut packet, 50); // qty
            put_le_i64(&mut packet, if selling { ask_paise } else { bid_paise });
            put_le_u16(&mut packet, 1); // orders
        }
        assert_eq!(packet.len(), SNAP_QUOTE_MIN);
        packet
    }

    #[test]
    fn ltp_packet_decodes_header_fields() {
        let packet = header(1, "256265", 1_760_000_000_000, 2_300_050);
        let tick = decode_packet(&packet).unwrap();
        assert_eq!(tick.token, "256265");
        assert!((tick.ltp - 23000.50).abs() < 1e-9);
        assert!(tick.timestamp.is_some());
        assert!(tick.volume.is_none());
    }

    #[test]
    fn short_packet_is_discarded() {
        assert!(decode_packet(&[2u8; 50]).is_none());
    }

    #[test]
    fn quote_mode_carries_volume() {
        let tick = decode_packet(&quote_packet("3045", 80_050, 123_456)).unwrap();
        assert_eq!(tick.volume, Some(123_456));
        assert!(tick.oi.is_none());
    }

    #[test]
    fn quote_sized_packet_in_snap_mode_is_not_over_read() {
        let mut packet = quote_packet("3045", 80_050, 1);
        packet[0] = MODE_SNAP_QUOTE;
        let tick = decode_packet(&packet).unwrap();
        assert!(tick.oi.is_none());
        assert!(tick.bid.is_none());
    }

    #[test]
    fn snap_quote_decodes_depth_top() {
        let tick = decode_packet(&snap_quote_packet("43567", 5150, 2_299_900, 2_300_100)).unwrap();
        assert_eq!(tick.oi, Some(5150));
        assert!((tick.bid.unwrap() - 22999.0).abs() < 1e-9);
        assert!((tick.ask.unwrap() - 23001.0).abs() < 1e-9);
    }

    #[test]
    fn zero_priced_depth_records_are_skipped() {
        // All buy records are zero-priced; bid stays empty, ask survives.
        let packet = snap_quote_packet("43567", 0, 0, 2_300_100);
        let tick = decode_packet(&packet).unwrap();
        assert!(tick.bid.is_none());
        assert!((tick.ask.unwrap() - 23001.0).abs() < 1e-9);
    }

    #[test]
    fn subscribe_payload_groups_by_exchange_type() {
        let mut ledger = SubscriptionLedger::default();
        ledger.track(
            "3045".into(),
            Instrument::equity(Exchange::NSE, "SBIN"),
            exchange_type(Exchange::NSE),
        );
        ledger.track(
            "43567".into(),
            Instrument::future(
                Exchange::NSE,
                "NIFTY",
                chrono::NaiveDate::from_ymd_opt(2026, 2, 26).unwrap(),
            ),
            exchange_type(Exchange::NFO),
        );
        let tokens = ledger.tokens();
        let Some(Message::Text(payload)) = SmartStream::action_message(&ledger, &tokens, 1) else {
            panic!("expected a subscribe frame");
        };
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["action"], 1);
        assert_eq!(value["params"]["mode"], 2);
        let token_list = value["params"]["tokenList"].as_array().unwrap();
        assert_eq!(token_list.len(), 2);
    }
}
