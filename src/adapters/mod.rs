//! The broker adapter contract.
//!
//! An adapter is the capability-aware polymorphism boundary between the
//! canonical client surface and one vendor's API: it owns the vendor's
//! authentication, REST wiring and endpoints, while its [`Transformer`]
//! owns the bidirectional payload mapping (canonical request → vendor
//! payload, vendor response → canonical record) and the translation of the
//! vendor's error vocabulary into the canonical taxonomy.
//!
//! Adapters are looked up by broker id through a process-wide registry -
//! the mapping `broker_id → constructor` *is* the extension contract for
//! new vendors.
//!
//! # Submodules
//!
//! - `zerodha`: Zerodha Kite Connect (`api.kite.trade`).
//! - `angelone`: AngelOne SmartAPI (`apiconnect.angelbroking.com`).
//!
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::error::{DalalError, Result};
use crate::instruments::ParsedInstruments;
use crate::models::enums::{Exchange, OrderType, ProductType, Side};
use crate::models::{Fund, Holding, Margin, Order, Position, Profile, Trade};
use crate::stream::StreamingClient;

pub mod angelone;
pub(crate) mod totp;
pub mod zerodha;

/// A fully resolved order, ready for the transformer to encode in the
/// vendor's vocabulary.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// The vendor's opaque instrument token.
    pub token: String,
    /// The vendor's tradingsymbol.
    pub broker_symbol: String,
    /// The routing venue (NFO/BFO for derivatives).
    pub exchange: Exchange,
    pub qty: i64,
    pub side: Side,
    pub product: ProductType,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
}

/// Stateless, bidirectional payload mapping for one vendor.
///
/// The raw side is untyped JSON; each implementation deserializes into its
/// own typed wire structs internally so that field renames surface as
/// deserialization errors, not silent zeros.
pub trait Transformer: Send + Sync {
    /// Encode a resolved order as the vendor's order-placement payload.
    fn to_order_params(&self, request: &OrderRequest) -> Value;

    /// Extract the vendor order id from a placement response.
    fn to_order_id(&self, raw: &Value) -> Result<String>;

    /// Build a market order offsetting a raw vendor position row.
    fn to_close_params(&self, position_raw: &Value, qty: i64, side: Side) -> Result<Value>;

    fn to_profile(&self, raw: &Value) -> Result<Profile>;
    fn to_fund(&self, raw: &Value) -> Result<Fund>;
    fn to_holding(&self, raw: &Value) -> Result<Holding>;
    fn to_position(&self, raw: &Value) -> Result<Position>;
    fn to_order(&self, raw: &Value) -> Result<Order>;
    fn to_trade(&self, raw: &Value) -> Result<Trade>;
    fn to_margin(&self, raw: &Value) -> Result<Margin>;

    /// Map a vendor error envelope to the canonical taxonomy.
    fn parse_error(&self, raw: &Value) -> DalalError;
}

/// The per-vendor adapter contract.
///
/// Raw-returning methods (`get_profile`, `get_positions`, ...) hand back the
/// vendor's `data` payload; the client runs them through [`Transformer`] to
/// produce canonical records. This split keeps batch operations
/// (close-all-positions) able to reuse raw rows for offset-order
/// construction.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn broker_id(&self) -> &'static str;
    fn capabilities(&self) -> &'static Capabilities;
    fn transformer(&self) -> &dyn Transformer;

    // --- Lifecycle ---

    async fn login(&self) -> Result<()>;
    async fn refresh_session(&self) -> Result<()>;
    async fn fetch_instruments(&self) -> Result<ParsedInstruments>;
    /// Release vendor-side resources. The shared HTTP client aborts
    /// in-flight requests when dropped.
    async fn close(&self) {}

    // --- Reads ---

    async fn get_profile(&self) -> Result<Value>;
    async fn get_funds(&self) -> Result<Value>;
    async fn get_holdings(&self) -> Result<Vec<Value>>;
    async fn get_positions(&self) -> Result<Vec<Value>>;
    async fn get_orders(&self) -> Result<Vec<Value>>;
    async fn get_trades(&self) -> Result<Vec<Value>>;
    async fn get_order(&self, order_id: &str) -> Result<Value>;

    /// Margin requirement for a prospective order. Not every vendor
    /// supports this.
    async fn get_margins(&self, _params: Value) -> Result<Value> {
        Err(DalalError::unsupported(format!(
            "{} does not support margin calculation",
            self.broker_id()
        )))
    }

    // --- Writes ---

    async fn place_order(&self, params: Value) -> Result<Value>;
    async fn modify_order(&self, order_id: &str, params: Value) -> Result<Value>;
    async fn cancel_order(&self, order_id: &str) -> Result<Value>;

    // --- Streaming ---

    /// The broker's streaming client, if the vendor has a feed.
    fn create_streaming_client(&self) -> Option<Arc<dyn StreamingClient>> {
        None
    }
}

type AdapterFactory = fn(&Config) -> Result<Arc<dyn BrokerAdapter>>;

fn registry() -> &'static HashMap<&'static str, AdapterFactory> {
    static REGISTRY: OnceLock<HashMap<&'static str, AdapterFactory>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<&'static str, AdapterFactory> = HashMap::new();
        map.insert(zerodha::BROKER_ID, zerodha::ZerodhaAdapter::from_config);
        map.insert(angelone::BROKER_ID, angelone::AngelOneAdapter::from_config);
        map
    })
}

/// Construct the adapter registered under `broker_id`.
pub(crate) fn build_adapter(broker_id: &str, config: &Config) -> Result<Arc<dyn BrokerAdapter>> {
    let factory = registry().get(broker_id).ok_or_else(|| {
        let mut known: Vec<&str> = registry().keys().copied().collect();
        known.sort_unstable();
        DalalError::unsupported(format!(
            "Unknown broker '{}'. Supported: {}",
            broker_id,
            known.join(", ")
        ))
    })?;
    factory(config)
}

/// The broker ids this build knows how to construct.
pub fn supported_brokers() -> Vec<&'static str> {
    let mut ids: Vec<&'static str> = registry().keys().copied().collect();
    ids.sort_unstable();
    ids
}

/// Pull the `data` member out of a vendor envelope, treating `null` and a
/// missing key as an empty object/absent payload.
pub(crate) fn data_object(mut raw: Value) -> Value {
    match raw.get_mut("data") {
        Some(data) => data.take(),
        None => Value::Null,
    }
}

/// Pull `data` as an array; `null` normalizes to an empty list (vendors
/// return `data: null` for empty books).
pub(crate) fn data_array(raw: Value) -> Vec<Value> {
    match data_object(raw) {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn supported_brokers_lists_both_vendors() {
        assert_eq!(supported_brokers(), vec!["angelone", "zerodha"]);
    }

    #[test]
    fn unknown_broker_fails_with_known_list() {
        let err = match build_adapter("upstox", &Config::new()) {
            Err(e) => e,
            Ok(_) => panic!("expected build_adapter to fail for unknown broker"),
        };
        let msg = err.to_string();
        assert!(msg.contains("upstox"));
        assert!(msg.contains("zerodha"));
        assert!(msg.contains("angelone"));
    }

    #[test]
    fn null_data_normalizes_to_empty_list() {
        assert!(data_array(json!({"status": true, "data": null})).is_empty());
        assert!(data_array(json!({"status": true})).is_empty());
        assert_eq!(
            data_array(json!({"status": true, "data": [1, 2]})).len(),
            2
        );
    }
}
