//! The unified async client.
//!
//! [`DalalClient`] is the one public surface over every supported broker:
//! construct it with a broker id and a [`Config`], call [`init`] once, then
//! trade and stream through canonical types only. Vendor vocabulary never
//! crosses this boundary - requests go out through the adapter's
//! transformer, responses come back as canonical records, and vendor error
//! codes arrive as [`DalalError`] variants.
//!
//! [`init`]: DalalClient::init
//!
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::adapters::{build_adapter, BrokerAdapter, OrderRequest};
use crate::config::Config;
use crate::error::{DalalError, Result};
use crate::instruments::resolver::{InstrumentResolver, ResolvedInstrument};
use crate::instruments::store::InstrumentStore;
use crate::models::enums::{OrderStatus, OrderType, ProductType, Side};
use crate::models::instrument::Instrument;
use crate::models::{Fund, Holding, Margin, Order, Position, Profile, Trade};
use crate::stream::{OnTick, StreamingClient};

/// An asynchronous, broker-agnostic trading client.
///
/// Lifecycle:
/// 1. Construct with a broker id and config.
/// 2. `init()` once before any other call - it authenticates, seeds the
///    instrument store for the day, and builds the resolver.
/// 3. `close()` to release the WebSocket and HTTP resources.
///
/// ```no_run
/// use dalal::{Config, DalalClient};
///
/// # async fn run() -> dalal::Result<()> {
/// let config = Config::new()
///     .set("api_key", "kite_api_key")
///     .set("access_token", "daily_token");
/// let client = DalalClient::new("zerodha", config)?;
/// client.init().await?;
/// let funds = client.get_funds().await?;
/// println!("available: {}", funds.available);
/// # Ok(())
/// # }
/// ```
pub struct DalalClient {
    broker_id: &'static str,
    adapter: Arc<dyn BrokerAdapter>,
    store: InstrumentStore,
    resolver: RwLock<Option<Arc<InstrumentResolver>>>,
    streaming: Mutex<Option<Arc<dyn StreamingClient>>>,
}

impl DalalClient {
    /// Construct a client for a registered broker. The adapter validates
    /// its auth mode and required config keys here, failing fast.
    ///
    /// The instrument store lives at `cache/{broker}_instruments.db`.
    pub fn new(broker: &str, config: Config) -> Result<Self> {
        let adapter = build_adapter(broker, &config)?;
        let store = InstrumentStore::open(
            format!("cache/{}_instruments.db", adapter.broker_id()),
            adapter.broker_id(),
            config.on_stale()?,
        )?;
        Ok(Self::from_parts(adapter, store))
    }

    /// Construct against an explicit store (in-memory stores in tests,
    /// shared stores in multi-client tools).
    pub fn with_store(broker: &str, config: Config, store: InstrumentStore) -> Result<Self> {
        let adapter = build_adapter(broker, &config)?;
        Ok(Self::from_parts(adapter, store))
    }

    fn from_parts(adapter: Arc<dyn BrokerAdapter>, store: InstrumentStore) -> Self {
        Self {
            broker_id: adapter.broker_id(),
            adapter,
            store,
            resolver: RwLock::new(None),
            streaming: Mutex::new(None),
        }
    }

    /// The broker this client is bound to.
    pub fn broker_id(&self) -> &'static str {
        self.broker_id
    }

    /// Authenticate and ensure today's instrument master is loaded, then
    /// build the resolver. Must be called once before any other operation.
    pub async fn init(&self) -> Result<()> {
        self.adapter.login().await?;
        let adapter = Arc::clone(&self.adapter);
        self.store
            .init(move || async move { adapter.fetch_instruments().await })
            .await?;
        *self.resolver.write().await = Some(Arc::new(InstrumentResolver::new(
            self.store.connection(),
            self.broker_id,
        )));
        info!("[{}] client initialized", self.broker_id);
        Ok(())
    }

    /// Re-authenticate with the broker (renew or re-login per auth mode).
    pub async fn refresh_session(&self) -> Result<()> {
        self.adapter.refresh_session().await
    }

    /// Close the streaming socket (if open) and release adapter resources.
    pub async fn close(&self) {
        if let Some(streaming) = self.streaming.lock().await.take() {
            streaming.close().await;
        }
        self.adapter.close().await;
    }

    async fn resolver(&self) -> Result<Arc<InstrumentResolver>> {
        self.resolver
            .read()
            .await
            .clone()
            .ok_or_else(|| DalalError::Internal("call init() before using the client".into()))
    }

    /// Resolve a canonical instrument to its broker token, symbol and
    /// routing venue.
    pub async fn resolve(&self, instrument: &Instrument) -> Result<ResolvedInstrument> {
        self.resolver().await?.resolve(instrument).await
    }

    // --- Profile & funds ---

    pub async fn get_profile(&self) -> Result<Profile> {
        let raw = self.adapter.get_profile().await?;
        self.adapter.transformer().to_profile(&raw)
    }

    pub async fn get_funds(&self) -> Result<Fund> {
        let raw = self.adapter.get_funds().await?;
        self.adapter.transformer().to_fund(&raw)
    }

    // --- Portfolio ---

    pub async fn get_holdings(&self) -> Result<Vec<Holding>> {
        let raw = self.adapter.get_holdings().await?;
        raw.iter()
            .map(|row| self.adapter.transformer().to_holding(row))
            .collect()
    }

    /// Open net positions (zero-quantity rows are filtered out by the
    /// adapter).
    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        let raw = self.adapter.get_positions().await?;
        raw.iter()
            .map(|row| self.adapter.transformer().to_position(row))
            .collect()
    }

    // --- Reports ---

    pub async fn get_orders(&self) -> Result<Vec<Order>> {
        let raw = self.adapter.get_orders().await?;
        raw.iter()
            .map(|row| self.adapter.transformer().to_order(row))
            .collect()
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        let raw = self.adapter.get_order(order_id).await?;
        self.adapter.transformer().to_order(&raw)
    }

    pub async fn get_trades(&self) -> Result<Vec<Trade>> {
        let raw = self.adapter.get_trades().await?;
        raw.iter()
            .map(|row| self.adapter.transformer().to_trade(row))
            .collect()
    }

    /// Margin requirement for a prospective order, where the broker
    /// supports the calculation. `params` is the broker's raw request
    /// shape.
    pub async fn get_margins(&self, params: Value) -> Result<Margin> {
        let raw = self.adapter.get_margins(params).await?;
        self.adapter.transformer().to_margin(&raw)
    }

    // --- Orders ---

    /// Place an order after the capability check and instrument
    /// resolution. Returns the broker order id.
    ///
    /// The capability check runs *before* any HTTP: an unsupported order
    /// type, product, segment, or an index instrument is rejected locally.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &self,
        instrument: &Instrument,
        qty: i64,
        side: Side,
        product: ProductType,
        order_type: OrderType,
        price: Option<f64>,
        trigger_price: Option<f64>,
    ) -> Result<String> {
        self.adapter
            .capabilities()
            .verify(instrument, order_type, product)?;
        let resolved = self.resolve(instrument).await?;
        let request = OrderRequest {
            token: resolved.token,
            broker_symbol: resolved.broker_symbol,
            exchange: resolved.exchange,
            qty,
            side,
            product,
            order_type,
            price,
            trigger_price,
        };
        let params = self.adapter.transformer().to_order_params(&request);
        let raw = self.adapter.place_order(params).await?;
        self.adapter.transformer().to_order_id(&raw)
    }

    /// Modify an open order using the broker's raw parameter names.
    pub async fn modify_order(&self, order_id: &str, params: Value) -> Result<()> {
        self.adapter.modify_order(order_id, params).await?;
        Ok(())
    }

    /// Cancel a single order by id.
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.adapter.cancel_order(order_id).await?;
        Ok(())
    }

    /// Cancel every open or pending order, issuing the cancels
    /// concurrently. Per-order failures never abort the batch.
    ///
    /// Returns `(cancelled_ids, failed_ids)`.
    pub async fn cancel_all_orders(&self) -> Result<(Vec<String>, Vec<String>)> {
        let orders = self.get_orders().await?;
        let open: Vec<String> = orders
            .into_iter()
            .filter(|order| {
                matches!(order.status, OrderStatus::Open | OrderStatus::Pending)
            })
            .map(|order| order.id)
            .collect();

        let attempts = join_all(open.into_iter().map(|id| {
            let adapter = Arc::clone(&self.adapter);
            async move {
                let outcome = adapter.cancel_order(&id).await;
                (id, outcome)
            }
        }))
        .await;

        let mut cancelled = Vec::new();
        let mut failed = Vec::new();
        for (id, outcome) in attempts {
            match outcome {
                Ok(_) => cancelled.push(id),
                Err(_) => failed.push(id),
            }
        }
        Ok((cancelled, failed))
    }

    /// Place an offsetting market order for every open position, issuing
    /// them concurrently. Per-position failures never abort the batch.
    ///
    /// Returns `(placed_order_ids, failed_symbols)`.
    pub async fn close_all_positions(&self) -> Result<(Vec<String>, Vec<String>)> {
        let raw_positions = self.adapter.get_positions().await?;

        let mut offsets = Vec::new();
        for raw in &raw_positions {
            let position = self.adapter.transformer().to_position(raw)?;
            if position.qty == 0 {
                continue;
            }
            let side = if position.qty > 0 { Side::Sell } else { Side::Buy };
            let params =
                self.adapter
                    .transformer()
                    .to_close_params(raw, position.qty.abs(), side)?;
            let symbol = raw
                .get("tradingsymbol")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            offsets.push((symbol, params));
        }

        let attempts = join_all(offsets.into_iter().map(|(symbol, params)| {
            let adapter = Arc::clone(&self.adapter);
            async move {
                let outcome = adapter.place_order(params).await;
                (symbol, outcome)
            }
        }))
        .await;

        let mut placed = Vec::new();
        let mut failed = Vec::new();
        for (symbol, outcome) in attempts {
            match outcome {
                Ok(raw) => match self.adapter.transformer().to_order_id(&raw) {
                    Ok(id) => placed.push(id),
                    Err(_) => failed.push(symbol),
                },
                Err(_) => failed.push(symbol),
            }
        }
        Ok((placed, failed))
    }

    // --- Streaming ---

    /// Subscribe to ticks for canonical instruments. Each instrument is
    /// resolved before subscription; `on_tick` runs as a detached task per
    /// tick, so completions may interleave.
    pub async fn subscribe(&self, instruments: Vec<Instrument>, on_tick: OnTick) -> Result<()> {
        let mut streaming = self.streaming.lock().await;
        if streaming.is_none() {
            *streaming = self.adapter.create_streaming_client();
        }
        let client = streaming.as_ref().ok_or_else(|| {
            DalalError::unsupported(format!("{} does not support streaming", self.broker_id))
        })?;

        let mut subscriptions = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let resolved = self.resolve(&instrument).await?;
            subscriptions.push((instrument, resolved));
        }
        client.subscribe(subscriptions, on_tick).await
    }

    /// Unsubscribe previously subscribed instruments.
    pub async fn unsubscribe(&self, instruments: &[Instrument]) -> Result<()> {
        let streaming = self.streaming.lock().await;
        match streaming.as_ref() {
            Some(client) => client.unsubscribe(instruments).await,
            None => Ok(()),
        }
    }
}
