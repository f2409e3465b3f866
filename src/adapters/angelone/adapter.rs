//! SmartAPI REST wiring.
//!
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

use crate::adapters::angelone::auth::AngelOneAuth;
use crate::adapters::angelone::parser;
use crate::adapters::angelone::stream::SmartStream;
use crate::adapters::angelone::transformer::AngelOneTransformer;
use crate::adapters::angelone::ANGELONE_CAPABILITIES;
use crate::adapters::{data_array, data_object, BrokerAdapter, Transformer};
use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::error::{BrokerCode, DalalError, Result};
use crate::http::{HttpTransport, RequestBody};
use crate::instruments::ParsedInstruments;
use crate::models::enums::AuthMode;
use crate::stream::StreamingClient;

/// Default SmartAPI base url.
pub(crate) const ANGELONE_API_BASE: &str = "https://apiconnect.angelbroking.com";

/// The public scrip master dump, regenerated daily.
pub(crate) const SCRIP_MASTER_URL: &str =
    "https://margincalculator.angelbroking.com/OpenAPI_File/files/OpenAPIScripMaster.json";

/// The AngelOne SmartAPI adapter.
pub struct AngelOneAdapter {
    api_base: String,
    instruments_url: String,
    transport: Arc<HttpTransport>,
    auth: Arc<AngelOneAuth>,
    transformer: AngelOneTransformer,
    ws_url: Option<String>,
}

impl AngelOneAdapter {
    /// Registry factory. AngelOne's preferred mode is automated login.
    pub(crate) fn from_config(config: &Config) -> Result<Arc<dyn BrokerAdapter>> {
        let mode = config.auth_mode(AuthMode::Auto)?;
        ANGELONE_CAPABILITIES.verify_auth_mode(mode)?;
        let api_base = config
            .get_str("base_url")
            .unwrap_or(ANGELONE_API_BASE)
            .to_string();
        let instruments_url = config
            .get_str("instruments_url")
            .unwrap_or(SCRIP_MASTER_URL)
            .to_string();
        let auth = Arc::new(AngelOneAuth::new(config, mode, api_base.clone())?);
        Ok(Arc::new(Self {
            api_base,
            instruments_url,
            transport: Arc::new(HttpTransport::new()?),
            auth,
            transformer: AngelOneTransformer,
            ws_url: config.get_str("ws_url").map(str::to_string),
        }))
    }

    fn is_error(raw: &Value, status: StatusCode) -> bool {
        raw.get("status") == Some(&Value::Bool(false)) || status.is_client_error()
    }

    async fn request(&self, method: Method, path: &str, body: RequestBody) -> Result<Value> {
        self.auth.ensure_fresh(&self.transport).await?;
        let headers = self.auth.headers().await?;
        let url = format!("{}{}", self.api_base, path);
        let (status, raw) = self
            .transport
            .request_json(method, &url, headers, body)
            .await?;
        if Self::is_error(&raw, status) {
            return Err(self.transformer.parse_error(&raw));
        }
        Ok(raw)
    }
}

#[async_trait]
impl BrokerAdapter for AngelOneAdapter {
    fn broker_id(&self) -> &'static str {
        super::BROKER_ID
    }

    fn capabilities(&self) -> &'static Capabilities {
        &ANGELONE_CAPABILITIES
    }

    fn transformer(&self) -> &dyn Transformer {
        &self.transformer
    }

    async fn login(&self) -> Result<()> {
        self.auth.login(&self.transport).await
    }

    async fn refresh_session(&self) -> Result<()> {
        self.auth.refresh(&self.transport).await
    }

    /// The scrip master is a public file on a separate host; no auth
    /// headers are needed to download it.
    async fn fetch_instruments(&self) -> Result<ParsedInstruments> {
        let raw_json = self
            .transport
            .get_text(&self.instruments_url, HeaderMap::new())
            .await?;
        parser::parse(&raw_json)
    }

    async fn get_profile(&self) -> Result<Value> {
        let raw = self
            .request(
                Method::GET,
                "/rest/auth/angelbroking/user/v1/getProfile",
                RequestBody::Empty,
            )
            .await?;
        Ok(data_object(raw))
    }

    async fn get_funds(&self) -> Result<Value> {
        let raw = self
            .request(
                Method::GET,
                "/rest/auth/angelbroking/user/v1/getRMS",
                RequestBody::Empty,
            )
            .await?;
        Ok(data_object(raw))
    }

    async fn get_holdings(&self) -> Result<Vec<Value>> {
        let raw = self
            .request(
                Method::GET,
                "/rest/auth/angelbroking/portfolio/v1/getHolding",
                RequestBody::Empty,
            )
            .await?;
        Ok(data_array(raw))
    }

    async fn get_positions(&self) -> Result<Vec<Value>> {
        let raw = self
            .request(
                Method::GET,
                "/rest/auth/angelbroking/order/v1/getPosition",
                RequestBody::Empty,
            )
            .await?;
        Ok(data_array(raw))
    }

    async fn get_orders(&self) -> Result<Vec<Value>> {
        let raw = self
            .request(
                Method::GET,
                "/rest/auth/angelbroking/order/v1/getOrderBook",
                RequestBody::Empty,
            )
            .await?;
        Ok(data_array(raw))
    }

    async fn get_trades(&self) -> Result<Vec<Value>> {
        let raw = self
            .request(
                Method::GET,
                "/rest/auth/angelbroking/order/v1/getTradeBook",
                RequestBody::Empty,
            )
            .await?;
        Ok(data_array(raw))
    }

    /// SmartAPI has no single-order endpoint; the order book is filtered by
    /// id instead.
    async fn get_order(&self, order_id: &str) -> Result<Value> {
        let orders = self.get_orders().await?;
        orders
            .into_iter()
            .find(|row| row.get("orderid").and_then(Value::as_str) == Some(order_id))
            .ok_or_else(|| DalalError::OrderNotFound {
                message: format!("No order {} in the order book", order_id),
                code: BrokerCode(None),
            })
    }

    async fn place_order(&self, params: Value) -> Result<Value> {
        let raw = self
            .request(
                Method::POST,
                "/rest/auth/angelbroking/order/v1/placeOrder",
                RequestBody::Json(params),
            )
            .await?;
        Ok(data_object(raw))
    }

    /// SmartAPI takes the order id in the body, not the path.
    async fn modify_order(&self, order_id: &str, params: Value) -> Result<Value> {
        let mut params = params;
        if let Value::Object(ref mut map) = params {
            map.entry("orderid".to_string())
                .or_insert_with(|| json!(order_id));
            map.entry("variety".to_string())
                .or_insert_with(|| json!("NORMAL"));
        }
        let raw = self
            .request(
                Method::POST,
                "/rest/auth/angelbroking/order/v1/modifyOrder",
                RequestBody::Json(params),
            )
            .await?;
        Ok(data_object(raw))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<Value> {
        let params = json!({ "variety": "NORMAL", "orderid": order_id });
        let raw = self
            .request(
                Method::POST,
                "/rest/auth/angelbroking/order/v1/cancelOrder",
                RequestBody::Json(params),
            )
            .await?;
        Ok(data_object(raw))
    }

    fn create_streaming_client(&self) -> Option<Arc<dyn StreamingClient>> {
        Some(Arc::new(SmartStream::new(
            Arc::clone(&self.auth),
            self.ws_url.clone(),
        )))
    }
}
