//! Kite Connect REST wiring.
//!
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::StatusCode;
use serde_json::Value;

use crate::adapters::zerodha::auth::ZerodhaAuth;
use crate::adapters::zerodha::parser;
use crate::adapters::zerodha::ticker::KiteTicker;
use crate::adapters::zerodha::transformer::ZerodhaTransformer;
use crate::adapters::zerodha::ZERODHA_CAPABILITIES;
use crate::adapters::{data_array, data_object, BrokerAdapter, Transformer};
use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::error::Result;
use crate::http::{HttpTransport, RequestBody};
use crate::instruments::ParsedInstruments;
use crate::models::enums::AuthMode;
use crate::stream::StreamingClient;

/// Default v3 API base url.
pub(crate) const ZERODHA_API_BASE: &str = "https://api.kite.trade";

/// The Zerodha Kite Connect adapter.
pub struct ZerodhaAdapter {
    api_base: String,
    transport: HttpTransport,
    auth: Arc<ZerodhaAuth>,
    transformer: ZerodhaTransformer,
    ws_url: Option<String>,
}

impl ZerodhaAdapter {
    /// Registry factory. Validates the auth mode against the capability
    /// matrix and the config keys the mode requires.
    pub(crate) fn from_config(config: &Config) -> Result<Arc<dyn BrokerAdapter>> {
        let mode = config.auth_mode(AuthMode::Manual)?;
        ZERODHA_CAPABILITIES.verify_auth_mode(mode)?;
        let api_base = config
            .get_str("base_url")
            .unwrap_or(ZERODHA_API_BASE)
            .to_string();
        let auth = Arc::new(ZerodhaAuth::new(config, mode, api_base.clone())?);
        Ok(Arc::new(Self {
            api_base,
            transport: HttpTransport::new()?,
            auth,
            transformer: ZerodhaTransformer,
            ws_url: config.get_str("ws_url").map(str::to_string),
        }))
    }

    fn is_error(raw: &Value, status: StatusCode) -> bool {
        raw.get("status").and_then(Value::as_str) == Some("error") || status.is_client_error()
    }

    async fn request(&self, method: Method, path: &str, body: RequestBody) -> Result<Value> {
        self.auth.ensure_fresh().await?;
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

    // Kite takes form-encoded request bodies; flatten the transformer's
    // JSON object into form fields.
    fn form_body(params: &Value) -> RequestBody {
        let fields = params
            .as_object()
            .map(|object| {
                object
                    .iter()
                    .map(|(key, value)| {
                        let rendered = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key.clone(), rendered)
                    })
                    .collect()
            })
            .unwrap_or_default();
        RequestBody::Form(fields)
    }
}

#[async_trait]
impl BrokerAdapter for ZerodhaAdapter {
    fn broker_id(&self) -> &'static str {
        super::BROKER_ID
    }

    fn capabilities(&self) -> &'static Capabilities {
        &ZERODHA_CAPABILITIES
    }

    fn transformer(&self) -> &dyn Transformer {
        &self.transformer
    }

    async fn login(&self) -> Result<()> {
        self.auth.login().await
    }

    async fn refresh_session(&self) -> Result<()> {
        self.auth.refresh().await
    }

    async fn fetch_instruments(&self) -> Result<ParsedInstruments> {
        self.auth.ensure_fresh().await?;
        let headers = self.auth.headers().await?;
        let url = format!("{}/instruments", self.api_base);
        let raw_csv = self.transport.get_text(&url, headers).await?;
        parser::parse(&raw_csv)
    }

    async fn get_profile(&self) -> Result<Value> {
        let raw = self.request(Method::GET, "/user/profile", RequestBody::Empty).await?;
        Ok(data_object(raw))
    }

    async fn get_funds(&self) -> Result<Value> {
        let raw = self.request(Method::GET, "/user/margins", RequestBody::Empty).await?;
        Ok(data_object(raw))
    }

    async fn get_holdings(&self) -> Result<Vec<Value>> {
        let raw = self
            .request(Method::GET, "/portfolio/holdings", RequestBody::Empty)
            .await?;
        Ok(data_array(raw))
    }

    /// Kite splits positions into `net` and `day`; only the net view with a
    /// non-zero quantity is exposed.
    async fn get_positions(&self) -> Result<Vec<Value>> {
        let raw = self
            .request(Method::GET, "/portfolio/positions", RequestBody::Empty)
            .await?;
        let net = match data_object(raw) {
            Value::Object(mut data) => match data.remove("net") {
                Some(Value::Array(rows)) => rows,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        Ok(net
            .into_iter()
            .filter(|row| row.get("quantity").and_then(Value::as_i64).unwrap_or(0) != 0)
            .collect())
    }

    async fn get_orders(&self) -> Result<Vec<Value>> {
        let raw = self.request(Method::GET, "/orders", RequestBody::Empty).await?;
        Ok(data_array(raw))
    }

    async fn get_trades(&self) -> Result<Vec<Value>> {
        let raw = self.request(Method::GET, "/trades", RequestBody::Empty).await?;
        Ok(data_array(raw))
    }

    /// `/orders/{id}` returns the order's full history; the last row is its
    /// current state.
    async fn get_order(&self, order_id: &str) -> Result<Value> {
        let raw = self
            .request(Method::GET, &format!("/orders/{}", order_id), RequestBody::Empty)
            .await?;
        let mut history = data_array(raw);
        history.pop().ok_or_else(|| {
            crate::error::DalalError::OrderNotFound {
                message: format!("No order history for {}", order_id),
                code: crate::error::BrokerCode(None),
            }
        })
    }

    async fn get_margins(&self, params: Value) -> Result<Value> {
        let raw = self
            .request(Method::POST, "/margins/orders", RequestBody::Json(params))
            .await?;
        // The margins endpoint answers one entry per order in the request.
        Ok(match data_object(raw) {
            Value::Array(mut entries) if !entries.is_empty() => entries.remove(0),
            other => other,
        })
    }

    async fn place_order(&self, params: Value) -> Result<Value> {
        let raw = self
            .request(Method::POST, "/orders/regular", Self::form_body(&params))
            .await?;
        Ok(data_object(raw))
    }

    async fn modify_order(&self, order_id: &str, params: Value) -> Result<Value> {
        let raw = self
            .request(
                Method::PUT,
                &format!("/orders/regular/{}", order_id),
                Self::form_body(&params),
            )
            .await?;
        Ok(data_object(raw))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<Value> {
        let raw = self
            .request(
                Method::DELETE,
                &format!("/orders/regular/{}", order_id),
                RequestBody::Empty,
            )
            .await?;
        Ok(data_object(raw))
    }

    fn create_streaming_client(&self) -> Option<Arc<dyn StreamingClient>> {
        Some(Arc::new(KiteTicker::new(
            Arc::clone(&self.auth),
            self.ws_url.clone(),
        )))
    }
}
