//! Kite Connect payload mapping.
//!
//! Stateless, bidirectional: canonical order requests become Kite's
//! form-field vocabulary; Kite responses become canonical records. Each
//! incoming payload is deserialized into a typed wire struct first so that
//! a vendor field rename fails loudly instead of producing zeroed records.
//!
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::adapters::{OrderRequest, Transformer};
use crate::error::{BrokerCode, DalalError, Result};
use crate::models::enums::{Exchange, OrderStatus, OrderType, ProductType, Side};
use crate::models::instrument::Instrument;
use crate::models::{Fund, Holding, Margin, Order, Position, Profile, Trade};
use crate::session::ist_offset;

/// Fold a Kite order status string into the canonical five states.
///
/// Kite reports a dozen-plus interim statuses; everything unrecognized is
/// treated as still pending rather than failing the order fetch.
pub(crate) fn normalize_status(raw: &str) -> OrderStatus {
    match raw {
        "OPEN" => OrderStatus::Open,
        "COMPLETE" => OrderStatus::Complete,
        "CANCELLED" | "CANCELLED AMO" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        "MODIFY PENDING" | "MODIFY VALIDATION PENDING" | "CANCEL PENDING" => OrderStatus::Open,
        // TRIGGER PENDING, AMO REQ RECEIVED, VALIDATION PENDING,
        // PUT ORDER REQ RECEIVED, OPEN PENDING, and anything new.
        _ => OrderStatus::Pending,
    }
}

/// Parse Kite's naive `YYYY-mm-dd HH:MM:SS` timestamps (IST wall clock)
/// into UTC instants. The ISO `T` separator is accepted as well.
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    naive
        .and_local_timezone(ist_offset())
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn cash_instrument(exchange: &str, symbol: &str) -> Option<Instrument> {
    Exchange::parse(exchange).map(|exchange| Instrument::equity(exchange, symbol))
}

#[derive(Deserialize)]
struct ProfileRaw {
    user_id: String,
    user_name: String,
    email: String,
    mobile: Option<String>,
}

#[derive(Deserialize)]
struct FundsRaw {
    equity: FundSegmentRaw,
}

#[derive(Deserialize)]
struct FundSegmentRaw {
    net: f64,
    available: AvailableRaw,
    utilised: UtilisedRaw,
}

#[derive(Deserialize)]
struct AvailableRaw {
    live_balance: f64,
    #[serde(default)]
    collateral: f64,
}

#[derive(Deserialize)]
struct UtilisedRaw {
    debits: f64,
    #[serde(default)]
    m2m_unrealised: f64,
    #[serde(default)]
    m2m_realised: f64,
}

#[derive(Deserialize)]
struct HoldingRaw {
    tradingsymbol: String,
    exchange: String,
    quantity: i64,
    average_price: f64,
    last_price: f64,
    pnl: f64,
}

#[derive(Deserialize)]
struct PositionRaw {
    tradingsymbol: String,
    exchange: String,
    quantity: i64,
    average_price: f64,
    last_price: f64,
    pnl: f64,
    product: String,
}

#[derive(Deserialize)]
struct OrderRaw {
    order_id: String,
    status: String,
    #[serde(default)]
    tradingsymbol: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    transaction_type: String,
    quantity: i64,
    filled_quantity: i64,
    product: String,
    order_type: String,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    trigger_price: Option<f64>,
    #[serde(default)]
    average_price: Option<f64>,
    #[serde(default)]
    order_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct TradeRaw {
    order_id: String,
    tradingsymbol: String,
    exchange: String,
    transaction_type: String,
    quantity: i64,
    average_price: f64,
    #[serde(default)]
    fill_timestamp: Option<String>,
}

#[derive(Deserialize)]
struct MarginRaw {
    initial: MarginLegRaw,
    #[serde(rename = "final")]
    final_leg: MarginFinalRaw,
}

#[derive(Deserialize)]
struct MarginLegRaw {
    total: f64,
    #[serde(default)]
    span: f64,
    #[serde(default)]
    exposure: f64,
    #[serde(default)]
    option_premium: f64,
}

#[derive(Deserialize)]
struct MarginFinalRaw {
    total: f64,
}

fn parse_side(raw: &str) -> Result<Side> {
    Side::parse(raw)
        .ok_or_else(|| DalalError::Internal(format!("unknown Kite transaction type: {}", raw)))
}

fn parse_product(raw: &str) -> Result<ProductType> {
    ProductType::parse(raw)
        .ok_or_else(|| DalalError::Internal(format!("unknown Kite product: {}", raw)))
}

fn parse_order_type(raw: &str) -> Result<OrderType> {
    OrderType::parse(raw)
        .ok_or_else(|| DalalError::Internal(format!("unknown Kite order type: {}", raw)))
}

/// The Kite Connect transformer. Stateless - one shared instance per
/// adapter.
pub struct ZerodhaTransformer;

impl Transformer for ZerodhaTransformer {
    fn to_order_params(&self, request: &OrderRequest) -> Value {
        let mut params = json!({
            "tradingsymbol": request.broker_symbol,
            "exchange": request.exchange.as_str(),
            "transaction_type": request.side.as_str(),
            "quantity": request.qty,
            "product": request.product.as_str(),
            "order_type": request.order_type.as_str(),
            "validity": "DAY",
        });
        if let Some(price) = request.price {
            params["price"] = json!(price);
        }
        if let Some(trigger_price) = request.trigger_price {
            params["trigger_price"] = json!(trigger_price);
        }
        params
    }

    fn to_order_id(&self, raw: &Value) -> Result<String> {
        raw.get("order_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DalalError::Internal("Kite order response without order_id".into()))
    }

    fn to_close_params(&self, position_raw: &Value, qty: i64, side: Side) -> Result<Value> {
        let position: PositionRaw = serde_json::from_value(position_raw.clone())?;
        Ok(json!({
            "tradingsymbol": position.tradingsymbol,
            "exchange": position.exchange,
            "transaction_type": side.as_str(),
            "quantity": qty,
            "product": position.product,
            "order_type": OrderType::Market.as_str(),
            "validity": "DAY",
        }))
    }

    fn to_profile(&self, raw: &Value) -> Result<Profile> {
        let profile: ProfileRaw = serde_json::from_value(raw.clone())?;
        Ok(Profile {
            client_id: profile.user_id,
            name: profile.user_name,
            email: profile.email,
            phone: profile.mobile,
        })
    }

    fn to_fund(&self, raw: &Value) -> Result<Fund> {
        let funds: FundsRaw = serde_json::from_value(raw.clone())?;
        Ok(Fund {
            available: funds.equity.available.live_balance,
            used: funds.equity.utilised.debits,
            total: funds.equity.net,
            collateral: funds.equity.available.collateral,
            m2m_unrealized: funds.equity.utilised.m2m_unrealised,
            m2m_realized: funds.equity.utilised.m2m_realised,
        })
    }

    fn to_holding(&self, raw: &Value) -> Result<Holding> {
        let holding: HoldingRaw = serde_json::from_value(raw.clone())?;
        let cost = holding.average_price * holding.quantity as f64;
        let pnl_percent = if cost == 0.0 {
            0.0
        } else {
            holding.pnl / cost * 100.0
        };
        let instrument = cash_instrument(&holding.exchange, &holding.tradingsymbol)
            .ok_or_else(|| {
                DalalError::Internal(format!("unknown holding exchange: {}", holding.exchange))
            })?;
        Ok(Holding {
            instrument,
            qty: holding.quantity,
            avg_price: holding.average_price,
            ltp: holding.last_price,
            pnl: holding.pnl,
            pnl_percent,
        })
    }

    fn to_position(&self, raw: &Value) -> Result<Position> {
        let position: PositionRaw = serde_json::from_value(raw.clone())?;
        let instrument = cash_instrument(&position.exchange, &position.tradingsymbol)
            .ok_or_else(|| {
                DalalError::Internal(format!("unknown position exchange: {}", position.exchange))
            })?;
        Ok(Position {
            instrument,
            qty: position.quantity,
            avg_price: position.average_price,
            ltp: position.last_price,
            pnl: position.pnl,
            product: parse_product(&position.product)?,
        })
    }

    fn to_order(&self, raw: &Value) -> Result<Order> {
        let order: OrderRaw = serde_json::from_value(raw.clone())?;
        let instrument = match (&order.exchange, &order.tradingsymbol) {
            (Some(exchange), Some(symbol)) => cash_instrument(exchange, symbol),
            _ => None,
        };
        Ok(Order {
            id: order.order_id,
            instrument,
            side: parse_side(&order.transaction_type)?,
            qty: order.quantity,
            filled_qty: order.filled_quantity,
            product: parse_product(&order.product)?,
            order_type: parse_order_type(&order.order_type)?,
            status: normalize_status(&order.status),
            price: order.price,
            trigger_price: order.trigger_price,
            avg_price: order.average_price,
            timestamp: parse_timestamp(order.order_timestamp.as_deref()),
        })
    }

    fn to_trade(&self, raw: &Value) -> Result<Trade> {
        let trade: TradeRaw = serde_json::from_value(raw.clone())?;
        Ok(Trade {
            order_id: trade.order_id,
            instrument: cash_instrument(&trade.exchange, &trade.tradingsymbol),
            side: parse_side(&trade.transaction_type)?,
            qty: trade.quantity,
            avg_price: trade.average_price,
            trade_value: trade.quantity as f64 * trade.average_price,
            timestamp: parse_timestamp(trade.fill_timestamp.as_deref()),
        })
    }

    fn to_margin(&self, raw: &Value) -> Result<Margin> {
        let margin: MarginRaw = serde_json::from_value(raw.clone())?;
        Ok(Margin {
            total: margin.initial.total,
            span: margin.initial.span,
            exposure: margin.initial.exposure,
            option_premium: margin.initial.option_premium,
            final_total: margin.final_leg.total,
            benefit: margin.initial.total - margin.final_leg.total,
        })
    }

    fn parse_error(&self, raw: &Value) -> DalalError {
        let code = raw
            .get("error_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let message = raw
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        let broker_code = BrokerCode(Some(code.clone()));
        match code.as_str() {
            "TokenException" | "PermissionException" => DalalError::Authentication {
                message,
                code: broker_code,
            },
            "OrderException" => DalalError::Order {
                message,
                code: broker_code,
            },
            "InputException" => DalalError::InvalidOrder {
                message,
                code: broker_code,
            },
            "MarginException" => DalalError::InsufficientFunds {
                message,
                code: broker_code,
            },
            "NetworkException" => DalalError::Broker {
                message,
                code: broker_code,
            },
            _ => DalalError::Broker {
                message,
                code: broker_code,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> ZerodhaTransformer {
        ZerodhaTransformer
    }

    #[test]
    fn trigger_pending_folds_to_pending() {
        let raw = json!({
            "order_id": "12345",
            "status": "TRIGGER PENDING",
            "transaction_type": "BUY",
            "quantity": 10,
            "filled_quantity": 0,
            "product": "CNC",
            "order_type": "LIMIT",
            "price": 100.0,
            "order_timestamp": "2026-02-21T10:00:00"
        });
        let order = transformer().to_order(&raw).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.side, Side::Buy);
        assert!(order.timestamp.is_some());
    }

    #[test]
    fn unknown_status_folds_to_pending() {
        assert_eq!(normalize_status("SOME NEW STATE"), OrderStatus::Pending);
        assert_eq!(normalize_status("AMO REQ RECEIVED"), OrderStatus::Pending);
        assert_eq!(normalize_status("MODIFY PENDING"), OrderStatus::Open);
        assert_eq!(normalize_status("CANCEL PENDING"), OrderStatus::Open);
        assert_eq!(normalize_status("COMPLETE"), OrderStatus::Complete);
    }

    #[test]
    fn holding_computes_pnl_percent() {
        let raw = json!({
            "tradingsymbol": "SBIN",
            "exchange": "NSE",
            "quantity": 10,
            "average_price": 400.0,
            "last_price": 440.0,
            "pnl": 400.0
        });
        let holding = transformer().to_holding(&raw).unwrap();
        assert!((holding.pnl_percent - 10.0).abs() < 1e-9);
        assert_eq!(holding.instrument.symbol(), "SBIN");
        assert_eq!(holding.instrument.exchange(), Exchange::NSE);
    }

    #[test]
    fn holding_with_zero_avg_price_does_not_divide() {
        let raw = json!({
            "tradingsymbol": "SBIN",
            "exchange": "NSE",
            "quantity": 10,
            "average_price": 0.0,
            "last_price": 440.0,
            "pnl": 0.0
        });
        let holding = transformer().to_holding(&raw).unwrap();
        assert_eq!(holding.pnl_percent, 0.0);
    }

    #[test]
    fn trade_value_is_qty_times_price() {
        let raw = json!({
            "order_id": "12345",
            "tradingsymbol": "SBIN",
            "exchange": "NSE",
            "transaction_type": "BUY",
            "quantity": 5,
            "average_price": 200.0,
            "fill_timestamp": "2026-02-21 10:05:00"
        });
        let trade = transformer().to_trade(&raw).unwrap();
        assert!((trade.trade_value - 1000.0).abs() < 1e-9);
        assert_eq!(trade.qty, 5);
    }

    #[test]
    fn margin_computes_benefit() {
        let raw = json!({
            "initial": {
                "total": 100000.0,
                "span": 80000.0,
                "exposure": 20000.0,
                "option_premium": 0.0
            },
            "final": { "total": 70000.0 }
        });
        let margin = transformer().to_margin(&raw).unwrap();
        assert!((margin.benefit - 30000.0).abs() < 1e-9);
        assert!((margin.final_total - 70000.0).abs() < 1e-9);
    }

    #[test]
    fn token_exception_maps_to_authentication() {
        let raw = json!({
            "status": "error",
            "error_type": "TokenException",
            "message": "Invalid token"
        });
        let err = transformer().parse_error(&raw);
        assert!(matches!(err, DalalError::Authentication { .. }));
        assert_eq!(err.broker_code(), Some("TokenException"));
    }

    #[test]
    fn unknown_error_type_maps_to_broker() {
        let raw = json!({
            "status": "error",
            "error_type": "SomethingNew",
            "message": "?"
        });
        assert!(matches!(
            transformer().parse_error(&raw),
            DalalError::Broker { .. }
        ));
    }

    #[test]
    fn order_params_include_trigger_only_when_set() {
        let request = OrderRequest {
            token: "738561".into(),
            broker_symbol: "RELIANCE".into(),
            exchange: Exchange::NSE,
            qty: 10,
            side: Side::Buy,
            product: ProductType::CNC,
            order_type: OrderType::Limit,
            price: Some(1300.0),
            trigger_price: None,
        };
        let params = transformer().to_order_params(&request);
        assert_eq!(params["tradingsymbol"], "RELIANCE");
        assert_eq!(params["transaction_type"], "BUY");
        assert_eq!(params["price"], 1300.0);
        assert!(params.get("trigger_price").is_none());
    }

    #[test]
    fn close_params_offset_the_position() {
        let position = json!({
            "tradingsymbol": "NIFTY26FEBFUT",
            "exchange": "NFO",
            "quantity": 50,
            "average_price": 23100.0,
            "last_price": 23150.0,
            "pnl": 2500.0,
            "product": "NRML"
        });
        let params = transformer()
            .to_close_params(&position, 50, Side::Sell)
            .unwrap();
        assert_eq!(params["transaction_type"], "SELL");
        assert_eq!(params["order_type"], "MARKET");
        assert_eq!(params["quantity"], 50);
        assert_eq!(params["product"], "NRML");
    }
}
