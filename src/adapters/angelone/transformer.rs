//! SmartAPI payload mapping.
//!
//! SmartAPI quotes most numeric fields as strings and uses its own order
//! vocabulary (`DELIVERY`/`INTRADAY`/`CARRYFORWARD`, `STOPLOSS_LIMIT`,
//! lowercase statuses). This module owns both directions of that
//! translation plus the error-code table.
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

/// SmartAPI responses quote numbers as strings or numbers interchangeably.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum NumField {
    Num(f64),
    Str(String),
}

impl Default for NumField {
    fn default() -> Self {
        NumField::Str(String::new())
    }
}

impl NumField {
    fn as_f64(&self) -> f64 {
        match self {
            NumField::Num(n) => *n,
            NumField::Str(s) => s.parse().unwrap_or(0.0),
        }
    }

    fn as_i64(&self) -> i64 {
        match self {
            NumField::Num(n) => *n as i64,
            NumField::Str(s) => s.parse().unwrap_or(0),
        }
    }

    fn as_opt_f64(&self) -> Option<f64> {
        match self {
            NumField::Num(n) => Some(*n),
            NumField::Str(s) if s.is_empty() => None,
            NumField::Str(s) => s.parse().ok(),
        }
    }
}

/// Canonical product → SmartAPI product.
fn product_to_vendor(product: ProductType) -> &'static str {
    match product {
        ProductType::CNC => "DELIVERY",
        ProductType::MIS => "INTRADAY",
        ProductType::NRML => "CARRYFORWARD",
    }
}

fn product_from_vendor(raw: &str) -> Result<ProductType> {
    match raw {
        "DELIVERY" => Ok(ProductType::CNC),
        "INTRADAY" => Ok(ProductType::MIS),
        "CARRYFORWARD" | "NORMAL" => Ok(ProductType::NRML),
        other => Err(DalalError::Internal(format!(
            "unknown SmartAPI product: {}",
            other
        ))),
    }
}

/// Canonical order type → SmartAPI order type.
fn order_type_to_vendor(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Sl => "STOPLOSS_LIMIT",
        OrderType::SlM => "STOPLOSS_MARKET",
    }
}

fn order_type_from_vendor(raw: &str) -> Result<OrderType> {
    match raw {
        "MARKET" => Ok(OrderType::Market),
        "LIMIT" => Ok(OrderType::Limit),
        "STOPLOSS_LIMIT" => Ok(OrderType::Sl),
        "STOPLOSS_MARKET" => Ok(OrderType::SlM),
        other => Err(DalalError::Internal(format!(
            "unknown SmartAPI order type: {}",
            other
        ))),
    }
}

/// Fold a SmartAPI order status (lowercase on the wire) into the canonical
/// five states; unknown folds to pending.
pub(crate) fn normalize_status(raw: &str) -> OrderStatus {
    match raw.to_uppercase().as_str() {
        "OPEN" => OrderStatus::Open,
        "COMPLETE" => OrderStatus::Complete,
        "CANCELLED" | "CANCELLED AMO" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Rejected,
        "MODIFY PENDING" | "MODIFY VALIDATION PENDING" | "CANCEL PENDING" => OrderStatus::Open,
        _ => OrderStatus::Pending,
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    let naive = NaiveDateTime::parse_from_str(raw, "%d-%b-%Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()?;
    naive
        .and_local_timezone(ist_offset())
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn cash_instrument(exchange: &str, symbol: &str) -> Option<Instrument> {
    Exchange::parse(exchange).map(|exchange| Instrument::equity(exchange, symbol))
}

fn parse_side(raw: &str) -> Result<Side> {
    Side::parse(raw)
        .ok_or_else(|| DalalError::Internal(format!("unknown SmartAPI transaction type: {}", raw)))
}

#[derive(Deserialize)]
struct ProfileRaw {
    clientcode: String,
    name: String,
    email: String,
    #[serde(default)]
    mobileno: Option<String>,
}

#[derive(Deserialize)]
struct FundsRaw {
    net: NumField,
    availablecash: NumField,
    #[serde(default)]
    utiliseddebits: NumField,
    #[serde(default)]
    collateral: NumField,
    #[serde(default)]
    m2munrealized: NumField,
    #[serde(default)]
    m2mrealized: NumField,
}

#[derive(Deserialize)]
struct HoldingRaw {
    tradingsymbol: String,
    exchange: String,
    quantity: NumField,
    averageprice: NumField,
    ltp: NumField,
    #[serde(default)]
    profitandloss: NumField,
}

#[derive(Deserialize)]
struct PositionRaw {
    tradingsymbol: String,
    exchange: String,
    netqty: NumField,
    #[serde(default)]
    netprice: NumField,
    #[serde(default)]
    ltp: NumField,
    #[serde(default)]
    pnl: NumField,
    producttype: String,
}

#[derive(Deserialize)]
struct CloseTargetRaw {
    tradingsymbol: String,
    symboltoken: String,
    exchange: String,
    producttype: String,
}

#[derive(Deserialize)]
struct OrderRowRaw {
    orderid: String,
    #[serde(default)]
    tradingsymbol: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    transactiontype: String,
    quantity: NumField,
    #[serde(default)]
    filledshares: NumField,
    producttype: String,
    ordertype: String,
    #[serde(default, alias = "orderstatus")]
    status: String,
    #[serde(default)]
    price: NumField,
    #[serde(default)]
    triggerprice: NumField,
    #[serde(default)]
    averageprice: NumField,
    #[serde(default)]
    updatetime: Option<String>,
}

#[derive(Deserialize)]
struct TradeRowRaw {
    orderid: String,
    tradingsymbol: String,
    exchange: String,
    transactiontype: String,
    fillsize: NumField,
    fillprice: NumField,
    #[serde(default)]
    filltime: Option<String>,
}

/// The SmartAPI transformer. Stateless - one shared instance per adapter.
pub struct AngelOneTransformer;

impl Transformer for AngelOneTransformer {
    fn to_order_params(&self, request: &OrderRequest) -> Value {
        let mut params = json!({
            "variety": "NORMAL",
            "tradingsymbol": request.broker_symbol,
            "symboltoken": request.token,
            "transactiontype": request.side.as_str(),
            "exchange": request.exchange.as_str(),
            "ordertype": order_type_to_vendor(request.order_type),
            "producttype": product_to_vendor(request.product),
            "duration": "DAY",
            "quantity": request.qty.to_string(),
        });
        if let Some(price) = request.price {
            params["price"] = json!(price.to_string());
        }
        if let Some(trigger_price) = request.trigger_price {
            params["triggerprice"] = json!(trigger_price.to_string());
        }
        params
    }

    fn to_order_id(&self, raw: &Value) -> Result<String> {
        raw.get("orderid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DalalError::Internal("SmartAPI order response without orderid".into()))
    }

    fn to_close_params(&self, position_raw: &Value, qty: i64, side: Side) -> Result<Value> {
        let target: CloseTargetRaw = serde_json::from_value(position_raw.clone())?;
        Ok(json!({
            "variety": "NORMAL",
            "tradingsymbol": target.tradingsymbol,
            "symboltoken": target.symboltoken,
            "transactiontype": side.as_str(),
            "exchange": target.exchange,
            "ordertype": "MARKET",
            "producttype": target.producttype,
            "duration": "DAY",
            "quantity": qty.to_string(),
        }))
    }

    fn to_profile(&self, raw: &Value) -> Result<Profile> {
        let profile: ProfileRaw = serde_json::from_value(raw.clone())?;
        Ok(Profile {
            client_id: profile.clientcode,
            name: profile.name,
            email: profile.email,
            phone: profile.mobileno.filter(|m| !m.is_empty()),
        })
    }

    fn to_fund(&self, raw: &Value) -> Result<Fund> {
        let funds: FundsRaw = serde_json::from_value(raw.clone())?;
        Ok(Fund {
            available: funds.availablecash.as_f64(),
            used: funds.utiliseddebits.as_f64(),
            total: funds.net.as_f64(),
            collateral: funds.collateral.as_f64(),
            m2m_unrealized: funds.m2munrealized.as_f64(),
            m2m_realized: funds.m2mrealized.as_f64(),
        })
    }

    fn to_holding(&self, raw: &Value) -> Result<Holding> {
        let holding: HoldingRaw = serde_json::from_value(raw.clone())?;
        let qty = holding.quantity.as_i64();
        let avg_price = holding.averageprice.as_f64();
        let pnl = holding.profitandloss.as_f64();
        let cost = avg_price * qty as f64;
        let instrument = cash_instrument(&holding.exchange, &holding.tradingsymbol)
            .ok_or_else(|| {
                DalalError::Internal(format!("unknown holding exchange: {}", holding.exchange))
            })?;
        Ok(Holding {
            instrument,
            qty,
            avg_price,
            ltp: holding.ltp.as_f64(),
            pnl,
            pnl_percent: if cost == 0.0 { 0.0 } else { pnl / cost * 100.0 },
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
            qty: position.netqty.as_i64(),
            avg_price: position.netprice.as_f64(),
            ltp: position.ltp.as_f64(),
            pnl: position.pnl.as_f64(),
            product: product_from_vendor(&position.producttype)?,
        })
    }

    fn to_order(&self, raw: &Value) -> Result<Order> {
        let order: OrderRowRaw = serde_json::from_value(raw.clone())?;
        let instrument = match (&order.exchange, &order.tradingsymbol) {
            (Some(exchange), Some(symbol)) => cash_instrument(exchange, symbol),
            _ => None,
        };
        Ok(Order {
            id: order.orderid,
            instrument,
            side: parse_side(&order.transactiontype)?,
            qty: order.quantity.as_i64(),
            filled_qty: order.filledshares.as_i64(),
            product: product_from_vendor(&order.producttype)?,
            order_type: order_type_from_vendor(&order.ordertype)?,
            status: normalize_status(&order.status),
            price: order.price.as_opt_f64().filter(|p| *p != 0.0),
            trigger_price: order.triggerprice.as_opt_f64().filter(|p| *p != 0.0),
            avg_price: order.averageprice.as_opt_f64().filter(|p| *p != 0.0),
            timestamp: parse_timestamp(order.updatetime.as_deref()),
        })
    }

    fn to_trade(&self, raw: &Value) -> Result<Trade> {
        let trade: TradeRowRaw = serde_json::from_value(raw.clone())?;
        let qty = trade.fillsize.as_i64();
        let avg_price = trade.fillprice.as_f64();
        Ok(Trade {
            order_id: trade.orderid,
            instrument: cash_instrument(&trade.exchange, &trade.tradingsymbol),
            side: parse_side(&trade.transactiontype)?,
            qty,
            avg_price,
            trade_value: qty as f64 * avg_price,
            timestamp: parse_timestamp(trade.filltime.as_deref()),
        })
    }

    fn to_margin(&self, _raw: &Value) -> Result<Margin> {
        Err(DalalError::unsupported(
            "angelone does not support margin calculation",
        ))
    }

    fn parse_error(&self, raw: &Value) -> DalalError {
        let code = raw
            .get("errorcode")
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
            "AG8001" | "AG8002" | "AG8003" | "AB8050" | "AB8051" | "AB1010" | "AB1011" => {
                DalalError::Authentication {
                    message,
                    code: broker_code,
                }
            }
            "AB1009" | "AB1018" => DalalError::InstrumentNotFound {
                message,
                code: broker_code,
            },
            "AB1013" => DalalError::OrderNotFound {
                message,
                code: broker_code,
            },
            "AB1008" | "AB1012" | "AB4008" => DalalError::InvalidOrder {
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
