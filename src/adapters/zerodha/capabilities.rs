//! The Zerodha capability matrix.
//!
use crate::capabilities::Capabilities;
use crate::models::enums::{AuthMode, Exchange, OrderType, ProductType};

/// What Zerodha supports. Frozen at compile time.
pub const ZERODHA_CAPABILITIES: Capabilities = Capabilities {
    broker_id: super::BROKER_ID,
    segments: &[
        Exchange::NSE,
        Exchange::BSE,
        Exchange::NFO,
        Exchange::BFO,
        Exchange::CDS,
    ],
    order_types: &[
        OrderType::Market,
        OrderType::Limit,
        OrderType::Sl,
        OrderType::SlM,
    ],
    product_types: &[ProductType::CNC, ProductType::MIS, ProductType::NRML],
    auth_modes: &[AuthMode::Manual, AuthMode::Auto],
};
