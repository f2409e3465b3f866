//! The AngelOne capability matrix.
//!
use crate::capabilities::Capabilities;
use crate::models::enums::{AuthMode, Exchange, OrderType, ProductType};

/// What AngelOne supports. Frozen at compile time.
///
/// Note the absence of BFO: SmartAPI does not serve BSE derivatives, which
/// is exactly the kind of venue difference the capability check surfaces
/// before any HTTP is spent.
pub const ANGELONE_CAPABILITIES: Capabilities = Capabilities {
    broker_id: super::BROKER_ID,
    segments: &[
        Exchange::NSE,
        Exchange::BSE,
        Exchange::NFO,
        Exchange::CDS,
        Exchange::MCX,
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
