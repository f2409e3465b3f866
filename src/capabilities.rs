//! Per-broker capability matrices.
//!
//! Venues differ: not every broker serves every segment, order type, product
//! type or auth mode. Rather than hiding those differences, each adapter
//! publishes a frozen [`Capabilities`] record and every order placement is
//! checked against it *before* any HTTP is issued - a rejected capability
//! check costs nothing and carries a message naming the broker and the
//! unsupported attribute.
//!
use crate::error::{DalalError, Result};
use crate::models::enums::{AuthMode, Exchange, OrderType, ProductType};
use crate::models::instrument::Instrument;

/// Declarative description of what a broker supports.
///
/// Constructed as a `const` per adapter; never mutated.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub broker_id: &'static str,
    /// Exchange segments orders may be routed to.
    pub segments: &'static [Exchange],
    pub order_types: &'static [OrderType],
    pub product_types: &'static [ProductType],
    pub auth_modes: &'static [AuthMode],
}

impl Capabilities {
    /// Verify an order against this capability matrix.
    ///
    /// Indices are rejected unconditionally - they are subscription-only.
    /// For derivatives the check runs against the instrument's *routing*
    /// venue (NFO/BFO), not the cash venue the user addressed it by.
    pub fn verify(
        &self,
        instrument: &Instrument,
        order_type: OrderType,
        product_type: ProductType,
    ) -> Result<()> {
        if !instrument.is_tradeable() {
            return Err(DalalError::unsupported(
                "Indices are not tradeable. Use an equity, future, or option instead.",
            ));
        }
        let venue = self.routing_venue(instrument);
        if !self.segments.contains(&venue) {
            return Err(DalalError::unsupported(format!(
                "{} does not support the {} segment",
                self.broker_id, venue
            )));
        }
        if !self.order_types.contains(&order_type) {
            return Err(DalalError::unsupported(format!(
                "{} does not support {} orders",
                self.broker_id, order_type
            )));
        }
        if !self.product_types.contains(&product_type) {
            return Err(DalalError::unsupported(format!(
                "{} does not support the {} product type",
                self.broker_id, product_type
            )));
        }
        Ok(())
    }

    /// Verify the configured auth mode. Runs once, at adapter construction.
    pub fn verify_auth_mode(&self, mode: AuthMode) -> Result<()> {
        if !self.auth_modes.contains(&mode) {
            let mut supported: Vec<&str> = self.auth_modes.iter().map(|m| m.as_str()).collect();
            supported.sort_unstable();
            return Err(DalalError::unsupported(format!(
                "{} does not support auth_mode='{}'. Supported: {}",
                self.broker_id,
                mode,
                supported.join(", ")
            )));
        }
        Ok(())
    }

    // The venue an order for this instrument is routed to.
    fn routing_venue(&self, instrument: &Instrument) -> Exchange {
        match instrument {
            Instrument::Future { exchange, .. } | Instrument::Option { exchange, .. } => {
                match exchange {
                    Exchange::BSE => Exchange::BFO,
                    _ => Exchange::NFO,
                }
            }
            other => other.exchange(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::OptionType;
    use chrono::NaiveDate;

    const TEST_CAPS: Capabilities = Capabilities {
        broker_id: "test",
        segments: &[Exchange::NSE, Exchange::NFO],
        order_types: &[OrderType::Market, OrderType::Limit],
        product_types: &[ProductType::CNC, ProductType::NRML],
        auth_modes: &[AuthMode::Manual],
    };

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 26).unwrap()
    }

    #[test]
    fn index_is_rejected_unconditionally() {
        let idx = Instrument::index(Exchange::NSE, "NIFTY");
        let err = TEST_CAPS
            .verify(&idx, OrderType::Market, ProductType::CNC)
            .unwrap_err();
        assert!(matches!(err, DalalError::UnsupportedFeature { .. }));
    }

    #[test]
    fn unsupported_order_type_is_rejected() {
        let eq = Instrument::equity(Exchange::NSE, "SBIN");
        let err = TEST_CAPS
            .verify(&eq, OrderType::SlM, ProductType::CNC)
            .unwrap_err();
        assert!(err.to_string().contains("SL_M"));
    }

    #[test]
    fn derivative_checks_routing_venue_not_cash_venue() {
        // NSE option routes to NFO, which this broker supports.
        let opt = Instrument::option(Exchange::NSE, "NIFTY", expiry(), 23000.0, OptionType::CE);
        assert!(TEST_CAPS
            .verify(&opt, OrderType::Limit, ProductType::NRML)
            .is_ok());

        // BSE option routes to BFO, which it does not.
        let bfo = Instrument::option(Exchange::BSE, "SENSEX", expiry(), 81000.0, OptionType::PE);
        let err = TEST_CAPS
            .verify(&bfo, OrderType::Limit, ProductType::NRML)
            .unwrap_err();
        assert!(err.to_string().contains("BFO"));
    }

    #[test]
    fn auth_mode_check_names_broker_and_supported_modes() {
        let err = TEST_CAPS.verify_auth_mode(AuthMode::Auto).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("test"));
        assert!(msg.contains("auto"));
        assert!(msg.contains("manual"));
    }
}
