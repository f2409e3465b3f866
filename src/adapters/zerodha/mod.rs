//! Zerodha Kite Connect adapter.
//!
//! Kite Connect is a set of REST-like HTTP APIs over `api.kite.trade` with
//! a daily gzipped CSV instrument dump and a binary WebSocket ticker.
//! Sessions are obtained either manually (the user completes the daily
//! OAuth login and supplies `access_token` in config) or automatically via
//! the TOTP two-factor flow against `kite.zerodha.com`.
//!
//! # Submodules
//!
//! - `adapter`: REST wiring and endpoint set.
//! - `auth`: manual/automated session management.
//! - `capabilities`: the frozen capability matrix.
//! - `parser`: CSV instrument dump → [`ParsedInstruments`].
//! - `transformer`: payload mapping and the Kite error-code table.
//! - `ticker`: the `wss://ws.kite.trade` streaming client.
//!
//! [`ParsedInstruments`]: crate::instruments::ParsedInstruments
//!
mod adapter;
mod auth;
mod capabilities;
pub mod parser;
pub(crate) mod transformer;
mod ticker;

pub use adapter::ZerodhaAdapter;
pub use capabilities::ZERODHA_CAPABILITIES;

/// The registry id for this adapter.
pub const BROKER_ID: &str = "zerodha";
