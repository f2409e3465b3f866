//! AngelOne SmartAPI adapter.
//!
//! SmartAPI is a JSON-over-HTTPS API on `apiconnect.angelbroking.com` with
//! a JSON scrip-master dump and the SmartStream binary WebSocket feed.
//! Automated login (the AngelOne default) performs the TOTP password flow
//! and refreshes via the renew-token endpoint, falling back to a full
//! login when renewal fails.
//!
//! # Submodules
//!
//! - `adapter`: REST wiring and endpoint set.
//! - `auth`: TOTP login, token renewal, and the `X-*` header block the
//!   vendor requires on every request.
//! - `capabilities`: the frozen capability matrix.
//! - `parser`: scrip master JSON → [`ParsedInstruments`].
//! - `transformer`: payload mapping and the SmartAPI error-code table.
//! - `stream`: the SmartStream little-endian tick decoder and client.
//!
//! [`ParsedInstruments`]: crate::instruments::ParsedInstruments
//!
mod adapter;
mod auth;
mod capabilities;
pub mod parser;
pub(crate) mod stream;
pub(crate) mod transformer;

pub use adapter::AngelOneAdapter;
pub use capabilities::ANGELONE_CAPABILITIES;

/// The registry id for this adapter.
pub const BROKER_ID: &str = "angelone";
