//! > **Dalal** (IPA: /dəˈlaːl/) n.: a broker or middleman; the word behind
//! > Dalal Street, the Mumbai address of the Bombay Stock Exchange and the
//! > colloquial name for the Indian capital markets.
//!
//! An asynchronous unified client library for Indian retail brokerage APIs.
//! One canonical surface - profile and funds, portfolio, order lifecycle,
//! real-time market data - over vendors whose REST payloads, authentication
//! flows, error codes, instrument masters and binary streaming encodings
//! all differ. Currently wired: Zerodha Kite Connect and AngelOne SmartAPI.
//!
//! # What `dalal` gives you
//!
//! - **Canonical instruments**: address a contract by what you know -
//!   `Equity(NSE, "SBIN")`, `Option(NSE, "NIFTY", expiry, 23000.0, CE)` -
//!   and let the resolver translate to vendor tokens from a daily-refreshed
//!   SQLite instrument master with referential integrity across indices,
//!   equities, futures and options.
//! - **Capability-aware adapters**: venue differences are first-class. An
//!   unsupported order type, product, segment or auth mode fails locally
//!   with a clear message before any HTTP is spent.
//! - **One error taxonomy**: vendor error tables are folded into typed
//!   variants (`Authentication`, `InvalidOrder`, `InstrumentNotFound`, ...)
//!   carrying the raw broker code.
//! - **Streaming**: each vendor's binary tick protocol is decoded into one
//!   [`Tick`] shape, with reconnect-and-resubscribe handled inside the
//!   client.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dalal::models::enums::{Exchange, OrderType, ProductType, Side};
//! use dalal::models::Instrument;
//! use dalal::{Config, DalalClient};
//!
//! #[tokio::main]
//! async fn main() -> dalal::Result<()> {
//!     tracing_subscriber::fmt()
//!         .with_max_level(tracing::Level::INFO)
//!         .init();
//!
//!     let config = Config::new()
//!         .set("api_key", std::env::var("ZERODHA_API_KEY").unwrap())
//!         .set("access_token", std::env::var("ZERODHA_ACCESS_TOKEN").unwrap())
//!         .set("cache_session", true);
//!
//!     let client = DalalClient::new("zerodha", config)?;
//!     client.init().await?;
//!
//!     let funds = client.get_funds().await?;
//!     println!("available: ₹{:.2}", funds.available);
//!
//!     let order_id = client
//!         .place_order(
//!             &Instrument::equity(Exchange::NSE, "SBIN"),
//!             1,
//!             Side::Buy,
//!             ProductType::CNC,
//!             OrderType::Limit,
//!             Some(800.0),
//!             None,
//!         )
//!         .await?;
//!     println!("placed {}", order_id);
//!
//!     let nifty = Instrument::index(Exchange::NSE, "NIFTY");
//!     client
//!         .subscribe(
//!             vec![nifty],
//!             Arc::new(|tick| {
//!                 Box::pin(async move {
//!                     println!("{} ltp={}", tick.instrument, tick.ltp);
//!                 })
//!             }),
//!         )
//!         .await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Disclaimer
//!
//! The software is provided "as-is" without any warranties, express or
//! implied. The author and contributors do not take responsibility for any
//! financial losses, damages, or other issues that may arise from the use
//! of this project.
#![warn(rust_2018_idioms)]

pub mod adapters;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
mod http;
pub mod instruments;
pub mod models;
pub mod session;
pub mod stream;

pub use adapters::supported_brokers;
pub use client::DalalClient;
pub use config::Config;
pub use error::{DalalError, Result};
pub use instruments::{InstrumentResolver, InstrumentStore, ResolvedInstrument};
pub use models::{Instrument, Tick};
pub use stream::{OnTick, StreamingClient};
