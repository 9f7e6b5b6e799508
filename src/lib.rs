//! # fincache
//!
//! An in-memory key-value store with Redis wire-protocol compatibility and
//! a parallel HTTP administrative surface, specialized for financial
//! workloads: market data fan-out, order-book maintenance, leaderboards,
//! scripted risk evaluation, cardinality-estimated velocity checks,
//! geospatial lookups, and schemaless document queries.
//!
//! ## Architecture
//!
//! A connection's framed request is dispatched to a command handler; the
//! handler acquires the keyspace (and possibly a typed sub-store) and
//! produces a response. Pub/sub publishes bypass the usual reply path and
//! push onto each subscriber's outbound queue. When cluster mode is
//! active the dispatcher consults the slot router and either serves
//! locally or returns a redirection.
//!
//! - [`shared::resp`] / [`types::Frame`] — wire framing
//! - [`store`] — keyspace, sorted/geo/document indices, register banks
//! - [`pubsub`] — channel and pattern fan-out
//! - [`script`] — sandboxed evaluation over a narrow capability object
//! - [`cluster`] — the 16,384-slot routing table with failover
//! - [`server`] — dispatch, connection tasks, sweepers, HTTP surface
//!
//! ## Example
//!
//! ```rust,no_run
//! use fincache::config::ServerConfig;
//! use fincache::server::Server;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::new(ServerConfig::default())?;
//!     let shutdown = CancellationToken::new();
//!     server.run(shutdown).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod pubsub;
pub mod script;
pub mod server;
pub mod shared;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use server::{AppState, Server};
