//! Guardian pre-configured action daemon.
//!
//! Service layer over [`teller_core`]: a durable [`store::ActionStore`],
//! the [`registry::ActionRegistry`] owning the capability lifecycle, the
//! [`executor::ActionExecutor`] applying the transfer fraud gate, the
//! periodic [`sweep::ExpirySweeper`], Prometheus [`metrics`], TOML
//! [`config`], and the JSON [`protocol`] served by the `tellerd` binary
//! over a Unix socket.

pub mod config;
pub mod executor;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod store;
pub mod sweep;
