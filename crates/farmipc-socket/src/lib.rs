//! Push/pull messaging sockets over local IPC.
//!
//! A [`Context`] hands out [`PushSocket`]s and [`PullSocket`]s. Either side of
//! a pipeline may bind the endpoint while the other connects:
//!
//! - push **connect** → pull **bind**: many producers, one collector
//! - push **bind** → pull **connect**: one distributor, many consumers
//!
//! Connecting sockets tolerate an absent peer: pushes are queued up to the
//! high-water mark and pulls keep retrying until the endpoint is bound.

mod listener;

pub mod config;
pub mod context;
pub mod error;
pub mod pull;
pub mod push;

pub use config::{SocketConfig, DEFAULT_RECONNECT_INTERVAL, DEFAULT_SEND_HIGH_WATER_MARK};
pub use context::Context;
pub use error::{Result, SocketError};
pub use farmipc_transport::Endpoint;
pub use pull::PullSocket;
pub use push::PushSocket;
