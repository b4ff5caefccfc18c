//! Process state, statistics and command channels for data-acquisition farms.
//!
//! Workers report their lifecycle state and `name:value` statistics to a
//! collector over push/pull sockets on local IPC endpoints; the collector
//! pushes commands back.
//!
//! # Crate Structure
//!
//! - [`transport`]: Unix domain socket primitives and endpoint parsing
//! - [`frame`]: Length-prefixed message framing
//! - [`socket`]: Messaging context and push/pull sockets
//! - [`monitor`]: The channel registry used by workers and collectors

/// Re-export transport types.
pub mod transport {
    pub use farmipc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use farmipc_frame::*;
}

/// Re-export socket types.
pub mod socket {
    pub use farmipc_socket::*;
}

/// Re-export monitoring channel types.
pub mod monitor {
    pub use farmipc_monitor::*;
}

pub use farmipc_monitor::{
    ChannelEndpoints, ChannelRegistry, MonitorConfig, ProcessState, StatisticsMessage,
};
pub use farmipc_socket::{Context, SocketConfig};
