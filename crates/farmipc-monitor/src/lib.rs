//! Monitoring channels for a data-acquisition farm.
//!
//! Worker processes report their [`ProcessState`] and `name:value`
//! statistics to a collector, and the collector sends commands back. All
//! three channels live in one [`ChannelRegistry`] per process:
//!
//! ```no_run
//! use farmipc_monitor::{ChannelEndpoints, ChannelRegistry, ProcessState};
//! use farmipc_socket::Context;
//!
//! let mut worker = ChannelRegistry::new(Context::default(), ChannelEndpoints::default());
//! worker.update_state(ProcessState::Running);
//! worker.send_statistics("events", "1024");
//! let command = worker.get_next_command();
//! # let _ = command;
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod state;
pub mod statistics;
pub mod transport;

pub use config::{
    ChannelAddresses, ChannelEndpoints, MonitorConfig, DEFAULT_COMMAND_ADDRESS,
    DEFAULT_STATE_ADDRESS, DEFAULT_STATISTICS_ADDRESS,
};
pub use error::{MonitorError, Outcome, Result};
pub use registry::{ChannelRegistry, RoleState};
pub use state::{ParseStateError, ProcessState, STATE_FRAME_SIZE};
pub use statistics::{StatisticsMessage, DELIMITER, ERROR_MESSAGE_NAME};
pub use transport::{MessageReceiver, MessageSender, Transport};
