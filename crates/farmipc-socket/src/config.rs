use std::time::Duration;

use farmipc_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};

/// Default number of messages a push socket queues while no peer is reachable.
pub const DEFAULT_SEND_HIGH_WATER_MARK: usize = 1000;

/// Default delay between connection attempts of a connecting pull socket.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

/// Options applied to every socket created by a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    /// Maximum number of queued outbound messages per push socket.
    pub send_high_water_mark: usize,
    /// How long a connecting pull socket waits before retrying an absent peer.
    pub reconnect_interval: Duration,
    /// Largest payload accepted on send and on receive.
    pub max_payload_size: usize,
}

impl SocketConfig {
    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size,
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            send_high_water_mark: DEFAULT_SEND_HIGH_WATER_MARK,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
