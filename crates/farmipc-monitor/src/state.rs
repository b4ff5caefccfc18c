use std::fmt;
use std::str::FromStr;

/// Width of an encoded state frame.
pub const STATE_FRAME_SIZE: usize = 4;

/// Lifecycle state of a farm process.
///
/// `Timeout` is a sentinel: it is what a receiver reports when no valid state
/// arrived, and it is never put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ProcessState {
    #[default]
    Off = 0,
    Initialized = 1,
    Running = 2,
    Error = 3,
    Timeout = 4,
}

impl ProcessState {
    /// Every state a process can report, in wire order.
    pub const REPORTABLE: [ProcessState; 4] = [
        ProcessState::Off,
        ProcessState::Initialized,
        ProcessState::Running,
        ProcessState::Error,
    ];

    /// Wire ordinal.
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    /// Encode as a 4-byte little-endian ordinal. The sentinel has no encoding.
    pub fn encode(self) -> Option<[u8; STATE_FRAME_SIZE]> {
        match self {
            ProcessState::Timeout => None,
            state => Some(state.ordinal().to_le_bytes()),
        }
    }

    /// Decode a received state frame.
    ///
    /// A frame of the wrong width or carrying an unknown ordinal (including
    /// the sentinel's) decodes to [`ProcessState::Timeout`].
    pub fn decode(frame: &[u8]) -> ProcessState {
        let Ok(bytes) = <[u8; STATE_FRAME_SIZE]>::try_from(frame) else {
            return ProcessState::Timeout;
        };
        match u32::from_le_bytes(bytes) {
            0 => ProcessState::Off,
            1 => ProcessState::Initialized,
            2 => ProcessState::Running,
            3 => ProcessState::Error,
            _ => ProcessState::Timeout,
        }
    }

    /// Lower-case name, as printed and parsed by tooling.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Off => "off",
            ProcessState::Initialized => "initialized",
            ProcessState::Running => "running",
            ProcessState::Error => "error",
            ProcessState::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown process state {0:?} (expected off, initialized, running or error)")]
pub struct ParseStateError(String);

impl FromStr for ProcessState {
    type Err = ParseStateError;

    /// Parses the reportable states. The sentinel is not accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessState::REPORTABLE
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}
