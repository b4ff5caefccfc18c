use std::fmt;

/// Separator between name and value on the statistics channel.
pub const DELIMITER: char = ':';

/// Statistic name under which free-text error reports travel.
pub const ERROR_MESSAGE_NAME: &str = "ErrorMessage";

/// A named statistic value, framed as `name:value`.
///
/// Neither side may be empty. The value may itself contain the delimiter;
/// the name may not if the message is to be parsed back unambiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsMessage {
    name: String,
    value: String,
}

impl StatisticsMessage {
    /// Build a message. Returns `None` when either side is empty.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Option<Self> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() || value.is_empty() {
            return None;
        }
        Some(Self { name, value })
    }

    /// An error report carrying `text`.
    pub fn error(text: impl Into<String>) -> Option<Self> {
        Self::new(ERROR_MESSAGE_NAME, text)
    }

    /// Split a received frame at its first delimiter.
    pub fn parse(frame: &str) -> Option<Self> {
        let (name, value) = frame.split_once(DELIMITER)?;
        Self::new(name, value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether this is an error report.
    pub fn is_error(&self) -> bool {
        self.name == ERROR_MESSAGE_NAME
    }

    /// Wire form, `name:value`.
    pub fn to_frame(&self) -> String {
        format!("{}{DELIMITER}{}", self.name, self.value)
    }
}

impl fmt::Display for StatisticsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{DELIMITER}{}", self.name, self.value)
    }
}
