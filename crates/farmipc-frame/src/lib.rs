//! Length-prefixed message framing for farmipc.
//!
//! One frame carries exactly one message payload:
//! - A 2-byte magic number ("FM") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! Readers always hand out complete payloads; partial reads are buffered.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
