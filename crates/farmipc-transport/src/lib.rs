//! Local IPC transport primitives.
//!
//! Provides the lowest layer of farmipc:
//! - [`Endpoint`] parsing for `ipc://` addresses
//! - Unix domain socket listeners ([`UnixDomainSocket`]) and streams ([`IpcStream`])
//! - [`TransportError`] with the transient/fatal split every upper layer relies on
//!
//! Everything else builds on top of the [`IpcStream`] type provided here.

pub mod endpoint;
pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use endpoint::{Endpoint, IPC_SCHEME};
pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
