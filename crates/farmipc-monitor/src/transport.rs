//! The seam between the channel registry and the messaging sockets.

use std::time::Duration;

use bytes::Bytes;
use farmipc_socket::{Context, PullSocket, PushSocket, Result};
use farmipc_transport::Endpoint;

/// Sending half of a channel.
pub trait MessageSender {
    fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Messages accepted by `send` that no peer has taken yet.
    fn pending(&self) -> usize {
        0
    }
}

/// Receiving half of a channel.
pub trait MessageReceiver {
    /// Receive one message; `Ok(None)` when the receive timeout elapses.
    fn recv(&mut self) -> Result<Option<Bytes>>;

    /// Bound subsequent receives. `None` waits forever.
    fn set_receive_timeout(&mut self, timeout: Option<Duration>);
}

/// Factory for channel handles.
pub trait Transport {
    type Sender: MessageSender;
    type Receiver: MessageReceiver;

    /// Whether new handles may be created.
    fn is_running(&self) -> bool;

    fn push_connect(&self, endpoint: &Endpoint) -> Result<Self::Sender>;
    fn push_bind(&self, endpoint: &Endpoint) -> Result<Self::Sender>;
    fn pull_connect(&self, endpoint: &Endpoint) -> Result<Self::Receiver>;
    fn pull_bind(&self, endpoint: &Endpoint) -> Result<Self::Receiver>;
}

impl MessageSender for PushSocket {
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        PushSocket::send(self, payload)
    }

    fn pending(&self) -> usize {
        PushSocket::pending(self)
    }
}

impl MessageReceiver for PullSocket {
    fn recv(&mut self) -> Result<Option<Bytes>> {
        PullSocket::recv(self)
    }

    fn set_receive_timeout(&mut self, timeout: Option<Duration>) {
        PullSocket::set_receive_timeout(self, timeout);
    }
}

impl Transport for Context {
    type Sender = PushSocket;
    type Receiver = PullSocket;

    fn is_running(&self) -> bool {
        Context::is_running(self)
    }

    fn push_connect(&self, endpoint: &Endpoint) -> Result<PushSocket> {
        Context::push_connect(self, endpoint)
    }

    fn push_bind(&self, endpoint: &Endpoint) -> Result<PushSocket> {
        Context::push_bind(self, endpoint)
    }

    fn pull_connect(&self, endpoint: &Endpoint) -> Result<PullSocket> {
        Context::pull_connect(self, endpoint)
    }

    fn pull_bind(&self, endpoint: &Endpoint) -> Result<PullSocket> {
        Context::pull_bind(self, endpoint)
    }
}
