use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use farmipc_frame::{FrameConfig, FrameError, FrameWriter};
use farmipc_transport::{Endpoint, IpcStream, TransportError, UnixDomainSocket};
use tracing::{debug, warn};

use crate::config::SocketConfig;
use crate::context::SocketToken;
use crate::error::{Result, SocketError};
use crate::listener::Acceptor;

/// Sending end of a push/pull pipeline.
///
/// A bound push socket distributes messages round-robin over every pull peer
/// connected to it. A connected push socket delivers to the pull socket bound
/// at its endpoint, retrying in the background until that peer appears.
/// Either way, messages are queued up to the high-water mark while no peer is
/// reachable, and the queue is discarded when the socket is dropped.
pub struct PushSocket {
    endpoint: Endpoint,
    mode: PushMode,
    _token: SocketToken,
}

enum PushMode {
    Bound(BoundPush),
    Connected(ConnectedPush),
}

impl PushSocket {
    pub(crate) fn bind(
        endpoint: &Endpoint,
        token: SocketToken,
        config: &SocketConfig,
    ) -> Result<Self> {
        let bound = BoundPush::spawn(endpoint, config)?;
        debug!(%endpoint, "push socket bound");
        Ok(Self {
            endpoint: endpoint.clone(),
            mode: PushMode::Bound(bound),
            _token: token,
        })
    }

    pub(crate) fn connect(
        endpoint: &Endpoint,
        token: SocketToken,
        config: &SocketConfig,
    ) -> Result<Self> {
        let connected = ConnectedPush::spawn(endpoint, config)?;
        debug!(%endpoint, connected = connected.lock().writer.is_some(), "push socket connecting");
        Ok(Self {
            endpoint: endpoint.clone(),
            mode: PushMode::Connected(connected),
            _token: token,
        })
    }

    /// Queue one message and deliver as much of the queue as possible.
    ///
    /// Fails with [`SocketError::QueueFull`] when the high-water mark is
    /// reached and no peer drains the queue.
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        match &mut self.mode {
            PushMode::Bound(bound) => bound.send(payload),
            PushMode::Connected(connected) => connected.send(payload),
        }
    }

    /// Number of messages waiting for a peer.
    pub fn pending(&self) -> usize {
        match &self.mode {
            PushMode::Bound(bound) => bound.lock().queue.len(),
            PushMode::Connected(connected) => connected.lock().queue.len(),
        }
    }

    /// Number of pull peers currently attached (0 or 1 for a connected socket).
    pub fn peer_count(&self) -> usize {
        match &self.mode {
            PushMode::Bound(bound) => bound.lock().peers.len(),
            PushMode::Connected(connected) => usize::from(connected.lock().writer.is_some()),
        }
    }

    /// Endpoint this socket binds or connects to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether this socket owns the endpoint (bind) rather than connecting to it.
    pub fn is_bound(&self) -> bool {
        matches!(self.mode, PushMode::Bound(_))
    }
}

impl std::fmt::Debug for PushSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushSocket")
            .field("endpoint", &self.endpoint)
            .field("bound", &self.is_bound())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Messages accepted by `send` but not yet written to a peer.
struct OutboundQueue {
    messages: VecDeque<Bytes>,
    high_water_mark: usize,
    max_payload_size: usize,
}

impl OutboundQueue {
    fn new(config: &SocketConfig) -> Self {
        Self {
            messages: VecDeque::new(),
            high_water_mark: config.send_high_water_mark,
            max_payload_size: config.max_payload_size,
        }
    }

    fn push(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            }
            .into());
        }
        if self.messages.len() >= self.high_water_mark {
            return Err(SocketError::QueueFull(self.messages.len()));
        }
        self.messages.push_back(Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}

struct PushPeers {
    peers: Vec<FrameWriter<IpcStream>>,
    next: usize,
    queue: OutboundQueue,
}

impl PushPeers {
    /// Hand queued messages to peers, round-robin. A peer whose write fails is
    /// dropped and the message stays queued for the next one.
    fn flush(&mut self, endpoint: &Endpoint) {
        while let Some(payload) = self.queue.messages.front() {
            if self.peers.is_empty() {
                return;
            }
            let index = self.next % self.peers.len();
            match self.peers[index].send(payload) {
                Ok(()) => {
                    self.queue.messages.pop_front();
                    self.next = index + 1;
                }
                Err(err) => {
                    debug!(%endpoint, error = %err, "dropping pull peer");
                    self.peers.remove(index);
                }
            }
        }
    }
}

struct BoundPush {
    endpoint: Endpoint,
    shared: Arc<Mutex<PushPeers>>,
    acceptor: Option<Acceptor>,
}

impl BoundPush {
    fn spawn(endpoint: &Endpoint, config: &SocketConfig) -> Result<Self> {
        let shared = Arc::new(Mutex::new(PushPeers {
            peers: Vec::new(),
            next: 0,
            queue: OutboundQueue::new(config),
        }));

        let acceptor = {
            let shared = Arc::clone(&shared);
            let frame_config = config.frame_config();
            let peer_endpoint = endpoint.clone();
            Acceptor::spawn(endpoint, move |stream| {
                let mut peers = lock(&shared);
                peers
                    .peers
                    .push(FrameWriter::with_config(stream, frame_config.clone()));
                debug!(endpoint = %peer_endpoint, peers = peers.peers.len(), "pull peer attached");
                peers.flush(&peer_endpoint);
            })?
        };

        Ok(Self {
            endpoint: endpoint.clone(),
            shared,
            acceptor: Some(acceptor),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PushPeers> {
        lock(&self.shared)
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let endpoint = self.endpoint.clone();
        let mut peers = self.lock();
        peers.flush(&endpoint);
        peers.queue.push(payload)?;
        peers.flush(&endpoint);
        Ok(())
    }
}

impl Drop for BoundPush {
    fn drop(&mut self) {
        drop(self.acceptor.take());
    }
}

fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connection state of a connected push socket, shared with its retry thread.
struct ConnectedLink {
    endpoint: Endpoint,
    writer: Option<FrameWriter<IpcStream>>,
    queue: OutboundQueue,
    frame_config: FrameConfig,
}

impl ConnectedLink {
    /// Connect if not connected. An absent peer is not an error.
    fn try_connect(&mut self) -> Result<bool> {
        if self.writer.is_some() {
            return Ok(true);
        }
        match UnixDomainSocket::connect_endpoint(&self.endpoint) {
            Ok(stream) => {
                self.writer = Some(FrameWriter::with_config(stream, self.frame_config.clone()));
                Ok(true)
            }
            Err(err) if err.is_peer_absent() => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Write queued messages in order. A broken connection is discarded and
    /// the message that failed stays at the head of the queue for the next
    /// connection.
    fn flush(&mut self) -> Result<()> {
        while let Some(payload) = self.queue.messages.front().cloned() {
            if !self.try_connect()? {
                return Ok(());
            }
            let Some(writer) = self.writer.as_mut() else {
                return Ok(());
            };
            match writer.send(&payload) {
                Ok(()) => {
                    self.queue.messages.pop_front();
                }
                Err(err) => {
                    debug!(endpoint = %self.endpoint, error = %err, "pull peer went away");
                    self.writer = None;
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// A push socket that connects to a bound pull socket.
///
/// A retry thread wakes every reconnect interval and flushes the queue, so
/// messages sent while the peer was absent are delivered once it binds.
struct ConnectedPush {
    shared: Arc<Mutex<ConnectedLink>>,
    stopping: Arc<AtomicBool>,
    retry: Option<JoinHandle<()>>,
}

impl ConnectedPush {
    fn spawn(endpoint: &Endpoint, config: &SocketConfig) -> Result<Self> {
        let mut link = ConnectedLink {
            endpoint: endpoint.clone(),
            writer: None,
            queue: OutboundQueue::new(config),
            frame_config: config.frame_config(),
        };
        link.try_connect()?;
        let shared = Arc::new(Mutex::new(link));
        let stopping = Arc::new(AtomicBool::new(false));

        let retry = {
            let shared = Arc::clone(&shared);
            let stopping = Arc::clone(&stopping);
            let interval = config.reconnect_interval;
            std::thread::Builder::new()
                .name(format!("farmipc-push:{}", endpoint.path().display()))
                .spawn(move || retry_loop(&shared, &stopping, interval))
                .map_err(TransportError::Io)?
        };

        Ok(Self {
            shared,
            stopping,
            retry: Some(retry),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ConnectedLink> {
        lock(&self.shared)
    }

    fn send(&mut self, payload: &[u8]) -> Result<()> {
        let mut link = self.lock();
        link.flush()?;
        link.queue.push(payload)?;
        link.flush()
    }
}

fn retry_loop(shared: &Mutex<ConnectedLink>, stopping: &AtomicBool, interval: Duration) {
    while !stopping.load(Ordering::SeqCst) {
        std::thread::park_timeout(interval);
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        let mut link = lock(shared);
        if link.queue.messages.is_empty() {
            continue;
        }
        if let Err(err) = link.flush() {
            debug!(endpoint = %link.endpoint, error = %err, "background delivery failed");
        }
    }
}

impl Drop for ConnectedPush {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(retry) = self.retry.take() {
            retry.thread().unpark();
            if retry.join().is_err() {
                warn!(endpoint = %self.lock().endpoint, "push retry thread panicked");
            }
        }
    }
}
