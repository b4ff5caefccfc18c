use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use farmipc_frame::{FrameConfig, FrameError, FrameReader};
use farmipc_transport::{Endpoint, IpcStream, UnixDomainSocket};
use tracing::{debug, warn};

use crate::config::SocketConfig;
use crate::context::SocketToken;
use crate::error::{Result, SocketError};
use crate::listener::Acceptor;

/// Longest a blocking receive waits before checking for an interrupt.
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Receiving end of a push/pull pipeline.
///
/// A bound pull socket collects messages from any number of connected push
/// peers into one fair queue. A connected pull socket reads from the single
/// push socket bound at its endpoint, (re)connecting whenever that peer is
/// absent.
///
/// A blocked [`recv`](PullSocket::recv) returns early with
/// `FrameError::Interrupted` when its context is interrupted.
pub struct PullSocket {
    endpoint: Endpoint,
    timeout: Option<Duration>,
    mode: PullMode,
    token: SocketToken,
}

enum PullMode {
    Bound(BoundPull),
    Connected(ConnectedPull),
}

impl PullSocket {
    pub(crate) fn bind(
        endpoint: &Endpoint,
        token: SocketToken,
        config: &SocketConfig,
    ) -> Result<Self> {
        let bound = BoundPull::spawn(endpoint, config.frame_config())?;
        debug!(%endpoint, "pull socket bound");
        Ok(Self {
            endpoint: endpoint.clone(),
            timeout: None,
            mode: PullMode::Bound(bound),
            token,
        })
    }

    pub(crate) fn connect(
        endpoint: &Endpoint,
        token: SocketToken,
        config: &SocketConfig,
    ) -> Result<Self> {
        let mut connected = ConnectedPull {
            endpoint: endpoint.clone(),
            reader: None,
            frame_config: config.frame_config(),
            reconnect_interval: config.reconnect_interval,
            retry_at: Instant::now(),
        };
        // Register with the peer right away when it is already there.
        connected.try_connect()?;
        debug!(%endpoint, connected = connected.reader.is_some(), "pull socket connecting");
        Ok(Self {
            endpoint: endpoint.clone(),
            timeout: None,
            mode: PullMode::Connected(connected),
            token,
        })
    }

    /// Limit how long [`recv`](Self::recv) waits. `None` waits forever.
    pub fn set_receive_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// The receive timeout currently in effect.
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the receive timeout elapses first, and
    /// `Err(SocketError::Frame(FrameError::Interrupted))` when
    /// [`Context::interrupt`](crate::Context::interrupt) is called meanwhile.
    pub fn recv(&mut self) -> Result<Option<Bytes>> {
        let wait = Wait {
            token: &self.token,
            seen: self.token.interrupts(),
            deadline: self.timeout.map(|timeout| Instant::now() + timeout),
        };
        match &mut self.mode {
            PullMode::Bound(bound) => bound.recv(&wait),
            PullMode::Connected(connected) => connected.recv(&wait),
        }
    }

    /// Endpoint this socket binds or connects to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether this socket owns the endpoint (bind) rather than connecting to it.
    pub fn is_bound(&self) -> bool {
        matches!(self.mode, PullMode::Bound(_))
    }
}

impl std::fmt::Debug for PullSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullSocket")
            .field("endpoint", &self.endpoint)
            .field("bound", &self.is_bound())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One blocking receive: its deadline and the interrupt count it started with.
struct Wait<'a> {
    token: &'a SocketToken,
    seen: u64,
    deadline: Option<Instant>,
}

impl Wait<'_> {
    /// How long to block before looking again, or `None` once the deadline
    /// has passed.
    fn next_slice(&self) -> Result<Option<Duration>> {
        if self.token.interrupts() != self.seen {
            return Err(FrameError::Interrupted.into());
        }
        Ok(match self.deadline {
            None => Some(INTERRUPT_POLL_INTERVAL),
            Some(deadline) => deadline
                .checked_duration_since(Instant::now())
                .filter(|left| !left.is_zero())
                .map(|left| left.min(INTERRUPT_POLL_INTERVAL)),
        })
    }
}

/// Connections feeding a bound pull socket, keyed so reader threads can
/// deregister themselves on exit.
#[derive(Default)]
struct Connections {
    next_id: u64,
    streams: HashMap<u64, IpcStream>,
    readers: Vec<JoinHandle<()>>,
}

struct BoundPull {
    queue: Receiver<Bytes>,
    connections: Arc<Mutex<Connections>>,
    acceptor: Option<Acceptor>,
}

impl BoundPull {
    fn spawn(endpoint: &Endpoint, frame_config: FrameConfig) -> Result<Self> {
        let (tx, queue) = mpsc::channel();
        let connections = Arc::new(Mutex::new(Connections::default()));

        let acceptor = {
            let connections = Arc::clone(&connections);
            let reader_endpoint = endpoint.clone();
            Acceptor::spawn(endpoint, move |stream| {
                spawn_reader(&reader_endpoint, stream, &tx, &connections, frame_config.clone());
            })?
        };

        Ok(Self {
            queue,
            connections,
            acceptor: Some(acceptor),
        })
    }

    fn recv(&mut self, wait: &Wait<'_>) -> Result<Option<Bytes>> {
        if let Ok(payload) = self.queue.try_recv() {
            return Ok(Some(payload));
        }
        loop {
            let Some(slice) = wait.next_slice()? else {
                return Ok(None);
            };
            match self.queue.recv_timeout(slice) {
                Ok(payload) => return Ok(Some(payload)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(SocketError::Closed),
            }
        }
    }
}

impl Drop for BoundPull {
    fn drop(&mut self) {
        // Stop accepting before tearing down the connections already handed out.
        drop(self.acceptor.take());

        let readers = {
            let mut connections = lock(&self.connections);
            for stream in connections.streams.values() {
                let _ = stream.shutdown();
            }
            std::mem::take(&mut connections.readers)
        };
        for reader in readers {
            let _ = reader.join();
        }
    }
}

fn spawn_reader(
    endpoint: &Endpoint,
    stream: IpcStream,
    tx: &Sender<Bytes>,
    connections: &Arc<Mutex<Connections>>,
    frame_config: FrameConfig,
) {
    let shutdown_handle = match stream.try_clone() {
        Ok(handle) => handle,
        Err(err) => {
            warn!(%endpoint, error = %err, "dropping connection: cannot clone stream");
            return;
        }
    };

    let mut guard = lock(connections);
    guard.readers.retain(|reader| !reader.is_finished());
    let id = guard.next_id;
    guard.next_id += 1;
    guard.streams.insert(id, shutdown_handle);

    let tx = tx.clone();
    let registry = Arc::clone(connections);
    let reader_endpoint = endpoint.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("farmipc-pull:{id}"))
        .spawn(move || {
            let mut reader = FrameReader::with_config(stream, frame_config);
            loop {
                match reader.read_frame() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(FrameError::Interrupted) => continue,
                    Err(FrameError::ConnectionClosed) => {
                        debug!(endpoint = %reader_endpoint, id, "push peer disconnected");
                        break;
                    }
                    Err(err) => {
                        warn!(endpoint = %reader_endpoint, id, error = %err, "dropping push peer");
                        break;
                    }
                }
            }
            lock(&registry).streams.remove(&id);
        });

    match spawned {
        Ok(handle) => guard.readers.push(handle),
        Err(err) => {
            guard.streams.remove(&id);
            warn!(%endpoint, error = %err, "cannot spawn reader thread");
        }
    }
}

fn lock(connections: &Mutex<Connections>) -> std::sync::MutexGuard<'_, Connections> {
    connections
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ConnectedPull {
    endpoint: Endpoint,
    reader: Option<FrameReader<IpcStream>>,
    frame_config: FrameConfig,
    reconnect_interval: Duration,
    /// Earliest time of the next connection attempt.
    retry_at: Instant,
}

impl ConnectedPull {
    /// Connect if not connected. An absent peer is not an error; the next
    /// attempt waits for the reconnect interval.
    fn try_connect(&mut self) -> Result<bool> {
        if self.reader.is_some() {
            return Ok(true);
        }
        if Instant::now() < self.retry_at {
            return Ok(false);
        }
        match UnixDomainSocket::connect_endpoint(&self.endpoint) {
            Ok(stream) => {
                self.reader = Some(FrameReader::with_config(stream, self.frame_config.clone()));
                Ok(true)
            }
            Err(err) if err.is_peer_absent() => {
                self.retry_at = Instant::now() + self.reconnect_interval;
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn recv(&mut self, wait: &Wait<'_>) -> Result<Option<Bytes>> {
        loop {
            let Some(slice) = wait.next_slice()? else {
                return Ok(None);
            };

            if !self.try_connect()? {
                std::thread::sleep(slice);
                continue;
            }

            let Some(reader) = self.reader.as_mut() else {
                continue;
            };
            reader.set_read_timeout(Some(slice))?;
            match reader.read_frame() {
                Ok(payload) => return Ok(Some(payload)),
                Err(FrameError::TimedOut) => {}
                Err(FrameError::ConnectionClosed) => {
                    debug!(endpoint = %self.endpoint, "push peer went away; reconnecting");
                    self.reader = None;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
