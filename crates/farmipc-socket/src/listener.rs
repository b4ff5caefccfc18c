use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use farmipc_transport::{Endpoint, IpcStream, TransportError, UnixDomainSocket};
use tracing::{debug, warn};

use crate::error::Result;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Background accept loop for a bound socket.
///
/// Every accepted connection is handed to the callback on the accept thread.
/// Dropping the acceptor stops the loop, joins the thread and removes the
/// socket file.
pub(crate) struct Acceptor {
    endpoint: Endpoint,
    stopping: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Acceptor {
    pub(crate) fn spawn<F>(endpoint: &Endpoint, mut on_accept: F) -> Result<Self>
    where
        F: FnMut(IpcStream) + Send + 'static,
    {
        let listener = UnixDomainSocket::bind_endpoint(endpoint)?;
        listener.set_nonblocking(true)?;
        let stopping = Arc::new(AtomicBool::new(false));

        let thread = {
            let stopping = Arc::clone(&stopping);
            let endpoint = endpoint.clone();
            std::thread::Builder::new()
                .name(format!("farmipc-accept:{}", endpoint.path().display()))
                .spawn(move || {
                    while !stopping.load(Ordering::SeqCst) {
                        match listener.accept() {
                            Ok(stream) => {
                                if let Some((uid, _gid, pid)) = stream.peer_credentials() {
                                    debug!(%endpoint, uid, pid, "peer connected");
                                }
                                on_accept(stream);
                            }
                            Err(err) => {
                                if !is_would_block(&err) {
                                    warn!(%endpoint, error = %err, "accept failed");
                                }
                                std::thread::sleep(ACCEPT_POLL_INTERVAL);
                            }
                        }
                    }
                    // `listener` drops here and removes the socket file.
                })
                .map_err(TransportError::Io)?
        };

        Ok(Self {
            endpoint: endpoint.clone(),
            stopping,
            thread: Some(thread),
        })
    }
}

fn is_would_block(err: &TransportError) -> bool {
    err.io_source()
        .is_some_and(|source| source.kind() == ErrorKind::WouldBlock)
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(endpoint = %self.endpoint, "accept thread panicked");
            }
        }
    }
}
