use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use farmipc_transport::Endpoint;
use tracing::{debug, info};

use crate::config::SocketConfig;
use crate::error::{Result, SocketError};
use crate::pull::PullSocket;
use crate::push::PushSocket;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Process-wide messaging context.
///
/// Owns the running flag, the count of live sockets and the set of endpoints
/// bound by this process. Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

pub(crate) struct ContextInner {
    config: SocketConfig,
    running: AtomicBool,
    active_sockets: AtomicUsize,
    interrupts: AtomicU64,
    bound: Mutex<BTreeSet<Endpoint>>,
}

impl Context {
    /// Create a running context.
    pub fn new(config: SocketConfig) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                config,
                running: AtomicBool::new(true),
                active_sockets: AtomicUsize::new(0),
                interrupts: AtomicU64::new(0),
                bound: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    /// Options applied to sockets created by this context.
    pub fn config(&self) -> &SocketConfig {
        &self.inner.config
    }

    /// Whether the context still hands out sockets.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stop handing out sockets. Existing sockets keep working until dropped.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            info!("messaging context stopped");
        }
    }

    /// Break every blocking receive currently in progress on this context's
    /// pull sockets.
    ///
    /// Each interrupted `recv` fails with `FrameError::Interrupted`, a
    /// transient error; later receives are unaffected. Only touches an atomic
    /// counter, so it may be called from a signal handler.
    pub fn interrupt(&self) {
        self.inner.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    /// Stop the context and wait until every socket has been dropped.
    ///
    /// Returns `false` if sockets were still alive when `timeout` elapsed.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.stop();
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = self.active_sockets();
            if remaining == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                debug!(remaining, "context shutdown timed out");
                return false;
            }
            std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
    }

    /// Number of sockets created by this context that are still alive.
    pub fn active_sockets(&self) -> usize {
        self.inner.active_sockets.load(Ordering::SeqCst)
    }

    /// Whether a socket of this context is currently bound to `endpoint`.
    pub fn is_bound(&self, endpoint: &Endpoint) -> bool {
        self.inner.bound().contains(endpoint)
    }

    /// Endpoints currently bound by sockets of this context.
    pub fn bound_endpoints(&self) -> Vec<Endpoint> {
        self.inner.bound().iter().cloned().collect()
    }

    /// Create a push socket listening on `endpoint`; pull peers connect to it.
    pub fn push_bind(&self, endpoint: &Endpoint) -> Result<PushSocket> {
        let token = self.register(Some(endpoint))?;
        PushSocket::bind(endpoint, token, &self.inner.config)
    }

    /// Create a push socket that delivers to a pull socket bound at `endpoint`.
    pub fn push_connect(&self, endpoint: &Endpoint) -> Result<PushSocket> {
        let token = self.register(None)?;
        PushSocket::connect(endpoint, token, &self.inner.config)
    }

    /// Create a pull socket listening on `endpoint`; push peers connect to it.
    pub fn pull_bind(&self, endpoint: &Endpoint) -> Result<PullSocket> {
        let token = self.register(Some(endpoint))?;
        PullSocket::bind(endpoint, token, &self.inner.config)
    }

    /// Create a pull socket that receives from a push socket bound at `endpoint`.
    pub fn pull_connect(&self, endpoint: &Endpoint) -> Result<PullSocket> {
        let token = self.register(None)?;
        PullSocket::connect(endpoint, token, &self.inner.config)
    }

    fn register(&self, bind: Option<&Endpoint>) -> Result<SocketToken> {
        if !self.is_running() {
            return Err(SocketError::ContextStopped);
        }
        if let Some(endpoint) = bind {
            if !self.inner.bound().insert(endpoint.clone()) {
                return Err(SocketError::AddressInUse(endpoint.clone()));
            }
        }
        self.inner.active_sockets.fetch_add(1, Ordering::SeqCst);
        Ok(SocketToken {
            context: Arc::clone(&self.inner),
            bound: bind.cloned(),
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(SocketConfig::default())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("running", &self.is_running())
            .field("active_sockets", &self.active_sockets())
            .finish()
    }
}

impl ContextInner {
    fn bound(&self) -> MutexGuard<'_, BTreeSet<Endpoint>> {
        self.bound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Accounting handle held by every socket; releases its slot on drop.
pub(crate) struct SocketToken {
    context: Arc<ContextInner>,
    bound: Option<Endpoint>,
}

impl SocketToken {
    /// Number of [`Context::interrupt`] calls so far.
    pub(crate) fn interrupts(&self) -> u64 {
        self.context.interrupts.load(Ordering::SeqCst)
    }
}

impl Drop for SocketToken {
    fn drop(&mut self) {
        if let Some(endpoint) = &self.bound {
            self.context.bound().remove(endpoint);
        }
        let remaining = self.context.active_sockets.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(remaining, "closed socket");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(tag: &str) -> Endpoint {
        let dir = std::env::temp_dir().join(format!(
            "farmipc-ctx-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        Endpoint::from_path(dir.join("sock"))
    }

    #[test]
    fn counts_live_sockets() {
        let ctx = Context::default();
        let ep = endpoint("count");

        let pull = ctx.pull_bind(&ep).expect("bind should succeed");
        let push = ctx.push_connect(&ep).expect("connect should succeed");
        assert_eq!(ctx.active_sockets(), 2);

        drop(push);
        assert_eq!(ctx.active_sockets(), 1);
        drop(pull);
        assert_eq!(ctx.active_sockets(), 0);
    }

    #[test]
    fn tracks_bound_endpoints() {
        let ctx = Context::default();
        let ep = endpoint("bound");

        let pull = ctx.pull_bind(&ep).expect("bind should succeed");
        assert!(ctx.is_bound(&ep));
        assert_eq!(ctx.bound_endpoints(), vec![ep.clone()]);

        let err = ctx.push_bind(&ep).expect_err("second bind must fail");
        assert!(matches!(err, SocketError::AddressInUse(_)));
        assert_eq!(ctx.active_sockets(), 1, "failed bind must not leak a slot");

        drop(pull);
        assert!(!ctx.is_bound(&ep));
    }

    #[test]
    fn stopped_context_refuses_sockets() {
        let ctx = Context::default();
        ctx.stop();
        assert!(!ctx.is_running());

        let err = ctx
            .push_connect(&endpoint("stopped"))
            .expect_err("stopped context must refuse");
        assert!(matches!(err, SocketError::ContextStopped));
    }

    #[test]
    fn interrupt_is_visible_to_every_socket() {
        let ctx = Context::default();
        let token = ctx.register(None).expect("running context should register");
        let clone = ctx.clone();

        assert_eq!(token.interrupts(), 0);
        clone.interrupt();
        clone.interrupt();
        assert_eq!(token.interrupts(), 2);
    }

    #[test]
    fn shutdown_waits_for_sockets() {
        let ctx = Context::default();
        let socket = ctx
            .push_connect(&endpoint("shutdown"))
            .expect("connect should succeed");

        assert!(!ctx.shutdown(Duration::from_millis(20)));

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(socket);
        });
        assert!(ctx.shutdown(Duration::from_secs(2)));
        releaser.join().expect("releaser should finish");
    }
}
