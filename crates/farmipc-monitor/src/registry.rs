use std::time::Duration;

use farmipc_socket::Context;
use tracing::{debug, trace, warn};

use crate::config::{ChannelEndpoints, MonitorConfig};
use crate::error::{Outcome, Result};
use crate::state::ProcessState;
use crate::statistics::{StatisticsMessage, ERROR_MESSAGE_NAME};
use crate::transport::{MessageReceiver, MessageSender, Transport};

/// Whether a role's channel handles have all been created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleState {
    #[default]
    Uninitialized,
    Initialized,
}

/// The three monitoring channels of one process.
///
/// A process acts as a **client** (worker) when it sends state and
/// statistics and receives commands, and as a **server** (collector) when it
/// receives state and statistics and sends commands. Roles are established
/// lazily by the first operation that needs them, and a process may hold
/// both.
///
/// No operation reports failure. Sends are best effort, receives fall back to
/// [`ProcessState::Timeout`] or an empty string. A handle that hits a fatal
/// transport error is destroyed and recreated by the next operation that
/// needs it; transient errors leave it in place.
pub struct ChannelRegistry<T: Transport = Context> {
    transport: T,
    endpoints: ChannelEndpoints,

    state_sender: Option<T::Sender>,
    statistics_sender: Option<T::Sender>,
    command_receiver: Option<T::Receiver>,

    state_receiver: Option<T::Receiver>,
    statistics_receiver: Option<T::Receiver>,
    command_sender: Option<T::Sender>,

    client_role: RoleState,
    server_role: RoleState,
    local_state: ProcessState,
    receive_timeout: Option<Duration>,
}

impl<T: Transport> ChannelRegistry<T> {
    /// Create a registry with no channels open and unbounded receives.
    pub fn new(transport: T, endpoints: ChannelEndpoints) -> Self {
        Self {
            transport,
            endpoints,
            state_sender: None,
            statistics_sender: None,
            command_receiver: None,
            state_receiver: None,
            statistics_receiver: None,
            command_sender: None,
            client_role: RoleState::Uninitialized,
            server_role: RoleState::Uninitialized,
            local_state: ProcessState::Off,
            receive_timeout: None,
        }
    }

    /// Create a registry from configuration. No channel is opened yet; the
    /// configured timeout applies to receivers once they are created.
    pub fn from_config(transport: T, config: &MonitorConfig) -> Result<Self> {
        let mut registry = Self::new(transport, config.endpoints()?);
        registry.receive_timeout = config.receive_timeout();
        Ok(registry)
    }

    /// Open whichever worker-side handles are missing.
    ///
    /// Returns `false` when the transport is stopped or a handle cannot be
    /// created. Handles created before the failure are kept.
    pub fn ensure_client_role(&mut self) -> bool {
        if !self.transport.is_running() {
            return false;
        }
        if self.client_role == RoleState::Initialized {
            return true;
        }

        let transport = &self.transport;
        let endpoints = &self.endpoints;
        let ready = open(&mut self.state_sender, "state sender", || {
            transport.push_connect(&endpoints.state)
        }) && open(&mut self.statistics_sender, "statistics sender", || {
            transport.push_connect(&endpoints.statistics)
        }) && open(&mut self.command_receiver, "command receiver", || {
            transport.pull_connect(&endpoints.command)
        });

        if ready {
            debug!("client role initialized");
            self.client_role = RoleState::Initialized;
        }
        ready
    }

    /// Open whichever collector-side handles are missing.
    ///
    /// New state and statistics receivers get the configured receive timeout.
    pub fn ensure_server_role(&mut self) -> bool {
        if !self.transport.is_running() {
            return false;
        }
        if self.server_role == RoleState::Initialized {
            return true;
        }

        let transport = &self.transport;
        let endpoints = &self.endpoints;
        let timeout = self.receive_timeout;
        let ready = open(&mut self.state_receiver, "state receiver", || {
            bounded(transport.pull_bind(&endpoints.state), timeout)
        }) && open(&mut self.statistics_receiver, "statistics receiver", || {
            bounded(transport.pull_bind(&endpoints.statistics), timeout)
        }) && open(&mut self.command_sender, "command sender", || {
            transport.push_bind(&endpoints.command)
        });

        if ready {
            debug!("server role initialized");
            self.server_role = RoleState::Initialized;
        }
        ready
    }

    /// Bound state and statistics receives. `None` waits forever.
    ///
    /// Opens the server role first if the statistics receiver is missing. The
    /// command channel always blocks.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.receive_timeout = timeout;
        if self.statistics_receiver.is_none() {
            self.ensure_server_role();
        }
        if let Some(receiver) = self.state_receiver.as_mut() {
            receiver.set_receive_timeout(timeout);
        }
        if let Some(receiver) = self.statistics_receiver.as_mut() {
            receiver.set_receive_timeout(timeout);
        }
    }

    /// Close every channel. The next operation starts over as on a fresh
    /// registry; the local state and the timeout are kept.
    pub fn shutdown(&mut self) {
        let closed = self.open_handles();
        self.state_sender = None;
        self.statistics_sender = None;
        self.command_receiver = None;
        self.state_receiver = None;
        self.statistics_receiver = None;
        self.command_sender = None;
        self.client_role = RoleState::Uninitialized;
        self.server_role = RoleState::Uninitialized;
        if closed > 0 {
            debug!(closed, "monitoring channels shut down");
        }
    }

    /// Record the local state and publish it to the collector.
    ///
    /// The state is recorded even when it cannot be sent. The
    /// [`Timeout`](ProcessState::Timeout) sentinel is only recorded.
    pub fn update_state(&mut self, new_state: ProcessState) {
        self.local_state = new_state;
        let Some(frame) = new_state.encode() else {
            return;
        };
        if !self.ensure_client_role() {
            return;
        }
        let Some(sender) = self.state_sender.as_mut() else {
            return;
        };
        if settle_send(Outcome::from_send(sender.send(&frame)), "state") {
            self.state_sender = None;
            self.client_role = RoleState::Uninitialized;
        }
    }

    /// The state last passed to [`update_state`](Self::update_state).
    pub fn current_state(&self) -> ProcessState {
        self.local_state
    }

    /// Receive one state report, waiting up to the receive timeout.
    ///
    /// Returns [`ProcessState::Timeout`] when nothing valid arrived.
    pub fn try_to_receive_state(&mut self) -> ProcessState {
        if !self.ensure_server_role() {
            return ProcessState::Timeout;
        }
        let Some(receiver) = self.state_receiver.as_mut() else {
            return ProcessState::Timeout;
        };
        match Outcome::from_recv(receiver.recv()) {
            Outcome::Done(frame) => ProcessState::decode(&frame),
            Outcome::TimedOut => ProcessState::Timeout,
            Outcome::Transient(err) => {
                debug!(error = %err, "state receive interrupted");
                ProcessState::Timeout
            }
            Outcome::Fatal(err) => {
                warn!(error = %err, "state receiver failed; closing it");
                self.state_receiver = None;
                self.server_role = RoleState::Uninitialized;
                ProcessState::Timeout
            }
        }
    }

    /// Publish a `name:value` statistic. Empty names or values are ignored.
    pub fn send_statistics(&mut self, name: &str, value: &str) {
        let Some(message) = StatisticsMessage::new(name, value) else {
            trace!(name, "ignoring statistic with empty name or value");
            return;
        };
        if !self.ensure_client_role() {
            return;
        }
        let Some(sender) = self.statistics_sender.as_mut() else {
            return;
        };
        let frame = message.to_frame();
        if settle_send(Outcome::from_send(sender.send(frame.as_bytes())), "statistics") {
            self.statistics_sender = None;
            self.client_role = RoleState::Uninitialized;
        }
    }

    /// Publish an error report on the statistics channel.
    pub fn send_error_message(&mut self, text: &str) {
        self.send_statistics(ERROR_MESSAGE_NAME, text);
    }

    /// Receive one statistics frame, waiting up to the receive timeout.
    ///
    /// Returns the raw `name:value` text, or an empty string when nothing
    /// arrived.
    pub fn try_to_receive_statistics(&mut self) -> String {
        if !self.ensure_server_role() {
            return String::new();
        }
        let Some(receiver) = self.statistics_receiver.as_mut() else {
            return String::new();
        };
        match Outcome::from_recv(receiver.recv()) {
            Outcome::Done(frame) => String::from_utf8_lossy(&frame).into_owned(),
            Outcome::TimedOut => String::new(),
            Outcome::Transient(err) => {
                debug!(error = %err, "statistics receive interrupted");
                String::new()
            }
            Outcome::Fatal(err) => {
                warn!(error = %err, "statistics receiver failed; closing it");
                self.statistics_receiver = None;
                self.server_role = RoleState::Uninitialized;
                String::new()
            }
        }
    }

    /// Send a command to the workers. Empty commands are ignored.
    pub fn send_command(&mut self, command: &str) {
        if command.is_empty() {
            return;
        }
        if !self.ensure_server_role() {
            return;
        }
        let Some(sender) = self.command_sender.as_mut() else {
            return;
        };
        if settle_send(Outcome::from_send(sender.send(command.as_bytes())), "command") {
            self.command_sender = None;
            self.server_role = RoleState::Uninitialized;
        }
    }

    /// Block until the next command arrives.
    ///
    /// The receive timeout does not apply. Returns an empty string when the
    /// channel cannot be opened or the receive fails.
    pub fn get_next_command(&mut self) -> String {
        if !self.ensure_client_role() {
            return String::new();
        }
        let Some(receiver) = self.command_receiver.as_mut() else {
            return String::new();
        };
        match Outcome::from_recv(receiver.recv()) {
            Outcome::Done(frame) => String::from_utf8_lossy(&frame).into_owned(),
            Outcome::TimedOut => String::new(),
            Outcome::Transient(err) => {
                debug!(error = %err, "command receive interrupted");
                String::new()
            }
            Outcome::Fatal(err) => {
                warn!(error = %err, "command receiver failed; closing it");
                self.command_receiver = None;
                self.client_role = RoleState::Uninitialized;
                String::new()
            }
        }
    }

    /// Receive timeout applied to state and statistics receivers.
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    pub fn client_role(&self) -> RoleState {
        self.client_role
    }

    pub fn server_role(&self) -> RoleState {
        self.server_role
    }

    pub fn endpoints(&self) -> &ChannelEndpoints {
        &self.endpoints
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Messages sent through this registry that are still waiting for a peer.
    ///
    /// They are discarded if the registry is shut down first.
    pub fn pending_sends(&self) -> usize {
        let state = self.state_sender.as_ref().map_or(0, |sender| sender.pending());
        let statistics = self.statistics_sender.as_ref().map_or(0, |sender| sender.pending());
        let commands = self.command_sender.as_ref().map_or(0, |sender| sender.pending());
        state + statistics + commands
    }

    /// Number of channel handles currently open (at most six).
    pub fn open_handles(&self) -> usize {
        [
            self.state_sender.is_some(),
            self.statistics_sender.is_some(),
            self.command_receiver.is_some(),
            self.state_receiver.is_some(),
            self.statistics_receiver.is_some(),
            self.command_sender.is_some(),
        ]
        .into_iter()
        .filter(|open| *open)
        .count()
    }
}

impl<T: Transport> Drop for ChannelRegistry<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Transport> std::fmt::Debug for ChannelRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("endpoints", &self.endpoints)
            .field("client_role", &self.client_role)
            .field("server_role", &self.server_role)
            .field("local_state", &self.local_state)
            .field("receive_timeout", &self.receive_timeout)
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

/// Fill `slot` if it is empty. Returns whether the slot holds a handle.
fn open<H>(
    slot: &mut Option<H>,
    channel: &'static str,
    create: impl FnOnce() -> farmipc_socket::Result<H>,
) -> bool {
    if slot.is_some() {
        return true;
    }
    match create() {
        Ok(handle) => {
            debug!(channel, "opened channel handle");
            *slot = Some(handle);
            true
        }
        Err(err) => {
            warn!(channel, error = %err, "cannot open channel handle");
            false
        }
    }
}

fn bounded<R: MessageReceiver>(
    receiver: farmipc_socket::Result<R>,
    timeout: Option<Duration>,
) -> farmipc_socket::Result<R> {
    receiver.map(|mut receiver| {
        receiver.set_receive_timeout(timeout);
        receiver
    })
}

/// Log a failed send. Returns whether the sending handle must be destroyed.
fn settle_send(outcome: Outcome<()>, channel: &'static str) -> bool {
    match outcome {
        Outcome::Done(()) | Outcome::TimedOut => false,
        Outcome::Transient(err) => {
            debug!(channel, error = %err, "send dropped");
            false
        }
        Outcome::Fatal(err) => {
            warn!(channel, error = %err, "sender failed; closing it");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::rc::Rc;

    use bytes::Bytes;
    use farmipc_frame::FrameError;
    use farmipc_socket::SocketError;
    use farmipc_transport::Endpoint;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Op {
        PushConnect(&'static str),
        PushBind(&'static str),
        PullConnect(&'static str),
        PullBind(&'static str),
        Send(&'static str, Vec<u8>),
        Recv(&'static str),
        SetTimeout(&'static str, Option<Duration>),
        Close(&'static str),
    }

    #[derive(Default)]
    struct Script {
        stopped: bool,
        ops: Vec<Op>,
        refuse: HashSet<&'static str>,
        send_results: HashMap<&'static str, VecDeque<farmipc_socket::Result<()>>>,
        recv_results: HashMap<&'static str, VecDeque<farmipc_socket::Result<Option<Bytes>>>>,
    }

    /// Records every transport call. Channels are named after the tail of
    /// their socket file name.
    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Script>>);

    impl Recorder {
        fn ops(&self) -> Vec<Op> {
            self.0.borrow().ops.clone()
        }

        fn take_ops(&self) -> Vec<Op> {
            std::mem::take(&mut self.0.borrow_mut().ops)
        }

        fn stop(&self) {
            self.0.borrow_mut().stopped = true;
        }

        fn refuse(&self, channel: &'static str, refused: bool) {
            let mut script = self.0.borrow_mut();
            if refused {
                script.refuse.insert(channel);
            } else {
                script.refuse.remove(channel);
            }
        }

        fn fail_send(&self, channel: &'static str, err: SocketError) {
            self.0
                .borrow_mut()
                .send_results
                .entry(channel)
                .or_default()
                .push_back(Err(err));
        }

        fn queue_recv(&self, channel: &'static str, result: farmipc_socket::Result<Option<Bytes>>) {
            self.0
                .borrow_mut()
                .recv_results
                .entry(channel)
                .or_default()
                .push_back(result);
        }

        fn create(
            &self,
            op: fn(&'static str) -> Op,
            endpoint: &Endpoint,
        ) -> farmipc_socket::Result<Handle> {
            let channel = channel_name(endpoint);
            let mut script = self.0.borrow_mut();
            script.ops.push(op(channel));
            if script.refuse.contains(channel) {
                return Err(SocketError::AddressInUse(endpoint.clone()));
            }
            Ok(Handle {
                channel,
                recorder: self.clone(),
            })
        }
    }

    fn channel_name(endpoint: &Endpoint) -> &'static str {
        let name = endpoint.path().file_name().and_then(|name| name.to_str());
        match name.and_then(|name| name.rsplit('-').next()) {
            Some("state") => "state",
            Some("statistics") => "statistics",
            Some("command") => "command",
            other => panic!("unexpected endpoint {other:?}"),
        }
    }

    struct Handle {
        channel: &'static str,
        recorder: Recorder,
    }

    impl MessageSender for Handle {
        fn send(&mut self, payload: &[u8]) -> farmipc_socket::Result<()> {
            let mut script = self.recorder.0.borrow_mut();
            script.ops.push(Op::Send(self.channel, payload.to_vec()));
            script
                .send_results
                .get_mut(self.channel)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(()))
        }
    }

    impl MessageReceiver for Handle {
        fn recv(&mut self) -> farmipc_socket::Result<Option<Bytes>> {
            let mut script = self.recorder.0.borrow_mut();
            script.ops.push(Op::Recv(self.channel));
            script
                .recv_results
                .get_mut(self.channel)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(None))
        }

        fn set_receive_timeout(&mut self, timeout: Option<Duration>) {
            self.recorder
                .0
                .borrow_mut()
                .ops
                .push(Op::SetTimeout(self.channel, timeout));
        }
    }

    impl Drop for Handle {
        fn drop(&mut self) {
            self.recorder.0.borrow_mut().ops.push(Op::Close(self.channel));
        }
    }

    impl Transport for Recorder {
        type Sender = Handle;
        type Receiver = Handle;

        fn is_running(&self) -> bool {
            !self.0.borrow().stopped
        }

        fn push_connect(&self, endpoint: &Endpoint) -> farmipc_socket::Result<Handle> {
            self.create(Op::PushConnect, endpoint)
        }

        fn push_bind(&self, endpoint: &Endpoint) -> farmipc_socket::Result<Handle> {
            self.create(Op::PushBind, endpoint)
        }

        fn pull_connect(&self, endpoint: &Endpoint) -> farmipc_socket::Result<Handle> {
            self.create(Op::PullConnect, endpoint)
        }

        fn pull_bind(&self, endpoint: &Endpoint) -> farmipc_socket::Result<Handle> {
            self.create(Op::PullBind, endpoint)
        }
    }

    fn registry() -> (ChannelRegistry<Recorder>, Recorder) {
        let recorder = Recorder::default();
        let endpoints = ChannelEndpoints {
            state: Endpoint::from_path("/farm/state"),
            statistics: Endpoint::from_path("/farm/statistics"),
            command: Endpoint::from_path("/farm/command"),
        };
        (ChannelRegistry::new(recorder.clone(), endpoints), recorder)
    }

    fn fatal() -> SocketError {
        SocketError::Frame(FrameError::ConnectionClosed)
    }

    fn interrupted() -> SocketError {
        SocketError::Frame(FrameError::Interrupted)
    }

    const CLIENT_SETUP: [Op; 3] = [
        Op::PushConnect("state"),
        Op::PushConnect("statistics"),
        Op::PullConnect("command"),
    ];

    fn server_setup(timeout: Option<Duration>) -> Vec<Op> {
        vec![
            Op::PullBind("state"),
            Op::SetTimeout("state", timeout),
            Op::PullBind("statistics"),
            Op::SetTimeout("statistics", timeout),
            Op::PushBind("command"),
        ]
    }

    #[test]
    fn fresh_registry_touches_nothing() {
        let (registry, recorder) = registry();
        assert_eq!(registry.current_state(), ProcessState::Off);
        assert_eq!(registry.client_role(), RoleState::Uninitialized);
        assert_eq!(registry.server_role(), RoleState::Uninitialized);
        assert_eq!(registry.open_handles(), 0);
        assert!(recorder.ops().is_empty());
    }

    #[test]
    fn update_state_opens_client_role_and_sends_ordinal() {
        let (mut registry, recorder) = registry();
        registry.update_state(ProcessState::Running);

        let mut expected = CLIENT_SETUP.to_vec();
        expected.push(Op::Send("state", vec![2, 0, 0, 0]));
        assert_eq!(recorder.ops(), expected);
        assert_eq!(registry.current_state(), ProcessState::Running);
        assert_eq!(registry.client_role(), RoleState::Initialized);
        assert_eq!(registry.open_handles(), 3);
    }

    #[test]
    fn update_state_records_locally_when_transport_is_down() {
        let (mut registry, recorder) = registry();
        recorder.stop();

        registry.update_state(ProcessState::Error);
        assert_eq!(registry.current_state(), ProcessState::Error);
        assert!(recorder.ops().is_empty());
    }

    #[test]
    fn sentinel_state_is_recorded_but_not_sent() {
        let (mut registry, recorder) = registry();
        registry.update_state(ProcessState::Timeout);
        assert_eq!(registry.current_state(), ProcessState::Timeout);
        assert!(recorder.ops().is_empty());
    }

    #[test]
    fn update_state_swallows_send_errors() {
        let (mut registry, recorder) = registry();
        recorder.fail_send("state", SocketError::QueueFull(1000));
        registry.update_state(ProcessState::Initialized);
        assert_eq!(registry.current_state(), ProcessState::Initialized);
        assert_eq!(registry.client_role(), RoleState::Initialized);

        recorder.fail_send("state", fatal());
        registry.update_state(ProcessState::Running);
        assert_eq!(registry.current_state(), ProcessState::Running);
        assert_eq!(registry.client_role(), RoleState::Uninitialized);
        assert_eq!(recorder.ops().last(), Some(&Op::Close("state")));
    }

    #[test]
    fn ensure_client_role_is_idempotent() {
        let (mut registry, recorder) = registry();
        assert!(registry.ensure_client_role());
        assert!(registry.ensure_client_role());
        assert_eq!(recorder.ops(), CLIENT_SETUP.to_vec());
    }

    #[test]
    fn role_setup_fails_on_stopped_transport() {
        let (mut registry, recorder) = registry();
        recorder.stop();
        assert!(!registry.ensure_client_role());
        assert!(!registry.ensure_server_role());
        assert!(recorder.ops().is_empty());
    }

    #[test]
    fn partial_role_setup_keeps_created_handles() {
        let (mut registry, recorder) = registry();
        recorder.refuse("statistics", true);

        assert!(!registry.ensure_client_role());
        assert_eq!(registry.client_role(), RoleState::Uninitialized);
        assert_eq!(
            recorder.take_ops(),
            vec![Op::PushConnect("state"), Op::PushConnect("statistics")]
        );

        recorder.refuse("statistics", false);
        assert!(registry.ensure_client_role());
        assert_eq!(
            recorder.take_ops(),
            vec![Op::PushConnect("statistics"), Op::PullConnect("command")]
        );
    }

    #[test]
    fn both_roles_can_be_held_at_once() {
        let (mut registry, recorder) = registry();
        assert!(registry.ensure_client_role());
        assert!(registry.ensure_server_role());
        assert_eq!(registry.open_handles(), 6);

        let mut expected = CLIENT_SETUP.to_vec();
        expected.extend(server_setup(None));
        assert_eq!(recorder.ops(), expected);
    }

    #[test]
    fn empty_statistics_do_nothing() {
        let (mut registry, recorder) = registry();
        registry.send_statistics("", "5");
        registry.send_statistics("events", "");
        registry.send_error_message("");
        assert!(recorder.ops().is_empty());
        assert_eq!(registry.client_role(), RoleState::Uninitialized);
    }

    #[test]
    fn statistics_are_framed_as_name_and_value() {
        let (mut registry, recorder) = registry();
        registry.send_statistics("events", "42");
        registry.send_error_message("disk full");

        let ops = recorder.ops();
        assert_eq!(ops[..3], CLIENT_SETUP);
        assert_eq!(
            ops[3..],
            [
                Op::Send("statistics", b"events:42".to_vec()),
                Op::Send("statistics", b"ErrorMessage:disk full".to_vec()),
            ]
        );
    }

    #[test]
    fn fatal_statistics_send_reopens_only_that_sender() {
        let (mut registry, recorder) = registry();
        recorder.fail_send("statistics", fatal());
        registry.send_statistics("events", "1");
        assert_eq!(recorder.take_ops().last(), Some(&Op::Close("statistics")));

        registry.send_statistics("events", "2");
        assert_eq!(
            recorder.take_ops(),
            vec![
                Op::PushConnect("statistics"),
                Op::Send("statistics", b"events:2".to_vec()),
            ]
        );
    }

    #[test]
    fn set_timeout_applies_to_state_and_statistics_receivers() {
        let (mut registry, recorder) = registry();
        let timeout = Some(Duration::from_millis(100));
        registry.set_timeout(timeout);

        let mut expected = server_setup(timeout);
        expected.push(Op::SetTimeout("state", timeout));
        expected.push(Op::SetTimeout("statistics", timeout));
        assert_eq!(recorder.take_ops(), expected);
        assert_eq!(registry.receive_timeout(), timeout);

        registry.set_timeout(None);
        assert_eq!(
            recorder.take_ops(),
            vec![Op::SetTimeout("state", None), Op::SetTimeout("statistics", None)]
        );
    }

    #[test]
    fn command_receiver_ignores_timeout() {
        let (mut registry, recorder) = registry();
        registry.set_timeout(Some(Duration::from_millis(100)));
        recorder.take_ops();

        recorder.queue_recv("command", Ok(Some(Bytes::from_static(b"REBOOT"))));
        assert_eq!(registry.get_next_command(), "REBOOT");
        let ops = recorder.ops();
        assert!(!ops.contains(&Op::SetTimeout("command", Some(Duration::from_millis(100)))));
        assert_eq!(ops.last(), Some(&Op::Recv("command")));
    }

    #[test]
    fn from_config_applies_timeout_to_new_receivers() {
        let recorder = Recorder::default();
        let config = MonitorConfig {
            receive_timeout_ms: Some(250),
            ..MonitorConfig::default()
        };
        let mut registry = ChannelRegistry::from_config(recorder.clone(), &config).unwrap();
        assert!(recorder.ops().is_empty());

        assert!(registry.ensure_server_role());
        assert_eq!(recorder.ops(), server_setup(Some(Duration::from_millis(250))));
    }

    #[test]
    fn receive_state_decodes_or_falls_back_to_sentinel() {
        let (mut registry, recorder) = registry();
        recorder.queue_recv("state", Ok(Some(Bytes::from_static(&[1, 0, 0, 0]))));
        recorder.queue_recv("state", Ok(Some(Bytes::from_static(&[9, 9]))));

        assert_eq!(registry.try_to_receive_state(), ProcessState::Initialized);
        assert_eq!(registry.try_to_receive_state(), ProcessState::Timeout);
        assert_eq!(registry.try_to_receive_state(), ProcessState::Timeout);
    }

    #[test]
    fn receive_state_on_stopped_transport_is_sentinel() {
        let (mut registry, recorder) = registry();
        recorder.stop();
        assert_eq!(registry.try_to_receive_state(), ProcessState::Timeout);
        assert!(recorder.ops().is_empty());
    }

    #[test]
    fn transient_receive_error_keeps_receiver() {
        let (mut registry, recorder) = registry();
        assert!(registry.ensure_server_role());
        recorder.take_ops();

        recorder.queue_recv("state", Err(interrupted()));
        assert_eq!(registry.try_to_receive_state(), ProcessState::Timeout);
        assert_eq!(registry.server_role(), RoleState::Initialized);

        recorder.queue_recv("state", Ok(Some(Bytes::from_static(&[2, 0, 0, 0]))));
        assert_eq!(registry.try_to_receive_state(), ProcessState::Running);
        assert_eq!(recorder.ops(), vec![Op::Recv("state"), Op::Recv("state")]);
    }

    #[test]
    fn fatal_receive_error_rebinds_exactly_once() {
        let (mut registry, recorder) = registry();
        assert!(registry.ensure_server_role());
        recorder.take_ops();

        recorder.queue_recv("state", Err(fatal()));
        assert_eq!(registry.try_to_receive_state(), ProcessState::Timeout);
        assert_eq!(recorder.take_ops(), vec![Op::Recv("state"), Op::Close("state")]);
        assert_eq!(registry.server_role(), RoleState::Uninitialized);

        recorder.queue_recv("state", Ok(Some(Bytes::from_static(&[3, 0, 0, 0]))));
        assert_eq!(registry.try_to_receive_state(), ProcessState::Error);
        assert_eq!(
            recorder.take_ops(),
            vec![
                Op::PullBind("state"),
                Op::SetTimeout("state", None),
                Op::Recv("state"),
            ]
        );
    }

    #[test]
    fn receive_statistics_returns_raw_frame() {
        let (mut registry, recorder) = registry();
        recorder.queue_recv("statistics", Ok(Some(Bytes::from_static(b"events:42"))));
        assert_eq!(registry.try_to_receive_statistics(), "events:42");
        assert_eq!(registry.try_to_receive_statistics(), "");

        recorder.queue_recv("statistics", Err(fatal()));
        assert_eq!(registry.try_to_receive_statistics(), "");
        assert_eq!(recorder.take_ops().last(), Some(&Op::Close("statistics")));

        recorder.queue_recv("statistics", Ok(Some(Bytes::from_static(b"rate:7"))));
        assert_eq!(registry.try_to_receive_statistics(), "rate:7");
        assert_eq!(
            recorder.take_ops(),
            vec![
                Op::PullBind("statistics"),
                Op::SetTimeout("statistics", None),
                Op::Recv("statistics"),
            ]
        );
    }

    #[test]
    fn empty_command_is_not_sent() {
        let (mut registry, recorder) = registry();
        registry.send_command("");
        assert!(recorder.ops().is_empty());
        assert_eq!(registry.server_role(), RoleState::Uninitialized);
    }

    #[test]
    fn command_send_errors_are_classified() {
        let (mut registry, recorder) = registry();
        registry.send_command("START");
        let mut expected = server_setup(None);
        expected.push(Op::Send("command", b"START".to_vec()));
        assert_eq!(recorder.take_ops(), expected);

        recorder.fail_send("command", SocketError::QueueFull(1000));
        registry.send_command("STOP");
        assert_eq!(registry.server_role(), RoleState::Initialized);
        recorder.take_ops();

        recorder.fail_send("command", fatal());
        registry.send_command("STOP");
        assert_eq!(
            recorder.take_ops(),
            vec![Op::Send("command", b"STOP".to_vec()), Op::Close("command")]
        );

        registry.send_command("STOP");
        assert_eq!(
            recorder.take_ops(),
            vec![Op::PushBind("command"), Op::Send("command", b"STOP".to_vec())]
        );
    }

    #[test]
    fn get_next_command_recovers_from_errors() {
        let (mut registry, recorder) = registry();
        recorder.queue_recv("command", Err(interrupted()));
        assert_eq!(registry.get_next_command(), "");
        assert_eq!(registry.client_role(), RoleState::Initialized);

        recorder.queue_recv("command", Err(fatal()));
        assert_eq!(registry.get_next_command(), "");
        assert_eq!(registry.client_role(), RoleState::Uninitialized);
        recorder.take_ops();

        recorder.queue_recv("command", Ok(Some(Bytes::from_static(b"REBOOT"))));
        assert_eq!(registry.get_next_command(), "REBOOT");
        assert_eq!(
            recorder.take_ops(),
            vec![Op::PullConnect("command"), Op::Recv("command")]
        );
    }

    #[test]
    fn commands_decode_invalid_utf8_lossily() {
        let (mut registry, recorder) = registry();
        recorder.queue_recv("command", Ok(Some(Bytes::from_static(b"GO\xff"))));
        assert_eq!(registry.get_next_command(), "GO\u{fffd}");
    }

    #[test]
    fn shutdown_closes_everything_and_starts_over() {
        let (mut registry, recorder) = registry();
        registry.update_state(ProcessState::Running);
        registry.send_command("START");
        assert_eq!(registry.open_handles(), 6);
        recorder.take_ops();

        registry.shutdown();
        let closed = recorder.take_ops();
        assert_eq!(closed.len(), 6);
        assert!(closed.iter().all(|op| matches!(op, Op::Close(_))));
        assert_eq!(registry.open_handles(), 0);
        assert_eq!(registry.client_role(), RoleState::Uninitialized);
        assert_eq!(registry.server_role(), RoleState::Uninitialized);

        registry.shutdown();
        assert!(recorder.ops().is_empty());

        registry.update_state(ProcessState::Off);
        let mut expected = CLIENT_SETUP.to_vec();
        expected.push(Op::Send("state", vec![0, 0, 0, 0]));
        assert_eq!(recorder.ops(), expected);
    }

    #[test]
    fn drop_closes_open_handles() {
        let (mut registry, recorder) = registry();
        assert!(registry.ensure_client_role());
        recorder.take_ops();

        drop(registry);
        assert_eq!(
            recorder.ops(),
            vec![Op::Close("state"), Op::Close("statistics"), Op::Close("command")]
        );
    }
}
