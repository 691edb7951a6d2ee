/// Connection manager: supervises the transport session with a state machine,
/// exponential backoff and channel re-subscription after every (re)connect.
///
/// Every asynchronous continuation (reconnect timer, event pump, heartbeat)
/// carries the epoch it was started in and does nothing once the epoch moved on,
/// so `disconnect()` and fresh sessions never race with leftovers of old ones.
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::router::ChannelRouter;
use crate::transport::{Transport, TransportEvent};
use crate::utils::{EventEmitter, HandlerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Connection state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected and not trying to
    Disconnected,
    /// First handshake in progress after `connect`
    Connecting,
    /// Session open and channels subscribed
    Connected,
    /// Session lost, backoff timer running or retry in progress
    Reconnecting,
    /// Last attempt failed
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Which task noticed the session dying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LossOrigin {
    Pump,
    Heartbeat,
}

struct ManagerState {
    state: ConnectionState,
    token: Option<String>,
    attempt: u32,
    epoch: u64,
    /// First handshake after `connect`, owned here so a dropped caller cannot strand it
    handshake_task: Option<AbortHandle>,
    reconnect_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    pump_task: Option<JoinHandle<()>>,
}

impl ManagerState {
    /// Returns true if the state actually changed
    fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return false;
        }
        debug!("Connection state {} -> {}", self.state, next);
        self.state = next;
        true
    }
}

struct ManagerInner {
    config: Config,
    transport: Arc<dyn Transport>,
    router: Arc<ChannelRouter>,
    state: Mutex<ManagerState>,
    observers: EventEmitter<ConnectionState>,
}

/// Owns the single transport session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(config: Config, transport: Arc<dyn Transport>, router: Arc<ChannelRouter>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                transport,
                router,
                state: Mutex::new(ManagerState {
                    state: ConnectionState::Disconnected,
                    token: None,
                    attempt: 0,
                    epoch: 0,
                    handshake_task: None,
                    reconnect_task: None,
                    heartbeat_task: None,
                    pump_task: None,
                }),
                observers: EventEmitter::new("connection-state"),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Reconnect attempts made since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().attempt
    }

    /// Observe state changes. Observers run synchronously, in registration
    /// order, before the call that caused the transition returns.
    pub fn on_state_change(
        &self,
        f: impl Fn(&ConnectionState) + Send + Sync + 'static,
    ) -> HandlerId {
        self.inner.observers.subscribe(f)
    }

    pub fn remove_observer(&self, id: HandlerId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Open the session with `token`. No-op when already Connected or
    /// Connecting, or when the token is blank. Transport failures are not
    /// returned: they show up as state transitions and scheduled reconnects.
    ///
    /// The handshake runs in a task of its own; dropping the returned future
    /// stops the wait, not the handshake.
    pub async fn connect(&self, token: &str) -> ConnectionState {
        let token = token.trim();
        if token.is_empty() {
            warn!("Connect skipped: no credential available");
            return self.state();
        }

        let (epoch, changed) = {
            let mut st = self.inner.lock();
            if matches!(st.state, ConnectionState::Connected | ConnectionState::Connecting) {
                debug!("Connect ignored while {}", st.state);
                return st.state;
            }
            if let Some(task) = st.reconnect_task.take() {
                task.abort();
            }
            st.token = Some(token.to_string());
            st.attempt = 0;
            st.epoch += 1;
            (st.epoch, st.transition(ConnectionState::Connecting))
        };
        if changed {
            self.inner.observers.emit(&ConnectionState::Connecting);
        }

        info!("Connecting to chat backend");
        let inner = self.inner.clone();
        let handshake = tokio::spawn(async move {
            inner.establish(epoch).await;
        });
        {
            let mut st = self.inner.lock();
            if st.epoch == epoch {
                st.handshake_task = Some(handshake.abort_handle());
            }
        }
        if let Err(e) = handshake.await {
            debug!("Handshake task ended early: {}", e);
        }
        self.state()
    }

    /// Tear down the session and every timer. No automatic reconnect follows.
    pub async fn disconnect(&self) {
        self.inner.stop_tasks();
        self.inner.transport.unsubscribe_all();
        self.inner.transport.close().await;

        let changed = self.inner.lock().transition(ConnectionState::Disconnected);
        if changed {
            self.inner.observers.emit(&ConnectionState::Disconnected);
        }
        info!("Disconnected from chat backend");
    }

    /// Stop every background task without waiting for the socket to close.
    /// The state drops to Disconnected; observers are not notified.
    pub fn halt(&self) {
        self.inner.stop_tasks();
        self.inner.transport.unsubscribe_all();
        self.inner.lock().transition(ConnectionState::Disconnected);
    }

    /// Publish on the open session. Fails without touching the transport when not Connected.
    pub fn publish(&self, destination: &str, body: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(ChatError::Transport(format!(
                "cannot publish to {} while {}",
                destination,
                self.state()
            )));
        }
        self.inner.transport.publish(destination, body)
    }
}

impl ManagerInner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invalidate the current epoch and abort every task it started
    fn stop_tasks(&self) {
        let tasks = {
            let mut st = self.lock();
            st.epoch += 1;
            st.token = None;
            st.attempt = 0;
            if let Some(handshake) = st.handshake_task.take() {
                handshake.abort();
            }
            [
                st.reconnect_task.take(),
                st.heartbeat_task.take(),
                st.pump_task.take(),
            ]
        };
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
    }

    fn emit_all(&self, states: Vec<ConnectionState>) {
        for state in states {
            self.observers.emit(&state);
        }
    }

    /// One handshake attempt for `epoch`. Returns true when Connected.
    async fn establish(self: &Arc<Self>, epoch: u64) -> bool {
        let token = {
            let st = self.lock();
            if st.epoch != epoch {
                return false;
            }
            match st.token.clone() {
                Some(token) => token,
                None => return false,
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let opened = match timeout(
            self.config.connect_timeout,
            self.transport.open(&token, events_tx),
        )
        .await
        {
            Ok(opened) => opened,
            Err(_) => Err(ChatError::Timeout(format!(
                "transport handshake exceeded {:?}",
                self.config.connect_timeout
            ))),
        };
        // Only a session this attempt opened may be closed by it
        let mut session = None;
        let result = opened.and_then(|id| {
            session = Some(id);
            self.router.subscribe_all(self.transport.as_ref())
        });

        match result {
            Ok(()) => {
                let changed = {
                    let mut st = self.lock();
                    if st.epoch != epoch {
                        None
                    } else {
                        st.attempt = 0;
                        // Detach (not abort): this may be the reconnect or handshake task itself
                        st.reconnect_task = None;
                        st.handshake_task = None;
                        st.pump_task = Some(tokio::spawn(self.clone().pump(events_rx, epoch)));
                        if !self.config.heartbeat_interval.is_zero() {
                            st.heartbeat_task = Some(tokio::spawn(self.clone().heartbeat(epoch)));
                        }
                        Some(st.transition(ConnectionState::Connected))
                    }
                };
                match changed {
                    None => {
                        debug!("Session opened after the attempt was cancelled; closing it");
                        if let Some(id) = session {
                            self.transport.close_session(id).await;
                        }
                        false
                    }
                    Some(changed) => {
                        info!("Connected; inbound channels subscribed");
                        if changed {
                            self.observers.emit(&ConnectionState::Connected);
                        }
                        true
                    }
                }
            }
            Err(e) => {
                warn!("Transport session failed: {}", e);
                if let Some(id) = session {
                    self.transport.close_session(id).await;
                }
                self.on_failure(epoch, &e);
                false
            }
        }
    }

    fn on_failure(self: &Arc<Self>, epoch: u64, error: &ChatError) {
        let mut emits = Vec::new();
        {
            let mut st = self.lock();
            if st.epoch != epoch {
                return;
            }
            if let ChatError::Auth(_) = error {
                warn!("Credential rejected; not retrying until connect is called again");
                st.token = None;
                if st.transition(ConnectionState::Error) {
                    emits.push(ConnectionState::Error);
                }
            } else {
                if st.state == ConnectionState::Connecting
                    && st.transition(ConnectionState::Error)
                {
                    emits.push(ConnectionState::Error);
                }
                if let Some(next) = self.schedule_reconnect(&mut st) {
                    emits.push(next);
                }
            }
        }
        self.emit_all(emits);
    }

    /// Arm the backoff timer, or give up after the last attempt.
    /// Returns the new state when it changed.
    fn schedule_reconnect(self: &Arc<Self>, st: &mut ManagerState) -> Option<ConnectionState> {
        if st.attempt >= self.config.max_reconnect_attempts {
            warn!(
                "Giving up after {} reconnect attempts; waiting for an explicit connect",
                st.attempt
            );
            st.token = None;
            st.epoch += 1;
            return st
                .transition(ConnectionState::Disconnected)
                .then_some(ConnectionState::Disconnected);
        }

        let delay = self.config.reconnect_delay(st.attempt);
        st.attempt += 1;
        st.epoch += 1;
        let epoch = st.epoch;
        info!(
            "Reconnect attempt {}/{} in {:?}",
            st.attempt, self.config.max_reconnect_attempts, delay
        );

        let inner = self.clone();
        st.reconnect_task = Some(tokio::spawn(async move {
            sleep(delay).await;
            inner.reconnect(epoch).await;
        }));

        st.transition(ConnectionState::Reconnecting)
            .then_some(ConnectionState::Reconnecting)
    }

    async fn reconnect(self: Arc<Self>, epoch: u64) {
        let attempt_epoch = {
            let mut st = self.lock();
            if st.epoch != epoch || st.state != ConnectionState::Reconnecting {
                return;
            }
            // The handle stays so connect/disconnect can cancel an attempt in flight
            st.epoch += 1;
            st.epoch
        };
        debug!("Reconnect attempt starting");
        self.establish(attempt_epoch).await;
    }

    /// The open session died underneath us
    fn connection_lost(self: &Arc<Self>, epoch: u64, origin: LossOrigin, reason: &str) {
        let next = {
            let mut st = self.lock();
            if st.epoch != epoch || st.state != ConnectionState::Connected {
                return;
            }
            warn!("Connection lost: {}", reason);
            if let Some(task) = st.pump_task.take() {
                if origin != LossOrigin::Pump {
                    task.abort();
                }
            }
            if let Some(task) = st.heartbeat_task.take() {
                if origin != LossOrigin::Heartbeat {
                    task.abort();
                }
            }
            self.schedule_reconnect(&mut st)
        };
        if let Some(state) = next {
            self.observers.emit(&state);
        }
    }

    /// Route inbound frames until the session reports closure
    async fn pump(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        epoch: u64,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Frame { destination, body } => {
                    self.router.dispatch(&destination, &body);
                }
                TransportEvent::Closed { reason } => {
                    self.connection_lost(epoch, LossOrigin::Pump, &reason);
                    return;
                }
            }
        }
        self.connection_lost(epoch, LossOrigin::Pump, "event stream ended");
    }

    async fn heartbeat(self: Arc<Self>, epoch: u64) {
        let mut ticker = interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let alive = self.transport.is_open() && self.transport.heartbeat().is_ok();
            if !alive {
                self.connection_lost(epoch, LossOrigin::Heartbeat, "heartbeat failed");
                return;
            }
        }
    }
}
