mod callback;
pub use callback::{HandlerCallback, StateLookup, StatefulHandlerCallback};
mod capabilities;
pub use capabilities::OpusCapabilities;
mod codec;
pub use codec::OpusCodec;
mod commands;
pub use commands::{get_operation_name, MatrixCommand, Operation, PresetCommand};
mod config;
pub use config::{OpusConfig, DEFAULT_PORT};
mod error;
pub use error::OpusError;
mod events;
pub use events::{EventCallback, OpusEvent};
mod models;
pub use models::{Command, State, StatusInfo, ThingStatus, ThingStatusDetail};
mod protocol;
pub use protocol::{
    OpusProtocolHandler, ResponseDecoder, MAX_INPUT_PORT, MAX_PRESET, MAX_VOLUME_DB,
    MIN_VOLUME_DB, PROPERTY_TYPE, PROPERTY_VERSION,
};
pub mod router;
pub use router::{ChannelAddress, RoutingError};
mod scheduler;
pub use scheduler::{Scheduler, TaskHandle};
mod session;
pub use session::{SocketSession, TcpSocketSession};
pub mod settings;
mod state;
pub use state::ConnectionState;
use state::ScheduledTasks;

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex, PoisonError, Weak,
};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::settings::SETTINGS;

const SERVER_OFFLINE_MESSAGE: &str = "Server is offline - will try to reconnect later";
const DEVICE_DISCONNECTED_MESSAGE: &str =
    "Atlona OPUS has disconnected. Will try to reconnect later.";

// Caps the backoff exponent; the delay is clamped by maxRetryPolling anyway.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Supervises the connection to one Atlona OPUS switch: connects and logs in,
/// keeps the connection alive, polls state, reconnects after failures and
/// turns channel commands into device commands.
///
/// All timed work (initial connect, polling, keepalive, reconnects), channel
/// commands and explicit connects and disconnects run on one [`Scheduler`],
/// so they never overlap.
///
/// # Logging
///
/// This library uses the `tracing` crate for logging. To see the logs,
/// initialize a subscriber in your application:
///
/// ```no_run
/// use tracing::Level;
/// use tracing_subscriber::FmtSubscriber;
///
/// let subscriber = FmtSubscriber::builder()
///     .with_max_level(Level::DEBUG)
///     .finish();
///
/// tracing::subscriber::set_global_default(subscriber)
///     .expect("Failed to set tracing subscriber");
/// ```
///
/// - `TRACE`: every frame sent and received
/// - `DEBUG`: dropped commands, login steps, refresh passes
/// - `INFO`: connects, disconnects and reconnect scheduling
/// - `WARN`/`ERROR`: rejected commands and configuration problems
pub struct OpusHandler {
    inner: Arc<HandlerInner>,
}

struct HandlerInner {
    config: Arc<OpusConfig>,
    capabilities: Arc<OpusCapabilities>,
    session: Arc<dyn SocketSession>,
    protocol: OpusProtocolHandler,
    callback: Arc<StatefulHandlerCallback>,
    framework: Arc<dyn HandlerCallback>,
    scheduler: Scheduler,
    tasks: Mutex<ScheduledTasks>,
    status: Mutex<StatusInfo>,
    connection_state_tx: watch::Sender<ConnectionState>,
    // Consecutive failed attempts since the last successful login.
    retry_attempts: AtomicU32,
    disposed: AtomicBool,
}

/// Sits between the protocol handler and the framework: records status
/// changes and tears the connection down when anything reports it offline.
struct SupervisorCallback {
    handler: Weak<HandlerInner>,
    framework: Arc<dyn HandlerCallback>,
}

impl HandlerCallback for SupervisorCallback {
    fn state_changed(&self, channel_id: &str, state: State) {
        self.framework.state_changed(channel_id, state);
    }

    fn status_changed(&self, status: ThingStatus, detail: ThingStatusDetail, message: Option<&str>) {
        let Some(inner) = self.handler.upgrade() else {
            self.framework.status_changed(status, detail, message);
            return;
        };
        inner.update_status(StatusInfo {
            status,
            detail,
            message: message.map(str::to_string),
        });
        if status != ThingStatus::Online {
            let task_inner = inner.clone();
            inner.scheduler.spawn(async move {
                task_inner.disconnect(true).await;
            });
        }
    }

    fn set_property(&self, name: &str, value: &str) {
        self.framework.set_property(name, value);
    }
}

impl HandlerInner {
    fn tasks(&self) -> std::sync::MutexGuard<'_, ScheduledTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> StatusInfo {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records `status` and forwards it to the framework without any
    /// teardown side effects.
    fn update_status(&self, status: StatusInfo) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status.clone();
        self.framework
            .status_changed(status.status, status.detail, status.message.as_deref());
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.connection_state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    fn next_retry_delay(&self) -> Duration {
        let attempts = self.retry_attempts.fetch_add(1, Ordering::SeqCst);
        let factor = 1u32 << attempts.min(MAX_BACKOFF_SHIFT);
        self.config
            .retry_interval()
            .saturating_mul(factor)
            .min(self.config.max_retry_interval())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.connection_state_tx.borrow()
    }

    async fn connect(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            debug!("Handler disposed, not connecting");
            return;
        }
        if self.connection_state() == ConnectionState::Online {
            debug!("Already online, skipping connection attempt");
            return;
        }
        self.set_state(ConnectionState::Connecting);
        self.session.clear_listeners();

        // Open the socket and run the login handshake
        let failure = match self.session.connect().await {
            Ok(()) => match self.protocol.login().await {
                Ok(response) => response,
                Err(e) => {
                    debug!(error = %e, "Login failed");
                    Some(SERVER_OFFLINE_MESSAGE.to_string())
                }
            },
            Err(e) => {
                debug!(error = %e, "Connecting to {}:{} failed", self.config.host(), self.config.port);
                Some(SERVER_OFFLINE_MESSAGE.to_string())
            }
        };

        // Any failure takes the same path: offline, then a single retry
        if let Some(reason) = failure {
            warn!("Unable to bring Atlona OPUS online: {}", reason);
            self.update_status(StatusInfo::offline(
                ThingStatusDetail::CommunicationError,
                &reason,
            ));
            self.disconnect(true).await;
            return;
        }

        // dispose flips the flag under the same lock, so either the tasks are
        // never armed or dispose cancels them
        let disposed = {
            let mut tasks = self.tasks();
            let disposed = self.disposed.load(Ordering::SeqCst);
            if !disposed {
                tasks.cancel_maintenance();
                tasks.polling = Some(self.schedule_polling());
                tasks.keepalive = Some(self.schedule_keepalive());
            }
            disposed
        };
        if disposed {
            debug!("Handler disposed while connecting, closing session");
            self.protocol.stop_decoding();
            if let Err(e) = self.session.disconnect().await {
                trace!(error = %e, "Ignoring error closing session");
            }
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        // Logged in: reset the backoff and report online
        self.retry_attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Online);
        info!("Atlona OPUS at {} is online", self.config.host());
        self.update_status(StatusInfo::online());
    }

    fn schedule_polling(self: &Arc<Self>) -> TaskHandle {
        let weak = Arc::downgrade(self);
        let interval = self.config.polling_interval();
        self.scheduler
            .schedule_with_fixed_delay("polling", interval, interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.poll().await;
                    }
                }
            })
    }

    fn schedule_keepalive(self: &Arc<Self>) -> TaskHandle {
        let weak = Arc::downgrade(self);
        let interval = self.config.ping_interval();
        self.scheduler
            .schedule_with_fixed_delay("keepalive", interval, interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.keepalive().await;
                    }
                }
            })
    }

    async fn poll(self: &Arc<Self>) {
        if !self.status().is_online() {
            debug!("Polling while not online, tearing down");
            self.disconnect(true).await;
            return;
        }
        if self.session.is_connected() {
            self.protocol.refresh_all().await;
        } else {
            // The switch hung up since the last tick
            info!("{}", DEVICE_DISCONNECTED_MESSAGE);
            self.update_status(StatusInfo::offline(
                ThingStatusDetail::CommunicationError,
                DEVICE_DISCONNECTED_MESSAGE,
            ));
            self.disconnect(true).await;
        }
    }

    async fn keepalive(&self) {
        if self.status().is_online() && self.session.is_connected() {
            self.protocol.ping().await;
        }
    }

    async fn disconnect(self: &Arc<Self>, retry: bool) {
        // Stop the timers first so no tick runs against a closed session
        self.tasks().cancel_maintenance();
        self.protocol.stop_decoding();
        if let Err(e) = self.session.disconnect().await {
            trace!(error = %e, "Ignoring error closing session");
        }

        if retry && !self.disposed.load(Ordering::SeqCst) {
            self.retry_connect();
            self.set_state(ConnectionState::OfflineRetrying);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Schedules a connection attempt unless one is pending. Returns whether
    /// a new attempt was scheduled.
    fn retry_connect(self: &Arc<Self>) -> bool {
        let mut tasks = self.tasks();
        if tasks.retry.is_some() {
            debug!("Retry connection already pending");
            return false;
        }
        let delay = self.next_retry_delay();
        info!("Will try to reconnect in {:?}", delay);
        tasks.retry = Some(self.schedule_connect("retry", delay));
        true
    }

    // The retry slot is cleared only once the attempt actually runs.
    fn schedule_connect(self: &Arc<Self>, name: &'static str, delay: Duration) -> TaskHandle {
        let weak = Arc::downgrade(self);
        self.scheduler.schedule(name, delay, move || async move {
            if let Some(inner) = weak.upgrade() {
                inner.tasks().retry.take();
                inner.connect().await;
            }
        })
    }

    async fn run_command(&self, address: ChannelAddress, command: Command) {
        if command == Command::Refresh {
            if !self.status().is_online() {
                trace!("Ignoring refresh of {} while offline", address);
                return;
            }
            self.callback.remove_state(&address.channel_id());
            if let Err(e) = self.protocol.refresh_channel(&address).await {
                debug!(error = %e, "Refresh of {} failed", address);
            }
            return;
        }

        let operation = match router::resolve(&address, &command, self.callback.as_ref()) {
            Ok(operation) => operation,
            Err(e) => {
                debug!(error = %e, "Dropping command for {}", address);
                return;
            }
        };
        if !self.session.is_connected() {
            debug!("Not connected, dropping {} for {}", operation, address);
            return;
        }
        match self.protocol.execute(&operation).await {
            Ok(()) => {}
            // already reported offline by the protocol handler
            Err(e) if e.is_transport() => {
                warn!(error = %e, "{} for {} failed", operation, address);
            }
            Err(e) => debug!(error = %e, "{} for {} rejected", operation, address),
        }
    }
}

impl OpusHandler {
    /// Creates a handler talking to the switch over TCP.
    pub fn new(
        config: OpusConfig,
        capabilities: OpusCapabilities,
        callback: Arc<dyn HandlerCallback>,
    ) -> Self {
        let session = Arc::new(TcpSocketSession::new(config.host(), config.port));
        Self::with_session(config, capabilities, session, callback)
    }

    /// Creates a handler on top of an existing session.
    pub fn with_session(
        config: OpusConfig,
        capabilities: OpusCapabilities,
        session: Arc<dyn SocketSession>,
        callback: Arc<dyn HandlerCallback>,
    ) -> Self {
        let config = Arc::new(config);
        let capabilities = Arc::new(capabilities);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Arc::new_cyclic(|weak: &Weak<HandlerInner>| {
            let supervisor = SupervisorCallback {
                handler: weak.clone(),
                framework: callback.clone(),
            };
            let stateful = Arc::new(StatefulHandlerCallback::new(Arc::new(supervisor)));
            let protocol = OpusProtocolHandler::new(
                session.clone(),
                config.clone(),
                capabilities.clone(),
                stateful.clone(),
            );
            HandlerInner {
                config,
                capabilities,
                session,
                protocol,
                callback: stateful,
                framework: callback,
                scheduler: Scheduler::new(),
                tasks: Mutex::new(ScheduledTasks::default()),
                status: Mutex::new(StatusInfo::default()),
                connection_state_tx: state_tx,
                retry_attempts: AtomicU32::new(0),
                disposed: AtomicBool::new(false),
            }
        });

        Self { inner }
    }

    /// Validates the configuration and schedules the first connection
    /// attempt. A configuration error leaves the handler offline without
    /// any retry.
    pub fn initialize(&self) -> Result<(), OpusError> {
        if let Err(e) = self.inner.config.validate() {
            let message = match &e {
                OpusError::Config(message) => message.clone(),
                other => other.to_string(),
            };
            error!("Invalid configuration: {}", message);
            self.inner.update_status(StatusInfo::offline(
                ThingStatusDetail::ConfigurationError,
                &message,
            ));
            self.inner.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        let mut tasks = self.inner.tasks();
        if tasks.retry.is_none() {
            debug!(
                "Connecting to {} in {:?}",
                self.inner.config.host(),
                SETTINGS.initial_connect_delay
            );
            tasks.retry = Some(
                self.inner
                    .schedule_connect("initial-connect", SETTINGS.initial_connect_delay),
            );
        }
        Ok(())
    }

    /// Attempts a connection as soon as no other scheduled work is running.
    /// Does nothing while already online.
    ///
    /// The lifecycle methods wait for the scheduler, so they must not be
    /// called from inside a [`HandlerCallback`].
    pub async fn connect(&self) {
        let inner = self.inner.clone();
        self.inner
            .scheduler
            .execute(async move { inner.connect().await })
            .await;
    }

    /// Tears down the connection. With `retry` a reconnect is scheduled.
    pub async fn disconnect(&self, retry: bool) {
        let inner = self.inner.clone();
        self.inner
            .scheduler
            .execute(async move { inner.disconnect(retry).await })
            .await;
    }

    /// Schedules a reconnect unless one is already pending. An online
    /// handler keeps its state; the attempt is skipped when it fires.
    pub fn retry_connect(&self) {
        let scheduled = self.inner.retry_connect();
        if scheduled && self.inner.connection_state() != ConnectionState::Online {
            self.inner.set_state(ConnectionState::OfflineRetrying);
        }
    }

    /// Shuts the handler down for good: no further connects or retries.
    pub async fn dispose(&self) {
        info!("Disposing handler for {}", self.inner.config.host());
        {
            let mut tasks = self.inner.tasks();
            self.inner.disposed.store(true, Ordering::SeqCst);
            tasks.cancel_all();
        }
        self.disconnect(false).await;
    }

    /// Handles a command for a channel id such as `port3::portoutput`.
    /// Invalid channels and commands are logged and dropped.
    pub async fn handle_command(&self, channel_id: &str, command: Command) {
        match channel_id.parse::<ChannelAddress>() {
            Ok(address) => self.dispatch(address, command).await,
            Err(e) => debug!(error = %e, "Dropping command"),
        }
    }

    /// Same as [`OpusHandler::handle_command`] with the group and verb given
    /// separately.
    pub async fn handle_channel_command(&self, group: &str, id: &str, command: Command) {
        match ChannelAddress::parse(group, id) {
            Ok(address) => self.dispatch(address, command).await,
            Err(e) => debug!(error = %e, "Dropping command"),
        }
    }

    async fn dispatch(&self, address: ChannelAddress, command: Command) {
        let inner = self.inner.clone();
        self.inner
            .scheduler
            .execute(async move { inner.run_command(address, command).await })
            .await;
    }

    /// Records and forwards a status change without tearing anything down.
    pub fn update_status(&self, status: StatusInfo) {
        self.inner.update_status(status);
    }

    pub fn status(&self) -> StatusInfo {
        self.inner.status()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    /// Watch the connection state.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state_tx.subscribe()
    }

    pub fn has_polling_task(&self) -> bool {
        self.inner.tasks().polling.is_some()
    }

    pub fn has_keepalive_task(&self) -> bool {
        self.inner.tasks().keepalive.is_some()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner.tasks().retry.is_some()
    }

    /// When the pending connection attempt is due, if any.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.inner.tasks().retry_deadline()
    }

    pub fn config(&self) -> &OpusConfig {
        &self.inner.config
    }

    pub fn capabilities(&self) -> &OpusCapabilities {
        &self.inner.capabilities
    }

    /// The state cache sitting in front of the framework callback.
    pub fn callback(&self) -> &Arc<StatefulHandlerCallback> {
        &self.inner.callback
    }

    pub fn protocol(&self) -> &OpusProtocolHandler {
        &self.inner.protocol
    }
}

impl Drop for OpusHandler {
    fn drop(&mut self) {
        debug!("Dropping OpusHandler, cancelling scheduled tasks");
        let mut tasks = self.inner.tasks();
        self.inner.disposed.store(true, Ordering::SeqCst);
        tasks.cancel_all();
        drop(tasks);
        self.inner.protocol.stop_decoding();
    }
}
