//! Connection lifecycle coordinator
//!
//! [`Coordinator`] is a cheap, cloneable handle. All state lives in a single
//! task that owns the transport, the request tracker, the keepalive monitor,
//! the reconnection controller and the update dispatcher. Handles talk to it
//! over a command channel; the transport talks to it through a
//! [`SessionSink`]; timers are deadlines the task computes on every turn of
//! its loop. Nothing else mutates connection state, so no locks guard it.
//!
//! # Lifecycle
//!
//! 1. **start**: the first connect attempt is made right away
//! 2. **handshake**: a system-info query goes out ahead of anything else;
//!    its answer moves the session to `Connected`
//! 3. **register**: every consumer's attributes are registered in chunks
//! 4. **run**: requests flow one at a time, keepalive fills silences
//! 5. **recover**: on loss the session is torn down and reconnected with
//!    backoff; repeated failures open the circuit breaker
//! 6. **stop**: pending requests fail with `Cancelled`, timers are cleared
//!
//! # Examples
//!
//! ```rust,no_run
//! use iclink_client::{ConnectionState, Coordinator};
//! use serde_json::json;
//!
//! # async fn example() -> iclink_core::Result<()> {
//! let coordinator = Coordinator::builder("192.168.1.40").build()?;
//! coordinator.start().await?;
//! coordinator.wait_for_state(ConnectionState::Connected).await?;
//!
//! let mut values = iclink_core::AttributeValues::new();
//! values.insert("STATUS".into(), json!("ON"));
//! coordinator.request_changes("C0003", values).await?;
//!
//! coordinator.stop().await?;
//! # Ok(())
//! # }
//! ```

use crate::availability::AvailabilityDebouncer;
use crate::batch::{Interest, SubscriptionBatcher};
use crate::builder::CoordinatorBuilder;
use crate::config::ConnectionConfig;
use crate::connection_state::{ConnectionState, StateTracker};
use crate::keepalive::{KeepaliveAction, KeepaliveMonitor};
use crate::metrics::{ClientMetrics, ConnectionStats, StatsSnapshot};
use crate::notification::{AvailabilityListener, UpdateDispatcher};
use crate::reconnect::{ReconnectionController, ReconnectionStrategy, RetryDecision};
use crate::request::{Completion, PendingRequest, RequestTracker};
use crate::subscription::{SubscriptionHandle, UpdateConsumer};
use crate::transport::{SessionEvent, SessionSink, Transport, TransportEvent};
use futures::future::OptionFuture;
use iclink_core::{
    commands, types, AttributeValues, Error, Message, Notification, Params, Response, Result,
    SystemInfo, TelemetryGuard,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

enum Command {
    Start {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Send {
        command: String,
        params: Params,
        completion: Completion,
        admitted: oneshot::Sender<Result<()>>,
    },
    Subscribe {
        objnam: String,
        attributes: BTreeSet<String>,
        consumer: Arc<dyn UpdateConsumer>,
        reply: oneshot::Sender<SubscriptionHandle>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
        reply: oneshot::Sender<bool>,
    },
    AddListener {
        listener: AvailabilityListener,
    },
    ReconnectNow {
        reply: oneshot::Sender<Result<()>>,
    },
}

struct Shared {
    config: ConnectionConfig,
    stats: Arc<ConnectionStats>,
    _telemetry: Option<TelemetryGuard>,
}

/// Handle to a connection coordinator
///
/// Clones share the same coordinator. The coordinator task stops and closes
/// the session once the last handle is dropped.
#[derive(Clone)]
pub struct Coordinator {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    available: watch::Receiver<bool>,
    system_info: watch::Receiver<Option<SystemInfo>>,
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Start configuring a coordinator for `host`
    pub fn builder(host: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(host)
    }

    /// Spawn the coordinator task; requires a Tokio runtime
    pub(crate) fn spawn(
        config: ConnectionConfig,
        transport: Box<dyn Transport>,
        strategy: Box<dyn ReconnectionStrategy>,
        metrics: Option<Arc<ClientMetrics>>,
        telemetry: Option<TelemetryGuard>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = StateTracker::new(metrics.clone());
        let (dispatcher, available_rx) =
            UpdateDispatcher::new(AvailabilityDebouncer::new(config.availability_debounce));
        let (system_info_tx, system_info_rx) = watch::channel(None);
        let stats = Arc::new(ConnectionStats::default());
        let now = Instant::now();

        let task = CoordinatorTask {
            transport,
            commands: commands_rx,
            events: events_rx,
            events_tx,
            generation: 0,
            running: false,
            session_open: false,
            protocol_errors: 0,
            reconnect_at: None,
            next_sweep: None,
            state,
            tracker: RequestTracker::new(config.deadlock_timeout, config.max_request_age),
            keepalive: KeepaliveMonitor::new(
                config.keepalive_interval,
                config.idle_timeout,
                config.max_missed_keepalives,
                now,
            ),
            reconnect: ReconnectionController::new(
                strategy,
                config.failure_threshold,
                config.circuit_cooldown,
            ),
            batcher: SubscriptionBatcher::new(config.batch_size),
            dispatcher,
            system_info: system_info_tx,
            stats: Arc::clone(&stats),
            metrics,
            config: config.clone(),
        };
        tokio::spawn(task.run());

        Self {
            commands: commands_tx,
            state: state_rx,
            available: available_rx,
            system_info: system_info_rx,
            shared: Arc::new(Shared {
                config,
                stats,
                _telemetry: telemetry,
            }),
        }
    }

    /// Begin connecting; returns once the first attempt is under way
    ///
    /// Calling `start` on a running coordinator does nothing.
    #[tracing::instrument(skip(self), fields(host = %self.shared.config.host))]
    pub async fn start(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Start { reply })?;
        rx.await.map_err(|_| Error::Cancelled)
    }

    /// Close the session, fail pending requests and cancel every timer
    ///
    /// The coordinator stays stopped until `start` is called again.
    #[tracing::instrument(skip(self), fields(host = %self.shared.config.host))]
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Stop { reply })?;
        rx.await.map_err(|_| Error::Cancelled)
    }

    /// Queue a request behind any others and optionally wait for its response
    ///
    /// Returns `Ok(None)` once the request is queued when
    /// `wait_for_response` is false.
    ///
    /// # Errors
    ///
    /// - `NotConnected` when no session is open and queuing is disabled
    /// - `CircuitOpen` while reconnection is suspended
    /// - `Timeout` when no response arrives within the response timeout, or
    ///   the request stalled the flow-control slot
    /// - `Rejected` when the controller answers with a failure code
    #[tracing::instrument(skip(self, params))]
    pub async fn send_request(
        &self,
        command: &str,
        params: Params,
        wait_for_response: bool,
    ) -> Result<Option<Response>> {
        let command = command.to_string();
        let (admitted, admitted_rx) = oneshot::channel();

        if !wait_for_response {
            self.submit(Command::Send {
                command,
                params,
                completion: Completion::Detached,
                admitted,
            })?;
            admitted_rx.await.map_err(|_| Error::Cancelled)??;
            return Ok(None);
        }

        let (tx, rx) = oneshot::channel();
        self.submit(Command::Send {
            command,
            params,
            completion: Completion::Caller(tx),
            admitted,
        })?;
        admitted_rx.await.map_err(|_| Error::Cancelled)??;

        match tokio::time::timeout(self.shared.config.response_timeout, rx).await {
            Ok(Ok(result)) => result.map(Some),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.shared.config.response_timeout.as_secs(),
                    "No response within the response timeout"
                );
                Err(Error::Timeout)
            }
        }
    }

    /// Change attribute values of one object and wait for the acknowledgement
    pub async fn request_changes(&self, objnam: &str, values: AttributeValues) -> Result<()> {
        self.send_request(
            commands::SET_PARAM_LIST,
            types::change_params(objnam, values),
            true,
        )
        .await
        .map(|_| ())
    }

    /// Register `consumer` for changes to `attributes` of `objnam`
    ///
    /// When a session is already connected the new attributes are registered
    /// with the controller right away.
    pub async fn subscribe<I, S, C>(
        &self,
        objnam: impl Into<String>,
        attributes: I,
        consumer: C,
    ) -> Result<SubscriptionHandle>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        C: UpdateConsumer + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Subscribe {
            objnam: objnam.into(),
            attributes: attributes.into_iter().map(Into::into).collect(),
            consumer: Arc::new(consumer),
            reply,
        })?;
        rx.await.map_err(|_| Error::Cancelled)
    }

    /// Detach a consumer; no callback reaches it after this returns
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::Unsubscribe {
            handle: handle.clone(),
            reply,
        })?;
        rx.await.map_err(|_| Error::Cancelled)
    }

    /// Call `listener` with every published availability change
    pub fn on_availability_changed<F>(&self, listener: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        if self
            .submit(Command::AddListener {
                listener: Arc::new(listener),
            })
            .is_err()
        {
            tracing::debug!("Coordinator gone, availability listener dropped");
        }
    }

    /// Attempt a connection now instead of waiting for the backoff delay
    ///
    /// Does nothing while connected or connecting. Fails with `CircuitOpen`
    /// while the breaker is open and with `NotConnected` when stopped.
    pub async fn reconnect_now(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.submit(Command::ReconnectNow { reply })?;
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::Cancelled)
    }

    /// Debounced availability
    pub fn is_available(&self) -> bool {
        *self.available.borrow()
    }

    /// Receiver following the debounced availability
    pub fn availability(&self) -> watch::Receiver<bool> {
        self.available.clone()
    }

    /// Controller identity from the last handshake
    pub fn system_info(&self) -> Option<SystemInfo> {
        self.system_info.borrow().clone()
    }

    /// Connection statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Configuration in use
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Cancelled)
    }
}

enum HandshakeOutcome {
    Completed(Response),
    Failed(Error),
}

struct CoordinatorTask {
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    generation: u64,
    running: bool,
    session_open: bool,
    protocol_errors: u32,
    reconnect_at: Option<Instant>,
    next_sweep: Option<Instant>,
    state: StateTracker,
    tracker: RequestTracker,
    keepalive: KeepaliveMonitor,
    reconnect: ReconnectionController,
    batcher: SubscriptionBatcher,
    dispatcher: UpdateDispatcher,
    system_info: watch::Sender<Option<SystemInfo>>,
    stats: Arc<ConnectionStats>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl CoordinatorTask {
    async fn run(mut self) {
        loop {
            let timer: OptionFuture<_> = self.next_deadline().map(sleep_until).into();
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
                Some(()) = timer => self.on_timer().await,
            }
        }
        tracing::debug!("Coordinator task finished");
    }

    fn next_deadline(&self) -> Option<Instant> {
        let keepalive = self
            .state
            .is(ConnectionState::Connected)
            .then(|| self.keepalive.deadline());
        [
            self.reconnect_at,
            self.next_sweep,
            self.tracker.deadlock_deadline(),
            self.dispatcher.deadline(),
            keepalive,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => {
                if self.running {
                    tracing::debug!("Coordinator already running");
                    let _ = reply.send(());
                    return;
                }
                tracing::info!(host = %self.config.host, port = self.config.port, "Starting coordinator");
                self.running = true;
                self.next_sweep = Some(Instant::now() + self.config.cleanup_interval);
                let _ = reply.send(());
                self.attempt_connect().await;
            }
            Command::Stop { reply } => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::Send {
                command,
                params,
                completion,
                admitted,
            } => match self.admit() {
                Ok(()) => {
                    let id = self
                        .tracker
                        .enqueue(&command, params, completion, Instant::now());
                    tracing::debug!(id, command = %command, queued = self.tracker.queued(), "Request queued");
                    let _ = admitted.send(Ok(()));
                    self.pump().await;
                }
                Err(e) => {
                    tracing::debug!(command = %command, error = %e, "Request refused");
                    let _ = admitted.send(Err(e));
                }
            },
            Command::Subscribe {
                objnam,
                attributes,
                consumer,
                reply,
            } => {
                let handle = self
                    .dispatcher
                    .subscribe(objnam.clone(), attributes.clone(), consumer);
                let _ = reply.send(handle);
                if self.state.is(ConnectionState::Connected) {
                    let mut interest = Interest::new();
                    interest.insert(objnam, attributes);
                    self.register_interest(&interest);
                    self.pump().await;
                }
            }
            Command::Unsubscribe { handle, reply } => {
                let _ = reply.send(self.dispatcher.unsubscribe(&handle));
            }
            Command::AddListener { listener } => self.dispatcher.add_listener(listener),
            Command::ReconnectNow { reply } => {
                let state = self.state.get();
                let decision = if !self.running {
                    Err(Error::NotConnected)
                } else {
                    match state {
                        ConnectionState::CircuitOpen => Err(Error::CircuitOpen {
                            retry_in: self
                                .reconnect
                                .circuit_remaining(Instant::now())
                                .unwrap_or_default(),
                        }),
                        ConnectionState::Disconnected => Ok(true),
                        ConnectionState::Connecting | ConnectionState::Connected => Ok(false),
                    }
                };
                let connect = matches!(decision, Ok(true));
                let _ = reply.send(decision.map(|_| ()));
                if connect {
                    tracing::info!("Manual reconnect requested");
                    self.reconnect_at = None;
                    self.count_reconnect_attempt();
                    self.attempt_connect().await;
                }
            }
        }
    }

    fn admit(&self) -> Result<()> {
        if self.state.is(ConnectionState::Connected)
            || (self.running && self.config.queue_while_disconnected)
        {
            return Ok(());
        }
        match self.reconnect.circuit_remaining(Instant::now()) {
            Some(retry_in) if self.state.is(ConnectionState::CircuitOpen) => {
                Err(Error::CircuitOpen { retry_in })
            }
            _ => Err(Error::NotConnected),
        }
    }

    async fn handle_event(&mut self, SessionEvent { generation, event }: SessionEvent) {
        if generation != self.generation || !self.session_open {
            tracing::trace!(generation, current = self.generation, "Ignoring event from a closed session");
            return;
        }
        let now = Instant::now();
        match event {
            TransportEvent::Message(Message::Response(response)) => {
                self.keepalive.record_received(now);
                self.keepalive.record_reply();
                self.protocol_errors = 0;
                self.on_response(response, now).await;
            }
            TransportEvent::Message(Message::Notification(notification)) => {
                self.keepalive.record_received(now);
                self.protocol_errors = 0;
                self.on_notification(notification);
            }
            TransportEvent::ProtocolError(detail) => self.on_protocol_error(detail).await,
            TransportEvent::Closed(reason) => self.session_failed(reason).await,
        }
        self.pump().await;
    }

    async fn on_response(&mut self, response: Response, now: Instant) {
        let Some((entry, elapsed)) = self.tracker.complete(&response, now) else {
            tracing::warn!(
                message_id = %response.message_id,
                command = %response.command,
                code = %response.response,
                "Response does not match the in-flight request"
            );
            return;
        };
        tracing::debug!(
            id = %response.message_id,
            command = %response.command,
            code = %response.response,
            elapsed_ms = elapsed.as_millis() as u64,
            "Response received"
        );
        let outcome = if response.is_success() {
            Ok(response)
        } else {
            Err(Error::Rejected {
                command: response.command,
                code: response.response,
            })
        };
        if let Some(handshake) = self.settle(entry, outcome, Some(elapsed)) {
            self.on_handshake(handshake).await;
        }
    }

    fn on_notification(&mut self, notification: Notification) {
        self.stats.notification_received();
        if let Some(ref m) = self.metrics {
            m.record_notification(&notification.command);
        }
        let invoked = self.dispatcher.dispatch(&notification.object_list);
        tracing::debug!(
            objects = notification.object_list.len(),
            invoked,
            "Notification dispatched"
        );
    }

    async fn on_protocol_error(&mut self, detail: String) {
        self.protocol_errors += 1;
        tracing::warn!(error = %detail, consecutive = self.protocol_errors, "Protocol error");
        if let Some(ref m) = self.metrics {
            m.record_error("protocol");
        }

        // The frame may have been a push as easily as the in-flight answer.
        // The slot stays taken until a matching response, the deadlock
        // timeout or teardown.
        if self.session_open && self.protocol_errors >= self.config.max_protocol_errors {
            let reason = format!("{} consecutive protocol errors", self.protocol_errors);
            self.session_failed(reason).await;
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();

        self.dispatcher.poll(now);

        if self.tracker.deadlock_deadline().is_some_and(|at| at <= now) {
            if let Some(entry) = self.tracker.fail_in_flight() {
                tracing::warn!(
                    id = %entry.request.message_id,
                    command = %entry.command(),
                    timeout_secs = self.config.deadlock_timeout.as_secs(),
                    "In-flight request unanswered, releasing flow control"
                );
                if let Some(handshake) = self.settle(entry, Err(Error::Timeout), None) {
                    self.on_handshake(handshake).await;
                }
            }
        }

        if self.next_sweep.is_some_and(|at| at <= now) {
            self.next_sweep = Some(now + self.config.cleanup_interval);
            let expired = self.tracker.sweep(now);
            if !expired.is_empty() {
                tracing::warn!(count = expired.len(), pending = self.tracker.len(), "Expired orphaned requests");
            }
            for entry in expired {
                if let Some(handshake) = self.settle(entry, Err(Error::Timeout), None) {
                    self.on_handshake(handshake).await;
                }
            }
        }

        if self.state.is(ConnectionState::Connected) {
            match self.keepalive.poll(now) {
                Some(KeepaliveAction::SendProbe) => self.send_keepalive(now),
                Some(KeepaliveAction::Disconnect(failure)) => {
                    self.connection_lost(failure.to_string()).await;
                }
                None => {}
            }
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.count_reconnect_attempt();
            self.attempt_connect().await;
        }

        self.pump().await;
    }

    /// Release the next queued request if the slot is free
    async fn pump(&mut self) {
        if !self.session_open {
            return;
        }
        let now = Instant::now();
        let Some(request) = self.tracker.next_to_send(now) else {
            return;
        };
        match self.transport.write(&request).await {
            Ok(()) => {
                self.keepalive.record_sent(now);
                self.stats.request_sent();
                tracing::debug!(
                    id = %request.message_id,
                    command = %request.command,
                    queued = self.tracker.queued(),
                    "Request written"
                );
            }
            Err(e) => {
                tracing::warn!(id = %request.message_id, error = %e, "Write failed");
                if let Some(entry) = self.tracker.fail_in_flight() {
                    // the session is failed below either way
                    let _ = self.settle(entry, Err(e.clone()), None);
                }
                self.session_failed(format!("write failed: {}", e)).await;
            }
        }
    }

    /// Deliver an outcome to whoever waits on `entry`
    ///
    /// Handshake outcomes are handed back for the caller to act on.
    fn settle(
        &mut self,
        entry: PendingRequest,
        outcome: Result<Response>,
        elapsed: Option<Duration>,
    ) -> Option<HandshakeOutcome> {
        let elapsed = elapsed.unwrap_or_else(|| entry.created.elapsed());
        match &outcome {
            Ok(_) => {
                self.stats.request_completed(elapsed);
                if let Some(ref m) = self.metrics {
                    m.record_request(entry.command(), "success", elapsed.as_secs_f64());
                }
            }
            Err(e) => {
                self.stats.request_failed();
                if let Some(ref m) = self.metrics {
                    m.record_request(entry.command(), "error", elapsed.as_secs_f64());
                    m.record_error(e.kind());
                }
            }
        }

        let command = entry.request.command;
        match entry.completion {
            Completion::Caller(tx) => {
                let _ = tx.send(outcome);
                None
            }
            Completion::Detached => {
                if let Err(e) = outcome {
                    tracing::warn!(command = %command, error = %e, "Unawaited request failed");
                }
                None
            }
            Completion::Handshake => Some(match outcome {
                Ok(response) => HandshakeOutcome::Completed(response),
                Err(e) => HandshakeOutcome::Failed(e),
            }),
            Completion::Keepalive => {
                match outcome {
                    Ok(_) => tracing::trace!("Keepalive answered"),
                    Err(e) => tracing::debug!(error = %e, "Keepalive probe failed"),
                }
                None
            }
            Completion::Registration { pairs } => {
                match outcome {
                    Ok(response) => {
                        let updates = response.object_updates();
                        let invoked = self.dispatcher.dispatch(&updates);
                        tracing::debug!(pairs, objects = updates.len(), invoked, "Registration acknowledged");
                    }
                    Err(e) => {
                        tracing::warn!(pairs, error = %e, "Registration chunk failed, continuing with the rest");
                    }
                }
                None
            }
        }
    }

    async fn on_handshake(&mut self, outcome: HandshakeOutcome) {
        match outcome {
            HandshakeOutcome::Completed(response) => self.session_established(response),
            HandshakeOutcome::Failed(error) => {
                self.connect_failed(format!("handshake failed: {}", error)).await
            }
        }
    }

    async fn attempt_connect(&mut self) {
        self.generation += 1;
        self.state.transition(ConnectionState::Connecting);

        let sink = SessionSink::new(self.generation, self.events_tx.clone());
        let host = self.config.host.clone();
        let port = self.config.port;
        tracing::info!(host = %host, port, generation = self.generation, "Connecting to controller");

        let opened =
            tokio::time::timeout(self.config.connect_timeout, self.transport.open(&host, port, sink))
                .await;
        match opened {
            Ok(Ok(())) => {
                let now = Instant::now();
                self.session_open = true;
                self.protocol_errors = 0;
                self.keepalive.reset(now);
                self.tracker.enqueue_front(
                    commands::GET_PARAM_LIST,
                    types::handshake_params(),
                    Completion::Handshake,
                    now,
                );
                self.pump().await;
            }
            Ok(Err(e)) => self.connect_failed(e.to_string()).await,
            Err(_) => {
                let reason = format!(
                    "connect timed out after {}s",
                    self.config.connect_timeout.as_secs()
                );
                self.connect_failed(reason).await;
            }
        }
    }

    fn session_established(&mut self, response: Response) {
        let info = SystemInfo::from_response(&response);
        if let Some(ref info) = info {
            tracing::info!(
                prop_name = %info.prop_name,
                version = %info.sw_version,
                metric = info.uses_metric,
                "Controller identified"
            );
        }
        self.system_info.send_replace(info);

        self.reconnect.on_connected();
        self.protocol_errors = 0;
        self.state.transition(ConnectionState::Connected);
        self.stats.connected();
        if let Some(ref m) = self.metrics {
            m.record_reconnection_success();
        }
        self.dispatcher.connected();

        let interest = self.dispatcher.interest();
        self.register_interest(&interest);
    }

    fn register_interest(&mut self, interest: &Interest) {
        let chunks = self.batcher.plan(interest);
        if chunks.is_empty() {
            return;
        }
        tracing::info!(
            chunks = chunks.len(),
            pairs = chunks.iter().map(|c| c.pairs()).sum::<usize>(),
            batch_size = self.batcher.batch_size(),
            "Registering attribute interest"
        );
        let now = Instant::now();
        for chunk in chunks {
            if let Some(ref m) = self.metrics {
                m.record_registration_chunk(chunk.pairs() as u64);
            }
            self.tracker.enqueue(
                commands::REQUEST_PARAM_LIST,
                chunk.params(),
                Completion::Registration {
                    pairs: chunk.pairs(),
                },
                now,
            );
        }
    }

    fn send_keepalive(&mut self, now: Instant) {
        tracing::debug!(missed = self.keepalive.missed(), "Sending keepalive probe");
        self.stats.keepalive_sent();
        if let Some(ref m) = self.metrics {
            m.record_keepalive();
        }
        self.tracker.enqueue(
            commands::GET_PARAM_LIST,
            types::keepalive_params(),
            Completion::Keepalive,
            now,
        );
    }

    fn count_reconnect_attempt(&self) {
        self.stats.reconnect_attempt();
        if let Some(ref m) = self.metrics {
            m.record_reconnection_attempt();
        }
    }

    /// The open session broke, during handshake or after
    async fn session_failed(&mut self, reason: String) {
        if !self.session_open {
            return;
        }
        if self.state.is(ConnectionState::Connected) {
            self.connection_lost(reason).await;
        } else {
            self.connect_failed(reason).await;
        }
    }

    async fn connect_failed(&mut self, reason: String) {
        self.teardown(&reason).await;
        let now = Instant::now();
        match self.reconnect.on_attempt_failed(now) {
            RetryDecision::Retry(delay) => {
                tracing::warn!(
                    reason = %reason,
                    failures = self.reconnect.consecutive_failures(),
                    retry_in_secs = delay.as_secs_f64(),
                    "Connection attempt failed"
                );
                self.state.transition(ConnectionState::Disconnected);
                self.reconnect_at = Some(now + delay);
            }
            RetryDecision::OpenCircuit(cooldown) => {
                tracing::error!(
                    reason = %reason,
                    failures = self.reconnect.consecutive_failures(),
                    cooldown_secs = cooldown.as_secs(),
                    "Circuit breaker open, reconnection suspended"
                );
                self.state.transition(ConnectionState::CircuitOpen);
                self.reconnect_at = Some(now + cooldown);
                self.stats.circuit_opened();
                if let Some(ref m) = self.metrics {
                    m.record_circuit_open();
                }
            }
        }
    }

    async fn connection_lost(&mut self, reason: String) {
        tracing::warn!(reason = %reason, "Connection to controller lost");
        self.teardown(&reason).await;
        let now = Instant::now();
        self.state.transition(ConnectionState::Disconnected);
        self.dispatcher.connection_lost(now);
        let delay = self.reconnect.on_connection_lost();
        self.reconnect_at = Some(now + delay);
        tracing::info!(retry_in_secs = delay.as_secs_f64(), "Reconnect scheduled");
    }

    async fn teardown(&mut self, reason: &str) {
        self.generation += 1;
        self.session_open = false;
        self.transport.close().await;

        let failed = self
            .tracker
            .reset_session(self.config.queue_while_disconnected);
        let mut discarded = 0;
        for entry in failed {
            if entry.completion.is_session_bound() {
                discarded += 1;
                continue;
            }
            let _ = self.settle(entry, Err(Error::Transport(reason.to_string())), None);
        }
        if discarded > 0 {
            tracing::debug!(discarded, "Discarded requests of the closed session");
        }
    }

    async fn stop(&mut self) {
        if self.running {
            tracing::info!("Stopping coordinator");
        }
        self.running = false;
        self.reconnect_at = None;
        self.next_sweep = None;
        self.generation += 1;
        self.session_open = false;
        self.transport.close().await;

        for entry in self.tracker.drain() {
            tracing::debug!(id = %entry.request.message_id, kind = entry.completion.kind(), "Cancelling request");
            let _ = self.settle(entry, Err(Error::Cancelled), None);
        }
        self.reconnect.reset();
        self.protocol_errors = 0;
        self.state.transition(ConnectionState::Disconnected);
        self.dispatcher.force_unavailable();
    }
}
