//! Session driver.
//!
//! A [`Session`] turns the callback-driven transport into blocking calls.
//! Callbacks append to the event queue; the poll cycle reads, flushes and
//! runs keepalive housekeeping while draining it; [`Session::run_loop`]
//! dispatches events to handlers; [`Session::fetch_response`] waits for one
//! specific acknowledgement and puts every other event back in order.
//!
//! Everything runs on the calling thread. The only blocking point is the
//! readability wait inside the poll cycle, which never exceeds half the
//! heartbeat so keepalive traffic keeps flowing during long waits.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use mqpoll_core::packet::QoS;

use crate::breaker::LoopBreaker;
use crate::bridge::Bridge;
use crate::config::{ConnectionInfo, SessionConfig};
use crate::error::{check, ClientError, Result};
use crate::events::{Event, EventKind};
use crate::status::Status;
use crate::timeout::{self, Timeout};
use crate::transport::{MqttTransport, Transport};

/// Event handler. At most one is registered per [`EventKind`].
pub type Handler = Box<dyn FnMut(&Event)>;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Closed,
    Destroyed,
}

/// One client connection lifecycle.
///
/// Not thread-safe: a session and its transport belong to one thread.
pub struct Session<T: Transport = MqttTransport> {
    /// `None` once destroyed.
    transport: Option<T>,
    bridge: Bridge,
    handlers: HashMap<EventKind, Handler>,
    info: ConnectionInfo,
    client_id: String,
    heartbeat: u16,
    protocol_timeout: Duration,
    breaker: LoopBreaker,
    state: SessionState,
}

impl Session<MqttTransport> {
    /// Create a session over the bundled TCP transport.
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let info = config.connection_info()?;
        let client_id = config.resolved_client_id();

        let transport = MqttTransport::new(client_id.clone(), config.clean_session)
            .map_err(|e| {
                warn!("Failed to create transport: {}", e);
                ClientError::NullAllocation("creating the client".into())
            })?
            .connect_timeout(config.connect_timeout_duration())
            .tls(info.ssl);

        Ok(Self::assemble(&config, info, client_id, transport))
    }
}

impl<T: Transport> Session<T> {
    /// Create a session over a caller-supplied transport.
    pub fn with_transport(config: SessionConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let info = config.connection_info()?;
        let client_id = config.resolved_client_id();
        Ok(Self::assemble(&config, info, client_id, transport))
    }

    fn assemble(config: &SessionConfig, info: ConnectionInfo, client_id: String, transport: T) -> Self {
        debug!(
            "Created session {} for {}:{} (heartbeat {}s)",
            client_id, info.host, info.port, config.heartbeat
        );
        Self {
            transport: Some(transport),
            bridge: Bridge::new(),
            handlers: HashMap::new(),
            info,
            client_id,
            heartbeat: config.heartbeat,
            protocol_timeout: config.protocol_timeout_duration(),
            breaker: LoopBreaker::new(),
            state: SessionState::Created,
        }
    }

    /// Connect and wait for the CONNACK. Calling it again reconnects.
    pub fn start(&mut self) -> Result<&mut Self> {
        let username = self.info.username.clone();
        let password = self.info.password.clone();
        let host = self.info.host.clone();
        let port = self.info.port;
        let heartbeat = self.heartbeat;

        // a CONNACK left over from an earlier attempt must not answer this one
        self.bridge.queue.retain(|event| event.kind() != EventKind::Connect);

        let transport = self.transport_mut()?;
        check(
            "setting credentials",
            transport.set_credentials(username.as_deref(), password.as_deref()),
        )?;
        check(
            &format!("connecting to {}", host),
            transport.connect(&host, port, heartbeat),
        )?;

        let event = self.fetch_response(EventKind::Connect, None, Timeout::Protocol)?;
        if let Event::Connect { status, message } = event {
            if status != 0 {
                debug!("Connection to {}:{} refused: {}", host, port, message);
                return Err(ClientError::Status {
                    status: Status::NoConn,
                    detail: message.to_string(),
                });
            }
        }

        debug!("Session {} started on {}:{}", self.client_id, host, port);
        self.state = SessionState::Started;
        Ok(self)
    }

    /// Disconnect. Closing a session that is not connected succeeds.
    pub fn close(&mut self) -> Result<&mut Self> {
        let action = format!("closing the connection to {}", self.info.host);
        match self.transport_mut()?.disconnect() {
            Ok(()) | Err(Status::NoConn) => {}
            Err(status) => return Err(ClientError::status(status, &action)),
        }

        if self.state == SessionState::Started {
            debug!("Session {} closed", self.client_id);
            self.state = SessionState::Closed;
        }
        Ok(self)
    }

    /// Release the transport, queued events and handlers. Never fails;
    /// repeated calls do nothing.
    pub fn destroy(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        // the transport goes before the handlers it could reach
        transport.destroy();
        drop(transport);

        self.bridge.queue.clear();
        self.handlers.clear();
        self.state = SessionState::Destroyed;
        debug!("Session {} destroyed", self.client_id);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_destroyed(&self) -> bool {
        self.transport.is_none()
    }

    /// Register the handler for `kind`, replacing any previous one.
    pub fn on_event<F>(&mut self, kind: EventKind, handler: F) -> Result<&mut Self>
    where
        F: FnMut(&Event) + 'static,
    {
        self.ensure_alive()?;
        self.handlers.insert(kind, Box::new(handler));
        Ok(self)
    }

    /// Alias of [`Session::on_event`].
    pub fn on<F>(&mut self, kind: EventKind, handler: F) -> Result<&mut Self>
    where
        F: FnMut(&Event) + 'static,
    {
        self.on_event(kind, handler)
    }

    /// Remove and return the handler for `kind`.
    pub fn clear_event_handler(&mut self, kind: EventKind) -> Result<Option<Handler>> {
        self.ensure_alive()?;
        Ok(self.handlers.remove(&kind))
    }

    /// Subscribe and wait for the SUBACK.
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<&mut Self> {
        let id = check(
            "subscribing to a topic",
            self.transport_mut()?.subscribe(topic, qos),
        )?;
        self.fetch_response(EventKind::Subscribe, Some(id), Timeout::Protocol)?;
        Ok(self)
    }

    /// Unsubscribe and wait for the UNSUBACK.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<&mut Self> {
        let id = check(
            "unsubscribing from a topic",
            self.transport_mut()?.unsubscribe(topic),
        )?;
        self.fetch_response(EventKind::Unsubscribe, Some(id), Timeout::Protocol)?;
        Ok(self)
    }

    /// Publish and wait until the publish completed its QoS flow.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl AsRef<[u8]>,
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self> {
        let id = check(
            "publishing a message",
            self.transport_mut()?
                .publish(topic, payload.as_ref(), qos, retain),
        )?;
        self.fetch_response(EventKind::Publish, Some(id), Timeout::Protocol)?;
        Ok(self)
    }

    /// Subscribe to each topic in turn, one acknowledged request at a time.
    pub fn subscribe_many<I, S>(&mut self, topics: I, qos: QoS) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            self.subscribe(topic.as_ref(), qos)?;
        }
        Ok(self)
    }

    /// Unsubscribe from each topic in turn.
    pub fn unsubscribe_many<I, S>(&mut self, topics: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for topic in topics {
            self.unsubscribe(topic.as_ref())?;
        }
        Ok(self)
    }

    /// Publish `(topic, payload)` pairs in order.
    pub fn publish_many<I, S, P>(&mut self, messages: I, qos: QoS, retain: bool) -> Result<&mut Self>
    where
        I: IntoIterator<Item = (S, P)>,
        S: AsRef<str>,
        P: AsRef<[u8]>,
    {
        for (topic, payload) in messages {
            self.publish(topic.as_ref(), payload, qos, retain)?;
        }
        Ok(self)
    }

    /// Dispatch events to handlers until `timeout` elapses or the loop is broken.
    pub fn run_loop(&mut self, timeout: impl Into<Timeout>) -> Result<()> {
        self.dispatch(timeout.into(), None)
    }

    /// Like [`Session::run_loop`], also passing every event to `callback`
    /// after its handler ran.
    pub fn run_loop_with<F>(&mut self, timeout: impl Into<Timeout>, mut callback: F) -> Result<()>
    where
        F: FnMut(&Event),
    {
        self.dispatch(timeout.into(), Some(&mut callback as &mut dyn FnMut(&Event)))
    }

    /// Dispatch whatever is available right now, then return.
    pub fn run_immediate(&mut self) -> Result<()> {
        self.run_loop(Timeout::IMMEDIATE)
    }

    /// Token that handlers can clone to break out of the running loop.
    ///
    /// The loop checks it after each event's handler and callback returned,
    /// so a handler is never interrupted.
    pub fn breaker(&self) -> LoopBreaker {
        self.breaker.clone()
    }

    /// Request that the loop stop after the event being dispatched. Outside
    /// a loop this stops the next loop after its first event.
    pub fn break_loop(&self) {
        self.breaker.break_loop();
    }

    fn dispatch(&mut self, timeout: Timeout, mut callback: Option<&mut dyn FnMut(&Event)>) -> Result<()> {
        self.ensure_alive()?;
        let deadline = timeout.resolve(self.protocol_timeout);
        let start = Instant::now();

        while let Some(event) = self.fetch_next_event(deadline, start)? {
            trace!("Dispatching {:?}", event);
            self.invoke_handler(&event);
            if let Some(callback) = callback.as_mut() {
                callback(&event);
            }
            if self.breaker.take() {
                debug!("Event loop broken");
                break;
            }
        }
        Ok(())
    }

    fn invoke_handler(&mut self, event: &Event) {
        if let Some(handler) = self.handlers.get_mut(&event.kind()) {
            handler(event);
        }
    }

    /// Wait for the next event of `kind` (and with correlation id `id` when
    /// given). Events that do not match go back to the queue in their
    /// original order. The matched event is passed to its handler before
    /// being returned.
    pub fn fetch_response(
        &mut self,
        kind: EventKind,
        id: Option<u16>,
        timeout: impl Into<Timeout>,
    ) -> Result<Event> {
        let deadline = timeout.into().resolve(self.protocol_timeout);
        self.fetch_response_since(kind, id, deadline, Instant::now())
    }

    fn fetch_response_since(
        &mut self,
        kind: EventKind,
        id: Option<u16>,
        deadline: Option<Duration>,
        start: Instant,
    ) -> Result<Event> {
        let mut unwanted = Vec::new();

        loop {
            let next = match self.fetch_next_event(deadline, start) {
                Ok(next) => next,
                Err(e) => {
                    self.bridge.queue.restore(unwanted);
                    return Err(e);
                }
            };

            let Some(event) = next else {
                trace!("No {} response, restoring {} events", kind, unwanted.len());
                self.bridge.queue.restore(unwanted);
                return Err(ClientError::Timeout(kind));
            };

            if event.kind() == kind && (id.is_none() || event.packet_id() == id) {
                trace!("Matched {:?}", event);
                self.bridge.queue.restore(unwanted);
                self.invoke_handler(&event);
                return Ok(event);
            }

            trace!("Deferring {:?}", event);
            unwanted.push(event);
        }
    }

    /// Next queued event, or `None` once `deadline` (measured from `start`)
    /// has passed. `None` deadline waits until an event arrives.
    fn fetch_next_event(&mut self, deadline: Option<Duration>, start: Instant) -> Result<Option<Event>> {
        let max_poll = self.max_poll_interval();
        let transport = self.transport.as_mut().ok_or(ClientError::Destroyed)?;

        if transport.wait_readable(Duration::ZERO) {
            check(
                "reading immediate inbound packets",
                transport.read_available(&mut self.bridge),
            )?;
        }

        loop {
            housekeeping(transport, &mut self.bridge)?;
            if let Some(event) = self.bridge.queue.pop_front() {
                return Ok(Some(event));
            }

            let remaining = timeout::remaining(deadline, start);
            if remaining == Some(Duration::ZERO) {
                return Ok(None);
            }

            let wait = remaining.map_or(max_poll, |r| r.min(max_poll));
            if transport.wait_readable(wait) {
                check(
                    "reading inbound packets",
                    transport.read_available(&mut self.bridge),
                )?;
            }
        }
    }

    /// Keepalive interval in seconds.
    pub fn heartbeat(&self) -> u16 {
        self.heartbeat
    }

    /// Longest single wait of the poll cycle: half the heartbeat.
    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat as u64) / 2
    }

    pub fn protocol_timeout(&self) -> Duration {
        self.protocol_timeout
    }

    pub fn set_protocol_timeout(&mut self, timeout: Duration) {
        self.protocol_timeout = timeout;
    }

    pub fn host(&self) -> &str {
        &self.info.host
    }

    pub fn port(&self) -> u16 {
        self.info.port
    }

    pub fn ssl(&self) -> bool {
        self.info.ssl
    }

    pub fn username(&self) -> Option<&str> {
        self.info.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.info.password.as_deref()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Events received but not yet dispatched.
    pub fn pending_events(&self) -> usize {
        self.bridge.queue().len()
    }

    pub fn transport(&self) -> Option<&T> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Result<&mut T> {
        self.transport.as_mut().ok_or(ClientError::Destroyed)
    }

    fn ensure_alive(&self) -> Result<()> {
        match self.transport {
            Some(_) => Ok(()),
            None => Err(ClientError::Destroyed),
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Flush pending writes, then run the transport's periodic maintenance.
fn housekeeping<T: Transport>(transport: &mut T, bridge: &mut Bridge) -> Result<()> {
    while transport.wants_to_write() {
        check("sending outbound packets", transport.flush_writes(bridge))?;
    }
    check(
        "handling stateful protocol packets",
        transport.perform_periodic_maintenance(bridge),
    )
}
