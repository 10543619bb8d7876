//! In-memory broker used by the session tests.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use mqpoll_core::packet::QoS;
use mqpoll_core::topic;

use crate::bridge::Callbacks;
use crate::status::Status;
use crate::transport::{Outcome, Transport};

/// Operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum MockOp {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Publish,
    Flush,
    Read,
    Maintenance,
}

/// Something the broker sends back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delivery {
    Connack(u8),
    Puback(u16),
    Suback(u16),
    Unsuback(u16),
    Message {
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
}

/// A request written by the client, processed by the broker on flush.
#[derive(Debug, Clone)]
enum Request {
    Connect,
    Subscribe(u16, String, QoS),
    Unsubscribe(u16, String),
    Publish {
        id: u16,
        topic: String,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    },
}

pub(crate) struct MockTransport {
    connected: bool,
    /// Closed by a refused CONNACK; I/O steps are no-ops until reconnect.
    refused: bool,
    connack_code: u8,
    ack_requests: bool,
    keepalive: Duration,
    last_seen: Instant,
    next_id: u16,
    subscriptions: Vec<(String, QoS)>,
    retained: BTreeMap<String, (Bytes, QoS)>,
    requests: VecDeque<Request>,
    inbox: VecDeque<Delivery>,
    failures: HashMap<MockOp, Status>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) connects: Vec<(String, u16, u16)>,
    pub(crate) maintenance_calls: usize,
    destroyed: Rc<Cell<usize>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            connected: false,
            refused: false,
            connack_code: 0,
            ack_requests: true,
            keepalive: Duration::ZERO,
            last_seen: Instant::now(),
            next_id: 0,
            subscriptions: Vec::new(),
            retained: BTreeMap::new(),
            requests: VecDeque::new(),
            inbox: VecDeque::new(),
            failures: HashMap::new(),
            username: None,
            password: None,
            connects: Vec::new(),
            maintenance_calls: 0,
            destroyed: Rc::new(Cell::new(0)),
        }
    }

    /// Answer the next CONNECT with this return code.
    pub(crate) fn refuse_with(mut self, code: u8) -> Self {
        self.connack_code = code;
        self
    }

    /// Answer every later CONNECT with this return code.
    pub(crate) fn set_connack_code(&mut self, code: u8) {
        self.connack_code = code;
    }

    /// Stop acknowledging subscribe/unsubscribe/publish requests.
    pub(crate) fn silent(mut self) -> Self {
        self.ack_requests = false;
        self
    }

    /// Make the next call of `op` fail with `status`.
    pub(crate) fn fail_next(&mut self, op: MockOp, status: Status) {
        self.failures.insert(op, status);
    }

    /// Queue a delivery as if the broker had sent it unprompted.
    pub(crate) fn inject(&mut self, delivery: Delivery) {
        self.inbox.push_back(delivery);
    }

    /// Counts `destroy` calls, observable after the transport is gone.
    pub(crate) fn destroy_counter(&self) -> Rc<Cell<usize>> {
        Rc::clone(&self.destroyed)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    fn injected_failure(&mut self, op: MockOp) -> Outcome {
        match self.failures.remove(&op) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    /// The broker drops clients silent for more than 1.5 keepalive periods.
    fn check_alive(&mut self) -> Outcome {
        if !self.connected {
            return Err(Status::NoConn);
        }
        if !self.keepalive.is_zero() && self.last_seen.elapsed() > self.keepalive * 3 / 2 {
            self.connected = false;
            self.requests.clear();
            self.inbox.clear();
            return Err(Status::ConnLost);
        }
        Ok(())
    }

    fn next_id(&mut self) -> u16 {
        self.next_id = match self.next_id.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        self.next_id
    }

    fn process(&mut self, request: Request, callbacks: &mut dyn Callbacks) {
        match request {
            Request::Connect => self.inbox.push_back(Delivery::Connack(self.connack_code)),
            Request::Subscribe(id, filter, qos) => {
                self.subscriptions.retain(|(f, _)| *f != filter);
                self.subscriptions.push((filter.clone(), qos));
                if self.ack_requests {
                    self.inbox.push_back(Delivery::Suback(id));
                }
                let retained: Vec<_> = self
                    .retained
                    .iter()
                    .filter(|(name, _)| topic::matches(name, &filter))
                    .map(|(name, (payload, stored))| Delivery::Message {
                        topic: name.clone(),
                        payload: payload.clone(),
                        qos: (*stored).min(qos),
                        retain: true,
                    })
                    .collect();
                self.inbox.extend(retained);
            }
            Request::Unsubscribe(id, filter) => {
                self.subscriptions.retain(|(f, _)| *f != filter);
                if self.ack_requests {
                    self.inbox.push_back(Delivery::Unsuback(id));
                }
            }
            Request::Publish {
                id,
                topic: name,
                payload,
                qos,
                retain,
            } => {
                if retain {
                    if payload.is_empty() {
                        self.retained.remove(&name);
                    } else {
                        self.retained.insert(name.clone(), (payload.clone(), qos));
                    }
                }
                let matching: Vec<QoS> = self
                    .subscriptions
                    .iter()
                    .filter(|(filter, _)| topic::matches(&name, filter))
                    .map(|(_, granted)| (*granted).min(qos))
                    .collect();

                if self.ack_requests {
                    match qos {
                        QoS::AtMostOnce => callbacks.on_publish(id),
                        _ => self.inbox.push_back(Delivery::Puback(id)),
                    }
                }
                for qos in matching {
                    self.inbox.push_back(Delivery::Message {
                        topic: name.clone(),
                        payload: payload.clone(),
                        qos,
                        retain: false,
                    });
                }
            }
        }
    }
}

impl Transport for MockTransport {
    fn set_credentials(&mut self, username: Option<&str>, password: Option<&str>) -> Outcome {
        self.username = username.map(str::to_string);
        self.password = password.map(str::to_string);
        Ok(())
    }

    fn connect(&mut self, host: &str, port: u16, keepalive: u16) -> Outcome {
        self.injected_failure(MockOp::Connect)?;
        self.connects.push((host.to_string(), port, keepalive));
        self.connected = true;
        self.refused = false;
        self.keepalive = Duration::from_secs(keepalive as u64);
        self.last_seen = Instant::now();
        self.requests.clear();
        self.inbox.clear();
        self.requests.push_back(Request::Connect);
        Ok(())
    }

    fn disconnect(&mut self) -> Outcome {
        self.injected_failure(MockOp::Disconnect)?;
        if self.refused {
            self.refused = false;
            return Ok(());
        }
        if !self.connected {
            return Err(Status::NoConn);
        }
        self.connected = false;
        self.requests.clear();
        self.inbox.clear();
        Ok(())
    }

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Outcome<u16> {
        self.injected_failure(MockOp::Subscribe)?;
        self.check_alive()?;
        let id = self.next_id();
        self.requests
            .push_back(Request::Subscribe(id, topic.to_string(), qos));
        Ok(id)
    }

    fn unsubscribe(&mut self, topic: &str) -> Outcome<u16> {
        self.injected_failure(MockOp::Unsubscribe)?;
        self.check_alive()?;
        let id = self.next_id();
        self.requests
            .push_back(Request::Unsubscribe(id, topic.to_string()));
        Ok(id)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Outcome<u16> {
        self.injected_failure(MockOp::Publish)?;
        self.check_alive()?;
        let id = self.next_id();
        self.requests.push_back(Request::Publish {
            id,
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
            qos,
            retain,
        });
        Ok(id)
    }

    fn wants_to_write(&self) -> bool {
        self.connected && !self.requests.is_empty()
    }

    fn flush_writes(&mut self, callbacks: &mut dyn Callbacks) -> Outcome {
        self.injected_failure(MockOp::Flush)?;
        if self.refused {
            return Ok(());
        }
        self.check_alive()?;
        while let Some(request) = self.requests.pop_front() {
            self.process(request, callbacks);
        }
        Ok(())
    }

    fn read_available(&mut self, callbacks: &mut dyn Callbacks) -> Outcome {
        self.injected_failure(MockOp::Read)?;
        if self.refused {
            return Ok(());
        }
        self.check_alive()?;
        while let Some(delivery) = self.inbox.pop_front() {
            match delivery {
                Delivery::Connack(code) => {
                    callbacks.on_connect(code);
                    if code != 0 {
                        self.connected = false;
                        self.refused = true;
                        self.inbox.clear();
                        break;
                    }
                }
                Delivery::Puback(id) => callbacks.on_publish(id),
                Delivery::Suback(id) => callbacks.on_subscribe(id, &[0]),
                Delivery::Unsuback(id) => callbacks.on_unsubscribe(id),
                Delivery::Message {
                    topic,
                    payload,
                    qos,
                    retain,
                } => callbacks.on_message(&topic, payload, qos, retain),
            }
        }
        Ok(())
    }

    fn perform_periodic_maintenance(&mut self, _callbacks: &mut dyn Callbacks) -> Outcome {
        self.injected_failure(MockOp::Maintenance)?;
        if self.refused {
            return Ok(());
        }
        self.check_alive()?;
        self.maintenance_calls += 1;
        self.last_seen = Instant::now();
        Ok(())
    }

    fn wait_readable(&mut self, timeout: Duration) -> bool {
        if !self.inbox.is_empty() {
            return true;
        }
        std::thread::sleep(timeout);
        false
    }

    fn destroy(&mut self) {
        self.connected = false;
        self.refused = false;
        self.requests.clear();
        self.inbox.clear();
        self.destroyed.set(self.destroyed.get() + 1);
    }
}
