//! Adapts transport callbacks into queued events.

use bytes::Bytes;
use log::trace;
use mqpoll_core::packet::QoS;

use crate::events::Event;
use crate::queue::EventQueue;

/// Callback surface the transport fires into, one method per event kind.
///
/// The transport receives a `&mut dyn Callbacks` for the duration of a
/// single I/O step and cannot retain it afterwards.
pub trait Callbacks {
    /// CONNACK received with the given return code.
    fn on_connect(&mut self, code: u8);

    /// An outbound publish finished its QoS flow.
    fn on_publish(&mut self, packet_id: u16);

    /// SUBACK received.
    fn on_subscribe(&mut self, packet_id: u16, granted: &[u8]);

    /// UNSUBACK received.
    fn on_unsubscribe(&mut self, packet_id: u16);

    /// An inbound message is ready for delivery.
    fn on_message(&mut self, topic: &str, payload: Bytes, qos: QoS, retain: bool);
}

/// Owns the event queue and turns every callback into an [`Event`].
#[derive(Debug, Default)]
pub struct Bridge {
    pub(crate) queue: EventQueue,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    fn push(&mut self, event: Event) {
        trace!("Queued {:?}", event);
        self.queue.push(event);
    }
}

impl Callbacks for Bridge {
    fn on_connect(&mut self, code: u8) {
        self.push(Event::connect(code));
    }

    fn on_publish(&mut self, packet_id: u16) {
        self.push(Event::Publish { packet_id });
    }

    fn on_subscribe(&mut self, packet_id: u16, _granted: &[u8]) {
        self.push(Event::Subscribe { packet_id });
    }

    fn on_unsubscribe(&mut self, packet_id: u16) {
        self.push(Event::Unsubscribe { packet_id });
    }

    fn on_message(&mut self, topic: &str, payload: Bytes, qos: QoS, retain: bool) {
        self.push(Event::Message {
            topic: topic.to_string(),
            payload,
            retained: retain,
            qos,
        });
    }
}
