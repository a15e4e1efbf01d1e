// src/core/events.rs

//! Defines the event bus used to publish status changes to any number of
//! untyped subscribers. The transport bridge subscribes here and forwards
//! messages onto the wire; tests subscribe directly.

use crate::core::messages::{
    AddressStatusEvent, ApplicationStatusEvent, ProcessInfo, ProcessStatusEvent,
    SupervisorStatusEvent, WireMessage,
};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::debug;

/// The capacity of the broadcast channel. Status events are small and
/// consumers are expected to keep up; laggards simply miss messages.
const EVENT_BUS_CAPACITY: usize = 1024;

/// The `EventBus` is the fire-and-forget distribution hub for every status
/// publication the agent makes.
#[derive(Debug)]
pub struct EventBus {
    sender: Sender<WireMessage>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    /// Provides a new receiver for a subscriber task.
    pub fn subscribe(&self) -> Receiver<WireMessage> {
        self.sender.subscribe()
    }

    /// Publishes a message to all subscribers. It's okay if there are none.
    pub fn publish(&self, message: WireMessage) {
        if self.sender.send(message).is_err() {
            debug!("Published a message with no active subscribers.");
        }
    }

    pub fn supervisor_status(&self, event: SupervisorStatusEvent) {
        self.publish(WireMessage::SupervisorStatus(event));
    }

    pub fn address_status(&self, event: AddressStatusEvent) {
        self.publish(WireMessage::AddressStatus(event));
    }

    pub fn application_status(&self, event: ApplicationStatusEvent) {
        self.publish(WireMessage::ApplicationStatus(event));
    }

    pub fn process_status(&self, event: ProcessStatusEvent) {
        self.publish(WireMessage::ProcessStatus(event));
    }

    pub fn authorization(&self, address: &str, authorized: bool) {
        self.publish(WireMessage::Auth {
            address: address.to_string(),
            authorized,
        });
    }

    pub fn process_info(&self, address: &str, processes: Vec<ProcessInfo>) {
        self.publish(WireMessage::Info {
            address: address.to_string(),
            processes,
        });
    }
}
