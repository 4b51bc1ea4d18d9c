//! Bounded per-device mailboxes between the MQTT observer and driver tasks.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::message::DeviceMessage;
use crate::topic::TopicKind;

pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Receiving end of one device's mailbox.
#[derive(Debug)]
pub struct Mailbox {
    device: String,
    rx: mpsc::Receiver<DeviceMessage>,
}

impl Mailbox {
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Next message; `None` once the mailbox is closed and drained.
    pub async fn recv(&mut self) -> Option<DeviceMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DeviceMessage> {
        self.rx.try_recv().ok()
    }
}

/// Outcome of a non-blocking offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Delivered,
    /// The mailbox is full; the message was dropped.
    Full,
    /// The reader went away; the mailbox was removed.
    Closed,
    NoMailbox,
}

#[derive(Debug)]
pub(crate) struct MailboxRegistry {
    senders: DashMap<String, mpsc::Sender<DeviceMessage>>,
    /// Subscribed topic -> (device, kind), for topics outside the default family.
    routes: DashMap<String, (String, TopicKind)>,
    capacity: usize,
}

impl MailboxRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: DashMap::new(),
            routes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Create the mailbox of `device` unless a live one exists.
    pub fn open(&self, device: &str) -> Option<Mailbox> {
        let (tx, rx) = mpsc::channel(self.capacity);
        match self.senders.entry(device.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_closed() {
                    return None;
                }
                entry.insert(tx);
            }
            Entry::Vacant(entry) => {
                entry.insert(tx);
            }
        }
        Some(Mailbox {
            device: device.to_string(),
            rx,
        })
    }

    /// Hand `message` to its device's mailbox without waiting.
    pub fn offer(&self, message: DeviceMessage) -> Offer {
        let device = message.device().to_string();
        let Some(sender) = self.senders.get(&device).map(|s| s.clone()) else {
            tracing::debug!(
                device = %device,
                kind = message.kind(),
                "No mailbox for device, dropping message"
            );
            return Offer::NoMailbox;
        };
        match sender.try_send(message) {
            Ok(()) => Offer::Delivered,
            Err(TrySendError::Full(message)) => {
                tracing::error!(
                    device = %device,
                    kind = message.kind(),
                    capacity = self.capacity,
                    "Mailbox full, dropping message"
                );
                Offer::Full
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(device = %device, "Mailbox reader gone, removing mailbox");
                self.senders.remove_if(&device, |_, s| s.is_closed());
                Offer::Closed
            }
        }
    }

    /// Remember that publishes on `topic` belong to `device` as `kind`.
    pub fn route(&self, topic: &str, device: &str, kind: TopicKind) {
        if let Some(previous) = self
            .routes
            .insert(topic.to_string(), (device.to_string(), kind))
        {
            if previous.0 != device {
                tracing::warn!(
                    topic = %topic,
                    previous = %previous.0,
                    device = %device,
                    "Topic rebound to another device"
                );
            }
        }
    }

    pub fn resolve(&self, topic: &str) -> Option<(String, TopicKind)> {
        self.routes.get(topic).map(|r| r.value().clone())
    }

    #[cfg(test)]
    pub fn contains(&self, device: &str) -> bool {
        self.senders.contains_key(device)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Drop every sender; readers drain what is queued and then see `None`.
    pub fn close(&self) {
        self.senders.clear();
        self.routes.clear();
    }
}
