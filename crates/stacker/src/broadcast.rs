//! Keep-connected client hub.
//!
//! Clients holding a `KeepConnected` stream get told about every volume
//! the growth executor successfully creates. Delivery is best-effort: a
//! subscriber whose queue is full simply misses that notification, and a
//! disconnected subscriber is dropped on the next broadcast.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use haystack_proto::request::KeepConnectedResponse;

pub struct ClientHub {
    clients: DashMap<u64, mpsc::Sender<KeepConnectedResponse>>,
    next_id: AtomicU64,
    channel_size: usize,
}

impl ClientHub {
    pub fn new(channel_size: usize) -> Self {
        Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(0),
            channel_size,
        }
    }

    /// Register a subscriber; the receiver feeds its connection.
    pub fn subscribe(&self, client_name: &str) -> (u64, mpsc::Receiver<KeepConnectedResponse>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(self.channel_size);
        self.clients.insert(id, tx);
        debug!("client {} subscribed as #{}", client_name, id);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.clients.remove(&id);
        debug!("client #{} unsubscribed", id);
    }

    /// Fan a notification out to every current subscriber.
    pub fn broadcast(&self, resp: KeepConnectedResponse) {
        let mut gone = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().try_send(resp.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("client #{} queue full, notification dropped", entry.key());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    gone.push(*entry.key());
                }
            }
        }
        for id in gone {
            self.clients.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients.len()
    }
}
