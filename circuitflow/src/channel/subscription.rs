//! Subscriptions to the response stream.

use crate::core::StageId;
use crate::protocol::Response;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Debug)]
struct Listener {
    kinds: Vec<StageId>,
    tx: mpsc::UnboundedSender<Response>,
}

/// Registry of attached listeners, routed by kind.
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    entries: DashMap<u64, Listener>,
    next_id: AtomicU64,
}

impl Listeners {
    /// Attaches a listener for the given kinds.
    pub(crate) fn attach(self: &Arc<Self>, kinds: &[StageId]) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.entries.insert(
            id,
            Listener {
                kinds: kinds.to_vec(),
                tx,
            },
        );
        debug!(subscription = id, ?kinds, "Listener attached");

        Subscription {
            id,
            kinds: kinds.to_vec(),
            rx,
            listeners: Arc::downgrade(self),
            attached: true,
        }
    }

    /// Detaches a listener. Returns false if it was not attached.
    pub(crate) fn detach(&self, id: u64) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            debug!(subscription = id, "Listener detached");
        }
        removed
    }

    /// Delivers a response to every listener routed to its kind.
    ///
    /// Returns the number of listeners that received it.
    pub(crate) fn deliver(&self, response: &Response) -> usize {
        let kind = response.kind();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.entries.iter() {
            if !entry.kinds.contains(&kind) {
                continue;
            }
            if entry.tx.send(response.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.entries.remove(&id);
        }

        trace!(request = %response.id, stage = %kind, delivered, "Response delivered");
        delivered
    }

    /// Returns the number of attached listeners.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A stream of responses for a set of kinds.
///
/// Dropping the subscription detaches it; [`Subscription::unsubscribe`]
/// does the same explicitly.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kinds: Vec<StageId>,
    rx: mpsc::UnboundedReceiver<Response>,
    listeners: Weak<Listeners>,
    attached: bool,
}

impl Subscription {
    /// Returns the subscription id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the kinds this subscription is routed.
    #[must_use]
    pub fn kinds(&self) -> &[StageId] {
        &self.kinds
    }

    /// Returns true until unsubscribed.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Waits for the next response.
    ///
    /// Returns `None` once the channel is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<Response> {
        self.rx.recv().await
    }

    /// Returns a buffered response without waiting.
    pub fn try_recv(&mut self) -> Option<Response> {
        self.rx.try_recv().ok()
    }

    /// Polls for the next response.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Response>> {
        self.rx.poll_recv(cx)
    }

    /// Detaches from the channel. Buffered responses are discarded.
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.detach(self.id);
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
