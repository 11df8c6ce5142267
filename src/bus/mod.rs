//! Message Bus — bounded, per-subscriber fan-out for inbound and
//! outbound dispatch messages.
//!
//! The `comm` module elsewhere in this crate fans out over a single
//! `tokio::sync::broadcast` channel: every subscriber shares one ring
//! buffer, so a slow subscriber causes `Lagged` errors for *all*
//! subscribers, not a silent drop scoped to itself. That doesn't
//! satisfy a bus where each subscriber gets its own bounded queue and a
//! full queue only drops messages for that one subscriber. This module
//! rebuilds the same `sender()`/`subscribe()` shape `comm` exposes, but
//! over one bounded `tokio::sync::mpsc` channel per subscriber.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Default per-subscriber queue depth when a bus is built with
/// [`MessageBus::new`] instead of [`MessageBus::with_capacity`].
pub const DEFAULT_CAPACITY: usize = 256;

/// A message arriving from a channel connector, destined for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_type: String,
    pub user_id: String,
    pub session_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
}

/// A message produced by dispatch, destined for a channel connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_type: String,
    pub user_id: String,
    pub session_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
}

struct Fanout<T> {
    subscribers: Mutex<Vec<mpsc::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone> Fanout<T> {
    fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    async fn subscribe(&self) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Publish to every live subscriber. A subscriber whose queue is
    /// full has the message dropped for it only; other subscribers are
    /// unaffected. Subscribers whose receiver has been dropped are
    /// pruned.
    async fn publish(&self, msg: T, label: &'static str) {
        let mut subs = self.subscribers.lock().await;
        subs.retain_mut(|tx| match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(stream = label, "bus: subscriber queue full, dropping message for it");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Drop every live subscriber sender, closing their receivers so
    /// any pending or future `recv()` resolves to `None`.
    async fn close(&self) {
        self.subscribers.lock().await.clear();
    }
}

/// Bounded, per-subscriber fan-out of [`InboundMessage`] and
/// [`OutboundMessage`] streams.
///
/// `Start`/`Stop` track a simple running flag so `publish_*` can reject
/// traffic once stopped, mirroring the Worker Pool's lifecycle guard.
pub struct MessageBus {
    inbound: Fanout<InboundMessage>,
    outbound: Fanout<OutboundMessage>,
    started: Arc<tokio::sync::RwLock<bool>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inbound: Fanout::new(capacity),
            outbound: Fanout::new(capacity),
            started: Arc::new(tokio::sync::RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> CoreResult<()> {
        let mut started = self.started.write().await;
        if *started {
            return Err(CoreError::state("message bus already started"));
        }
        *started = true;
        Ok(())
    }

    /// Idempotent: stopping an already-stopped (or never-started) bus
    /// is a no-op. Closes every live subscriber queue so `recv()` calls
    /// on outstanding `subscribe_inbound`/`subscribe_outbound` receivers
    /// observe the bus stopping rather than hanging forever.
    pub async fn stop(&self) -> CoreResult<()> {
        let mut started = self.started.write().await;
        if !*started {
            return Ok(());
        }
        *started = false;
        drop(started);
        self.inbound.close().await;
        self.outbound.close().await;
        Ok(())
    }

    async fn require_started(&self) -> CoreResult<()> {
        if !*self.started.read().await {
            return Err(CoreError::state("message bus is not started"));
        }
        Ok(())
    }

    pub async fn publish_inbound(&self, msg: InboundMessage) -> CoreResult<()> {
        self.require_started().await?;
        self.inbound.publish(msg, "inbound").await;
        Ok(())
    }

    pub async fn publish_outbound(&self, msg: OutboundMessage) -> CoreResult<()> {
        self.require_started().await?;
        self.outbound.publish(msg, "outbound").await;
        Ok(())
    }

    pub async fn subscribe_inbound(&self) -> mpsc::Receiver<InboundMessage> {
        self.inbound.subscribe().await
    }

    pub async fn subscribe_outbound(&self) -> mpsc::Receiver<OutboundMessage> {
        self.outbound.subscribe().await
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inbound() -> InboundMessage {
        InboundMessage {
            channel_type: "telegram".into(),
            user_id: "42".into(),
            session_id: "telegram:42".into(),
            content: "hi".into(),
            timestamp: Utc::now(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn publish_before_start_is_rejected() {
        let bus = MessageBus::new();
        assert!(bus.publish_inbound(sample_inbound()).await.is_err());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let bus = MessageBus::new();
        bus.start().await.unwrap();
        assert!(bus.start().await.is_err());
    }

    #[tokio::test]
    async fn each_subscriber_receives_every_message_in_order() {
        let bus = MessageBus::new();
        bus.start().await.unwrap();

        let mut sub_a = bus.subscribe_inbound().await;
        let mut sub_b = bus.subscribe_inbound().await;

        for i in 0..5 {
            let mut msg = sample_inbound();
            msg.content = i.to_string();
            bus.publish_inbound(msg).await.unwrap();
        }

        for i in 0..5 {
            assert_eq!(sub_a.recv().await.unwrap().content, i.to_string());
            assert_eq!(sub_b.recv().await.unwrap().content, i.to_string());
        }
    }

    #[tokio::test]
    async fn full_subscriber_queue_drops_only_for_that_subscriber() {
        let bus = MessageBus::with_capacity(1);
        bus.start().await.unwrap();

        let mut slow = bus.subscribe_inbound().await;
        let mut fast = bus.subscribe_inbound().await;

        bus.publish_inbound(sample_inbound()).await.unwrap();
        // fast drains immediately, freeing its slot; slow does not.
        assert_eq!(fast.recv().await.unwrap().content, "hi");

        // slow's queue (capacity 1) is still full; this publish is dropped for it only.
        let mut second = sample_inbound();
        second.content = "second".into();
        bus.publish_inbound(second.clone()).await.unwrap();

        // slow only ever sees the first message.
        assert_eq!(slow.recv().await.unwrap().content, "hi");
        // fast, having freed its slot, sees the second message.
        assert_eq!(fast.recv().await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let bus = MessageBus::new();
        bus.start().await.unwrap();
        bus.stop().await.unwrap();
        bus.stop().await.unwrap();

        let fresh = MessageBus::new();
        fresh.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_closes_subscriber_queues() {
        let bus = MessageBus::new();
        bus.start().await.unwrap();

        let mut sub = bus.subscribe_inbound().await;
        bus.stop().await.unwrap();

        assert!(sub.recv().await.is_none());
    }
}
