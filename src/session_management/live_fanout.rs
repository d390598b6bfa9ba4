//! Fan-out of persisted entries from the one live capture to its subscribers.
//!
//! Each subscriber owns a bounded channel. Publishing never waits: a full
//! channel drops the event for that subscriber only, and a closed one is
//! removed from the registry.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::Stream;

use crate::data_capture::types::IndexedEntry;
use crate::error_handling::types::FanoutError;

pub const SUBSCRIBER_CAPACITY: usize = 256;
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Entry(IndexedEntry),
    End,
}

#[derive(Default)]
struct Registry {
    session_id: Option<String>,
    subscribers: HashMap<u64, mpsc::Sender<LiveEvent>>,
    next_id: u64,
}

#[derive(Default)]
pub struct LiveFanout {
    registry: Mutex<Registry>,
}

impl LiveFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `session_id` as the live session, replacing any previous one.
    pub fn begin(&self, session_id: &str) {
        if let Ok(mut reg) = self.registry.lock() {
            reg.subscribers.clear();
            reg.session_id = Some(session_id.to_string());
            info!("Live session {} started", session_id);
        }
    }

    pub fn live_session_id(&self) -> Option<String> {
        self.registry.lock().ok().and_then(|reg| reg.session_id.clone())
    }

    /// Opens a subscription to the live session. Any other id is not found.
    pub fn subscribe(self: &Arc<Self>, session_id: &str) -> Result<Subscription, FanoutError> {
        let mut reg = self
            .registry
            .lock()
            .map_err(|_| FanoutError::NotFound(session_id.to_string()))?;
        if reg.session_id.as_deref() != Some(session_id) {
            return Err(FanoutError::NotFound(session_id.to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = reg.next_id;
        reg.next_id += 1;
        reg.subscribers.insert(id, tx);
        debug!("Subscriber {} attached to {} ({} total)", id, session_id, reg.subscribers.len());
        Ok(Subscription { id, fanout: Arc::clone(self), receiver: rx, ended: false })
    }

    pub fn unsubscribe(&self, subscriber_id: u64) {
        if let Ok(mut reg) = self.registry.lock() {
            if reg.subscribers.remove(&subscriber_id).is_some() {
                debug!("Subscriber {} detached", subscriber_id);
            }
        }
    }

    pub fn publish(&self, entry: IndexedEntry) {
        let Ok(mut reg) = self.registry.lock() else {
            return;
        };
        reg.subscribers.retain(|id, tx| match tx.try_send(LiveEvent::Entry(entry.clone())) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Subscriber {} is lagging, dropped line {}", id, entry.line);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Sends `end` to every subscriber, then forgets them and the live id.
    pub fn finish(&self) {
        let Ok(mut reg) = self.registry.lock() else {
            return;
        };
        for (id, tx) in reg.subscribers.drain() {
            if tx.try_send(LiveEvent::End).is_err() {
                debug!("Subscriber {} missed the end event", id);
            }
        }
        if let Some(id) = reg.session_id.take() {
            info!("Live session {} finished", id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().map(|reg| reg.subscribers.len()).unwrap_or(0)
    }
}

/// Event stream for one subscriber. Dropping it unsubscribes.
///
/// The stream always ends with exactly one `LiveEvent::End`, even when a full
/// channel swallowed the one sent by `finish`.
pub struct Subscription {
    id: u64,
    fanout: Arc<LiveFanout>,
    receiver: mpsc::Receiver<LiveEvent>,
    ended: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for Subscription {
    type Item = LiveEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(LiveEvent::End)) | Poll::Ready(None) => {
                self.ended = true;
                Poll::Ready(Some(LiveEvent::End))
            }
            other => other,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.fanout.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::types::{LogEntry, LogLevel};
    use tokio_stream::StreamExt;

    fn indexed(line: u64) -> IndexedEntry {
        IndexedEntry {
            entry: LogEntry {
                timestamp: "2026-02-08T10:00:00.000Z".into(),
                level: LogLevel::Info,
                message: format!("line {line}"),
                source: "test".into(),
                project: "/app".into(),
                session_id: "aabbccdd".into(),
                git_branch: None,
                pid: 1,
                raw: true,
                stack: None,
                original: None,
            },
            line,
        }
    }

    #[test]
    fn subscribe_requires_the_live_session() {
        let fanout = Arc::new(LiveFanout::new());
        assert!(matches!(fanout.subscribe("aabbccdd"), Err(FanoutError::NotFound(_))));
        fanout.begin("aabbccdd");
        assert!(fanout.subscribe("11223344").is_err());
        assert!(fanout.subscribe("aabbccdd").is_ok());
    }

    #[tokio::test]
    async fn subscribers_see_entries_in_order_then_end() {
        let fanout = Arc::new(LiveFanout::new());
        fanout.begin("aabbccdd");
        let mut first = fanout.subscribe("aabbccdd").unwrap();
        let mut second = fanout.subscribe("aabbccdd").unwrap();
        assert_eq!(fanout.subscriber_count(), 2);

        for line in 1..=3 {
            fanout.publish(indexed(line));
        }
        fanout.finish();

        for sub in [&mut first, &mut second] {
            let mut lines = Vec::new();
            while let Some(event) = sub.next().await {
                match event {
                    LiveEvent::Entry(e) => lines.push(e.line),
                    LiveEvent::End => break,
                }
            }
            assert_eq!(lines, vec![1, 2, 3]);
            assert!(sub.next().await.is_none());
        }
        assert_eq!(fanout.live_session_id(), None);
        assert!(fanout.subscribe("aabbccdd").is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_never_blocks_publisher() {
        let fanout = Arc::new(LiveFanout::new());
        fanout.begin("aabbccdd");
        let mut slow = fanout.subscribe("aabbccdd").unwrap();

        let total = SUBSCRIBER_CAPACITY as u64 + 50;
        for line in 1..=total {
            fanout.publish(indexed(line));
        }
        assert_eq!(fanout.subscriber_count(), 1);

        let mut received = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_millis(50), slow.next()).await
        {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_CAPACITY);
    }

    #[tokio::test]
    async fn lagging_subscriber_still_gets_end() {
        let fanout = Arc::new(LiveFanout::new());
        fanout.begin("aabbccdd");
        let mut lagging = fanout.subscribe("aabbccdd").unwrap();

        for line in 1..=SUBSCRIBER_CAPACITY as u64 {
            fanout.publish(indexed(line));
        }
        fanout.finish();

        let mut entries = 0;
        let mut last = None;
        while let Some(event) = lagging.next().await {
            if matches!(event, LiveEvent::Entry(_)) {
                entries += 1;
            }
            last = Some(event);
        }
        assert_eq!(entries, SUBSCRIBER_CAPACITY);
        assert_eq!(last, Some(LiveEvent::End));
    }

    #[tokio::test]
    async fn replaced_session_ends_old_subscribers() {
        let fanout = Arc::new(LiveFanout::new());
        fanout.begin("aabbccdd");
        let mut old = fanout.subscribe("aabbccdd").unwrap();
        fanout.begin("11223344");
        assert_eq!(old.next().await, Some(LiveEvent::End));
        assert_eq!(old.next().await, None);
    }

    #[test]
    fn dropping_a_subscription_unsubscribes() {
        let fanout = Arc::new(LiveFanout::new());
        fanout.begin("aabbccdd");
        let sub = fanout.subscribe("aabbccdd").unwrap();
        let other = fanout.subscribe("aabbccdd").unwrap();
        assert_ne!(sub.id(), other.id());
        drop(sub);
        assert_eq!(fanout.subscriber_count(), 1);
        fanout.unsubscribe(other.id());
        assert_eq!(fanout.subscriber_count(), 0);
        fanout.publish(indexed(1));
    }
}
