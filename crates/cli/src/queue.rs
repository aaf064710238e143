// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Priority message queue feeding the delivery loop.
//!
//! Four priority bands, FIFO within each band. Pause is advisory: items
//! may still be enqueued while paused but none are popped. Consumers park
//! on [`MessageQueue::ready`], which completes only when an item is
//! poppable *and* the queue is unpaused.

use std::collections::VecDeque;
use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

/// Maximum queued messages per priority band before enqueue backpressure.
const BAND_CAPACITY: usize = 1024;

/// Dequeue priority. Higher priorities always pop first; within one
/// priority, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Parse a wire-format priority name. Unknown names map to `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Band index, highest priority first.
    fn band(&self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

/// Where a message is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Queued,
    Delivering,
    Delivered,
}

/// One queued message, owned by the queue until popped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub from: String,
    pub priority: Priority,
    pub body: String,
    pub status: DeliveryStatus,
    pub created_at: SystemTime,
}

impl Message {
    pub fn new(from: impl Into<String>, priority: Priority, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            priority,
            body: body.into(),
            status: DeliveryStatus::Queued,
            created_at: SystemTime::now(),
        }
    }
}

#[derive(Default)]
struct Inner {
    bands: [VecDeque<Message>; 4],
    paused: bool,
}

impl Inner {
    fn pending(&self) -> usize {
        self.bands.iter().map(VecDeque::len).sum()
    }
}

/// Thread-safe priority queue. All operations are callable from any task.
pub struct MessageQueue {
    inner: Mutex<Inner>,
    ready: Notify,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()), ready: Notify::new() }
    }

    /// Enqueue a message, returning its id.
    ///
    /// Fails when the target band is full; callers surface this to the
    /// sender rather than dropping silently.
    pub fn enqueue(&self, message: Message) -> anyhow::Result<Uuid> {
        let id = message.id;
        let wake = {
            let mut inner = self.inner.lock();
            let band = &mut inner.bands[message.priority.band()];
            if band.len() >= BAND_CAPACITY {
                anyhow::bail!("message queue full ({} priority)", message.priority.as_str());
            }
            band.push_back(message);
            !inner.paused
        };
        if wake {
            self.ready.notify_waiters();
        }
        Ok(id)
    }

    /// Return a popped-but-undelivered message to the front of its band.
    ///
    /// Used on cancellation so the message is re-delivered first after a
    /// relaunch instead of being lost or reordered.
    pub fn requeue_front(&self, mut message: Message) {
        message.status = DeliveryStatus::Queued;
        let wake = {
            let mut inner = self.inner.lock();
            inner.bands[message.priority.band()].push_front(message);
            !inner.paused
        };
        if wake {
            self.ready.notify_waiters();
        }
    }

    /// Pop the highest-priority oldest message, or `None` when the queue
    /// is paused or empty. The popped message is marked `delivering`.
    pub fn pop_ready(&self) -> Option<Message> {
        let mut inner = self.inner.lock();
        if inner.paused {
            return None;
        }
        for band in inner.bands.iter_mut() {
            if let Some(mut message) = band.pop_front() {
                message.status = DeliveryStatus::Delivering;
                return Some(message);
            }
        }
        None
    }

    /// Stop popping. Enqueue still accepts items.
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    /// Resume popping and wake any parked consumer.
    pub fn unpause(&self) {
        self.inner.lock().paused = false;
        self.ready.notify_waiters();
    }

    /// `(pending item count, paused)`.
    pub fn pending_count(&self) -> (usize, bool) {
        let inner = self.inner.lock();
        (inner.pending(), inner.paused)
    }

    /// Wait until at least one message is poppable and the queue is
    /// unpaused. Returns immediately if that is already true.
    pub async fn ready(&self) {
        loop {
            let notified = self.ready.notified();
            {
                let inner = self.inner.lock();
                if !inner.paused && inner.pending() > 0 {
                    return;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
