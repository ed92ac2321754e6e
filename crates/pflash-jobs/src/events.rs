use std::{
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use futures_util::Stream;
use pflash_device::DeviceStatus;
use pflash_util::now_millis;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{error, info, warn};

use crate::task::{TaskId, TaskStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Log,
    Progress { percent: u8 },
    StateChanged { status: TaskStatus },
    DeviceStatus { status: DeviceStatus },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Process-wide, strictly increasing.
    pub seq: u64,
    pub at_unix_millis: i64,
    pub task_id: Option<TaskId>,
    pub level: EventLevel,
    pub message: String,
    pub payload: EventPayload,
}

#[derive(Default)]
struct BusInner {
    next_seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
}

/// Fan-out of task events to every live subscriber.
///
/// Sequence numbers are assigned and delivered under one lock, so all
/// subscribers observe the same order.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Events published before this call are not replayed.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    pub fn publish(
        &self,
        level: EventLevel,
        task_id: Option<TaskId>,
        message: impl Into<String>,
        payload: EventPayload,
    ) -> Event {
        let message = message.into();
        let event = {
            let mut inner = self.lock();
            inner.next_seq += 1;
            let event = Event {
                seq: inner.next_seq,
                at_unix_millis: now_millis(),
                task_id,
                level,
                message,
                payload,
            };
            inner
                .subscribers
                .retain(|tx| tx.send(event.clone()).is_ok());
            event
        };
        mirror(&event);
        event
    }

    pub fn log(&self, task_id: Option<TaskId>, message: impl Into<String>) -> Event {
        self.publish(EventLevel::Info, task_id, message, EventPayload::Log)
    }

    pub fn warn(&self, task_id: Option<TaskId>, message: impl Into<String>) -> Event {
        self.publish(EventLevel::Warning, task_id, message, EventPayload::Log)
    }

    pub fn error(&self, task_id: Option<TaskId>, message: impl Into<String>) -> Event {
        self.publish(EventLevel::Error, task_id, message, EventPayload::Log)
    }

    pub fn progress(&self, task_id: TaskId, percent: u8, message: impl Into<String>) -> Event {
        self.publish(
            EventLevel::Info,
            Some(task_id),
            message,
            EventPayload::Progress { percent },
        )
    }
}

fn mirror(event: &Event) {
    let task = event
        .task_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    match event.level {
        EventLevel::Info => info!(seq = event.seq, task = %task, "{}", event.message),
        EventLevel::Warning => warn!(seq = event.seq, task = %task, "{}", event.message),
        EventLevel::Error => error!(seq = event.seq, task = %task, "{}", event.message),
    }
}

/// One subscriber's view of the bus, starting at the moment it subscribed.
pub struct EventStream {
    inner: UnboundedReceiverStream<Event>,
}

impl EventStream {
    /// Waits for the next event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.inner.as_mut().recv().await
    }

    /// Takes the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.inner.as_mut().try_recv().ok()
    }

    /// Everything buffered right now, in order.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
