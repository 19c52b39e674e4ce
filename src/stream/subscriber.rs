//! Downstream subscribers
//!
//! Subscribers are called synchronously: frames on the processing thread,
//! button presses on the device thread, state changes on whichever thread
//! made the transition. A failing or panicking subscriber is logged and
//! counted but never stops the pipeline.
//!
//! [`ChannelSubscriber`] forwards everything into a bounded crossbeam channel
//! for consumers that want to handle events on their own thread.

use crate::error::{Result, StreamError};
use crate::types::{FrameRecord, StateChange};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Receives frames and notifications from a stream
pub trait StreamSubscriber: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &str {
        "subscriber"
    }

    /// Handle one frame. Errors are logged by the stream.
    fn on_frame(&self, frame: &FrameRecord) -> anyhow::Result<()>;

    fn on_button_pressed(&self, _button: i32) {}

    fn on_state_changed(&self, _change: StateChange) {}
}

/// Handle returned by [`SubscriberRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Entry = (SubscriptionId, Arc<dyn StreamSubscriber>);

/// Set of registered subscribers
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn StreamSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, subscriber));
        id
    }

    /// Remove a subscriber; returns false if the id is unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Callbacks run on a snapshot so a subscriber may (un)subscribe from
    // inside its own handler.
    fn snapshot(&self) -> Vec<Arc<dyn StreamSubscriber>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect()
    }

    /// Deliver a frame to every subscriber, returning the number that failed
    pub fn emit_frame(&self, frame: &FrameRecord) -> usize {
        let mut failures = 0;
        for subscriber in self.snapshot() {
            if let Err(e) = deliver_frame(subscriber.as_ref(), frame) {
                failures += 1;
                tracing::error!("{}", e);
            }
        }
        failures
    }

    pub fn notify_button(&self, button: i32) {
        for subscriber in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| subscriber.on_button_pressed(button))).is_err() {
                tracing::error!("Subscriber '{}' panicked in button handler", subscriber.name());
            }
        }
    }

    pub fn notify_state_changed(&self, change: StateChange) {
        for subscriber in self.snapshot() {
            if catch_unwind(AssertUnwindSafe(|| subscriber.on_state_changed(change))).is_err() {
                tracing::error!("Subscriber '{}' panicked in state handler", subscriber.name());
            }
        }
    }
}

/// Call one subscriber, turning an error or a panic into
/// [`StreamError::Subscriber`]
fn deliver_frame(subscriber: &dyn StreamSubscriber, frame: &FrameRecord) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(|| subscriber.on_frame(frame))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StreamError::Subscriber(format!(
            "'{}' failed to handle frame: {:#}",
            subscriber.name(),
            e
        ))),
        Err(panic) => Err(StreamError::Subscriber(format!(
            "'{}' panicked while handling frame: {}",
            subscriber.name(),
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Event forwarded by a [`ChannelSubscriber`]
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Frame(FrameRecord),
    ButtonPressed(i32),
    StateChanged(StateChange),
}

/// Subscriber that copies events into a bounded channel
pub struct ChannelSubscriber {
    name: String,
    sender: Sender<StreamEvent>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiving end of its channel
    pub fn new(name: impl Into<String>, capacity: usize) -> (Arc<Self>, EventReceiver) {
        let (sender, receiver) = bounded(capacity.max(1));
        let subscriber = Arc::new(Self {
            name: name.into(),
            sender,
        });
        (subscriber, EventReceiver { receiver })
    }

    fn forward(&self, event: StreamEvent) -> anyhow::Result<()> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow::anyhow!("event channel full, frame dropped")),
            Err(TrySendError::Disconnected(_)) => Err(anyhow::anyhow!("event receiver dropped")),
        }
    }
}

impl StreamSubscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_frame(&self, frame: &FrameRecord) -> anyhow::Result<()> {
        self.forward(StreamEvent::Frame(frame.clone()))
    }

    fn on_button_pressed(&self, button: i32) {
        let _ = self.forward(StreamEvent::ButtonPressed(button));
    }

    fn on_state_changed(&self, change: StateChange) {
        let _ = self.forward(StreamEvent::StateChanged(change));
    }
}

/// Receiving side of a [`ChannelSubscriber`]
pub struct EventReceiver {
    receiver: Receiver<StreamEvent>,
}

impl EventReceiver {
    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<StreamEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StreamEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Receive all pending events
    pub fn drain(&self) -> Vec<StreamEvent> {
        self.receiver.try_iter().collect()
    }

    /// Wait until `count` frames arrived or `timeout` elapsed; other events are discarded
    pub fn collect_frames(&self, count: usize, timeout: Duration) -> Vec<FrameRecord> {
        let deadline = std::time::Instant::now() + timeout;
        let mut frames = Vec::with_capacity(count);
        while frames.len() < count {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.recv_timeout(remaining) {
                Some(StreamEvent::Frame(frame)) => frames.push(frame),
                Some(_) => {}
                None => break,
            }
        }
        frames
    }
}
