// Change notifier: coalesces table mutations into one snapshot per quiet period.
//
// Every mutation re-arms a single debounce deadline. When the deadline passes,
// the engine computes one snapshot and `flush` hands it to every active
// subscriber and to the watch channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::trace;

use crate::snapshot::Snapshot;

/// Subscriber callback. Runs on the engine task; keep it short. A panicking
/// callback stops the engine with `EngineStatus::Failed`.
pub type Callback<P> = Box<dyn FnMut(&Snapshot<P>) + Send>;

/// Handle returned by `PresenceEngine::subscribe`.
///
/// Dropping the handle leaves the callback registered; call `unsubscribe`
/// to stop notifications. Unsubscribing is safe from inside the callback.
#[derive(Debug, Clone)]
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new() -> Self {
        Self { active: Arc::new(AtomicBool::new(true)) }
    }

    /// A subscription that will never be notified (engine already closed).
    pub(crate) fn inert() -> Self {
        Self { active: Arc::new(AtomicBool::new(false)) }
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct Subscriber<P> {
    active: Arc<AtomicBool>,
    callback: Callback<P>,
}

impl<P> Subscriber<P> {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct ChangeNotifier<P> {
    window: Duration,
    deadline: Option<Instant>,
    subscribers: Vec<Subscriber<P>>,
    latest: watch::Sender<Snapshot<P>>,
}

impl<P> ChangeNotifier<P> {
    pub fn new(window: Duration, latest: watch::Sender<Snapshot<P>>) -> Self {
        Self { window, deadline: None, subscribers: Vec::new(), latest }
    }

    /// Record a table mutation at `now`, replacing any pending deadline.
    pub fn mark_changed(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[cfg(test)]
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Register a callback and immediately hand it the current snapshot.
    pub fn subscribe(
        &mut self,
        active: Arc<AtomicBool>,
        callback: Callback<P>,
        current: &Snapshot<P>,
    ) {
        let mut subscriber = Subscriber { active, callback };
        if !subscriber.is_active() {
            return;
        }
        (subscriber.callback)(current);
        if subscriber.is_active() {
            self.subscribers.push(subscriber);
        }
    }

    /// Deliver `snapshot` to every active subscriber and clear the deadline.
    pub fn flush(&mut self, snapshot: Snapshot<P>) {
        self.deadline = None;
        for subscriber in &mut self.subscribers {
            if subscriber.is_active() {
                (subscriber.callback)(&snapshot);
            }
        }
        self.subscribers.retain(Subscriber::is_active);
        trace!(
            subscribers = self.subscribers.len(),
            participants = snapshot.len(),
            "presence snapshot flushed"
        );
        self.latest.send_replace(snapshot);
    }

    /// Drop the pending deadline without notifying anyone.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Number of subscribers that have not unsubscribed.
    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|subscriber| subscriber.is_active()).count()
    }
}
