// In-process broadcast hub.
//
// Every transport attached to a hub sees every message published on it,
// including its own. Used by the integration tests and `copresence demo`,
// with switches to simulate message loss, crashed peers and a failing
// inbound stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Inbound, Transport, TransportError, INBOUND_CHANNEL_CAPACITY};

const DEFAULT_HUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum Frame {
    Message(Value),
    Fail(String),
}

/// A message published on the hub, as recorded for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub value: Value,
    /// Sent through `send_beacon` rather than `send`.
    pub beacon: bool,
}

#[derive(Debug)]
struct HubInner {
    frames: broadcast::Sender<Frame>,
    dropping: AtomicBool,
    sent: Mutex<Vec<Delivery>>,
}

#[derive(Debug, Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HUB_CAPACITY)
    }

    /// A hub buffering at most `capacity` undelivered messages per listener.
    /// Slow listeners skip the overflow, which looks like loss to the engine.
    pub fn with_capacity(capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(HubInner {
                frames,
                dropping: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A new endpoint on this hub.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport { hub: self.clone(), severed: Arc::new(AtomicBool::new(false)) }
    }

    /// While set, published messages are recorded but never delivered.
    pub fn set_dropping(&self, dropping: bool) {
        self.inner.dropping.store(dropping, Ordering::SeqCst);
    }

    /// Deliver a raw value to every listener, as if from a foreign peer.
    pub fn inject(&self, value: Value) {
        let _ = self.inner.frames.send(Frame::Message(value));
    }

    /// Make every current listener's inbound stream fail.
    pub fn fail_listeners(&self, reason: impl Into<String>) {
        let _ = self.inner.frames.send(Frame::Fail(reason.into()));
    }

    /// Everything published through attached transports so far.
    pub fn sent(&self) -> Vec<Delivery> {
        self.inner.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear_sent(&self) {
        self.inner.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn publish(&self, value: &Value, beacon: bool) {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Delivery { value: value.clone(), beacon });

        if self.inner.dropping.load(Ordering::SeqCst) {
            debug!("memory hub dropping message");
            return;
        }
        // No listeners is not an error on a broadcast medium.
        let _ = self.inner.frames.send(Frame::Message(value.clone()));
    }
}

/// One endpoint attached to a `MemoryHub`. Clones share the endpoint.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    severed: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// Silently discard everything this endpoint sends from now on, as if
    /// its process had died. Inbound delivery is unaffected.
    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    pub fn is_severed(&self) -> bool {
        self.severed.load(Ordering::SeqCst)
    }

    fn publish(&self, message: &Value, beacon: bool) {
        if self.is_severed() {
            return;
        }
        self.hub.publish(message, beacon);
    }
}

impl Transport for MemoryTransport {
    fn send(&self, message: &Value) -> Result<(), TransportError> {
        self.publish(message, false);
        Ok(())
    }

    fn send_beacon(&self, message: &Value) -> Result<(), TransportError> {
        self.publish(message, true);
        Ok(())
    }

    fn listen(&self) -> Result<Inbound, TransportError> {
        let mut frames = self.hub.inner.frames.subscribe();
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    frame = frames.recv() => match frame {
                        Ok(Frame::Message(value)) => {
                            if tx.send(Ok(value)).await.is_err() {
                                break;
                            }
                        }
                        Ok(Frame::Fail(reason)) => {
                            let _ = tx.send(Err(TransportError::Closed(reason))).await;
                            break;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "memory transport listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(rx)
    }
}
