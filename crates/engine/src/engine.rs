// Presence engine: one actor task per client session.
//
// The actor owns the state table, the broadcast scheduler and the change
// notifier, and is the only code that touches them. Inbound messages, public
// API commands and the three timers (resend, purge, debounce) all arrive
// through one `select!` loop, so they never interleave inside a mutation.
//
// Lifecycle: Running from `start` until `close` (or a transport failure),
// then terminal. Closing sends a best-effort `disconnect` beacon, drops the
// inbound subscription and with it every timer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use copresence_common::protocol::presence::{Envelope, Message};
use copresence_common::types::SessionId;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::PresenceError;
use crate::notifier::{Callback, ChangeNotifier, Subscription};
use crate::scheduler::BroadcastScheduler;
use crate::snapshot::{Payload, Snapshot};
use crate::state_table::StateTable;
use crate::transport::{Inbound, Transport};

/// Externally visible lifecycle of an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Running,
    /// Closed on request or because every handle was dropped.
    Closed,
    /// The inbound stream failed; the engine stopped and will not recover.
    Failed(String),
}

impl EngineStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

enum Command<P> {
    Report(P),
    Subscribe { active: Arc<AtomicBool>, callback: Callback<P> },
    Close,
}

/// Handle to a running presence engine.
///
/// All methods are non-blocking. Dropping the handle closes the engine.
pub struct PresenceEngine<P: Payload> {
    identity: String,
    session: SessionId,
    commands: mpsc::UnboundedSender<Command<P>>,
    closed: AtomicBool,
    snapshots: watch::Receiver<Snapshot<P>>,
    status: watch::Receiver<EngineStatus>,
}

impl<P: Payload> PresenceEngine<P> {
    /// Start an engine for `identity` on `transport`.
    ///
    /// Subscribes to the transport, sends the initial roll call and spawns
    /// the engine task on the current Tokio runtime.
    pub fn start<T: Transport>(
        identity: impl Into<String>,
        transport: T,
        config: EngineConfig,
    ) -> Result<Self, PresenceError> {
        config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| PresenceError::NoRuntime)?;

        let identity = identity.into();
        let session = SessionId::generate();
        let inbound = transport.listen()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (status_tx, status_rx) = watch::channel(EngineStatus::Running);

        let actor = EngineActor {
            identity: identity.clone(),
            session: session.clone(),
            transport,
            config,
            table: StateTable::new(session.clone(), config.stale_threshold()),
            scheduler: BroadcastScheduler::new(config.resend_interval),
            notifier: ChangeNotifier::new(config.notify_debounce, snapshot_tx),
            status: status_tx,
        };

        // Discovery of peers that were already present.
        actor.broadcast(Message::RollCall { session: session.clone() });
        runtime.spawn(actor.run(inbound, command_rx));

        info!(identity = %identity, session = %session, "presence engine started");
        Ok(Self {
            identity,
            session,
            commands: command_tx,
            closed: AtomicBool::new(false),
            snapshots: snapshot_rx,
            status: status_rx,
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Make `payload` the local state: send it now and re-send it every
    /// resend interval until the next report or close.
    pub fn report_local_state(&self, payload: P) -> Result<(), PresenceError> {
        // Reject payloads that cannot go on the wire before they reach the actor.
        Message::state(self.session.clone(), &payload)?;
        self.command(Command::Report(payload))
    }

    /// Register `callback` for presence snapshots.
    ///
    /// The callback first receives the current snapshot, before the engine
    /// processes anything else, then one snapshot per coalesced burst of
    /// changes. After close the returned subscription is inert.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&Snapshot<P>) + Send + 'static,
    {
        let subscription = Subscription::new();
        let command =
            Command::Subscribe { active: subscription.flag(), callback: Box::new(callback) };
        match self.command(command) {
            Ok(()) => subscription,
            Err(_) => Subscription::inert(),
        }
    }

    /// The latest flushed snapshot, as a replaying watch channel.
    pub fn watch(&self) -> watch::Receiver<Snapshot<P>> {
        self.snapshots.clone()
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.commands.is_closed()
            || !self.status.borrow().is_running()
    }

    /// Stop the engine. Idempotent and non-blocking; the disconnect beacon
    /// is sent from the engine task.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(Command::Close);
    }

    /// Wait until the engine task has stopped and return its final status.
    pub async fn closed(&self) -> EngineStatus {
        let mut status = self.status.clone();
        let outcome =
            status.wait_for(|current| !current.is_running()).await.map(|last| (*last).clone());
        // The task died (a subscriber callback panicked) before publishing.
        outcome.unwrap_or_else(|_| EngineStatus::Failed(TASK_ENDED_UNEXPECTEDLY.into()))
    }

    fn command(&self, command: Command<P>) -> Result<(), PresenceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PresenceError::Closed);
        }
        self.commands.send(command).map_err(|_| PresenceError::Closed)
    }
}

impl<P: Payload> Drop for PresenceEngine<P> {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Engine task ─────────────────────────────────────────────────────

const TASK_ENDED_UNEXPECTEDLY: &str = "engine task ended unexpectedly";

/// Sleep until `deadline`, or forever when no deadline is armed.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum Exit {
    Closed,
    Failed(String),
}

struct EngineActor<P, T> {
    identity: String,
    session: SessionId,
    transport: T,
    config: EngineConfig,
    table: StateTable<P>,
    scheduler: BroadcastScheduler<P>,
    notifier: ChangeNotifier<P>,
    status: watch::Sender<EngineStatus>,
}

impl<P: Payload, T: Transport> EngineActor<P, T> {
    async fn run(
        mut self,
        mut inbound: Inbound,
        mut commands: mpsc::UnboundedReceiver<Command<P>>,
    ) {
        let purge_every = self.config.purge_interval;
        let mut purge = time::interval_at(Instant::now() + purge_every, purge_every);
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            let resend_at = self.scheduler.next_resend();
            let notify_at = self.notifier.deadline();

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Report(payload)) => self.report(payload),
                    Some(Command::Subscribe { active, callback }) => {
                        let snapshot = self.table.snapshot();
                        self.notifier.subscribe(active, callback, &snapshot);
                    }
                    Some(Command::Close) | None => break Exit::Closed,
                },
                received = inbound.recv() => match received {
                    Some(Ok(value)) => self.handle_inbound(&value),
                    Some(Err(error)) => break Exit::Failed(error.to_string()),
                    None => break Exit::Failed("inbound stream ended".into()),
                },
                _ = sleep_until_deadline(resend_at) => {
                    if self.scheduler.poll_resend(Instant::now()) {
                        trace!(session = %self.session, "re-announcing local state");
                        self.send_local_state();
                    }
                }
                _ = purge.tick() => self.purge(),
                _ = sleep_until_deadline(notify_at) => self.flush(),
            }
        };

        self.scheduler.cancel();
        self.notifier.cancel();
        drop(inbound);
        self.broadcast_beacon(Message::Disconnect { session: self.session.clone() });

        let status = match exit {
            Exit::Closed => {
                info!(identity = %self.identity, session = %self.session, "presence engine closed");
                EngineStatus::Closed
            }
            Exit::Failed(reason) => {
                warn!(session = %self.session, %reason, "presence transport failed");
                EngineStatus::Failed(reason)
            }
        };
        self.status.send_replace(status);
    }

    fn report(&mut self, payload: P) {
        self.scheduler.report(payload, Instant::now());
        self.send_local_state();
    }

    fn handle_inbound(&mut self, value: &Value) {
        let envelope = match Envelope::from_value(value) {
            Ok(envelope) => envelope,
            Err(error) => {
                trace!(%error, "dropping malformed presence message");
                return;
            }
        };
        if *envelope.message.session() == self.session {
            trace!("ignoring own presence message");
            return;
        }

        let now = Instant::now();
        let Envelope { identity, message } = envelope;
        match message {
            Message::State { .. } => {
                let payload: P = match message.payload() {
                    Some(Ok(payload)) => payload,
                    Some(Err(error)) => {
                        trace!(%identity, %error, "dropping state with undecodable payload");
                        return;
                    }
                    None => return,
                };
                let applied =
                    self.table.update_participant(&identity, message.session(), payload, now);
                if applied.changed() {
                    let session = message.session();
                    debug!(%identity, %session, ?applied, "participant state changed");
                    self.notifier.mark_changed(now);
                }
            }
            Message::RollCall { session } => {
                trace!(%identity, %session, "answering roll call");
                if self.scheduler.answer_roll_call(now) {
                    self.send_local_state();
                }
            }
            Message::Disconnect { session } => {
                if self.table.remove_participant(&identity, &session) {
                    debug!(%identity, %session, "participant disconnected");
                    self.notifier.mark_changed(now);
                }
            }
        }
    }

    fn purge(&mut self) {
        let now = Instant::now();
        let removed = self.table.purge_stale(now);
        if removed.is_empty() {
            return;
        }
        for key in &removed {
            debug!(participant = %key, "participant expired");
        }
        self.notifier.mark_changed(now);
    }

    fn flush(&mut self) {
        let snapshot = self.table.snapshot();
        self.notifier.flush(snapshot);
    }

    fn send_local_state(&self) {
        let Some(payload) = self.scheduler.local_state() else {
            return;
        };
        match Message::state(self.session.clone(), payload) {
            Ok(message) => self.broadcast(message),
            Err(error) => warn!(%error, "local presence state cannot be encoded"),
        }
    }

    fn broadcast(&self, message: Message) {
        let envelope = Envelope::new(self.identity.clone(), message);
        if let Err(error) = self.transport.send(&envelope.to_value()) {
            debug!(%error, kind = envelope.message.kind(), "presence send failed");
        }
    }

    fn broadcast_beacon(&self, message: Message) {
        let envelope = Envelope::new(self.identity.clone(), message);
        if let Err(error) = self.transport.send_beacon(&envelope.to_value()) {
            debug!(%error, "disconnect beacon failed");
        }
    }
}
