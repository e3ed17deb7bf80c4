// State table: last reported state of every other participant, with TTL expiry.
//
// Entries are replaced wholesale on each `state` message and refreshed when
// the state is unchanged. A participant that stops re-announcing is dropped
// by `purge_stale` once it has been silent for longer than the stale threshold.

use std::collections::BTreeMap;
use std::time::Duration;

use copresence_common::types::{ParticipantKey, SessionId};
use tokio::time::Instant;

use crate::snapshot::{PresenceState, Snapshot};

/// Outcome of applying one inbound state to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// First state seen for this participant.
    Inserted,
    /// State differs from the stored one and replaced it.
    Replaced,
    /// Same state as before; only the last-seen time moved.
    Refreshed,
    /// State claimed the local session and was not stored.
    Ignored,
}

impl Applied {
    /// Whether subscribers need to hear about this update.
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

#[derive(Debug)]
struct Entry<P> {
    state: PresenceState<P>,
    last_seen_at: Instant,
}

/// Map from participant key to that participant's last state.
///
/// Never contains the local engine's own session.
#[derive(Debug)]
pub struct StateTable<P> {
    local_session: SessionId,
    stale_threshold: Duration,
    entries: BTreeMap<ParticipantKey, Entry<P>>,
}

impl<P: PartialEq + Clone> StateTable<P> {
    pub fn new(local_session: SessionId, stale_threshold: Duration) -> Self {
        Self { local_session, stale_threshold, entries: BTreeMap::new() }
    }

    /// Store `payload` as the state of `(identity, session)` seen at `now`.
    pub fn update_participant(
        &mut self,
        identity: &str,
        session: &SessionId,
        payload: P,
        now: Instant,
    ) -> Applied {
        if *session == self.local_session {
            return Applied::Ignored;
        }

        let key = ParticipantKey::new(identity, session.clone());
        let candidate = PresenceState { identity: identity.to_string(), payload };

        match self.entries.get_mut(&key) {
            Some(entry) if entry.state == candidate => {
                entry.last_seen_at = now;
                Applied::Refreshed
            }
            Some(entry) => {
                entry.state = candidate;
                entry.last_seen_at = now;
                Applied::Replaced
            }
            None => {
                self.entries.insert(key, Entry { state: candidate, last_seen_at: now });
                Applied::Inserted
            }
        }
    }

    /// Forget a participant that announced it is leaving.
    /// Returns false when the participant was not known.
    pub fn remove_participant(&mut self, identity: &str, session: &SessionId) -> bool {
        let key = ParticipantKey::new(identity, session.clone());
        self.entries.remove(&key).is_some()
    }

    /// Drop every participant silent for longer than the stale threshold.
    /// Returns the keys that were removed.
    pub fn purge_stale(&mut self, now: Instant) -> Vec<ParticipantKey> {
        let threshold = self.stale_threshold;
        let mut removed = Vec::new();

        self.entries.retain(|key, entry| {
            if now.saturating_duration_since(entry.last_seen_at) > threshold {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });

        removed
    }

    /// Current states in key order.
    pub fn snapshot(&self) -> Snapshot<P> {
        Snapshot::new(self.entries.values().map(|entry| entry.state.clone()).collect())
    }

    pub fn last_seen_at(&self, key: &ParticipantKey) -> Option<Instant> {
        self.entries.get(key).map(|entry| entry.last_seen_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
