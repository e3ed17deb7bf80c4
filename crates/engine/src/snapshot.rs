// Presence payloads and the ordered snapshots handed to subscribers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Application-defined presence payload.
///
/// Payloads serialize to a JSON object whose fields travel next to the
/// protocol's `type` and `session` keys. `PartialEq` decides whether an
/// incoming state actually changed anything.
pub trait Payload: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static {}

impl<T> Payload for T where
    T: Serialize + DeserializeOwned + PartialEq + Clone + Send + Sync + 'static
{
}

/// Last state reported by one remote participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceState<P> {
    pub identity: String,
    #[serde(flatten)]
    pub payload: P,
}

/// All known remote participants, ordered by participant key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot<P> {
    participants: Vec<PresenceState<P>>,
}

impl<P> Default for Snapshot<P> {
    fn default() -> Self {
        Self { participants: Vec::new() }
    }
}

impl<P> Snapshot<P> {
    pub(crate) fn new(participants: Vec<PresenceState<P>>) -> Self {
        Self { participants }
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PresenceState<P>> {
        self.participants.iter()
    }

    pub fn as_slice(&self) -> &[PresenceState<P>] {
        &self.participants
    }

    pub fn into_vec(self) -> Vec<PresenceState<P>> {
        self.participants
    }

    /// Group sessions by actor identity, keeping snapshot order.
    ///
    /// One user with two open sessions shows up as one group with two states.
    pub fn by_identity(&self) -> Vec<(&str, Vec<&PresenceState<P>>)> {
        let mut groups: Vec<(&str, Vec<&PresenceState<P>>)> = Vec::new();
        for state in &self.participants {
            match groups.last_mut() {
                Some((identity, states)) if *identity == state.identity => states.push(state),
                _ => groups.push((state.identity.as_str(), vec![state])),
            }
        }
        groups
    }
}

impl<'a, P> IntoIterator for &'a Snapshot<P> {
    type Item = &'a PresenceState<P>;
    type IntoIter = std::slice::Iter<'a, PresenceState<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.participants.iter()
    }
}
