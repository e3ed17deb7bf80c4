// Presence wire protocol.
//
// Every message travels as `{ identity, message: { type, session, ...fields } }`.
// `type` is one of `state`, `rollCall` or `disconnect`; only `state` carries
// application fields, which sit next to `type` and `session` in the same object.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::SessionId;

pub const TYPE_STATE: &str = "state";
pub const TYPE_ROLL_CALL: &str = "rollCall";
pub const TYPE_DISCONNECT: &str = "disconnect";

/// Keys application fields may not use: `type` and `session` are owned by the
/// protocol inside `message`, and `identity` sits next to the fields in snapshots.
pub const RESERVED_FIELDS: &[&str] = &["type", "session", "identity"];

#[derive(Debug, Error)]
pub enum WireError {
    #[error("expected a JSON object")]
    NotAnObject,
    #[error("missing or invalid field `{0}`")]
    MissingField(&'static str),
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("application field `{0}` is reserved by the protocol")]
    ReservedField(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One protocol message, tagged with the sending engine's session.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// "Here is my current state."
    State { session: SessionId, fields: Map<String, Value> },
    /// "Everyone, please re-announce yourselves."
    RollCall { session: SessionId },
    /// "I am leaving, forget me."
    Disconnect { session: SessionId },
}

impl Message {
    /// Build a `state` message from an application payload.
    ///
    /// The payload must serialize to a JSON object without reserved keys.
    pub fn state<P: Serialize>(session: SessionId, payload: &P) -> Result<Self, WireError> {
        let fields = match serde_json::to_value(payload)? {
            Value::Object(fields) => fields,
            _ => return Err(WireError::NotAnObject),
        };
        if let Some(reserved) = RESERVED_FIELDS.iter().find(|key| fields.contains_key(**key)) {
            return Err(WireError::ReservedField((*reserved).to_string()));
        }
        Ok(Self::State { session, fields })
    }

    pub fn session(&self) -> &SessionId {
        match self {
            Self::State { session, .. }
            | Self::RollCall { session }
            | Self::Disconnect { session } => session,
        }
    }

    /// Wire value of the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::State { .. } => TYPE_STATE,
            Self::RollCall { .. } => TYPE_ROLL_CALL,
            Self::Disconnect { .. } => TYPE_DISCONNECT,
        }
    }

    /// Decode the application fields of a `state` message into a typed payload.
    /// Returns `None` for other message types.
    pub fn payload<P: DeserializeOwned>(&self) -> Option<Result<P, WireError>> {
        match self {
            Self::State { fields, .. } => Some(
                serde_json::from_value(Value::Object(fields.clone())).map_err(WireError::from),
            ),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        let mut object = match self {
            Self::State { fields, .. } => fields.clone(),
            _ => Map::new(),
        };
        object.insert("type".into(), Value::String(self.kind().to_string()));
        object.insert("session".into(), Value::String(self.session().to_string()));
        Value::Object(object)
    }

    fn from_value(value: &Value) -> Result<Self, WireError> {
        let object = value.as_object().ok_or(WireError::NotAnObject)?;
        let kind =
            object.get("type").and_then(Value::as_str).ok_or(WireError::MissingField("type"))?;
        let session = object
            .get("session")
            .and_then(Value::as_str)
            .map(SessionId::from)
            .ok_or(WireError::MissingField("session"))?;

        match kind {
            TYPE_STATE => {
                let fields = object
                    .iter()
                    .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                Ok(Self::State { session, fields })
            }
            TYPE_ROLL_CALL => Ok(Self::RollCall { session }),
            TYPE_DISCONNECT => Ok(Self::Disconnect { session }),
            other => Err(WireError::UnknownType(other.to_string())),
        }
    }
}

/// A message as it travels on the transport, tagged with the actor identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub identity: String,
    pub message: Message,
}

impl Envelope {
    pub fn new(identity: impl Into<String>, message: Message) -> Self {
        Self { identity: identity.into(), message }
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("identity".into(), Value::String(self.identity.clone()));
        object.insert("message".into(), self.message.to_value());
        Value::Object(object)
    }

    /// Parse an inbound value. Anything that does not match the wire shape
    /// is reported as a `WireError`; callers are expected to drop it.
    pub fn from_value(value: &Value) -> Result<Self, WireError> {
        let object = value.as_object().ok_or(WireError::NotAnObject)?;
        let identity = object
            .get("identity")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingField("identity"))?;
        let message = object.get("message").ok_or(WireError::MissingField("message"))?;
        Ok(Self { identity: identity.to_string(), message: Message::from_value(message)? })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(&self.to_value())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(&value)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(D::Error::custom)
    }
}
