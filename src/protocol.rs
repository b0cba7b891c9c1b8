use crate::types::Identity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message types a client may declare. Anything else is answered with an
/// "Unknown message type" error rather than a parse failure.
const KNOWN_TYPES: &[&str] = &[
    "auth",
    "subscribe_topic",
    "unsubscribe_topic",
    "subscribe_portfolio",
    "unsubscribe_portfolio",
    "ping",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        credential: String,
    },
    SubscribeTopic {
        topics: Vec<String>,
    },
    UnsubscribeTopic {
        topics: Vec<String>,
    },
    SubscribePortfolio {},
    UnsubscribePortfolio {},
    Ping {},
}

/// Why an inbound frame could not be turned into a [`ClientMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not a JSON object, no `type` field, or a payload that fails shape
    /// validation for its declared type
    Malformed,
    /// Well-formed envelope with a `type` we don't recognize
    UnknownType,
}

impl ClientMessage {
    /// Decode one wire frame (`{ "type": ..., "payload": ... }`).
    ///
    /// The envelope is inspected before full deserialization so the caller
    /// can answer unknown types and malformed payloads differently. A missing
    /// `payload` is treated as `{}`, so bare `{"type":"ping"}` frames work.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let mut value: Value = serde_json::from_str(text).map_err(|_| DecodeError::Malformed)?;
        let obj = value.as_object_mut().ok_or(DecodeError::Malformed)?;

        let declared = match obj.get("type").and_then(Value::as_str) {
            Some(t) => t.to_owned(),
            None => return Err(DecodeError::Malformed),
        };
        if !KNOWN_TYPES.contains(&declared.as_str()) {
            return Err(DecodeError::UnknownType);
        }

        obj.entry("payload")
            .or_insert_with(|| Value::Object(Default::default()));
        serde_json::from_value(value).map_err(|_| DecodeError::Malformed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess {
        identity: Identity,
    },
    AuthError {
        message: String,
    },
    SubscribeTopicSuccess {
        topics: Vec<String>,
    },
    UnsubscribeTopicSuccess {
        topics: Vec<String>,
    },
    SubscribePortfolioSuccess {},
    UnsubscribePortfolioSuccess {},
    Pong {
        timestamp: i64,
    },
    /// Producer push: one update on a subscribed price topic
    TopicUpdate {
        topic: String,
        data: Value,
        timestamp: i64,
    },
    /// Producer push: a signal delivered to every connected client
    SignalBroadcast {
        data: Value,
        timestamp: i64,
    },
    /// Producer push: identity-scoped data (portfolio valuations)
    IdentityUpdate {
        data: Value,
        timestamp: i64,
    },
    Error {
        message: String,
    },
}
