use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Routing class of a relayed message. Encoded on the wire as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Single = 1,
    Group = 2,
    Broadcast = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Single),
            2 => Ok(Self::Group),
            3 => Ok(Self::Broadcast),
            other => Err(format!("unknown message_type {}", other)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Group => f.write_str("group"),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

/// Application envelope carried inside an encrypted frame.
///
/// `from` and `timestamp` are owned by the server: whatever a client puts
/// there is overwritten by [`Message::stamp`] before the message goes anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_type: MessageType,
    #[serde(default)]
    pub from: String,
    pub destination: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn single(destination: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Single,
            from: String::new(),
            destination: destination.into(),
            content: content.into(),
            timestamp: DateTime::<Utc>::default(),
        }
    }

    /// Parse a decrypted frame body.
    pub fn parse(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Overwrite sender and receive time with server-side values.
    pub fn stamp(mut self, from: &str, received_at: DateTime<Utc>) -> Self {
        self.from = from.to_string();
        self.timestamp = received_at;
        self
    }
}
