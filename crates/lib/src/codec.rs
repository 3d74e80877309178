//! Envelope encodings: JSON text frames or BSON binary frames.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, MalformedEnvelope};
use crate::protocol::Envelope;

/// Wire encoding, chosen once at connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// UTF-8 JSON document per text frame.
    #[default]
    Json,
    /// BSON document per binary frame.
    ///
    /// BSON has no unsigned 64-bit integer: a payload number above `i64::MAX` cannot be
    /// encoded and `encode` fails with [`Error::Encode`]. Every other JSON value round-trips.
    Bson,
}

/// Payload of one data frame as delivered by (or handed to) the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    pub(crate) fn into_message(self) -> Message {
        match self {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
        }
    }
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Bson => "bson",
        }
    }

    pub fn encode(self, envelope: &Envelope) -> Result<Frame, Error> {
        match self {
            Encoding::Json => serde_json::to_string(envelope)
                .map(Frame::Text)
                .map_err(|e| Error::Encode(e.to_string())),
            Encoding::Bson => bson::to_vec(envelope)
                .map(Frame::Binary)
                .map_err(|e| Error::Encode(e.to_string())),
        }
    }

    /// Decode one inbound frame. JSON also accepts binary frames holding UTF-8 JSON;
    /// BSON rejects text frames.
    pub fn decode(self, frame: &Frame) -> Result<Envelope, MalformedEnvelope> {
        let result = match (self, frame) {
            (Encoding::Json, Frame::Text(text)) => {
                serde_json::from_str(text).map_err(|e| e.to_string())
            }
            (Encoding::Json, Frame::Binary(data)) => {
                serde_json::from_slice(data).map_err(|e| e.to_string())
            }
            (Encoding::Bson, Frame::Binary(data)) => {
                bson::from_slice(data).map_err(|e| e.to_string())
            }
            (Encoding::Bson, Frame::Text(_)) => Err("expected a binary frame".to_string()),
        };
        result.map_err(|reason| MalformedEnvelope {
            encoding: self,
            reason,
        })
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "bson" => Ok(Encoding::Bson),
            other => Err(format!("unknown encoding: {} (expected json or bson)", other)),
        }
    }
}
