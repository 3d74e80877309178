//! Gateway wire envelope (publish, subscribe, service calls).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One wire message. The `op` field selects the variant:
///
/// ```text
/// { "op": "publish",          "topic", "type", "msg" }
/// { "op": "subscribe",        "topic", "type" }
/// { "op": "unsubscribe",      "topic" }
/// { "op": "call_service",     "id", "service", "args" }
/// { "op": "service_response", "id", "service", "values" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Envelope {
    Publish {
        topic: String,
        #[serde(rename = "type")]
        typ: String,
        msg: Value,
    },
    Subscribe {
        topic: String,
        #[serde(rename = "type")]
        typ: String,
    },
    Unsubscribe {
        topic: String,
    },
    CallService {
        id: String,
        service: String,
        #[serde(default)]
        args: Value,
    },
    ServiceResponse {
        id: String,
        service: String,
        #[serde(default)]
        values: Value,
    },
}

impl Envelope {
    /// Wire value of the `op` discriminator.
    pub fn op(&self) -> &'static str {
        match self {
            Envelope::Publish { .. } => "publish",
            Envelope::Subscribe { .. } => "subscribe",
            Envelope::Unsubscribe { .. } => "unsubscribe",
            Envelope::CallService { .. } => "call_service",
            Envelope::ServiceResponse { .. } => "service_response",
        }
    }
}
