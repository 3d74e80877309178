//! Topic and service descriptors consumed by the transport.
//!
//! A descriptor names a topic or service as the host application knows it, carries its
//! message type descriptor, and validates inbound payloads into typed values.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ValidationError};

type Validator<T> = Arc<dyn Fn(Value) -> Result<T, ValidationError> + Send + Sync>;

fn serde_validator<T: DeserializeOwned>() -> Validator<T> {
    Arc::new(|value| serde_json::from_value(value).map_err(ValidationError::from))
}

/// A named topic carrying messages of type `M`.
pub struct Topic<M> {
    pub topic: String,
    /// Host type descriptor, e.g. `std_msgs/msg/String`.
    pub typ: String,
    validate: Validator<M>,
}

impl<M: DeserializeOwned> Topic<M> {
    /// Topic whose payloads are validated by deserializing into `M`.
    pub fn new(topic: impl Into<String>, typ: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            typ: typ.into(),
            validate: serde_validator(),
        }
    }
}

impl<M> Topic<M> {
    pub fn with_validator<F>(topic: impl Into<String>, typ: impl Into<String>, validate: F) -> Self
    where
        F: Fn(Value) -> Result<M, ValidationError> + Send + Sync + 'static,
    {
        Self {
            topic: topic.into(),
            typ: typ.into(),
            validate: Arc::new(validate),
        }
    }

    pub fn validate(&self, msg: Value) -> Result<M, ValidationError> {
        (self.validate)(msg)
    }

    pub(crate) fn validator(&self) -> Validator<M> {
        Arc::clone(&self.validate)
    }
}

impl<M> Clone for Topic<M> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            typ: self.typ.clone(),
            validate: Arc::clone(&self.validate),
        }
    }
}

impl<M> fmt::Debug for Topic<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("topic", &self.topic)
            .field("typ", &self.typ)
            .finish_non_exhaustive()
    }
}

/// A named service taking `Req` and answering `Res`.
pub struct Service<Req, Res> {
    pub service: String,
    /// Host type descriptor, e.g. `std_srvs/srv/SetBool`.
    pub typ: String,
    validate_request: Validator<Req>,
    validate_response: Validator<Res>,
}

impl<Req: DeserializeOwned, Res: DeserializeOwned> Service<Req, Res> {
    pub fn new(service: impl Into<String>, typ: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            typ: typ.into(),
            validate_request: serde_validator(),
            validate_response: serde_validator(),
        }
    }
}

impl<Req, Res> Service<Req, Res> {
    pub fn with_validators<FReq, FRes>(
        service: impl Into<String>,
        typ: impl Into<String>,
        validate_request: FReq,
        validate_response: FRes,
    ) -> Self
    where
        FReq: Fn(Value) -> Result<Req, ValidationError> + Send + Sync + 'static,
        FRes: Fn(Value) -> Result<Res, ValidationError> + Send + Sync + 'static,
    {
        Self {
            service: service.into(),
            typ: typ.into(),
            validate_request: Arc::new(validate_request),
            validate_response: Arc::new(validate_response),
        }
    }

    pub fn validate_request(&self, args: Value) -> Result<Req, ValidationError> {
        (self.validate_request)(args)
    }

    pub fn validate_response(&self, values: Value) -> Result<Res, ValidationError> {
        (self.validate_response)(values)
    }

    pub(crate) fn request_validator(&self) -> Validator<Req> {
        Arc::clone(&self.validate_request)
    }
}

impl<Req, Res> Clone for Service<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            typ: self.typ.clone(),
            validate_request: Arc::clone(&self.validate_request),
            validate_response: Arc::clone(&self.validate_response),
        }
    }
}

impl<Req, Res> fmt::Debug for Service<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("service", &self.service)
            .field("typ", &self.typ)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    BestEffort,
    Reliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Volatile,
    TransientLocal,
}

/// Quality-of-service knobs a host interface may request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Qos {
    pub reliability: Option<Reliability>,
    pub durability: Option<Durability>,
    pub depth: Option<usize>,
}

/// Per-publisher / per-subscription options. The gateway protocol has no way to carry
/// any of them, so requesting one fails with [`Error::UnsupportedOption`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub qos: Option<Qos>,
}

impl Options {
    pub(crate) fn ensure_supported(&self) -> Result<(), Error> {
        match &self.qos {
            None => Ok(()),
            Some(qos) if *qos == Qos::default() => Ok(()),
            Some(_) => Err(Error::UnsupportedOption("qos".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct StdString {
        data: String,
    }

    #[test]
    fn serde_validator_accepts_matching_shape() {
        let topic: Topic<StdString> = Topic::new("test_subscribe", "std_msgs/msg/String");
        assert_eq!(
            topic.validate(json!({ "data": "test" })).unwrap(),
            StdString {
                data: "test".to_string()
            }
        );
    }

    #[test]
    fn serde_validator_rejects_wrong_shape() {
        let topic: Topic<StdString> = Topic::new("test_subscribe", "std_msgs/msg/String");
        assert!(topic.validate(json!({ "data": 5 })).is_err());
    }

    #[test]
    fn custom_validator_is_used() {
        let topic = Topic::with_validator("t", "a/b", |v: Value| {
            v.as_i64()
                .ok_or_else(|| ValidationError("expected integer".to_string()))
        });
        assert_eq!(topic.validate(json!(7)).unwrap(), 7);
        assert_eq!(
            topic.validate(json!("x")).unwrap_err(),
            ValidationError("expected integer".to_string())
        );
    }

    #[test]
    fn options_with_qos_are_unsupported() {
        assert!(Options::default().ensure_supported().is_ok());
        let empty_qos = Options {
            qos: Some(Qos::default()),
        };
        assert!(empty_qos.ensure_supported().is_ok());
        let reliable = Options {
            qos: Some(Qos {
                reliability: Some(Reliability::Reliable),
                ..Qos::default()
            }),
        };
        assert!(matches!(
            reliable.ensure_supported(),
            Err(Error::UnsupportedOption(_))
        ));
    }
}
