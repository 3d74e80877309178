//! Soss transport: client for a topic/service bridge gateway, multiplexing
//! publishers, subscriptions and service calls over one WebSocket.

pub mod codec;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod names;
pub mod protocol;
pub mod transport;

pub use codec::{Encoding, Frame};
pub use error::{ConnectionError, Error, MalformedEnvelope, Result, ValidationError};
pub use interfaces::{Options, Qos, Service, Topic};
pub use protocol::Envelope;
pub use transport::{Publisher, ServiceHost, Subscription, Transport, TransportEvent};
