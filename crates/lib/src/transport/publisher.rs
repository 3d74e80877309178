//! Publishers: fire-and-forget `publish` envelopes.

use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Inner, Transport};
use crate::error::{Error, Result};
use crate::interfaces::{Options, Topic};
use crate::names::{normalize_name, normalize_type};
use crate::protocol::Envelope;

/// Sends messages on one topic. No acknowledgement or delivery guarantee beyond the
/// connection's own ordering.
pub struct Publisher<M> {
    inner: Arc<Inner>,
    topic: String,
    typ: String,
    _message: PhantomData<fn(&M)>,
}

impl Transport {
    pub fn create_publisher<M>(&self, topic: &Topic<M>) -> Publisher<M> {
        Publisher {
            inner: Arc::clone(&self.inner),
            topic: normalize_name(&topic.topic).to_string(),
            typ: normalize_type(&topic.typ),
            _message: PhantomData,
        }
    }

    pub fn create_publisher_with_options<M>(
        &self,
        topic: &Topic<M>,
        options: &Options,
    ) -> Result<Publisher<M>> {
        options.ensure_supported()?;
        Ok(self.create_publisher(topic))
    }
}

impl<M: Serialize> Publisher<M> {
    pub fn publish(&self, msg: &M) -> Result<()> {
        let msg = serde_json::to_value(msg).map_err(|e| Error::Encode(e.to_string()))?;
        self.inner.send(&Envelope::Publish {
            topic: self.topic.clone(),
            typ: self.typ.clone(),
            msg,
        })
    }
}

impl<M> Publisher<M> {
    /// Wire topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl<M> std::fmt::Debug for Publisher<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("typ", &self.typ)
            .finish()
    }
}
