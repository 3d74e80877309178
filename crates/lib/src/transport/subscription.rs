//! Topic subscriptions: one upstream `subscribe` per topic, fanned out to local listeners.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Inner, Transport};
use crate::error::{Error, Result, ValidationError};
use crate::interfaces::{Options, Topic};
use crate::names::{normalize_name, normalize_type};
use crate::protocol::Envelope;

pub(crate) type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Local listeners of one wire topic, keyed by registration id.
pub(crate) struct TopicRoute {
    typ: String,
    listeners: BTreeMap<u64, Listener>,
}

impl Transport {
    /// Listen on `topic`. The callback receives each validated message, or the
    /// validation error for a payload this topic's validator rejected.
    pub fn subscribe<M, F>(&self, topic: &Topic<M>, callback: F) -> Result<Subscription>
    where
        M: 'static,
        F: Fn(Result<M, ValidationError>) + Send + Sync + 'static,
    {
        self.subscribe_with_options(topic, callback, &Options::default())
    }

    pub fn subscribe_with_options<M, F>(
        &self,
        topic: &Topic<M>,
        callback: F,
        options: &Options,
    ) -> Result<Subscription>
    where
        M: 'static,
        F: Fn(Result<M, ValidationError>) + Send + Sync + 'static,
    {
        options.ensure_supported()?;
        let validate = topic.validator();
        let listener: Listener = Arc::new(move |msg: &Value| callback(validate(msg.clone())));
        let (id, wire_topic) = self.inner.add_listener(
            normalize_name(&topic.topic),
            normalize_type(&topic.typ),
            listener,
        )?;
        Ok(Subscription {
            inner: Arc::clone(&self.inner),
            topic: wire_topic,
            id,
            active: true,
        })
    }
}

impl Inner {
    fn add_listener(&self, topic: &str, typ: String, listener: Listener) -> Result<(u64, String)> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        if let Some(route) = state.topics.get(topic) {
            if route.typ != typ {
                log::warn!(
                    "topic {} already subscribed as {}, ignoring type {}",
                    topic,
                    route.typ,
                    typ
                );
            }
        } else {
            self.enqueue(&Envelope::Subscribe {
                topic: topic.to_string(),
                typ: typ.clone(),
            })?;
            log::debug!("subscribed to {} ({})", topic, typ);
        }
        let id = state.next_route_id();
        state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicRoute {
                typ,
                listeners: BTreeMap::new(),
            })
            .listeners
            .insert(id, listener);
        Ok((id, topic.to_string()))
    }

    fn remove_listener(&self, topic: &str, id: u64) {
        // Dropped after the guard: a listener may own another Subscription.
        let (_released, _route) = {
            let mut state = self.lock();
            let Some(route) = state.topics.get_mut(topic) else {
                return;
            };
            let released = route.listeners.remove(&id);
            if released.is_none() || !route.listeners.is_empty() {
                (released, None)
            } else {
                let route = state.topics.remove(topic);
                if !state.closed {
                    match self.enqueue(&Envelope::Unsubscribe {
                        topic: topic.to_string(),
                    }) {
                        Ok(()) => log::debug!("unsubscribed from {}", topic),
                        Err(e) => log::warn!("failed to unsubscribe from {}: {}", topic, e),
                    }
                }
                (released, route)
            }
        };
    }

    pub(super) fn dispatch_publish(&self, topic: &str, msg: Value) {
        let listeners: Vec<Listener> = {
            let state = self.lock();
            if state.closed {
                return;
            }
            match state.topics.get(topic) {
                Some(route) => route.listeners.values().cloned().collect(),
                None => {
                    log::debug!("publish on {} with no local listeners", topic);
                    return;
                }
            }
        };
        for listener in listeners {
            listener(&msg);
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map_or(0, |route| route.listeners.len())
    }
}

/// One listener's interest in a topic. Releasing it, explicitly or by drop, removes the
/// listener; the last release for a topic sends `unsubscribe` upstream.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    inner: Arc<Inner>,
    topic: String,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Wire topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.active, false) {
            self.inner.remove_listener(&self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
