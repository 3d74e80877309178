//! Transport: one WebSocket connection to the bridge gateway, multiplexing topic
//! subscriptions, publishers, outgoing service calls and hosted services.
//!
//! A reader task decodes every inbound frame once and routes it by `op`: `publish` to
//! the topic's listeners, `service_response` to the pending call with the same id,
//! `call_service` to the hosted service with the same name. A writer task drains the
//! outbound queue. All per-connection state sits behind one mutex in [`Inner`].

mod call;
mod publisher;
mod service;
mod socket;
mod subscription;

use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{Encoding, Frame};
use crate::config::TransportConfig;
use crate::error::{ConnectionError, Error, MalformedEnvelope, Result};
use crate::protocol::Envelope;

pub use publisher::Publisher;
pub use service::ServiceHost;
pub use subscription::Subscription;

use service::ServiceRoute;
use subscription::TopicRoute;

/// Capacity of the lifecycle event channel; slow receivers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notifications for the owner of a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection ended by peer close, local destroy or stream end.
    /// 1005 = no code, 1006 = abnormal.
    Closed { code: u16, reason: String },
    /// The socket reported an error; a `Closed` event follows.
    Error(String),
    /// An inbound frame could not be decoded and was dropped.
    Malformed(MalformedEnvelope),
}

pub(crate) enum Outbound {
    Frame(Frame),
    Close,
}

/// Per-connection mutable state.
#[derive(Default)]
pub(crate) struct State {
    closed: bool,
    next_call_id: u64,
    next_route_id: u64,
    /// Wire topic name -> local listeners. The topic's reference count is its listener count.
    topics: HashMap<String, TopicRoute>,
    /// Call id -> waiter for the matching `service_response`.
    pending: HashMap<String, oneshot::Sender<Value>>,
    /// Wire service name -> hosted handler.
    services: HashMap<String, ServiceRoute>,
}

impl State {
    fn next_route_id(&mut self) -> u64 {
        let id = self.next_route_id;
        self.next_route_id += 1;
        id
    }
}

/// Shared core of a [`Transport`]; handles keep it alive through an `Arc`.
pub(crate) struct Inner {
    encoding: Encoding,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: Mutex<State>,
    events: broadcast::Sender<TransportEvent>,
}

impl Inner {
    pub(crate) fn new(encoding: Encoding) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(Self {
            encoding,
            outbound,
            state: Mutex::new(State::default()),
            events,
        });
        (inner, outbound_rx)
    }

    /// Callbacks never run and routes are never dropped under this lock, so poisoning only
    /// follows a panic in our own code.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode and queue an envelope. Callers check `closed` under the state lock first.
    fn enqueue(&self, envelope: &Envelope) -> Result<()> {
        let frame = self.encoding.encode(envelope)?;
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::Closed)
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        let state = self.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        self.enqueue(envelope)
    }

    fn emit(&self, event: TransportEvent) {
        // No receivers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Mark closed, drop every route and waiter, and ask the writer to close the socket.
    /// Returns false if already closed.
    fn shutdown(&self) -> bool {
        let (topics, pending, services) = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.topics),
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.services),
            )
        };
        log::debug!(
            "transport shut down: {} topics, {} pending calls, {} services released",
            topics.len(),
            pending.len(),
            services.len()
        );
        let _ = self.outbound.send(Outbound::Close);
        true
    }

    /// Decode one inbound frame and route it.
    pub(crate) fn receive(&self, frame: Frame) {
        match self.encoding.decode(&frame) {
            Ok(envelope) => self.dispatch(envelope),
            Err(e) => {
                log::warn!("dropping inbound frame: {}", e);
                self.emit(TransportEvent::Malformed(e));
            }
        }
    }

    pub(crate) fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Publish { topic, msg, .. } => self.dispatch_publish(&topic, msg),
            Envelope::ServiceResponse { id, values, .. } => self.dispatch_response(&id, values),
            Envelope::CallService { id, service, args } => {
                self.dispatch_service_call(id, &service, args)
            }
            other => log::debug!("ignoring inbound {} envelope", other.op()),
        }
    }
}

/// Client side of one gateway connection.
///
/// Dropping the transport and every handle created from it closes the socket;
/// [`Transport::destroy`] does so explicitly and waits for the close handshake.
pub struct Transport {
    name: String,
    inner: Arc<Inner>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Transport {
    /// Open a connection. `token` is presented as the WebSocket sub-protocol.
    pub async fn connect(
        name: impl Into<String>,
        url: &str,
        token: Option<&str>,
        encoding: Encoding,
    ) -> std::result::Result<Self, ConnectionError> {
        let name = name.into();
        let stream = socket::open(url, token).await?;
        let (sink, stream) = stream.split();
        let (inner, outbound_rx) = Inner::new(encoding);
        let writer = tokio::spawn(socket::write_loop(sink, outbound_rx));
        let reader = tokio::spawn(socket::read_loop(stream, Arc::downgrade(&inner)));
        log::info!("{} connected to {} ({})", name, url, encoding);
        Ok(Self {
            name,
            inner,
            reader,
            writer,
        })
    }

    pub async fn connect_with_config(
        config: &TransportConfig,
    ) -> std::result::Result<Self, ConnectionError> {
        Self::connect(
            config.name.clone(),
            &config.url,
            config.token.as_deref(),
            config.encoding,
        )
        .await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    /// Subscribe to lifecycle events. Only events emitted after this call are received.
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Close the connection. Returns once the socket has finished its close handshake
    /// (or was already gone). No inbound envelope is dispatched after this starts.
    pub async fn destroy(self) {
        self.inner.shutdown();
        if let Err(e) = self.reader.await {
            log::warn!("transport reader task failed: {}", e);
        }
        if let Err(e) = self.writer.await {
            log::warn!("transport writer task failed: {}", e);
        }
        log::info!("{} destroyed", self.name);
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("name", &self.name)
            .field("encoding", &self.inner.encoding)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

/// A transport without a socket: the returned receiver sees what would be written.
#[cfg(test)]
pub(crate) fn detached(encoding: Encoding) -> (Transport, mpsc::UnboundedReceiver<Outbound>) {
    let (inner, outbound_rx) = Inner::new(encoding);
    let transport = Transport {
        name: "test".to_string(),
        inner,
        reader: tokio::spawn(async {}),
        writer: tokio::spawn(async {}),
    };
    (transport, outbound_rx)
}

/// Drain queued envelopes, decoding frames; `None` marks a queued close.
#[cfg(test)]
pub(crate) fn drain(
    encoding: Encoding,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
) -> Vec<Option<Envelope>> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(match item {
            Outbound::Frame(frame) => Some(encoding.decode(&frame).expect("decode queued frame")),
            Outbound::Close => None,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn malformed_frame_emits_event_and_keeps_running() {
        let (transport, _rx) = detached(Encoding::Json);
        let mut events = transport.events();
        transport.inner.receive(Frame::Text("{".to_string()));
        match events.try_recv() {
            Ok(TransportEvent::Malformed(e)) => assert_eq!(e.encoding, Encoding::Json),
            other => panic!("expected malformed event, got {:?}", other),
        }
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn shutdown_queues_close_once() {
        let (transport, mut rx) = detached(Encoding::Json);
        assert!(transport.inner.shutdown());
        assert!(!transport.inner.shutdown());
        assert_eq!(drain(Encoding::Json, &mut rx), vec![None]);
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn send_after_shutdown_is_closed() {
        let (transport, _rx) = detached(Encoding::Json);
        transport.inner.shutdown();
        let err = transport
            .inner
            .send(&Envelope::Unsubscribe {
                topic: "a".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn inbound_subscribe_is_ignored() {
        let (transport, mut rx) = detached(Encoding::Json);
        transport.inner.dispatch(Envelope::Subscribe {
            topic: "x".to_string(),
            typ: "a/b".to_string(),
        });
        transport.inner.dispatch(Envelope::Publish {
            topic: "nobody_listens".to_string(),
            typ: "a/b".to_string(),
            msg: json!(1),
        });
        assert!(drain(Encoding::Json, &mut rx).is_empty());
    }
}
