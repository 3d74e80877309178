//! Hosted services: answer inbound `call_service` envelopes with a local async handler.

use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Weak};

use super::{Inner, Transport};
use crate::error::{Error, Result};
use crate::interfaces::Service;
use crate::names::normalize_name;
use crate::protocol::Envelope;

/// Handles one inbound call: (call id, raw args).
type CallHandler = Arc<dyn Fn(String, Value) + Send + Sync>;

pub(crate) struct ServiceRoute {
    host_id: u64,
    handler: CallHandler,
}

/// A local implementation of a named service. Inactive until [`ServiceHost::start`];
/// dropping it stops it.
pub struct ServiceHost<Req, Res> {
    inner: Arc<Inner>,
    service: Service<Req, Res>,
    wire_name: String,
    host_id: Option<u64>,
}

impl Transport {
    pub fn create_service<Req, Res>(&self, service: &Service<Req, Res>) -> ServiceHost<Req, Res> {
        ServiceHost {
            inner: Arc::clone(&self.inner),
            service: service.clone(),
            wire_name: normalize_name(&service.service).to_string(),
            host_id: None,
        }
    }
}

impl<Req, Res> ServiceHost<Req, Res>
where
    Req: 'static,
    Res: Serialize + Send + 'static,
{
    /// Start accepting calls. Each validated request runs `handler` on its own task and
    /// its result is sent back as the `service_response` for that call id.
    pub fn start<F, Fut>(&mut self, handler: F) -> Result<()>
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Res> + Send + 'static,
    {
        self.stop();
        let validate = self.service.request_validator();
        let inner = Arc::downgrade(&self.inner);
        let service = self.wire_name.clone();
        let route: CallHandler = Arc::new(move |id: String, args: Value| {
            let request = match validate(args) {
                Ok(request) => request,
                Err(e) => {
                    log::warn!("dropping call {} to {}: {}", id, service, e);
                    return;
                }
            };
            let response = handler(request);
            let inner = Weak::clone(&inner);
            let service = service.clone();
            tokio::spawn(async move {
                let values = response.await;
                respond(&inner, id, service, &values);
            });
        });
        self.host_id = Some(self.inner.add_service(&self.wire_name, route)?);
        log::info!("hosting service {}", self.wire_name);
        Ok(())
    }
}

impl<Req, Res> ServiceHost<Req, Res> {
    /// Stop accepting new calls. Handlers already running still respond.
    pub fn stop(&mut self) {
        if let Some(host_id) = self.host_id.take() {
            self.inner.remove_service(&self.wire_name, host_id);
            log::info!("stopped hosting service {}", self.wire_name);
        }
    }

    pub fn is_started(&self) -> bool {
        self.host_id.is_some()
    }

    /// Wire service name.
    pub fn name(&self) -> &str {
        &self.wire_name
    }
}

impl<Req, Res> Drop for ServiceHost<Req, Res> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<Req, Res> std::fmt::Debug for ServiceHost<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("service", &self.wire_name)
            .field("started", &self.host_id.is_some())
            .finish()
    }
}

fn respond<Res: Serialize>(inner: &Weak<Inner>, id: String, service: String, values: &Res) {
    let Some(inner) = inner.upgrade() else {
        log::debug!("transport gone before {} answered call {}", service, id);
        return;
    };
    let values = match serde_json::to_value(values) {
        Ok(values) => values,
        Err(e) => {
            log::warn!("cannot encode response of {} for call {}: {}", service, id, e);
            return;
        }
    };
    let envelope = Envelope::ServiceResponse {
        id: id.clone(),
        service: service.clone(),
        values,
    };
    if let Err(e) = inner.send(&envelope) {
        log::debug!("response of {} for call {} not sent: {}", service, id, e);
    }
}

impl Inner {
    fn add_service(&self, name: &str, handler: CallHandler) -> Result<u64> {
        // A replaced route is dropped after the guard; its handler may own handles.
        let (host_id, previous) = {
            let mut state = self.lock();
            if state.closed {
                return Err(Error::Closed);
            }
            let host_id = state.next_route_id();
            let previous = state
                .services
                .insert(name.to_string(), ServiceRoute { host_id, handler });
            (host_id, previous)
        };
        if let Some(previous) = previous {
            log::warn!(
                "service {} was already hosted (host {}); replacing it",
                name,
                previous.host_id
            );
        }
        Ok(host_id)
    }

    fn remove_service(&self, name: &str, host_id: u64) {
        let _removed = {
            let mut state = self.lock();
            if state
                .services
                .get(name)
                .is_some_and(|route| route.host_id == host_id)
            {
                state.services.remove(name)
            } else {
                None
            }
        };
    }

    pub(super) fn dispatch_service_call(&self, id: String, service: &str, args: Value) {
        let handler = {
            let state = self.lock();
            if state.closed {
                return;
            }
            match state.services.get(service) {
                Some(route) => Arc::clone(&route.handler),
                None => {
                    log::debug!("call {} for unhosted service {}", id, service);
                    return;
                }
            }
        };
        handler(id, args);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{detached, drain};
    use super::*;
    use crate::codec::Encoding;
    use crate::interfaces::Topic;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct SetBoolRequest {
        data: bool,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct SetBoolResponse {
        success: bool,
        message: String,
    }

    fn call(id: &str, service: &str, args: Value) -> Envelope {
        Envelope::CallService {
            id: id.to_string(),
            service: service.to_string(),
            args,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn host(transport: &Transport) -> ServiceHost<SetBoolRequest, SetBoolResponse> {
        let service: Service<SetBoolRequest, SetBoolResponse> =
            Service::new("/test_service_host", "std_srvs/srv/SetBool");
        let mut host = transport.create_service(&service);
        host.start(|req: SetBoolRequest| async move {
            SetBoolResponse {
                success: req.data,
                message: "ok".to_string(),
            }
        })
        .unwrap();
        host
    }

    #[tokio::test]
    async fn answers_with_echoed_id() {
        let (transport, mut rx) = detached(Encoding::Json);
        let host = host(&transport);
        assert_eq!(host.name(), "test_service_host");

        transport
            .inner
            .dispatch(call("17", "test_service_host", json!({ "data": true })));
        settle().await;

        assert_eq!(
            drain(Encoding::Json, &mut rx),
            vec![Some(Envelope::ServiceResponse {
                id: "17".to_string(),
                service: "test_service_host".to_string(),
                values: json!({ "success": true, "message": "ok" }),
            })]
        );
    }

    #[tokio::test]
    async fn ignores_other_services_and_invalid_requests() {
        let (transport, mut rx) = detached(Encoding::Json);
        let _host = host(&transport);

        transport
            .inner
            .dispatch(call("1", "some_other_service", json!({ "data": true })));
        transport
            .inner
            .dispatch(call("2", "test_service_host", json!({ "data": "yes" })));
        settle().await;

        assert!(drain(Encoding::Json, &mut rx).is_empty());
    }

    #[tokio::test]
    async fn stop_rejects_new_calls_but_finishes_in_flight() {
        let (transport, mut rx) = detached(Encoding::Json);
        let service: Service<SetBoolRequest, SetBoolResponse> =
            Service::new("slow", "std_srvs/srv/SetBool");
        let mut host = transport.create_service(&service);
        host.start(|req: SetBoolRequest| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            SetBoolResponse {
                success: req.data,
                message: "late".to_string(),
            }
        })
        .unwrap();

        transport.inner.dispatch(call("1", "slow", json!({ "data": false })));
        host.stop();
        assert!(!host.is_started());
        transport.inner.dispatch(call("2", "slow", json!({ "data": true })));
        tokio::time::sleep(Duration::from_millis(80)).await;

        let ids: Vec<String> = drain(Encoding::Json, &mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Some(Envelope::ServiceResponse { id, .. }) => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn stopping_a_host_whose_handler_owns_a_subscription() {
        let (transport, mut rx) = detached(Encoding::Json);
        let topic: Topic<Value> = Topic::new("chatter", "std_msgs/msg/String");
        let subscription = transport.subscribe(&topic, |_| {}).unwrap();
        let service: Service<SetBoolRequest, SetBoolResponse> =
            Service::new("owner", "std_srvs/srv/SetBool");
        let mut host = transport.create_service(&service);
        host.start(move |req: SetBoolRequest| {
            let _ = subscription.topic();
            async move {
                SetBoolResponse {
                    success: req.data,
                    message: String::new(),
                }
            }
        })
        .unwrap();
        drain(Encoding::Json, &mut rx);

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            host.stop();
            let _ = done_tx.send(());
        });
        done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("stop did not complete");
        assert_eq!(
            drain(Encoding::Json, &mut rx),
            vec![Some(Envelope::Unsubscribe {
                topic: "chatter".to_string()
            })]
        );
    }

    #[tokio::test]
    async fn stopping_a_replaced_host_keeps_the_new_one() {
        let (transport, mut rx) = detached(Encoding::Json);
        let old = host(&transport);
        let _new = host(&transport);
        drop(old);

        transport
            .inner
            .dispatch(call("5", "test_service_host", json!({ "data": true })));
        settle().await;
        assert_eq!(drain(Encoding::Json, &mut rx).len(), 1);
    }
}
