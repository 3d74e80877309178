//! Outgoing service calls correlated to responses by call id.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::{Inner, Transport};
use crate::error::{Error, Result};
use crate::interfaces::Service;
use crate::names::normalize_name;
use crate::protocol::Envelope;

impl Transport {
    /// Call a remote service and wait for its response. There is no timeout: the call
    /// waits as long as the connection lives, and fails with [`Error::Closed`] when it ends.
    pub async fn call<Req, Res>(&self, service: &Service<Req, Res>, request: &Req) -> Result<Res>
    where
        Req: Serialize,
    {
        let pending = self.inner.begin_call(&service.service, request)?;
        let values = pending.wait().await?;
        Ok(service.validate_response(values)?)
    }

    /// Like [`Transport::call`], giving up after `timeout`. A late response is ignored.
    pub async fn call_with_timeout<Req, Res>(
        &self,
        service: &Service<Req, Res>,
        request: &Req,
        timeout: Duration,
    ) -> Result<Res>
    where
        Req: Serialize,
    {
        let pending = self.inner.begin_call(&service.service, request)?;
        let values = tokio::time::timeout(timeout, pending.wait())
            .await
            .map_err(|_| Error::Timeout(timeout))??;
        Ok(service.validate_response(values)?)
    }
}

impl Inner {
    fn begin_call<Req: Serialize>(
        self: &Arc<Self>,
        service: &str,
        request: &Req,
    ) -> Result<PendingCall> {
        let args = serde_json::to_value(request).map_err(|e| Error::Encode(e.to_string()))?;
        let service = normalize_name(service);
        let mut state = self.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        let id = state.next_call_id.to_string();
        self.enqueue(&Envelope::CallService {
            id: id.clone(),
            service: service.to_string(),
            args,
        })?;
        state.next_call_id += 1;
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id.clone(), tx);
        log::debug!("call {} -> {}", id, service);
        Ok(PendingCall {
            inner: Arc::clone(self),
            id,
            rx,
        })
    }

    pub(super) fn dispatch_response(&self, id: &str, values: Value) {
        let waiter = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.pending.remove(id)
        };
        match waiter {
            Some(tx) => {
                if tx.send(values).is_err() {
                    log::debug!("caller of {} went away before its response", id);
                }
            }
            None => log::debug!("response for unknown call id {}", id),
        }
    }

    fn forget_call(&self, id: &str) {
        self.lock().pending.remove(id);
    }

    #[cfg(test)]
    pub(crate) fn pending_calls(&self) -> usize {
        self.lock().pending.len()
    }
}

/// Waiter for one call; dropping it unregisters the id.
struct PendingCall {
    inner: Arc<Inner>,
    id: String,
    rx: oneshot::Receiver<Value>,
}

impl PendingCall {
    async fn wait(mut self) -> Result<Value> {
        (&mut self.rx).await.map_err(|_| Error::Closed)
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.inner.forget_call(&self.id);
    }
}
