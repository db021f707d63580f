//! Request/response correlator over a topic-based transport
//!
//! ## Flow
//!
//! ```text
//! issue()  ── subscribe(response topic) ── insert PendingRequest ── arm deadline ── publish(request topic)
//!                     │                            │
//!      reply handler: parse → match requestId → remove → send
//!                                                  ▼
//! PendingCall::wait() ── reply | deadline | cancel ── release(response topic)
//! ```
//!
//! Resolution is decided by whoever removes the entry from the pending map
//! first: the reply handler, the deadline in [`PendingCall::wait`], or
//! [`Correlator::cancel`]. Everybody else finds the entry gone and does
//! nothing. The response subscription is always released by the
//! [`PendingCall`] itself, either at the end of `wait` or when it is dropped
//! unresolved.
//!
//! ## Usage contract
//!
//! The subscription registry keeps one handler per topic. Two calls that are
//! in flight at the same time on the same response topic interfere: the
//! second one takes over the topic and the first can then only time out.
//! Callers must either use distinct response topics or serialize calls per
//! topic.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::subscriptions::{MessageHandler, SharedSubscriptionRegistry, SubscriptionToken};
use crate::domain::{CorrelationId, CorrelationIdGenerator, Payload, CORRELATION_FIELD};
use crate::infrastructure::{InboundMessage, Transport};
use crate::support::CommandError;

struct PendingRequest {
    request_topic: String,
    created_at: std::time::Instant,
    responder: oneshot::Sender<Value>,
}

type PendingMap = Arc<DashMap<CorrelationId, PendingRequest>>;

pub struct Correlator {
    transport: Arc<dyn Transport>,
    subscriptions: SharedSubscriptionRegistry,
    pending: PendingMap,
    ids: CorrelationIdGenerator,
}

pub type SharedCorrelator = Arc<Correlator>;

impl Correlator {
    pub fn new(transport: Arc<dyn Transport>, subscriptions: SharedSubscriptionRegistry) -> Self {
        Self {
            transport,
            subscriptions,
            pending: Arc::new(DashMap::new()),
            ids: CorrelationIdGenerator::new(),
        }
    }

    pub fn shared(
        transport: Arc<dyn Transport>,
        subscriptions: SharedSubscriptionRegistry,
    ) -> SharedCorrelator {
        Arc::new(Self::new(transport, subscriptions))
    }

    /// Publish `payload` on `request_topic` and wait for the reply carrying
    /// the same correlation id on `response_topic`.
    ///
    /// Returns the parsed reply, [`CommandError::Timeout`] when nothing
    /// matching arrives in time, or [`CommandError::Transport`] when the
    /// subscribe or publish fails.
    pub async fn call(
        &self,
        request_topic: &str,
        response_topic: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<Value, CommandError> {
        self.call_until(
            request_topic,
            response_topic,
            payload,
            Instant::now() + timeout,
            timeout,
        )
        .await
    }

    /// Like [`call`](Self::call), but against a deadline fixed by the caller.
    /// `timeout` is the full budget the deadline was derived from and is
    /// what a [`CommandError::Timeout`] reports.
    pub async fn call_until(
        &self,
        request_topic: &str,
        response_topic: &str,
        payload: Payload,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Value, CommandError> {
        self.issue_until(request_topic, response_topic, payload, deadline, timeout)
            .await?
            .wait()
            .await
    }

    /// Send the request and return a handle to the outstanding call.
    ///
    /// The deadline starts before the publish. Dropping the handle without
    /// awaiting it cancels the call.
    pub async fn issue(
        &self,
        request_topic: &str,
        response_topic: &str,
        payload: Payload,
        timeout: Duration,
    ) -> Result<PendingCall, CommandError> {
        self.issue_until(
            request_topic,
            response_topic,
            payload,
            Instant::now() + timeout,
            timeout,
        )
        .await
    }

    async fn issue_until(
        &self,
        request_topic: &str,
        response_topic: &str,
        mut payload: Payload,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<PendingCall, CommandError> {
        let id = self.ids.next_id();
        payload.insert(CORRELATION_FIELD.to_string(), Value::String(id.to_string()));
        let body = serde_json::to_vec(&payload)?;

        // No reply can arrive before the publish below, so the handler may
        // be installed ahead of the pending entry it looks up.
        let handler = reply_handler(self.pending.clone(), id.clone());
        let token = self.subscriptions.subscribe(response_topic, handler).await?;

        let (responder, receiver) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                request_topic: request_topic.to_string(),
                created_at: std::time::Instant::now(),
                responder,
            },
        );

        let mut call = PendingCall {
            id,
            response_topic: response_topic.to_string(),
            token,
            deadline,
            timeout,
            receiver,
            pending: self.pending.clone(),
            subscriptions: self.subscriptions.clone(),
            released: false,
        };

        debug!(
            request_id = call.id.as_str(),
            request_topic,
            response_topic,
            timeout_ms = timeout.as_millis() as u64,
            "Sending correlated request"
        );

        if let Err(e) = self.transport.publish(request_topic, body).await {
            warn!(
                request_id = call.id.as_str(),
                request_topic,
                error = %e,
                "Request publish failed"
            );
            self.pending.remove(&call.id);
            call.release().await;
            return Err(e.into());
        }

        Ok(call)
    }

    /// Abort an outstanding call. Its waiter resolves with
    /// [`CommandError::Cancelled`]. Returns `false` if the call had already
    /// resolved.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        match self.pending.remove(id) {
            Some((_, request)) => {
                info!(
                    request_id = id.as_str(),
                    request_topic = request.request_topic.as_str(),
                    "Request cancelled"
                );
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn reply_handler(pending: PendingMap, id: CorrelationId) -> MessageHandler {
    Arc::new(move |message: InboundMessage| {
        let reply = match message.parse_json() {
            Ok(reply) => reply,
            Err(e) => {
                debug!(topic = message.topic.as_str(), error = %e, "Malformed reply dropped");
                return;
            }
        };

        let echoed = reply.get(CORRELATION_FIELD).and_then(Value::as_str);
        if echoed != Some(id.as_str()) {
            debug!(
                topic = message.topic.as_str(),
                expected = id.as_str(),
                received = ?echoed,
                "Reply for another request dropped"
            );
            return;
        }

        if let Some((_, request)) = pending.remove(&id) {
            info!(
                request_id = id.as_str(),
                request_topic = request.request_topic.as_str(),
                elapsed_ms = request.created_at.elapsed().as_millis() as u64,
                "Received matching reply"
            );
            let _ = request.responder.send(reply);
        }
    })
}

/// An issued request awaiting its reply.
pub struct PendingCall {
    id: CorrelationId,
    response_topic: String,
    token: SubscriptionToken,
    deadline: Instant,
    timeout: Duration,
    receiver: oneshot::Receiver<Value>,
    pending: PendingMap,
    subscriptions: SharedSubscriptionRegistry,
    released: bool,
}

impl PendingCall {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the reply, the deadline or a cancellation, whichever wins.
    pub async fn wait(mut self) -> Result<Value, CommandError> {
        let outcome = match tokio::time::timeout_at(self.deadline, &mut self.receiver).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(CommandError::Cancelled(self.id.to_string())),
            Err(_) => {
                if self.pending.remove(&self.id).is_some() {
                    warn!(
                        request_id = self.id.as_str(),
                        response_topic = self.response_topic.as_str(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Request timed out"
                    );
                    Err(CommandError::Timeout {
                        request_id: self.id.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    })
                } else {
                    // The reply or a cancel removed the entry right at the deadline.
                    (&mut self.receiver)
                        .await
                        .map_err(|_| CommandError::Cancelled(self.id.to_string()))
                }
            }
        };

        self.release().await;
        outcome
    }

    async fn release(&mut self) {
        self.subscriptions
            .release(&self.response_topic, self.token)
            .await;
        self.released = true;
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.pending.remove(&self.id).is_some() {
            debug!(request_id = self.id.as_str(), "Pending call dropped unresolved");
        }

        let subscriptions = self.subscriptions.clone();
        let topic = std::mem::take(&mut self.response_topic);
        let token = self.token;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                subscriptions.release(&topic, token).await;
            });
        }
    }
}
