//! Provider event channel
//!
//! Providers talk to the controller through a typed `mpsc` channel rather than
//! multicast callbacks. Asynchronous answers (authorization, query results)
//! are one-shot reply values: `send` consumes the reply, so each request is
//! answered at most once.

use std::sync::mpsc::{self, Receiver, Sender};
use uuid::Uuid;

use crate::bridge::StepQueryResult;
use crate::types::{ProviderKind, StepDelta};

/// Everything a provider can report
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    StepsUpdated {
        provider: ProviderKind,
        delta: StepDelta,
    },
    AuthorizationResolved {
        request_id: Uuid,
        provider: ProviderKind,
        granted: bool,
    },
    QueryCompleted {
        request_id: Uuid,
        provider: ProviderKind,
        result: StepQueryResult,
    },
}

/// Sending half of the provider event channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<ProviderEvent>,
}

impl EventSink {
    /// Create a connected sink and receiver
    pub fn channel() -> (EventSink, Receiver<ProviderEvent>) {
        let (tx, rx) = mpsc::channel();
        (EventSink { tx }, rx)
    }

    /// Publish a step delta. Returns false when nobody is listening anymore.
    pub fn emit_steps(&self, provider: ProviderKind, delta: StepDelta) -> bool {
        self.send(ProviderEvent::StepsUpdated { provider, delta })
    }

    fn send(&self, event: ProviderEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("Provider event dropped, receiver closed");
                false
            }
        }
    }
}

/// One-shot answer to an authorization request
#[derive(Debug)]
pub struct AuthorizationReply {
    request_id: Uuid,
    provider: ProviderKind,
    sink: EventSink,
}

impl AuthorizationReply {
    pub fn new(request_id: Uuid, provider: ProviderKind, sink: EventSink) -> Self {
        Self {
            request_id,
            provider,
            sink,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// `granted` must reflect the actual grant state, not that a prompt was shown
    pub fn send(self, granted: bool) {
        self.sink.send(ProviderEvent::AuthorizationResolved {
            request_id: self.request_id,
            provider: self.provider,
            granted,
        });
    }
}

/// One-shot answer to a historical step query
#[derive(Debug)]
pub struct QueryReply {
    request_id: Uuid,
    provider: ProviderKind,
    sink: EventSink,
}

impl QueryReply {
    pub fn new(request_id: Uuid, provider: ProviderKind, sink: EventSink) -> Self {
        Self {
            request_id,
            provider,
            sink,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn send(self, result: StepQueryResult) {
        self.sink.send(ProviderEvent::QueryCompleted {
            request_id: self.request_id,
            provider: self.provider,
            result,
        });
    }
}
