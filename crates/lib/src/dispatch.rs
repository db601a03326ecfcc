//! Dispatcher: one flow call per accepted query, gated per conversation.
//!
//! The busy gate allows at most one in-flight flow call per conversation.
//! A second message while the first is outstanding is rejected with a busy
//! notice, never queued. Each held slot carries a lease; when the lease
//! expires the slot may be taken over by the next message, trading strict
//! mutual exclusion for liveness when a call gets stuck.

use crate::flow::{extract_answer, FlowClient, FlowError, SenderIdentity};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Placeholder reply when the flow response carries no recognizable text.
pub const EMPTY_ANSWER_NOTICE: &str =
    "the flow returned an empty answer, please try rephrasing.";

/// Result of a successful dispatch: the extracted answer, or the explicit
/// empty-answer outcome (not an error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Text(String),
    Empty,
}

/// Terminal dispatch failures, already reduced to user-facing categories.
/// Full detail (status, body, conversation id) is logged before translation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a request for this conversation is already in flight")]
    Busy,
    #[error("flow rejected the api key")]
    Unauthorized,
    #[error("flow not found")]
    NotFound,
    #[error("request too large for the flow")]
    PayloadTooLarge,
    #[error("flow call failed")]
    Failed,
}

impl DispatchError {
    /// Fixed reply text delivered to the chat for this category.
    pub fn user_message(&self) -> &'static str {
        match self {
            DispatchError::Busy => "still working on your previous message, please wait.",
            DispatchError::Unauthorized => {
                "the flow rejected the request: the API key is missing or invalid."
            }
            DispatchError::NotFound => {
                "the flow could not be found, check the flow id and base URL."
            }
            DispatchError::PayloadTooLarge => "that request is too large for the flow to handle.",
            DispatchError::Failed => {
                "something went wrong talking to the flow, please try again later."
            }
        }
    }
}

fn map_status(status: u16) -> DispatchError {
    match status {
        401 | 403 => DispatchError::Unauthorized,
        404 => DispatchError::NotFound,
        413 => DispatchError::PayloadTooLarge,
        _ => DispatchError::Failed,
    }
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct GateInner {
    next_generation: u64,
    slots: HashMap<String, Slot>,
}

/// Per-conversation mutual exclusion with lease expiry. Absence from the map
/// is the idle state; a stored slot is busy until released or its lease runs out.
#[derive(Debug, Clone)]
pub struct BusyGate {
    lease: Duration,
    inner: Arc<Mutex<GateInner>>,
}

/// Scoped hold on a conversation's dispatch slot; released on drop. The
/// generation check makes release a no-op when the slot was taken over after
/// the lease expired, so a stale holder cannot free the new holder's slot.
pub struct BusyPermit {
    conversation_id: String,
    generation: u64,
    inner: Arc<Mutex<GateInner>>,
}

impl BusyGate {
    pub fn new(lease: Duration) -> Self {
        Self {
            lease,
            inner: Arc::new(Mutex::new(GateInner::default())),
        }
    }

    /// Acquire the slot for a conversation. Returns None while another
    /// dispatch holds it and its lease has not expired.
    pub fn try_acquire(&self, conversation_id: &str) -> Option<BusyPermit> {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if let Some(slot) = g.slots.get(conversation_id) {
            if now < slot.deadline {
                return None;
            }
            log::warn!(
                "busy gate: stale slot for conversation {} taken over after lease expiry",
                conversation_id
            );
        }
        let generation = g.next_generation;
        g.next_generation += 1;
        g.slots.insert(
            conversation_id.to_string(),
            Slot {
                generation,
                deadline: now + self.lease,
            },
        );
        Some(BusyPermit {
            conversation_id: conversation_id.to_string(),
            generation,
            inner: self.inner.clone(),
        })
    }
}

impl Drop for BusyPermit {
    fn drop(&mut self) {
        let mut g = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = g.slots.get(&self.conversation_id) {
            if slot.generation == self.generation {
                g.slots.remove(&self.conversation_id);
            }
        }
    }
}

/// Executes accepted queries against the flow, one at a time per conversation.
pub struct Dispatcher {
    client: FlowClient,
    gate: BusyGate,
}

impl Dispatcher {
    pub fn new(client: FlowClient, busy_lease: Duration) -> Self {
        Self {
            client,
            gate: BusyGate::new(busy_lease),
        }
    }

    /// Run one query through the flow. Exactly one outbound call when the gate
    /// passes, zero when it rejects. The slot is released whatever the outcome.
    pub async fn submit(
        &self,
        conversation_id: &str,
        query: &str,
        sender: Option<&SenderIdentity>,
    ) -> Result<Answer, DispatchError> {
        let _permit = self
            .gate
            .try_acquire(conversation_id)
            .ok_or(DispatchError::Busy)?;

        let doc = self
            .client
            .run_flow(query, conversation_id, sender)
            .await
            .map_err(|e| classify_error(e, conversation_id))?;

        match extract_answer(&doc, self.client.output_component()) {
            Some(text) => Ok(Answer::Text(text)),
            None => {
                log::warn!(
                    "flow response for conversation {} had no recognizable answer text",
                    conversation_id
                );
                Ok(Answer::Empty)
            }
        }
    }
}

fn classify_error(err: FlowError, conversation_id: &str) -> DispatchError {
    match err {
        FlowError::Http { status, body } => {
            log::error!(
                "flow call failed for conversation {}: status {}: {}",
                conversation_id,
                status,
                body
            );
            map_status(status)
        }
        other => {
            log::error!("flow call failed for conversation {}: {}", conversation_id, other);
            DispatchError::Failed
        }
    }
}
