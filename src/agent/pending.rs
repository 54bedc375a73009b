//! Pending-question correlation.
//!
//! When the reasoning agent asks a clarifying question mid-turn, the asking
//! task posts it and suspends on an [`AnswerHandle`] while the dispatcher
//! keeps handling unrelated events. A later reply in the same thread
//! resolves the waiter. Entries live only in memory — a restart drops them.

use crate::error::AgentError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

/// Registry of threads with an outstanding clarifying question.
///
/// An explicit object passed by reference to every task that needs it, so
/// lifetime and test isolation stay visible. At most one waiter may exist
/// per thread identity.
#[derive(Debug, Clone, Default)]
pub struct PendingQuestions {
    waiters: Arc<Mutex<HashMap<String, oneshot::Sender<String>>>>,
}

/// Outcome of waiting for a human answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Answered(String),
    TimedOut,
}

/// A registered waiter. Consumed by [`AnswerHandle::wait`], which removes
/// the registry entry unconditionally before returning — a stale entry must
/// never intercept a later unrelated reply.
#[derive(Debug)]
pub struct AnswerHandle {
    thread_id: String,
    rx: oneshot::Receiver<String>,
    registry: PendingQuestions,
}

impl PendingQuestions {
    /// Register a waiter for a thread. Fails if the thread already has one —
    /// a second question must never silently orphan the first waiter.
    pub async fn ask(&self, thread_id: &str) -> Result<AnswerHandle, AgentError> {
        let mut waiters = self.waiters.lock().await;
        if waiters.contains_key(thread_id) {
            return Err(AgentError::QuestionPending {
                thread_id: thread_id.to_string(),
            });
        }
        let (tx, rx) = oneshot::channel();
        waiters.insert(thread_id.to_string(), tx);
        Ok(AnswerHandle {
            thread_id: thread_id.to_string(),
            rx,
            registry: self.clone(),
        })
    }

    /// Wake the waiter for a thread with the answer text. Returns false
    /// when no waiter exists (nothing to do), including when the waiter
    /// already timed out.
    pub async fn resolve(&self, thread_id: &str, answer: &str) -> bool {
        let tx = self.waiters.lock().await.remove(thread_id);
        match tx {
            Some(tx) => tx.send(answer.to_string()).is_ok(),
            None => false,
        }
    }

    /// Whether a thread currently has a registered waiter.
    pub async fn is_waiting(&self, thread_id: &str) -> bool {
        self.waiters.lock().await.contains_key(thread_id)
    }
}

impl AnswerHandle {
    /// Suspend until the answer arrives or `timeout` elapses. The registry
    /// entry is removed before this returns, whichever way it resolves.
    pub async fn wait(self, timeout: Duration) -> AnswerOutcome {
        let Self {
            thread_id,
            rx,
            registry,
        } = self;

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(answer)) => AnswerOutcome::Answered(answer),
            // Sender dropped without an answer — treat like a timeout.
            Ok(Err(_)) => AnswerOutcome::TimedOut,
            Err(_) => AnswerOutcome::TimedOut,
        };

        registry.waiters.lock().await.remove(&thread_id);
        outcome
    }

    /// Abandon the wait and remove the registry entry, e.g. when posting
    /// the question itself failed.
    pub async fn cancel(self) {
        self.registry.waiters.lock().await.remove(&self.thread_id);
    }
}
