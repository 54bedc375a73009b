//! Conversation core: event dispatch, subprocess invocation, pending
//! questions, and prompt rendering.

pub mod dispatch;
pub mod pending;
pub mod prompt;
pub mod runner;

pub use dispatch::Dispatcher;
pub use pending::{AnswerHandle, AnswerOutcome, PendingQuestions};
pub use runner::{AgentInvoker, AgentReply, AgentRunner, InvokeRequest, TokenUsage};
