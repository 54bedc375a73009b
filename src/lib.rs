//! opsbot: a chat-integrated operations agent.
//!
//! The daemon bridges a messaging platform and an external reasoning agent
//! (an opaque subprocess with resumable sessions). Inbound chat events are
//! classified and dispatched, each conversation thread keeps its own agent
//! session, clarifying questions from the agent are relayed to humans and
//! correlated back, and a periodic scanner runs health checks over
//! configured targets using the same machinery.

pub mod agent;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod messaging;
pub mod scan;
pub mod store;

pub use config::Config;
pub use error::{Error, Result};

use chrono::{DateTime, Utc};

/// How an inbound chat event reached the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The bot was mentioned directly in a channel.
    Mention,
    /// A message in a one-to-one conversation with the bot.
    DirectMessage,
    /// Any other channel message, including thread replies.
    ChannelMessage,
}

/// A structured inbound chat event with platform details already stripped.
///
/// `conversation_id` is the event's own message identity — usable as a new
/// thread root when the event is not already inside a thread.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub kind: EventKind,
    pub conversation_id: String,
    pub channel_id: String,
    /// Thread root identifier when the event happened inside a thread.
    pub thread_id: Option<String>,
    pub text: String,
    pub sender_id: String,
    /// True for events produced by this bot or any other bot account.
    pub is_bot: bool,
    pub timestamp: DateTime<Utc>,
}
