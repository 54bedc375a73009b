//! Inbound event dispatch.
//!
//! Classifies each chat event, resolves or creates the thread's agent
//! session, drives the invoke → detect-question → ask → resume loop, and
//! commits the results. Each event runs in its own task; a fault in one
//! never reaches another and never crashes the process.

use crate::agent::pending::{AnswerOutcome, PendingQuestions};
use crate::agent::runner::{AgentInvoker, InvokeRequest, TokenUsage};
use crate::config::Config;
use crate::error::Result;
use crate::messaging::Messaging;
use crate::store::{RunStore, SessionStore};
use crate::{EventKind, InboundEvent};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Marker the reasoning agent embeds when it needs a human decision.
static ASK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[ASK:\s*(.+?)\]").expect("hardcoded regex"));

/// Platform mention token, e.g. `<@U0123ABCD>`.
static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@[A-Z0-9]+>").expect("hardcoded regex"));

const GREETING: &str =
    "Hi! Ask me to check pods, investigate issues, or help with operations tasks.";

const TOO_MANY_ROUNDS_MESSAGE: &str =
    "Stopping here: too many clarifying rounds in one request. Please start a new request with more detail.";

const TRUNCATION_MARKER: &str = "\n\n_(response truncated)_";

/// Dispatch settings carved out of the daemon [`Config`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_message_len: usize,
    pub answer_timeout: Duration,
    pub max_question_rounds: usize,
}

impl From<&Config> for DispatchConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_message_len: config.messaging.max_message_len,
            answer_timeout: Duration::from_secs(config.agent.answer_timeout_secs),
            max_question_rounds: config.agent.max_question_rounds,
        }
    }
}

/// One conversational turn through the invoke/question loop.
#[derive(Debug, Clone)]
pub(crate) struct TurnRequest<'a> {
    pub task: String,
    /// Session token to resume, when the thread already has one.
    pub session: Option<String>,
    /// Channel where questions and replies are posted.
    pub channel: &'a str,
    /// Thread for posting and for correlating answers. When absent, a
    /// posted question's own message id becomes the wait key.
    pub thread: Option<&'a str>,
    pub target: Option<&'a str>,
}

/// What a completed turn produced.
#[derive(Debug, Clone)]
pub(crate) struct TurnOutcome {
    pub text: String,
    /// Latest session token seen across the loop's invocations.
    pub session_id: Option<String>,
    /// Usage accumulated across every invocation in the loop.
    pub usage: TokenUsage,
}

/// The message-handling core.
pub struct Dispatcher<M, R> {
    sessions: SessionStore,
    runs: RunStore,
    pending: PendingQuestions,
    runner: R,
    messaging: Arc<M>,
    config: DispatchConfig,
}

impl<M: Messaging, R: AgentInvoker> Dispatcher<M, R> {
    pub fn new(
        sessions: SessionStore,
        runs: RunStore,
        pending: PendingQuestions,
        runner: R,
        messaging: Arc<M>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            sessions,
            runs,
            pending,
            runner,
            messaging,
            config,
        }
    }

    /// Handle one inbound event. This is the outer fault boundary: any
    /// error is logged and reported back into the same conversational
    /// location as a short notice.
    pub async fn handle_event(&self, event: InboundEvent) {
        if event.is_bot {
            return;
        }
        let channel = event.channel_id.clone();
        let thread = event.thread_id.clone();

        if let Err(error) = self.dispatch(event).await {
            tracing::error!(%error, channel = %channel, "event dispatch failed");
            let notice = format!("Error: {error}");
            if let Err(error) = self
                .messaging
                .post(&channel, &notice, thread.as_deref())
                .await
            {
                tracing::error!(%error, channel = %channel, "failed to deliver error notice");
            }
        }
    }

    /// Classify the event. Exactly one branch applies, in this order:
    /// pending-answer resolution, mention, direct message, thread reply
    /// with a live session, ignore.
    async fn dispatch(&self, event: InboundEvent) -> Result<()> {
        // A reply into a thread that is waiting on a question feeds the
        // suspended turn instead of starting a new one.
        if event.kind != EventKind::Mention
            && let Some(thread) = event.thread_id.as_deref()
            && self.pending.resolve(thread, &event.text).await
        {
            tracing::info!(thread_id = %thread, "resolved pending question");
            return Ok(());
        }

        match event.kind {
            EventKind::Mention => self.handle_mention(event).await,
            EventKind::DirectMessage => self.handle_direct_message(event).await,
            EventKind::ChannelMessage => self.handle_thread_reply(event).await,
        }
    }

    async fn handle_mention(&self, event: InboundEvent) -> Result<()> {
        // The mention itself roots a new thread unless it was already in one.
        let thread = event
            .thread_id
            .clone()
            .unwrap_or_else(|| event.conversation_id.clone());
        let task = MENTION_PATTERN
            .replace_all(&event.text, "")
            .trim()
            .to_string();

        if task.is_empty() {
            self.messaging
                .post(&event.channel_id, GREETING, Some(&thread))
                .await?;
            return Ok(());
        }

        tracing::info!(
            sender = %event.sender_id,
            channel = %event.channel_id,
            thread_id = %thread,
            "mention received"
        );

        let session = self.sessions.get(&thread).await?;
        self.messaging
            .post(&event.channel_id, "Investigating...", Some(&thread))
            .await?;

        let turn = self
            .run_turn(TurnRequest {
                task,
                session,
                channel: &event.channel_id,
                thread: Some(&thread),
                target: None,
            })
            .await?;
        self.finish_turn(&thread, &event.channel_id, Some(&thread), turn, "interactive")
            .await
    }

    async fn handle_direct_message(&self, event: InboundEvent) -> Result<()> {
        // DMs have no thread; continuity hangs off a synthetic per-channel key.
        let session_key = format!("dm:{}", event.channel_id);
        let session = self.sessions.get(&session_key).await?;

        tracing::info!(channel = %event.channel_id, "direct message received");

        let turn = self
            .run_turn(TurnRequest {
                task: event.text,
                session,
                channel: &event.channel_id,
                thread: None,
                target: None,
            })
            .await?;
        self.finish_turn(&session_key, &event.channel_id, None, turn, "dm")
            .await
    }

    async fn handle_thread_reply(&self, event: InboundEvent) -> Result<()> {
        let Some(thread) = event.thread_id.clone() else {
            // Plain channel chatter; mentions are handled separately.
            return Ok(());
        };
        let Some(session) = self.sessions.get(&thread).await? else {
            // No session registered for this thread — not our conversation.
            return Ok(());
        };

        tracing::info!(thread_id = %thread, "continuing thread session");

        let turn = self
            .run_turn(TurnRequest {
                task: event.text,
                session: Some(session),
                channel: &event.channel_id,
                thread: Some(&thread),
                target: None,
            })
            .await?;
        self.finish_turn(&thread, &event.channel_id, Some(&thread), turn, "thread")
            .await
    }

    /// Drive the invoke → detect-question → ask → resume loop for one turn.
    ///
    /// Also used by the scan driver, which supplies its own post-processing.
    pub(crate) async fn run_turn(&self, req: TurnRequest<'_>) -> Result<TurnOutcome> {
        let mut session = req.session.clone();
        let mut reply = self
            .runner
            .invoke(&InvokeRequest {
                task: &req.task,
                session_id: session.as_deref(),
                target: req.target,
                channel: Some(req.channel),
                thread: req.thread,
            })
            .await;
        let mut usage = reply.usage.clone();
        if reply.session_id.is_some() {
            session = reply.session_id.clone();
        }

        let mut rounds = 0usize;
        while let Some(question) = extract_question(&reply.text) {
            rounds += 1;
            if rounds > self.config.max_question_rounds {
                tracing::warn!(
                    channel = %req.channel,
                    rounds,
                    max = self.config.max_question_rounds,
                    "clarifying round cap reached, ending turn"
                );
                reply.text = TOO_MANY_ROUNDS_MESSAGE.to_string();
                break;
            }

            let answer = self.ask_human(req.channel, req.thread, &question).await;
            reply = self
                .runner
                .invoke(&InvokeRequest {
                    task: &format!("User replied: {answer}"),
                    session_id: session.as_deref(),
                    target: req.target,
                    channel: Some(req.channel),
                    thread: req.thread,
                })
                .await;
            usage.absorb(&reply.usage);
            if reply.session_id.is_some() {
                session = reply.session_id.clone();
            }
        }

        Ok(TurnOutcome {
            text: reply.text,
            session_id: session,
            usage,
        })
    }

    /// Post a question and suspend until the human answers or the wait
    /// times out. Only this turn blocks — unrelated threads keep flowing.
    /// Always returns answer text; failures come back as placeholders the
    /// agent can read.
    async fn ask_human(&self, channel: &str, thread: Option<&str>, question: &str) -> String {
        let handle = match thread {
            Some(thread) => {
                // Register before posting so a fast reply cannot race past
                // the waiter.
                let handle = match self.pending.ask(thread).await {
                    Ok(handle) => handle,
                    Err(error) => return format!("[{error}]"),
                };
                let text = format!("*Question*\n\n{question}");
                if let Err(error) = self.messaging.post(channel, &text, Some(thread)).await {
                    handle.cancel().await;
                    tracing::error!(%error, channel = %channel, "failed to post question");
                    return format!("[Error posting question: {error}]");
                }
                handle
            }
            None => {
                // No thread yet — the posted question becomes the thread root.
                let text = format!("*Question*\n\n{question}\n\n_Reply to this thread to respond_");
                let root = match self.messaging.post(channel, &text, None).await {
                    Ok(root) => root,
                    Err(error) => {
                        tracing::error!(%error, channel = %channel, "failed to post question");
                        return format!("[Error posting question: {error}]");
                    }
                };
                match self.pending.ask(&root).await {
                    Ok(handle) => handle,
                    Err(error) => return format!("[{error}]"),
                }
            }
        };

        tracing::info!(channel = %channel, "question posted, waiting for reply");

        let timeout = self.config.answer_timeout;
        match handle.wait(timeout).await {
            AnswerOutcome::Answered(answer) => answer,
            AnswerOutcome::TimedOut => {
                tracing::warn!(channel = %channel, "no reply within {}s", timeout.as_secs());
                format!("[No reply received within {} seconds]", timeout.as_secs())
            }
        }
    }

    /// Commit a finished turn: persist the session pointer, record usage,
    /// and deliver the reply. A failed session save or usage record is
    /// logged but never costs the user their answer.
    async fn finish_turn(
        &self,
        session_key: &str,
        channel: &str,
        post_thread: Option<&str>,
        turn: TurnOutcome,
        context: &'static str,
    ) -> Result<()> {
        if let Some(session_id) = &turn.session_id
            && let Err(error) = self.sessions.save(session_key, session_id, channel, None).await
        {
            tracing::warn!(%error, thread_id = %session_key, "failed to persist session, continuing");
        }

        if !turn.usage.is_empty()
            && let Err(error) = self
                .runs
                .record_token_usage(
                    0,
                    context,
                    &turn.usage.model,
                    turn.usage.input_tokens,
                    turn.usage.output_tokens,
                    turn.usage.cost,
                )
                .await
        {
            tracing::warn!(%error, context, "failed to record token usage");
        }

        let text = truncate_message(&turn.text, self.config.max_message_len);
        self.messaging.post(channel, &text, post_thread).await?;
        Ok(())
    }
}

/// Pull the first embedded question out of a reply, if any.
fn extract_question(text: &str) -> Option<String> {
    ASK_PATTERN
        .captures(text)
        .map(|captures| captures[1].trim().to_string())
}

/// Clamp a reply to the transport limit, appending a marker only when
/// something was actually cut. Cuts on a char boundary.
fn truncate_message(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &text[..end], TRUNCATION_MARKER)
}
