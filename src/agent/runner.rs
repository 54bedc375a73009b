//! Reasoning agent invocation.
//!
//! Wraps the reasoning CLI: one subprocess per call, resumable via the
//! session token from the previous call, line-delimited JSON output. The
//! runner never surfaces a fault to its caller — every failure degrades to
//! a textual error reply so a conversational turn always has something to
//! say.

use crate::agent::prompt::{self, PromptContext};
use crate::config::AgentConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Marker the CLI prints on stderr when a resumed session no longer exists.
const STALE_SESSION_MARKER: &str = "No conversation found with session ID";

/// Result text when the subprocess produced no parseable output at all.
const NO_RESPONSE_PLACEHOLDER: &str = "No response from agent";

/// Price per million tokens, (input, output), keyed by model identifier.
const PRICING: &[(&str, f64, f64)] = &[
    ("claude-sonnet-4-5-20250929", 3.0, 15.0),
    ("claude-opus-4-5-20251101", 15.0, 75.0),
];

/// Price row for a model, falling back to the standard tier for unknown
/// identifiers.
fn price_per_million(model: &str) -> (f64, f64) {
    PRICING
        .iter()
        .find(|(id, _, _)| *id == model)
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or((3.0, 15.0))
}

/// Derive the monetary cost of an invocation from the static price table.
pub fn estimate_cost(model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
    let (input_price, output_price) = price_per_million(model);
    (input_tokens as f64 / 1_000_000.0) * input_price
        + (output_tokens as f64 / 1_000_000.0) * output_price
}

/// Token and cost figures for one or more invocations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUsage {
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }

    /// Fold another invocation's usage into this one.
    pub fn absorb(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost += other.cost;
        if self.model.is_empty() {
            self.model = other.model.clone();
        }
    }
}

/// One invocation of the reasoning agent.
#[derive(Debug, Clone, Copy)]
pub struct InvokeRequest<'a> {
    pub task: &'a str,
    /// Session token from a previous invocation, for continuity.
    pub session_id: Option<&'a str>,
    pub target: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub thread: Option<&'a str>,
}

/// What an invocation produced. Always usable: faults arrive as error text,
/// never as an `Err`.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    /// Session token to resume with next time, when the agent reported one.
    pub session_id: Option<String>,
    pub usage: TokenUsage,
}

/// Seam for the reasoning backend, so conversation logic can be exercised
/// without spawning subprocesses.
pub trait AgentInvoker: Send + Sync + 'static {
    fn invoke(&self, req: &InvokeRequest<'_>) -> impl Future<Output = AgentReply> + Send;
}

/// Faults internal to a single subprocess attempt.
#[derive(Debug, Error)]
enum InvokeFault {
    #[error("session rejected as stale")]
    StaleSession,

    #[error("failed to run agent process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("agent invocation exceeded {0}s")]
    TimedOut(u64),
}

/// Spawns the reasoning CLI and parses its streamed output.
#[derive(Debug, Clone)]
pub struct AgentRunner {
    config: AgentConfig,
}

impl AgentRunner {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    async fn run_once(
        &self,
        req: &InvokeRequest<'_>,
        session: Option<&str>,
    ) -> Result<AgentReply, InvokeFault> {
        let model = self.config.model_tier.model_id();
        let system_prompt = prompt::load_system_prompt(
            self.config.prompt_file.as_deref(),
            PromptContext {
                target: Some(req.target.unwrap_or(&self.config.default_target)),
                channel: req.channel,
                thread: req.thread,
            },
        );

        let mut cmd = Command::new(&self.config.program);
        cmd.arg("--model")
            .arg(model)
            .arg("--dangerously-skip-permissions")
            .arg("-p")
            .arg(req.task)
            .arg("--output-format")
            .arg("json")
            .arg("--append-system-prompt")
            .arg(&system_prompt)
            .arg("--allowedTools")
            .arg(self.config.allowed_tools.join(","));
        if let Some(session) = session {
            cmd.arg("--resume").arg(session);
        }
        cmd.env("OPSBOT_THREAD", req.thread.unwrap_or(""))
            .env("OPSBOT_CHANNEL", req.channel.unwrap_or(""))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::info!(session = ?session, target = ?req.target, "invoking reasoning agent");

        let timeout = Duration::from_secs(self.config.invoke_timeout_secs);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => return Err(InvokeFault::Spawn(error)),
            Err(_) => return Err(InvokeFault::TimedOut(self.config.invoke_timeout_secs)),
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::warn!(stderr = %stderr.trim(), "agent stderr");
        }
        if session.is_some() && stderr.contains(STALE_SESSION_MARKER) {
            return Err(InvokeFault::StaleSession);
        }
        if !output.status.success() {
            tracing::warn!(status = %output.status, "agent process exited non-zero");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_stream(&stdout, session, model))
    }

    fn degraded_reply(&self, req: &InvokeRequest<'_>, fault: InvokeFault) -> AgentReply {
        tracing::error!(error = %fault, "agent invocation failed");
        AgentReply {
            text: format!("Error running agent: {fault}"),
            session_id: req.session_id.map(String::from),
            usage: TokenUsage {
                model: self.config.model_tier.model_id().to_string(),
                ..TokenUsage::default()
            },
        }
    }
}

impl AgentInvoker for AgentRunner {
    /// Invoke the agent once, resuming the supplied session when present.
    ///
    /// A session rejected as stale gets exactly one fresh-session retry.
    async fn invoke(&self, req: &InvokeRequest<'_>) -> AgentReply {
        match self.run_once(req, req.session_id).await {
            Ok(reply) => reply,
            Err(InvokeFault::StaleSession) => {
                tracing::info!(session = ?req.session_id, "session is stale, retrying fresh");
                match self.run_once(req, None).await {
                    Ok(reply) => reply,
                    Err(fault) => self.degraded_reply(req, fault),
                }
            }
            Err(fault) => self.degraded_reply(req, fault),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StreamLine {
    #[serde(rename = "type")]
    kind: Option<String>,
    result: Option<String>,
    session_id: Option<String>,
    usage: Option<UsageBlock>,
    #[serde(rename = "modelUsage")]
    model_usage: Option<HashMap<String, ModelUsageBlock>>,
    #[serde(rename = "total_cost_usd")]
    total_cost_usd: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageBlock {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
    #[serde(default)]
    cache_creation_input_tokens: i64,
    #[serde(default)]
    cache_read_input_tokens: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ModelUsageBlock {
    #[serde(default, rename = "inputTokens")]
    input_tokens: i64,
    #[serde(default, rename = "outputTokens")]
    output_tokens: i64,
    #[serde(default, rename = "cacheCreationInputTokens")]
    cache_creation_input_tokens: i64,
    #[serde(default, rename = "cacheReadInputTokens")]
    cache_read_input_tokens: i64,
}

/// Extract the final text, session token, and usage from the CLI's
/// line-delimited output.
///
/// Only the line tagged `type = "result"` is authoritative for text and
/// usage; a `session_id` may appear on any line. Cache tokens fold into the
/// input count. `modelUsage` is the fallback when the primary usage block
/// is absent or zero. Non-JSON lines degrade to raw text, and no output at
/// all yields a fixed placeholder.
fn parse_stream(output: &str, prior_session: Option<&str>, default_model: &str) -> AgentReply {
    let mut text = String::new();
    let mut session_id = prior_session.map(String::from);
    let mut usage = TokenUsage {
        model: default_model.to_string(),
        ..TokenUsage::default()
    };

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            // Plain text output — keep it as a degraded result.
            text = line.to_string();
            continue;
        };
        if !value.is_object() {
            continue;
        }
        let Ok(parsed) = serde_json::from_value::<StreamLine>(value) else {
            continue;
        };

        if parsed.kind.as_deref() == Some("result") {
            text = parsed.result.unwrap_or_default();
            if let Some(cost) = parsed.total_cost_usd {
                usage.cost = cost;
            }
            if let Some(block) = parsed.usage {
                usage.input_tokens = block.input_tokens
                    + block.cache_creation_input_tokens
                    + block.cache_read_input_tokens;
                usage.output_tokens = block.output_tokens;
            }
            if let Some(model_usage) = parsed.model_usage {
                for (model_id, block) in model_usage {
                    usage.model = model_id;
                    if usage.input_tokens == 0 {
                        usage.input_tokens = block.input_tokens
                            + block.cache_creation_input_tokens
                            + block.cache_read_input_tokens;
                    }
                    if usage.output_tokens == 0 {
                        usage.output_tokens = block.output_tokens;
                    }
                }
            }
        }
        if let Some(session) = parsed.session_id {
            session_id = Some(session);
        }
    }

    if text.is_empty() {
        text = if output.trim().is_empty() {
            NO_RESPONSE_PLACEHOLDER.to_string()
        } else {
            output.trim().to_string()
        };
    }

    AgentReply {
        text,
        session_id,
        usage,
    }
}
