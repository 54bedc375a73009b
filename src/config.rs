//! Daemon configuration.
//!
//! Loaded from a TOML file; every section has defaults so a minimal config
//! only needs the platform credentials. Credentials are validated once at
//! startup — an absent credential is the only fatal configuration error.

use crate::error::ConfigError;
use crate::store::RunMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub messaging: MessagingConfig,
    pub agent: AgentConfig,
    pub scan: ScanConfig,
    pub store: StoreConfig,
    pub retention: RetentionConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check mandatory credentials. Called once by the daemon before
    /// anything else is wired up.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.messaging.bot_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential("messaging.bot_token"));
        }
        if self.messaging.app_token.trim().is_empty() {
            return Err(ConfigError::MissingCredential("messaging.app_token"));
        }
        Ok(())
    }
}

/// Messaging platform settings consumed by the core and its adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Bot credential handed to the platform adapter.
    pub bot_token: String,
    /// App-level credential for the event transport.
    pub app_token: String,
    /// Channel that receives scan alerts. Scans are disabled when unset.
    pub alert_channel: Option<String>,
    /// Platform limit on outbound message length, in bytes.
    pub max_message_len: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            app_token: String::new(),
            alert_channel: None,
            max_message_len: 3900,
        }
    }
}

/// Reasoning agent subprocess settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Reasoning CLI binary to spawn.
    pub program: String,
    pub model_tier: ModelTier,
    /// Path to the system prompt template. A built-in fallback preamble is
    /// used when the file is missing or unreadable.
    pub prompt_file: Option<PathBuf>,
    /// Capabilities granted to the reasoning process.
    pub allowed_tools: Vec<String>,
    /// Upper bound on a single subprocess invocation, in seconds.
    pub invoke_timeout_secs: u64,
    /// How long to wait for a human answer to a clarifying question.
    pub answer_timeout_secs: u64,
    /// Cap on clarifying rounds within one conversational turn.
    pub max_question_rounds: usize,
    /// Target label assumed when none is in scope.
    pub default_target: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".into(),
            model_tier: ModelTier::Standard,
            prompt_file: None,
            allowed_tools: vec![
                "Bash(kubectl:*)".into(),
                "Read".into(),
                "Grep".into(),
                "Glob".into(),
                "WebFetch".into(),
            ],
            invoke_timeout_secs: 600,
            answer_timeout_secs: 300,
            max_question_rounds: 5,
            default_target: "default".into(),
        }
    }
}

/// Model tier selection. Maps to a concrete model identifier and a row in
/// the static price table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    #[default]
    Standard,
    Premium,
}

impl ModelTier {
    pub fn model_id(self) -> &'static str {
        match self {
            ModelTier::Standard => "claude-sonnet-4-5-20250929",
            ModelTier::Premium => "claude-opus-4-5-20251101",
        }
    }
}

/// Periodic scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Seconds between scan ticks.
    pub interval_secs: u64,
    /// Delay before the first tick, giving the rest of the daemon time to
    /// finish initializing.
    pub startle_delay_secs: u64,
    /// Targets scanned in order on every tick.
    pub targets: Vec<String>,
    pub mode: RunMode,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            startle_delay_secs: 10,
            targets: Vec::new(),
            mode: RunMode::Autonomous,
        }
    }
}

/// Durable store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("opsbot.db"),
        }
    }
}

/// Session retention sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Seconds between sweeps.
    pub sweep_interval_secs: u64,
    /// Sessions idle longer than this many days are purged.
    pub window_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 86_400,
            window_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = Config::default();
        assert_eq!(config.scan.interval_secs, 300);
        assert_eq!(config.retention.window_days, 7);
        assert_eq!(config.agent.max_question_rounds, 5);
        assert_eq!(config.messaging.max_message_len, 3900);
    }

    #[test]
    fn validate_rejects_missing_credentials() {
        let config = Config::default();
        let error = config.validate().expect_err("empty tokens should fail");
        assert!(error.to_string().contains("bot_token"));

        let mut config = Config::default();
        config.messaging.bot_token = "xoxb-test".into();
        let error = config.validate().expect_err("missing app token should fail");
        assert!(error.to_string().contains("app_token"));

        config.messaging.app_token = "xapp-test".into();
        config.validate().expect("both tokens present");
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [messaging]
            bot_token = "xoxb-1"
            app_token = "xapp-1"
            alert_channel = "C123"

            [scan]
            targets = ["payments", "checkout"]
            mode = "watcher"
            "#,
        )
        .expect("partial config should parse");

        assert_eq!(config.scan.targets, vec!["payments", "checkout"]);
        assert_eq!(config.scan.mode, RunMode::Watcher);
        assert_eq!(config.agent.invoke_timeout_secs, 600);
    }
}
