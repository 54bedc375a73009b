//! Periodic target scans layered on the conversation machinery.
//!
//! The driver shares the dispatcher's invoke/question loop, the run
//! ledger, and the session registry with the interactive paths, but runs
//! on its own background task: startle delay, then one tick per interval,
//! scanning each configured target in sequence. A fault in one target
//! never blocks the rest.

pub mod health;

use crate::agent::dispatch::{Dispatcher, TurnRequest};
use crate::agent::runner::{self, AgentInvoker};
use crate::error::Result;
use crate::messaging::Messaging;
use crate::store::{RunMode, RunOutcome, RunStatus, RunStore, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Scan driver settings. Built by the daemon only when an alert channel is
/// configured.
#[derive(Debug, Clone)]
pub struct ScanDriverConfig {
    pub interval: Duration,
    pub startle_delay: Duration,
    pub targets: Vec<String>,
    pub mode: RunMode,
    pub alert_channel: String,
}

struct ScanDeps<M, R> {
    dispatcher: Arc<Dispatcher<M, R>>,
    runs: RunStore,
    sessions: SessionStore,
    messaging: Arc<M>,
    config: ScanDriverConfig,
}

/// Background scan driver: `stopped → running → stopped`.
pub struct Scanner<M, R> {
    deps: Arc<ScanDeps<M, R>>,
    task: Option<JoinHandle<()>>,
}

impl<M: Messaging, R: AgentInvoker> Scanner<M, R> {
    pub fn new(
        dispatcher: Arc<Dispatcher<M, R>>,
        runs: RunStore,
        sessions: SessionStore,
        messaging: Arc<M>,
        config: ScanDriverConfig,
    ) -> Self {
        Self {
            deps: Arc::new(ScanDeps {
                dispatcher,
                runs,
                sessions,
                messaging,
                config,
            }),
            task: None,
        }
    }

    /// Spawn the scan loop.
    pub fn start(&mut self) {
        if self.task.is_some() {
            tracing::warn!("scanner already running");
            return;
        }
        let deps = self.deps.clone();
        self.task = Some(tokio::spawn(run_loop(deps)));
        tracing::info!(
            targets = ?self.deps.config.targets,
            interval_secs = self.deps.config.interval.as_secs(),
            mode = self.deps.config.mode.as_str(),
            "scanner started"
        );
    }

    /// Cancel the scan loop and wait for it to wind down. No scan keeps
    /// running unobserved after this returns.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        if let Err(error) = task.await
            && !error.is_cancelled()
        {
            tracing::warn!(%error, "scan task ended abnormally");
        }
        tracing::info!("scanner stopped");
    }

    /// Scan a single target immediately. Used by tests and manual triggers.
    pub async fn run_once(&self, target: &str) -> Result<()> {
        scan_target(&self.deps, target).await
    }
}

async fn run_loop<M: Messaging, R: AgentInvoker>(deps: Arc<ScanDeps<M, R>>) {
    // Let the rest of the daemon finish initializing before the first tick.
    tokio::time::sleep(deps.config.startle_delay).await;

    loop {
        tracing::info!("starting scheduled scans");
        for target in &deps.config.targets {
            if let Err(error) = scan_target(&deps, target).await {
                tracing::error!(%error, target = %target, "target scan failed");
            }
        }
        tracing::info!("scheduled scans complete");

        tokio::time::sleep(deps.config.interval).await;
    }
}

/// Scan one target: create the run record, drive the conversation, and
/// make sure the run always reaches a terminal status.
async fn scan_target<M: Messaging, R: AgentInvoker>(
    deps: &ScanDeps<M, R>,
    target: &str,
) -> Result<()> {
    let run_id = deps.runs.create_run(target, deps.config.mode).await?;
    tracing::info!(run_id, target = %target, "scan run started");

    match scan_conversation(deps, target, run_id).await {
        Ok(()) => Ok(()),
        Err(error) => {
            tracing::error!(%error, run_id, target = %target, "scan failed");
            deps.runs
                .complete_run(run_id, &RunOutcome::failed(error.to_string()))
                .await?;
            Ok(())
        }
    }
}

async fn scan_conversation<M: Messaging, R: AgentInvoker>(
    deps: &ScanDeps<M, R>,
    target: &str,
    run_id: i64,
) -> Result<()> {
    let turn = deps
        .dispatcher
        .run_turn(TurnRequest {
            task: scan_prompt(target),
            session: None,
            channel: &deps.config.alert_channel,
            thread: None,
            target: Some(target),
        })
        .await?;

    if !turn.usage.is_empty() {
        // Prefer the cost the agent reported; derive from the price table
        // when it reported none.
        let cost = if turn.usage.cost > 0.0 {
            turn.usage.cost
        } else {
            runner::estimate_cost(
                &turn.usage.model,
                turn.usage.input_tokens,
                turn.usage.output_tokens,
            )
        };
        deps.runs
            .record_token_usage(
                run_id,
                target,
                &turn.usage.model,
                turn.usage.input_tokens,
                turn.usage.output_tokens,
                cost,
            )
            .await?;
        tracing::info!(
            run_id,
            input_tokens = turn.usage.input_tokens,
            output_tokens = turn.usage.output_tokens,
            cost,
            "recorded scan token usage"
        );
    }

    let has_issues = health::has_issues(&turn.text);
    let outcome = RunOutcome {
        status: if has_issues {
            RunStatus::IssuesFound
        } else {
            RunStatus::Ok
        },
        pod_count: health::extract_pod_count(&turn.text),
        error_count: i64::from(has_issues),
        fix_count: 0,
        report: Some(clip(&turn.text, 5000)),
        log: Some(clip(&turn.text, 10_000)),
    };
    deps.runs.complete_run(run_id, &outcome).await?;

    if has_issues {
        let alert = format!(
            "*Scheduled scan: {target}*\n\n{}\n\n_Reply to this thread for follow-up_",
            turn.text
        );
        let alert_ts = deps
            .messaging
            .post(&deps.config.alert_channel, &alert, None)
            .await?;

        // Key the session by the alert's own thread so a human can reply
        // in-thread for follow-up.
        if let Some(session_id) = &turn.session_id {
            deps.sessions
                .save(&alert_ts, session_id, &deps.config.alert_channel, Some(target))
                .await?;
        }
        tracing::info!(target = %target, thread_id = %alert_ts, "alert posted");
    } else {
        tracing::info!(target = %target, "scan completed, no issues");
    }

    Ok(())
}

/// The health-check task handed to the reasoning agent for one target.
fn scan_prompt(target: &str) -> String {
    format!(
        "Run a health check on namespace '{target}'.\n\n\
         Check for:\n\
         1. Pods in error states (CrashLoopBackOff, Error, ImagePullBackOff)\n\
         2. Pods with high restart counts\n\
         3. Recent errors in pod logs\n\n\
         If you find issues that need human attention or a decision, use \
         [ASK: your question here] to ask.\n\
         If everything is healthy, just confirm briefly.\n\
         If you find critical issues, report them clearly.\n\n\
         At the end, provide a brief summary with counts: how many pods \
         checked, how many had errors.\n"
    )
}

/// Clamp free text to `limit` bytes on a char boundary.
fn clip(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::dispatch::DispatchConfig;
    use crate::agent::pending::PendingQuestions;
    use crate::agent::runner::{AgentReply, InvokeRequest, TokenUsage};
    use crate::messaging::InboundStream;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingMessaging {
        posts: Mutex<Vec<(String, String, Option<String>)>>,
    }

    impl RecordingMessaging {
        fn posts(&self) -> Vec<(String, String, Option<String>)> {
            self.posts.lock().expect("lock").clone()
        }
    }

    impl Messaging for RecordingMessaging {
        fn name(&self) -> &str {
            "recording"
        }

        async fn start(&self) -> crate::Result<InboundStream> {
            Ok(Box::pin(futures::stream::pending()))
        }

        async fn post(
            &self,
            channel: &str,
            text: &str,
            thread: Option<&str>,
        ) -> crate::Result<String> {
            let mut posts = self.posts.lock().expect("lock");
            posts.push((channel.to_string(), text.to_string(), thread.map(String::from)));
            Ok(format!("ts-{}", posts.len()))
        }
    }

    struct ScriptedAgent {
        replies: Mutex<VecDeque<AgentReply>>,
    }

    impl AgentInvoker for ScriptedAgent {
        async fn invoke(&self, _req: &InvokeRequest<'_>) -> AgentReply {
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .expect("script exhausted")
        }
    }

    async fn scanner(
        replies: Vec<AgentReply>,
    ) -> (
        Scanner<RecordingMessaging, ScriptedAgent>,
        Arc<RecordingMessaging>,
        RunStore,
        SessionStore,
    ) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations should apply");

        let sessions = SessionStore::new(pool.clone());
        let runs = RunStore::new(pool.clone());
        let messaging = Arc::new(RecordingMessaging::default());
        let dispatcher = Arc::new(Dispatcher::new(
            sessions.clone(),
            runs.clone(),
            PendingQuestions::default(),
            ScriptedAgent {
                replies: Mutex::new(replies.into()),
            },
            messaging.clone(),
            DispatchConfig {
                max_message_len: 3900,
                answer_timeout: Duration::from_millis(20),
                max_question_rounds: 5,
            },
        ));
        let scanner = Scanner::new(
            dispatcher,
            runs.clone(),
            sessions.clone(),
            messaging.clone(),
            ScanDriverConfig {
                interval: Duration::from_secs(300),
                startle_delay: Duration::from_secs(10),
                targets: vec!["payments".into()],
                mode: RunMode::Watcher,
                alert_channel: "C-ALERTS".into(),
            },
        );
        (scanner, messaging, runs, sessions)
    }

    fn reply(text: &str, session: Option<&str>) -> AgentReply {
        AgentReply {
            text: text.into(),
            session_id: session.map(String::from),
            usage: TokenUsage {
                model: "claude-opus-4-5-20251101".into(),
                input_tokens: 1200,
                output_tokens: 500,
                cost: 0.0,
            },
        }
    }

    #[tokio::test]
    async fn healthy_scan_completes_ok_without_an_alert() {
        let (scanner, messaging, runs, _sessions) =
            scanner(vec![reply("Checked 8 pods, all good.", Some("sess-s1"))]).await;

        scanner.run_once("payments").await.expect("scan should succeed");

        let run = runs.get_run(1).await.expect("get").expect("run exists");
        assert_eq!(run.status, "ok");
        assert_eq!(run.pod_count, 8);
        assert_eq!(run.mode, "watcher");
        assert!(run.ended);

        // No alert for a clean scan.
        assert!(messaging.posts().is_empty());
    }

    #[tokio::test]
    async fn issues_raise_an_alert_and_seed_a_followup_session() {
        let (scanner, messaging, runs, sessions) = scanner(vec![reply(
            "Found 3 pods with CrashLoopBackOff",
            Some("sess-s2"),
        )])
        .await;

        scanner.run_once("payments").await.expect("scan should succeed");

        let run = runs.get_run(1).await.expect("get").expect("run exists");
        assert_eq!(run.status, "issues_found");
        assert_eq!(run.pod_count, 3);
        assert_eq!(run.error_count, 1);

        let posts = messaging.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "C-ALERTS");
        assert!(posts[0].1.contains("Scheduled scan: payments"));

        // The alert's own message id keys the follow-up session.
        assert_eq!(
            sessions.get("ts-1").await.expect("get"),
            Some("sess-s2".into())
        );
    }

    #[tokio::test]
    async fn scan_usage_is_recorded_against_the_run_with_derived_cost() {
        let (scanner, _messaging, runs, _sessions) =
            scanner(vec![reply("nothing to report", None)]).await;

        scanner.run_once("payments").await.expect("scan should succeed");

        let row = sqlx::query(
            "SELECT input_tokens, output_tokens, cost FROM token_usage WHERE run_id = 1",
        )
        .fetch_one(runs.pool())
        .await
        .expect("usage row");
        use sqlx::Row as _;
        assert_eq!(row.try_get::<i64, _>("input_tokens").expect("input"), 1200);
        assert_eq!(row.try_get::<i64, _>("output_tokens").expect("output"), 500);
        // Premium tier: (1200/1e6)*15 + (500/1e6)*75.
        let expected = (1200.0 / 1e6) * 15.0 + (500.0 / 1e6) * 75.0;
        let cost: f64 = row.try_get("cost").expect("cost");
        assert!((cost - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn scan_question_timeout_still_finishes_the_run() {
        let (scanner, messaging, runs, _sessions) = scanner(vec![
            reply("[ASK: Should I delete the stuck pod?]", Some("sess-s3")),
            reply("Left everything untouched. No issues.", Some("sess-s3")),
        ])
        .await;

        scanner.run_once("payments").await.expect("scan should succeed");

        // The question went to the alert channel as a new thread root.
        let posts = messaging.posts();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].1.contains("Should I delete the stuck pod?"));

        let run = runs.get_run(1).await.expect("get").expect("run exists");
        assert_eq!(run.status, "ok");
    }

    #[test]
    fn clip_cuts_on_char_boundaries() {
        assert_eq!(clip("short", 100), "short");
        let clipped = clip("ab→cd", 3);
        assert_eq!(clipped, "ab");
    }
}
