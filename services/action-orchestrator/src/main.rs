//! Downstream consumer of a running [`temporal_kernel::Engine`]: listens for
//! pattern matches and timer fires and executes their configured actions.
//! Action evaluation itself (webhook/command/emit/setFact) is external
//! plumbing the core engine does not define; this binary is one such
//! consumer, wired in-process rather than over gRPC.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use temporal_kernel::{Engine, EngineConfig, Match, TimerFired};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionSpec {
    #[serde(rename = "type")]
    action_type: String,
    url: Option<String>,
    command: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Clone)]
struct ActionOrchestrator {
    client: reqwest::Client,
}

impl ActionOrchestrator {
    fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { client }
    }

    async fn execute_webhook(&self, url: &str, correlation_id: &str, payload: serde_json::Value) -> Result<()> {
        let body = serde_json::json!({
            "correlationId": correlation_id,
            "firedAt": chrono::Utc::now(),
            "data": payload,
        });

        info!(%url, %correlation_id, "executing webhook action");
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "temporal-kernel-action-orchestrator/1.0")
            .json(&body)
            .send()
            .await
            .context("failed to send webhook request")?;

        let status = response.status();
        if status.is_success() {
            info!(%url, %status, "webhook succeeded");
        } else {
            let text = response.text().await.unwrap_or_default();
            warn!(%url, %status, body = %text, "webhook failed");
        }
        Ok(())
    }

    /// Command execution is disabled by default; enabling it requires an
    /// explicit opt-in and commands still go through a fixed whitelist plus
    /// a deny-list of shell metacharacters.
    async fn execute_command(&self, command: &str, correlation_id: &str) -> Result<()> {
        if std::env::var("TEMPORAL_KERNEL_ALLOW_COMMANDS").is_err() {
            warn!(%command, "command execution disabled; set TEMPORAL_KERNEL_ALLOW_COMMANDS=true to enable");
            return Err(anyhow::anyhow!("command execution disabled"));
        }

        let forbidden = ["rm ", "sudo ", "curl ", "wget ", ">/", "&", "|", ";"];
        if forbidden.iter().any(|token| command.contains(token)) {
            warn!(%command, "command contains forbidden operations");
            return Err(anyhow::anyhow!("command contains forbidden operations"));
        }

        let allowed_commands = ["echo", "date", "sleep"];
        let parts: Vec<&str> = command.split_whitespace().collect();
        if parts.is_empty() || !allowed_commands.contains(&parts[0]) {
            warn!(%command, "command not in whitelist");
            return Err(anyhow::anyhow!("command not in allowed whitelist"));
        }

        info!(%command, %correlation_id, "executing whitelisted command");
        let output = tokio::process::Command::new(parts[0])
            .args(&parts[1..])
            .env("CORRELATION_ID", correlation_id)
            .output()
            .await
            .context("failed to execute command")?;

        if output.status.success() {
            info!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "command succeeded");
        } else {
            warn!(stderr = %String::from_utf8_lossy(&output.stderr), "command failed");
        }
        Ok(())
    }

    async fn run_action(&self, action: &ActionSpec, correlation_id: &str) {
        let result = match action.action_type.as_str() {
            "webhook" => match &action.url {
                Some(url) => self.execute_webhook(url, correlation_id, action.data.clone()).await,
                None => {
                    warn!(%correlation_id, "webhook action missing url");
                    return;
                }
            },
            "command" => match &action.command {
                Some(command) => self.execute_command(command, correlation_id).await,
                None => {
                    warn!(%correlation_id, "command action missing command");
                    return;
                }
            },
            other => {
                warn!(action_type = %other, "unknown action type");
                return;
            }
        };
        if let Err(error) = result {
            error!(%error, %correlation_id, "action execution failed");
        }
    }

    async fn handle_match(&self, matched: Match) {
        info!(rule_id = %matched.rule_id, instance_id = %matched.instance_id, "pattern matched, running configured actions");
        // Action lookup by rule_id is external plumbing (rule registry,
        // §1 out of scope); demo-configured actions stand in for it here.
        let actions = demo_actions_for(&matched.rule_id);
        for action in &actions {
            self.run_action(action, &matched.instance_id.to_string()).await;
        }
    }

    async fn handle_timer_fired(&self, fired: TimerFired) {
        info!(name = %fired.name, topic = %fired.topic, "timer fired");
        let correlation_id = fired.correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let actions = demo_actions_for(&fired.name);
        for action in &actions {
            self.run_action(action, &correlation_id).await;
        }
    }
}

fn demo_actions_for(_key: &str) -> Vec<ActionSpec> {
    match std::env::var("DEMO_WEBHOOK_URL") {
        Ok(url) => vec![ActionSpec {
            action_type: "webhook".to_string(),
            url: Some(url),
            command: None,
            data: serde_json::json!({}),
        }],
        Err(_) => Vec::new(),
    }
}

async fn run_demo(orchestrator: Arc<ActionOrchestrator>) {
    info!("running in demo mode; simulating engine events");
    let engine = Engine::new(EngineConfig::default());
    let mut matches = engine.subscribe_matches();
    let mut fired = engine.subscribe_timer_fired();

    let config = temporal_kernel::TimerConfig {
        name: "demo-timer".to_string(),
        duration: Some(temporal_kernel::duration::DurationMs(5_000)),
        cron: None,
        on_expire: temporal_kernel::OnExpire {
            topic: "demo.fired".to_string(),
            data: serde_json::json!({"message": "demo timer fired"}),
        },
        repeat: Some(temporal_kernel::RepeatConfig {
            interval: temporal_kernel::duration::DurationMs(5_000),
            max_count: Some(3),
        }),
        max_count: None,
    };
    let _ = engine.timers.set_timer(config, None).await;

    loop {
        tokio::select! {
            Ok(matched) = matches.recv() => orchestrator.handle_match(matched).await,
            Ok(timer_fired) = fired.recv() => orchestrator.handle_timer_fired(timer_fired).await,
            else => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    info!("starting action orchestrator");

    let orchestrator = Arc::new(ActionOrchestrator::new());

    if std::env::var("DEMO_MODE").is_ok() {
        run_demo(orchestrator).await;
    } else {
        info!("production mode requires an in-process Engine handle from the hosting process; idling");
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }

    Ok(())
}
