pub mod attachments;
pub mod classifier;
pub mod config;
pub mod context;
pub mod enrichment;
pub mod errors;
pub mod frontmatter;
pub mod models;
pub mod naming;
pub mod processor;
pub mod resolver;
pub mod template;
pub mod transport;
pub mod vault;

use crate::config::{ConfigSnapshot, Settings, StartupMessage};
use crate::errors::{AppError, AppResult};
use crate::models::Envelope;
use crate::processor::{MessageProcessor, Outcome};
use crate::template::TemplateEngine;
use crate::transport::{GroupSummary, SignalRpcClient, Transport};
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const STARTUP_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON logs to a daily rolling file in `log_dir`, or to stderr. `RUST_LOG`
/// overrides `level`.
pub fn init_tracing(log_dir: Option<&Path>, level: &str) -> Result<(), String> {
    let (non_blocking, guard) = match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "signal-vault.log");
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

/// Connects to signal-cli and archives incoming messages until the
/// connection closes.
pub async fn run(settings: Settings) -> AppResult<()> {
    let snapshot = Arc::new(ConfigSnapshot::from_settings(&settings));
    tracing::info!(
        vault = %snapshot.vault_root.to_string_lossy(),
        timezone = %snapshot.timezone,
        patterns = snapshot.link_patterns.len(),
        "starting signal-vault"
    );

    let (client, mut receiver) = SignalRpcClient::connect(&settings.signal_cli_host, settings.signal_cli_port).await?;
    let client = Arc::new(client);
    announce_startup(client.as_ref(), &settings, snapshot.timezone).await;

    let processor = MessageProcessor::new(snapshot, client.clone());
    while let Some(params) = receiver.recv().await {
        handle_notification(&processor, &params).await;
    }

    Err(AppError::Transport("signal-cli connection closed".to_string()))
}

/// Processes one `receive` notification. Failures are logged and end with
/// this message.
pub async fn handle_notification<T: Transport, E: TemplateEngine>(
    processor: &MessageProcessor<T, E>,
    params: &Value,
) -> Option<Outcome> {
    let envelope = match Envelope::from_receive_params(params) {
        Ok(envelope) => envelope,
        Err(error @ AppError::MalformedTimestamp(_)) => {
            tracing::error!(error = %error, "dropping envelope");
            return None;
        }
        Err(error) => {
            tracing::debug!(error = %error, "ignoring non-message envelope");
            return None;
        }
    };

    tracing::debug!(
        group = %envelope.group_title_or_empty(),
        sender = %envelope.source_id.as_deref().unwrap_or_default(),
        timestamp = %envelope.timestamp.to_rfc3339(),
        "received envelope"
    );
    match processor.process(&envelope).await {
        Ok(outcome) => Some(outcome),
        Err(error) => {
            tracing::error!(
                group = %envelope.group_title_or_empty(),
                sender = %envelope.source_id.as_deref().unwrap_or_default(),
                timestamp = %envelope.timestamp.to_rfc3339(),
                error = %error,
                "message not archived"
            );
            None
        }
    }
}

async fn announce_startup(client: &SignalRpcClient, settings: &Settings, timezone: Tz) {
    if let Some(name) = settings.display_name.as_deref().filter(|name| !name.trim().is_empty()) {
        match client.update_profile(name).await {
            Ok(()) => tracing::info!(name = %name, "requested profile name update"),
            Err(error) => tracing::warn!(error = %error, "profile update failed"),
        }
    }

    let groups = match tokio::time::timeout(STARTUP_CALL_TIMEOUT, client.list_groups()).await {
        Ok(Ok(groups)) => groups,
        Ok(Err(error)) => {
            tracing::warn!(error = %error, "failed to list groups");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("timed out listing groups");
            Vec::new()
        }
    };
    for group in &groups {
        let name = group.name.as_deref().unwrap_or_default();
        tracing::info!(group = %name, ignored = settings.ignored_groups.contains(name), "group membership");
    }

    send_startup_message(client, settings, &groups, timezone).await;
}

async fn send_startup_message<T: Transport>(
    transport: &T,
    settings: &Settings,
    groups: &[GroupSummary],
    timezone: Tz,
) -> usize {
    let message = format!(
        "signal-vault v{} started\n{}",
        env!("CARGO_PKG_VERSION"),
        Utc::now().with_timezone(&timezone).format("%Y-%m-%d %H:%M:%S %Z")
    );

    match settings.startup_message {
        StartupMessage::Off => {
            tracing::info!("startup message disabled");
            0
        }
        StartupMessage::OwnNumber => {
            let Some(number) = settings.signal_number.as_deref() else {
                tracing::warn!("no signal_number configured; skipping startup message");
                return 0;
            };
            match transport.send_to_recipient(number, &message).await {
                Ok(()) => 1,
                Err(error) => {
                    tracing::warn!(error = %error, "startup message failed");
                    0
                }
            }
        }
        StartupMessage::All => {
            let mut sent = 0;
            for group in groups {
                let name = group.name.as_deref().unwrap_or_default();
                if settings.ignored_groups.contains(name) {
                    continue;
                }
                match transport.send_group_message(&group.id, &message).await {
                    Ok(()) => sent += 1,
                    Err(error) => tracing::warn!(group = %name, error = %error, "startup message failed"),
                }
            }
            sent
        }
    }
}
