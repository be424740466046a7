//! Command handlers for the RoomSync CLI

use std::time::Duration;

use roomsync_core::{HistoryStatus, Message};
use roomsync_runtime::ChatHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::app::RoomSyncApp;
use crate::cli::Commands;
use crate::error::{CliError, Result};
use crate::terminal::{format_message, ChatTerminal};

const LIVE_FLUSH_POLL: Duration = Duration::from_millis(20);

/// Wait until no frame is queued for the live channel
///
/// Returns `false` when the queue did not drain within `wait`, for example
/// because the live channel never connected.
pub async fn wait_for_live_flush(handle: &ChatHandle, wait: Duration) -> Result<bool> {
    let drained = timeout(wait, async {
        loop {
            if handle.diagnostics().await?.outbox_len == 0 {
                return Ok::<(), CliError>(());
            }
            tokio::time::sleep(LIVE_FLUSH_POLL).await;
        }
    })
    .await;

    match drained {
        Ok(result) => result.map(|()| true),
        Err(_) => Ok(false),
    }
}

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, mut app: RoomSyncApp) -> Result<()> {
        let result = match command {
            Commands::Chat => Self::handle_chat_command(&mut app).await,
            Commands::History { json } => Self::handle_history_command(&mut app, json).await,
            Commands::Send { message } => Self::handle_send_command(&mut app, message).await,
            Commands::Identity { reset } => Self::handle_identity_command(&mut app, reset),
        };
        app.stop().await?;
        result
    }

    /// Handle the chat command
    async fn handle_chat_command(app: &mut RoomSyncApp) -> Result<()> {
        info!(room = %app.room(), "Starting interactive chat mode");
        let handle = app.start()?;
        let terminal = ChatTerminal::new(handle, app.config().cli.prompt.clone());
        terminal.run().await
    }

    /// Handle the history command
    async fn handle_history_command(app: &mut RoomSyncApp, json: bool) -> Result<()> {
        let handle = app.start()?;
        handle.load().await?;

        let mut history = handle.history_updates();
        let status = timeout(
            app.config().cli.wait_timeout(),
            history.wait_for(|status| {
                matches!(status, HistoryStatus::Loaded { .. } | HistoryStatus::Failed { .. })
            }),
        )
        .await
        .map_err(|_| CliError::Timeout("history did not load".to_string()))?
        .map_err(|_| CliError::MessageProcessing("runtime stopped".to_string()))?
        .clone();

        if let HistoryStatus::Failed { reason } = status {
            return Err(CliError::MessageProcessing(format!(
                "History load failed: {}",
                reason
            )));
        }

        let messages = handle.list();
        if json {
            println!("{}", serde_json::to_string_pretty(&messages)?);
        } else {
            for message in &messages {
                println!("{}", format_message(message, app.device_id()));
            }
        }
        Ok(())
    }

    /// Handle the send command
    ///
    /// Returns once the message is persisted and its live frame has left the
    /// queue, so stopping the runtime afterwards does not drop it.
    async fn handle_send_command(app: &mut RoomSyncApp, text: String) -> Result<()> {
        let handle = app.start()?;
        let key = handle
            .compose(text)
            .await?
            .ok_or_else(|| CliError::MessageProcessing("Message is empty".to_string()))?;

        let mut timeline = handle.timeline();
        let settled = timeout(
            app.config().cli.wait_timeout(),
            timeline.wait_for(|messages| {
                messages
                    .iter()
                    .any(|message| message.correlation_key == key && !message.is_pending())
            }),
        )
        .await;

        let outcome: Option<Message> = match settled {
            Ok(Ok(messages)) => messages
                .iter()
                .find(|message| message.correlation_key == key)
                .cloned(),
            Ok(Err(_)) => None,
            Err(_) => {
                warn!(key = %key, "No confirmation before timeout");
                return Err(CliError::Timeout(format!("message {} is still pending", key)));
            }
        };

        match outcome {
            Some(message) if message.is_confirmed() => {
                println!("Message confirmed (key: {})", key);
                if wait_for_live_flush(&handle, app.config().cli.wait_timeout()).await? {
                    debug!(key = %key, "Live frame handed to the channel");
                } else {
                    warn!(key = %key, "Live channel did not take the frame before timeout");
                    println!("(live participants see it after their next history load)");
                }
                Ok(())
            }
            _ => Err(CliError::MessageProcessing(format!(
                "Message {} was not persisted",
                key
            ))),
        }
    }

    /// Handle the identity command
    fn handle_identity_command(app: &mut RoomSyncApp, reset: bool) -> Result<()> {
        if reset {
            app.reset_identity()?;
        }
        println!("{}", app.device_id());
        if !app.identity_persisted() {
            println!("(not persisted; a new id is used next time)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[tokio::test]
    async fn test_live_flush_wait_reports_undrained_queue() {
        // Accepts TCP connections but never answers them
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = silent.local_addr().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut config = AppConfig::default();
        config.identity.data_dir = Some(dir.path().to_path_buf());
        config.sync.endpoints.history_url = format!("http://{}/rooms/{{room}}/messages", addr);
        config.sync.endpoints.persist_url = format!("http://{}/rooms/{{room}}/messages", addr);
        config.sync.endpoints.live_url = format!("ws://{}/rooms/{{room}}/live", addr);

        let mut app = RoomSyncApp::new(config).unwrap();
        let handle = app.start().unwrap();
        assert!(wait_for_live_flush(&handle, Duration::from_millis(500))
            .await
            .unwrap());

        handle.compose("queued").await.unwrap().unwrap();
        assert!(!wait_for_live_flush(&handle, Duration::from_millis(200))
            .await
            .unwrap());

        app.stop().await.unwrap();
    }
}
