//! Terminal Interface Implementation
//!
//! Line-based chat loop: every stdin line composes a message, lines starting
//! with `/` are commands. App events from the runtime are printed as they
//! arrive.

use roomsync_core::{AppEvent, CorrelationKey, DeliveryState, DeviceId, Message, Timestamp};
use roomsync_runtime::ChatHandle;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::error::Result;

// ----------------------------------------------------------------------------
// Input Parsing
// ----------------------------------------------------------------------------

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    Message(String),
    Retry(CorrelationKey),
    Status,
    History,
    Reconnect,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> InputCommand {
    let line = line.trim();
    if line.is_empty() {
        return InputCommand::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return InputCommand::Message(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("retry"), Some(key)) => InputCommand::Retry(CorrelationKey::new(key)),
        (Some("status"), None) => InputCommand::Status,
        (Some("history"), None) => InputCommand::History,
        (Some("reconnect"), None) => InputCommand::Reconnect,
        (Some("help"), None) => InputCommand::Help,
        (Some("quit") | Some("exit"), None) => InputCommand::Quit,
        _ => InputCommand::Unknown(line.to_string()),
    }
}

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------

/// `HH:MM:SS` (UTC) of a millisecond timestamp
pub fn format_time(timestamp: Timestamp) -> String {
    let secs = timestamp.as_millis() / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        (secs / 3600) % 24,
        (secs / 60) % 60,
        secs % 60
    )
}

/// One timeline line, e.g. `[12:00:01] you: hello (pending)`
pub fn format_message(message: &Message, own_device: &DeviceId) -> String {
    let author = if &message.device_id == own_device {
        "you"
    } else {
        message.device_id.as_str()
    };
    let time = format_time(message.server_time.unwrap_or(message.client_time));
    match message.delivery_state {
        DeliveryState::Confirmed => format!("[{}] {}: {}", time, author, message.text),
        DeliveryState::Pending => format!("[{}] {}: {} (pending)", time, author, message.text),
        DeliveryState::Failed => format!(
            "[{}] {}: {} (failed, /retry {})",
            time, author, message.text, message.correlation_key
        ),
    }
}

const HELP: &str = "\
Type a line to send it. Commands:
  /retry <key>   resend a failed message
  /status        connection, history and store counters
  /history       reload the room history
  /reconnect     restart the live channel after it gave up
  /quit          leave";

// ----------------------------------------------------------------------------
// Chat Loop
// ----------------------------------------------------------------------------

pub struct ChatTerminal {
    handle: ChatHandle,
    prompt: String,
}

impl ChatTerminal {
    pub fn new(handle: ChatHandle, prompt: impl Into<String>) -> Self {
        Self {
            handle,
            prompt: prompt.into(),
        }
    }

    /// Run until `/quit`, end of input or Ctrl+C
    pub async fn run(&self) -> Result<()> {
        let mut events = self.handle.subscribe();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        println!("{}", HELP);
        self.handle.load().await?;
        self.print_prompt();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if !self.handle_line(&line).await? {
                            break;
                        }
                        self.print_prompt();
                    }
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(event) => self.render_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Display fell behind, redrawing timeline");
                        self.print_timeline();
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }

    /// Returns `false` when the user asked to leave
    async fn handle_line(&self, line: &str) -> Result<bool> {
        match parse_input(line) {
            InputCommand::Message(text) => {
                if let Some(key) = self.handle.compose(text).await? {
                    debug!(key = %key, "Message composed");
                }
            }
            InputCommand::Retry(key) => match self.handle.retry_failed(key.clone()).await? {
                Some(new_key) => println!("Resending as {}", new_key),
                None => println!("{} is not a failed message", key),
            },
            InputCommand::Status => {
                let diagnostics = self.handle.diagnostics().await?;
                println!("connection: {}", diagnostics.connection);
                println!("history:    {}", diagnostics.history);
                println!(
                    "messages:   {} ({} queued for the live channel)",
                    diagnostics.store.records, diagnostics.outbox_len
                );
                println!(
                    "duplicates suppressed: {}, regressions blocked: {}",
                    diagnostics.store.duplicates_suppressed, diagnostics.store.regressions_blocked
                );
                if let Some(last) = diagnostics.audit.last() {
                    println!("last transition: {}", last);
                }
            }
            InputCommand::History => self.handle.load().await?,
            InputCommand::Reconnect => self.handle.reconnect().await?,
            InputCommand::Help => println!("{}", HELP),
            InputCommand::Quit => return Ok(false),
            InputCommand::Empty => {}
            InputCommand::Unknown(input) => println!("Unknown command: {} (try /help)", input),
        }
        Ok(true)
    }

    fn render_event(&self, event: AppEvent) {
        match event {
            AppEvent::MessageAdded { message } => {
                println!("{}", format_message(&message, self.handle.device_id()));
            }
            AppEvent::DeliveryChanged { key, state } => match state {
                DeliveryState::Failed => println!("! message {} failed, /retry {}", key, key),
                DeliveryState::Confirmed => debug!(key = %key, "Message confirmed"),
                DeliveryState::Pending => {}
            },
            AppEvent::HistoryLoaded { count } => {
                println!("-- history loaded ({} messages) --", count);
                self.print_timeline();
            }
            AppEvent::HistoryFailed { reason } => {
                println!("! history failed: {} (/history to retry)", reason);
            }
            AppEvent::ConnectionStatusChanged { status } => println!("-- {} --", status),
        }
    }

    fn print_timeline(&self) {
        for message in self.handle.list() {
            println!("{}", format_message(&message, self.handle.device_id()));
        }
    }

    fn print_prompt(&self) {
        use std::io::Write;
        print!("{}", self.prompt);
        let _ = std::io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomsync_core::{Origin, ServerId};

    fn message(device: &str, state: DeliveryState) -> Message {
        Message {
            correlation_key: CorrelationKey::new("k-1"),
            server_id: Some(ServerId::new("9")),
            device_id: DeviceId::new(device),
            text: "hello".to_string(),
            client_time: Timestamp::new(3_661_000),
            server_time: (state == DeliveryState::Confirmed).then(|| Timestamp::new(3_662_000)),
            delivery_state: state,
            origin: Origin::Remote,
        }
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  hi  "), InputCommand::Message("hi".to_string()));
        assert_eq!(parse_input(""), InputCommand::Empty);
        assert_eq!(
            parse_input("/retry abc"),
            InputCommand::Retry(CorrelationKey::new("abc"))
        );
        assert_eq!(parse_input("/status"), InputCommand::Status);
        assert_eq!(parse_input("/exit"), InputCommand::Quit);
        assert_eq!(
            parse_input("/retry"),
            InputCommand::Unknown("/retry".to_string())
        );
        assert_eq!(
            parse_input("/dance now"),
            InputCommand::Unknown("/dance now".to_string())
        );
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Timestamp::new(0)), "00:00:00");
        assert_eq!(format_time(Timestamp::new(3_661_000)), "01:01:01");
        assert_eq!(format_time(Timestamp::new(86_400_000 + 59_000)), "00:00:59");
    }

    #[test]
    fn test_format_message() {
        let me = DeviceId::new("me");

        let confirmed = message("other", DeliveryState::Confirmed);
        assert_eq!(format_message(&confirmed, &me), "[01:01:02] other: hello");

        let pending = message("me", DeliveryState::Pending);
        assert_eq!(format_message(&pending, &me), "[01:01:01] you: hello (pending)");

        let failed = message("me", DeliveryState::Failed);
        assert!(format_message(&failed, &me).ends_with("(failed, /retry k-1)"));
    }
}
