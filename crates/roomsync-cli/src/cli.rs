//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Room to join (overrides the configuration file)
    #[arg(short, long)]
    pub room: Option<String>,

    /// Data directory for the persisted device identity
    #[arg(short, long)]
    pub data_dir: Option<String>,

    /// Use a fixed device id instead of the persisted one
    #[arg(long)]
    pub device_id: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start interactive chat mode
    Chat,
    /// Load the room history, print it and exit
    History {
        /// Print messages as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a single message, wait for the outcome and exit
    Send {
        /// Message content
        message: String,
    },
    /// Print this device's id
    Identity {
        /// Forget the persisted id and create a new one
        #[arg(long)]
        reset: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_overrides() {
        let cli = Cli::parse_from([
            "roomsync",
            "--room",
            "listing-42",
            "--device-id",
            "dev-1",
            "send",
            "is this still available?",
        ]);
        assert_eq!(cli.room.as_deref(), Some("listing-42"));
        assert_eq!(cli.device_id.as_deref(), Some("dev-1"));
        match cli.command {
            Commands::Send { message } => assert_eq!(message, "is this still available?"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_history_json() {
        let cli = Cli::parse_from(["roomsync", "-v", "history", "--json"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::History { json: true }));
    }

    #[test]
    fn test_parse_identity_reset() {
        let cli = Cli::parse_from(["roomsync", "identity", "--reset"]);
        assert!(matches!(cli.command, Commands::Identity { reset: true }));
        let cli = Cli::parse_from(["roomsync", "identity"]);
        assert!(matches!(cli.command, Commands::Identity { reset: false }));
    }
}
