use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// sb-shovel - manage large message operations on a given Service Bus
#[derive(Debug, Parser)]
#[command(name = "sb-shovel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "manage large message operations on a given Service Bus")]
pub struct Cli {
    /// Verbose logging for the executed command
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Queue selection shared by every queue command.
#[derive(Debug, Clone, Args)]
pub struct QueueArgs {
    /// Connection string of the service bus resource, or `cfg|NAME` for a
    /// saved connection
    #[arg(short = 'c', long = "connection-string")]
    pub connection: String,

    /// Name of the service bus queue
    #[arg(short, long)]
    pub queue: String,

    /// Target the deadletter subqueue
    #[arg(long)]
    pub dlq: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write every message on a queue to local files
    Pull {
        #[command(flatten)]
        target: QueueArgs,

        /// Number of lines per file
        #[arg(short = 'n', long = "n-lines", default_value_t = 100,
              value_parser = clap::value_parser!(u64).range(1..))]
        n_lines: u64,
    },

    /// Delete messages from a targeted queue
    Delete {
        #[command(flatten)]
        target: QueueArgs,

        /// Process all messages on the queue
        #[arg(long)]
        all: bool,

        /// Pause at every status boundary
        #[arg(long)]
        delay: bool,
    },

    /// Requeue messages from deadletter to the corresponding active queue
    Requeue {
        #[command(flatten)]
        target: QueueArgs,

        /// Process all messages on the queue
        #[arg(long)]
        all: bool,
    },

    /// Send messages to a targeted queue
    Send {
        /// Connection string of the service bus resource, or `cfg|NAME`
        #[arg(short = 'c', long = "connection-string")]
        connection: String,

        /// Name of the service bus queue
        #[arg(short, long)]
        queue: String,

        /// Path to file containing messages to send, one per line
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Selectively delete messages containing a regex pattern
    Tidy {
        #[command(flatten)]
        target: QueueArgs,

        /// Regex pattern to match against message contents
        #[arg(short, long)]
        pattern: String,

        /// Run the command; without it matches are only reported
        #[arg(short = 'x', long)]
        execute: bool,
    },

    /// Manage saved connections
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConfigAction {
    /// Retrieve list of connections
    List,

    /// Add new or edit existing connection string identifiers
    Update { key: String, value: String },

    /// Remove a saved connection string identifier
    #[command(alias = "delete")]
    Remove { key: String },
}

impl Commands {
    /// Connection argument as given on the command line, if the command
    /// talks to a queue.
    pub fn connection(&self) -> Option<&str> {
        match self {
            Commands::Pull { target, .. }
            | Commands::Delete { target, .. }
            | Commands::Requeue { target, .. }
            | Commands::Tidy { target, .. } => Some(&target.connection),
            Commands::Send { connection, .. } => Some(connection),
            Commands::Config { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claims::{assert_err, assert_ok};

    #[test]
    fn test_pull_defaults_to_one_hundred_lines() {
        let cli = assert_ok!(Cli::try_parse_from([
            "sb-shovel", "pull", "-c", "Endpoint=sb://x/", "-q", "orders"
        ]));
        match cli.command {
            Commands::Pull { target, n_lines } => {
                assert_eq!(n_lines, 100);
                assert_eq!(target.queue, "orders");
                assert!(!target.dlq);
            }
            other => panic!("Expected Pull command, got {other:?}"),
        }
    }

    #[test]
    fn test_pull_rejects_zero_lines() {
        assert_err!(Cli::try_parse_from([
            "sb-shovel", "pull", "-c", "x", "-q", "orders", "-n", "0"
        ]));
    }

    #[test]
    fn test_delete_flags() {
        let cli = assert_ok!(Cli::try_parse_from([
            "sb-shovel", "--debug", "delete", "-c", "cfg|prod", "-q", "orders", "--dlq", "--all",
            "--delay"
        ]));
        assert!(cli.debug);
        assert_eq!(cli.command.connection(), Some("cfg|prod"));
        match cli.command {
            Commands::Delete { target, all, delay } => {
                assert!(target.dlq);
                assert!(all);
                assert!(delay);
            }
            other => panic!("Expected Delete command, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_flag_is_global() {
        let cli = assert_ok!(Cli::try_parse_from([
            "sb-shovel", "requeue", "-c", "x", "-q", "orders", "--dlq", "--debug"
        ]));
        assert!(cli.debug);
    }

    #[test]
    fn test_tidy_requires_pattern() {
        assert_err!(Cli::try_parse_from([
            "sb-shovel", "tidy", "-c", "x", "-q", "orders"
        ]));

        let cli = assert_ok!(Cli::try_parse_from([
            "sb-shovel", "tidy", "-c", "x", "-q", "orders", "-p", "timeout", "-x"
        ]));
        assert!(matches!(cli.command, Commands::Tidy { execute: true, .. }));
    }

    #[test]
    fn test_queue_commands_require_connection() {
        assert_err!(Cli::try_parse_from(["sb-shovel", "delete", "-q", "orders"]));
        assert_err!(Cli::try_parse_from(["sb-shovel", "send", "-q", "orders", "-f", "m.txt"]));
    }

    #[test]
    fn test_config_delete_is_an_alias_for_remove() {
        for name in ["remove", "delete"] {
            let cli = assert_ok!(Cli::try_parse_from(["sb-shovel", "config", name, "prod"]));
            match cli.command {
                Commands::Config { action } => assert_eq!(
                    action,
                    ConfigAction::Remove {
                        key: "prod".to_string()
                    }
                ),
                other => panic!("Expected Config command, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_config_subcommands() {
        let cli = assert_ok!(Cli::try_parse_from([
            "sb-shovel", "config", "update", "prod", "Endpoint=sb://x/"
        ]));
        assert_eq!(cli.command.connection(), None);
        match cli.command {
            Commands::Config { action } => assert_eq!(
                action,
                ConfigAction::Update {
                    key: "prod".to_string(),
                    value: "Endpoint=sb://x/".to_string()
                }
            ),
            other => panic!("Expected Config command, got {other:?}"),
        }

        assert_err!(Cli::try_parse_from(["sb-shovel", "config", "remove"]));
    }
}
