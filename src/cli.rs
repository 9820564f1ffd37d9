use clap::{Parser, Subcommand};
use std::path::PathBuf;

use quota_guard::quota::CountingMode;

/// Per-application daily usage quotas
///
/// Counts foreground minutes and entries per app and blocks apps whose
/// daily quota is spent until local midnight.
#[derive(Parser, Debug)]
#[command(name = "quota-guard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (default: per-user config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example configuration file
    Init {
        /// Output path (default: per-user config directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Manage per-app rules
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },
    /// Show today's usage
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage allowance windows
    Allowance {
        #[command(subcommand)]
        command: AllowanceCommands,
    },
    /// Lift today's block for an app
    Unblock {
        package: String,
    },
    /// Zero today's usage of an app
    ResetToday {
        package: String,
    },
    /// Run the daemon, reading foreground events as JSON lines from stdin
    Run,
}

#[derive(Subcommand, Debug)]
pub enum RuleCommands {
    /// Create or replace the rule for an app
    Set {
        package: String,

        /// Daily minutes limit
        #[arg(long)]
        minutes: Option<u32>,

        /// Daily entries limit
        #[arg(long)]
        accesses: Option<u32>,

        /// Counting mode: foreground or allowance
        #[arg(long, default_value_t = CountingMode::Foreground)]
        mode: CountingMode,

        /// Default allowance length in minutes
        #[arg(long)]
        allowance_minutes: Option<u32>,

        /// Don't notify when the limit is reached
        #[arg(long)]
        no_notifications: bool,
    },
    /// Stop tracking an app
    Delete {
        package: String,
    },
    /// List all rules
    List,
}

#[derive(Subcommand, Debug)]
pub enum AllowanceCommands {
    /// Open an allowance window starting now
    Start {
        package: String,

        /// Window length (default: the rule's allowance minutes)
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// Close the allowance window
    Clear {
        package: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_rule_set() {
        let args = Args::parse_from([
            "quota-guard", "rule", "set", "com.game", "--minutes", "30", "--mode", "allowance",
        ]);

        match args.command {
            Commands::Rule {
                command: RuleCommands::Set { package, minutes, accesses, mode, .. },
            } => {
                assert_eq!(package, "com.game");
                assert_eq!(minutes, Some(30));
                assert_eq!(accesses, None);
                assert_eq!(mode, CountingMode::Allowance);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_status_json() {
        let args = Args::parse_from(["quota-guard", "status", "--json"]);
        assert!(matches!(args.command, Commands::Status { json: true }));

        let args = Args::parse_from(["quota-guard", "status"]);
        assert!(matches!(args.command, Commands::Status { json: false }));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Args::try_parse_from(["quota-guard", "rule", "set", "x", "--mode", "weekly"]).is_err());
    }
}
