use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

mod cli;
mod commands;

use cli::{AllowanceCommands, Args, Commands, RuleCommands};
use commands::utils::{init_logging, load_cli_config, open_engine};
use commands::{daemon, quota};
use quota_guard::quota::{LogPresenter, QuotaEngine, Rule};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    match args.command {
        Commands::Init { output, force } => quota::init(output, force),
        Commands::Run => {
            let config = load_cli_config(args.config.as_deref())?;
            tokio::runtime::Runtime::new()?.block_on(daemon::run(config))
        }
        command => {
            let config = load_cli_config(args.config.as_deref())?;
            // One-shot commands only log; blocks are shown by the daemon
            let engine = open_engine(&config, Arc::new(LogPresenter))?;
            run_one_shot(&engine, command)
        }
    }
}

fn run_one_shot(engine: &QuotaEngine, command: Commands) -> Result<()> {
    match command {
        Commands::Rule { command } => match command {
            RuleCommands::Set {
                package,
                minutes,
                accesses,
                mode,
                allowance_minutes,
                no_notifications,
            } => {
                let rule = Rule {
                    minutes_limit: minutes,
                    access_limit: accesses,
                    notifications_enabled: !no_notifications,
                    counting_mode: mode,
                    allowance_minutes,
                };
                quota::rule_set(engine, &package, rule)
            }
            RuleCommands::Delete { package } => tokio::runtime::Runtime::new()?
                .block_on(quota::rule_delete(engine, &package)),
            RuleCommands::List => quota::rule_list(engine),
        },
        Commands::Status { json } => quota::status(engine, json),
        Commands::Allowance { command } => match command {
            AllowanceCommands::Start { package, minutes } => {
                quota::allowance_start(engine, &package, minutes)
            }
            AllowanceCommands::Clear { package } => quota::allowance_clear(engine, &package),
        },
        Commands::Unblock { package } => quota::unblock(engine, &package),
        Commands::ResetToday { package } => quota::reset_today(engine, &package),
        Commands::Init { .. } | Commands::Run => {
            anyhow::bail!("{:?} is not a one-shot command", command)
        }
    }
}
