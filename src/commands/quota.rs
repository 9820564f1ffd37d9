use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;

use quota_guard::config::{EXAMPLE_CONFIG, get_config_path};
use quota_guard::platform::common::ensure_directory_exists;
use quota_guard::quota::evaluator::{is_over_limit, remaining_accesses, remaining_minutes};
use quota_guard::quota::{BlockChange, CountingMode, QuotaEngine, Rule};

use super::utils::{format_limit, format_until, format_usage};

/// Write the example configuration file
pub fn init(output: Option<PathBuf>, force: bool) -> Result<()> {
    let output_path = match output {
        Some(path) => path,
        None => get_config_path()?,
    };

    if output_path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            output_path.display()
        );
    }

    if let Some(parent) = output_path.parent() {
        ensure_directory_exists(parent)?;
    }

    std::fs::write(&output_path, EXAMPLE_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", output_path.display()))?;

    println!("✓ Created configuration file: {}", output_path.display());
    println!("\nAdd a limit for an app:");
    println!("  quota-guard rule set com.example.game --minutes 60");
    println!("\nThen feed foreground events to the daemon:");
    println!("  <watcher> | quota-guard run");

    Ok(())
}

pub fn rule_set(engine: &QuotaEngine, package: &str, rule: Rule) -> Result<()> {
    let change = engine.set_rule(package, rule.clone())?;

    println!("✓ Rule saved for {}", package);
    print_rule(&rule);

    match change {
        BlockChange::Blocked(_) => println!("  Already over today's limit: blocked until midnight"),
        BlockChange::Unblocked => println!("  No longer over today's limit: unblocked"),
        BlockChange::Unchanged => {}
    }

    Ok(())
}

pub async fn rule_delete(engine: &QuotaEngine, package: &str) -> Result<()> {
    if engine.report()?.app(package).is_none() {
        anyhow::bail!("No rule for {}", package);
    }

    engine.delete_package(package).await?;
    println!("✓ Stopped tracking {}", package);
    Ok(())
}

pub fn rule_list(engine: &QuotaEngine) -> Result<()> {
    let mut apps = engine.report()?.apps;
    if apps.is_empty() {
        println!("No rules configured");
        return Ok(());
    }

    apps.sort_by(|a, b| a.package.cmp(&b.package));
    for app in &apps {
        println!("{}:", app.package);
        print_rule(&app.rule);
    }

    Ok(())
}

fn print_rule(rule: &Rule) {
    println!("  Mode: {}", rule.counting_mode);
    println!("  Minutes limit: {}", format_limit(rule.minutes_limit));
    println!("  Entries limit: {}", format_limit(rule.access_limit));
    if let Some(minutes) = rule.allowance_minutes {
        println!("  Allowance: {} minutes", minutes);
    }
    if !rule.notifications_enabled {
        println!("  Notifications: off");
    }
}

/// Show today's usage
pub fn status(engine: &QuotaEngine, json: bool) -> Result<()> {
    let report = engine.report()?;
    let now = Utc::now();

    if json {
        let output =
            serde_json::to_string_pretty(&report).context("Failed to serialize usage report")?;
        println!("{}", output);
        return Ok(());
    }

    println!("\n=== Usage for {} ===\n", report.day);

    if report.apps.is_empty() {
        println!("No apps tracked. Add one with: quota-guard rule set <package> --minutes N");
        return Ok(());
    }

    println!(
        "Total: {} minutes, {} entries, {} blocked\n",
        report.totals.minutes, report.totals.accesses, report.totals.blocked
    );

    for app in &report.apps {
        let counter = &app.counter;
        println!("  {} ({}):", app.package, app.rule.counting_mode);
        println!(
            "    Minutes: {}{}",
            format_usage(counter.minutes_used, app.rule.minutes_limit),
            remaining_minutes(&app.rule, counter)
                .map(|left| format!(" ({} left)", left))
                .unwrap_or_default()
        );
        println!(
            "    Entries: {}{}",
            format_usage(counter.accesses_used, app.rule.access_limit),
            remaining_accesses(&app.rule, counter)
                .map(|left| format!(" ({} left)", left))
                .unwrap_or_default()
        );

        if let Some(until) = counter.blocked_until_at().filter(|until| *until > now) {
            println!("    Status: 🔒 BLOCKED until {}", format_until(until, now));
        } else if app.over_limit {
            println!("    Status: 🔒 OVER LIMIT");
        } else if app.allowance_active {
            let until = counter.allowance_until_at().unwrap_or(now);
            println!("    Status: ⏳ Allowance until {}", format_until(until, now));
        } else if app.rule.counting_mode == CountingMode::Allowance {
            println!("    Status: 🔒 No active allowance");
        } else {
            println!("    Status: ✓ Allowed");
        }
        println!();
    }

    Ok(())
}

pub fn allowance_start(engine: &QuotaEngine, package: &str, minutes: Option<u32>) -> Result<()> {
    let until = engine.start_allowance(package, minutes)?;
    println!("✓ Allowance for {} open until {}", package, format_until(until, Utc::now()));
    Ok(())
}

pub fn allowance_clear(engine: &QuotaEngine, package: &str) -> Result<()> {
    engine.clear_allowance(package)?;
    println!("✓ Allowance closed for {}", package);
    Ok(())
}

pub fn unblock(engine: &QuotaEngine, package: &str) -> Result<()> {
    engine.clear_block(package)?;
    println!("✓ Unblocked {} for now", package);

    let rule = engine.rule(package)?;
    let counter = engine.today(package)?;
    if is_over_limit(&rule, &counter) {
        println!("  Still over today's limit; it will block again on next use.");
        println!("  Use `quota-guard reset-today {}` to start the day over.", package);
    }

    Ok(())
}

pub fn reset_today(engine: &QuotaEngine, package: &str) -> Result<()> {
    engine.reset_today(package)?;
    println!("✓ Reset today's usage of {}", package);
    Ok(())
}
