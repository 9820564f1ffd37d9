use anyhow::Result;

/// Post a desktop notification using whatever the platform offers
pub fn send_system_notification(title: &str, message: &str) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::process::Command;
        Command::new("notify-send")
            .arg(title)
            .arg(message)
            .arg("--urgency=critical")
            .arg("--icon=dialog-warning")
            .output()?;
    }

    #[cfg(target_os = "macos")]
    {
        use std::process::Command;
        let script = format!(
            "display notification \"{}\" with title \"{}\" sound name \"Glass\"",
            escape_applescript(message),
            escape_applescript(title)
        );
        Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .output()?;
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        // No toast support without windows-rs
        tracing::warn!("Notification: {} - {}", title, message);
    }

    Ok(())
}

#[cfg(any(target_os = "macos", test))]
fn escape_applescript(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_applescript_quotes() {
        assert_eq!(escape_applescript(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_applescript(r"a\b"), r"a\\b");
    }
}
