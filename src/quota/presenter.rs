use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::platform::notify::send_system_notification;

/// Presentation collaborator driven by the block gate
///
/// Signals are fire-and-forget and may repeat; implementations must treat a
/// duplicate show or dismiss as a no-op.
pub trait Presenter: Send + Sync {
    fn show_block_overlay(&self, package: &str, reason: &str);

    fn dismiss_block_overlay(&self);

    fn post_limit_reached_notification(&self, package: &str);
}

/// Presenter that only logs
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn show_block_overlay(&self, package: &str, reason: &str) {
        info!("Block overlay for {}: {}", package, reason);
    }

    fn dismiss_block_overlay(&self) {
        debug!("Block overlay dismissed");
    }

    fn post_limit_reached_notification(&self, package: &str) {
        info!("Daily limit reached for {}", package);
    }
}

/// A shown block overlay; dropping it tears the overlay down
#[derive(Debug)]
pub struct OverlayHandle {
    package: String,
    shown_at: DateTime<Utc>,
}

impl OverlayHandle {
    pub fn package(&self) -> &str {
        &self.package
    }
}

impl Drop for OverlayHandle {
    fn drop(&mut self) {
        debug!(
            "Tearing down block overlay for {} (shown {}s)",
            self.package,
            (Utc::now() - self.shown_at).num_seconds()
        );
    }
}

/// Presenter that posts desktop notifications
///
/// Owns at most one overlay handle. Showing a different package replaces
/// the current handle, showing the same package again does nothing.
#[derive(Debug, Default)]
pub struct DesktopPresenter {
    overlay: Mutex<Option<OverlayHandle>>,
}

impl DesktopPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Package whose overlay is currently shown
    pub fn showing(&self) -> Option<String> {
        self.overlay
            .lock()
            .ok()
            .and_then(|overlay| overlay.as_ref().map(|h| h.package().to_string()))
    }

    fn notify(title: &str, message: &str) {
        if let Err(e) = send_system_notification(title, message) {
            warn!("Failed to post notification: {:#}", e);
        }
    }
}

impl Presenter for DesktopPresenter {
    fn show_block_overlay(&self, package: &str, reason: &str) {
        let Ok(mut overlay) = self.overlay.lock() else {
            warn!("Overlay lock poisoned, skipping show for {}", package);
            return;
        };

        if overlay.as_ref().is_some_and(|h| h.package() == package) {
            debug!("Overlay already showing for {}", package);
            return;
        }

        // Old handle goes first
        overlay.take();

        Self::notify("Blocked", &format!("{}\n{}", package, reason));
        *overlay = Some(OverlayHandle {
            package: package.to_string(),
            shown_at: Utc::now(),
        });
        info!("Block overlay shown for {}", package);
    }

    fn dismiss_block_overlay(&self) {
        if let Ok(mut overlay) = self.overlay.lock() {
            overlay.take();
        }
    }

    fn post_limit_reached_notification(&self, package: &str) {
        Self::notify(
            &format!("Blocked: {}", package),
            "Daily limit reached",
        );
    }
}
