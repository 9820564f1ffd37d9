use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time;
use tracing::{debug, info, warn};

use quota_guard::config::{PresenterKind, QuotaConfig};
use quota_guard::quota::{DesktopPresenter, ForegroundEvent, LogPresenter, Presenter, QuotaEngine};

use super::utils::open_engine;

const PRUNE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Run the daemon until stdin closes or Ctrl-C
pub async fn run(config: QuotaConfig) -> Result<()> {
    let presenter: Arc<dyn Presenter> = match config.presenter {
        PresenterKind::Log => Arc::new(LogPresenter),
        PresenterKind::Desktop => Arc::new(DesktopPresenter::new()),
    };
    let engine = open_engine(&config, presenter)?;

    info!(
        "quota-guard daemon started (tick every {}s, presenter {:?})",
        config.tick_interval_secs, config.presenter
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    let result = pump_events(&engine, stdin, config.retain_days, shutdown).await;
    engine.shutdown().await;

    let handled = result?;
    info!("quota-guard daemon stopped after {} events", handled);
    Ok(())
}

/// Feed JSON-line events from `reader` into `engine` until EOF or `shutdown`
///
/// Also prunes old usage history once at start and then daily. Returns the
/// number of events handled.
pub async fn pump_events<R>(
    engine: &QuotaEngine,
    reader: R,
    retain_days: u32,
    shutdown: impl Future<Output = ()>,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut prune = time::interval(PRUNE_INTERVAL);
    let mut handled = 0;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read event stream")? else {
                    info!("Event stream closed");
                    break;
                };
                if process_line(engine, &line).await {
                    handled += 1;
                }
            }
            _ = prune.tick() => {
                if let Err(e) = engine.prune_history(retain_days) {
                    warn!("Failed to prune usage history: {:#}", e);
                }
            }
            _ = &mut shutdown => break,
        }
    }

    Ok(handled)
}

/// Handle one input line; malformed lines and store failures are logged and skipped
async fn process_line(engine: &QuotaEngine, line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }

    let event = match ForegroundEvent::parse(line) {
        Ok(event) => event,
        Err(e) => {
            warn!("Skipping malformed event {:?}: {}", line, e);
            return false;
        }
    };

    debug!("Event: {:?}", event);
    match engine.handle_event(event).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to handle event: {:#}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quota_guard::quota::{EngineSettings, MemoryStore, QuotaStore, Rule, SystemClock};

    fn engine() -> (QuotaEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let engine = QuotaEngine::new(
            store.clone(),
            Arc::new(LogPresenter),
            Arc::new(SystemClock),
            EngineSettings::default(),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn test_pump_handles_events_until_eof() {
        let (engine, store) = engine();
        store.set_rule("com.game", Rule::default()).unwrap();

        let input: &[u8] = b"{\"event\":\"screen_on\"}\n\
            \n\
            not json\n\
            {\"event\":\"changed\",\"package\":\"com.game\"}\n";

        let handled = pump_events(&engine, input, 30, std::future::pending())
            .await
            .unwrap();

        assert_eq!(handled, 2);
        assert_eq!(engine.current_package().await.as_deref(), Some("com.game"));
        assert_eq!(engine.today("com.game").unwrap().accesses_used, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_pump_stops_on_shutdown() {
        let (engine, _) = engine();
        let (_writer, reader) = tokio::io::duplex(64);

        let handled = pump_events(&engine, BufReader::new(reader), 30, async {})
            .await
            .unwrap();

        assert_eq!(handled, 0);
    }
}
