//! Local terminal mode and size tracking.

use std::time::Duration;

use crossterm::tty::IsTty;
use sshw_core::{WindowCallback, WindowSize};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::SshError;

/// How often the local terminal size is polled.
pub const WINDOW_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub fn stdin_is_tty() -> bool {
    std::io::stdin().is_tty()
}

pub fn enable_raw_mode() -> Result<(), SshError> {
    crossterm::terminal::enable_raw_mode().map_err(|e| SshError::Terminal(e.to_string()))
}

pub fn disable_raw_mode() {
    if let Err(e) = crossterm::terminal::disable_raw_mode() {
        debug!(error = %e, "Failed to restore terminal mode");
    }
}

/// Current size of the controlling terminal, if there is one.
pub fn size() -> Option<WindowSize> {
    crossterm::terminal::size()
        .ok()
        .filter(|(cols, rows)| *cols > 0 && *rows > 0)
        .map(|(cols, rows)| WindowSize::new(cols, rows))
}

/// Polls the local terminal every [`WINDOW_POLL_INTERVAL`] and reports changes.
pub fn spawn_window_watcher(initial: WindowSize, on_change: WindowCallback) -> JoinHandle<()> {
    tokio::spawn(watch_sizes(initial, size, on_change, WINDOW_POLL_INTERVAL))
}

/// Calls `on_change` whenever `measure` returns a size different from the
/// last one seen. Stops when `measure` yields nothing or the callback fails.
pub async fn watch_sizes<P>(
    initial: WindowSize,
    mut measure: P,
    mut on_change: WindowCallback,
    period: Duration,
)
where
    P: FnMut() -> Option<WindowSize> + Send,
{
    let mut last = initial;
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(current) = measure() else {
            debug!("Terminal gone, window watcher stopping");
            return;
        };
        if current == last {
            continue;
        }
        if let Err(e) = on_change(current) {
            debug!(error = %e, "Window change rejected, watcher stopping");
            return;
        }
        last = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use sshw_core::ClientError;

    #[tokio::test(start_paused = true)]
    async fn test_reports_only_changes() {
        let mut sizes: VecDeque<WindowSize> = [
            WindowSize::new(80, 24),
            WindowSize::new(120, 40),
            WindowSize::new(120, 40),
            WindowSize::new(100, 30),
        ]
        .into_iter()
        .collect();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        watch_sizes(
            WindowSize::new(80, 24),
            move || sizes.pop_front(),
            Box::new(move |size| {
                sink.lock().unwrap().push(size);
                Ok(())
            }),
            WINDOW_POLL_INTERVAL,
        )
        .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![WindowSize::new(120, 40), WindowSize::new(100, 30)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_callback_fails() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let mut cols = 80;

        watch_sizes(
            WindowSize::new(80, 24),
            move || {
                cols += 1;
                Some(WindowSize::new(cols, 24))
            },
            Box::new(move |_| {
                *counter.lock().unwrap() += 1;
                Err(ClientError::Session("peer gone".to_string()))
            }),
            WINDOW_POLL_INTERVAL,
        )
        .await;

        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
