//! Progress bars for verbose download runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use grab_core::Response;
use grab_core::download::{BoxError, Hook};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const REFRESH_INTERVAL: Duration = Duration::from_millis(120);

/// Live progress display fed by a `before_copy` hook.
///
/// Each download registers itself when its body starts streaming; the render
/// task polls the registered responses until [`ProgressUi::finish`] is called.
pub(crate) struct ProgressUi {
    tx: Option<mpsc::UnboundedSender<Response>>,
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

/// Spawns the progress UI when requested. When `use_bars` is false the
/// returned value hands out no hook and `finish` is a no-op.
pub(crate) fn spawn_progress_ui(use_bars: bool) -> ProgressUi {
    let stop = Arc::new(AtomicBool::new(!use_bars));
    if !use_bars {
        return ProgressUi {
            tx: None,
            handle: None,
            stop,
        };
    }
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(render(rx, Arc::clone(&stop)));
    ProgressUi {
        tx: Some(tx),
        handle: Some(handle),
        stop,
    }
}

impl ProgressUi {
    /// Hook that registers a response with the display.
    pub(crate) fn hook(&self) -> Option<Hook> {
        let tx = self.tx.clone()?;
        Some(Arc::new(move |response: &Response| -> Result<(), BoxError> {
            // Display is best effort; a closed renderer never fails a download.
            let _ = tx.send(response.clone());
            Ok(())
        }))
    }

    /// Stops the render task and waits for it to clear its bars.
    pub(crate) async fn finish(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg:30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

async fn render(mut rx: mpsc::UnboundedReceiver<Response>, stop: Arc<AtomicBool>) {
    let multi = MultiProgress::new();
    let mut active: Vec<(Response, ProgressBar)> = Vec::new();

    loop {
        while let Ok(response) = rx.try_recv() {
            let bar = multi.add(ProgressBar::new(response.size()));
            bar.set_style(bar_style());
            let name = response
                .filename()
                .and_then(|p| p.file_name())
                .map_or_else(
                    || response.request().url().to_string(),
                    |n| n.to_string_lossy().into_owned(),
                );
            bar.set_message(name);
            active.push((response, bar));
        }

        active.retain(|(response, bar)| {
            if response.size() > 0 {
                bar.set_length(response.size());
            }
            bar.set_position(response.bytes_complete());
            if response.is_complete() {
                bar.finish_and_clear();
                false
            } else {
                true
            }
        });

        if stop.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(REFRESH_INTERVAL).await;
    }

    for (_, bar) in active {
        bar.finish_and_clear();
    }
    let _ = multi.clear();
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::spawn_progress_ui;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_progress_ui_disabled_has_no_hook() {
        let ui = spawn_progress_ui(false);
        assert!(ui.hook().is_none());
        assert!(ui.handle.is_none());
        assert!(ui.stop.load(Ordering::SeqCst));
        ui.finish().await;
    }

    #[tokio::test]
    async fn test_progress_ui_enabled_stops_on_finish() {
        let ui = spawn_progress_ui(true);
        assert!(ui.hook().is_some());
        assert!(!ui.stop.load(Ordering::SeqCst));
        // Returning at all means the render task observed the stop signal.
        ui.finish().await;
    }
}
