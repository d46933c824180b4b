//! Progress bars for running downloads.

use chunkstream_core::{DownloadEvent, DownloadHandle, DownloadStatus};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;

const BAR_SCALE: u64 = 1000;

/// Returns true when bars should be drawn.
pub(crate) fn should_show_bars(stderr_is_terminal: bool, quiet: bool, json: bool) -> bool {
    stderr_is_terminal && !quiet && !json
}

/// Spawns one bar per download, fed from its event stream.
pub(crate) fn spawn_progress_bars(handles: &[DownloadHandle]) -> Vec<JoinHandle<()>> {
    let multi = MultiProgress::new();
    let style = ProgressStyle::with_template("{bar:30} {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());

    handles
        .iter()
        .map(|handle| {
            let bar = multi.add(ProgressBar::new(BAR_SCALE));
            bar.set_style(style.clone());
            bar.set_message(handle.save_path().display().to_string());
            let mut events = handle.take_events();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        DownloadEvent::Progress(report) => {
                            if report.status == DownloadStatus::WaitingForOtherDownload {
                                bar.set_prefix("waiting");
                            }
                            bar.set_position(scaled(report.progress));
                        }
                        DownloadEvent::Finished(report) => {
                            bar.set_position(scaled(report.progress));
                            bar.abandon_with_message(format!("{} {}", report.status, bar.message()));
                            return;
                        }
                    }
                }
                bar.finish_and_clear();
            })
        })
        .collect()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled(progress: f32) -> u64 {
    (f64::from(progress.clamp(0.0, 1.0)) * BAR_SCALE as f64).round() as u64
}
