use indicatif::ProgressBar;
use srtmpack_core::DownloadProgress;

#[derive(Clone)]
pub struct ProgressManager {
    pub tiles_bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(show_progress: bool, total: u64) -> Self {
        let tiles_bar = if show_progress {
            let bar = ProgressBar::new(total);
            bar.set_style(
                indicatif::ProgressStyle::with_template(
                    "[{elapsed_precise}] {bar:60.green/white} {pos:>4}/{len:4} tiles ({eta}) {wide_msg}"
                )
                .unwrap()
                .progress_chars("██")
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        Self { tiles_bar }
    }

    /// Feed one pipeline progress snapshot into the bar.
    pub fn update(&self, progress: &DownloadProgress) {
        self.tiles_bar.set_position(progress.current as u64);
        if progress.bytes_downloaded > 0 {
            self.tiles_bar.set_message(format!(
                "{:.1} MB/s",
                progress.speed_bytes_per_sec / 1_000_000.0
            ));
        }
    }

    pub fn finish(&self) {
        self.tiles_bar.finish_and_clear();
    }
}
