use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Terminal progress for long-running startup work (bulk distribution loads)
pub struct ProgressTracker {
    multi: Arc<MultiProgress>,
    bars: Arc<Mutex<Vec<ProgressBar>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            multi: Arc::new(MultiProgress::new()),
            bars: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        self.bars.lock().await.push(pb.clone());
        pb
    }

    pub async fn finish_all(&self) {
        let bars = self.bars.lock().await;
        for bar in bars.iter() {
            bar.finish_and_clear();
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
