//! Append-only local file for events the channel could not take.
//!
//! One line per event: `[<channel>] <event as compact JSON>`. The file is
//! for humans debugging an outage, not for replay.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// File sink used by the [`Publisher`](crate::publisher::Publisher) as a last resort.
#[derive(Debug)]
pub struct FallbackSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FallbackSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line for `event`, creating the file when absent.
    pub async fn append(&self, channel: &str, event: &Value) -> std::io::Result<()> {
        let line = format_line(channel, event);

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

/// Compact JSON escapes control characters, so the line never splits.
fn format_line(channel: &str, event: &Value) -> String {
    let channel = channel.replace(['\n', '\r'], " ");
    format!("[{channel}] {event}\n")
}
