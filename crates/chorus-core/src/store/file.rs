use super::{MessageStore, StoreError};
use crate::message::Message;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// JSON Lines message log, one message per line.
///
/// Each append is written and synced before it returns. Reads take the same
/// lock as appends, so a reader never sees a half-written line.
///
/// A failed append is truncated back out of the file, so the log only ever
/// holds messages that were reported as persisted. If that truncation fails
/// too, the store refuses further appends until it is reopened.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: Mutex<File>,
    poisoned: AtomicBool,
}

impl FileStore {
    /// Open or create the log at `path`.
    ///
    /// A file holding a single JSON array is rewritten as JSON Lines. A
    /// torn trailing line left by a crash is truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or repaired.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        if fs::try_exists(&path).await? {
            repair(&path).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!(path = %path.display(), "Opened message log");

        Ok(Self {
            path,
            file: Mutex::new(file),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Cut the file back to `len` after a failed append.
    async fn rollback(&self, file: &mut File, len: u64) {
        let result = async {
            file.set_len(len).await?;
            file.sync_data().await
        }
        .await;

        match result {
            Ok(()) => warn!(path = %self.path.display(), len, "Rolled back failed append"),
            Err(e) => {
                self.poisoned.store(true, Ordering::SeqCst);
                error!(
                    path = %self.path.display(),
                    error = %e,
                    "Rollback failed, refusing further appends"
                );
            }
        }
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn append(&self, message: &Message) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "{} has an unrecovered partial write",
                self.path.display()
            )));
        }

        let len = file.metadata().await?.len();
        if let Err(e) = write_line(&mut file, &line).await {
            self.rollback(&mut file, len).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Message>, StoreError> {
        let _guard = self.file.lock().await;
        let contents = fs::read_to_string(&self.path).await?;
        parse_lines(&contents)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

async fn write_line(file: &mut File, line: &[u8]) -> io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

/// Parse a JSON Lines log. Blank lines are skipped.
fn parse_lines(contents: &str) -> Result<Vec<Message>, StoreError> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| StoreError::Corrupt {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

/// Bring an existing file into append-ready JSON Lines form.
async fn repair(path: &Path) -> Result<(), StoreError> {
    let contents = fs::read_to_string(path).await?;
    let trimmed = contents.trim_start();

    if trimmed.starts_with('[') {
        let messages: Vec<Message> = serde_json::from_str(trimmed)?;
        let mut out = Vec::new();
        for message in &messages {
            serde_json::to_writer(&mut out, message)?;
            out.push(b'\n');
        }
        fs::write(path, out).await?;
        info!(
            path = %path.display(),
            count = messages.len(),
            "Converted JSON array log to JSON Lines"
        );
        return Ok(());
    }

    if contents.is_empty() || contents.ends_with('\n') {
        return Ok(());
    }

    let tail_start = contents.rfind('\n').map_or(0, |i| i + 1);
    let tail = &contents[tail_start..];
    if serde_json::from_str::<Message>(tail).is_ok() {
        let mut file = OpenOptions::new().append(true).open(path).await?;
        file.write_all(b"\n").await?;
        file.sync_data().await?;
    } else {
        warn!(path = %path.display(), bytes = tail.len(), "Truncating torn trailing record");
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(tail_start as u64).await?;
        file.sync_data().await?;
    }

    Ok(())
}
