//! Asynchronous JSONL tail reader with file rotation detection

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub struct TailReader {
    path: PathBuf,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    /// Bytes of complete lines consumed from the current file
    position: u64,
    /// Tail of a line still being written
    pending: Vec<u8>,
    from_start: bool,
    poll_interval: Duration,
}

impl TailReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            inode: None,
            position: 0,
            pending: Vec::new(),
            from_start: false,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Read existing content on the first open instead of seeking to the end
    pub fn from_start(mut self, from_start: bool) -> Self {
        self.from_start = from_start;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the file and position the cursor (end, unless `from_start`)
    pub async fn start(&mut self) -> std::io::Result<()> {
        let from = if self.from_start {
            SeekFrom::Start(0)
        } else {
            SeekFrom::End(0)
        };
        self.open_at(from).await?;
        log::info!("📖 Started tailing: {}", self.path.display());
        Ok(())
    }

    async fn open_at(&mut self, from: SeekFrom) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;

        #[cfg(unix)]
        {
            self.inode = Some(metadata.ino());
        }
        #[cfg(not(unix))]
        let _ = &metadata;

        let mut reader = BufReader::new(file);
        self.position = reader.seek(from).await?;
        self.pending.clear();
        self.file = Some(reader);
        Ok(())
    }

    /// Read the next non-empty, newline-terminated line, waiting if necessary
    ///
    /// Bytes are returned raw; decoding is left to the caller. A line caught
    /// mid-write is held back until its newline arrives.
    pub async fn read_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            if self.detect_rotation().await? {
                // A rotated file is new content: read it from the top
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                if !self.pending.is_empty() {
                    log::warn!(
                        "⚠️  Dropping {} bytes of unterminated line from rotated file",
                        self.pending.len()
                    );
                }
                self.open_at(SeekFrom::Start(0)).await?;
            }

            let Some(reader) = self.file.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "File not opened",
                ));
            };

            let read = reader.read_until(b'\n', &mut self.pending).await?;
            if read == 0 || self.pending.last() != Some(&b'\n') {
                sleep(self.poll_interval).await;
                continue;
            }

            let line = std::mem::take(&mut self.pending);
            self.position += line.len() as u64;

            let trimmed = line.trim_ascii();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_vec()));
            }
        }
    }

    /// Rotation: inode changed (unix) or file shrank below our position
    async fn detect_rotation(&self) -> std::io::Result<bool> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // Mid-rotation: keep draining the old handle
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };

        #[cfg(unix)]
        {
            if self.inode.map_or(false, |old| old != metadata.ino()) {
                return Ok(true);
            }
        }

        Ok(self.file.is_some() && metadata.len() < self.position + self.pending.len() as u64)
    }
}
