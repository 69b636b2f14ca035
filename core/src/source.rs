//! The pluggable producer of outbound bytes: either the PTY master or a
//! tailed external log file.

use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::error::BridgeError;
use crate::error::Result;

/// Bytes per tail read.
const TAIL_READ_SLICE: usize = 64 * 1024;
/// Default pause between tail polls.
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One read from the source.
#[derive(Debug, PartialEq, Eq)]
pub enum SourceRead {
    Data(Vec<u8>),
    /// Nothing new this poll (file variant only).
    Empty,
    /// The PTY master reached end of stream: the child exited.
    Eof,
}

/// Tagged source of output bytes. The router is the only consumer.
pub enum OutputSource {
    Pty { output: mpsc::Receiver<Vec<u8>> },
    File(FileTailer),
}

impl OutputSource {
    pub fn pty(output: mpsc::Receiver<Vec<u8>>) -> Self {
        Self::Pty { output }
    }

    pub fn file(path: PathBuf) -> Self {
        Self::File(FileTailer::new(path, TAIL_POLL_INTERVAL))
    }

    /// Reads the next batch of bytes, suspending on PTY readiness or for
    /// one tail-poll interval. Never blocks indefinitely on the file
    /// variant; a missing file yields [`SourceRead::Empty`].
    pub async fn read_next(&mut self) -> Result<SourceRead> {
        match self {
            Self::Pty { output } => match output.recv().await {
                Some(bytes) => Ok(SourceRead::Data(bytes)),
                None => Ok(SourceRead::Eof),
            },
            Self::File(tailer) => tailer.read_new().await,
        }
    }
}

/// Tracks appends to an external file. Starts at the end of any
/// pre-existing content, follows truncation back to the start, and
/// re-reads from the start when the inode changes under the path.
pub struct FileTailer {
    path: PathBuf,
    position: u64,
    inode: Option<u64>,
    poll_interval: Duration,
}

impl FileTailer {
    pub fn new(path: PathBuf, poll_interval: Duration) -> Self {
        // Seek past whatever the file already holds; only appends from
        // now on are bridged.
        let (position, inode) = match std::fs::metadata(&path) {
            Ok(md) => (md.len(), Some(md.ino())),
            Err(_) => (0, None),
        };
        Self {
            path,
            position,
            inode,
            poll_interval,
        }
    }

    async fn read_new(&mut self) -> Result<SourceRead> {
        tokio::time::sleep(self.poll_interval).await;

        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(md) => md,
            // Not created yet, or momentarily gone during rotation.
            Err(_) => return Ok(SourceRead::Empty),
        };

        let inode = metadata.ino();
        if self.inode != Some(inode) {
            // Rotated: a new file took the path; read it from the top.
            self.inode = Some(inode);
            self.position = 0;
        } else if metadata.len() < self.position {
            // Truncated in place.
            self.position = 0;
        }

        if metadata.len() == self.position {
            return Ok(SourceRead::Empty);
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(BridgeError::pty_io)?;
        file.seek(SeekFrom::Start(self.position))
            .await
            .map_err(BridgeError::pty_io)?;
        let mut buf = vec![0u8; TAIL_READ_SLICE];
        let n = file.read(&mut buf).await.map_err(BridgeError::pty_io)?;
        if n == 0 {
            return Ok(SourceRead::Empty);
        }
        buf.truncate(n);
        self.position += n as u64;
        Ok(SourceRead::Data(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const FAST_POLL: Duration = Duration::from_millis(5);

    async fn next_data(tailer: &mut FileTailer) -> Vec<u8> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            match tokio::time::timeout_at(deadline, tailer.read_new())
                .await
                .expect("data before deadline")
                .expect("tail read")
            {
                SourceRead::Data(bytes) => return bytes,
                SourceRead::Empty => continue,
                SourceRead::Eof => panic!("file tailer never reports EOF"),
            }
        }
    }

    #[tokio::test]
    async fn existing_content_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("side.log");
        std::fs::write(&path, "old content\n").expect("seed file");

        let mut tailer = FileTailer::new(path.clone(), FAST_POLL);
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        writeln!(file, "fresh line").expect("append");

        assert_eq!(next_data(&mut tailer).await, b"fresh line\n");
    }

    #[tokio::test]
    async fn missing_file_yields_empty_then_appears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("late.log");

        let mut tailer = FileTailer::new(path.clone(), FAST_POLL);
        assert_eq!(tailer.read_new().await.expect("poll"), SourceRead::Empty);

        std::fs::write(&path, "first line\n").expect("create file");
        assert_eq!(next_data(&mut tailer).await, b"first line\n");
    }

    #[tokio::test]
    async fn truncation_restarts_from_the_top() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rotating.log");
        std::fs::write(&path, "aaaa\nbbbb\n").expect("seed file");

        let mut tailer = FileTailer::new(path.clone(), FAST_POLL);
        std::fs::write(&path, "cc\n").expect("truncate and rewrite");

        assert_eq!(next_data(&mut tailer).await, b"cc\n");
    }

    #[tokio::test]
    async fn rotation_is_followed_to_the_new_inode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        std::fs::write(&path, "before rotation with some length\n").expect("seed");

        let mut tailer = FileTailer::new(path.clone(), FAST_POLL);

        let rotated = dir.path().join("app.log.1");
        std::fs::rename(&path, &rotated).expect("rotate away");
        // New file at the old path, longer than the tailer's position is
        // irrelevant: the inode changed, so reading restarts at zero.
        std::fs::write(&path, "after rotation\n").expect("new file");

        assert_eq!(next_data(&mut tailer).await, b"after rotation\n");
    }

    #[tokio::test]
    async fn successive_appends_arrive_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seq.log");
        std::fs::write(&path, "").expect("seed");

        let mut tailer = FileTailer::new(path.clone(), FAST_POLL);
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");

        writeln!(file, "one").expect("append");
        assert_eq!(next_data(&mut tailer).await, b"one\n");
        writeln!(file, "two").expect("append");
        assert_eq!(next_data(&mut tailer).await, b"two\n");
    }
}
