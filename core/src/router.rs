//! Output routing: source bytes → local mirror + sanitized, debounced
//! chat messages.
//!
//! Per tick the router mirrors the raw bytes verbatim, takes the
//! ANSI-safe prefix from the chunker, strips escape sequences, decodes
//! the rest as lossy UTF-8, and pushes completed lines into the
//! debounced aggregator. Flushed batches leave as single chat messages,
//! mid-trimmed when they exceed the ceiling. Transport failures are
//! logged at debug level and swallowed; the bridge must outlive them.

use std::io::Write;

use tokio::sync::watch;
use tokio::time::Duration;
use tokio::time::Instant;

use crate::ansi::AnsiChunker;
use crate::ansi::strip_ansi;
use crate::debounce::Debouncer;
use crate::source::OutputSource;
use crate::source::SourceRead;
use crate::telegram::MESSAGE_CEILING;
use crate::telegram::MessageSink;
use crate::truncate::truncate_middle;

/// Quiescent interval before a batch is flushed.
pub const DEBOUNCE_INTERVAL: Duration = Duration::from_millis(500);
/// Buffered code points that force a flush ahead of the timer.
pub const MAX_BUFFERED: usize = 64 * 1024;

/// Why the router stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterExit {
    /// The source reported end of stream: the child exited.
    SourceEof,
    /// Cooperative cancellation via the shutdown channel.
    Cancelled,
    /// Unexpected I/O error on the source.
    Fatal,
}

pub struct OutputRouter<S: MessageSink> {
    source: OutputSource,
    sink: S,
    mirror: Option<Box<dyn Write + Send>>,
    shutdown: watch::Receiver<bool>,
    chunker: AnsiChunker,
    debouncer: Debouncer,
    partial_line: String,
    swallow_newline: bool,
}

impl<S: MessageSink> OutputRouter<S> {
    pub fn new(
        source: OutputSource,
        sink: S,
        mirror: Option<Box<dyn Write + Send>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            sink,
            mirror,
            shutdown,
            chunker: AnsiChunker::new(),
            debouncer: Debouncer::new(DEBOUNCE_INTERVAL, MAX_BUFFERED),
            partial_line: String::new(),
            swallow_newline: false,
        }
    }

    /// Runs until source EOF, cancellation, or a fatal source error. A
    /// final best-effort flush happens on every exit path.
    pub async fn run(mut self) -> RouterExit {
        let exit = loop {
            let flush_at = self.debouncer.deadline();
            let idle = Instant::now() + Duration::from_secs(86_400);
            tokio::select! {
                read = self.source.read_next() => match read {
                    Ok(SourceRead::Data(bytes)) => self.handle_bytes(&bytes).await,
                    Ok(SourceRead::Empty) => {}
                    Ok(SourceRead::Eof) => break RouterExit::SourceEof,
                    Err(err) => {
                        tracing::warn!(%err, "output source failed");
                        break RouterExit::Fatal;
                    }
                },
                _ = tokio::time::sleep_until(flush_at.unwrap_or(idle)),
                    if flush_at.is_some() =>
                {
                    self.flush().await;
                }
                _ = self.shutdown.changed() => break RouterExit::Cancelled,
            }
        };
        self.drain().await;
        exit
    }

    async fn handle_bytes(&mut self, bytes: &[u8]) {
        if let Some(mirror) = self.mirror.as_mut() {
            // Verbatim, in read order; sanitization happens downstream.
            let _ = mirror.write_all(bytes);
            let _ = mirror.flush();
        }

        let safe = self.chunker.feed(bytes);
        let stripped = strip_ansi(&safe);
        let text = String::from_utf8_lossy(&stripped).into_owned();
        self.push_text(&text).await;
    }

    /// Splits decoded text on line terminators, retaining the trailing
    /// partial line. `\r\n` counts once; a lone `\r` also terminates, so
    /// progress-style rewrites become separate lines.
    async fn push_text(&mut self, text: &str) {
        for c in text.chars() {
            match c {
                '\r' => {
                    self.complete_line().await;
                    self.swallow_newline = true;
                }
                '\n' => {
                    if !std::mem::take(&mut self.swallow_newline) {
                        self.complete_line().await;
                    }
                }
                _ => {
                    self.swallow_newline = false;
                    self.partial_line.push(c);
                }
            }
        }
    }

    async fn complete_line(&mut self) {
        let line = std::mem::take(&mut self.partial_line);
        if let Some(batch) = self.debouncer.push(line) {
            self.send_batch(batch).await;
        }
    }

    async fn flush(&mut self) {
        let batch = self.debouncer.take_batch();
        self.send_batch(batch).await;
    }

    /// Final flush on the way out: whatever is mid-line or still safe in
    /// the chunker joins the last batch.
    async fn drain(&mut self) {
        let tail = self.chunker.take_tail();
        if !tail.is_empty() {
            let stripped = strip_ansi(&tail);
            let text = String::from_utf8_lossy(&stripped).into_owned();
            self.push_text(&text).await;
        }
        if !self.partial_line.is_empty() {
            self.complete_line().await;
        }
        self.flush().await;
    }

    async fn send_batch(&mut self, batch: Vec<String>) {
        if batch.is_empty() {
            return;
        }
        let message = batch.join("\n");
        let (message, original) = truncate_middle(&message, MESSAGE_CEILING);
        if let Some(original) = original {
            tracing::debug!(original, "batch exceeded message ceiling; trimmed");
        }
        if message.trim().is_empty() {
            return;
        }
        if let Err(err) = self.sink.send(message).await {
            // Dropped messages are acceptable; a dead bridge is not.
            tracing::debug!(%err, "chat send failed; dropping batch");
        }
    }
}
