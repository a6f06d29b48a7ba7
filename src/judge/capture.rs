use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

/// Maximum number of characters kept from each output stream
pub const MAX_OUTPUT_CHARS: usize = 100_000;

/// Appended to an output stream that was cut at the limit
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// How long output pipes are drained after the process has ended
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8192;

#[derive(Debug, Default)]
struct Buffer {
    bytes: Vec<u8>,
    overflowed: bool,
}

/// Background reader draining one output pipe of a child process.
///
/// At most `4 * max_chars` bytes are stored (enough for `max_chars` UTF-8
/// characters); the rest of the stream is read and discarded so the child
/// never blocks on a full pipe.
pub struct Capture {
    buffer: Arc<Mutex<Buffer>>,
    task: JoinHandle<()>,
    max_chars: usize,
}

impl Capture {
    pub fn spawn<R>(mut reader: R, max_chars: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Buffer::default()));
        let byte_limit = max_chars.saturating_mul(4);
        let shared = Arc::clone(&buffer);

        let task = tokio::spawn(async move {
            let mut chunk = vec![0u8; READ_CHUNK];
            loop {
                let n = match reader.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        log::warn!("Failed to read child output: {e}");
                        break;
                    }
                };

                let mut buffer = shared.lock();
                let room = byte_limit.saturating_sub(buffer.bytes.len());
                if n > room {
                    buffer.overflowed = true;
                }
                buffer.bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
        });

        Self {
            buffer,
            task,
            max_chars,
        }
    }

    /// Wait up to `grace` for the stream to reach end-of-file and return the
    /// captured text.
    ///
    /// The pipe can outlive the process when a grandchild inherited it; in
    /// that case whatever was read so far is returned.
    pub async fn finish(mut self, grace: Duration) -> String {
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            log::debug!("Output pipe still open after the process ended, capture cut short");
            self.task.abort();
        }

        let buffer = std::mem::take(&mut *self.buffer.lock());
        let text = String::from_utf8_lossy(&buffer.bytes).into_owned();
        cap_text(text, self.max_chars, buffer.overflowed)
    }

    /// Capture without a length limit
    pub fn unbounded<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        Self::spawn(reader, usize::MAX)
    }

    pub fn abort(self) {
        self.task.abort();
    }
}

/// Text of an optional capture; empty when the stream was never piped
pub async fn collect(capture: Option<Capture>) -> String {
    match capture {
        Some(capture) => capture.finish(DRAIN_GRACE).await,
        None => String::new(),
    }
}

/// Cut `text` to its first `max_chars` characters, marking the cut.
pub fn cap_text(mut text: String, max_chars: usize, overflowed: bool) -> String {
    let cut = text.char_indices().nth(max_chars).map(|(idx, _)| idx);
    match cut {
        Some(idx) => {
            text.truncate(idx);
            text.push_str(TRUNCATION_MARKER);
        }
        None if overflowed => text.push_str(TRUNCATION_MARKER),
        None => {}
    }
    text
}
