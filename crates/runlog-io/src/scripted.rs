use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Test reader that drains one buffer at a time, reporting end-of-input
/// after each buffer runs dry and then moving on to the next. This simulates
/// reading a file that keeps growing between wake-ups.
pub(crate) struct ScriptedReader {
    chunks: VecDeque<Vec<u8>>,
    offset: usize,
}

impl ScriptedReader {
    pub(crate) fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        ScriptedReader {
            chunks: chunks.into_iter().collect(),
            offset: 0,
        }
    }

    /// Splits `bytes` into chunks of `n` bytes; the last chunk may be
    /// shorter.
    pub(crate) fn chunked(bytes: &[u8], n: usize) -> Self {
        Self::new(bytes.chunks(n).map(<[u8]>::to_vec))
    }
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(front) = this.chunks.front() else {
            return Poll::Ready(Ok(())); // persistent end-of-input
        };
        let rest = &front[this.offset..];
        if rest.is_empty() {
            // One end-of-input report per exhausted chunk.
            this.chunks.pop_front();
            this.offset = 0;
            return Poll::Ready(Ok(()));
        }
        let n = rest.len().min(buf.remaining());
        buf.put_slice(&rest[..n]);
        this.offset += n;
        Poll::Ready(Ok(()))
    }
}
