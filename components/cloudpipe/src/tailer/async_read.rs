use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf, Result as IoResult};

/// Abstracts "why reading stops" into a future. Once `until` resolves, the
/// wrapped reader reports end-of-stream on every following read, so whatever
/// consumes it winds down exactly as if the child had closed the pipe.
///
/// The tailers use it to stop reading a child's output stream after a
/// cancellation, when a grandchild may still hold the write end open.
pub trait ReadUntilExt: AsyncRead {
    fn read_until_future<F>(self, until: F) -> ReadUntil<Self, F>
    where
        Self: Sized,
        F: Future<Output = ()>,
    {
        ReadUntil {
            reader: self,
            until,
            stopped: false,
        }
    }
}

impl<S> ReadUntilExt for S where S: AsyncRead {}

#[pin_project]
#[derive(Debug)]
pub struct ReadUntil<S, F> {
    #[pin]
    reader: S,
    #[pin]
    until: F,
    stopped: bool,
}

impl<S, F> ReadUntil<S, F> {
    /// Whether the stop future has resolved.
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl<S, F> AsyncRead for ReadUntil<S, F>
where
    S: AsyncRead,
    F: Future<Output = ()>,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<IoResult<()>> {
        let this = self.project();

        // A completed future must not be polled again.
        if *this.stopped {
            return Poll::Ready(Ok(()));
        }

        match this.until.poll(cx) {
            Poll::Ready(()) => {
                *this.stopped = true;
                Poll::Ready(Ok(()))
            }
            Poll::Pending => this.reader.poll_read(cx, buf),
        }
    }
}
