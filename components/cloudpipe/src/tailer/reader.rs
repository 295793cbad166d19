// Local crates
use crate::tailer::async_read::{ReadUntil, ReadUntilExt};

// External crates
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::io;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead};

const READ_BUFFER_SIZE: usize = 16384;

/// Lazy, finite sequence of lines read from a child's output stream.
pub type LineReader<R, F> = FramedRead<ReadUntil<R, F>, LineCodec>;

/// Wrap `reader` into a stream of lines. The stream ends at end-of-stream, on
/// the first read error (yielded as `Err`), or once `stop` resolves.
pub fn line_reader<R, F>(reader: R, max_line_bytes: usize, stop: F) -> LineReader<R, F>
where
    R: AsyncRead,
    F: Future<Output = ()>,
{
    FramedRead::with_capacity(
        reader.read_until_future(stop),
        LineCodec::new(max_line_bytes),
        READ_BUFFER_SIZE,
    )
}

/// Splits a byte stream on `\n`.
///
/// - The terminator (`\n` or `\r\n`) is stripped; line bytes are not decoded,
/// so invalid UTF-8 never ends the stream.
/// - A line longer than `max_line_bytes` is emitted as chunks of exactly that
/// size, the remainder following as the next item.
/// - At end-of-stream, buffered bytes become a final line if non-empty.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_bytes: usize,
    // Bytes of the buffer already searched for a terminator.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes: max_line_bytes.max(1),
            next_index: 0,
        }
    }
}

impl LineCodec {
    fn decode_line(&mut self, buf: &mut BytesMut, eof: bool) -> Option<Bytes> {
        let max = self.max_line_bytes;
        // A terminator right after `max` bytes still ends the line, and so
        // does a `\r\n` starting there.
        let mut window = max.saturating_add(1);
        let cr_at_limit = buf.get(max) == Some(&b'\r');
        if cr_at_limit {
            window = window.saturating_add(1);
        }
        let search_end = buf.len().min(window);
        let search_start = self.next_index.min(search_end);

        if let Some(offset) = buf[search_start..search_end]
            .iter()
            .position(|b| *b == b'\n')
        {
            let newline = search_start + offset;
            self.next_index = 0;

            let mut line = buf.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(newline - 1);
            }
            return Some(line.freeze());
        }

        // The byte after a `\r` at the limit decides whether it terminates the line.
        let awaiting_lf = cr_at_limit && buf.len() == max + 1 && !eof;
        if buf.len() > max && !awaiting_lf {
            self.next_index = 0;
            return Some(buf.split_to(max).freeze());
        }

        self.next_index = buf.len();
        None
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        Ok(self.decode_line(buf, false))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        if let Some(line) = self.decode_line(buf, true) {
            return Ok(Some(line));
        }

        self.next_index = 0;
        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(buf.split().freeze()))
        }
    }
}
