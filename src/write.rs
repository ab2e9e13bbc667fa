use alloc::boxed::Box;
use alloc::vec;
use core::fmt;

use embedded_io::{ErrorKind, ErrorType, Read, Write};

use crate::{Close, ResetError, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Errors from the buffered write operations.
///
/// The first error on the path to the inner stream becomes sticky: every
/// following operation returns the same error without touching the stream,
/// until the writer is [reset](BufferedWriter::reset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError<E> {
    /// The inner stream accepted fewer bytes than were flushed to it.
    ShortWrite,
    /// Error from the inner stream, passed through unmodified.
    Io(E),
}

impl<E: fmt::Display> fmt::Display for WriteError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::ShortWrite => write!(f, "stream accepted fewer bytes than were flushed"),
            WriteError::Io(e) => e.fmt(f),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> core::error::Error for WriteError<E> {}

impl<E: embedded_io::Error> embedded_io::Error for WriteError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            WriteError::ShortWrite => ErrorKind::Other,
            WriteError::Io(e) => e.kind(),
        }
    }
}

/// Failure of [`BufferedWriter::read_from`], separating source failures from
/// sink failures.
///
/// Bytes accepted before a sink failure stay buffered and are reported by
/// [`buffered`](BufferedWriter::buffered); nothing is silently dropped.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadFromError<R, W> {
    /// The source stream failed.
    Source(R),
    /// The writer or its inner stream failed.
    Sink(WriteError<W>),
}

/// A buffered writer for a closable stream.
///
/// The BufferedWriter owns its inner stream and batches small writes in an
/// internal buffer. Buffered bytes only reach the stream on an explicit
/// [`flush`](embedded_io::Write::flush), on [`close`](Self::close), or when
/// the buffer runs full; dropping the writer without closing it loses them.
pub struct BufferedWriter<T: Write> {
    inner: T,
    buf: Box<[u8]>,
    pending: usize,
    failed: Option<WriteError<T::Error>>,
}

impl<T: Write> BufferedWriter<T> {
    /// Create a new buffered writer with the default buffer size.
    pub fn new(inner: T) -> Self {
        Self::with_capacity(inner, DEFAULT_BUFFER_SIZE)
    }

    /// Create a new buffered writer with a buffer of at least `size` bytes.
    ///
    /// Degenerate sizes are clamped up to a small minimum capacity.
    pub fn with_capacity(inner: T, size: usize) -> Self {
        let size = usize::max(size, MIN_BUFFER_SIZE);
        Self {
            inner,
            buf: vec![0; size].into_boxed_slice(),
            pending: 0,
            failed: None,
        }
    }

    /// Get the number of bytes pending flush.
    pub fn buffered(&self) -> usize {
        self.pending
    }

    /// Get the remaining free capacity of the internal buffer.
    pub fn available(&self) -> usize {
        self.buf.len() - self.pending
    }

    /// Get the capacity of the internal buffer.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Release and get the inner stream without flushing or closing it.
    pub fn release(self) -> T {
        self.inner
    }

    /// Close the current inner stream and adopt `inner` in its place,
    /// dropping any pending bytes and clearing a sticky error.
    ///
    /// If closing fails, the reset is aborted: the writer stays bound to the
    /// old stream with its pending bytes and sticky error intact, and the
    /// error hands the not-adopted stream back.
    pub fn reset(&mut self, inner: T) -> Result<(), ResetError<T, T::Error>>
    where
        T: Close,
    {
        if let Err(cause) = self.inner.close() {
            return Err(ResetError {
                rejected: inner,
                cause,
            });
        }
        self.inner = inner;
        self.pending = 0;
        self.failed = None;
        Ok(())
    }
}

impl<T: Write> BufferedWriter<T>
where
    T::Error: Clone,
{
    /// Replay the sticky error, if any.
    fn guard(&self) -> Result<(), WriteError<T::Error>> {
        match &self.failed {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Record `error` as sticky and return it.
    fn fail(&mut self, error: WriteError<T::Error>) -> WriteError<T::Error> {
        self.failed = Some(error.clone());
        error
    }

    /// Push all pending bytes to the inner stream with a single write call.
    ///
    /// A partial write keeps the remainder at the front of the buffer, so no
    /// byte is ever flushed twice, and records a sticky `ShortWrite`.
    fn flush_buf(&mut self) -> Result<(), WriteError<T::Error>> {
        if self.pending == 0 {
            return Ok(());
        }
        match self.inner.write(&self.buf[..self.pending]) {
            Ok(n) if n < self.pending => {
                if n > 0 {
                    self.buf.copy_within(n..self.pending, 0);
                }
                self.pending -= n;
                Err(self.fail(WriteError::ShortWrite))
            }
            Ok(_) => {
                self.pending = 0;
                Ok(())
            }
            Err(e) => Err(self.fail(WriteError::Io(e))),
        }
    }

    /// Write a single byte, flushing first if the buffer is full.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), WriteError<T::Error>> {
        self.guard()?;
        if self.available() == 0 {
            self.flush_buf()?;
        }
        self.buf[self.pending] = byte;
        self.pending += 1;
        Ok(())
    }

    /// Write a single character in its shortest UTF-8 encoding, returning the
    /// number of bytes written.
    pub fn write_rune(&mut self, rune: char) -> Result<usize, WriteError<T::Error>> {
        let mut seq = [0; 4];
        let seq = rune.encode_utf8(&mut seq).as_bytes();
        self.write_all(seq)?;
        Ok(seq.len())
    }

    /// Write a string, returning the number of bytes accepted.
    pub fn write_str(&mut self, s: &str) -> Result<usize, WriteError<T::Error>> {
        self.write(s.as_bytes())
    }

    /// Pull from `source` until it is exhausted, flushing as the buffer
    /// fills, and return the number of bytes moved.
    pub fn read_from<R: Read>(
        &mut self,
        source: &mut R,
    ) -> Result<u64, ReadFromError<R::Error, T::Error>> {
        self.guard().map_err(ReadFromError::Sink)?;
        let mut moved = 0;
        loop {
            if self.available() == 0 {
                self.flush_buf().map_err(ReadFromError::Sink)?;
            }
            let n = source
                .read(&mut self.buf[self.pending..])
                .map_err(ReadFromError::Source)?;
            if n == 0 {
                return Ok(moved);
            }
            self.pending += n;
            moved += n as u64;
        }
    }

    /// Flush any pending bytes, then close the inner stream.
    ///
    /// If the flush fails, the stream is still closed so the resource is not
    /// leaked, but the flush error is the one reported.
    pub fn close(mut self) -> Result<(), WriteError<T::Error>>
    where
        T: Close,
    {
        match self.flush() {
            Ok(()) => self.inner.close().map_err(WriteError::Io),
            Err(e) => {
                let _ = self.inner.close();
                Err(e)
            }
        }
    }
}

impl<T: Write> ErrorType for BufferedWriter<T> {
    type Error = WriteError<T::Error>;
}

impl<T: Write> Write for BufferedWriter<T>
where
    T::Error: Clone,
{
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.guard()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let mut accepted = 0;
        let mut rest = buf;
        while rest.len() > self.available() && self.failed.is_none() {
            if self.pending == 0 {
                // Fast path - nothing buffered and the data is larger than
                // the buffer, so hand it straight to the stream
                match self.inner.write(rest) {
                    Ok(n) => {
                        accepted += n;
                        rest = &rest[n..];
                    }
                    Err(e) => {
                        self.fail(WriteError::Io(e));
                    }
                }
            } else {
                let n = usize::min(self.available(), rest.len());
                self.buf[self.pending..self.pending + n].copy_from_slice(&rest[..n]);
                self.pending += n;
                accepted += n;
                rest = &rest[n..];
                // A failure here is picked up by the loop condition; the
                // copied bytes still count as accepted.
                let _ = self.flush_buf();
            }
        }
        if let Some(e) = &self.failed {
            // Report what was accepted; the stored error replays on the next
            // call when nothing was.
            return if accepted > 0 { Ok(accepted) } else { Err(e.clone()) };
        }
        self.buf[self.pending..self.pending + rest.len()].copy_from_slice(rest);
        self.pending += rest.len();
        Ok(accepted + rest.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.guard()?;
        self.flush_buf()?;
        match self.inner.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(WriteError::Io(e))),
        }
    }
}
