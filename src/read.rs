use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use embedded_io::{BufRead, ErrorType, Read, Write};

use crate::{Close, ResetError, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// Errors from the buffered read operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError<E> {
    /// The inner stream is exhausted.
    Eof,
    /// The operation needs more bytes than the buffer can hold.
    BufferFull,
    /// Error from the inner stream, passed through unmodified.
    Io(E),
}

/// Failure of [`BufferedReader::read_slice`], carrying the bytes that were
/// consumed before the delimiter could be found.
///
/// The views alias the reader's internal buffer and are invalidated by the
/// next operation on it.
#[derive(Debug, PartialEq, Eq)]
pub enum SliceError<'a, E> {
    /// The buffer filled up without a delimiter; holds the full buffer contents.
    BufferFull(&'a [u8]),
    /// The stream ended without a delimiter; holds the remaining buffered bytes.
    Eof(&'a [u8]),
    /// The inner stream failed; holds the bytes buffered up to the failure.
    Io(&'a [u8], E),
}

/// Failure of [`BufferedReader::read_bytes`] or [`BufferedReader::read_string`]:
/// the stream ended or failed before the delimiter was seen.
#[derive(Debug, PartialEq, Eq)]
pub struct IncompleteRead<E> {
    /// The bytes accumulated before the failure. Does not end with the delimiter.
    pub partial: Vec<u8>,
    /// Why the delimiter was never reached.
    pub cause: ReadError<E>,
}

/// Failure of [`BufferedReader::discard`], carrying the number of bytes that
/// were skipped before the stream ran out.
#[derive(Debug, PartialEq, Eq)]
pub struct DiscardError<E> {
    pub discarded: usize,
    pub cause: ReadError<E>,
}

/// Failure of [`BufferedReader::write_to`], separating source failures from
/// sink failures.
///
/// Bytes read but not yet accepted by the sink stay buffered and are
/// reported by [`buffered`](BufferedReader::buffered); nothing is silently
/// dropped.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteToError<R, W> {
    /// The inner stream failed.
    Source(R),
    /// The destination writer failed.
    Sink(W),
}

/// There is no byte or rune eligible to be unread.
#[derive(Debug, PartialEq, Eq)]
pub struct UnreadError;

/// How a delimiter scan over the buffered region ended.
enum ScanOutcome<E> {
    Found,
    BufferFull,
    Eof,
    Io(E),
}

/// A buffered reader for a closable stream.
///
/// The BufferedReader owns its inner stream and pulls large chunks from it
/// into an internal buffer to avoid small reads, exposing byte, line, rune and
/// delimiter oriented operations on top.
pub struct BufferedReader<T> {
    inner: T,
    buf: Box<[u8]>,
    pos: usize,
    filled: usize,
    last_byte: Option<u8>,
    last_rune_size: Option<usize>,
}

impl<T> BufferedReader<T> {
    /// Create a new buffered reader with the default buffer size.
    pub fn new(inner: T) -> Self {
        Self::with_capacity(inner, DEFAULT_BUFFER_SIZE)
    }

    /// Create a new buffered reader with a buffer of at least `size` bytes.
    ///
    /// Degenerate sizes are clamped up to a small minimum capacity.
    pub fn with_capacity(inner: T, size: usize) -> Self {
        let size = usize::max(size, MIN_BUFFER_SIZE);
        Self {
            inner,
            buf: vec![0; size].into_boxed_slice(),
            pos: 0,
            filled: 0,
            last_byte: None,
            last_rune_size: None,
        }
    }

    /// Get the number of bytes that are readily available.
    pub fn buffered(&self) -> usize {
        self.filled - self.pos
    }

    /// Get whether there are any bytes readily available.
    pub fn is_empty(&self) -> bool {
        self.pos == self.filled
    }

    /// Get the capacity of the internal buffer.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Release and get the inner stream without closing it.
    pub fn release(self) -> T {
        self.inner
    }
}

impl<T: Read> BufferedReader<T> {
    /// Slide unread bytes to the front and read once from the inner stream.
    ///
    /// Returns the number of bytes read, 0 meaning end of stream.
    fn fill(&mut self) -> Result<usize, T::Error> {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
        debug_assert!(self.filled < self.buf.len());
        let n = self.inner.read(&mut self.buf[self.filled..])?;
        self.filled += n;
        Ok(n)
    }

    /// Read and return a single byte, refilling the buffer if it is empty.
    pub fn read_byte(&mut self) -> Result<u8, ReadError<T::Error>> {
        if self.is_empty() {
            let n = self.fill().map_err(ReadError::Io)?;
            if n == 0 {
                return Err(ReadError::Eof);
            }
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        self.last_byte = Some(b);
        self.last_rune_size = None;
        Ok(b)
    }

    /// Read a single UTF-8 encoded character, returning it and its width in bytes.
    ///
    /// Bytes that do not form a valid encoding are consumed one at a time,
    /// each yielding [`char::REPLACEMENT_CHARACTER`] with a width of 1. The
    /// reader stops pulling from the stream the moment the buffered prefix
    /// can no longer begin a valid sequence, so a bad byte never makes it
    /// wait for input.
    pub fn read_rune(&mut self) -> Result<(char, usize), ReadError<T::Error>> {
        loop {
            if rune_complete(self.rune_prefix()) {
                break;
            }
            let n = self.fill().map_err(ReadError::Io)?;
            if n == 0 {
                if self.is_empty() {
                    return Err(ReadError::Eof);
                }
                // Sequence truncated by the end of the stream.
                break;
            }
        }

        let (rune, size) = decode_rune(self.rune_prefix());
        self.pos += size;
        self.last_byte = Some(self.buf[self.pos - 1]);
        self.last_rune_size = Some(size);
        Ok((rune, size))
    }

    /// The buffered bytes that can make up the next character.
    fn rune_prefix(&self) -> &[u8] {
        let have = usize::min(self.buffered(), 4);
        &self.buf[self.pos..self.pos + have]
    }

    /// Scan the buffered region for `delim`, refilling between passes.
    ///
    /// All outcomes consume the returned range from the buffer.
    fn scan_slice(&mut self, delim: u8) -> (Range<usize>, ScanOutcome<T::Error>) {
        let mut searched = 0;
        let (range, outcome) = loop {
            // Only bytes not covered by a previous pass need searching.
            let scan = &self.buf[self.pos + searched..self.filled];
            if let Some(i) = scan.iter().position(|&b| b == delim) {
                let end = self.pos + searched + i + 1;
                let range = self.pos..end;
                self.pos = end;
                break (range, ScanOutcome::Found);
            }
            if self.buffered() >= self.buf.len() {
                let range = self.pos..self.filled;
                self.pos = self.filled;
                break (range, ScanOutcome::BufferFull);
            }
            // fill() slides unread bytes to the front, which keeps `searched`
            // valid as an offset from the cursor.
            searched = self.buffered();
            match self.fill() {
                Ok(0) => {
                    let range = self.pos..self.filled;
                    self.pos = self.filled;
                    break (range, ScanOutcome::Eof);
                }
                Ok(_) => {}
                Err(e) => {
                    let range = self.pos..self.filled;
                    self.pos = self.filled;
                    break (range, ScanOutcome::Io(e));
                }
            }
        };
        if range.end > range.start {
            self.last_byte = Some(self.buf[range.end - 1]);
            self.last_rune_size = None;
        }
        (range, outcome)
    }

    /// Read until the first occurrence of `delim`, returning a view spanning
    /// the cursor through the delimiter inclusive.
    ///
    /// The view aliases the internal buffer and is invalidated by the next
    /// operation; use [`read_bytes`](Self::read_bytes) for an owned copy. If
    /// the buffer fills without a delimiter, the error holds exactly the full
    /// buffer contents, all of which have been consumed.
    pub fn read_slice(&mut self, delim: u8) -> Result<&[u8], SliceError<'_, T::Error>> {
        let (range, outcome) = self.scan_slice(delim);
        let bytes = &self.buf[range];
        match outcome {
            ScanOutcome::Found => Ok(bytes),
            ScanOutcome::BufferFull => Err(SliceError::BufferFull(bytes)),
            ScanOutcome::Eof => Err(SliceError::Eof(bytes)),
            ScanOutcome::Io(e) => Err(SliceError::Io(bytes, e)),
        }
    }

    /// Read until the first occurrence of `delim`, returning an owned copy of
    /// the data up to and including the delimiter.
    ///
    /// Fails exactly when the returned data would not end with the delimiter;
    /// the error carries the partial data.
    pub fn read_bytes(&mut self, delim: u8) -> Result<Vec<u8>, IncompleteRead<T::Error>> {
        let mut out = Vec::new();
        loop {
            let (range, outcome) = self.scan_slice(delim);
            out.extend_from_slice(&self.buf[range]);
            match outcome {
                ScanOutcome::Found => return Ok(out),
                ScanOutcome::BufferFull => {}
                ScanOutcome::Eof => {
                    return Err(IncompleteRead {
                        partial: out,
                        cause: ReadError::Eof,
                    })
                }
                ScanOutcome::Io(e) => {
                    return Err(IncompleteRead {
                        partial: out,
                        cause: ReadError::Io(e),
                    })
                }
            }
        }
    }

    /// Like [`read_bytes`](Self::read_bytes), but returns the data as a
    /// string, substituting U+FFFD for any invalid UTF-8.
    pub fn read_string(&mut self, delim: u8) -> Result<String, IncompleteRead<T::Error>> {
        let bytes = self.read_bytes(delim)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read a single line, with the line ending (`\n` or `\r\n`) stripped.
    ///
    /// The boolean is true when the line did not fit in one buffer load;
    /// calling again returns the rest, with false on the final fragment. A
    /// final line without a terminator is returned without error. The view
    /// aliases the internal buffer and is invalidated by the next operation.
    pub fn read_line(&mut self) -> Result<(&[u8], bool), ReadError<T::Error>> {
        let (mut range, outcome) = self.scan_slice(b'\n');
        match outcome {
            ScanOutcome::BufferFull => {
                // A trailing '\r' may be the start of a "\r\n" straddling the
                // buffer boundary; push it back so the ending stays intact.
                if range.end > range.start && self.buf[range.end - 1] == b'\r' {
                    assert!(self.pos > 0);
                    self.pos -= 1;
                    self.last_byte = None;
                    range.end -= 1;
                }
                Ok((&self.buf[range], true))
            }
            ScanOutcome::Found => {
                let mut end = range.end - 1;
                if end > range.start && self.buf[end - 1] == b'\r' {
                    end -= 1;
                }
                Ok((&self.buf[range.start..end], false))
            }
            ScanOutcome::Eof if range.is_empty() => Err(ReadError::Eof),
            ScanOutcome::Io(e) if range.is_empty() => Err(ReadError::Io(e)),
            ScanOutcome::Eof | ScanOutcome::Io(_) => Ok((&self.buf[range], false)),
        }
    }

    /// Return the next `n` bytes without advancing the cursor, reading from
    /// the stream as needed.
    ///
    /// Fails with `BufferFull` when `n` exceeds the buffer capacity and with
    /// `Eof` when the stream ends first; in both cases the cursor and all
    /// buffered bytes are left in place. The view is invalidated by the next
    /// operation.
    pub fn peek(&mut self, n: usize) -> Result<&[u8], ReadError<T::Error>> {
        if n > self.buf.len() {
            return Err(ReadError::BufferFull);
        }
        self.last_byte = None;
        self.last_rune_size = None;
        while self.buffered() < n {
            let read = self.fill().map_err(ReadError::Io)?;
            if read == 0 {
                return Err(ReadError::Eof);
            }
        }
        Ok(&self.buf[self.pos..self.pos + n])
    }

    /// Skip the next `n` bytes, reading from the stream as needed.
    ///
    /// Skipping within the already buffered bytes performs no underlying I/O.
    /// If the stream ends first, the error carries how many bytes were
    /// actually discarded.
    pub fn discard(&mut self, n: usize) -> Result<usize, DiscardError<T::Error>> {
        self.last_byte = None;
        self.last_rune_size = None;
        let mut remain = n;
        while remain > 0 {
            if self.is_empty() {
                match self.fill() {
                    Ok(0) => {
                        return Err(DiscardError {
                            discarded: n - remain,
                            cause: ReadError::Eof,
                        })
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(DiscardError {
                            discarded: n - remain,
                            cause: ReadError::Io(e),
                        })
                    }
                }
            }
            let skip = usize::min(self.buffered(), remain);
            self.pos += skip;
            remain -= skip;
        }
        Ok(n)
    }

    /// Push to `sink` until the inner stream is exhausted, returning the
    /// number of bytes moved.
    ///
    /// Already-buffered bytes go first; the buffer is then refilled and
    /// drained until end of stream. On a sink failure the bytes it did not
    /// accept stay buffered.
    pub fn write_to<W: Write>(
        &mut self,
        sink: &mut W,
    ) -> Result<u64, WriteToError<T::Error, W::Error>> {
        self.last_byte = None;
        self.last_rune_size = None;
        let mut moved = 0;
        loop {
            while !self.is_empty() {
                let n = sink
                    .write(&self.buf[self.pos..self.filled])
                    .map_err(WriteToError::Sink)?;
                self.pos += n;
                moved += n as u64;
            }
            match self.fill() {
                Ok(0) => return Ok(moved),
                Ok(_) => {}
                Err(e) => return Err(WriteToError::Source(e)),
            }
        }
    }

    /// Restore the most recently read byte so the next read observes it again.
    ///
    /// Only one level of unread is supported.
    pub fn unread_byte(&mut self) -> Result<(), UnreadError> {
        let Some(b) = self.last_byte else {
            return Err(UnreadError);
        };
        if self.pos == 0 && self.filled > 0 {
            return Err(UnreadError);
        }
        if self.pos > 0 {
            self.pos -= 1;
        } else {
            self.buf[0] = b;
            self.filled = 1;
        }
        self.last_byte = None;
        self.last_rune_size = None;
        Ok(())
    }

    /// Restore the most recently read rune so the next read observes it again.
    ///
    /// Fails unless the immediately preceding operation was a successful
    /// [`read_rune`](Self::read_rune). Only one level of unread is supported.
    pub fn unread_rune(&mut self) -> Result<(), UnreadError> {
        let Some(size) = self.last_rune_size else {
            return Err(UnreadError);
        };
        if self.pos < size {
            return Err(UnreadError);
        }
        self.pos -= size;
        self.last_byte = None;
        self.last_rune_size = None;
        Ok(())
    }

    /// Close the current inner stream and adopt `inner` in its place with an
    /// empty buffer.
    ///
    /// If closing fails, the reset is aborted: the reader stays bound to the
    /// old stream with its buffered state intact, and the error hands the
    /// not-adopted stream back.
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
        self.pos = 0;
        self.filled = 0;
        self.last_byte = None;
        self.last_rune_size = None;
        Ok(())
    }

    /// Close the inner stream, rendering the reader unusable.
    pub fn close(mut self) -> Result<(), T::Error>
    where
        T: Close,
    {
        self.inner.close()
    }
}

impl<T: ErrorType> ErrorType for BufferedReader<T> {
    type Error = T::Error;
}

impl<T: Read> Read for BufferedReader<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.is_empty() {
            if buf.len() >= self.buf.len() {
                // Fast path - bypass the local buffer
                let n = self.inner.read(buf)?;
                if n > 0 {
                    self.last_byte = Some(buf[n - 1]);
                    self.last_rune_size = None;
                }
                return Ok(n);
            }
            self.pos = 0;
            self.filled = self.inner.read(&mut self.buf)?;
            if self.filled == 0 {
                return Ok(0);
            }
        }

        let len = usize::min(self.buffered(), buf.len());
        buf[..len].copy_from_slice(&self.buf[self.pos..self.pos + len]);
        self.pos += len;
        self.last_byte = Some(self.buf[self.pos - 1]);
        self.last_rune_size = None;
        Ok(len)
    }
}

impl<T: Read> BufRead for BufferedReader<T> {
    fn fill_buf(&mut self) -> Result<&[u8], Self::Error> {
        if self.is_empty() {
            self.pos = 0;
            self.filled = self.inner.read(&mut self.buf)?;
        }
        Ok(&self.buf[self.pos..self.filled])
    }

    fn consume(&mut self, amt: usize) {
        assert!(amt <= self.buffered());
        self.pos += amt;
        self.last_byte = None;
        self.last_rune_size = None;
    }
}

/// Whether the front of `prefix` decodes without seeing more input: either a
/// whole character, or an encoding error no further bytes can repair.
///
/// `Utf8Error::error_len` distinguishes the two failure shapes: `None` is a
/// valid prefix cut short, anything else is invalid as it stands.
fn rune_complete(prefix: &[u8]) -> bool {
    match core::str::from_utf8(prefix) {
        Ok(s) => !s.is_empty(),
        Err(e) => e.valid_up_to() > 0 || e.error_len().is_some(),
    }
}

/// Decode the leading character of `prefix`, substituting U+FFFD with a
/// width of 1 for an invalid or truncated sequence.
fn decode_rune(prefix: &[u8]) -> (char, usize) {
    let valid = match core::str::from_utf8(prefix) {
        Ok(s) => s,
        Err(e) => core::str::from_utf8(&prefix[..e.valid_up_to()]).unwrap_or(""),
    };
    match valid.chars().next() {
        Some(rune) => (rune, rune.len_utf8()),
        None => (char::REPLACEMENT_CHARACTER, 1),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use embedded_io::{BufRead, ErrorKind, ErrorType, Read, Write};

    use super::*;

    #[test]
    fn can_read_to_buffer() {
        let inner = [1, 2, 3, 4, 5, 6, 7, 8];
        let mut buffered = BufferedReader::with_capacity(inner.as_slice(), 16);

        let mut read_buf = [0; 2];
        assert_eq!(2, buffered.read(&mut read_buf).unwrap());
        assert_eq!(2, buffered.pos);
        assert_eq!(8, buffered.filled);
        assert_eq!(&[1, 2], read_buf.as_slice());

        let mut read_buf = [0; 8];
        assert_eq!(6, buffered.read(&mut read_buf).unwrap());
        assert_eq!(8, buffered.pos);
        assert_eq!(&[3, 4, 5, 6, 7, 8], &read_buf[..6]);

        assert_eq!(0, buffered.read(&mut read_buf).unwrap());
    }

    #[test]
    fn bypass_on_large_read_buf() {
        let inner: Vec<u8> = (1..=20).collect();
        let mut buffered = BufferedReader::with_capacity(inner.as_slice(), 16);

        let mut read_buf = [0; 20];
        assert_eq!(20, buffered.read(&mut read_buf).unwrap());
        assert_eq!(0, buffered.buffered());
        assert_eq!(inner.as_slice(), read_buf.as_slice());
    }

    #[test]
    fn read_byte_reconstructs_input_across_chunk_sizes() {
        let data: Vec<u8> = (0..=255).collect();
        for chunk in [1, 3, 7, 64] {
            let mut buffered = BufferedReader::with_capacity(ChunkedRead::new(&data, chunk), 16);
            let mut out = Vec::new();
            loop {
                match buffered.read_byte() {
                    Ok(b) => out.push(b),
                    Err(ReadError::Eof) => break,
                    Err(e) => panic!("unexpected error: {e:?}"),
                }
            }
            assert_eq!(data, out);
        }
    }

    #[test]
    fn can_buf_read() {
        let inner = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let mut buffered = BufferedReader::with_capacity(ChunkedRead::new(&inner, 8), 16);

        assert_eq!(&[1, 2, 3, 4, 5, 6, 7, 8], buffered.fill_buf().unwrap());
        buffered.consume(2);
        assert_eq!(&[3, 4, 5, 6, 7, 8], buffered.fill_buf().unwrap());
        buffered.consume(6);
        assert_eq!(&[9, 10], buffered.fill_buf().unwrap());
        buffered.consume(2);
        assert!(buffered.fill_buf().unwrap().is_empty());
    }

    #[test]
    fn read_line_sequence() {
        let mut buffered = BufferedReader::with_capacity(&b"a\nbb\r\nccc"[..], 16);

        assert_eq!((&b"a"[..], false), buffered.read_line().unwrap());
        assert_eq!((&b"bb"[..], false), buffered.read_line().unwrap());
        assert_eq!((&b"ccc"[..], false), buffered.read_line().unwrap());
        assert_eq!(Err(ReadError::Eof), buffered.read_line());
    }

    #[test]
    fn read_line_long_line_sets_truncated() {
        let mut data = vec![b'x'; 20];
        data.push(b'\n');
        let mut buffered = BufferedReader::with_capacity(data.as_slice(), 16);

        let (line, truncated) = buffered.read_line().unwrap();
        assert_eq!(vec![b'x'; 16], line);
        assert!(truncated);

        let (line, truncated) = buffered.read_line().unwrap();
        assert_eq!(vec![b'x'; 4], line);
        assert!(!truncated);
    }

    #[test]
    fn read_line_carriage_return_straddles_buffer() {
        let mut data = vec![b'a'; 15];
        data.extend_from_slice(b"\r\n");
        let mut buffered = BufferedReader::with_capacity(data.as_slice(), 16);

        let (line, truncated) = buffered.read_line().unwrap();
        assert_eq!(vec![b'a'; 15], line);
        assert!(truncated);

        let (line, truncated) = buffered.read_line().unwrap();
        assert!(line.is_empty());
        assert!(!truncated);

        assert_eq!(Err(ReadError::Eof), buffered.read_line());
    }

    #[test]
    fn read_slice_returns_through_delimiter() {
        let mut buffered = BufferedReader::with_capacity(&b"one,two"[..], 16);

        assert_eq!(&b"one,"[..], buffered.read_slice(b',').unwrap());
        assert_eq!(Err(SliceError::Eof(&b"two"[..])), buffered.read_slice(b','));
    }

    #[test]
    fn read_slice_buffer_full_returns_capacity_bytes() {
        let data = vec![b'z'; 32];
        let mut buffered = BufferedReader::with_capacity(data.as_slice(), 16);

        match buffered.read_slice(b',') {
            Err(SliceError::BufferFull(bytes)) => {
                assert_eq!(vec![b'z'; 16], bytes);
            }
            other => panic!("expected BufferFull, got {other:?}"),
        }
        assert_eq!(0, buffered.buffered());
    }

    #[test]
    fn read_bytes_spans_refills() {
        let mut data = vec![b'm'; 35];
        data.push(b';');
        data.extend_from_slice(b"tail");
        let mut buffered = BufferedReader::with_capacity(data.as_slice(), 16);

        let mut expected = vec![b'm'; 35];
        expected.push(b';');
        assert_eq!(expected, buffered.read_bytes(b';').unwrap());

        let err = buffered.read_bytes(b';').unwrap_err();
        assert_eq!(b"tail".to_vec(), err.partial);
        assert_eq!(ReadError::Eof, err.cause);
    }

    #[test]
    fn read_string_includes_delimiter() {
        let mut buffered = BufferedReader::with_capacity(&b"key=value"[..], 16);

        assert_eq!("key=", buffered.read_string(b'=').unwrap());
    }

    #[test]
    fn peek_does_not_advance() {
        let mut buffered = BufferedReader::with_capacity(&b"abcdef"[..], 16);

        assert_eq!(&b"abc"[..], buffered.peek(3).unwrap());
        assert_eq!(&b"abc"[..], buffered.peek(3).unwrap());
        assert_eq!(b'a', buffered.read_byte().unwrap());
    }

    #[test]
    fn peek_past_capacity_fails() {
        let mut buffered = BufferedReader::with_capacity(&b"abcdef"[..], 16);

        assert_eq!(Err(ReadError::BufferFull), buffered.peek(17));
    }

    #[test]
    fn peek_past_eof_keeps_buffered_bytes() {
        let mut buffered = BufferedReader::with_capacity(&b"abc"[..], 16);

        assert_eq!(Err(ReadError::Eof), buffered.peek(5));
        assert_eq!(3, buffered.buffered());
        assert_eq!(&b"abc"[..], buffered.peek(3).unwrap());
    }

    #[test]
    fn discard_within_buffer_issues_no_reads() {
        let data: Vec<u8> = (0..32).collect();
        let mut buffered = BufferedReader::with_capacity(CountingRead::new(&data), 16);

        assert_eq!(&[0, 1, 2, 3], buffered.peek(4).unwrap());
        assert_eq!(1, buffered.inner.calls);
        assert_eq!(4, buffered.discard(4).unwrap());
        assert_eq!(1, buffered.inner.calls);
        assert_eq!(4, buffered.read_byte().unwrap());
    }

    #[test]
    fn discard_past_eof_reports_count() {
        let mut buffered = BufferedReader::with_capacity(&b"abcde"[..], 16);

        let err = buffered.discard(10).unwrap_err();
        assert_eq!(5, err.discarded);
        assert_eq!(ReadError::Eof, err.cause);
    }

    #[test]
    fn write_to_drains_reader() {
        let data: Vec<u8> = (0..40).collect();
        let mut buffered = BufferedReader::with_capacity(data.as_slice(), 16);
        let mut sink = Vec::new();

        assert_eq!(&[0, 1, 2], buffered.peek(3).unwrap());
        assert_eq!(40, buffered.write_to(&mut sink).unwrap());
        assert_eq!(data, sink);
        assert_eq!(0, buffered.buffered());
        assert_eq!(Err(ReadError::Eof), buffered.read_byte());
    }

    #[test]
    fn write_to_sink_error_keeps_unaccepted_bytes() {
        let mut buffered = BufferedReader::with_capacity(&b"payload"[..], 16);
        let mut sink = RejectWrite;

        assert_eq!(
            WriteToError::Sink(ErrorKind::Other),
            buffered.write_to(&mut sink).unwrap_err()
        );
        assert_eq!(7, buffered.buffered());
        assert_eq!(b'p', buffered.read_byte().unwrap());
    }

    #[test]
    fn read_rune_ascii_and_multibyte() {
        let mut buffered = BufferedReader::with_capacity("aé€🦀".as_bytes(), 16);

        assert_eq!(('a', 1), buffered.read_rune().unwrap());
        assert_eq!(('é', 2), buffered.read_rune().unwrap());
        assert_eq!(('€', 3), buffered.read_rune().unwrap());
        assert_eq!(('🦀', 4), buffered.read_rune().unwrap());
        assert_eq!(Err(ReadError::Eof), buffered.read_rune());
    }

    #[test]
    fn read_rune_invalid_byte_consumes_one() {
        let mut buffered = BufferedReader::with_capacity(&[0xff, b'a'][..], 16);

        assert_eq!(
            (char::REPLACEMENT_CHARACTER, 1),
            buffered.read_rune().unwrap()
        );
        assert_eq!(('a', 1), buffered.read_rune().unwrap());
    }

    #[test]
    fn read_rune_truncated_sequence_at_eof() {
        // Leading byte of a three byte sequence followed by only one continuation.
        let mut buffered = BufferedReader::with_capacity(&[0xe2, 0x82][..], 16);

        assert_eq!(
            (char::REPLACEMENT_CHARACTER, 1),
            buffered.read_rune().unwrap()
        );
        assert_eq!(
            (char::REPLACEMENT_CHARACTER, 1),
            buffered.read_rune().unwrap()
        );
        assert_eq!(Err(ReadError::Eof), buffered.read_rune());
    }

    #[test]
    fn read_rune_sequence_split_across_fills() {
        let mut buffered =
            BufferedReader::with_capacity(ChunkedRead::new("é🦀".as_bytes(), 1), 16);

        assert_eq!(('é', 2), buffered.read_rune().unwrap());
        assert_eq!(('🦀', 4), buffered.read_rune().unwrap());
    }

    #[test]
    fn read_rune_invalid_prefix_reads_no_further() {
        // 0x80 can never follow 0xe0, so the pair is decidable as-is; the
        // reader must not go back to the stream for a third byte.
        let mut buffered = BufferedReader::with_capacity(CountingRead::new(&[0xe0, 0x80]), 16);

        assert_eq!(
            (char::REPLACEMENT_CHARACTER, 1),
            buffered.read_rune().unwrap()
        );
        assert_eq!(1, buffered.inner.calls);
        assert_eq!(
            (char::REPLACEMENT_CHARACTER, 1),
            buffered.read_rune().unwrap()
        );
        assert_eq!(1, buffered.inner.calls);
        assert_eq!(Err(ReadError::Eof), buffered.read_rune());
    }

    #[test]
    fn read_rune_never_valid_lead_consumes_one() {
        // 0xc0 and 0xf5 cannot start any sequence.
        let mut buffered = BufferedReader::with_capacity(CountingRead::new(&[0xc0, 0xf5, b'a']), 16);

        assert_eq!(
            (char::REPLACEMENT_CHARACTER, 1),
            buffered.read_rune().unwrap()
        );
        assert_eq!(
            (char::REPLACEMENT_CHARACTER, 1),
            buffered.read_rune().unwrap()
        );
        assert_eq!(('a', 1), buffered.read_rune().unwrap());
        assert_eq!(1, buffered.inner.calls);
    }

    #[test]
    fn unread_byte_restores_byte() {
        let mut buffered = BufferedReader::with_capacity(&b"xy"[..], 16);

        assert_eq!(b'x', buffered.read_byte().unwrap());
        buffered.unread_byte().unwrap();
        assert_eq!(b'x', buffered.read_byte().unwrap());
        assert_eq!(b'y', buffered.read_byte().unwrap());
    }

    #[test]
    fn unread_byte_twice_fails() {
        let mut buffered = BufferedReader::with_capacity(&b"xy"[..], 16);

        buffered.read_byte().unwrap();
        buffered.unread_byte().unwrap();
        assert_eq!(Err(UnreadError), buffered.unread_byte());
    }

    #[test]
    fn unread_byte_without_read_fails() {
        let mut buffered = BufferedReader::with_capacity(&b"xy"[..], 16);

        assert_eq!(Err(UnreadError), buffered.unread_byte());
    }

    #[test]
    fn unread_rune_restores_rune() {
        let mut buffered = BufferedReader::with_capacity("é!".as_bytes(), 16);

        assert_eq!(('é', 2), buffered.read_rune().unwrap());
        buffered.unread_rune().unwrap();
        assert_eq!(('é', 2), buffered.read_rune().unwrap());
        assert_eq!(('!', 1), buffered.read_rune().unwrap());
    }

    #[test]
    fn unread_rune_after_byte_read_fails() {
        let mut buffered = BufferedReader::with_capacity("é!".as_bytes(), 16);

        buffered.read_rune().unwrap();
        buffered.read_byte().unwrap();
        assert_eq!(Err(UnreadError), buffered.unread_rune());
    }

    #[test]
    fn unread_rune_twice_fails() {
        let mut buffered = BufferedReader::with_capacity("é!".as_bytes(), 16);

        buffered.read_rune().unwrap();
        buffered.unread_rune().unwrap();
        assert_eq!(Err(UnreadError), buffered.unread_rune());
    }

    #[test]
    fn reset_swaps_stream_and_discards_buffer() {
        let closed = Rc::new(Cell::new(0));
        let first = ClosableRead::new(b"first", Rc::clone(&closed));
        let mut buffered = BufferedReader::with_capacity(first, 16);

        assert_eq!(b'f', buffered.read_byte().unwrap());
        let second = ClosableRead::new(b"second", Rc::clone(&closed));
        buffered.reset(second).unwrap();
        assert_eq!(1, closed.get());
        assert_eq!(0, buffered.buffered());
        assert_eq!(b's', buffered.read_byte().unwrap());
    }

    #[test]
    fn reset_aborts_when_close_fails() {
        let closed = Rc::new(Cell::new(0));
        let mut first = ClosableRead::new(b"first", Rc::clone(&closed));
        first.close_errors = 1;
        let mut buffered = BufferedReader::with_capacity(first, 16);

        assert_eq!(&b"fir"[..], buffered.peek(3).unwrap());
        let second = ClosableRead::new(b"second", Rc::clone(&closed));
        let err = buffered.reset(second).unwrap_err();
        assert_eq!(ErrorKind::Other, err.cause);
        assert_eq!(0, closed.get());

        // Still bound to the old stream, buffered bytes intact.
        assert_eq!(5, buffered.buffered());
        assert_eq!(b'f', buffered.read_byte().unwrap());

        // A second attempt succeeds once the old stream closes cleanly.
        buffered.reset(err.rejected).unwrap();
        assert_eq!(1, closed.get());
        assert_eq!(b's', buffered.read_byte().unwrap());
    }

    #[test]
    fn close_closes_stream() {
        let closed = Rc::new(Cell::new(0));
        let buffered =
            BufferedReader::with_capacity(ClosableRead::new(b"data", Rc::clone(&closed)), 16);

        buffered.close().unwrap();
        assert_eq!(1, closed.get());
    }

    #[test]
    fn degenerate_size_is_clamped() {
        let buffered = BufferedReader::with_capacity(&b""[..], 0);

        assert_eq!(16, buffered.size());
    }

    /// Serves at most `chunk` bytes per read call.
    struct ChunkedRead<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl<'a> ChunkedRead<'a> {
        fn new(data: &'a [u8], chunk: usize) -> Self {
            Self { data, chunk }
        }
    }

    impl ErrorType for ChunkedRead<'_> {
        type Error = core::convert::Infallible;
    }

    impl Read for ChunkedRead<'_> {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = self.data.len().min(self.chunk).min(buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    /// Counts how many read calls reach the inner stream.
    struct CountingRead<'a> {
        data: &'a [u8],
        calls: usize,
    }

    impl<'a> CountingRead<'a> {
        fn new(data: &'a [u8]) -> Self {
            Self { data, calls: 0 }
        }
    }

    impl ErrorType for CountingRead<'_> {
        type Error = core::convert::Infallible;
    }

    impl Read for CountingRead<'_> {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            self.calls += 1;
            let n = usize::min(self.data.len(), buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    /// A sink that refuses every write.
    struct RejectWrite;

    impl ErrorType for RejectWrite {
        type Error = ErrorKind;
    }

    impl Write for RejectWrite {
        fn write(&mut self, _buf: &[u8]) -> Result<usize, Self::Error> {
            Err(ErrorKind::Other)
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// A readable stream with a scripted close operation.
    #[derive(Debug)]
    struct ClosableRead {
        data: &'static [u8],
        close_errors: usize,
        closed: Rc<Cell<usize>>,
    }

    impl ClosableRead {
        fn new(data: &'static [u8], closed: Rc<Cell<usize>>) -> Self {
            Self {
                data,
                close_errors: 0,
                closed,
            }
        }
    }

    impl ErrorType for ClosableRead {
        type Error = ErrorKind;
    }

    impl Read for ClosableRead {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let n = usize::min(self.data.len(), buf.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    impl Close for ClosableRead {
        fn close(&mut self) -> Result<(), Self::Error> {
            if self.close_errors > 0 {
                self.close_errors -= 1;
                return Err(ErrorKind::Other);
            }
            self.closed.set(self.closed.get() + 1);
            Ok(())
        }
    }
}
