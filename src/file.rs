use std::fs::{File, OpenOptions};
use std::io::{self, Read as _, Write as _};
use std::path::Path;

use embedded_io::{ErrorKind, ErrorType, Read, Write};

use crate::{BufferedReader, BufferedWriter, Close};

/// An open file exposed as a closable stream.
///
/// Errors are narrowed to [`ErrorKind`], which is `Copy`, so file-backed
/// writers keep the sticky-error replay. After [`close`](Close::close),
/// reads see end of stream and writes fail with [`ErrorKind::NotConnected`].
pub struct FileStream {
    file: Option<File>,
}

impl FileStream {
    pub fn new(file: File) -> Self {
        Self { file: Some(file) }
    }
}

fn kind(e: io::Error) -> ErrorKind {
    embedded_io::Error::kind(&e)
}

impl ErrorType for FileStream {
    type Error = ErrorKind;
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match &mut self.file {
            Some(file) => file.read(buf).map_err(kind),
            None => Ok(0),
        }
    }
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        match &mut self.file {
            Some(file) => file.write(buf).map_err(kind),
            None => Err(ErrorKind::NotConnected),
        }
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        match &mut self.file {
            Some(file) => file.flush().map_err(kind),
            None => Err(ErrorKind::NotConnected),
        }
    }
}

impl Close for FileStream {
    fn close(&mut self) -> Result<(), Self::Error> {
        // Dropping the handle closes the descriptor; a second close is a no-op.
        self.file.take();
        Ok(())
    }
}

/// Open the named file for reading, buffered with the default size.
///
/// Errors are the unmodified file-open errors.
pub fn open_read<P: AsRef<Path>>(path: P) -> io::Result<BufferedReader<FileStream>> {
    let file = File::open(path)?;
    Ok(BufferedReader::new(FileStream::new(file)))
}

/// Open the named file for reading, buffered with at least `size` bytes.
pub fn open_read_sized<P: AsRef<Path>>(
    path: P,
    size: usize,
) -> io::Result<BufferedReader<FileStream>> {
    let file = File::open(path)?;
    Ok(BufferedReader::with_capacity(FileStream::new(file), size))
}

/// Open the named file for writing with the given options, buffered with the
/// default size.
pub fn open_write<P: AsRef<Path>>(
    path: P,
    options: &OpenOptions,
) -> io::Result<BufferedWriter<FileStream>> {
    let file = options.open(path)?;
    Ok(BufferedWriter::new(FileStream::new(file)))
}

/// Open the named file for writing with the given options, buffered with at
/// least `size` bytes.
pub fn open_write_sized<P: AsRef<Path>>(
    path: P,
    options: &OpenOptions,
    size: usize,
) -> io::Result<BufferedWriter<FileStream>> {
    let file = options.open(path)?;
    Ok(BufferedWriter::with_capacity(FileStream::new(file), size))
}

/// Create the named file with mode 0666 before umask, truncating it if it
/// already exists, buffered with the default size.
pub fn create_write<P: AsRef<Path>>(path: P) -> io::Result<BufferedWriter<FileStream>> {
    let file = File::create(path)?;
    Ok(BufferedWriter::new(FileStream::new(file)))
}

/// Create the named file with mode 0666 before umask, truncating it if it
/// already exists, buffered with at least `size` bytes.
pub fn create_write_sized<P: AsRef<Path>>(
    path: P,
    size: usize,
) -> io::Result<BufferedWriter<FileStream>> {
    let file = File::create(path)?;
    Ok(BufferedWriter::with_capacity(FileStream::new(file), size))
}
