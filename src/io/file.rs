//! Buffered reader/writer over file-backed channels.
//!
//! The store opens the raw file, applies its channel decorator, and hands
//! the resulting channel here. Keeping the channel boxed lets a decorator
//! interpose transparently between the buffer and the file.

use crate::error::{Error, Result};
use crate::io::{DataReader, DataWriter};
use std::io::{BufReader, BufWriter, Read, Write};

/// Buffered [`DataReader`] over a byte channel.
pub struct FileReader {
    reader: BufReader<Box<dyn Read + Send>>,
}

impl FileReader {
    /// Wraps `channel` in a buffered reader.
    pub fn new(channel: Box<dyn Read + Send>) -> Self {
        Self { reader: BufReader::new(channel) }
    }
}

impl DataReader for FileReader {
    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_fully(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_fully(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::corruption("unexpected end of stream"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Buffered [`DataWriter`] over a byte channel.
pub struct FileWriter {
    writer: BufWriter<Box<dyn Write + Send>>,
    bytes_written: u64,
}

impl FileWriter {
    /// Wraps `channel` in a buffered writer.
    pub fn new(channel: Box<dyn Write + Send>) -> Self {
        Self { writer: BufWriter::new(channel), bytes_written: 0 }
    }

    /// Bytes accepted so far, before any channel transformation.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl DataWriter for FileWriter {
    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.writer.write_all(&value.to_le_bytes())?;
        self.bytes_written += 4;
        Ok(())
    }

    fn write_fully(&mut self, buf: &[u8]) -> Result<()> {
        self.writer.write_all(buf)?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}
