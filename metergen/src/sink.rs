//! Delimited line output.
//!
//! Every record is written as `exchange|routing_key|json` followed by a
//! newline.

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::Path,
};

use serde::Serialize;

/// Separates the fields of a record
pub const DELIMITER: &[u8] = b"|";

/// Errors produced by [`Sink`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO operation failed
    #[error("IO operation failed: {0}")]
    Io(#[from] io::Error),
    /// Record could not be encoded
    #[error("Record could not be encoded: {0}")]
    Json(#[from] serde_json::Error),
}

/// Owner of the output writer. Dropping the sink releases the writer.
#[derive(Debug)]
pub struct Sink<W>
where
    W: Write,
{
    writer: W,
    lines: u64,
}

impl Sink<BufWriter<fs::File>> {
    /// Create `path`, truncating any existing content.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be opened for writing.
    pub fn create(path: &Path) -> Result<Self, Error> {
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W> Sink<W>
where
    W: Write,
{
    /// Create a new instance of [`Sink`] over `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer, lines: 0 }
    }

    /// Append one record line.
    ///
    /// # Errors
    ///
    /// Function will error if `record` cannot be encoded or the write fails.
    pub fn write_record<T>(&mut self, exchange: &str, routing_key: &str, record: &T) -> Result<(), Error>
    where
        T: Serialize + ?Sized,
    {
        // A failed encoding must not leave a partial line.
        let body = serde_json::to_vec(record)?;
        self.writer.write_all(exchange.as_bytes())?;
        self.writer.write_all(DELIMITER)?;
        self.writer.write_all(routing_key.as_bytes())?;
        self.writer.write_all(DELIMITER)?;
        self.writer.write_all(&body)?;
        self.writer.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }

    /// Number of lines written so far
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Flush and hand back the writer.
    ///
    /// # Errors
    ///
    /// Function will error if buffered output cannot be flushed.
    pub fn finish(mut self) -> Result<W, Error> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
