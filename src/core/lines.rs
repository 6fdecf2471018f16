//! Purpose: Forward-only line sources backing each stream cursor.
//! Exports: `LineSource`, `BufLines`.
//! Role: Hide the byte source (zip entry, plain file, memory) behind one pull API.
//! Invariants: Lines are yielded without their terminator; invalid UTF-8 is decoded lossily.
//! Invariants: No rewind; a source is read once and dropped.
use std::io::{self, BufRead};

use bstr::ByteSlice;

use crate::core::error::{Error, ErrorKind};

pub trait LineSource {
    /// Next line, or `None` once the source is exhausted.
    fn next_line(&mut self) -> Result<Option<String>, Error>;
}

impl<S: LineSource + ?Sized> LineSource for Box<S> {
    fn next_line(&mut self) -> Result<Option<String>, Error> {
        (**self).next_line()
    }
}

pub struct BufLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> BufLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
        }
    }
}

impl<R: BufRead> LineSource for BufLines<R> {
    fn next_line(&mut self) -> Result<Option<String>, Error> {
        self.buf.clear();
        let read = self.reader.read_until(b'\n', &mut self.buf).map_err(|err| {
            let kind = match err.kind() {
                io::ErrorKind::InvalidData => ErrorKind::Corrupt,
                _ => ErrorKind::Io,
            };
            Error::new(kind)
                .with_message("failed to read line")
                .with_source(err)
        })?;
        if read == 0 {
            return Ok(None);
        }
        let line = self.buf.trim_end_with(|ch| ch == '\n' || ch == '\r');
        Ok(Some(line.to_str_lossy().into_owned()))
    }
}
