use std::io::{self, Read};

const CHUNK_SIZE_BYTES: usize = 8192;

/// One physical line pulled from the tap's output.
#[derive(Debug)]
pub enum BoundedLine {
    Line {
        line_number: usize,
        bytes: Vec<u8>,
    },
    /// The line exceeded the limit; its bytes were dropped while scanning.
    TooLong {
        line_number: usize,
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    /// Reading failed. The reader yields nothing after this.
    Failed {
        line_number: usize,
        source: io::Error,
    },
}

/// Splits a byte reader on `\n` without ever holding more than
/// `max_line_bytes` of a single line in memory.
pub struct SyncBoundedLineReader<R: Read> {
    reader: R,
    max_line_bytes: usize,
    chunk: Box<[u8; CHUNK_SIZE_BYTES]>,
    chunk_pos: usize,
    chunk_len: usize,
    pending: Vec<u8>,
    observed_bytes: usize,
    overflowed: bool,
    line_number: usize,
    exhausted: bool,
}

impl<R: Read> SyncBoundedLineReader<R> {
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self {
            reader,
            max_line_bytes,
            chunk: Box::new([0u8; CHUNK_SIZE_BYTES]),
            chunk_pos: 0,
            chunk_len: 0,
            pending: Vec::new(),
            observed_bytes: 0,
            overflowed: false,
            line_number: 0,
            exhausted: false,
        }
    }

    fn refill(&mut self) -> io::Result<usize> {
        self.chunk_pos = 0;
        loop {
            match self.reader.read(&mut self.chunk[..]) {
                Ok(n) => {
                    self.chunk_len = n;
                    return Ok(n);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.chunk_len = 0;
                    return Err(err);
                }
            }
        }
    }

    fn take_line(&mut self) -> BoundedLine {
        self.line_number += 1;
        let line_number = self.line_number;

        let line = if self.overflowed {
            BoundedLine::TooLong {
                line_number,
                observed_bytes: self.observed_bytes,
                max_line_bytes: self.max_line_bytes,
            }
        } else {
            BoundedLine::Line {
                line_number,
                bytes: std::mem::take(&mut self.pending),
            }
        };

        self.pending.clear();
        self.observed_bytes = 0;
        self.overflowed = false;
        line
    }

    fn accept(&mut self, start: usize, end: usize) {
        self.observed_bytes = self.observed_bytes.saturating_add(end - start);
        if self.overflowed {
            return;
        }
        if self.observed_bytes > self.max_line_bytes {
            self.overflowed = true;
            self.pending = Vec::new();
            return;
        }
        self.pending.extend_from_slice(&self.chunk[start..end]);
    }
}

impl<R: Read> Iterator for SyncBoundedLineReader<R> {
    type Item = BoundedLine;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        loop {
            if self.chunk_pos >= self.chunk_len {
                match self.refill() {
                    Ok(0) => {
                        self.exhausted = true;
                        let has_partial = self.overflowed || !self.pending.is_empty();
                        return has_partial.then(|| self.take_line());
                    }
                    Ok(_) => {}
                    Err(source) => {
                        self.exhausted = true;
                        self.line_number += 1;
                        return Some(BoundedLine::Failed {
                            line_number: self.line_number,
                            source,
                        });
                    }
                }
            }

            let start = self.chunk_pos;
            let window = &self.chunk[start..self.chunk_len];
            match window.iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    self.accept(start, start + offset);
                    self.chunk_pos = start + offset + 1;
                    return Some(self.take_line());
                }
                None => {
                    let end = self.chunk_len;
                    self.accept(start, end);
                    self.chunk_pos = end;
                }
            }
        }
    }
}
