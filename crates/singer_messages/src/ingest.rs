use std::io::Read;

use crate::config::IngestConfig;
use crate::error::{LineRecord, MessageError};
use crate::line_parser::{LineParser, SingerLineParser};
use crate::message::Message;
use crate::reader::{BoundedLine, SyncBoundedLineReader};

/// Iterator over the numbered outcomes of every non-blank input line.
///
/// Errors are yielded, not swallowed; the caller decides whether to stop.
/// After an I/O failure the iterator is exhausted.
pub struct MessageIngestor<R: Read, P: LineParser = SingerLineParser> {
    reader: SyncBoundedLineReader<R>,
    parser: P,
    config: IngestConfig,
}

impl<R: Read> MessageIngestor<R, SingerLineParser> {
    pub fn new(reader: R, config: IngestConfig) -> Self {
        Self::with_parser(reader, SingerLineParser::new(), config)
    }
}

impl<R: Read, P: LineParser> MessageIngestor<R, P> {
    pub fn with_parser(reader: R, parser: P, config: IngestConfig) -> Self {
        Self {
            reader: SyncBoundedLineReader::new(reader, config.limits.max_line_bytes),
            parser,
            config,
        }
    }

    fn failed<T>(
        &self,
        line_number: usize,
        raw_line: Option<&str>,
        err: MessageError,
    ) -> LineRecord<T> {
        LineRecord {
            line_number,
            raw_line: raw_line
                .filter(|_| self.config.capture_failed_lines)
                .map(str::to_string),
            outcome: Err(err),
        }
    }

    fn normalize_line(line: &str) -> &str {
        line.strip_suffix('\r').unwrap_or(line)
    }

    fn line_is_blank(line: &str) -> bool {
        line.chars().all(char::is_whitespace)
    }
}

impl<R: Read, P: LineParser> Iterator for MessageIngestor<R, P> {
    type Item = LineRecord<P::Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.next()? {
                BoundedLine::Failed {
                    line_number,
                    source,
                } => {
                    return Some(self.failed(line_number, None, MessageError::Io { source }));
                }
                BoundedLine::TooLong {
                    line_number,
                    observed_bytes,
                    max_line_bytes,
                } => {
                    return Some(self.failed(
                        line_number,
                        None,
                        MessageError::LineTooLong {
                            observed_bytes,
                            max_line_bytes,
                        },
                    ));
                }
                BoundedLine::Line { line_number, bytes } => {
                    let raw_line = match String::from_utf8(bytes) {
                        Ok(line) => line,
                        Err(err) => {
                            let lossy = String::from_utf8_lossy(err.as_bytes()).into_owned();
                            return Some(self.failed(
                                line_number,
                                Some(&lossy),
                                MessageError::InvalidUtf8,
                            ));
                        }
                    };
                    let line = Self::normalize_line(&raw_line);
                    if Self::line_is_blank(line) {
                        continue;
                    }

                    match self.parser.parse_line(line) {
                        Ok(None) => continue,
                        Ok(Some(event)) => {
                            return Some(LineRecord {
                                line_number,
                                raw_line: None,
                                outcome: Ok(event),
                            });
                        }
                        Err(err) => return Some(self.failed(line_number, Some(line), err)),
                    }
                }
            }
        }
    }
}

impl<R: Read> MessageIngestor<R, SingerLineParser> {
    /// Drains the reader, stopping at the first failed line.
    pub fn collect_messages(self) -> Result<Vec<Message>, (usize, MessageError)> {
        let mut out = Vec::new();
        for record in self {
            match record.outcome {
                Ok(message) => out.push(message),
                Err(err) => return Err((record.line_number, err)),
            }
        }
        Ok(out)
    }
}
