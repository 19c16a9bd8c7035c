use thiserror::Error;

use crate::message::MessageType;

/// Coarse classification used by targets to decide how a failure is reported.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorClass {
    /// The line could not be read or decoded as JSON.
    Parse,
    /// The line is JSON but not a structurally valid message.
    Protocol,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("I/O error while reading tap output: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
    #[error("invalid UTF-8 in tap output")]
    InvalidUtf8,
    #[error("line too long (observed_bytes={observed_bytes}, max_line_bytes={max_line_bytes})")]
    LineTooLong {
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    #[error("unable to parse line as JSON: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    #[error("line is missing required key `type`")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("{message_type} message is missing required key `{field}`")]
    MissingField {
        message_type: MessageType,
        field: &'static str,
    },
    #[error("{message_type} message has invalid `{field}`: expected {expected}")]
    InvalidField {
        message_type: MessageType,
        field: &'static str,
        expected: &'static str,
    },
}

impl MessageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MessageError::Io { .. }
            | MessageError::InvalidUtf8
            | MessageError::LineTooLong { .. }
            | MessageError::Parse { .. } => ErrorClass::Parse,
            MessageError::MissingType
            | MessageError::UnknownType(_)
            | MessageError::MissingField { .. }
            | MessageError::InvalidField { .. } => ErrorClass::Protocol,
        }
    }
}

/// Outcome for one non-blank input line.
#[derive(Debug)]
pub struct LineRecord<T> {
    pub line_number: usize,
    /// Raw line text, present only for failed lines when capture is enabled.
    pub raw_line: Option<String>,
    pub outcome: Result<T, MessageError>,
}
