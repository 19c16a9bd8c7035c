use crate::error::MessageError;
use crate::message::Message;

/// Turns one logical line into an event.
///
/// Implementations receive lines with the trailing `\r` already stripped and
/// never see blank lines. Returning `Ok(None)` skips the line.
pub trait LineParser {
    type Event;

    fn parse_line(&mut self, line: &str) -> Result<Option<Self::Event>, MessageError>;
}

/// Stateless parser for the Singer message grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingerLineParser;

impl SingerLineParser {
    pub fn new() -> Self {
        Self
    }
}

impl LineParser for SingerLineParser {
    type Event = Message;

    fn parse_line(&mut self, line: &str) -> Result<Option<Self::Event>, MessageError> {
        Message::parse_line(line).map(Some)
    }
}
