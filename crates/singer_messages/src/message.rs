use std::fmt;

use serde_json::{Map, Value};

use crate::error::MessageError;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum MessageType {
    Schema,
    Record,
    State,
    ActivateVersion,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Schema => "SCHEMA",
            MessageType::Record => "RECORD",
            MessageType::State => "STATE",
            MessageType::ActivateVersion => "ACTIVATE_VERSION",
        }
    }

    pub fn from_discriminator(raw: &str) -> Option<Self> {
        match raw {
            "SCHEMA" => Some(MessageType::Schema),
            "RECORD" => Some(MessageType::Record),
            "STATE" => Some(MessageType::State),
            "ACTIVATE_VERSION" => Some(MessageType::ActivateVersion),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declares (or redeclares) the shape of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: Value,
    pub key_properties: Vec<String>,
    pub bookmark_properties: Option<Vec<String>>,
}

/// One row for a previously declared stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMessage {
    pub stream: String,
    pub record: Map<String, Value>,
    pub version: Option<Value>,
    pub time_extracted: Option<String>,
}

/// An opaque checkpoint from the tap.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMessage {
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivateVersionMessage {
    pub stream: String,
    pub version: Option<Value>,
}

/// A fully validated Singer message.
///
/// Construction through [`Message::from_value`] or [`Message::parse_line`]
/// guarantees every field a handler needs is present and well typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Schema(SchemaMessage),
    Record(RecordMessage),
    State(StateMessage),
    ActivateVersion(ActivateVersionMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Schema(_) => MessageType::Schema,
            Message::Record(_) => MessageType::Record,
            Message::State(_) => MessageType::State,
            Message::ActivateVersion(_) => MessageType::ActivateVersion,
        }
    }

    /// The stream this message belongs to; STATE messages are global.
    pub fn stream(&self) -> Option<&str> {
        match self {
            Message::Schema(m) => Some(&m.stream),
            Message::Record(m) => Some(&m.stream),
            Message::ActivateVersion(m) => Some(&m.stream),
            Message::State(_) => None,
        }
    }

    pub fn parse_line(line: &str) -> Result<Self, MessageError> {
        let value: Value =
            serde_json::from_str(line).map_err(|source| MessageError::Parse { source })?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        // Arrays and scalars cannot carry a `type` key.
        let Value::Object(mut obj) = value else {
            return Err(MessageError::MissingType);
        };

        let message_type = match obj.get("type") {
            None => return Err(MessageError::MissingType),
            Some(Value::String(raw)) => MessageType::from_discriminator(raw)
                .ok_or_else(|| MessageError::UnknownType(raw.clone()))?,
            Some(other) => return Err(MessageError::UnknownType(other.to_string())),
        };

        match message_type {
            MessageType::Schema => {
                let stream = take_stream(&mut obj, message_type)?;
                let schema = match obj.remove("schema") {
                    Some(schema @ Value::Object(_)) => schema,
                    Some(_) => return Err(invalid(message_type, "schema", "a JSON object")),
                    None => return Err(missing(message_type, "schema")),
                };
                let key_properties = match obj.remove("key_properties") {
                    Some(raw) => string_list(raw).ok_or_else(|| {
                        invalid(message_type, "key_properties", "a list of strings")
                    })?,
                    None => return Err(missing(message_type, "key_properties")),
                };
                let bookmark_properties = match obj.remove("bookmark_properties") {
                    None | Some(Value::Null) => None,
                    Some(raw) => Some(string_list(raw).ok_or_else(|| {
                        invalid(message_type, "bookmark_properties", "a list of strings")
                    })?),
                };
                Ok(Message::Schema(SchemaMessage {
                    stream,
                    schema,
                    key_properties,
                    bookmark_properties,
                }))
            }
            MessageType::Record => {
                let stream = take_stream(&mut obj, message_type)?;
                let record = match obj.remove("record") {
                    Some(Value::Object(record)) => record,
                    Some(_) => return Err(invalid(message_type, "record", "a JSON object")),
                    None => return Err(missing(message_type, "record")),
                };
                let time_extracted = match obj.remove("time_extracted") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(ts)) => Some(ts),
                    Some(_) => return Err(invalid(message_type, "time_extracted", "a string")),
                };
                Ok(Message::Record(RecordMessage {
                    stream,
                    record,
                    version: obj.remove("version"),
                    time_extracted,
                }))
            }
            MessageType::State => {
                let value = obj
                    .remove("value")
                    .ok_or_else(|| missing(message_type, "value"))?;
                Ok(Message::State(StateMessage { value }))
            }
            MessageType::ActivateVersion => {
                let stream = take_stream(&mut obj, message_type)?;
                Ok(Message::ActivateVersion(ActivateVersionMessage {
                    stream,
                    version: obj.remove("version"),
                }))
            }
        }
    }
}

fn take_stream(
    obj: &mut Map<String, Value>,
    message_type: MessageType,
) -> Result<String, MessageError> {
    match obj.remove("stream") {
        Some(Value::String(stream)) => Ok(stream),
        Some(_) => Err(invalid(message_type, "stream", "a string")),
        None => Err(missing(message_type, "stream")),
    }
}

fn string_list(raw: Value) -> Option<Vec<String>> {
    let Value::Array(items) = raw else {
        return None;
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Some(s),
            _ => None,
        })
        .collect()
}

fn missing(message_type: MessageType, field: &'static str) -> MessageError {
    MessageError::MissingField {
        message_type,
        field,
    }
}

fn invalid(message_type: MessageType, field: &'static str, expected: &'static str) -> MessageError {
    MessageError::InvalidField {
        message_type,
        field,
        expected,
    }
}
