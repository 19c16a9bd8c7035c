//! Per-stream schema, validator, and key properties.

use std::collections::HashMap;

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema, ValidationError};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a record for stream `{stream}` was encountered before a corresponding schema")]
    UnknownStream { stream: String },
    #[error("schema for stream `{stream}` does not compile: {message}")]
    InvalidSchema { stream: String, message: String },
    #[error("record for stream `{stream}` failed validation at `{instance_path}`: {message}")]
    Nonconforming {
        stream: String,
        instance_path: String,
        message: String,
    },
}

/// How a record that was not rejected relates to its schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Conformance {
    Valid,
    /// Only decimal-step (`multipleOf` with a fractional step) failures were
    /// found. These are reported and tolerated.
    PrecisionMismatch(Vec<String>),
}

struct StreamEntry {
    validator: JSONSchema,
    key_properties: Vec<String>,
}

/// Declared streams, keyed by name. A later SCHEMA replaces an earlier one.
#[derive(Default)]
pub struct StreamRegistry {
    streams: HashMap<String, StreamEntry>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_schema(
        &mut self,
        stream: &str,
        schema: Value,
        key_properties: Vec<String>,
    ) -> Result<(), RegistryError> {
        let validator = compile(&schema).map_err(|message| RegistryError::InvalidSchema {
            stream: stream.to_string(),
            message,
        })?;

        let replaced = self
            .streams
            .insert(
                stream.to_string(),
                StreamEntry {
                    validator,
                    key_properties,
                },
            )
            .is_some();
        debug!(stream, replaced, "schema declared");
        Ok(())
    }

    pub fn contains(&self, stream: &str) -> bool {
        self.streams.contains_key(stream)
    }

    pub fn key_properties(&self, stream: &str) -> Option<&[String]> {
        self.streams
            .get(stream)
            .map(|entry| entry.key_properties.as_slice())
    }

    /// Checks `record` against the stream's schema.
    ///
    /// Decimal-precision failures are logged and tolerated; any other
    /// failure rejects the record.
    pub fn validate(
        &self,
        stream: &str,
        record: &Map<String, Value>,
    ) -> Result<Conformance, RegistryError> {
        let entry = self
            .streams
            .get(stream)
            .ok_or_else(|| RegistryError::UnknownStream {
                stream: stream.to_string(),
            })?;

        let instance = Value::Object(record.clone());
        let Err(errors) = entry.validator.validate(&instance) else {
            return Ok(Conformance::Valid);
        };

        let mut tolerated = Vec::new();
        for err in errors {
            if is_precision_mismatch(&err) {
                error!(stream, "Validation error:{err}");
                tolerated.push(err.to_string());
                continue;
            }
            return Err(RegistryError::Nonconforming {
                stream: stream.to_string(),
                instance_path: err.instance_path.to_string(),
                message: err.to_string(),
            });
        }
        Ok(Conformance::PrecisionMismatch(tolerated))
    }
}

fn compile(schema: &Value) -> Result<JSONSchema, String> {
    JSONSchema::options()
        .with_draft(Draft::Draft4)
        .should_validate_formats(false)
        .compile(schema)
        .map_err(|err| err.to_string())
}

/// Taps emit floats for decimal columns declared with `multipleOf: 0.01`
/// and similar; binary rounding makes those checks fail spuriously.
fn is_precision_mismatch(err: &ValidationError<'_>) -> bool {
    match &err.kind {
        ValidationErrorKind::MultipleOf { multiple_of } => multiple_of.fract() != 0.0,
        _ => false,
    }
}
