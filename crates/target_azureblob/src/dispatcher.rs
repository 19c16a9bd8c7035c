//! The message loop that drives one run of the target.

use std::io::Read;

use serde_json::Value;
use singer_messages::{
    ActivateVersionMessage, ErrorClass, IngestConfig, LineRecord, Message, MessageIngestor,
    RecordMessage, SchemaMessage, StateMessage,
};
use tracing::{debug, error, info};

use crate::buffer::RecordBuffer;
use crate::checkpoint::CheckpointTracker;
use crate::error::{ProtocolError, TargetError};
use crate::flatten::flatten;
use crate::flush::{FlushCoordinator, FlushError};
use crate::registry::{Conformance, RegistryError, StreamRegistry};
use crate::storage::BlobStore;

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub schemas: u64,
    pub records: u64,
    pub states: u64,
    pub flushes: u64,
    pub artifacts_uploaded: u64,
    pub tolerated_validation_errors: u64,
}

/// All state owned by one pipeline run.
pub struct Target<S> {
    registry: StreamRegistry,
    buffer: RecordBuffer,
    checkpoint: CheckpointTracker,
    flusher: FlushCoordinator<S>,
    stats: RunStats,
}

impl<S: BlobStore> Target<S> {
    pub fn new(buffer: RecordBuffer, flusher: FlushCoordinator<S>) -> Self {
        Self {
            registry: StreamRegistry::new(),
            buffer,
            checkpoint: CheckpointTracker::new(),
            flusher,
            stats: RunStats::default(),
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn buffer(&self) -> &RecordBuffer {
        &self.buffer
    }

    pub fn flusher(&self) -> &FlushCoordinator<S> {
        &self.flusher
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn final_checkpoint(&self) -> Option<&Value> {
        self.checkpoint.current()
    }

    /// Processes every line of `input` in order and returns the checkpoint
    /// to emit.
    pub fn persist_lines<R: Read>(
        mut self,
        input: R,
        ingest: IngestConfig,
    ) -> Result<Option<Value>, TargetError> {
        self.process(input, ingest)?;
        Ok(self.checkpoint.into_final())
    }

    /// Processes every line of `input`, stopping at the first fatal error.
    pub fn process<R: Read>(&mut self, input: R, ingest: IngestConfig) -> Result<(), TargetError> {
        for record in MessageIngestor::new(input, ingest) {
            let (line_number, message) = accept_line(record)?;
            self.handle(line_number, message)?;
        }
        info!(
            schemas = self.stats.schemas,
            records = self.stats.records,
            states = self.stats.states,
            flushes = self.stats.flushes,
            artifacts = self.stats.artifacts_uploaded,
            "input exhausted"
        );
        Ok(())
    }

    /// Routes one message.
    pub fn handle(&mut self, line_number: usize, message: Message) -> Result<(), TargetError> {
        debug!(
            line_number,
            message_type = %message.message_type(),
            stream = message.stream(),
            "message received"
        );
        match message {
            Message::Schema(schema) => self.on_schema(line_number, schema),
            Message::Record(record) => self.on_record(line_number, record),
            Message::State(state) => self.on_state(line_number, state),
            Message::ActivateVersion(activate) => {
                self.on_activate_version(activate);
                Ok(())
            }
        }
    }

    fn on_schema(&mut self, line_number: usize, schema: SchemaMessage) -> Result<(), TargetError> {
        self.registry
            .declare_schema(&schema.stream, schema.schema, schema.key_properties)
            .map_err(|err| registry_error(line_number, err))?;
        self.stats.schemas += 1;
        Ok(())
    }

    fn on_record(&mut self, line_number: usize, record: RecordMessage) -> Result<(), TargetError> {
        let conformance = self
            .registry
            .validate(&record.stream, &record.record)
            .map_err(|err| registry_error(line_number, err))?;
        if let Conformance::PrecisionMismatch(errors) = conformance {
            self.stats.tolerated_validation_errors += errors.len() as u64;
        }

        let flat = flatten(&record.record);
        self.buffer.append(&record.stream, &flat, &record.record)?;
        self.checkpoint.reset();
        self.stats.records += 1;
        Ok(())
    }

    fn on_state(&mut self, line_number: usize, state: StateMessage) -> Result<(), TargetError> {
        self.stats.states += 1;
        let current = self.checkpoint.observe(state.value);
        let report = self
            .flusher
            .maybe_flush(current, &mut self.buffer)
            .map_err(|err| match err {
                FlushError::Checkpoint(source) => TargetError::Protocol {
                    line_number,
                    source,
                },
                FlushError::Storage(source) => TargetError::Storage(source),
            })?;

        if let Some(report) = report {
            self.stats.flushes += 1;
            self.stats.artifacts_uploaded += report.uploaded.len() as u64;
            info!(
                line_number,
                uploaded = report.uploaded.len(),
                replaced = report.replaced.len(),
                delete_failures = report.delete_failures.len(),
                "promoted staged files"
            );
        }
        Ok(())
    }

    fn on_activate_version(&self, activate: ActivateVersionMessage) {
        debug!(
            stream = %activate.stream,
            version = ?activate.version,
            "ACTIVATE_VERSION has no effect on staged files"
        );
    }
}

fn accept_line(record: LineRecord<Message>) -> Result<(usize, Message), TargetError> {
    let line_number = record.line_number;
    match record.outcome {
        Ok(message) => Ok((line_number, message)),
        Err(source) => {
            let raw = record.raw_line.as_deref().unwrap_or("<unavailable>");
            match source.class() {
                ErrorClass::Parse => {
                    error!(line_number, "Unable to parse:\n{raw}");
                    Err(TargetError::Parse {
                        line_number,
                        source,
                    })
                }
                ErrorClass::Protocol => {
                    error!(line_number, "Invalid message:\n{raw}");
                    Err(TargetError::Protocol {
                        line_number,
                        source: ProtocolError::Message(source),
                    })
                }
            }
        }
    }
}

fn registry_error(line_number: usize, err: RegistryError) -> TargetError {
    match err {
        RegistryError::UnknownStream { stream } => TargetError::Protocol {
            line_number,
            source: ProtocolError::UnknownStream { stream },
        },
        RegistryError::InvalidSchema { stream, message } => TargetError::Protocol {
            line_number,
            source: ProtocolError::InvalidSchema { stream, message },
        },
        RegistryError::Nonconforming {
            stream,
            instance_path,
            message,
        } => TargetError::Validation {
            line_number,
            stream,
            instance_path,
            message,
        },
    }
}
