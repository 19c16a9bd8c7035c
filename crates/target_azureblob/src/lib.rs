#![forbid(unsafe_code)]
//! Singer target for Azure Blob Storage.
//!
//! Reads Singer messages from stdin, validates each record against its
//! stream's schema, stages rows as one CSV file per stream, and promotes the
//! staged files to a blob container whenever the tap reports that no stream
//! is mid-sync. The last pending checkpoint is written to stdout on exit.

mod buffer;
mod checkpoint;
mod cli;
mod config;
mod dispatcher;
mod error;
mod flatten;
mod flush;
mod registry;
mod storage;
mod usage;

pub use buffer::{RecordBuffer, StagedFile};
pub use checkpoint::{emit_state, is_currently_syncing, CheckpointTracker};
pub use cli::{run, Args};
pub use config::TargetConfig;
pub use dispatcher::{RunStats, Target};
pub use error::{ProtocolError, StagingError, StorageError, TargetError};
pub use flatten::{flatten, FlatRecord, SEPARATOR};
pub use flush::{FlushCoordinator, FlushError, FlushReport};
pub use registry::{Conformance, RegistryError, StreamRegistry};
pub use storage::{BlobStore, ObjectStoreBlobs, CSV_CONTENT_TYPE};
pub use usage::spawn_usage_report;
