use std::path::PathBuf;

use singer_messages::MessageError;
use thiserror::Error;

/// A structurally invalid message stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Message(MessageError),
    #[error("a record for stream `{stream}` was encountered before a corresponding schema")]
    UnknownStream { stream: String },
    #[error("schema for stream `{stream}` does not compile: {message}")]
    InvalidSchema { stream: String, message: String },
    #[error("state value must be an object with a `currently_syncing` key")]
    MissingCurrentlySyncing,
}

/// Failures that end a run. Every variant is fatal.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("line {line_number}: {source}")]
    Parse {
        line_number: usize,
        #[source]
        source: MessageError,
    },
    #[error("line {line_number}: {source}")]
    Protocol {
        line_number: usize,
        #[source]
        source: ProtocolError,
    },
    #[error("line {line_number}: record for stream `{stream}` failed validation at `{instance_path}`: {message}")]
    Validation {
        line_number: usize,
        stream: String,
        instance_path: String,
        message: String,
    },
    #[error("staging file `{path}`: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: StagingError,
    },
    #[error("blob storage: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to write final state: {0}")]
    Output(#[source] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StagingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read `{path}` for upload: {source}")]
    ReadLocal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to upload `{artifact}` to container `{container}`: {source}")]
    Upload {
        container: String,
        artifact: String,
        #[source]
        source: object_store::Error,
    },
    #[error("failed to fetch `{artifact}` from container `{container}`: {source}")]
    Fetch {
        container: String,
        artifact: String,
        #[source]
        source: object_store::Error,
    },
    #[error("failed to list container `{container}`: {source}")]
    List {
        container: String,
        #[source]
        source: object_store::Error,
    },
    #[error("failed to configure blob client: {0}")]
    Client(#[source] object_store::Error),
}
