//! Promotion of staged files to blob storage.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::buffer::{RecordBuffer, STAGING_EXTENSION};
use crate::checkpoint::is_currently_syncing;
use crate::error::{ProtocolError, StorageError};
use crate::storage::{BlobStore, CSV_CONTENT_TYPE};

#[derive(Debug, Error)]
pub enum FlushError {
    #[error(transparent)]
    Checkpoint(#[from] ProtocolError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What one promotion pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Artifact names uploaded, in promotion order.
    pub uploaded: Vec<String>,
    /// Uploaded artifacts that replaced an existing artifact of the same name.
    pub replaced: Vec<String>,
    /// Local files that could not be removed after a successful upload.
    pub delete_failures: Vec<PathBuf>,
}

pub struct FlushCoordinator<S> {
    store: S,
    container: String,
}

impl<S: BlobStore> FlushCoordinator<S> {
    pub fn new(store: S, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn artifact_name(stream: &str) -> String {
        format!("{stream}.{STAGING_EXTENSION}")
    }

    /// Promotes staged files when `checkpoint` says no stream is syncing.
    ///
    /// Returns `Ok(None)` when nothing was attempted: a stream is still
    /// syncing, or nothing is staged.
    pub fn maybe_flush(
        &self,
        checkpoint: &Value,
        buffer: &mut RecordBuffer,
    ) -> Result<Option<FlushReport>, FlushError> {
        if is_currently_syncing(checkpoint)? {
            debug!("stream still syncing; keeping staged files");
            return Ok(None);
        }
        if !buffer.has_staged() {
            return Ok(None);
        }
        Ok(Some(self.flush(buffer)?))
    }

    /// Uploads every staged file, then deletes it locally.
    ///
    /// An upload failure stops the pass and leaves that file (and any not yet
    /// promoted) staged. A delete failure after a successful upload is only
    /// reported; the stream is released either way.
    pub fn flush(&self, buffer: &mut RecordBuffer) -> Result<FlushReport, StorageError> {
        let existing: BTreeSet<String> = match self.store.list_artifacts(&self.container) {
            Ok(names) => names.into_iter().collect(),
            Err(err) => {
                warn!(
                    container = %self.container,
                    error = %err,
                    "could not list existing artifacts"
                );
                BTreeSet::new()
            }
        };

        let mut report = FlushReport::default();
        for staged in buffer.staged_files() {
            let artifact = Self::artifact_name(&staged.stream);
            self.store.upload(
                &self.container,
                &artifact,
                &staged.path,
                CSV_CONTENT_TYPE,
            )?;
            info!(
                stream = %staged.stream,
                artifact = %artifact,
                rows = staged.rows,
                "uploaded staged file"
            );

            if existing.contains(&artifact) {
                report.replaced.push(artifact.clone());
            }
            report.uploaded.push(artifact);

            if let Err(err) = fs::remove_file(&staged.path) {
                warn!(
                    path = %staged.path.display(),
                    error = %err,
                    "uploaded but failed to delete staged file"
                );
                report.delete_failures.push(staged.path.clone());
            }
            buffer.release(&staged.stream);
        }
        Ok(report)
    }
}
