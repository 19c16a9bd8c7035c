//! Durable blob storage.
//!
//! The flush path talks to [`BlobStore`], a small synchronous seam. The
//! production implementation bridges onto the async `object_store` client
//! through a tokio runtime handle.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use futures::TryStreamExt;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use tokio::runtime::Handle;

use crate::config::TargetConfig;
use crate::error::StorageError;

pub const CSV_CONTENT_TYPE: &str = "application/CSV";

pub trait BlobStore {
    /// Names of the artifacts currently in `container`.
    fn list_artifacts(&self, container: &str) -> Result<Vec<String>, StorageError>;

    /// Uploads `local_path` as `artifact`, replacing any artifact of the
    /// same name.
    fn upload(
        &self,
        container: &str,
        artifact: &str,
        local_path: &Path,
        content_type: &'static str,
    ) -> Result<(), StorageError>;
}

/// How the container reference maps onto the underlying store.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ContainerLayout {
    /// The client is already bound to one container (Azure).
    Bound(String),
    /// The container is the first path segment (in-memory, local stores).
    Prefix,
}

/// [`BlobStore`] over any `object_store` backend.
pub struct ObjectStoreBlobs {
    store: Arc<dyn ObjectStore>,
    layout: ContainerLayout,
    runtime: Handle,
}

impl fmt::Debug for ObjectStoreBlobs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreBlobs")
            .field("store", &self.store.to_string())
            .field("layout", &self.layout)
            .finish()
    }
}

impl ObjectStoreBlobs {
    /// Azure Blob Storage client for the configured container.
    ///
    /// Credentials missing from the config fall back to the standard
    /// `AZURE_STORAGE_*` environment variables.
    pub fn azure(config: &TargetConfig, runtime: Handle) -> Result<Self, StorageError> {
        let mut builder =
            MicrosoftAzureBuilder::from_env().with_container_name(&config.container_name);
        if let Some(account) = &config.account_name {
            builder = builder.with_account(account);
        }
        if let Some(key) = &config.account_key {
            builder = builder.with_access_key(key);
        }
        let store = builder.build().map_err(StorageError::Client)?;

        Ok(Self {
            store: Arc::new(store),
            layout: ContainerLayout::Bound(config.container_name.clone()),
            runtime,
        })
    }

    /// Wraps a store that is not bound to a container; containers become
    /// top-level path prefixes.
    pub fn prefixed(store: Arc<dyn ObjectStore>, runtime: Handle) -> Self {
        Self {
            store,
            layout: ContainerLayout::Prefix,
            runtime,
        }
    }

    pub fn in_memory(runtime: Handle) -> Self {
        Self::prefixed(Arc::new(InMemory::new()), runtime)
    }

    fn location(&self, container: &str, artifact: &str) -> ObjectPath {
        match &self.layout {
            ContainerLayout::Bound(_) => ObjectPath::from(artifact),
            ContainerLayout::Prefix => ObjectPath::from(format!("{container}/{artifact}")),
        }
    }

    /// Reads an artifact back. Used to inspect uploads.
    pub fn fetch(&self, container: &str, artifact: &str) -> Result<Vec<u8>, StorageError> {
        let location = self.location(container, artifact);
        let fetch_err = |source| StorageError::Fetch {
            container: container.to_string(),
            artifact: artifact.to_string(),
            source,
        };
        self.runtime.block_on(async {
            let result = self.store.get(&location).await.map_err(fetch_err)?;
            let bytes = result.bytes().await.map_err(fetch_err)?;
            Ok::<_, StorageError>(bytes.to_vec())
        })
    }

    /// Content type recorded for an artifact, if any.
    pub fn content_type(
        &self,
        container: &str,
        artifact: &str,
    ) -> Result<Option<String>, StorageError> {
        let location = self.location(container, artifact);
        self.runtime.block_on(async {
            let result = self
                .store
                .get(&location)
                .await
                .map_err(|source| StorageError::Fetch {
                    container: container.to_string(),
                    artifact: artifact.to_string(),
                    source,
                })?;
            Ok::<_, StorageError>(
                result
                    .attributes
                    .get(&Attribute::ContentType)
                    .map(|value| value.to_string()),
            )
        })
    }
}

impl BlobStore for ObjectStoreBlobs {
    fn list_artifacts(&self, container: &str) -> Result<Vec<String>, StorageError> {
        let prefix = match &self.layout {
            ContainerLayout::Bound(_) => None,
            ContainerLayout::Prefix => Some(ObjectPath::from(container)),
        };

        let objects = self
            .runtime
            .block_on(self.store.list(prefix.as_ref()).try_collect::<Vec<_>>())
            .map_err(|source| StorageError::List {
                container: container.to_string(),
                source,
            })?;

        let container_prefix = format!("{container}/");
        Ok(objects
            .into_iter()
            .map(|meta| {
                let name = meta.location.to_string();
                match self.layout {
                    ContainerLayout::Bound(_) => name,
                    ContainerLayout::Prefix => name
                        .strip_prefix(&container_prefix)
                        .map(str::to_string)
                        .unwrap_or(name),
                }
            })
            .collect())
    }

    fn upload(
        &self,
        container: &str,
        artifact: &str,
        local_path: &Path,
        content_type: &'static str,
    ) -> Result<(), StorageError> {
        let bytes = std::fs::read(local_path).map_err(|source| StorageError::ReadLocal {
            path: local_path.to_path_buf(),
            source,
        })?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, AttributeValue::from(content_type));
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        let location = self.location(container, artifact);
        self.runtime
            .block_on(
                self.store
                    .put_opts(&location, PutPayload::from(bytes), options),
            )
            .map_err(|source| StorageError::Upload {
                container: container.to_string(),
                artifact: artifact.to_string(),
                source,
            })?;
        Ok(())
    }
}
