//! Object storage abstraction.
//!
//! Provides one interface over S3, GCS and the local filesystem. Source
//! exports, destination partitions, dead-letter files and run logs all go
//! through [`StorageProvider`].

mod gcs;
mod local;
mod s3;
mod url_parser;

pub use gcs::GcsConfig;
pub use local::LocalConfig;
pub use s3::S3Config;
pub use url_parser::BackendConfig;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Stream of byte chunks read from an object.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Storage provider that abstracts over different cloud storage backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider rooted at the given location.
    pub async fn for_url_with_options(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::construct(BackendConfig::parse_url(url, false)?, options).await
    }

    /// Create a storage provider addressing a single object.
    ///
    /// Use [`StorageProvider::object_path`] to refer to the object itself.
    pub async fn for_object_url(
        url: &str,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::construct(BackendConfig::parse_url(url, true)?, options).await
    }

    async fn construct(
        config: BackendConfig,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match config {
            BackendConfig::S3(config) => Self::construct_s3(config, options).await,
            BackendConfig::Gcs(config) => Self::construct_gcs(config, options).await,
            BackendConfig::Local(config) => Self::construct_local(config).await,
        }
    }

    /// Path of the object a provider built with [`StorageProvider::for_object_url`] points at.
    pub fn object_path() -> Path {
        Path::default()
    }

    /// The location this provider is rooted at, as a URL.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// Get the full contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(path)).await;
        record(StorageOperation::Get, start, result.is_ok());

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Stream an object as it arrives from the backend.
    pub async fn get_stream(&self, path: &Path) -> Result<ByteStream, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(&self.qualify_path(path)).await;
        record(StorageOperation::Get, start, result.is_ok());

        let stream = result
            .context(ObjectStoreSnafu)?
            .into_stream()
            .map_err(|source| StorageError::ObjectStore { source });
        Ok(stream.boxed())
    }

    /// Size of an object in bytes.
    pub async fn size(&self, path: &Path) -> Result<u64, StorageError> {
        let start = Instant::now();
        let result = self.object_store.head(&self.qualify_path(path)).await;
        record(StorageOperation::Head, start, result.is_ok());

        Ok(result.context(ObjectStoreSnafu)?.size)
    }

    /// Check whether an object exists.
    pub async fn exists(&self, path: &Path) -> Result<bool, StorageError> {
        match self.size(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write an object in a single request.
    ///
    /// Object stores make a single PUT visible all at once, so readers see
    /// either the previous object or the new one.
    pub async fn put(&self, path: &Path, bytes: impl Into<Bytes>) -> Result<(), StorageError> {
        self.put_payload(path, PutPayload::from(bytes.into())).await
    }

    /// Put a payload to a path.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self
            .object_store
            .put(&self.qualify_path(path), payload)
            .await;
        record(StorageOperation::Put, start, result.is_ok());

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete an object.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(&self.qualify_path(path)).await;
        record(StorageOperation::Delete, start, result.is_ok());

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete an object, treating "not found" as success.
    ///
    /// Returns whether an object was removed.
    pub async fn delete_if_exists(&self, path: &Path) -> Result<bool, StorageError> {
        match self.delete(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn record(operation: StorageOperation, start: Instant, ok: bool) {
    let status = if ok {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    };
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}
