//! Blob storage backend built on the `object_store` crate
//!
//! Provides the `Backend` interface for Azure Blob Storage with support for:
//! - Connection string authentication (including Azurite development storage)
//! - Environment-based credentials when no connection string is given
//! - Streaming reads and block-based streaming writes
//! - User metadata stored as blob metadata attributes
//!
//! An in-memory variant backs the test suites.

use super::error::{BackendError, BackendResult};
use super::types::{Metadata, ReadStream, WriteOptions};
use super::Backend;
use async_trait::async_trait;
use futures::stream::{StreamExt, TryStreamExt};
use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, Attributes, GetOptions, ObjectMeta, ObjectStore, PutMultipartOpts, WriteMultipart,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Default block size for streaming uploads (8MB)
const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Maximum number of blocks in flight during a streaming upload
const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Blob store backend using the object_store crate
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    /// Backend name used in errors and spans
    name: String,
    /// Base URL of the container, used for log references
    base_url: String,
    /// Block size for streaming uploads
    chunk_size: usize,
    /// Concurrency limit for in-flight blocks
    max_concurrency: usize,
}

impl ObjectStoreBackend {
    /// Wrap an existing object store
    pub fn new(
        store: Arc<dyn ObjectStore>,
        name: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            name: name.into(),
            base_url: base_url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Create an empty in-memory backend
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory", "memory://")
    }

    /// Create an Azure Blob Storage backend for one container
    ///
    /// With a connection string, `AccountName`, `AccountKey`,
    /// `SharedAccessSignature` and `UseDevelopmentStorage=true` are honoured.
    /// Without one, credentials are taken from the `AZURE_*` environment
    /// variables understood by `object_store`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::InvalidConfig` if the client cannot be built.
    pub fn azure(
        account: &str,
        container: &str,
        connection_string: Option<&str>,
    ) -> BackendResult<Self> {
        let mut builder = MicrosoftAzureBuilder::from_env()
            .with_config(AzureConfigKey::AccountName, account)
            .with_config(AzureConfigKey::ContainerName, container);

        if let Some(conn) = connection_string {
            for (key, value) in parse_connection_string(conn) {
                builder = match key.as_str() {
                    "AccountName" => builder.with_config(AzureConfigKey::AccountName, value),
                    "AccountKey" => builder.with_config(AzureConfigKey::AccessKey, value),
                    "SharedAccessSignature" => builder.with_config(AzureConfigKey::SasKey, value),
                    "UseDevelopmentStorage" => builder.with_config(AzureConfigKey::UseEmulator, value),
                    _ => builder,
                };
            }
        }

        let store = builder.build().map_err(|e| BackendError::InvalidConfig {
            backend: "azure".to_string(),
            message: format!("Failed to create Azure client: {}", e),
        })?;

        Ok(Self::new(
            Arc::new(store),
            "azure",
            format!("https://{}.blob.core.windows.net/{}", account, container),
        ))
    }

    /// Set the block size used for streaming uploads
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Convert a Path to an object name
    ///
    /// The name is taken verbatim; blob names may contain characters such as
    /// `^` or `#` that must reach the store unencoded.
    fn path_to_object_name(&self, path: &Path) -> BackendResult<ObjectPath> {
        let name = object_name(path);
        ObjectPath::parse(&name).map_err(|e| BackendError::Other {
            backend: self.name.clone(),
            message: format!("Invalid blob name '{}': {}", name, e),
        })
    }

    fn err_for(
        &self,
        path: &Path,
        action: &str,
    ) -> impl FnOnce(object_store::Error) -> BackendError {
        let path = path.to_path_buf();
        let backend = self.name.clone();
        let action = action.to_string();
        move |e| BackendError::from_object_store(e, &path, &backend, &action)
    }

    /// Stream `stream` into a new multipart upload
    ///
    /// Returns the open writer and the number of bytes handed to it. The
    /// upload is aborted before any error is returned.
    async fn upload_stream(
        &self,
        path: &Path,
        location: &ObjectPath,
        mut stream: ReadStream,
        attributes: Attributes,
    ) -> BackendResult<(WriteMultipart, u64)> {
        let put_options = PutMultipartOpts {
            attributes,
            ..Default::default()
        };

        let upload = self
            .store
            .put_multipart_opts(location, put_options)
            .await
            .map_err(self.err_for(path, "start upload"))?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.chunk_size);

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    abort_upload(writer, path).await;
                    return Err(BackendError::Io(e));
                }
            };
            if let Err(e) = writer.wait_for_capacity(self.max_concurrency).await {
                abort_upload(writer, path).await;
                return Err(self.err_for(path, "upload block")(e));
            }
            writer.write(&chunk);
            written += chunk.len() as u64;
        }

        Ok((writer, written))
    }
}

/// Blob name for a router path, without a leading delimiter
fn object_name(path: &Path) -> String {
    path.to_string_lossy().trim_start_matches('/').to_string()
}

/// Abort an upload, logging rather than masking the original failure
async fn abort_upload(writer: WriteMultipart, path: &Path) {
    if let Err(e) = writer.abort().await {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Failed to abort multipart upload"
        );
    }
}

/// Split an Azure connection string into its `Key=Value` pairs
fn parse_connection_string(conn: &str) -> Vec<(String, String)> {
    conn.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Convert object_store metadata and attributes to backend Metadata
fn convert_object_meta(meta: &ObjectMeta, attributes: &Attributes) -> Metadata {
    Metadata::file(meta.size as u64).with_custom_metadata(user_metadata(attributes))
}

fn user_metadata(attributes: &Attributes) -> HashMap<String, String> {
    attributes
        .iter()
        .filter_map(|(attr, value)| match attr {
            Attribute::Metadata(key) => {
                let value: &str = value.as_ref();
                Some((key.to_string(), value.to_string()))
            }
            _ => None,
        })
        .collect()
}

fn metadata_attributes(metadata: &HashMap<String, String>) -> Attributes {
    let mut attributes = Attributes::new();
    for (key, value) in metadata {
        attributes.insert(Attribute::Metadata(key.clone().into()), value.clone().into());
    }
    attributes
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    #[tracing::instrument(
        skip(self),
        fields(otel.kind = "client", path = %path.display())
    )]
    async fn stat(&self, path: &Path) -> BackendResult<Metadata> {
        let location = self.path_to_object_name(path)?;
        let options = GetOptions {
            head: true,
            ..Default::default()
        };

        let result = self
            .store
            .get_opts(&location, options)
            .await
            .map_err(self.err_for(path, "get blob properties"))?;

        Ok(convert_object_meta(&result.meta, &result.attributes))
    }

    #[tracing::instrument(
        skip(self),
        fields(otel.kind = "client", path = %path.display())
    )]
    async fn read(&self, path: &Path) -> BackendResult<ReadStream> {
        let location = self.path_to_object_name(path)?;

        let stream = self
            .store
            .get(&location)
            .await
            .map_err(self.err_for(path, "open blob stream"))?
            .into_stream()
            .map_err(|e| std::io::Error::other(e.to_string()))
            .boxed();

        Ok(stream)
    }

    #[tracing::instrument(
        skip(self, stream, options),
        fields(otel.kind = "client", path = %path.display())
    )]
    async fn write(
        &self,
        path: &Path,
        stream: ReadStream,
        size: u64,
        options: WriteOptions,
    ) -> BackendResult<u64> {
        let location = self.path_to_object_name(path)?;
        let attributes = options
            .metadata
            .as_ref()
            .map(metadata_attributes)
            .unwrap_or_default();

        let (writer, written) = self
            .upload_stream(path, &location, stream, attributes)
            .await?;

        if written != size {
            abort_upload(writer, path).await;
            return Err(BackendError::LengthMismatch {
                path: path.to_path_buf(),
                expected: size,
                actual: written,
            });
        }

        writer
            .finish()
            .await
            .map_err(self.err_for(path, "commit upload"))?;

        tracing::debug!(bytes = written, "Upload committed");
        Ok(written)
    }

    /// object_store has no metadata-only update, so the blob's bytes are
    /// streamed back into a new upload carrying the new metadata. The upload
    /// is only committed if the blob still has the ETag it was read with.
    #[tracing::instrument(
        skip(self, metadata),
        fields(otel.kind = "client", path = %path.display())
    )]
    async fn set_metadata(
        &self,
        path: &Path,
        metadata: &HashMap<String, String>,
    ) -> BackendResult<()> {
        let location = self.path_to_object_name(path)?;

        let existing = self
            .store
            .get(&location)
            .await
            .map_err(self.err_for(path, "read blob for metadata update"))?;
        let expected_tag = existing.meta.e_tag.clone();
        let size = existing.meta.size as u64;

        let mut attributes = metadata_attributes(metadata);
        for (attr, value) in existing.attributes.iter() {
            if !matches!(attr, Attribute::Metadata(_)) {
                attributes.insert(attr.clone(), value.clone());
            }
        }

        let body = existing
            .into_stream()
            .map_err(|e| std::io::Error::other(e.to_string()))
            .boxed();
        let (writer, written) = self
            .upload_stream(path, &location, body, attributes)
            .await?;

        if written != size {
            abort_upload(writer, path).await;
            return Err(BackendError::LengthMismatch {
                path: path.to_path_buf(),
                expected: size,
                actual: written,
            });
        }

        // Multipart commits cannot be made conditional, so check right before
        match expected_tag {
            Some(e_tag) => {
                let options = GetOptions {
                    if_match: Some(e_tag),
                    head: true,
                    ..Default::default()
                };
                if let Err(e) = self.store.get_opts(&location, options).await {
                    abort_upload(writer, path).await;
                    return Err(self.err_for(path, "check blob version")(e));
                }
            }
            None => tracing::debug!("Store reported no ETag, committing unchecked"),
        }

        writer
            .finish()
            .await
            .map_err(self.err_for(path, "set blob metadata"))?;

        Ok(())
    }

    fn backend_name(&self) -> &str {
        &self.name
    }

    fn url_for(&self, path: &Path) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), object_name(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream::{self, BoxStream};
    use object_store::{GetResult, ListResult, MultipartUpload, PutOptions, PutPayload, PutResult};

    fn stream_of(data: &'static [u8]) -> ReadStream {
        stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
    }

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn read_all(backend: &ObjectStoreBackend, path: &Path) -> Vec<u8> {
        let chunks: Vec<Bytes> = backend
            .read(path)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }

    #[test]
    fn test_path_to_object_name() {
        let backend = ObjectStoreBackend::in_memory();

        assert_eq!(
            backend
                .path_to_object_name(Path::new("/dir/file.txt"))
                .unwrap()
                .as_ref(),
            "dir/file.txt"
        );
        assert_eq!(
            backend
                .path_to_object_name(Path::new("incoming/ADT^A01#2.hl7"))
                .unwrap()
                .as_ref(),
            "incoming/ADT^A01#2.hl7"
        );
        assert!(backend.path_to_object_name(Path::new("a/../b")).is_err());
    }

    #[tokio::test]
    async fn test_reserved_characters_stored_verbatim() {
        let store = Arc::new(InMemory::new());
        let backend = ObjectStoreBackend::new(store.clone(), "memory", "memory://");
        let path = Path::new("hl7-out/ADT^A01.hl7");

        backend
            .write(path, stream_of(b"MSH|^~"), 6, WriteOptions::new())
            .await
            .unwrap();

        let raw = ObjectPath::parse("hl7-out/ADT^A01.hl7").unwrap();
        assert_eq!(store.head(&raw).await.unwrap().size, 6);
        assert_eq!(backend.url_for(path), "memory://hl7-out/ADT^A01.hl7");
    }

    #[test]
    fn test_parse_connection_string() {
        let pairs = parse_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=acct;AccountKey=a2V5==;",
        );
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&("AccountName".to_string(), "acct".to_string())));
        assert!(pairs.contains(&("AccountKey".to_string(), "a2V5==".to_string())));
    }

    #[test]
    fn test_url_for() {
        let backend = ObjectStoreBackend::in_memory();
        assert_eq!(
            backend.url_for(Path::new("misc/report.csv")),
            "memory://misc/report.csv"
        );
    }

    #[tokio::test]
    async fn test_write_then_stat_and_read() {
        let backend = ObjectStoreBackend::in_memory();
        let path = Path::new("incoming/report.csv");
        let options = WriteOptions::new().with_metadata(meta(&[("message_type", "CSV")]));

        let written = backend
            .write(path, stream_of(b"a,b,c\n"), 6, options)
            .await
            .unwrap();
        assert_eq!(written, 6);

        let stat = backend.stat(path).await.unwrap();
        assert_eq!(stat.size, 6);
        assert_eq!(stat.get("message_type"), Some("CSV"));
        assert_eq!(read_all(&backend, path).await, b"a,b,c\n");
    }

    #[tokio::test]
    async fn test_write_small_chunks_spans_blocks() {
        let backend = ObjectStoreBackend::in_memory().with_chunk_size(4);
        let path = Path::new("big.bin");
        let chunks = vec![
            Ok(Bytes::from_static(b"0123")),
            Ok(Bytes::from_static(b"4567")),
            Ok(Bytes::from_static(b"89")),
        ];

        let written = backend
            .write(path, stream::iter(chunks).boxed(), 10, WriteOptions::new())
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(read_all(&backend, path).await, b"0123456789");
    }

    #[tokio::test]
    async fn test_write_length_mismatch() {
        let backend = ObjectStoreBackend::in_memory();
        let path = Path::new("short.bin");

        let err = backend
            .write(path, stream_of(b"abc"), 10, WriteOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::LengthMismatch {
                expected: 10,
                actual: 3,
                ..
            }
        ));
        assert!(!backend.exists(path).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_replaces_existing() {
        let backend = ObjectStoreBackend::in_memory();
        let path = Path::new("twice.bin");

        for body in [b"one", b"two"] {
            backend
                .write(path, stream_of(body), 3, WriteOptions::new())
                .await
                .unwrap();
        }
        assert_eq!(read_all(&backend, path).await, b"two");
    }

    #[tokio::test]
    async fn test_set_metadata_replaces_and_keeps_bytes() {
        let backend = ObjectStoreBackend::in_memory();
        let path = Path::new("misc/report.csv");
        let options = WriteOptions::new().with_metadata(meta(&[("stale", "yes")]));
        backend
            .write(path, stream_of(b"payload"), 7, options)
            .await
            .unwrap();

        backend
            .set_metadata(path, &meta(&[("system_provider", "DEX-ROUTING")]))
            .await
            .unwrap();

        let stat = backend.stat(path).await.unwrap();
        assert_eq!(stat.custom_metadata, meta(&[("system_provider", "DEX-ROUTING")]));
        assert_eq!(read_all(&backend, path).await, b"payload");
    }

    #[tokio::test]
    async fn test_set_metadata_streams_multi_block_blob() {
        let backend = ObjectStoreBackend::in_memory().with_chunk_size(4);
        let path = Path::new("bulk/data.bin");
        backend
            .write(path, stream_of(b"0123456789abcdef!"), 17, WriteOptions::new())
            .await
            .unwrap();

        backend
            .set_metadata(path, &meta(&[("destination", "bulk")]))
            .await
            .unwrap();

        let stat = backend.stat(path).await.unwrap();
        assert_eq!(stat.size, 17);
        assert_eq!(stat.get("destination"), Some("bulk"));
        assert_eq!(read_all(&backend, path).await, b"0123456789abcdef!");
    }

    #[tokio::test]
    async fn test_set_metadata_does_not_clobber_newer_write() {
        let inner = Arc::new(InMemory::new());
        let location = ObjectPath::parse("misc/report.csv").unwrap();
        inner.put(&location, "original".into()).await.unwrap();

        let store = Arc::new(OverwritingStore {
            inner: inner.clone(),
        });
        let backend = ObjectStoreBackend::new(store, "memory", "memory://");
        let path = Path::new("misc/report.csv");

        let err = backend
            .set_metadata(path, &meta(&[("system_provider", "DEX-ROUTING")]))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Modified { .. }));

        let current = inner.get(&location).await.unwrap().bytes().await.unwrap();
        assert_eq!(current.as_ref(), b"newer");
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let backend = ObjectStoreBackend::in_memory();
        let path = Path::new("nope.csv");

        assert!(backend.stat(path).await.unwrap_err().is_not_found());
        assert!(backend.read(path).await.err().unwrap().is_not_found());
        assert!(backend
            .set_metadata(path, &HashMap::new())
            .await
            .unwrap_err()
            .is_not_found());
        assert!(!backend.exists(path).await.unwrap());
    }

    /// Store whose uploads race with another writer replacing the blob
    #[derive(Debug)]
    struct OverwritingStore {
        inner: Arc<InMemory>,
    }

    impl std::fmt::Display for OverwritingStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "OverwritingStore({})", self.inner)
        }
    }

    #[async_trait]
    impl ObjectStore for OverwritingStore {
        async fn put_opts(
            &self,
            location: &ObjectPath,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &ObjectPath,
            opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put(location, "newer".into()).await?;
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &ObjectPath,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(
            &self,
            from: &ObjectPath,
            to: &ObjectPath,
        ) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }
}
