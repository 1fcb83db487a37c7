//! The content store boundary.
//!
//! The store holding manifests and layer blobs is an external subsystem;
//! the save pipeline only ever reads from it through [`ContentStore`].
//! Two implementations live here: [`FsStore`], a read-only view over the
//! daemon's on-disk layout, and [`MemoryStore`], the reference
//! implementation used by tests.

use std::collections::HashMap;
use std::io::Read;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the short display form of an image ID.
pub const SHORT_ID_LEN: usize = 12;

/// Errors from content store access.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// No stored image matches the given key.
    #[error("no such image in store: {0}")]
    NotFound(Box<str>),
    /// The store root is missing or was never initialized.
    #[error("image store not initialized at {0}")]
    NotInitialized(Box<str>),
    /// A referenced blob is missing or unreadable.
    #[error("no such blob in store: {0}")]
    BlobNotFound(Box<str>),
    /// Underlying I/O failure.
    #[error("reading store: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed store metadata.
    #[error("decoding store metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Descriptor for one content-addressed blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    /// Content digest, `sha256:<hex>`.
    pub digest: String,
    /// Blob size in bytes.
    pub size: u64,
    /// Media type recorded for the blob.
    pub media_type: String,
}

/// Everything the export pipeline needs to know about one stored image.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    /// The image ID (a content digest hex string).
    pub id: String,
    /// Names the image is known under.
    pub names: Vec<String>,
    /// Raw image manifest bytes.
    pub manifest: Vec<u8>,
    /// Raw image configuration bytes.
    pub config: Vec<u8>,
    /// Layer blobs, in manifest order.
    pub layers: Vec<BlobDescriptor>,
}

/// Read access to stored images and blobs.
pub trait ContentStore {
    /// Look up an image by name, full ID, or short ID.
    fn lookup(&self, key: &str) -> Result<ImageRecord, StoreError>;

    /// Open a blob for reading by content digest.
    fn read_blob(&self, digest: &str) -> Result<Box<dyn Read + '_>, StoreError>;
}

/// Compute the `sha256:<hex>` content digest of a byte slice.
pub fn content_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Whether a lookup key matches an image's ID, as a whole or as a hex
/// prefix of at least the short-ID length.
fn id_matches(id: &str, key: &str) -> bool {
    id == key
        || (key.len() >= SHORT_ID_LEN
            && key.bytes().all(|b| b.is_ascii_hexdigit())
            && id.starts_with(key))
}

/// Whether a lookup key matches one of an image's names, treating a
/// tagless key as `key:latest`.
fn name_matches(names: &[String], key: &str) -> bool {
    names.iter().any(|name| {
        name == key
            || name
                .strip_suffix(":latest")
                .is_some_and(|untagged| untagged == key)
    })
}

// The on-disk metadata record, one JSON document per image under
// `images/`. Manifest and config bytes live in the blob area and are
// referenced by digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageMeta {
    id: String,
    names: Vec<String>,
    manifest_digest: String,
    config_digest: String,
    layers: Vec<BlobDescriptor>,
}

/// A short listing entry for one stored image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    /// The image ID.
    pub id: String,
    /// Names the image is known under.
    pub names: Vec<String>,
}

/// Read-only view over the daemon's on-disk store layout:
/// `blobs/sha256/<hex>` for content and `images/<id>.json` metadata.
#[derive(Debug)]
pub struct FsStore {
    root: Utf8PathBuf,
}

impl FsStore {
    /// Open the store rooted at `root`.
    pub fn open(root: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.join("images").is_dir() {
            return Err(StoreError::NotInitialized(root.as_str().into()));
        }
        Ok(Self { root })
    }

    fn blob_path(&self, digest: &str) -> Utf8PathBuf {
        let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        self.root.join("blobs").join("sha256").join(hex)
    }

    fn read_blob_bytes(&self, digest: &str) -> Result<Vec<u8>, StoreError> {
        std::fs::read(self.blob_path(digest))
            .map_err(|_| StoreError::BlobNotFound(digest.into()))
    }

    fn metas(&self) -> Result<Vec<ImageMeta>, StoreError> {
        let mut metas = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(self.root.join("images"))?
            .collect::<Result<Vec<_>, _>>()?;
        // Directory order is not stable; keep listings deterministic.
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                let contents = std::fs::read(&path)?;
                metas.push(serde_json::from_slice(&contents)?);
            }
        }
        Ok(metas)
    }

    /// List the stored images.
    pub fn list(&self) -> Result<Vec<ImageSummary>, StoreError> {
        Ok(self
            .metas()?
            .into_iter()
            .map(|meta| ImageSummary {
                id: meta.id,
                names: meta.names,
            })
            .collect())
    }

    fn load_record(&self, meta: ImageMeta) -> Result<ImageRecord, StoreError> {
        let manifest = self.read_blob_bytes(&meta.manifest_digest)?;
        let config = self.read_blob_bytes(&meta.config_digest)?;
        Ok(ImageRecord {
            id: meta.id,
            names: meta.names,
            manifest,
            config,
            layers: meta.layers,
        })
    }
}

impl ContentStore for FsStore {
    fn lookup(&self, key: &str) -> Result<ImageRecord, StoreError> {
        for meta in self.metas()? {
            if id_matches(&meta.id, key) || name_matches(&meta.names, key) {
                return self.load_record(meta);
            }
        }
        Err(StoreError::NotFound(key.into()))
    }

    fn read_blob(&self, digest: &str) -> Result<Box<dyn Read + '_>, StoreError> {
        let file = std::fs::File::open(self.blob_path(digest))
            .map_err(|_| StoreError::BlobNotFound(digest.into()))?;
        Ok(Box::new(file))
    }
}

/// An in-memory store, the reference implementation used by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    images: Vec<ImageRecord>,
    blobs: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a blob, returning its content digest.
    pub fn put_blob(&mut self, bytes: &[u8]) -> String {
        let digest = content_digest(bytes);
        self.blobs.insert(digest.clone(), bytes.to_vec());
        digest
    }

    /// Insert an image record.
    pub fn put_image(&mut self, record: ImageRecord) {
        self.images.push(record);
    }
}

impl ContentStore for MemoryStore {
    fn lookup(&self, key: &str) -> Result<ImageRecord, StoreError> {
        self.images
            .iter()
            .find(|record| id_matches(&record.id, key) || name_matches(&record.names, key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.into()))
    }

    fn read_blob(&self, digest: &str) -> Result<Box<dyn Read + '_>, StoreError> {
        let bytes = self
            .blobs
            .get(digest)
            .ok_or_else(|| StoreError::BlobNotFound(digest.into()))?;
        Ok(Box::new(bytes.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: &str, name: &str) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            names: vec![name.to_string()],
            manifest: b"{}".to_vec(),
            config: b"{}".to_vec(),
            layers: Vec::new(),
        }
    }

    #[test]
    fn test_content_digest() {
        // Stable and prefixed.
        let digest = content_digest(b"layer content data");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest.len(), "sha256:".len() + 64);
        assert_eq!(digest, content_digest(b"layer content data"));
    }

    #[test]
    fn test_memory_store_lookup_by_name_and_id() {
        let id = "38b993607bcabe01df1dffdf01b329005c6a10a36d557f9d073fc25943840c66";
        let mut store = MemoryStore::new();
        store.put_image(sample_record(id, "localhost/app:latest"));

        assert!(store.lookup("localhost/app:latest").is_ok());
        // A tagless name implies :latest.
        assert!(store.lookup("localhost/app").is_ok());
        assert!(store.lookup(id).is_ok());
        // Short-ID prefix.
        assert!(store.lookup(&id[..SHORT_ID_LEN]).is_ok());
        // Too-short prefixes do not match.
        assert!(store.lookup(&id[..6]).is_err());
        assert!(matches!(
            store.lookup("unknown"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_memory_store_blobs() {
        let mut store = MemoryStore::new();
        let digest = store.put_blob(b"hello");
        let mut reader = store.read_blob(&digest).unwrap();
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"hello");
        assert!(matches!(
            store.read_blob("sha256:0000"),
            Err(StoreError::BlobNotFound(_))
        ));
    }

    #[test]
    fn test_fs_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        std::fs::create_dir_all(root.join("blobs/sha256")).unwrap();
        std::fs::create_dir_all(root.join("images")).unwrap();

        let write_blob = |bytes: &[u8]| -> String {
            let digest = content_digest(bytes);
            let hex = digest.strip_prefix("sha256:").unwrap();
            std::fs::write(root.join("blobs/sha256").join(hex), bytes).unwrap();
            digest
        };
        let layer = write_blob(b"layer bytes");
        let config = write_blob(b"{\"os\":\"linux\"}");
        let manifest = write_blob(b"{\"schemaVersion\":2}");

        let meta = ImageMeta {
            id: "0f5207208d2b9103e7e13b4a9abd1d7b0c6a338d0f4a1c30c53086d4c4b64b2c".into(),
            names: vec!["localhost/app:latest".into()],
            manifest_digest: manifest,
            config_digest: config,
            layers: vec![BlobDescriptor {
                digest: layer.clone(),
                size: b"layer bytes".len() as u64,
                media_type: "application/vnd.oci.image.layer.v1.tar".into(),
            }],
        };
        std::fs::write(
            root.join("images").join(format!("{}.json", meta.id)),
            serde_json::to_vec(&meta).unwrap(),
        )
        .unwrap();

        let store = FsStore::open(root.to_owned()).unwrap();
        let record = store.lookup("localhost/app").unwrap();
        assert_eq!(record.manifest, b"{\"schemaVersion\":2}");
        assert_eq!(record.config, b"{\"os\":\"linux\"}");
        assert_eq!(record.layers.len(), 1);

        let listing = store.list().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].names, vec!["localhost/app:latest".to_string()]);

        let mut contents = Vec::new();
        store
            .read_blob(&layer)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(contents, b"layer bytes");
    }

    #[test]
    fn test_fs_store_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        assert!(FsStore::open(root.join("nope")).is_err());
    }
}
