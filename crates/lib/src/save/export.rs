//! Serialization of resolved images into archive formats.
//!
//! Both supported layouts share one blob/manifest discipline: blobs are
//! written under `blobs/sha256/<hex>` keyed by content digest, each digest
//! at most once per archive, and the manifest documents that reference
//! them are written only after every referenced blob. The archive is
//! staged at a temporary path and renamed into place on full success, so
//! the destination never holds a partial artifact.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use camino::Utf8Path;
use serde::Serialize;
use tar::{Builder, Header};
use tokio_util::sync::CancellationToken;

use crate::save::{SaveError, SaveUnit};
use crate::store::{BlobDescriptor, ContentStore, ImageRecord, content_digest};
use crate::transport::Transport;

const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Serialization strategy, selected from the requested transport.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Docker archive tarball: blobs plus a trailing `manifest.json`.
    DockerArchive,
    /// OCI image layout tarball: blobs plus `oci-layout` and `index.json`.
    OciArchive,
}

impl ArchiveFormat {
    /// Map an archive-capable transport onto its strategy; `None` for
    /// transports that cannot be written as a local archive.
    pub fn from_transport(transport: Transport) -> Option<Self> {
        match transport {
            Transport::Docker | Transport::DockerArchive => Some(Self::DockerArchive),
            Transport::Oci | Transport::OciArchive => Some(Self::OciArchive),
            Transport::DockerDaemon | Transport::Isulad | Transport::Manifest => None,
        }
    }

    /// The OCI layout has no container for more than one top-level image.
    pub fn single_image_only(self) -> bool {
        matches!(self, Self::OciArchive)
    }
}

// manifest.json entry of the docker archive format.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DockerManifestEntry {
    config: String,
    repo_tags: Vec<String>,
    layers: Vec<String>,
}

// The `oci-layout` version marker file.
#[derive(Debug, Serialize)]
struct OciLayout {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: &'static str,
}

impl Default for OciLayout {
    fn default() -> Self {
        Self {
            image_layout_version: "1.0.0",
        }
    }
}

#[derive(Debug, Serialize)]
struct OciIndex {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "mediaType")]
    media_type: &'static str,
    manifests: Vec<OciDescriptor>,
}

#[derive(Debug, Serialize)]
struct OciDescriptor {
    #[serde(rename = "mediaType")]
    media_type: &'static str,
    digest: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    annotations: Option<BTreeMap<String, String>>,
}

/// The archive-internal path of a blob.
fn blob_path(digest: &str) -> String {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    format!("blobs/sha256/{hex}")
}

// Fixed header fields keep archive bytes deterministic across runs.
fn plain_header(size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(0);
    header
}

fn append_file<W: Write>(
    builder: &mut Builder<W>,
    path: &str,
    data: &[u8],
) -> Result<(), SaveError> {
    let mut header = plain_header(data.len() as u64);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Drives serialization of one save operation. Owns the set of digests
/// already written to this archive; the set lives exactly as long as the
/// export call and is never shared between operations.
pub struct ExportEngine<'a> {
    store: &'a dyn ContentStore,
    format: ArchiveFormat,
    cancel: CancellationToken,
    written: BTreeSet<String>,
}

impl<'a> ExportEngine<'a> {
    /// Create an engine for one export against `store`.
    pub fn new(store: &'a dyn ContentStore, format: ArchiveFormat, cancel: CancellationToken) -> Self {
        Self {
            store,
            format,
            cancel,
            written: BTreeSet::new(),
        }
    }

    /// Serialize `units`, strictly in input order, into an archive at
    /// `dest`. The first failing unit aborts the whole export; on any
    /// failure (including cancellation) nothing is left at `dest`.
    pub fn export(mut self, units: &[SaveUnit], dest: &Utf8Path) -> Result<(), SaveError> {
        let parent = match dest.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let staged = tempfile::Builder::new()
            .prefix(".save-")
            .tempfile_in(parent)?;
        let mut builder = Builder::new(staged);

        match self.format {
            ArchiveFormat::DockerArchive => self.write_docker(&mut builder, units)?,
            ArchiveFormat::OciArchive => self.write_oci(&mut builder, units)?,
        }

        let staged = builder.into_inner()?;
        staged.persist(dest).map_err(|e| SaveError::Io(e.error))?;
        tracing::info!(images = units.len(), archive = %dest, "export complete");
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), SaveError> {
        if self.cancel.is_cancelled() {
            return Err(SaveError::PartialWriteAborted);
        }
        Ok(())
    }

    fn lookup_unit(&self, unit: &SaveUnit) -> Result<ImageRecord, SaveError> {
        self.store
            .lookup(&unit.reference)
            .map_err(|source| SaveError::StoreLookup {
                image: unit.request.clone().into(),
                source,
            })
    }

    /// Write a blob held in memory, unless this archive already has it.
    fn write_blob_bytes<W: Write>(
        &mut self,
        builder: &mut Builder<W>,
        digest: &str,
        bytes: &[u8],
    ) -> Result<(), SaveError> {
        if !self.written.insert(digest.to_string()) {
            tracing::debug!(digest, "blob already in archive, skipping");
            return Ok(());
        }
        append_file(builder, &blob_path(digest), bytes)
    }

    /// Stream a layer blob out of the store, unless this archive already
    /// has it.
    fn write_layer<W: Write>(
        &mut self,
        builder: &mut Builder<W>,
        unit: &SaveUnit,
        layer: &BlobDescriptor,
    ) -> Result<(), SaveError> {
        if !self.written.insert(layer.digest.clone()) {
            tracing::debug!(digest = %layer.digest, "blob already in archive, skipping");
            return Ok(());
        }
        let reader = self
            .store
            .read_blob(&layer.digest)
            .map_err(|source| SaveError::StoreLookup {
                image: unit.request.clone().into(),
                source,
            })?;
        let mut header = plain_header(layer.size);
        builder.append_data(&mut header, blob_path(&layer.digest), reader)?;
        Ok(())
    }

    fn write_docker<W: Write>(
        &mut self,
        builder: &mut Builder<W>,
        units: &[SaveUnit],
    ) -> Result<(), SaveError> {
        let mut entries = Vec::with_capacity(units.len());
        for unit in units {
            self.check_cancelled()?;
            let record = self.lookup_unit(unit)?;
            let config_digest = content_digest(&record.config);
            self.write_blob_bytes(builder, &config_digest, &record.config)?;
            let mut layers = Vec::with_capacity(record.layers.len());
            for layer in &record.layers {
                self.check_cancelled()?;
                self.write_layer(builder, unit, layer)?;
                layers.push(blob_path(&layer.digest));
            }
            // Units looked up by bare ID have no name to record.
            let repo_tags = if unit.reference == record.id {
                Vec::new()
            } else {
                vec![unit.reference.clone()]
            };
            entries.push(DockerManifestEntry {
                config: blob_path(&config_digest),
                repo_tags,
                layers,
            });
        }
        // The manifest goes last: a reader never observes it referencing
        // a blob that is not already present.
        let bytes = serde_json::to_vec_pretty(&entries)?;
        append_file(builder, "manifest.json", &bytes)
    }

    fn write_oci<W: Write>(
        &mut self,
        builder: &mut Builder<W>,
        units: &[SaveUnit],
    ) -> Result<(), SaveError> {
        let mut manifests = Vec::with_capacity(units.len());
        for unit in units {
            self.check_cancelled()?;
            let record = self.lookup_unit(unit)?;
            let config_digest = content_digest(&record.config);
            self.write_blob_bytes(builder, &config_digest, &record.config)?;
            for layer in &record.layers {
                self.check_cancelled()?;
                self.write_layer(builder, unit, layer)?;
            }
            let manifest_digest = content_digest(&record.manifest);
            self.write_blob_bytes(builder, &manifest_digest, &record.manifest)?;
            let annotations = (unit.reference != record.id).then(|| {
                BTreeMap::from([(ANNOTATION_REF_NAME.to_string(), unit.reference.clone())])
            });
            manifests.push(OciDescriptor {
                media_type: MEDIA_TYPE_OCI_MANIFEST,
                digest: manifest_digest,
                size: record.manifest.len() as u64,
                annotations,
            });
        }
        // Index and layout marker last, after every referenced blob.
        let layout = serde_json::to_vec(&OciLayout::default())?;
        append_file(builder, "oci-layout", &layout)?;
        let index = OciIndex {
            schema_version: 2,
            media_type: MEDIA_TYPE_OCI_INDEX,
            manifests,
        };
        let bytes = serde_json::to_vec_pretty(&index)?;
        append_file(builder, "index.json", &bytes)
    }
}
