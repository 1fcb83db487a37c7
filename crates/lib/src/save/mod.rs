//! Saving images to local archives.
//!
//! A save request is validated up front ([`SaveOptions::check`]), resolved
//! image by image into [`SaveUnit`]s, and then serialized by the
//! [`export::ExportEngine`] — either into a single archive, or, in
//! separated mode, into a base/library bundle pair plus a rename mapping
//! (see [`separated`]).

pub mod export;
pub mod separated;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::image;
use crate::reference::{ParsedReference, ReferenceError};
use crate::registries::RegistryConfig;
use crate::store::{ContentStore, StoreError};
use crate::transport::Transport;
use export::{ArchiveFormat, ExportEngine};

/// Default output directory of a separated save.
pub const DEFAULT_SEP_DEST: &str = "Images";
/// Default name of the separated-save rename mapping file.
pub const DEFAULT_RENAME_FILE: &str = "rename.json";

/// Errors from validating or executing a save request.
///
/// Every variant is local to one request; none of them is fatal to the
/// daemon, and none is retried automatically.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SaveError {
    /// The request named no images.
    #[error("save accepts at least one image")]
    NoImagesSpecified,
    /// Neither an output path nor a separated-save destination was given.
    #[error("output path(-o) should not be empty")]
    MissingDestination,
    /// Both an output path and a separated-save destination were given.
    #[error("output path(-o) conflicts with separated save options")]
    ConflictingDestination,
    /// The output path contains a `:`, which is reserved as the
    /// reference tag separator.
    #[error("colon in path {0} is not allowed")]
    PathContainsColon(Utf8PathBuf),
    /// The output path or separated-save destination already exists.
    #[error("output file already exist: {0}")]
    DestinationExists(Utf8PathBuf),
    /// The requested format is not an archive-capable transport.
    #[error("wrong image format: {0}")]
    UnsupportedFormat(Box<str>),
    /// More than one image was requested in an OCI layout format.
    #[error("oci image format now only supports saving single image")]
    MultiImageNotSupported,
    /// Separated save was requested without a base image name.
    #[error("base image name(-b) should not be empty")]
    MissingBaseImage,
    /// The base and library image names are identical.
    #[error("base image and lib image must be distinct: {0}")]
    DuplicateBaseAndLib(Box<str>),
    /// A supplied image name failed the reference grammar.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    /// A bare name could not be resolved: no registries are configured.
    #[error("no registries configured to resolve image {0}")]
    ResolutionFailed(Box<str>),
    /// An image was not found or unreadable in the content store.
    #[error("failed to save image {image}")]
    StoreLookup {
        /// The image as the user requested it.
        image: Box<str>,
        #[source]
        source: StoreError,
    },
    /// The operation was cancelled or failed partway; no artifact was
    /// left at the final destination.
    #[error("save aborted, no archive was written")]
    PartialWriteAborted,
    /// Archive I/O failure.
    #[error("writing archive: {0}")]
    Io(#[from] std::io::Error),
    /// Manifest encoding failure.
    #[error("encoding manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Options for one save request, owned exclusively by that request.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Images to save, in order.
    pub images: Vec<String>,
    /// Destination archive path; empty in separated mode.
    pub path: Utf8PathBuf,
    /// Requested format, one of the transport names.
    pub format: String,
    /// Separated-save sub-options, mutually exclusive with `path`.
    pub separator: Option<SeparatorOption>,
}

/// Sub-options of a separated save.
#[derive(Debug, Clone, Default)]
pub struct SeparatorOption {
    /// Name of the designated base image.
    pub base_image: String,
    /// Name of the designated library image, if any.
    pub lib_image: String,
    /// Name of the rename mapping file; defaults to
    /// [`DEFAULT_RENAME_FILE`].
    pub rename_file: String,
    /// Output directory; defaults to [`DEFAULT_SEP_DEST`]. Must not
    /// already exist.
    pub dest_path: Utf8PathBuf,
}

impl SeparatorOption {
    /// The effective output directory.
    pub fn dest(&self) -> Utf8PathBuf {
        if self.dest_path.as_str().is_empty() {
            Utf8PathBuf::from(DEFAULT_SEP_DEST)
        } else {
            self.dest_path.clone()
        }
    }

    /// The effective rename mapping file name.
    pub fn rename(&self) -> &str {
        if self.rename_file.is_empty() {
            DEFAULT_RENAME_FILE
        } else {
            &self.rename_file
        }
    }
}

impl SaveOptions {
    /// Validate the request before any store access. Checks run in a
    /// fixed order and the first failure wins; the only I/O performed is
    /// local existence probing of the destinations.
    pub fn check(&self) -> Result<(), SaveError> {
        if self.images.is_empty() {
            return Err(SaveError::NoImagesSpecified);
        }

        let has_path = !self.path.as_str().is_empty();
        match (&self.separator, has_path) {
            (Some(_), true) => return Err(SaveError::ConflictingDestination),
            (None, false) => return Err(SaveError::MissingDestination),
            _ => {}
        }

        if has_path {
            if self.path.as_str().contains(':') {
                return Err(SaveError::PathContainsColon(self.path.clone()));
            }
            if self.path.exists() {
                return Err(SaveError::DestinationExists(self.path.clone()));
            }
        }

        let format = self.archive_format()?;
        if format.single_image_only() && self.images.len() > 1 {
            return Err(SaveError::MultiImageNotSupported);
        }

        if let Some(sep) = &self.separator {
            if sep.base_image.is_empty() {
                return Err(SaveError::MissingBaseImage);
            }
            ParsedReference::parse(&sep.base_image)?;
            if !sep.lib_image.is_empty() {
                ParsedReference::parse(&sep.lib_image)?;
                if sep.base_image == sep.lib_image {
                    return Err(SaveError::DuplicateBaseAndLib(
                        sep.base_image.clone().into(),
                    ));
                }
            }
            let dest = sep.dest();
            if dest.exists() {
                return Err(SaveError::DestinationExists(dest));
            }
        }

        Ok(())
    }

    /// Map the requested format onto an archive serialization strategy.
    pub fn archive_format(&self) -> Result<ArchiveFormat, SaveError> {
        let unsupported = || SaveError::UnsupportedFormat(self.format.clone().into());
        let transport = Transport::try_from(self.format.as_str()).map_err(|_| unsupported())?;
        ArchiveFormat::from_transport(transport).ok_or_else(unsupported)
    }
}

/// One resolved unit of export work: the user's request paired with the
/// store key it resolved to. Derived per request and discarded when the
/// export finishes or aborts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveUnit {
    /// The image exactly as the user named it.
    pub request: String,
    /// The fully qualified reference or image ID used for store lookup.
    pub reference: String,
}

/// Execute a save request against the given store and registry
/// configuration. `cancel` is polled between images and between blob
/// writes; cancellation leaves nothing at the destination.
pub fn run_save(
    store: &dyn ContentStore,
    registries: &RegistryConfig,
    opts: &SaveOptions,
    cancel: &CancellationToken,
) -> Result<(), SaveError> {
    opts.check()?;
    let format = opts.archive_format()?;
    let units = resolve_units(store, registries, &opts.images, cancel)?;
    match &opts.separator {
        Some(sep) => separated::run_separated(store, sep, &units, format, cancel),
        None => {
            tracing::info!(images = units.len(), path = %opts.path, "saving images");
            ExportEngine::new(store, format, cancel.clone()).export(&units, &opts.path)
        }
    }
}

/// Resolve every requested image to a [`SaveUnit`], in request order.
fn resolve_units(
    store: &dyn ContentStore,
    registries: &RegistryConfig,
    images: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<SaveUnit>, SaveError> {
    let mut units = Vec::with_capacity(images.len());
    for image in images {
        if cancel.is_cancelled() {
            return Err(SaveError::PartialWriteAborted);
        }
        units.push(image::find_image(store, registries, image)?);
    }
    Ok(units)
}
