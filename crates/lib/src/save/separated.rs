//! Separated save: a base/library bundle pair plus a rename mapping.
//!
//! Every requested image lands in exactly one bundle: images matching the
//! designated base name form the base bundle, everything else defaults to
//! the library bundle. The two archives and the mapping file appear under
//! the destination directory together or not at all.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::reference::ParsedReference;
use crate::save::{SaveError, SaveUnit, SeparatorOption};
use crate::save::export::{ArchiveFormat, ExportEngine};
use crate::store::ContentStore;

/// Archive name of the base bundle.
pub const BASE_BUNDLE_ARCHIVE: &str = "base_images.tar";
/// Archive name of the library bundle.
pub const LIB_BUNDLE_ARCHIVE: &str = "lib_images.tar";

/// Which bundle an image was placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bundle {
    /// The designated base image bundle.
    Base,
    /// Everything else.
    Lib,
}

/// One record of the rename mapping: where a requested image ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameEntry {
    /// The image as the user requested it.
    pub image: String,
    /// The bundle it was placed in.
    pub bundle: Bundle,
    /// The name it is recorded under inside the bundle's archive.
    pub name: String,
}

/// The mapping document written next to the bundle archives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameMapping {
    /// One entry per requested image, in request order.
    pub images: Vec<RenameEntry>,
}

/// The two bundles plus the mapping, before any archive is written.
#[derive(Debug)]
pub(crate) struct Partition {
    pub(crate) base: Vec<SaveUnit>,
    pub(crate) lib: Vec<SaveUnit>,
    pub(crate) mapping: RenameMapping,
}

/// Whether a requested name designates the same image as `target`,
/// comparing the repository path (and registry, when both sides name
/// one) while ignoring tags.
fn matches_name(request: &str, target: &ParsedReference) -> bool {
    let Ok(parsed) = ParsedReference::parse(request) else {
        // IDs and other non-reference keys never match a name.
        return false;
    };
    if parsed.repository() != target.repository() {
        return false;
    }
    match (parsed.registry(), target.registry()) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Split resolved units into the base and library bundles and build the
/// rename mapping. Every unit is classified; there is no third outcome.
pub(crate) fn partition(units: &[SaveUnit], base: &ParsedReference) -> Partition {
    let mut result = Partition {
        base: Vec::new(),
        lib: Vec::new(),
        mapping: RenameMapping::default(),
    };
    for unit in units {
        let bundle = if matches_name(&unit.request, base) {
            result.base.push(unit.clone());
            Bundle::Base
        } else {
            result.lib.push(unit.clone());
            Bundle::Lib
        };
        result.mapping.images.push(RenameEntry {
            image: unit.request.clone(),
            bundle,
            name: unit.reference.clone(),
        });
    }
    result
}

/// Export the two bundles under the destination directory and write the
/// rename mapping once both archives exist. Any failure removes the whole
/// destination, so an inconsistent pair of archives plus mapping can
/// never be observed.
pub(crate) fn run_separated(
    store: &dyn ContentStore,
    sep: &SeparatorOption,
    units: &[SaveUnit],
    format: ArchiveFormat,
    cancel: &CancellationToken,
) -> Result<(), SaveError> {
    // Validated upstream; parse again to classify against.
    let base = ParsedReference::parse(&sep.base_image)?;
    let dest = sep.dest();
    std::fs::create_dir_all(&dest)?;

    let result = write_bundles(store, &dest, sep.rename(), &base, units, format, cancel);
    if result.is_err() {
        let _ = std::fs::remove_dir_all(&dest);
    }
    result
}

fn write_bundles(
    store: &dyn ContentStore,
    dest: &Utf8Path,
    rename_file: &str,
    base: &ParsedReference,
    units: &[SaveUnit],
    format: ArchiveFormat,
    cancel: &CancellationToken,
) -> Result<(), SaveError> {
    let partition = partition(units, base);
    tracing::info!(
        base = partition.base.len(),
        lib = partition.lib.len(),
        dest = %dest,
        "separated save"
    );

    ExportEngine::new(store, format, cancel.clone())
        .export(&partition.base, &dest.join(BASE_BUNDLE_ARCHIVE))?;
    ExportEngine::new(store, format, cancel.clone())
        .export(&partition.lib, &dest.join(LIB_BUNDLE_ARCHIVE))?;

    let bytes = serde_json::to_vec_pretty(&partition.mapping)?;
    std::fs::write(dest.join(rename_file), bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::registries::RegistryConfig;
    use crate::save::export::tests::put_test_image;
    use crate::save::{SaveOptions, run_save};
    use crate::store::MemoryStore;

    fn parsed(name: &str) -> ParsedReference {
        ParsedReference::parse(name).unwrap()
    }

    fn unit(request: &str, reference: &str) -> SaveUnit {
        SaveUnit {
            request: request.to_string(),
            reference: reference.to_string(),
        }
    }

    #[test]
    fn test_partition_classification() {
        let units = [
            unit("base:latest", "localhost/base:latest"),
            unit("app:latest", "localhost/app:latest"),
            unit("localhost/base:1.0", "localhost/base:1.0"),
        ];
        let result = partition(&units, &parsed("base"));
        assert_eq!(result.base.len(), 2);
        assert_eq!(result.lib.len(), 1);
        assert_eq!(result.mapping.images.len(), 3);
        assert_eq!(result.mapping.images[0].bundle, Bundle::Base);
        assert_eq!(result.mapping.images[1].bundle, Bundle::Lib);
        assert_eq!(result.mapping.images[2].bundle, Bundle::Base);
        assert_eq!(result.mapping.images[1].name, "localhost/app:latest");
    }

    #[test]
    fn test_partition_defaults_to_lib() {
        // Nothing matching the base name still yields a full mapping;
        // there is no unclassified outcome.
        let units = [
            unit("app:latest", "localhost/app:latest"),
            // Bare IDs never match a name.
            unit(
                "38b993607bcabe01df1dffdf01b329005c6a10a36d557f9d073fc25943840c66",
                "38b993607bcabe01df1dffdf01b329005c6a10a36d557f9d073fc25943840c66",
            ),
        ];
        let result = partition(&units, &parsed("base"));
        assert!(result.base.is_empty());
        assert_eq!(result.lib.len(), 2);
        assert!(result.mapping.images.iter().all(|e| e.bundle == Bundle::Lib));
    }

    #[test]
    fn test_partition_respects_registry_qualification() {
        let units = [
            unit("docker.io/base:latest", "docker.io/base:latest"),
            unit("quay.io/base:latest", "quay.io/base:latest"),
        ];
        // A registry-qualified base name only claims its own registry.
        let result = partition(&units, &parsed("docker.io/base"));
        assert_eq!(result.base.len(), 1);
        assert_eq!(result.lib.len(), 1);
        // A bare base name claims any qualification of the repository.
        let result = partition(&units, &parsed("base"));
        assert_eq!(result.base.len(), 2);
    }

    fn separated_opts(dest: &Utf8Path) -> SaveOptions {
        SaveOptions {
            images: vec!["base:latest".into(), "app:latest".into()],
            format: "docker".into(),
            separator: Some(SeparatorOption {
                base_image: "base".into(),
                lib_image: "app".into(),
                rename_file: "rename.json".into(),
                dest_path: dest.to_owned(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_separated_save_produces_bundles_and_mapping() {
        let mut store = MemoryStore::new();
        let shared: &[u8] = b"shared layer";
        put_test_image(&mut store, "localhost/base:latest", &[shared]);
        put_test_image(&mut store, "localhost/app:latest", &[shared, b"app layer"]);
        let registries = RegistryConfig {
            search: vec!["docker.io".into()],
            ..Default::default()
        };

        let tmp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(tmp.path().join("Images")).unwrap();
        run_save(
            &store,
            &registries,
            &separated_opts(&dest),
            &CancellationToken::new(),
        )
        .unwrap();

        // Exactly two archives plus the mapping file.
        assert!(dest.join(BASE_BUNDLE_ARCHIVE).is_file());
        assert!(dest.join(LIB_BUNDLE_ARCHIVE).is_file());
        let mapping: RenameMapping =
            serde_json::from_slice(&std::fs::read(dest.join("rename.json")).unwrap()).unwrap();
        assert_eq!(mapping.images.len(), 2);
        assert_eq!(mapping.images[0].bundle, Bundle::Base);
        assert_eq!(mapping.images[0].name, "localhost/base:latest");
        assert_eq!(mapping.images[1].bundle, Bundle::Lib);
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 3);
    }

    #[test]
    fn test_separated_save_failure_removes_destination() {
        use crate::store::{BlobDescriptor, ImageRecord};

        let mut store = MemoryStore::new();
        put_test_image(&mut store, "localhost/base:latest", &[b"layer"]);
        // "app" resolves, but its layer blob is missing from the store,
        // so the lib bundle export fails after the base archive was
        // already written.
        store.put_image(ImageRecord {
            id: "0f5207208d2b9103e7e13b4a9abd1d7b0c6a338d0f4a1c30c53086d4c4b64b2c".into(),
            names: vec!["localhost/app:latest".into()],
            manifest: b"{}".to_vec(),
            config: b"{}".to_vec(),
            layers: vec![BlobDescriptor {
                digest: "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
                    .into(),
                size: 5,
                media_type: "application/vnd.oci.image.layer.v1.tar".into(),
            }],
        });
        let registries = RegistryConfig {
            search: vec!["docker.io".into()],
            ..Default::default()
        };

        let tmp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(tmp.path().join("Images")).unwrap();
        let err = run_save(
            &store,
            &registries,
            &separated_opts(&dest),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to save image app"), "{err}");
        // The base archive that had already been written is gone too.
        assert!(!dest.exists());
    }

    #[test]
    fn test_separated_save_missing_image_fails_before_destination() {
        let mut store = MemoryStore::new();
        put_test_image(&mut store, "localhost/base:latest", &[b"layer"]);
        let registries = RegistryConfig {
            search: vec!["docker.io".into()],
            ..Default::default()
        };

        let tmp = tempfile::tempdir().unwrap();
        let dest = Utf8PathBuf::from_path_buf(tmp.path().join("Images")).unwrap();
        let err = run_save(
            &store,
            &registries,
            &separated_opts(&dest),
            &CancellationToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("failed to save image app"), "{err}");
        assert!(!dest.exists());
    }
}
