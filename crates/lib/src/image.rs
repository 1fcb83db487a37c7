//! Locating images in the content store from user-supplied names.
//!
//! A request may name an image by ID (full or short), by a
//! transport-qualified reference, or by a bare name that first has to be
//! qualified against the configured registries. Candidate probing here is
//! against the local store only; contacting registries is the registry
//! client's job, later and elsewhere.

use crate::reference::ParsedReference;
use crate::registries::RegistryConfig;
use crate::save::{SaveError, SaveUnit};
use crate::store::{ContentStore, SHORT_ID_LEN, StoreError};
use crate::transport::{NameClass, classify};

/// Whether a request is plausibly an image ID rather than a reference.
fn looks_like_image_id(name: &str) -> bool {
    name.len() >= SHORT_ID_LEN
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn lookup_failed(image: &str, source: StoreError) -> SaveError {
    SaveError::StoreLookup {
        image: image.into(),
        source,
    }
}

/// Resolve one requested image to the store key it is saved under.
///
/// IDs bypass the reference grammar; qualified references are looked up
/// directly; bare names are qualified via the registry search list and
/// probed in candidate order, first hit winning.
pub fn find_image(
    store: &dyn ContentStore,
    registries: &RegistryConfig,
    name: &str,
) -> Result<SaveUnit, SaveError> {
    if looks_like_image_id(name) {
        let record = store.lookup(name).map_err(|e| lookup_failed(name, e))?;
        return Ok(SaveUnit {
            request: name.to_string(),
            reference: record.id,
        });
    }

    let parsed = ParsedReference::parse(name)?;
    match classify(&parsed) {
        NameClass::Qualified(_) => {
            let qualified = parsed.to_string();
            store
                .lookup(&qualified)
                .map_err(|e| lookup_failed(name, e))?;
            Ok(SaveUnit {
                request: name.to_string(),
                reference: qualified,
            })
        }
        NameClass::Ambiguous => {
            let resolution = registries.resolve(&parsed);
            if resolution.transport.is_none() {
                return Err(SaveError::ResolutionFailed(name.into()));
            }
            for candidate in &resolution.candidates {
                match store.lookup(&candidate.name) {
                    Ok(_) => {
                        tracing::debug!(image = name, reference = %candidate.name, "resolved image");
                        return Ok(SaveUnit {
                            request: name.to_string(),
                            reference: candidate.name.clone(),
                        });
                    }
                    Err(StoreError::NotFound(_)) => continue,
                    Err(e) => return Err(lookup_failed(name, e)),
                }
            }
            Err(lookup_failed(name, StoreError::NotFound(name.into())))
        }
    }
}
