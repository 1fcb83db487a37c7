//! Registry configuration and resolution of bare image names.
//!
//! The daemon loads `registries.toml` once at startup; resolution calls
//! receive the configuration as an explicit, read-only dependency.
//! Candidate generation here is purely textual: no registry is contacted,
//! and blocked hosts are still emitted (flagged) because blocking is
//! enforced by the registry client at actual network access.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use camino::Utf8Path;
use serde::Deserialize;

use crate::reference::ParsedReference;
use crate::transport::Transport;

/// The registry candidate always consulted first for a bare name.
pub const LOCAL_REGISTRY: &str = "localhost";

/// Process-wide registry configuration: ordered search list plus the
/// insecure and blocked host sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Hosts consulted, in order, to qualify bare names.
    pub search: Vec<String>,
    /// Hosts reachable without TLS verification.
    pub insecure: BTreeSet<String>,
    /// Hosts that must not be contacted.
    pub block: BTreeSet<String>,
}

// On-disk shape:
//
//   [registries.search]
//   registries = ['docker.io']
//   [registries.insecure]
//   registries = []
//   [registries.block]
//   registries = []
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RegistriesFile {
    registries: RegistriesSections,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RegistriesSections {
    search: RegistryList,
    insecure: RegistryList,
    block: RegistryList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RegistryList {
    registries: Vec<String>,
}

impl RegistryConfig {
    /// Load the configuration from a TOML file. A missing file is not an
    /// error; it yields the empty configuration.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Reading {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Parsing {path}"))
    }

    /// Parse the configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: RegistriesFile = toml::from_str(contents)?;
        Ok(Self {
            search: file.registries.search.registries,
            insecure: file.registries.insecure.registries.into_iter().collect(),
            block: file.registries.block.registries.into_iter().collect(),
        })
    }

    /// Generate the ordered, fully-qualified candidates for a bare name.
    ///
    /// `localhost/<name>` always leads, followed by one candidate per
    /// configured search host in configuration order. An empty search
    /// list produces no candidates and no transport; callers must treat
    /// that as a resolution failure rather than a silent default.
    pub fn resolve(&self, bare: &ParsedReference) -> Resolution {
        if self.search.is_empty() {
            return Resolution::default();
        }
        let mut candidates = Vec::with_capacity(self.search.len() + 1);
        {
            let mut push = |host: &str| {
                candidates.push(Candidate {
                    name: format!("{host}/{bare}"),
                    insecure: self.insecure.contains(host),
                    blocked: self.block.contains(host),
                });
            };
            push(LOCAL_REGISTRY);
            for host in &self.search {
                if host != LOCAL_REGISTRY {
                    push(host);
                }
            }
        }
        Resolution {
            candidates,
            transport: Some(Transport::Docker),
        }
    }
}

/// One fully-qualified candidate for a bare name, annotated with the
/// host's membership in the insecure and blocked sets for use by the
/// registry client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// The qualified reference string, `host/repository:tag`.
    pub name: String,
    /// The host is configured insecure.
    pub insecure: bool,
    /// The host is configured blocked.
    pub blocked: bool,
}

/// Output of [`RegistryConfig::resolve`]. `transport` is `None` exactly
/// when the candidate list is empty.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Qualified candidates, in resolution priority order.
    pub candidates: Vec<Candidate>,
    /// The transport the candidates speak, once any exist.
    pub transport: Option<Transport>,
}
