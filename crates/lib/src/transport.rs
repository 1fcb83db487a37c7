//! Transports for storing and exporting images, and classification of
//! parsed references against them.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::reference::ParsedReference;

/// Error from parsing a transport name.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The given name is not a recognized transport.
    #[error("wrong image format: {0}")]
    Unknown(Box<str>),
}

/// A backend/transport for images.
#[derive(Copy, Clone, Hash, Debug, PartialEq, Eq)]
pub enum Transport {
    /// A remote Docker/OCI registry (`docker`)
    Docker,
    /// A local Docker archive tarball (`docker-archive`)
    DockerArchive,
    /// A local Docker daemon (`docker-daemon`)
    DockerDaemon,
    /// A local OCI directory layout (`oci`)
    Oci,
    /// A local OCI archive tarball (`oci-archive`)
    OciArchive,
    /// The iSulad container engine (`isulad`)
    Isulad,
    /// A manifest list (`manifest`)
    Manifest,
}

impl Transport {
    const DOCKER_STR: &'static str = "docker";
    const DOCKER_ARCHIVE_STR: &'static str = "docker-archive";
    const DOCKER_DAEMON_STR: &'static str = "docker-daemon";
    const OCI_STR: &'static str = "oci";
    const OCI_ARCHIVE_STR: &'static str = "oci-archive";
    const ISULAD_STR: &'static str = "isulad";
    const MANIFEST_STR: &'static str = "manifest";

    /// Retrieve an identifier that can then be re-parsed from
    /// [`Transport::try_from::<&str>`].
    pub fn serializable_name(&self) -> &'static str {
        match self {
            Transport::Docker => Self::DOCKER_STR,
            Transport::DockerArchive => Self::DOCKER_ARCHIVE_STR,
            Transport::DockerDaemon => Self::DOCKER_DAEMON_STR,
            Transport::Oci => Self::OCI_STR,
            Transport::OciArchive => Self::OCI_ARCHIVE_STR,
            Transport::Isulad => Self::ISULAD_STR,
            Transport::Manifest => Self::MANIFEST_STR,
        }
    }

    /// Whether images in this transport can be written to a local
    /// archive by the save pipeline.
    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            Transport::Docker | Transport::DockerArchive | Transport::Oci | Transport::OciArchive
        )
    }
}

impl TryFrom<&str> for Transport {
    type Error = TransportError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(match value {
            Self::DOCKER_STR => Self::Docker,
            Self::DOCKER_ARCHIVE_STR => Self::DockerArchive,
            Self::DOCKER_DAEMON_STR => Self::DockerDaemon,
            Self::OCI_STR => Self::Oci,
            Self::OCI_ARCHIVE_STR => Self::OciArchive,
            Self::ISULAD_STR => Self::Isulad,
            Self::MANIFEST_STR => Self::Manifest,
            o => return Err(TransportError::Unknown(o.into())),
        })
    }
}

impl FromStr for Transport {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.serializable_name())
    }
}

/// Classification of a parsed reference prior to registry resolution.
///
/// A reference leaving the resolver is never left unbound; `Ambiguous` only
/// exists between classification and resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameClass {
    /// The reference carries an explicit registry host and is already
    /// bound to a transport.
    Qualified(Transport),
    /// A bare repository name; resolution against the configured
    /// registries decides the transport.
    Ambiguous,
}

/// Decide whether a reference is transport-qualified.
///
/// The grammar only records a registry host when the leading segment is
/// syntactically one (a dot, a colon-qualified port, or `localhost`), so
/// classification reduces to checking for it. Anything host-qualified
/// speaks the docker wire protocol.
pub fn classify(reference: &ParsedReference) -> NameClass {
    if reference.registry().is_some() {
        NameClass::Qualified(Transport::Docker)
    } else {
        NameClass::Ambiguous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializable_transport() {
        for v in [
            Transport::Docker,
            Transport::DockerArchive,
            Transport::DockerDaemon,
            Transport::Oci,
            Transport::OciArchive,
            Transport::Isulad,
            Transport::Manifest,
        ] {
            assert_eq!(Transport::try_from(v.serializable_name()).unwrap(), v);
        }
    }

    #[test]
    fn test_unknown_transport() {
        for v in ["dock", "invalidFormat", "", "docker://"] {
            let err = Transport::try_from(v).unwrap_err();
            assert!(
                err.to_string().contains("wrong image format"),
                "unexpected error for {v:?}: {err}"
            );
        }
    }

    #[test]
    fn test_archive_capable() {
        assert!(Transport::Docker.is_archive());
        assert!(Transport::DockerArchive.is_archive());
        assert!(Transport::Oci.is_archive());
        assert!(Transport::OciArchive.is_archive());
        assert!(!Transport::DockerDaemon.is_archive());
        assert!(!Transport::Isulad.is_archive());
        assert!(!Transport::Manifest.is_archive());
    }

    #[test]
    fn test_classify() {
        let qualified = [
            "docker.io/library/busybox:latest",
            "localhost/busybox",
            "registry.example.com:5000/app:1.0",
        ];
        for name in qualified {
            let parsed = ParsedReference::parse(name).unwrap();
            assert_eq!(
                classify(&parsed),
                NameClass::Qualified(Transport::Docker),
                "classification of {name}"
            );
        }

        let ambiguous = ["busybox:latest", "isula/test", "some/deep/path:2"];
        for name in ambiguous {
            let parsed = ParsedReference::parse(name).unwrap();
            assert_eq!(classify(&parsed), NameClass::Ambiguous, "classification of {name}");
        }
    }
}
