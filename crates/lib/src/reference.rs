//! Parsing and validation of user-supplied image references.
//!
//! An image reference names an image as `[registry/]repository[:tag]` or
//! `[registry/]repository@digest`. The grammar here is the widely deployed
//! docker/OCI distribution one, and must be matched exactly: a name this
//! module accepts is expected to be accepted verbatim by registries and
//! other container tooling.
//!
//! Parsing is the only way to construct a [`ParsedReference`]; malformed
//! input is rejected here, never later in the pipeline.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// The tag applied when a reference does not name one.
pub const DEFAULT_TAG: &str = "latest";

/// Errors from reference parsing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReferenceError {
    /// The input does not match the reference grammar.
    #[error("invalid reference format: {0}")]
    Invalid(Box<str>),
    /// Like [`ReferenceError::Invalid`], but the only problem is casing.
    #[error("invalid reference format: repository name must be lowercase")]
    Lowercase,
    /// The input had no repository component at all.
    #[error("repository name must have at least one component")]
    Empty,
}

fn invalid(input: &str) -> ReferenceError {
    ReferenceError::Invalid(input.into())
}

// Grammar fragments, from the docker distribution reference grammar.
// Repository path components are lowercase; tags may be mixed case.
fn repository_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$")
            .unwrap()
    })
}

fn host_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?$")
            .unwrap()
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap())
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha256:[a-f0-9]{64}$").unwrap())
}

/// Whether the leading path segment of a reference is syntactically a
/// registry host rather than the first repository component.
fn looks_like_host(segment: &str) -> bool {
    !segment.is_empty()
        && (segment == "localhost" || segment.contains('.') || segment.contains(':'))
}

/// A validated image reference.
///
/// Immutable once constructed; every accessor returns what [`parse`]
/// accepted. The repository path is lowercase, the tag defaults to
/// [`DEFAULT_TAG`] when neither a tag nor a digest was supplied, and tag
/// and digest never coexist.
///
/// [`parse`]: ParsedReference::parse
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedReference {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ParsedReference {
    /// Parse a raw image name against the reference grammar.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        // Split off the digest first; at most one `@` may appear.
        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => {
                if digest.contains('@') || !digest_re().is_match(digest) {
                    return Err(invalid(input));
                }
                (rest, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // Peel off the registry host when the leading segment is
        // syntactically one (a dot, a port, or literally `localhost`).
        let (registry, remainder) = match rest.split_once('/') {
            Some((first, tail)) if looks_like_host(first) => {
                if !host_re().is_match(first) {
                    return Err(invalid(input));
                }
                (Some(first.to_string()), tail)
            }
            _ => (None, rest),
        };

        // The remainder is `repository[:tag]`; any further `:` outside the
        // host position is malformed.
        let (repository, tag) = match remainder.split_once(':') {
            Some((repository, tag)) => {
                if tag.contains(':') || !tag_re().is_match(tag) {
                    return Err(invalid(input));
                }
                (repository, Some(tag.to_string()))
            }
            None => (remainder, None),
        };

        if repository.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if tag.is_some() && digest.is_some() {
            return Err(invalid(input));
        }
        if !repository_re().is_match(repository) {
            if repository_re().is_match(&repository.to_lowercase()) {
                return Err(ReferenceError::Lowercase);
            }
            return Err(invalid(input));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// The registry host, when the reference carried one.
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    /// The lowercase, slash-separated repository path.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag, if any. `Some("latest")` when defaulted.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The content digest, if the reference pinned one.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

impl FromStr for ParsedReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ParsedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
        }
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
