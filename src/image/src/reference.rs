//! Image reference parsing.
//!
//! Parses registry references like `quay.io/libpod/alpine:latest` and
//! transport references like `docker-archive:/tmp/images.tar:@1` into
//! structured components.

use std::fmt;

use skiff_core::error::{Result, SkiffError};

use crate::digest::Digest;

/// Docker Hub's canonical hostname.
pub const DOCKER_HUB: &str = "docker.io";

/// Authority used for images that only exist locally.
pub const LOCALHOST: &str = "localhost";

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Docker Hub aliases folded into [`DOCKER_HUB`].
const DOCKER_HUB_ALIASES: &[&str] = &["index.docker.io", "registry-1.docker.io"];

const MAX_TAG_LEN: usize = 128;

/// Where an image comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// A registry speaking the distribution protocol
    Registry,
    /// `docker save` tarball, optionally compressed
    DockerArchive,
    /// Tarred OCI image layout
    OciArchive,
    /// OCI image layout directory
    OciLayout,
    /// Directory holding `manifest.json` and digest-named blobs
    Dir,
}

impl Transport {
    /// Prefix used in transport references.
    pub fn prefix(&self) -> &'static str {
        match self {
            Transport::Registry => "docker",
            Transport::DockerArchive => "docker-archive",
            Transport::OciArchive => "oci-archive",
            Transport::OciLayout => "oci",
            Transport::Dir => "dir",
        }
    }

    /// Whether `:@N` and `:name` selectors apply.
    pub fn supports_selector(&self) -> bool {
        matches!(
            self,
            Transport::DockerArchive | Transport::OciArchive | Transport::OciLayout
        )
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "docker-archive" => Some(Transport::DockerArchive),
            "oci-archive" => Some(Transport::OciArchive),
            "oci" => Some(Transport::OciLayout),
            "dir" => Some(Transport::Dir),
            _ => None,
        }
    }
}

/// Selects one image at a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Registry tag
    Tag(String),
    /// Manifest or manifest-list digest
    Digest(Digest),
    /// `@N` entry of an archive or layout index
    ArchiveIndex(usize),
    /// Named entry of an archive or layout index
    ArchiveName(String),
}

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub transport: Transport,
    /// Registry hostname (e.g., "quay.io", "localhost:5000"); `None` for short names
    pub authority: Option<String>,
    /// Repository path for registry references, filesystem path otherwise
    pub repository: String,
    pub locator: Option<Locator>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `alpine` → short name, tag `latest`
    /// - `quay.io/libpod/alpine:3.10.2` → qualified, tagged
    /// - `quay.io/libpod/alpine@sha256:…` → qualified, by digest
    /// - `docker://quay.io/libpod/alpine` → explicit registry transport
    /// - `docker-archive:/tmp/a.tar[:@N|:name:tag]`
    /// - `oci-archive:/tmp/a.tar[:@N|:ref]`, `oci:/tmp/layout[:@N|:ref]`
    /// - `dir:/tmp/image`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SkiffError::malformed(reference, "empty image reference"));
        }

        if let Some(rest) = reference.strip_prefix("docker://") {
            return Self::parse_registry(rest);
        }

        if let Some((prefix, rest)) = reference.split_once(':') {
            if let Some(transport) = Transport::from_prefix(prefix) {
                return Self::parse_transport(reference, transport, rest);
            }
        }

        Self::parse_registry(reference)
    }

    /// Parse a registry reference (no transport prefix).
    pub fn parse_registry(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SkiffError::malformed(reference, "empty image reference"));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest = Digest::parse(&reference[at_pos + 1..])
                    .map_err(|_| SkiffError::malformed(reference, "invalid digest"))?;
                (&reference[..at_pos], Some(digest))
            }
            None => (reference, None),
        };

        // Tag is the part after the last ':' that follows the last '/'
        let last_segment_start = name_tag.rfind('/').map_or(0, |p| p + 1);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let split = last_segment_start + colon;
                (&name_tag[..split], Some(&name_tag[split + 1..]))
            }
            None => (name_tag, None),
        };

        if let Some(tag) = tag {
            validate_tag(reference, tag)?;
        }

        let (authority, repository) = split_authority(reference, name)?;
        validate_repository(reference, &repository)?;

        // A digest pins the content; a tag next to it is informational only.
        let locator = match (digest, tag) {
            (Some(d), _) => Locator::Digest(d),
            (None, Some(t)) => Locator::Tag(t.to_string()),
            (None, None) => Locator::Tag(DEFAULT_TAG.to_string()),
        };

        Ok(ImageReference {
            transport: Transport::Registry,
            authority,
            repository,
            locator: Some(locator),
        })
    }

    fn parse_transport(reference: &str, transport: Transport, rest: &str) -> Result<Self> {
        let (path, selector) = match rest.split_once(':') {
            Some((path, selector)) => (path, Some(selector)),
            None => (rest, None),
        };
        if path.is_empty() {
            return Err(SkiffError::malformed(reference, "empty path"));
        }

        let locator = match selector {
            None | Some("") => None,
            Some(_) if !transport.supports_selector() => {
                return Err(SkiffError::malformed(
                    reference,
                    format!("the {} transport does not accept an image selector", transport.prefix()),
                ));
            }
            Some(sel) => match sel.strip_prefix('@') {
                Some(index) => {
                    if index.starts_with('-') {
                        return Err(SkiffError::malformed(reference, "negative source index"));
                    }
                    let index = index.parse::<usize>().map_err(|_| {
                        SkiffError::malformed(reference, format!("invalid source index @{}", index))
                    })?;
                    Some(Locator::ArchiveIndex(index))
                }
                None => Some(Locator::ArchiveName(sel.to_string())),
            },
        };

        Ok(ImageReference {
            transport,
            authority: None,
            repository: path.to_string(),
            locator,
        })
    }

    /// Registry reference without an authority component.
    pub fn is_short_name(&self) -> bool {
        self.transport == Transport::Registry && self.authority.is_none()
    }

    /// Qualify a short name with `registry`, applying Docker Hub's
    /// `library/` convention for single-segment repositories.
    pub fn with_authority(&self, registry: &str) -> Self {
        let authority = normalize_authority(registry);
        let repository = hub_repository(&authority, &self.repository);
        ImageReference {
            transport: Transport::Registry,
            authority: Some(authority),
            repository,
            locator: self.locator.clone(),
        }
    }

    /// Same repository, different tag.
    pub fn with_tag(&self, tag: &str) -> Self {
        ImageReference {
            locator: Some(Locator::Tag(tag.to_string())),
            ..self.clone()
        }
    }

    /// `authority/repository` (or just the repository for short names and paths).
    pub fn name(&self) -> String {
        match &self.authority {
            Some(a) => format!("{}/{}", a, self.repository),
            None => self.repository.clone(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.locator {
            Some(Locator::Tag(t)) => Some(t),
            _ => None,
        }
    }

    pub fn digest(&self) -> Option<&Digest> {
        match &self.locator {
            Some(Locator::Digest(d)) => Some(d),
            _ => None,
        }
    }

    /// Registry reference rendered as `name:tag` or `name@digest`.
    pub fn full_reference(&self) -> String {
        let mut s = self.name();
        match &self.locator {
            Some(Locator::Tag(t)) => {
                s.push(':');
                s.push_str(t);
            }
            Some(Locator::Digest(d)) => {
                s.push('@');
                s.push_str(d.as_str());
            }
            _ => {}
        }
        s
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.transport == Transport::Registry {
            return write!(f, "{}", self.full_reference());
        }
        write!(f, "{}:{}", self.transport.prefix(), self.repository)?;
        match &self.locator {
            Some(Locator::ArchiveIndex(i)) => write!(f, ":@{}", i),
            Some(Locator::ArchiveName(n)) => write!(f, ":{}", n),
            _ => Ok(()),
        }
    }
}

/// Whether a raw registry reference names a tag or digest explicitly.
pub fn has_explicit_locator(reference: &str) -> bool {
    let reference = reference.trim().trim_start_matches("docker://");
    if reference.contains('@') {
        return true;
    }
    let last_segment = reference.rsplit('/').next().unwrap_or(reference);
    last_segment.contains(':')
}

/// Fully-qualified `name:tag` form of a registry name as it appears in
/// archive metadata (`RepoTags`, ref-name annotations). Short names are
/// qualified against Docker Hub.
pub fn normalize_name(name: &str) -> Result<String> {
    let parsed = ImageReference::parse_registry(name)?;
    let parsed = if parsed.is_short_name() {
        parsed.with_authority(DOCKER_HUB)
    } else {
        parsed
    };
    Ok(parsed.full_reference())
}

/// Fold registry aliases into their canonical hostname.
pub fn normalize_authority(registry: &str) -> String {
    let registry = registry.trim().trim_end_matches('/');
    if DOCKER_HUB_ALIASES.contains(&registry) {
        DOCKER_HUB.to_string()
    } else {
        registry.to_string()
    }
}

fn hub_repository(authority: &str, repository: &str) -> String {
    if authority == DOCKER_HUB && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository.to_string()
    }
}

/// Split a name into authority and repository components.
fn split_authority(reference: &str, name: &str) -> Result<(Option<String>, String)> {
    // The first component is a hostname when it contains a dot or colon,
    // or is "localhost"
    if let Some(slash_pos) = name.find('/') {
        let first = &name[..slash_pos];
        if first.contains('.') || first.contains(':') || first == LOCALHOST {
            let repo = &name[slash_pos + 1..];
            if repo.is_empty() {
                return Err(SkiffError::malformed(reference, "empty repository"));
            }
            let authority = normalize_authority(first);
            let repository = hub_repository(&authority, repo);
            return Ok((Some(authority), repository));
        }
    }

    if name.is_empty() {
        return Err(SkiffError::malformed(reference, "empty repository"));
    }
    Ok((None, name.to_string()))
}

fn validate_repository(reference: &str, repository: &str) -> Result<()> {
    if repository.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(SkiffError::malformed(
            reference,
            "repository name must be lowercase",
        ));
    }
    for component in repository.split('/') {
        if component.is_empty() {
            return Err(SkiffError::malformed(reference, "empty repository path component"));
        }
        let valid_chars = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
        let alnum_edges = component
            .chars()
            .next()
            .zip(component.chars().last())
            .map_or(false, |(first, last)| {
                first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric()
            });
        if !valid_chars || !alnum_edges {
            return Err(SkiffError::malformed(
                reference,
                format!("invalid repository path component '{}'", component),
            ));
        }
    }
    Ok(())
}

/// Whether `tag` is a syntactically valid tag.
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphanumeric() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    first_ok && rest_ok && tag.len() <= MAX_TAG_LEN
}

fn validate_tag(reference: &str, tag: &str) -> Result<()> {
    if !is_valid_tag(tag) {
        return Err(SkiffError::malformed(reference, format!("invalid tag '{}'", tag)));
    }
    Ok(())
}
