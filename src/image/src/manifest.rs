//! Manifest and manifest-list models.
//!
//! Both OCI and Docker schema2 documents are read through `oci-spec`; the
//! media type decides whether a document is a platform list or a single
//! image manifest.

use oci_spec::image::{ImageIndex, ImageManifest};
use serde_json::Value;
use skiff_core::error::{Result, SkiffError};

use crate::digest::Digest;
use crate::platform::Platform;

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar";
pub const DOCKER_LAYER_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Media types accepted from registries, single manifests first.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    OCI_MANIFEST,
    DOCKER_MANIFEST,
    OCI_INDEX,
    DOCKER_MANIFEST_LIST,
];

/// Raw manifest bytes with their digest.
#[derive(Debug, Clone)]
pub struct ManifestBundle {
    pub digest: Digest,
    pub bytes: Vec<u8>,
}

/// A content-addressed blob referenced from a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub digest: Digest,
    pub media_type: String,
    pub size: u64,
}

/// Entry of a manifest list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDescriptor {
    pub digest: Digest,
    pub media_type: String,
    pub size: u64,
    pub platform: Option<Platform>,
}

/// OCI index or Docker manifest list.
#[derive(Debug, Clone)]
pub struct ManifestList {
    pub digest: Digest,
    pub manifests: Vec<ManifestDescriptor>,
}

/// Single-platform image manifest.
#[derive(Debug, Clone)]
pub struct ImageManifestInfo {
    pub digest: Digest,
    pub media_type: String,
    pub config: BlobRef,
    pub layers: Vec<BlobRef>,
}

impl ImageManifestInfo {
    /// Sum of config and layer sizes.
    pub fn content_size(&self) -> u64 {
        self.config.size + self.layers.iter().map(|l| l.size).sum::<u64>()
    }
}

#[derive(Debug, Clone)]
pub enum ParsedManifest {
    List(ManifestList),
    Image(ImageManifestInfo),
}

impl ManifestBundle {
    /// Wrap manifest bytes, computing their digest.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            digest: Digest::of_bytes(&bytes),
            bytes,
        }
    }

    /// Interpret the manifest. `reference` names the source in errors.
    pub fn parse(&self, reference: &str) -> Result<ParsedManifest> {
        let malformed = |message: String| SkiffError::MalformedManifest {
            reference: reference.to_string(),
            message,
        };

        let value: Value =
            serde_json::from_slice(&self.bytes).map_err(|e| malformed(e.to_string()))?;

        if value.get("schemaVersion").and_then(Value::as_u64) == Some(1) {
            return Err(malformed(
                "schema 1 manifests are not supported".to_string(),
            ));
        }

        let media_type = value
            .get("mediaType")
            .and_then(Value::as_str)
            .map(str::to_string);

        let is_list = match media_type.as_deref() {
            Some(OCI_INDEX) | Some(DOCKER_MANIFEST_LIST) => true,
            Some(_) => false,
            None => value.get("manifests").is_some(),
        };

        if is_list {
            let index: ImageIndex =
                serde_json::from_slice(&self.bytes).map_err(|e| malformed(e.to_string()))?;
            let manifests = index
                .manifests()
                .iter()
                .map(|d| {
                    Ok(ManifestDescriptor {
                        digest: Digest::parse(&d.digest().to_string())
                            .map_err(|e| malformed(e.to_string()))?,
                        media_type: d.media_type().to_string(),
                        size: u64::try_from(d.size()).unwrap_or(0),
                        platform: d.platform().as_ref().map(|p| Platform {
                            os: p.os().to_string(),
                            architecture: p.architecture().to_string(),
                            variant: p.variant().clone(),
                        }),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(ParsedManifest::List(ManifestList {
                digest: self.digest.clone(),
                manifests,
            }));
        }

        if value.get("config").is_none() {
            return Err(malformed("manifest has no config descriptor".to_string()));
        }
        let manifest: ImageManifest =
            serde_json::from_slice(&self.bytes).map_err(|e| malformed(e.to_string()))?;
        let blob = |d: &oci_spec::image::Descriptor| -> Result<BlobRef> {
            Ok(BlobRef {
                digest: Digest::parse(&d.digest().to_string())
                    .map_err(|e| malformed(e.to_string()))?,
                media_type: d.media_type().to_string(),
                size: u64::try_from(d.size()).unwrap_or(0),
            })
        };
        Ok(ParsedManifest::Image(ImageManifestInfo {
            digest: self.digest.clone(),
            media_type: media_type.unwrap_or_else(|| OCI_MANIFEST.to_string()),
            config: blob(manifest.config())?,
            layers: manifest
                .layers()
                .iter()
                .map(blob)
                .collect::<Result<Vec<_>>>()?,
        }))
    }
}

impl ManifestList {
    /// First entry whose platform satisfies `platform`.
    pub fn select(&self, platform: &Platform) -> Option<&ManifestDescriptor> {
        self.manifests.iter().find(|m| {
            m.platform.as_ref().map_or(false, |p| {
                platform.matches(&p.os, &p.architecture, p.variant.as_deref())
            })
        })
    }
}

/// Summary fields read from an image config blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSummary {
    pub os: String,
    pub architecture: String,
    pub created: Option<String>,
}

impl ConfigSummary {
    /// Config blobs vary a lot in practice; missing fields stay empty.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
        Ok(Self {
            os: field("os").unwrap_or_default(),
            architecture: field("architecture").unwrap_or_default(),
            created: field("created"),
        })
    }
}
