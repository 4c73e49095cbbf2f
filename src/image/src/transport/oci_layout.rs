//! `oci:` and `oci-archive:` transports: OCI image layouts, plain or tarred.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use oci_spec::image::ImageIndex;
use skiff_core::error::{Result, SkiffError};
use tempfile::TempDir;

use super::archive;
use super::ImageSource;
use crate::digest::Digest;
use crate::manifest::ManifestBundle;
use crate::reference::{is_valid_tag, ImageReference, Locator, DEFAULT_TAG};

/// Annotation naming an entry of `index.json`.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

const INDEX_FILE: &str = "index.json";
const LAYOUT_FILE: &str = "oci-layout";

/// One image selected from an OCI image layout.
pub struct OciLayoutSource {
    reference: ImageReference,
    root: PathBuf,
    // Extraction directory for `oci-archive:`.
    _extracted: Option<TempDir>,
    manifest_digest: Digest,
    names: Vec<String>,
}

impl OciLayoutSource {
    /// Open a layout directory.
    pub fn open(reference: &ImageReference) -> Result<Self> {
        let root = PathBuf::from(&reference.repository);
        Self::open_at(reference, root, None)
    }

    /// Extract a tarred layout, then open it.
    pub fn open_archive(reference: &ImageReference) -> Result<Self> {
        let extracted = archive::extract(Path::new(&reference.repository))?;
        let root = extracted.path().to_path_buf();
        Self::open_at(reference, root, Some(extracted))
    }

    fn open_at(
        reference: &ImageReference,
        root: PathBuf,
        extracted: Option<TempDir>,
    ) -> Result<Self> {
        let display = reference.to_string();
        if !root.join(LAYOUT_FILE).exists() {
            return Err(SkiffError::Other(format!(
                "{}: not an OCI image layout (missing {})",
                display, LAYOUT_FILE
            )));
        }

        let index_path = root.join(INDEX_FILE);
        let index_data = std::fs::read(&index_path).map_err(|e| {
            SkiffError::Other(format!("{}: Failed to read {}: {}", display, INDEX_FILE, e))
        })?;
        let index: ImageIndex = serde_json::from_slice(&index_data).map_err(|e| {
            SkiffError::Serialization(format!("{}: invalid {}: {}", display, INDEX_FILE, e))
        })?;

        let entries: Vec<(Digest, Option<String>)> = index
            .manifests()
            .iter()
            .map(|d| {
                let ref_name = d
                    .annotations()
                    .as_ref()
                    .and_then(|a| a.get(ANNOTATION_REF_NAME))
                    .cloned();
                Ok((Digest::parse(&d.digest().to_string())?, ref_name))
            })
            .collect::<Result<Vec<_>>>()?;

        let (manifest_digest, ref_name) = match &reference.locator {
            None => {
                if entries.len() != 1 {
                    return Err(SkiffError::ArchiveAmbiguous {
                        reference: display,
                        index_file: INDEX_FILE.to_string(),
                        count: entries.len(),
                    });
                }
                entries[0].clone()
            }
            Some(Locator::ArchiveIndex(i)) => {
                entries
                    .get(*i)
                    .cloned()
                    .ok_or_else(|| SkiffError::ArchiveIndexOutOfRange {
                        reference: display.clone(),
                        index: *i,
                        count: entries.len(),
                    })?
            }
            Some(Locator::ArchiveName(name)) => entries
                .iter()
                .find(|(_, r)| r.as_deref() == Some(name.as_str()))
                .cloned()
                .ok_or_else(|| SkiffError::ArchiveTagNotFound {
                    reference: display.clone(),
                    tag: name.clone(),
                })?,
            Some(other) => {
                return Err(SkiffError::malformed(
                    &display,
                    format!("unsupported layout selector {:?}", other),
                ))
            }
        };

        let names = vec![local_name(&reference.repository, ref_name.as_deref())?];

        Ok(Self {
            reference: reference.clone(),
            root,
            _extracted: extracted,
            manifest_digest,
            names,
        })
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join("sha256").join(digest.hex())
    }

    fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blob_path(digest);
        if !path.exists() {
            return Err(SkiffError::ManifestUnknown {
                reference: self.reference.to_string(),
                message: format!("blob {} not present in layout", digest),
            });
        }
        archive::read_verified(&self.reference.to_string(), &path, digest)
    }
}

/// Local name for a layout entry: the ref-name annotation when it is a
/// fully-qualified reference, else `localhost/<path>:<ref or latest>`.
fn local_name(path: &str, ref_name: Option<&str>) -> Result<String> {
    if let Some(r) = ref_name {
        if let Ok(parsed) = ImageReference::parse_registry(r) {
            if !parsed.is_short_name() && parsed.tag().is_some() {
                return Ok(parsed.full_reference());
            }
        }
    }
    let tag = ref_name.filter(|r| is_valid_tag(r)).unwrap_or(DEFAULT_TAG);
    Ok(format!("{}:{}", archive::localhost_name(path)?, tag))
}

#[async_trait]
impl ImageSource for OciLayoutSource {
    fn reference(&self) -> &ImageReference {
        &self.reference
    }

    async fn fetch_manifest(&self) -> Result<ManifestBundle> {
        self.fetch_manifest_by_digest(&self.manifest_digest).await
    }

    async fn fetch_manifest_by_digest(&self, digest: &Digest) -> Result<ManifestBundle> {
        Ok(ManifestBundle::new(self.read_blob(digest)?))
    }

    async fn fetch_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.read_blob(digest)
    }

    fn default_names(&self) -> Vec<String> {
        self.names.clone()
    }
}
