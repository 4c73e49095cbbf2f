//! `dir:` transport: a directory with `manifest.json` and blobs named by digest hex.

use std::path::PathBuf;

use async_trait::async_trait;
use skiff_core::error::{Result, SkiffError};

use super::archive;
use super::ImageSource;
use crate::digest::Digest;
use crate::manifest::ManifestBundle;
use crate::reference::{ImageReference, DEFAULT_TAG};

const MANIFEST_FILE: &str = "manifest.json";

pub struct DirSource {
    reference: ImageReference,
    root: PathBuf,
    name: String,
}

impl DirSource {
    pub fn open(reference: &ImageReference) -> Result<Self> {
        let root = PathBuf::from(&reference.repository);
        if !root.join(MANIFEST_FILE).is_file() {
            return Err(SkiffError::Other(format!(
                "{}: no {} in directory",
                reference, MANIFEST_FILE
            )));
        }
        let name = format!(
            "{}:{}",
            archive::localhost_name(&reference.repository)?,
            DEFAULT_TAG
        );
        Ok(Self {
            reference: reference.clone(),
            root,
            name,
        })
    }
}

#[async_trait]
impl ImageSource for DirSource {
    fn reference(&self) -> &ImageReference {
        &self.reference
    }

    async fn fetch_manifest(&self) -> Result<ManifestBundle> {
        let bytes = std::fs::read(self.root.join(MANIFEST_FILE))?;
        Ok(ManifestBundle::new(bytes))
    }

    /// Per-instance manifests of a stored list live in `<hex>.manifest.json`.
    async fn fetch_manifest_by_digest(&self, digest: &Digest) -> Result<ManifestBundle> {
        let path = self.root.join(format!("{}.{}", digest.hex(), MANIFEST_FILE));
        if !path.is_file() {
            let top = self.fetch_manifest().await?;
            if &top.digest == digest {
                return Ok(top);
            }
            return Err(SkiffError::ManifestUnknown {
                reference: self.reference.to_string(),
                message: format!("no manifest {} in directory", digest),
            });
        }
        Ok(ManifestBundle::new(archive::read_verified(&self.reference.to_string(), &path, digest)?))
    }

    async fn fetch_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        archive::read_verified(
            &self.reference.to_string(),
            &self.root.join(digest.hex()),
            digest,
        )
    }

    fn default_names(&self) -> Vec<String> {
        vec![self.name.clone()]
    }
}
