//! `docker-archive:` transport: tarballs written by `docker save`.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use skiff_core::error::{Result, SkiffError};
use tempfile::TempDir;

use super::archive::{self, Compression};
use super::ImageSource;
use crate::digest::Digest;
use crate::manifest::{
    ManifestBundle, DOCKER_CONFIG, DOCKER_LAYER, DOCKER_LAYER_GZIP, DOCKER_MANIFEST,
};
use crate::reference::{normalize_name, ImageReference, Locator};

const INDEX_FILE: &str = "manifest.json";

/// One entry of the archive's `manifest.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManifestItem {
    config: String,
    #[serde(default)]
    repo_tags: Option<Vec<String>>,
    layers: Vec<String>,
}

/// One image selected from a `docker save` tarball.
pub struct DockerArchiveSource {
    reference: ImageReference,
    // Keeps the extracted files alive for the lifetime of the source.
    _dir: TempDir,
    manifest: ManifestBundle,
    blobs: HashMap<Digest, PathBuf>,
    names: Vec<String>,
}

impl DockerArchiveSource {
    /// Extract the archive and select the image the reference names.
    pub fn open(reference: &ImageReference) -> Result<Self> {
        let shown = reference.to_string();
        let dir = archive::extract(Path::new(&reference.repository))?;

        let index_data = std::fs::read(dir.path().join(INDEX_FILE)).map_err(|e| {
            SkiffError::Other(format!("{}: Failed to read {}: {}", shown, INDEX_FILE, e))
        })?;
        let items: Vec<ManifestItem> = serde_json::from_slice(&index_data).map_err(|e| {
            SkiffError::Serialization(format!("{}: invalid {}: {}", shown, INDEX_FILE, e))
        })?;

        let (item, selected_name) = select_item(&shown, &reference.locator, &items)?;

        let config_path = entry_path(dir.path(), &item.config)?;
        let (config_digest, config_size) = Digest::of_file(&config_path)?;

        let mut blobs = HashMap::new();
        blobs.insert(config_digest.clone(), config_path);

        let mut layer_descs = Vec::with_capacity(item.layers.len());
        for layer in &item.layers {
            let layer_path = entry_path(dir.path(), layer)?;
            let (digest, size) = Digest::of_file(&layer_path)?;
            let media_type = match archive::detect_compression(&layer_path)? {
                Compression::Gzip => DOCKER_LAYER_GZIP,
                _ => DOCKER_LAYER,
            };
            layer_descs.push(json!({
                "mediaType": media_type,
                "size": size,
                "digest": digest.to_string(),
            }));
            blobs.insert(digest, layer_path);
        }

        let manifest = ManifestBundle::new(serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": DOCKER_MANIFEST,
            "config": {
                "mediaType": DOCKER_CONFIG,
                "size": config_size,
                "digest": config_digest.to_string(),
            },
            "layers": layer_descs,
        }))?);

        let names = match selected_name {
            Some(name) => vec![name],
            None => item
                .repo_tags
                .iter()
                .flatten()
                .filter_map(|t| match normalize_name(t) {
                    Ok(n) => Some(n),
                    Err(e) => {
                        tracing::warn!(tag = %t, error = %e, "Ignoring invalid RepoTags entry");
                        None
                    }
                })
                .collect(),
        };

        tracing::debug!(
            archive = %shown,
            config = %config_digest,
            layers = item.layers.len(),
            "Opened docker archive"
        );

        Ok(Self {
            reference: reference.clone(),
            _dir: dir,
            manifest,
            blobs,
            names,
        })
    }
}

/// Pick the archive entry for a selector, returning the normalized name
/// when the entry was chosen by name.
fn select_item<'a>(
    display: &str,
    locator: &Option<Locator>,
    items: &'a [ManifestItem],
) -> Result<(&'a ManifestItem, Option<String>)> {
    match locator {
        None => {
            if items.len() != 1 {
                return Err(SkiffError::ArchiveAmbiguous {
                    reference: display.to_string(),
                    index_file: format!("tar {}", INDEX_FILE),
                    count: items.len(),
                });
            }
            Ok((&items[0], None))
        }
        Some(Locator::ArchiveIndex(index)) => items
            .get(*index)
            .map(|item| (item, None))
            .ok_or_else(|| SkiffError::ArchiveIndexOutOfRange {
                reference: display.to_string(),
                index: *index,
                count: items.len(),
            }),
        Some(Locator::ArchiveName(name)) => {
            let wanted = normalize_name(name)?;
            items
                .iter()
                .find(|item| {
                    item.repo_tags
                        .iter()
                        .flatten()
                        .any(|t| normalize_name(t).map_or(false, |n| n == wanted))
                })
                .map(|item| (item, Some(wanted.clone())))
                .ok_or_else(|| SkiffError::ArchiveTagNotFound {
                    reference: display.to_string(),
                    tag: wanted,
                })
        }
        Some(other) => Err(SkiffError::malformed(
            display,
            format!("unsupported archive selector {:?}", other),
        )),
    }
}

/// Resolve an archive-relative path, refusing to leave the extraction root.
fn entry_path(root: &Path, name: &str) -> Result<PathBuf> {
    let rel = Path::new(name);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(SkiffError::Other(format!(
            "archive entry '{}' escapes the archive",
            name
        )));
    }
    Ok(root.join(rel))
}

#[async_trait]
impl ImageSource for DockerArchiveSource {
    fn reference(&self) -> &ImageReference {
        &self.reference
    }

    async fn fetch_manifest(&self) -> Result<ManifestBundle> {
        Ok(self.manifest.clone())
    }

    async fn fetch_manifest_by_digest(&self, digest: &Digest) -> Result<ManifestBundle> {
        if digest == &self.manifest.digest {
            return Ok(self.manifest.clone());
        }
        Err(SkiffError::ManifestUnknown {
            reference: self.reference.to_string(),
            message: format!("archive holds no manifest {}", digest),
        })
    }

    async fn fetch_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let path = self.blobs.get(digest).ok_or_else(|| {
            SkiffError::Other(format!("{}: blob {} not in archive", self.reference, digest))
        })?;
        archive::read_verified(&self.reference.to_string(), path, digest)
    }

    fn default_names(&self) -> Vec<String> {
        self.names.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ParsedManifest;
    use crate::test_util::{write_docker_archive, FixtureImage};

    fn two_image_archive(dir: &TempDir, file: &str) -> PathBuf {
        let path = dir.path().join(file);
        write_docker_archive(
            &path,
            &[
                FixtureImage::new("empty").with_tags(&["example.com/empty:latest"]),
                FixtureImage::new("but").with_tags(&["example.com/empty/but:different"]),
            ],
        );
        path
    }

    fn open(path: &Path, selector: &str) -> Result<DockerArchiveSource> {
        let raw = format!("docker-archive:{}{}", path.display(), selector);
        DockerArchiveSource::open(&ImageReference::parse(&raw).unwrap())
    }

    #[test]
    fn test_two_images_without_selector_is_ambiguous() {
        let dir = TempDir::new().unwrap();
        let path = two_image_archive(&dir, "two.tar.xz");
        let err = open(&path, "").err().unwrap();
        assert!(err
            .to_string()
            .contains("Unexpected tar manifest.json: expected 1 item, got 2"));
        assert_eq!(err.exit_code(), 125);
    }

    #[test]
    fn test_select_by_index() {
        let dir = TempDir::new().unwrap();
        let path = two_image_archive(&dir, "two.tar");
        let first = open(&path, ":@0").unwrap();
        let second = open(&path, ":@1").unwrap();
        assert_eq!(first.default_names(), vec!["example.com/empty:latest"]);
        assert_eq!(second.default_names(), vec!["example.com/empty/but:different"]);
        assert_ne!(first.manifest.digest, second.manifest.digest);
    }

    #[test]
    fn test_index_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = two_image_archive(&dir, "two.tar");
        let err = open(&path, ":@2").err().unwrap();
        assert!(err
            .to_string()
            .contains("Invalid source index @2, only 2 manifest items available"));
    }

    #[test]
    fn test_select_by_name() {
        let dir = TempDir::new().unwrap();
        let path = two_image_archive(&dir, "two.tar");
        let source = open(&path, ":example.com/empty/but:different").unwrap();
        assert_eq!(source.default_names(), vec!["example.com/empty/but:different"]);
    }

    #[test]
    fn test_missing_name() {
        let dir = TempDir::new().unwrap();
        let path = two_image_archive(&dir, "two.tar");
        let err = open(&path, ":foo.com/does/not/exist:latest").err().unwrap();
        assert!(err
            .to_string()
            .contains("Tag \"foo.com/does/not/exist:latest\" not found"));
    }

    #[tokio::test]
    async fn test_synthesized_manifest_and_blobs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.tar.gz");
        let image = FixtureImage::new("single").with_tags(&["busybox:latest"]);
        write_docker_archive(&path, &[image.clone()]);

        let source = open(&path, "").unwrap();
        assert_eq!(source.default_names(), vec!["docker.io/library/busybox:latest"]);

        let bundle = source.fetch_manifest().await.unwrap();
        let manifest = match bundle.parse("test").unwrap() {
            ParsedManifest::Image(m) => m,
            other => panic!("expected image manifest, got {:?}", other),
        };
        assert_eq!(manifest.config.digest.hex(), image.id());
        assert_eq!(manifest.layers.len(), image.layers.len());

        let config = source.fetch_blob(&manifest.config.digest).await.unwrap();
        assert_eq!(config, image.config);
        let layer = source.fetch_blob(&manifest.layers[0].digest).await.unwrap();
        assert_eq!(layer, image.layers[0]);

        let same = source.fetch_manifest_by_digest(&bundle.digest).await.unwrap();
        assert_eq!(same.bytes, bundle.bytes);
        assert!(source
            .fetch_manifest_by_digest(&Digest::of_bytes(b"other"))
            .await
            .is_err());
    }

    #[test]
    fn test_entry_path_rejects_escape() {
        let dir = TempDir::new().unwrap();
        assert!(entry_path(dir.path(), "../etc/passwd").is_err());
        assert!(entry_path(dir.path(), "/etc/passwd").is_err());
        assert!(entry_path(dir.path(), "abc/layer.tar").is_ok());
    }
}
