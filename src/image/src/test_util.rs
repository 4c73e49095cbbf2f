//! Fixtures shared by the unit tests: synthetic images, archive writers and
//! an in-memory [`ImageSource`].

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use async_trait::async_trait;
use serde_json::json;
use skiff_core::error::{Result, SkiffError};

use crate::digest::Digest;
use crate::manifest::tests::{image_manifest_json, list_json};
use crate::manifest::ManifestBundle;
use crate::reference::{ImageReference, Locator};
use crate::transport::oci_layout::ANNOTATION_REF_NAME;
use crate::transport::{ImageSource, SourceContext, SourceOpener};

/// A tiny image with a unique config.
#[derive(Debug, Clone)]
pub(crate) struct FixtureImage {
    pub name: String,
    pub arch: String,
    pub config: Vec<u8>,
    pub layers: Vec<Vec<u8>>,
    pub repo_tags: Vec<String>,
}

impl FixtureImage {
    pub fn new(name: &str) -> Self {
        let mut image = Self {
            name: name.to_string(),
            arch: "amd64".to_string(),
            config: Vec::new(),
            layers: vec![format!("layer-of-{}", name).into_bytes()],
            repo_tags: Vec::new(),
        };
        image.rebuild_config();
        image
    }

    fn rebuild_config(&mut self) {
        self.config = serde_json::to_vec(&json!({
            "architecture": self.arch,
            "os": "linux",
            "created": "2024-01-01T00:00:00Z",
            "config": { "Labels": { "fixture": self.name } },
            "rootfs": { "type": "layers", "diff_ids": [] },
        }))
        .unwrap();
    }

    pub fn with_arch(mut self, arch: &str) -> Self {
        self.arch = arch.to_string();
        self.rebuild_config();
        self
    }

    pub fn with_layers(mut self, layers: Vec<Vec<u8>>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.repo_tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn id(&self) -> String {
        Digest::of_bytes(&self.config).hex().to_string()
    }

    pub fn manifest(&self) -> Vec<u8> {
        let layers: Vec<&[u8]> = self.layers.iter().map(Vec::as_slice).collect();
        image_manifest_json(&self.config, &layers)
    }

    pub fn manifest_digest(&self) -> Digest {
        Digest::of_bytes(&self.manifest())
    }

    fn blobs(&self) -> Vec<(Digest, Vec<u8>)> {
        let mut blobs = vec![(Digest::of_bytes(&self.config), self.config.clone())];
        for layer in &self.layers {
            blobs.push((Digest::of_bytes(layer), layer.clone()));
        }
        blobs
    }
}

fn append(builder: &mut tar::Builder<Vec<u8>>, name: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, name, data).unwrap();
}

/// Compress by file extension (`.gz`, `.xz`, otherwise plain).
fn write_compressed(path: &Path, raw: Vec<u8>) {
    let name = path.to_string_lossy();
    let bytes = if name.ends_with(".xz") {
        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap()
    } else if name.ends_with(".gz") {
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap()
    } else {
        raw
    };
    std::fs::write(path, bytes).unwrap();
}

/// `docker save`-style tarball holding `images`.
pub(crate) fn write_docker_archive(path: &Path, images: &[FixtureImage]) {
    let mut builder = tar::Builder::new(Vec::new());
    let mut items = Vec::new();
    for (i, image) in images.iter().enumerate() {
        let config_name = format!("{}.json", image.id());
        append(&mut builder, &config_name, &image.config);
        let mut layer_names = Vec::new();
        for (j, layer) in image.layers.iter().enumerate() {
            let layer_name = format!("{}-{}/layer.tar", i, j);
            append(&mut builder, &layer_name, layer);
            layer_names.push(layer_name);
        }
        items.push(json!({
            "Config": config_name,
            "RepoTags": image.repo_tags,
            "Layers": layer_names,
        }));
    }
    append(
        &mut builder,
        "manifest.json",
        &serde_json::to_vec(&items).unwrap(),
    );
    write_compressed(path, builder.into_inner().unwrap());
}

/// OCI image layout directory; each entry may carry a ref-name annotation.
pub(crate) fn write_oci_layout(dir: &Path, entries: &[(FixtureImage, Option<&str>)]) {
    let blobs = dir.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs).unwrap();
    let mut manifests = Vec::new();
    for (image, ref_name) in entries {
        for (digest, data) in image.blobs() {
            std::fs::write(blobs.join(digest.hex()), data).unwrap();
        }
        let manifest = image.manifest();
        let digest = Digest::of_bytes(&manifest);
        std::fs::write(blobs.join(digest.hex()), &manifest).unwrap();
        let mut desc = json!({
            "mediaType": crate::manifest::DOCKER_MANIFEST,
            "digest": digest.to_string(),
            "size": manifest.len(),
        });
        if let Some(r) = ref_name {
            let mut annotations = serde_json::Map::new();
            annotations.insert(ANNOTATION_REF_NAME.to_string(), json!(r));
            desc["annotations"] = serde_json::Value::Object(annotations);
        }
        manifests.push(desc);
    }
    std::fs::write(
        dir.join("index.json"),
        serde_json::to_vec(&json!({ "schemaVersion": 2, "manifests": manifests })).unwrap(),
    )
    .unwrap();
    std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();
}

/// Tarred OCI image layout.
pub(crate) fn write_oci_archive(path: &Path, entries: &[(FixtureImage, Option<&str>)]) {
    let layout = tempfile::TempDir::new().unwrap();
    write_oci_layout(layout.path(), entries);
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_dir_all(".", layout.path()).unwrap();
    write_compressed(path, builder.into_inner().unwrap());
}

/// `dir:` transport layout.
pub(crate) fn write_dir_image(dir: &Path, image: &FixtureImage) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("manifest.json"), image.manifest()).unwrap();
    for (digest, data) in image.blobs() {
        std::fs::write(dir.join(digest.hex()), data).unwrap();
    }
}

/// In-memory source standing in for a registry repository.
#[derive(Debug, Clone)]
pub(crate) struct MemorySource {
    reference: ImageReference,
    top: Digest,
    manifests: HashMap<Digest, Vec<u8>>,
    blobs: HashMap<Digest, Vec<u8>>,
    tags: Vec<String>,
}

impl MemorySource {
    pub fn single(image: &FixtureImage, reference: &str) -> Self {
        let manifest = image.manifest();
        let top = Digest::of_bytes(&manifest);
        Self {
            reference: ImageReference::parse(reference).unwrap(),
            top: top.clone(),
            manifests: HashMap::from([(top, manifest)]),
            blobs: image.blobs().into_iter().collect(),
            tags: Vec::new(),
        }
    }

    /// A reference with nothing behind it.
    pub fn empty(reference: &ImageReference) -> Self {
        Self {
            reference: reference.clone(),
            top: Digest::of_bytes(b""),
            manifests: HashMap::new(),
            blobs: HashMap::new(),
            tags: Vec::new(),
        }
    }

    /// Tags reported by `list_tags`.
    pub fn with_tag_list(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// A manifest list over `images`, pointed at by `reference`.
    pub fn list(images: &[&FixtureImage], reference: &str) -> Self {
        let mut manifests = HashMap::new();
        let mut blobs = HashMap::new();
        let mut entries = Vec::new();
        for image in images {
            let manifest = image.manifest();
            let digest = Digest::of_bytes(&manifest);
            entries.push((digest.clone(), manifest.len(), image.arch.clone()));
            manifests.insert(digest, manifest);
            blobs.extend(image.blobs());
        }
        let entry_refs: Vec<(&Digest, usize, &str, &str, Option<&str>)> = entries
            .iter()
            .map(|(d, size, arch)| (d, *size, "linux", arch.as_str(), None))
            .collect();
        let list = list_json(&entry_refs);
        let top = Digest::of_bytes(&list);
        manifests.insert(top.clone(), list);
        Self {
            reference: ImageReference::parse(reference).unwrap(),
            top,
            manifests,
            blobs,
            tags: Vec::new(),
        }
    }

    /// Digest of the manifest the reference currently points at.
    pub fn top_digest(&self) -> Digest {
        self.top.clone()
    }

    /// The same repository addressed by `digest` instead of a tag.
    pub fn pinned(&self, digest: &Digest) -> Self {
        Self {
            reference: ImageReference {
                locator: Some(Locator::Digest(digest.clone())),
                ..self.reference.clone()
            },
            top: digest.clone(),
            ..self.clone()
        }
    }

    /// The same repository under another tag.
    pub fn retagged(&self, tag: &str) -> Self {
        Self {
            reference: self.reference.with_tag(tag),
            ..self.clone()
        }
    }

    pub fn corrupt_blob(&mut self, digest: &Digest) {
        if let Some(data) = self.blobs.get_mut(digest) {
            data.push(b'!');
        }
    }
}

#[async_trait]
impl ImageSource for MemorySource {
    fn reference(&self) -> &ImageReference {
        &self.reference
    }

    async fn fetch_manifest(&self) -> Result<ManifestBundle> {
        self.fetch_manifest_by_digest(&self.top).await
    }

    async fn fetch_manifest_by_digest(&self, digest: &Digest) -> Result<ManifestBundle> {
        self.manifests
            .get(digest)
            .map(|b| ManifestBundle::new(b.clone()))
            .ok_or_else(|| SkiffError::ManifestUnknown {
                reference: self.reference.to_string(),
                message: digest.to_string(),
            })
    }

    async fn fetch_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        let data = self
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| SkiffError::Other(format!("blob {} unknown", digest)))?;
        digest.verify(&self.reference.to_string(), &data)?;
        Ok(data)
    }

    fn default_names(&self) -> Vec<String> {
        match self.reference.locator {
            Some(Locator::Tag(_)) => vec![self.reference.full_reference()],
            _ => Vec::new(),
        }
    }

    async fn list_tags(&self) -> Result<Vec<String>> {
        Ok(self.tags.clone())
    }
}

/// Repositories of [`MemorySource`]s, opened by reference.
#[derive(Debug, Default)]
pub(crate) struct MemoryRegistry {
    sources: HashMap<String, MemorySource>,
    tags: HashMap<String, Vec<String>>,
}

impl MemoryRegistry {
    /// Publish `image` as `repository:tag`.
    pub fn push(&mut self, repository: &str, tag: &str, image: &FixtureImage) {
        let reference = format!("{}:{}", repository, tag);
        self.sources
            .insert(reference.clone(), MemorySource::single(image, &reference));
        self.list_tag(repository, tag);
    }

    /// List `tag` without publishing any content for it.
    pub fn list_tag(&mut self, repository: &str, tag: &str) {
        self.tags
            .entry(repository.to_string())
            .or_default()
            .push(tag.to_string());
    }
}

#[async_trait]
impl SourceOpener for MemoryRegistry {
    async fn open(
        &self,
        reference: &ImageReference,
        _ctx: &SourceContext,
    ) -> Result<Box<dyn ImageSource>> {
        let tags = self.tags.get(&reference.name()).cloned().ok_or_else(|| {
            SkiffError::ManifestUnknown {
                reference: reference.to_string(),
                message: "repository unknown".to_string(),
            }
        })?;
        let source = self
            .sources
            .get(&reference.full_reference())
            .cloned()
            .unwrap_or_else(|| MemorySource::empty(reference));
        Ok(Box::new(source.with_tag_list(tags)))
    }
}
