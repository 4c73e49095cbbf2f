//! Local image store.
//!
//! Committed images live under `<store>/images/<id>` as OCI image layouts.
//! `index.json` persists the `id → StoredImage` map; tag and digest indices
//! are rebuilt from it in memory. Writers hold the store's `flock`, reload
//! the on-disk index, apply their change to that copy, persist it
//! atomically and only then publish it to readers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skiff_core::error::{Result, SkiffError};
use tempfile::TempDir;
use tokio::sync::RwLock;

use crate::digest::{is_full_hex_id, is_lower_hex, Digest, SHA256_PREFIX};
use crate::lock::StoreLock;
use crate::reference::{ImageReference, Locator, LOCALHOST};
use crate::search::SearchRegistries;
use crate::stage::StagedImage;

const INDEX_FILE: &str = "index.json";
const IMAGES_DIR: &str = "images";
const STAGING_DIR: &str = "tmp";

/// Shortest ID prefix accepted for lookups.
pub const MIN_ID_PREFIX: usize = 3;

/// Tag given to digest-only pulls when the sentinel policy is enabled.
pub const SENTINEL_TAG: &str = "none";

/// Metadata for a stored image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Hex of the config digest
    pub id: String,
    /// `name:tag` references pointing at this image
    #[serde(default)]
    pub repo_tags: BTreeSet<String>,
    /// `name@sha256:…` references this image was pulled through
    #[serde(default)]
    pub repo_digests: BTreeSet<String>,
    /// Digest of the single-platform manifest
    pub manifest_digest: Digest,
    /// Digest of the manifest list the image was selected from
    #[serde(default)]
    pub list_digest: Option<Digest>,
    pub config_digest: Digest,
    /// Layer digests, bottom to top
    #[serde(default)]
    pub layers: Vec<Digest>,
    /// Config plus layer bytes
    pub size_bytes: u64,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub architecture: String,
    /// Creation time recorded in the image config
    #[serde(default)]
    pub created: Option<String>,
    /// When the image was last committed
    pub pulled_at: DateTime<Utc>,
    /// Path to the OCI image layout on disk
    pub path: PathBuf,
}

impl StoredImage {
    /// First 12 characters of the ID.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    /// Every digest this image answers to.
    pub fn digests(&self) -> BTreeSet<Digest> {
        let mut out = BTreeSet::new();
        out.insert(self.manifest_digest.clone());
        if let Some(l) = &self.list_digest {
            out.insert(l.clone());
        }
        for rd in &self.repo_digests {
            if let Some((_, d)) = rd.rsplit_once('@') {
                if let Ok(d) = Digest::parse(d) {
                    out.insert(d);
                }
            }
        }
        out
    }

    /// Whether this image's layer chain strictly extends `parent`'s.
    pub fn depends_on(&self, parent: &StoredImage) -> bool {
        !parent.layers.is_empty()
            && self.layers.len() > parent.layers.len()
            && self.layers.starts_with(&parent.layers)
    }

    fn has_repository(&self, repo: &str) -> bool {
        let digest_prefix = format!("{}@", repo);
        let tag_prefix = format!("{}:", repo);
        self.repo_digests.iter().any(|d| d.starts_with(&digest_prefix))
            || self.repo_tags.iter().any(|t| {
                t.strip_prefix(&tag_prefix)
                    .map_or(false, |rest| !rest.contains('/'))
            })
    }
}

/// Names to attach to an image at commit time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageNames {
    /// Fully-qualified `name:tag` references
    pub tags: Vec<String>,
    /// Repositories that get `name@digest` entries even without a tag
    pub repositories: Vec<String>,
}

impl ImageNames {
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            repositories: Vec::new(),
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repositories.push(repository.into());
        self
    }

    fn all_repositories(&self) -> BTreeSet<String> {
        let mut repos: BTreeSet<String> = self.repositories.iter().cloned().collect();
        repos.extend(self.tags.iter().map(|t| split_tag(t).0.to_string()));
        repos
    }
}

/// What a removal did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Tags that no longer point anywhere
    pub untagged: Vec<String>,
    /// ID of the destroyed image, if the image itself went away
    pub deleted: Option<String>,
    removed_path: Option<PathBuf>,
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    images: Vec<StoredImage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MatchKind {
    Tag(String),
    Digest,
    Id,
}

#[derive(Debug, Clone)]
struct Resolution {
    id: String,
    kind: MatchKind,
}

/// In-memory index with secondary lookups.
#[derive(Debug, Default, Clone)]
struct StoreIndex {
    images: BTreeMap<String, StoredImage>,
    tags: HashMap<String, String>,
    digests: HashMap<Digest, Vec<String>>,
}

impl StoreIndex {
    fn from_images(images: impl IntoIterator<Item = StoredImage>) -> Self {
        let mut index = Self {
            images: images.into_iter().map(|i| (i.id.clone(), i)).collect(),
            ..Default::default()
        };
        index.rebuild();
        index
    }

    fn rebuild(&mut self) {
        self.tags.clear();
        self.digests.clear();
        for image in self.images.values() {
            for tag in &image.repo_tags {
                self.tags.insert(tag.clone(), image.id.clone());
            }
            for digest in image.digests() {
                self.digests.entry(digest).or_default().push(image.id.clone());
            }
        }
    }

    /// Point `tag` at `id`, taking it away from whichever image held it.
    fn assign_tag(&mut self, tag: &str, id: &str) {
        for image in self.images.values_mut() {
            if image.id != id {
                image.repo_tags.remove(tag);
            }
        }
        if let Some(image) = self.images.get_mut(id) {
            image.repo_tags.insert(tag.to_string());
        }
        self.tags.insert(tag.to_string(), id.to_string());
    }

    /// Images carrying `digest`, preferring an exact manifest match, then
    /// the most recently pulled.
    fn pick_by_digest(&self, digest: &Digest, repo: Option<&str>) -> Option<String> {
        let ids = self.digests.get(digest)?;
        let candidates: Vec<&StoredImage> = ids
            .iter()
            .filter_map(|id| self.images.get(id))
            .filter(|img| repo.map_or(true, |r| img.has_repository(r)))
            .collect();
        candidates
            .iter()
            .find(|img| &img.manifest_digest == digest)
            .or_else(|| candidates.iter().max_by_key(|img| img.pulled_at))
            .map(|img| img.id.clone())
    }

    /// Most recent untagged image pulled through `repo`.
    fn untagged_in_repo(&self, repo: &str) -> Option<String> {
        self.images
            .values()
            .filter(|img| img.repo_tags.is_empty() && img.has_repository(repo))
            .max_by_key(|img| img.pulled_at)
            .map(|img| img.id.clone())
    }

    fn resolve(&self, name: &str, search: &SearchRegistries) -> Result<Resolution> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SkiffError::malformed(name, "empty image reference"));
        }

        // Exact stored tag, including path-derived names that do not parse
        if let Some(id) = self.tags.get(name) {
            return Ok(Resolution {
                id: id.clone(),
                kind: MatchKind::Tag(name.to_string()),
            });
        }

        let hex = name.strip_prefix(SHA256_PREFIX).unwrap_or(name);
        if is_full_hex_id(hex) {
            if self.images.contains_key(hex) {
                return Ok(Resolution {
                    id: hex.to_string(),
                    kind: MatchKind::Id,
                });
            }
            let digest = Digest::parse(&format!("{}{}", SHA256_PREFIX, hex))?;
            if let Some(id) = self.pick_by_digest(&digest, None) {
                return Ok(Resolution {
                    id,
                    kind: MatchKind::Digest,
                });
            }
        }

        let mut parse_error = None;
        match ImageReference::parse_registry(name) {
            Ok(reference) => {
                for candidate in search.local_candidates(&reference) {
                    if let Some(found) = self.resolve_candidate(&candidate) {
                        return Ok(found);
                    }
                }
                if let Some(found) = self.resolve_by_suffix(name, &reference)? {
                    return Ok(found);
                }
            }
            Err(e) => parse_error = Some(e),
        }

        if hex.len() >= MIN_ID_PREFIX && is_lower_hex(hex) {
            let matches: Vec<&String> = self
                .images
                .keys()
                .filter(|id| id.starts_with(hex))
                .collect();
            match matches.len() {
                0 => {}
                1 => {
                    return Ok(Resolution {
                        id: matches[0].clone(),
                        kind: MatchKind::Id,
                    })
                }
                n => {
                    return Err(SkiffError::AmbiguousReference {
                        reference: name.to_string(),
                        matches: n,
                    })
                }
            }
        }

        Err(parse_error.unwrap_or_else(|| SkiffError::NotFound(name.to_string())))
    }

    /// Short names also match stored tags ending in `/<name>:<tag>`, such
    /// as `localhost/<dir>/alpine:latest` for `alpine`. Several distinct
    /// images matching is an error.
    fn resolve_by_suffix(&self, name: &str, reference: &ImageReference) -> Result<Option<Resolution>> {
        let Some(suffix) = short_name_suffix(reference) else {
            return Ok(None);
        };
        let mut matches: Vec<(&String, &String)> = self
            .tags
            .iter()
            .filter(|(tag, _)| tag.ends_with(&suffix))
            .collect();
        matches.sort();

        let mut ids: Vec<&String> = matches.iter().map(|(_, id)| *id).collect();
        ids.sort();
        ids.dedup();
        match (ids.len(), matches.first()) {
            (1, Some((tag, id))) => Ok(Some(Resolution {
                id: (*id).clone(),
                kind: MatchKind::Tag((*tag).clone()),
            })),
            (0, _) | (_, None) => Ok(None),
            (n, _) => Err(SkiffError::AmbiguousReference {
                reference: name.to_string(),
                matches: n,
            }),
        }
    }

    fn resolve_candidate(&self, candidate: &ImageReference) -> Option<Resolution> {
        let repo = candidate.name();
        match &candidate.locator {
            Some(Locator::Tag(tag)) => {
                let full = candidate.full_reference();
                if let Some(id) = self.tags.get(&full) {
                    return Some(Resolution {
                        id: id.clone(),
                        kind: MatchKind::Tag(full),
                    });
                }
                if tag == SENTINEL_TAG {
                    return self.untagged_in_repo(&repo).map(|id| Resolution {
                        id,
                        kind: MatchKind::Digest,
                    });
                }
                None
            }
            Some(Locator::Digest(d)) => self.pick_by_digest(d, Some(&repo)).map(|id| Resolution {
                id,
                kind: MatchKind::Digest,
            }),
            _ => None,
        }
    }
}

/// Disk-based image store with an in-memory index.
pub struct ImageStore {
    /// Root directory for image storage
    store_dir: PathBuf,
    index: Arc<RwLock<StoreIndex>>,
    lock: StoreLock,
    search: SearchRegistries,
}

impl ImageStore {
    /// Open (creating if needed) the store at `store_dir`, guarded by its
    /// own `store.lock`.
    pub fn new(store_dir: &Path, search: SearchRegistries) -> Result<Self> {
        Self::with_lock(store_dir, search, StoreLock::new(store_dir))
    }

    /// Open the store with an explicit lock.
    pub fn with_lock(store_dir: &Path, search: SearchRegistries, lock: StoreLock) -> Result<Self> {
        for dir in [
            store_dir.to_path_buf(),
            store_dir.join(IMAGES_DIR),
            store_dir.join(STAGING_DIR),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                SkiffError::Store(format!(
                    "Failed to create image store directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let index = load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(index)),
            lock,
            search,
        })
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn search(&self) -> &SearchRegistries {
        &self.search
    }

    /// Fresh staging directory on the store's filesystem.
    pub fn staging_dir(&self) -> Result<TempDir> {
        tempfile::Builder::new()
            .prefix("pull-")
            .tempdir_in(self.store_dir.join(STAGING_DIR))
            .map_err(|e| SkiffError::Store(format!("Failed to create staging directory: {}", e)))
    }

    /// Resolve a tag, digest, ID or ID prefix to a stored image.
    pub async fn lookup(&self, name: &str) -> Result<StoredImage> {
        let index = self.index.read().await;
        let resolution = index.resolve(name, &self.search)?;
        index
            .images
            .get(&resolution.id)
            .cloned()
            .ok_or_else(|| SkiffError::NotFound(name.to_string()))
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.lookup(name).await.is_ok()
    }

    /// All stored images, most recently pulled first.
    pub async fn list(&self) -> Vec<StoredImage> {
        let index = self.index.read().await;
        let mut images: Vec<StoredImage> = index.images.values().cloned().collect();
        images.sort_by(|a, b| b.pulled_at.cmp(&a.pulled_at).then(a.id.cmp(&b.id)));
        images
    }

    /// Publish a staged image and attach `names` to it.
    ///
    /// Committing content that is already stored merges names and digests
    /// into the existing entry and discards the staged copy.
    pub async fn commit(&self, staged: StagedImage, names: &ImageNames) -> Result<StoredImage> {
        let id = staged.id().to_string();
        let target = self.store_dir.join(IMAGES_DIR).join(&id);

        let stored = self
            .mutate(|index| {
                if !target.exists() {
                    std::fs::rename(staged.dir.path(), &target).map_err(|e| {
                        SkiffError::Store(format!(
                            "Failed to publish image {}: {}",
                            target.display(),
                            e
                        ))
                    })?;
                }

                let entry = index.images.entry(id.clone()).or_insert_with(|| StoredImage {
                    id: id.clone(),
                    repo_tags: BTreeSet::new(),
                    repo_digests: BTreeSet::new(),
                    manifest_digest: staged.manifest_digest.clone(),
                    list_digest: None,
                    config_digest: staged.config_digest.clone(),
                    layers: Vec::new(),
                    size_bytes: 0,
                    os: String::new(),
                    architecture: String::new(),
                    created: None,
                    pulled_at: Utc::now(),
                    path: target.clone(),
                });
                entry.manifest_digest = staged.manifest_digest.clone();
                if let Some(list) = &staged.list_digest {
                    entry.list_digest = Some(list.clone());
                }
                entry.layers = staged.layers.clone();
                entry.size_bytes = staged.size;
                entry.os = staged.config.os.clone();
                entry.architecture = staged.config.architecture.clone();
                entry.created = staged.config.created.clone();
                entry.pulled_at = Utc::now();
                entry.path = target.clone();

                for repo in names.all_repositories() {
                    entry
                        .repo_digests
                        .insert(format!("{}@{}", repo, staged.manifest_digest));
                    if let Some(list) = &staged.list_digest {
                        entry.repo_digests.insert(format!("{}@{}", repo, list));
                    }
                }

                for tag in &names.tags {
                    index.assign_tag(tag, &id);
                }

                index
                    .images
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| SkiffError::Store(format!("image {} vanished during commit", id)))
            })
            .await?;

        tracing::info!(
            id = %stored.short_id(),
            digest = %stored.manifest_digest,
            tags = ?names.tags,
            "Committed image"
        );
        Ok(stored)
    }

    /// Point `target` at the image `source` resolves to. Short targets are
    /// placed under `localhost/`. Returns the normalized target.
    pub async fn tag(&self, source: &str, target: &str) -> Result<String> {
        let target = normalize_tag_target(target)?;
        let search = &self.search;
        self.mutate(|index| {
            let resolution = index.resolve(source, search)?;
            index.assign_tag(&target, &resolution.id);
            Ok(())
        })
        .await?;
        tracing::info!(source = %source, target = %target, "Tagged image");
        Ok(target)
    }

    /// Remove `names` from the image `source` resolves to; with no names,
    /// remove every tag. Returns the tags removed.
    pub async fn untag(&self, source: &str, names: &[String]) -> Result<Vec<String>> {
        let search = &self.search;
        self.mutate(|index| {
            let resolution = index.resolve(source, search)?;
            let image = index
                .images
                .get_mut(&resolution.id)
                .ok_or_else(|| SkiffError::NotFound(source.to_string()))?;

            if names.is_empty() {
                return Ok(std::mem::take(&mut image.repo_tags).into_iter().collect());
            }

            let mut removed = Vec::new();
            for name in names {
                let tag = untag_candidates(name, search)
                    .into_iter()
                    .find(|c| image.repo_tags.contains(c))
                    .or_else(|| suffix_tag(&image.repo_tags, name))
                    .ok_or_else(|| {
                        SkiffError::NotFound(format!("{} (not a tag of {})", name, image.short_id()))
                    })?;
                image.repo_tags.remove(&tag);
                removed.push(tag);
            }
            Ok(removed)
        })
        .await
    }

    /// Remove by tag, digest or ID.
    ///
    /// Addressing a tag of an image that has other tags only removes that
    /// tag. Otherwise the image is destroyed, unless another image builds
    /// on it. With `force`, a missing image is not an error.
    pub async fn remove(&self, name: &str, force: bool) -> Result<RemoveOutcome> {
        let search = &self.search;
        let store_dir = &self.store_dir;
        let outcome = self
            .mutate(|index| {
                let resolution = match index.resolve(name, search) {
                    Ok(r) => r,
                    Err(SkiffError::NotFound(_)) if force => return Ok(RemoveOutcome::default()),
                    Err(e) => return Err(e),
                };

                if let MatchKind::Tag(tag) = &resolution.kind {
                    if let Some(image) = index.images.get_mut(&resolution.id) {
                        if image.repo_tags.len() > 1 {
                            image.repo_tags.remove(tag);
                            return Ok(RemoveOutcome {
                                untagged: vec![tag.clone()],
                                ..Default::default()
                            });
                        }
                    }
                }

                let image = index
                    .images
                    .get(&resolution.id)
                    .ok_or_else(|| SkiffError::NotFound(name.to_string()))?;
                if let Some(child) = index
                    .images
                    .values()
                    .find(|other| other.id != image.id && other.depends_on(image))
                {
                    return Err(SkiffError::InUse {
                        reference: name.to_string(),
                        message: format!("image {} is built on it", child.short_id()),
                    });
                }

                let removed = index
                    .images
                    .remove(&resolution.id)
                    .ok_or_else(|| SkiffError::NotFound(name.to_string()))?;
                // Detached while the lock is held; deleted once it is released.
                let detached = detach_image_dir(store_dir, &removed)?;
                Ok(RemoveOutcome {
                    untagged: removed.repo_tags.into_iter().collect(),
                    deleted: Some(removed.id),
                    removed_path: detached,
                })
            })
            .await?;

        if let Some(path) = &outcome.removed_path {
            if let Err(e) = tokio::fs::remove_dir_all(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove image directory");
            }
        }
        if let Some(id) = &outcome.deleted {
            tracing::info!(id = %id, reference = %name, "Removed image");
        }
        Ok(outcome)
    }

    /// Remove every image, dependents before the images they build on.
    pub async fn remove_all(&self, force: bool) -> Result<Vec<RemoveOutcome>> {
        let mut images = self.list().await;
        images.sort_by(|a, b| b.layers.len().cmp(&a.layers.len()));
        let mut outcomes = Vec::with_capacity(images.len());
        for image in images {
            outcomes.push(self.remove(&image.id, force).await?);
        }
        Ok(outcomes)
    }

    /// Run `f` on the freshest index under the store lock, persist the
    /// result and publish it to readers.
    async fn mutate<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreIndex) -> Result<T>,
    {
        let mut current = self.index.write().await;

        let lock = self.lock.clone();
        let _guard = tokio::task::spawn_blocking(move || lock.exclusive())
            .await
            .map_err(|e| SkiffError::Store(format!("store lock task failed: {}", e)))??;

        let mut next = load_index(&self.store_dir)?;
        let out = f(&mut next)?;
        next.rebuild();
        save_index(&self.store_dir, &next)?;
        *current = next;
        Ok(out)
    }
}

/// Split `name:tag` at the last ':' after the last '/'.
fn split_tag(name: &str) -> (&str, Option<&str>) {
    let segment_start = name.rfind('/').map_or(0, |p| p + 1);
    match name[segment_start..].rfind(':') {
        Some(colon) => {
            let split = segment_start + colon;
            (&name[..split], Some(&name[split + 1..]))
        }
        None => (name, None),
    }
}

fn normalize_tag_target(target: &str) -> Result<String> {
    let reference = ImageReference::parse_registry(target)?;
    if reference.digest().is_some() {
        return Err(SkiffError::malformed(
            target,
            "a tag target cannot be a digest reference",
        ));
    }
    let reference = if reference.is_short_name() {
        reference.with_authority(LOCALHOST)
    } else {
        reference
    };
    Ok(reference.full_reference())
}

/// Stored tag spellings `name` may refer to.
fn untag_candidates(name: &str, search: &SearchRegistries) -> Vec<String> {
    let mut out = vec![name.to_string()];
    if let Ok(reference) = ImageReference::parse_registry(name) {
        out.extend(
            search
                .local_candidates(&reference)
                .iter()
                .map(ImageReference::full_reference),
        );
    }
    out
}

/// Move a removed image's directory into the staging area so its ID can be
/// committed again at once. Returns the new location, if there was one.
fn detach_image_dir(store_dir: &Path, image: &StoredImage) -> Result<Option<PathBuf>> {
    let detached = store_dir.join(STAGING_DIR).join(format!("rm-{}", image.id));
    if detached.exists() {
        std::fs::remove_dir_all(&detached).map_err(|e| {
            SkiffError::Store(format!("Failed to clear {}: {}", detached.display(), e))
        })?;
    }
    match std::fs::rename(&image.path, &detached) {
        Ok(()) => Ok(Some(detached)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SkiffError::Store(format!(
            "Failed to remove image directory {}: {}",
            image.path.display(),
            e
        ))),
    }
}

/// `/<repository>:<tag>` for a short tagged name.
fn short_name_suffix(reference: &ImageReference) -> Option<String> {
    if !reference.is_short_name() {
        return None;
    }
    reference
        .tag()
        .map(|tag| format!("/{}:{}", reference.repository, tag))
}

/// The only one of `tags` that `name` matches by suffix.
fn suffix_tag(tags: &BTreeSet<String>, name: &str) -> Option<String> {
    let reference = ImageReference::parse_registry(name).ok()?;
    let suffix = short_name_suffix(&reference)?;
    let mut found = tags.iter().filter(|t| t.ends_with(&suffix));
    match (found.next(), found.next()) {
        (Some(tag), None) => Some(tag.clone()),
        _ => None,
    }
}

/// Load the index from disk, dropping entries whose directory vanished.
fn load_index(store_dir: &Path) -> Result<StoreIndex> {
    let index_path = store_dir.join(INDEX_FILE);
    if !index_path.exists() {
        return Ok(StoreIndex::default());
    }

    let data = std::fs::read_to_string(&index_path).map_err(|e| {
        SkiffError::Store(format!(
            "Failed to read store index {}: {}",
            index_path.display(),
            e
        ))
    })?;
    let file: IndexFile = serde_json::from_str(&data).map_err(|e| {
        SkiffError::Store(format!(
            "Failed to parse store index {}: {}",
            index_path.display(),
            e
        ))
    })?;

    let images = file.images.into_iter().filter(|img| {
        let present = img.path.exists();
        if !present {
            tracing::warn!(
                id = %img.short_id(),
                path = %img.path.display(),
                "Dropping store entry whose directory is missing"
            );
        }
        present
    });
    Ok(StoreIndex::from_images(images))
}

/// Write the index atomically (write tmp, rename).
fn save_index(store_dir: &Path, index: &StoreIndex) -> Result<()> {
    let index_path = store_dir.join(INDEX_FILE);
    let tmp_path = index_path.with_extension("json.tmp");
    let file = IndexFile {
        images: index.images.values().cloned().collect(),
    };
    let data = serde_json::to_string_pretty(&file)?;
    std::fs::write(&tmp_path, data).map_err(|e| {
        SkiffError::Store(format!(
            "Failed to write store index {}: {}",
            tmp_path.display(),
            e
        ))
    })?;
    std::fs::rename(&tmp_path, &index_path).map_err(|e| {
        SkiffError::Store(format!(
            "Failed to rename store index {} -> {}: {}",
            tmp_path.display(),
            index_path.display(),
            e
        ))
    })
}
