//! Pull orchestration.
//!
//! Parses the reference, expands short names, opens the transport,
//! resolves manifest lists, stages the content and commits it to the store.

use std::sync::Arc;

use skiff_core::config::EngineConfig;
use skiff_core::error::{CandidateError, Result, SkiffError};

use crate::platform::Platform;
use crate::reference::{has_explicit_locator, normalize_authority, ImageReference, Transport};
use crate::resolve::resolve_image;
use crate::search::SearchRegistries;
use crate::stage::stage_image;
use crate::store::{ImageNames, ImageStore, StoredImage, SENTINEL_TAG};
use crate::transport::{ImageSource, SourceContext, SourceOpener, TransportOpener};

/// A committed pull.
#[derive(Debug, Clone)]
pub struct PulledImage {
    /// Reference the content was fetched from
    pub reference: String,
    pub image: StoredImage,
}

/// Outcome of pulling every tag in a repository.
#[derive(Debug, Default)]
pub struct AllTagsReport {
    pub pulled: Vec<PulledImage>,
    pub failures: Vec<CandidateError>,
}

/// Drives pulls into an [`ImageStore`].
pub struct ImagePuller {
    store: Arc<ImageStore>,
    ctx: SourceContext,
    opener: Arc<dyn SourceOpener>,
    search: SearchRegistries,
    blocked: Vec<String>,
    sentinel_tag: bool,
}

impl ImagePuller {
    pub fn new(store: Arc<ImageStore>, config: &EngineConfig, ctx: SourceContext) -> Self {
        Self {
            search: store.search().clone(),
            blocked: config
                .blocked_registries
                .iter()
                .map(|r| normalize_authority(r))
                .collect(),
            sentinel_tag: config.digest_pull_sentinel_tag,
            store,
            ctx,
            opener: Arc::new(TransportOpener),
        }
    }

    /// Open sources through `opener` instead of the built-in transports.
    pub fn with_opener(mut self, opener: Arc<dyn SourceOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn store(&self) -> &Arc<ImageStore> {
        &self.store
    }

    /// Pull one image.
    ///
    /// Short names try each search registry in order and fail with
    /// `ImageNotFound` listing every attempt; qualified and transport
    /// references report their own error.
    pub async fn pull(&self, raw: &str, platform: &Platform) -> Result<PulledImage> {
        let reference = ImageReference::parse(raw)?;
        if reference.transport != Transport::Registry {
            return self.pull_candidate(&reference, platform).await;
        }

        if !reference.is_short_name() {
            self.check_blocked(&reference)?;
            return self.pull_candidate(&reference, platform).await;
        }

        let mut attempts = Vec::new();
        for candidate in self.search.candidates(&reference)? {
            let name = candidate.full_reference();
            if let Err(e) = self.check_blocked(&candidate) {
                attempts.push(CandidateError::new(name, e));
                continue;
            }
            tracing::info!(reference = %name, "Trying to pull");
            match self.pull_candidate(&candidate, platform).await {
                Ok(pulled) => return Ok(pulled),
                Err(e) => {
                    tracing::debug!(reference = %name, error = %e, "Candidate failed");
                    attempts.push(CandidateError::new(name, e));
                }
            }
        }

        Err(SkiffError::ImageNotFound {
            reference: raw.to_string(),
            attempts,
        })
    }

    /// Pull every tag of a registry repository. Succeeds when at least one
    /// tag was committed; per-tag failures are reported, not fatal.
    pub async fn pull_all_tags(&self, raw: &str, platform: &Platform) -> Result<AllTagsReport> {
        if has_explicit_locator(raw) {
            return Err(SkiffError::malformed(
                raw,
                "tag or digest can't be used with --all-tags",
            ));
        }
        let reference = ImageReference::parse(raw)?;
        if reference.transport != Transport::Registry {
            return Err(SkiffError::malformed(
                raw,
                "--all-tags needs a registry reference",
            ));
        }

        let mut attempts = Vec::new();
        for candidate in self.search.candidates(&reference)? {
            let name = candidate.name();
            if let Err(e) = self.check_blocked(&candidate) {
                attempts.push(CandidateError::new(name, e));
                continue;
            }

            let tags = match self.opener.open(&candidate, &self.ctx).await {
                Ok(source) => source.list_tags().await,
                Err(e) => Err(e),
            };
            let tags = match tags {
                Ok(tags) if !tags.is_empty() => tags,
                Ok(_) => {
                    attempts.push(CandidateError::new(
                        name.clone(),
                        SkiffError::NotFound(format!("{}: repository has no tags", name)),
                    ));
                    continue;
                }
                Err(e) => {
                    attempts.push(CandidateError::new(name, e));
                    continue;
                }
            };

            tracing::info!(repository = %name, tags = tags.len(), "Pulling all tags");
            let mut report = AllTagsReport::default();
            for tag in tags {
                let tagged = candidate.with_tag(&tag);
                match self.pull_candidate(&tagged, platform).await {
                    Ok(pulled) => report.pulled.push(pulled),
                    Err(e) => {
                        tracing::warn!(reference = %tagged.full_reference(), error = %e, "Failed to pull tag");
                        report
                            .failures
                            .push(CandidateError::new(tagged.full_reference(), e));
                    }
                }
            }

            if report.pulled.is_empty() {
                return Err(SkiffError::ImageNotFound {
                    reference: name,
                    attempts: report.failures,
                });
            }
            return Ok(report);
        }

        Err(SkiffError::ImageNotFound {
            reference: raw.to_string(),
            attempts,
        })
    }

    /// Fetch, resolve, stage and commit the image `source` points at.
    pub async fn pull_from_source(
        &self,
        source: &dyn ImageSource,
        platform: &Platform,
    ) -> Result<PulledImage> {
        let reference = source.reference().clone();

        let bundle = source.fetch_manifest().await?;
        if let Some(expected) = reference.digest() {
            if &bundle.digest != expected {
                return Err(SkiffError::DigestMismatch {
                    reference: reference.to_string(),
                    expected: expected.to_string(),
                    actual: bundle.digest.to_string(),
                });
            }
        }

        let resolved = resolve_image(source, bundle, platform).await?;
        let staged = stage_image(source, resolved, self.store.staging_dir()?).await?;
        let image = self.store.commit(staged, &self.names_for(source)).await?;

        tracing::info!(
            reference = %reference,
            id = %image.short_id(),
            digest = %image.manifest_digest,
            "Pulled image"
        );
        Ok(PulledImage {
            reference: reference.to_string(),
            image,
        })
    }

    async fn pull_candidate(&self, reference: &ImageReference, platform: &Platform) -> Result<PulledImage> {
        let source = self.opener.open(reference, &self.ctx).await?;
        self.pull_from_source(source.as_ref(), platform).await
    }

    fn names_for(&self, source: &dyn ImageSource) -> ImageNames {
        let reference = source.reference();
        let mut names = ImageNames::from_tags(source.default_names());
        if reference.transport == Transport::Registry {
            names = names.with_repository(reference.name());
            if reference.digest().is_some() && self.sentinel_tag {
                names.tags.push(format!("{}:{}", reference.name(), SENTINEL_TAG));
            }
        }
        names
    }

    fn check_blocked(&self, reference: &ImageReference) -> Result<()> {
        match &reference.authority {
            Some(registry) if self.blocked.contains(registry) => Err(SkiffError::Registry {
                registry: registry.clone(),
                message: "registry is blocked in the registries configuration".to_string(),
            }),
            _ => Ok(()),
        }
    }
}
