//! Image sources.
//!
//! Each transport implements [`ImageSource`]; [`open_source`] dispatches on
//! the parsed reference's transport tag.

mod archive;
pub mod dir;
pub mod docker_archive;
pub mod oci_layout;
pub mod registry;

use std::time::Duration;

use async_trait::async_trait;
use skiff_core::config::EngineConfig;
use skiff_core::error::{Result, SkiffError};

use crate::auth::AuthResolver;
use crate::digest::Digest;
use crate::manifest::ManifestBundle;
use crate::reference::{ImageReference, Transport};

pub use dir::DirSource;
pub use docker_archive::DockerArchiveSource;
pub use oci_layout::OciLayoutSource;
pub use registry::RegistrySource;

/// Read access to one image at a source.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Reference this source was opened for.
    fn reference(&self) -> &ImageReference;

    /// The manifest (or manifest list) the reference points at.
    async fn fetch_manifest(&self) -> Result<ManifestBundle>;

    /// A manifest in the same repository, by digest.
    async fn fetch_manifest_by_digest(&self, digest: &Digest) -> Result<ManifestBundle>;

    /// A config or layer blob, verified against its digest.
    async fn fetch_blob(&self, digest: &Digest) -> Result<Vec<u8>>;

    /// Names the committed image is tagged with.
    fn default_names(&self) -> Vec<String>;

    /// Every tag in the source's repository.
    async fn list_tags(&self) -> Result<Vec<String>> {
        Err(SkiffError::malformed(
            self.reference().to_string(),
            "only registry sources can list tags",
        ))
    }
}

/// Opens the source a reference names. [`ImagePuller`](crate::ImagePuller)
/// goes through one for every fetch.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(
        &self,
        reference: &ImageReference,
        ctx: &SourceContext,
    ) -> Result<Box<dyn ImageSource>>;
}

/// [`SourceOpener`] over the built-in transports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportOpener;

#[async_trait]
impl SourceOpener for TransportOpener {
    async fn open(
        &self,
        reference: &ImageReference,
        ctx: &SourceContext,
    ) -> Result<Box<dyn ImageSource>> {
        open_source(reference, ctx).await
    }
}

/// Settings shared by every source opened during one operation.
#[derive(Debug, Clone, Default)]
pub struct SourceContext {
    pub auth: AuthResolver,
    pub insecure_registries: Vec<String>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
}

impl SourceContext {
    pub fn from_config(config: &EngineConfig, auth: AuthResolver) -> Self {
        Self {
            auth,
            insecure_registries: config.insecure_registries.clone(),
            connect_timeout: Some(Duration::from_secs(config.connect_timeout_secs)),
            read_timeout: Some(Duration::from_secs(config.read_timeout_secs)),
        }
    }
}

/// Open the source a reference names.
pub async fn open_source(
    reference: &ImageReference,
    ctx: &SourceContext,
) -> Result<Box<dyn ImageSource>> {
    let source: Box<dyn ImageSource> = match reference.transport {
        Transport::Registry => Box::new(RegistrySource::new(reference, ctx)?),
        Transport::DockerArchive => Box::new(DockerArchiveSource::open(reference)?),
        Transport::OciArchive => Box::new(OciLayoutSource::open_archive(reference)?),
        Transport::OciLayout => Box::new(OciLayoutSource::open(reference)?),
        Transport::Dir => Box::new(DirSource::open(reference)?),
    };
    Ok(source)
}
