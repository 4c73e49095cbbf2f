//! Manifest-list resolution.

use skiff_core::error::{Result, SkiffError};

use crate::digest::Digest;
use crate::manifest::{ImageManifestInfo, ManifestBundle, ParsedManifest};
use crate::platform::Platform;
use crate::transport::ImageSource;

/// Single-platform manifest chosen for a pull.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    /// Instance manifest bytes
    pub manifest: ManifestBundle,
    /// Parsed instance manifest
    pub image: ImageManifestInfo,
    /// Digest of the manifest list the instance was selected from, if any
    pub list_digest: Option<Digest>,
}

impl ResolvedImage {
    pub fn instance_digest(&self) -> &Digest {
        &self.manifest.digest
    }
}

/// Resolve the manifest a source returned to a single-platform image.
///
/// A list is narrowed to the entry matching `platform` and that instance is
/// fetched by digest; a plain manifest is used as-is and no list digest is
/// recorded.
pub async fn resolve_image(
    source: &dyn ImageSource,
    bundle: ManifestBundle,
    platform: &Platform,
) -> Result<ResolvedImage> {
    let reference = source.reference().to_string();

    match bundle.parse(&reference)? {
        ParsedManifest::Image(image) => Ok(ResolvedImage {
            manifest: bundle,
            image,
            list_digest: None,
        }),
        ParsedManifest::List(list) => {
            let entry = list.select(platform).ok_or_else(|| SkiffError::NoMatchingPlatform {
                reference: reference.clone(),
                platform: platform.to_string(),
            })?;

            tracing::debug!(
                reference = %reference,
                list = %list.digest,
                instance = %entry.digest,
                platform = %platform,
                "Selected manifest from list"
            );

            let instance = source.fetch_manifest_by_digest(&entry.digest).await?;
            match instance.parse(&reference)? {
                ParsedManifest::Image(image) => Ok(ResolvedImage {
                    manifest: instance,
                    image,
                    list_digest: Some(list.digest),
                }),
                ParsedManifest::List(_) => Err(SkiffError::MalformedManifest {
                    reference,
                    message: format!("manifest list entry {} is itself a list", entry.digest),
                }),
            }
        }
    }
}
