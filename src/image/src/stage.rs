//! Staging fetched content as an OCI image layout before it is committed.

use std::path::Path;

use futures::future::try_join_all;
use skiff_core::error::{Result, SkiffError};
use tempfile::TempDir;

use crate::digest::Digest;
use crate::manifest::ConfigSummary;
use crate::resolve::ResolvedImage;
use crate::transport::ImageSource;

/// Fully-fetched image waiting in the store's staging area.
///
/// Dropping it removes the staging directory, so a cancelled pull leaves
/// nothing behind.
#[derive(Debug)]
pub struct StagedImage {
    pub dir: TempDir,
    pub manifest_digest: Digest,
    pub list_digest: Option<Digest>,
    pub config_digest: Digest,
    pub layers: Vec<Digest>,
    pub size: u64,
    pub config: ConfigSummary,
}

impl StagedImage {
    /// Image ID: hex of the config digest.
    pub fn id(&self) -> &str {
        self.config_digest.hex()
    }
}

/// Fetch config and layers for a resolved image into `dir`, laid out as
/// `oci-layout`, `index.json`, `blobs/sha256/<hex>`.
pub async fn stage_image(
    source: &dyn ImageSource,
    resolved: ResolvedImage,
    dir: TempDir,
) -> Result<StagedImage> {
    let blobs_dir = dir.path().join("blobs").join("sha256");
    tokio::fs::create_dir_all(&blobs_dir).await.map_err(|e| {
        SkiffError::Store(format!(
            "Failed to create blobs directory {}: {}",
            blobs_dir.display(),
            e
        ))
    })?;

    let config_ref = &resolved.image.config;
    let config = source.fetch_blob(&config_ref.digest).await?;
    let summary = ConfigSummary::from_bytes(&config).map_err(|e| SkiffError::MalformedManifest {
        reference: source.reference().to_string(),
        message: format!("invalid image config {}: {}", config_ref.digest, e),
    })?;
    write_blob(&blobs_dir, &config_ref.digest, &config).await?;

    // Layers are fetched concurrently once the manifest is known.
    let layer_sizes = try_join_all(resolved.image.layers.iter().map(|layer| {
        let blobs_dir = &blobs_dir;
        async move {
            tracing::debug!(digest = %layer.digest, size = layer.size, "Pulling layer");
            let data = source.fetch_blob(&layer.digest).await?;
            write_blob(blobs_dir, &layer.digest, &data).await?;
            Ok::<u64, SkiffError>(data.len() as u64)
        }
    }))
    .await?;

    write_blob(&blobs_dir, &resolved.manifest.digest, &resolved.manifest.bytes).await?;

    tokio::fs::write(
        dir.path().join("oci-layout"),
        r#"{"imageLayoutVersion":"1.0.0"}"#,
    )
    .await?;
    let index = serde_json::json!({
        "schemaVersion": 2,
        "manifests": [{
            "mediaType": resolved.image.media_type,
            "digest": resolved.manifest.digest.to_string(),
            "size": resolved.manifest.bytes.len(),
        }]
    });
    tokio::fs::write(
        dir.path().join("index.json"),
        serde_json::to_string_pretty(&index)?,
    )
    .await?;

    let size = config.len() as u64 + layer_sizes.iter().sum::<u64>();
    Ok(StagedImage {
        manifest_digest: resolved.manifest.digest.clone(),
        list_digest: resolved.list_digest.clone(),
        config_digest: config_ref.digest.clone(),
        layers: resolved.image.layers.iter().map(|l| l.digest.clone()).collect(),
        size,
        config: summary,
        dir,
    })
}

async fn write_blob(blobs_dir: &Path, digest: &Digest, data: &[u8]) -> Result<()> {
    let path = blobs_dir.join(digest.hex());
    tokio::fs::write(&path, data).await.map_err(|e| {
        SkiffError::Store(format!("Failed to write blob {}: {}", path.display(), e))
    })
}
