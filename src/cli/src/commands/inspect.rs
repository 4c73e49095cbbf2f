//! `skiff inspect` command: display detailed image metadata as JSON.

use clap::Args;
use skiff_core::config::EngineConfig;
use skiff_image::StoredImage;

#[derive(Args)]
pub struct InspectArgs {
    /// Image references (tag, digest, ID or ID prefix) to inspect
    #[arg(required = true)]
    pub images: Vec<String>,
}

pub async fn execute(args: InspectArgs, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;

    let mut records = Vec::with_capacity(args.images.len());
    let mut failure = None;
    for reference in &args.images {
        match store.lookup(reference).await {
            Ok(image) => records.push(image_record(&image)),
            Err(e) => {
                if let Some(previous) = failure.replace(e) {
                    eprintln!("Error: {previous}");
                }
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&records)?);
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn image_record(image: &StoredImage) -> serde_json::Value {
    serde_json::json!({
        "Id": image.id,
        "Digest": image.manifest_digest.to_string(),
        "ManifestListDigest": image.list_digest.as_ref().map(|d| d.to_string()),
        "RepoTags": image.repo_tags,
        "RepoDigests": image.repo_digests,
        "Size": image.size_bytes,
        "Os": image.os,
        "Architecture": image.architecture,
        "Created": image.created,
        "PulledAt": image.pulled_at.to_rfc3339(),
        "Config": image_config(image),
        "RootFS": {
            "Layers": image.layers.iter().map(|l| l.to_string()).collect::<Vec<_>>(),
        },
    })
}

/// The `config` section of the stored image config blob, if readable.
fn image_config(image: &StoredImage) -> serde_json::Value {
    let path = image
        .path
        .join("blobs")
        .join("sha256")
        .join(image.config_digest.hex());
    std::fs::read(&path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .and_then(|config| config.get("config").cloned())
        .unwrap_or(serde_json::Value::Null)
}
