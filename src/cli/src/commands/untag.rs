//! `skiff untag` command.

use clap::Args;
use skiff_core::config::EngineConfig;

#[derive(Args)]
pub struct UntagArgs {
    /// Image (tag, digest or ID)
    pub image: String,

    /// Names to remove; all names when omitted
    pub names: Vec<String>,
}

pub async fn execute(args: UntagArgs, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;
    let removed = store.untag(&args.image, &args.names).await?;
    tracing::debug!(image = %args.image, removed = ?removed, "Untagged");
    Ok(())
}
