//! `skiff exists` command: exit 0 when the image is stored locally, 1 otherwise.

use clap::Args;
use skiff_core::config::EngineConfig;

use super::SilentExit;

#[derive(Args)]
pub struct ExistsArgs {
    /// Image reference (tag, digest, ID or ID prefix)
    pub image: String,
}

pub async fn execute(args: ExistsArgs, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;
    if store.exists(&args.image).await {
        Ok(())
    } else {
        Err(Box::new(SilentExit(1)))
    }
}
