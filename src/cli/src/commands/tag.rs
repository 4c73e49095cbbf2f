//! `skiff tag` command: add names to an existing image.

use clap::Args;
use skiff_core::config::EngineConfig;

#[derive(Args)]
pub struct TagArgs {
    /// Source image (tag, digest or ID)
    pub source: String,

    /// New names; short names are placed under localhost/
    #[arg(required = true)]
    pub targets: Vec<String>,
}

pub async fn execute(args: TagArgs, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;
    for target in &args.targets {
        store.tag(&args.source, target).await?;
    }
    Ok(())
}
