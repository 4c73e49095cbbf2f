//! `skiff pull` command.

use std::path::PathBuf;

use clap::Args;
use skiff_core::config::EngineConfig;
use skiff_image::{AuthResolver, ImagePuller, Platform, SourceContext, StoredImage};

#[derive(Args)]
pub struct PullArgs {
    /// Image reference (e.g., "alpine", "quay.io/org/image:tag",
    /// "docker-archive:/path/image.tar:@1")
    pub image: String,

    /// Suppress progress output; print only the image ID
    #[arg(short, long)]
    pub quiet: bool,

    /// Pull every tagged image in the repository
    #[arg(short, long)]
    pub all_tags: bool,

    /// Set target platform (e.g., "linux/amd64", "linux/arm64/v8")
    #[arg(long)]
    pub platform: Option<String>,

    /// Use this OS instead of the platform's when choosing an image
    #[arg(long, value_name = "OS")]
    pub override_os: Option<String>,

    /// Use this architecture instead of the platform's when choosing an image
    #[arg(long, value_name = "ARCH")]
    pub override_arch: Option<String>,

    /// Use this variant instead of the platform's when choosing an image
    #[arg(long, value_name = "VARIANT")]
    pub override_variant: Option<String>,

    /// Path of the registry authentication file
    #[arg(long, value_name = "FILE")]
    pub authfile: Option<PathBuf>,
}

pub async fn execute(args: PullArgs, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let auth = AuthResolver::new(args.authfile.as_deref())?;
    let platform = target_platform(&args, config)?;

    let store = super::open_image_store(config)?;
    let puller = ImagePuller::new(store, config, SourceContext::from_config(config, auth));

    if args.all_tags {
        let report = puller.pull_all_tags(&args.image, &platform).await?;
        for failure in &report.failures {
            eprintln!("Warning: {}: {}", failure.reference, failure.error);
        }
        print!(
            "{}",
            crate::output::pulled_summary(report.pulled.iter().map(|p| p.reference.as_str()))
        );
        return Ok(());
    }

    if !args.quiet {
        eprintln!("Trying to pull {}...", args.image);
    }
    let pulled = puller.pull(&args.image, &platform).await?;
    if !args.quiet {
        print_progress(&pulled.image);
    }
    println!("{}", pulled.image.id);
    Ok(())
}

fn target_platform(args: &PullArgs, config: &EngineConfig) -> Result<Platform, Box<dyn std::error::Error>> {
    let base = match args.platform.as_deref().or(config.platform.as_deref()) {
        Some(p) => Platform::parse(p)?,
        None => Platform::host(),
    };
    Ok(base.with_overrides(
        args.override_os.as_deref(),
        args.override_arch.as_deref(),
        args.override_variant.as_deref(),
    ))
}

fn print_progress(image: &StoredImage) {
    eprintln!("Getting image source signatures");
    for layer in &image.layers {
        eprintln!("Copying blob {}", crate::output::display_digest(layer.as_str(), false));
    }
    eprintln!(
        "Copying config {}",
        crate::output::display_digest(image.config_digest.as_str(), false)
    );
    eprintln!("Writing manifest to image destination");
}
