//! `skiff rmi` command: remove one or more local images.

use clap::Args;
use skiff_core::config::EngineConfig;
use skiff_image::RemoveOutcome;

#[derive(Args)]
pub struct RmiArgs {
    /// Images to remove (tag, digest, ID or ID prefix)
    #[arg(required_unless_present = "all")]
    pub images: Vec<String>,

    /// Remove all images
    #[arg(short, long, conflicts_with = "images")]
    pub all: bool,

    /// Ignore images that do not exist
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(args: RmiArgs, config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;

    if args.all {
        for outcome in store.remove_all(args.force).await? {
            report(&outcome);
        }
        return Ok(());
    }

    // Keep going past failures; the last one decides the exit code.
    let mut failure = None;
    for reference in &args.images {
        match store.remove(reference, args.force).await {
            Ok(outcome) => report(&outcome),
            Err(e) => {
                if let Some(previous) = failure.replace(e) {
                    eprintln!("Error: {previous}");
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn report(outcome: &RemoveOutcome) {
    for tag in &outcome.untagged {
        println!("Untagged: {tag}");
    }
    if let Some(id) = &outcome.deleted {
        println!("Deleted: {id}");
    }
}
