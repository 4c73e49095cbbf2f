//! CLI command definitions and dispatch.

mod exists;
mod images;
mod inspect;
mod pull;
mod rmi;
mod tag;
mod untag;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use skiff_core::config::{EngineConfig, RegistriesConf};
use skiff_image::{ImageStore, SearchRegistries};

/// Skiff - pull container images and manage them locally.
#[derive(Parser)]
#[command(name = "skiff", version, about)]
pub struct Cli {
    /// Root directory of the local image store
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,

    /// Registries configuration file (overrides the default lookup)
    #[arg(long, global = true, value_name = "FILE")]
    pub registries_conf: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Pull an image from a registry, archive or layout
    Pull(pull::PullArgs),
    /// List images in local storage
    Images(images::ImagesArgs),
    /// Display detailed image information as JSON
    Inspect(inspect::InspectArgs),
    /// Add names to a local image
    Tag(tag::TagArgs),
    /// Remove names from a local image
    Untag(untag::UntagArgs),
    /// Remove one or more local images
    Rmi(rmi::RmiArgs),
    /// Check whether an image exists in local storage
    Exists(exists::ExistsArgs),
}

/// Terminate with an exit code and no error message.
#[derive(Debug)]
pub struct SilentExit(pub i32);

impl fmt::Display for SilentExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit status {}", self.0)
    }
}

impl std::error::Error for SilentExit {}

/// Engine configuration with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::load()?;
    if let Some(path) = &cli.registries_conf {
        config.apply_registries_conf(&RegistriesConf::from_path(path)?);
    }
    if let Some(dir) = &cli.store {
        config.store_dir = dir.clone();
    }
    Ok(config)
}

/// Open the shared image store.
pub(crate) fn open_image_store(
    config: &EngineConfig,
) -> Result<Arc<ImageStore>, Box<dyn std::error::Error>> {
    let store = ImageStore::new(&config.store_dir, SearchRegistries::from_config(config))?;
    Ok(Arc::new(store))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    tracing::debug!(store = %config.store_dir.display(), "Using image store");

    match cli.command {
        Command::Pull(args) => pull::execute(args, &config).await,
        Command::Images(args) => images::execute(args, &config).await,
        Command::Inspect(args) => inspect::execute(args, &config).await,
        Command::Tag(args) => tag::execute(args, &config).await,
        Command::Untag(args) => untag::execute(args, &config).await,
        Command::Rmi(args) => rmi::execute(args, &config).await,
        Command::Exists(args) => exists::execute(args, &config).await,
    }
}
