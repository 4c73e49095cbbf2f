//! Skiff CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use skiff_cli::commands::{dispatch, Cli, SilentExit};
use skiff_core::error::{SkiffError, EXIT_USAGE};

#[tokio::main]
async fn main() {
    // SKIFF_LOG takes precedence over RUST_LOG
    let filter = std::env::var("SKIFF_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    if let Err(e) = dispatch(cli).await {
        if let Some(exit) = e.downcast_ref::<SilentExit>() {
            std::process::exit(exit.0);
        }
        let code = e
            .downcast_ref::<SkiffError>()
            .map_or(EXIT_USAGE, SkiffError::exit_code);
        eprintln!("Error: {e}");
        std::process::exit(code);
    }
}
