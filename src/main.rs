//! csvcluster: HTTP entrypoint for CSV clustering
//!
//! Parses flags, installs logging and serves the upload API.

use anyhow::{Context, Result};
use clap::Parser;
use csvcluster::{serve, AppState, Args};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level())),
        )
        .init();

    let server_config = args.server_config()?;
    let state = AppState {
        pipeline: args.pipeline_config()?,
    };

    tracing::info!(
        "Customer segmentation backend: max upload {} bytes, K-Means max_iters {}, tolerance {}",
        server_config.max_upload_bytes,
        state.pipeline.kmeans.max_iters,
        state.pipeline.kmeans.tolerance
    );

    serve(server_config, state)
        .await
        .with_context(|| format!("server on {} stopped", server_config.bind))?;

    Ok(())
}
