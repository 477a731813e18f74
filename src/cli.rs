//! Command-line interface definitions and argument parsing

use std::net::SocketAddr;

use clap::Parser;

use crate::error::{Error, Result};
use crate::model::KMeansParams;
use crate::pipeline::PipelineConfig;
use crate::server::ServerConfig;

const BYTES_PER_MB: usize = 1024 * 1024;

/// HTTP backend clustering uploaded CSV files with K-Means
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// Largest accepted upload, in megabytes
    #[arg(long, default_value = "16")]
    pub max_upload_mb: usize,

    /// Maximum iterations for K-Means algorithm
    #[arg(long, default_value = "300")]
    pub max_iters: u64,

    /// Tolerance for K-Means convergence
    #[arg(long, default_value = "1e-4")]
    pub tolerance: f64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Clustering settings taken from the flags
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        if self.max_iters == 0 {
            return Err(Error::Config("--max-iters must be at least 1".to_string()));
        }
        if !(self.tolerance > 0.0 && self.tolerance.is_finite()) {
            return Err(Error::Config(format!(
                "--tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }

        Ok(PipelineConfig {
            kmeans: KMeansParams {
                max_iters: self.max_iters,
                tolerance: self.tolerance,
            },
        })
    }

    /// Listener settings taken from the flags
    pub fn server_config(&self) -> Result<ServerConfig> {
        if self.max_upload_mb == 0 {
            return Err(Error::Config("--max-upload-mb must be at least 1".to_string()));
        }

        Ok(ServerConfig {
            bind: self.bind,
            max_upload_bytes: self.max_upload_mb.saturating_mul(BYTES_PER_MB),
        })
    }

    /// Default log filter when `RUST_LOG` is unset
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
