//! csvcluster: an HTTP backend that segments uploaded CSV files with K-Means
//!
//! An upload is parsed with Polars, reduced to its numeric columns, clustered
//! into three groups and returned as per-cluster statistics plus four charts
//! rendered with Plotters.

pub mod cli;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod server;
pub mod summary;
pub mod viz;

// Re-export public items for easier access
pub use cli::Args;
pub use data::{numeric_projection, read_csv, NumericProjection};
pub use error::{Error, Result};
pub use model::{fit_kmeans, KMeansModel, KMeansParams, N_CLUSTERS};
pub use pipeline::{run, ClusterReport, PipelineConfig};
pub use server::{build_router, serve, AppState, ServerConfig};
pub use summary::{summarize, ClusterStats};
pub use viz::{render_charts, Charts};
