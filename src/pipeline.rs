//! End-to-end clustering pipeline, independent of the HTTP layer

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::data::{numeric_projection, read_csv};
use crate::error::Result;
use crate::model::{fit_kmeans, KMeansParams};
use crate::summary::{summarize, ClusterCount, ClusterSummary};
use crate::viz::{render_charts, Charts};

/// Rows sampled for the silhouette score logged after each fit
const SILHOUETTE_SAMPLE: usize = 100;

/// Tunables for a pipeline run
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PipelineConfig {
    pub kmeans: KMeansParams,
}

/// Everything returned to the caller for one uploaded file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub cluster_summary: ClusterSummary,
    pub cluster_count: ClusterCount,
    pub charts: Charts,
}

/// Parse, clean, cluster, summarize and chart an uploaded CSV
///
/// Any failing stage aborts the run; no partial report is produced.
///
/// # Arguments
/// * `bytes` - Raw contents of the uploaded file
/// * `config` - Clustering settings
///
/// # Returns
/// * `ClusterReport` with per-cluster means, counts and charts
pub fn run(bytes: &[u8], config: &PipelineConfig) -> Result<ClusterReport> {
    let start_time = Instant::now();

    let df = read_csv(bytes)?;
    let projection = numeric_projection(&df)?;
    if projection.imputed_cells > 0 {
        info!(
            "Imputed {} missing numeric cells with column means",
            projection.imputed_cells
        );
    }

    let model = fit_kmeans(&projection, &config.kmeans)?;
    let silhouette = model.compute_silhouette_sample(&projection.values, SILHOUETTE_SAMPLE);
    debug!(
        "Cluster sizes {:?}, inertia {:.2}, silhouette (sample) {:.3}",
        model.cluster_sizes(),
        model.inertia,
        silhouette
    );

    let stats = summarize(&projection, &model);
    let charts = render_charts(&projection, &model)?;

    info!(
        "Clustered {} rows over {} numeric columns in {:.2}s",
        projection.n_rows(),
        projection.n_columns(),
        start_time.elapsed().as_secs_f64()
    );

    Ok(ClusterReport {
        cluster_summary: stats.cluster_summary,
        cluster_count: stats.cluster_count,
        charts,
    })
}
