//! Per-cluster statistics

use std::collections::BTreeMap;

use serde::Serialize;

use crate::data::NumericProjection;
use crate::model::KMeansModel;

/// Mean of each numeric column, keyed by cluster label then column name
pub type ClusterSummary = BTreeMap<usize, BTreeMap<String, f64>>;

/// Row count keyed by cluster label
pub type ClusterCount = BTreeMap<usize, usize>;

/// Grouped statistics for the clusters that received at least one row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterStats {
    pub cluster_summary: ClusterSummary,
    pub cluster_count: ClusterCount,
}

/// Group projection rows by label and compute means and counts
///
/// Empty clusters are left out of both maps.
pub fn summarize(projection: &NumericProjection, model: &KMeansModel) -> ClusterStats {
    let n_columns = projection.n_columns();
    let mut sums: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    let mut cluster_count = ClusterCount::new();

    for (row, &label) in projection.values.outer_iter().zip(model.labels.iter()) {
        let totals = sums.entry(label).or_insert_with(|| vec![0.0; n_columns]);
        for (total, value) in totals.iter_mut().zip(row.iter()) {
            *total += value;
        }
        *cluster_count.entry(label).or_insert(0) += 1;
    }

    let cluster_summary = sums
        .into_iter()
        .map(|(label, totals)| {
            let size = cluster_count[&label] as f64;
            let means = projection
                .columns
                .iter()
                .cloned()
                .zip(totals.into_iter().map(|total| total / size))
                .collect();
            (label, means)
        })
        .collect();

    ClusterStats {
        cluster_summary,
        cluster_count,
    }
}
