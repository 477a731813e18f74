//! K-Means clustering model implementation

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use tracing::debug;

use crate::data::NumericProjection;
use crate::error::{Error, Result};

/// Number of clusters every upload is partitioned into
pub const N_CLUSTERS: usize = 3;

/// Seed for centroid initialisation, fixed so labels are reproducible
pub const RANDOM_SEED: u64 = 42;

/// Iteration and convergence settings for a fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KMeansParams {
    pub max_iters: u64,
    pub tolerance: f64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            max_iters: 300,
            tolerance: 1e-4,
        }
    }
}

/// K-Means model wrapper with fitted parameters
#[derive(Debug)]
pub struct KMeansModel {
    /// Number of clusters
    pub n_clusters: usize,
    /// Cluster assignment for every row of the projection
    pub labels: Array1<usize>,
    /// Cluster centroids in feature space
    pub centroids: Array2<f64>,
    /// Within-cluster sum of squares (inertia)
    pub inertia: f64,
}

impl KMeansModel {
    /// Rows assigned to each cluster, indexed by label
    pub fn cluster_sizes(&self) -> Vec<usize> {
        self.labels
            .iter()
            .filter(|&&label| label < self.n_clusters)
            .fold(vec![0; self.n_clusters], |mut sizes, &label| {
                sizes[label] += 1;
                sizes
            })
    }

    /// Mean silhouette coefficient over the first `sample_size` rows
    ///
    /// Only sampled rows are compared with each other, so the cost stays
    /// quadratic in the sample rather than in the whole upload.
    pub fn compute_silhouette_sample(&self, features: &Array2<f64>, sample_size: usize) -> f64 {
        let n_samples = features.nrows().min(sample_size);
        if n_samples < 2 {
            return 0.0;
        }

        let total: f64 = (0..n_samples)
            .map(|i| {
                // Distance sums and counts per cluster, excluding row i itself
                let mut sums = Array1::<f64>::zeros(self.n_clusters);
                let mut counts = Array1::<usize>::zeros(self.n_clusters);
                for j in (0..n_samples).filter(|&j| j != i) {
                    let label = self.labels[j];
                    if label < self.n_clusters {
                        sums[label] += euclidean_distance(&features.row(i), &features.row(j));
                        counts[label] += 1;
                    }
                }

                let own = self.labels[i];
                let cohesion = match counts.get(own) {
                    Some(&count) if count > 0 => sums[own] / count as f64,
                    _ => 0.0,
                };
                let separation = (0..self.n_clusters)
                    .filter(|&c| c != own && counts[c] > 0)
                    .map(|c| sums[c] / counts[c] as f64)
                    .fold(f64::INFINITY, f64::min);

                let spread = cohesion.max(separation);
                if separation.is_infinite() || spread == 0.0 {
                    0.0
                } else {
                    (separation - cohesion) / spread
                }
            })
            .sum();

        total / n_samples as f64
    }
}

/// Fit K-Means with [`N_CLUSTERS`] clusters on a numeric projection
///
/// Rows are clustered as uploaded, without rescaling. Projections with fewer
/// rows than clusters are rejected before fitting.
///
/// # Arguments
/// * `projection` - Cleaned numeric columns of the upload
/// * `params` - Iteration cap and convergence tolerance
///
/// # Returns
/// * Fitted `KMeansModel` with labels, centroids and inertia
pub fn fit_kmeans(projection: &NumericProjection, params: &KMeansParams) -> Result<KMeansModel> {
    fit_kmeans_with(&projection.values, N_CLUSTERS, params)
}

fn fit_kmeans_with(
    features: &Array2<f64>,
    n_clusters: usize,
    params: &KMeansParams,
) -> Result<KMeansModel> {
    if features.nrows() < n_clusters {
        return Err(Error::TooFewRows {
            rows: features.nrows(),
            clusters: n_clusters,
        });
    }

    let dataset = DatasetBase::from(features.clone());
    let rng = Xoshiro256Plus::seed_from_u64(RANDOM_SEED);

    let model = KMeans::params_with(n_clusters, rng, L2Dist)
        .max_n_iterations(params.max_iters)
        .tolerance(params.tolerance)
        .fit(&dataset)?;

    let labels: Array1<usize> = model.predict(features);
    let centroids = model.centroids().clone();
    let inertia = compute_inertia(features, &labels, &centroids);

    debug!(
        "K-Means fitted: {} rows, {} clusters, inertia {:.4}",
        features.nrows(),
        n_clusters,
        inertia
    );

    Ok(KMeansModel {
        n_clusters,
        labels,
        centroids,
        inertia,
    })
}

/// Compute within-cluster sum of squares (inertia)
fn compute_inertia(features: &Array2<f64>, labels: &Array1<usize>, centroids: &Array2<f64>) -> f64 {
    labels
        .iter()
        .enumerate()
        .filter(|&(_, &cluster)| cluster < centroids.nrows())
        .map(|(i, &cluster)| {
            let distance = euclidean_distance(&features.row(i), &centroids.row(cluster));
            distance * distance
        })
        .sum()
}

fn euclidean_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    (a - b).mapv(|d| d * d).sum().sqrt()
}
