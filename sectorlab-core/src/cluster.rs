//! Cluster selection: one-dimensional k-means and elbow detection.
//!
//! `select_k` fits k-means for every candidate `k`, normalizes the inertia
//! curve to the unit square and picks the point of maximum discrete
//! curvature. `fit` is the k-means++ / Lloyd fit used for both the candidate
//! sweep and the final centroids.

use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use crate::config::ClusteringConfig;
use crate::error::AnalysisError;
use crate::rng::RngHierarchy;

const SEED_STREAM: &str = "kmeans";

/// Curvature differences below this are treated as ties.
const CURVATURE_TIE_TOLERANCE: f64 = 1e-12;

/// Result of one k-means fit: sorted centroids and within-cluster sum of squares.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub centroids: Vec<f64>,
    pub inertia: f64,
}

/// Choose the number of sectors for `prices` by the elbow of the inertia curve.
///
/// Returns `1 <= K <= max_k`. Identical prices short-circuit to `K = 1`.
pub fn select_k(
    prices: &[f64],
    max_k: usize,
    min_data_points: usize,
    params: &ClusteringConfig,
) -> Result<usize, AnalysisError> {
    if prices.len() < min_data_points || max_k < 1 {
        return Err(AnalysisError::InsufficientData {
            required: min_data_points.max(1),
            actual: prices.len(),
        });
    }

    let distinct = distinct_count(prices);
    if distinct <= 1 {
        return Ok(1);
    }

    let upper = max_k.min(distinct).min((prices.len() / 2).max(1));
    if upper < 3 {
        // No interior point to measure curvature at.
        return Ok(1);
    }

    let inertias: Vec<f64> = (1..=upper)
        .map(|k| {
            let inertia = fit(prices, k, params).inertia;
            debug!(k, inertia, "candidate fit");
            inertia
        })
        .collect();

    Ok(elbow_k(&inertias))
}

/// Locate the elbow of an inertia curve indexed by `k = 1..=len`.
///
/// Both axes are normalized to `[0, 1]`; curvature is `y'' / (1 + y'^2)^1.5`
/// with central differences. The smallest `k` with the maximum positive
/// curvature wins; a curve with no positive curvature, or with fewer than
/// three points, yields `1`.
pub fn elbow_k(inertias: &[f64]) -> usize {
    let n = inertias.len();
    if n < 3 {
        return 1;
    }

    let (lo, hi) = inertias
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;
    if span.is_nan() || span <= 0.0 {
        return 1;
    }

    let y: Vec<f64> = inertias.iter().map(|v| (v - lo) / span).collect();
    let h = 1.0 / (n - 1) as f64;

    let mut best_k = 1;
    let mut best_curvature = 0.0;
    for i in 1..n - 1 {
        let slope = (y[i + 1] - y[i - 1]) / (2.0 * h);
        let second = (y[i - 1] - 2.0 * y[i] + y[i + 1]) / (h * h);
        let curvature = second / (1.0 + slope * slope).powf(1.5);
        if curvature > best_curvature + CURVATURE_TIE_TOLERANCE {
            best_curvature = curvature;
            best_k = i + 1;
        }
    }
    best_k
}

/// Fit k-means with `k` centroids: `n_init` k-means++ restarts, best inertia wins.
///
/// `k` is clamped to `1..=prices.len()`. Centroids are returned ascending.
pub fn fit(prices: &[f64], k: usize, params: &ClusteringConfig) -> KMeansFit {
    let k = k.clamp(1, prices.len().max(1));
    let seeds = RngHierarchy::new(params.random_state);

    let mut best: Option<KMeansFit> = None;
    for restart in 0..params.n_init.max(1) {
        let mut rng = seeds.rng_for(SEED_STREAM, k, restart);
        let candidate = lloyd(prices, plus_plus_init(prices, k, &mut rng), params);
        if best.as_ref().map_or(true, |b| candidate.inertia < b.inertia) {
            best = Some(candidate);
        }
    }

    let mut best = best.unwrap_or(KMeansFit {
        centroids: Vec::new(),
        inertia: 0.0,
    });
    best.centroids.sort_by(f64::total_cmp);
    best
}

fn distinct_count(prices: &[f64]) -> usize {
    let mut sorted = prices.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    sorted.len()
}

/// k-means++ seeding: each new centroid is drawn with probability
/// proportional to its squared distance from the nearest chosen one.
fn plus_plus_init(prices: &[f64], k: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut centroids = Vec::with_capacity(k);
    if prices.is_empty() {
        return centroids;
    }
    centroids.push(prices[rng.gen_range(0..prices.len())]);

    let mut dist2: Vec<f64> = prices
        .iter()
        .map(|&p| (p - centroids[0]).powi(2))
        .collect();

    while centroids.len() < k {
        let total: f64 = dist2.iter().sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut chosen = prices.len() - 1;
            for (i, d) in dist2.iter().enumerate() {
                acc += d;
                if acc > target {
                    chosen = i;
                    break;
                }
            }
            prices[chosen]
        } else {
            prices[rng.gen_range(0..prices.len())]
        };
        centroids.push(next);
        for (d, &p) in dist2.iter_mut().zip(prices) {
            *d = d.min((p - next).powi(2));
        }
    }
    centroids
}

fn nearest(centroids: &[f64], p: f64) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (j, &c) in centroids.iter().enumerate() {
        let d = (p - c).abs();
        if d < best_d {
            best_d = d;
            best = j;
        }
    }
    best
}

fn lloyd(prices: &[f64], mut centroids: Vec<f64>, params: &ClusteringConfig) -> KMeansFit {
    let k = centroids.len();
    let mut labels = vec![0usize; prices.len()];

    for _ in 0..params.max_iterations.max(1) {
        for (label, &p) in labels.iter_mut().zip(prices) {
            *label = nearest(&centroids, p);
        }

        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for (&label, &p) in labels.iter().zip(prices) {
            sums[label] += p;
            counts[label] += 1;
        }

        let mut updated: Vec<f64> = (0..k)
            .map(|j| {
                if counts[j] > 0 {
                    sums[j] / counts[j] as f64
                } else {
                    centroids[j]
                }
            })
            .collect();

        // Empty cluster: re-seed at the point farthest from every current centroid.
        for j in 0..k {
            if counts[j] == 0 {
                let far = prices
                    .iter()
                    .map(|&p| (p, (p - updated[nearest(&updated, p)]).abs()))
                    .max_by(|a, b| a.1.total_cmp(&b.1));
                if let Some((p, d)) = far {
                    if d > 0.0 {
                        updated[j] = p;
                    }
                }
            }
        }

        let shift = centroids
            .iter()
            .zip(&updated)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        centroids = updated;
        if shift <= params.tolerance {
            break;
        }
    }

    let inertia = prices
        .iter()
        .map(|&p| (p - centroids[nearest(&centroids, p)]).powi(2))
        .sum();

    KMeansFit { centroids, inertia }
}
