//! Sector construction: contiguous price intervals around sorted centroids.
//!
//! Boundaries sit at midpoints between consecutive centroids. The lowest and
//! highest sectors store the observed price extremes for rendering, but for
//! membership they extend to -inf / +inf so every real price lands in exactly
//! one sector. Containment is closed-open `[lower, upper)`; the top sector is
//! closed at the top.

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Width used for epsilon/threshold when a sector has zero extent.
pub const FALLBACK_WIDTH: f64 = 1e-6;

/// Sampled density curve: parallel `x` / `y` sequences of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DensityCurve {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl DensityCurve {
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }
}

/// One price sector.
///
/// `expected_value`, `median` and `density_curve` start as a point mass at
/// the centroid and are filled in by the density estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    /// 0-based rank by price.
    pub index: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub centroid: f64,
    pub epsilon: f64,
    pub threshold: f64,
    pub expected_value: f64,
    pub median: f64,
    pub density_curve: DensityCurve,
    /// Number of price samples contained in this sector.
    pub member_count: usize,
    /// True for the highest sector, which is closed (and open-ended) at the top.
    pub is_top: bool,
}

impl Sector {
    /// Membership test with open-ended extremes.
    pub fn contains(&self, price: f64) -> bool {
        if price.is_nan() {
            return false;
        }
        let above_lower = self.index == 0 || price >= self.lower_bound;
        let below_upper = self.is_top || price < self.upper_bound;
        above_lower && below_upper
    }

    pub fn width(&self) -> f64 {
        self.upper_bound - self.lower_bound
    }
}

/// Ordered, contiguous set of sectors covering the whole price line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorSet {
    sectors: Vec<Sector>,
}

impl SectorSet {
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn sectors_mut(&mut self) -> &mut [Sector] {
        &mut self.sectors
    }

    pub fn into_sectors(self) -> Vec<Sector> {
        self.sectors
    }

    pub fn len(&self) -> usize {
        self.sectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sector> {
        self.sectors.get(index)
    }

    /// Index of the sector containing `price`; `None` only for NaN.
    pub fn locate(&self, price: f64) -> Option<usize> {
        if price.is_nan() || self.sectors.is_empty() {
            return None;
        }
        Some(self.sectors[1..].partition_point(|s| s.lower_bound <= price))
    }

    /// Split `prices` into per-sector member lists, in sector order.
    pub fn partition(&self, prices: &[f64]) -> Vec<Vec<f64>> {
        let mut members = vec![Vec::new(); self.sectors.len()];
        for &p in prices {
            if let Some(i) = self.locate(p) {
                members[i].push(p);
            }
        }
        members
    }

    /// Prices contained in the sector at `index`.
    pub fn members(&self, prices: &[f64], index: usize) -> Vec<f64> {
        prices
            .iter()
            .copied()
            .filter(|&p| self.locate(p) == Some(index))
            .collect()
    }
}

/// Build sectors from `prices` and `centroids`.
///
/// Fails with `DegenerateCluster` when centroids collapse onto each other.
pub fn build(
    prices: &[f64],
    centroids: &[f64],
    epsilon_factor: f64,
    threshold_factor: f64,
) -> Result<SectorSet, AnalysisError> {
    if prices.is_empty() {
        return Err(AnalysisError::InsufficientData {
            required: 1,
            actual: 0,
        });
    }

    let k = centroids.len();
    let mut sorted = centroids.to_vec();
    sorted.sort_by(f64::total_cmp);
    let distinct = 1 + sorted.windows(2).filter(|w| !nearly_equal(w[0], w[1])).count();
    if k == 0 || distinct < k || sorted.iter().any(|c| !c.is_finite()) {
        return Err(AnalysisError::DegenerateCluster {
            expected: k.max(1),
            distinct: if k == 0 { 0 } else { distinct },
        });
    }

    // Extents cover centroids too, so the boundary sequence stays increasing.
    let observed_min = prices.iter().chain(&sorted).copied().fold(f64::INFINITY, f64::min);
    let observed_max = prices
        .iter()
        .chain(&sorted)
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    let boundaries: Vec<f64> = sorted.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();

    let sectors: Vec<Sector> = sorted
        .iter()
        .enumerate()
        .map(|(i, &centroid)| {
            let lower_bound = if i == 0 { observed_min } else { boundaries[i - 1] };
            let upper_bound = if i == k - 1 { observed_max } else { boundaries[i] };
            let width = upper_bound - lower_bound;
            let width = if width > 0.0 { width } else { FALLBACK_WIDTH };
            Sector {
                index: i,
                lower_bound,
                upper_bound,
                centroid,
                epsilon: epsilon_factor * width,
                threshold: threshold_factor * width,
                expected_value: centroid,
                median: centroid,
                density_curve: DensityCurve::default(),
                member_count: 0,
                is_top: i == k - 1,
            }
        })
        .collect();

    let mut set = SectorSet { sectors };
    let counts: Vec<usize> = set.partition(prices).iter().map(Vec::len).collect();
    for (sector, count) in set.sectors.iter_mut().zip(counts) {
        sector.member_count = count;
    }
    Ok(set)
}

fn nearly_equal(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= 16.0 * f64::EPSILON * scale
}
