//! Per-sector density estimation.
//!
//! A Gaussian KDE (Scott's rule bandwidth) is fitted to the prices inside a
//! sector and sampled on an even grid spanning the sector's finite bounds.
//! The expected value is the density-weighted centroid of that grid and the
//! median is where the cumulative integral reaches one half, both computed
//! with the trapezoidal rule. Sectors with too few members, zero spread, or
//! a vanishing integral collapse to a point mass at the centroid.

use std::f64::consts::PI;

use crate::config::DensityConfig;
use crate::sector::{DensityCurve, Sector, SectorSet};

/// Integrals at or below this are treated as zero.
const MIN_TOTAL_MASS: f64 = 1e-300;

/// Statistics derived from one sector's density.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityStats {
    pub expected_value: f64,
    pub median: f64,
    pub curve: DensityCurve,
    /// True when the point-mass fallback was used.
    pub point_mass: bool,
}

/// Gaussian kernel density estimate over a finite sample.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    samples: Vec<f64>,
    bandwidth: f64,
}

impl GaussianKde {
    /// Fit with Scott's rule: `n^(-1/5) * sample_std`. `None` if the sample has
    /// fewer than two points or no spread.
    pub fn fit(samples: &[f64]) -> Option<Self> {
        let n = samples.len();
        if n < 2 {
            return None;
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        let std = var.sqrt();
        let bandwidth = std * (n as f64).powf(-0.2);
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return None;
        }
        Some(Self {
            samples: samples.to_vec(),
            bandwidth,
        })
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let norm = 1.0 / (self.samples.len() as f64 * self.bandwidth * (2.0 * PI).sqrt());
        let sum: f64 = self
            .samples
            .iter()
            .map(|s| {
                let z = (x - s) / self.bandwidth;
                (-0.5 * z * z).exp()
            })
            .sum();
        norm * sum
    }
}

/// Estimate expected value, median and density curve for one sector.
pub fn estimate(sector: &Sector, members: &[f64], params: &DensityConfig) -> DensityStats {
    let lower = sector.lower_bound;
    let upper = sector.upper_bound;

    if members.len() < params.min_members || upper <= lower {
        return point_mass(sector, params);
    }
    let Some(kde) = GaussianKde::fit(members) else {
        return point_mass(sector, params);
    };

    let xs = linspace(lower, upper, params.integration_points);
    let fs: Vec<f64> = xs.iter().map(|&x| kde.evaluate(x)).collect();
    let dx = step(lower, upper, xs.len());

    let cumulative = cumulative_trapezoid(&fs, dx);
    let total = cumulative.last().copied().unwrap_or(0.0);
    if !(total.is_finite() && total > MIN_TOTAL_MASS) {
        return point_mass(sector, params);
    }

    let weighted: Vec<f64> = xs.iter().zip(&fs).map(|(x, f)| x * f).collect();
    let first_moment = cumulative_trapezoid(&weighted, dx)
        .last()
        .copied()
        .unwrap_or(0.0);
    let expected_value = (first_moment / total).clamp(lower, upper);
    let median = interpolate_median(&xs, &cumulative, total).clamp(lower, upper);

    let curve_x = linspace(lower, upper, params.curve_points);
    let curve_y = curve_x.iter().map(|&x| kde.evaluate(x)).collect();

    DensityStats {
        expected_value,
        median,
        curve: DensityCurve {
            x: curve_x,
            y: curve_y,
        },
        point_mass: false,
    }
}

/// Annotate every sector in `set` with density statistics of its members.
pub fn annotate(set: &mut SectorSet, prices: &[f64], params: &DensityConfig) {
    let members = set.partition(prices);
    for (sector, members) in set.sectors_mut().iter_mut().zip(members) {
        let stats = estimate(sector, &members, params);
        sector.expected_value = stats.expected_value;
        sector.median = stats.median;
        sector.density_curve = stats.curve;
    }
}

fn point_mass(sector: &Sector, params: &DensityConfig) -> DensityStats {
    let (lower, upper) = (sector.lower_bound, sector.upper_bound.max(sector.lower_bound));
    let center = sector.centroid.clamp(lower, upper);
    let x = linspace(lower, upper, params.curve_points);
    let y = vec![0.0; x.len()];
    DensityStats {
        expected_value: center,
        median: center,
        curve: DensityCurve { x, y },
        point_mass: true,
    }
}

fn step(lower: f64, upper: f64, points: usize) -> f64 {
    if points < 2 {
        0.0
    } else {
        (upper - lower) / (points - 1) as f64
    }
}

/// `points` evenly spaced values from `lower` to `upper`, both inclusive.
pub fn linspace(lower: f64, upper: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![lower],
        _ => {
            let dx = step(lower, upper, points);
            let mut xs: Vec<f64> = (0..points).map(|i| lower + dx * i as f64).collect();
            xs[points - 1] = upper;
            xs
        }
    }
}

/// Running trapezoidal integral; element `i` is the integral up to grid point `i`.
fn cumulative_trapezoid(values: &[f64], dx: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut acc = 0.0;
    out.push(0.0);
    for pair in values.windows(2) {
        acc += 0.5 * (pair[0] + pair[1]) * dx;
        out.push(acc);
    }
    out.truncate(values.len());
    out
}

fn interpolate_median(xs: &[f64], cumulative: &[f64], total: f64) -> f64 {
    let half = total / 2.0;
    let i = cumulative.partition_point(|&c| c < half);
    if i == 0 {
        return xs[0];
    }
    if i >= xs.len() {
        return xs[xs.len() - 1];
    }
    let (c0, c1) = (cumulative[i - 1], cumulative[i]);
    let frac = if c1 > c0 { (half - c0) / (c1 - c0) } else { 0.0 };
    xs[i - 1] + frac * (xs[i] - xs[i - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::build;

    fn params() -> DensityConfig {
        DensityConfig::default()
    }

    fn sector(lower: f64, upper: f64, centroid: f64) -> Sector {
        Sector {
            index: 0,
            lower_bound: lower,
            upper_bound: upper,
            centroid,
            epsilon: 0.0,
            threshold: 0.0,
            expected_value: centroid,
            median: centroid,
            density_curve: DensityCurve::default(),
            member_count: 0,
            is_top: true,
        }
    }

    #[test]
    fn linspace_hits_both_ends() {
        let xs = linspace(1.0, 2.0, 5);
        assert_eq!(xs, vec![1.0, 1.25, 1.5, 1.75, 2.0]);
        assert_eq!(linspace(3.0, 4.0, 1), vec![3.0]);
        assert!(linspace(3.0, 4.0, 0).is_empty());
    }

    #[test]
    fn scott_bandwidth() {
        let kde = GaussianKde::fit(&[50.0, 51.0, 52.0]).unwrap();
        let expected = 1.0 * 3f64.powf(-0.2);
        assert!((kde.bandwidth() - expected).abs() < 1e-12);
    }

    #[test]
    fn kde_rejects_constant_sample() {
        assert!(GaussianKde::fit(&[5.0, 5.0, 5.0]).is_none());
        assert!(GaussianKde::fit(&[5.0]).is_none());
    }

    #[test]
    fn kde_integrates_to_about_one_on_wide_grid() {
        let kde = GaussianKde::fit(&[0.0, 1.0, 2.0]).unwrap();
        let xs = linspace(-20.0, 20.0, 4001);
        let fs: Vec<f64> = xs.iter().map(|&x| kde.evaluate(x)).collect();
        let total = *cumulative_trapezoid(&fs, 0.01).last().unwrap();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn symmetric_sample_centres_expected_value_and_median() {
        let s = sector(0.0, 10.0, 5.0);
        let stats = estimate(&s, &[4.0, 5.0, 6.0], &params());
        assert!(!stats.point_mass);
        assert!((stats.expected_value - 5.0).abs() < 1e-6);
        assert!((stats.median - 5.0).abs() < 1e-2);
        assert_eq!(stats.curve.x.len(), 200);
        assert_eq!(stats.curve.y.len(), 200);
    }

    #[test]
    fn expected_value_is_not_arithmetic_mean_when_truncated() {
        // Mass above the upper bound is cut off, pulling the expected value down.
        let s = sector(30.5, 52.0, 51.0);
        let stats = estimate(&s, &[50.0, 51.0, 52.0], &params());
        assert!(stats.expected_value > 50.0 && stats.expected_value < 51.0);
        assert!(stats.median > 50.0 && stats.median < 52.0);
    }

    #[test]
    fn single_member_is_point_mass() {
        let s = sector(0.0, 10.0, 3.0);
        let stats = estimate(&s, &[3.0], &params());
        assert!(stats.point_mass);
        assert_eq!(stats.expected_value, 3.0);
        assert_eq!(stats.median, 3.0);
        assert!(stats.curve.y.iter().all(|&y| y == 0.0));
    }

    #[test]
    fn zero_width_sector_is_point_mass() {
        let s = sector(5.0, 5.0, 5.0);
        let stats = estimate(&s, &[5.0, 5.0], &params());
        assert!(stats.point_mass);
        assert_eq!(stats.expected_value, 5.0);
    }

    #[test]
    fn vanishing_mass_is_point_mass() {
        // Members far outside the grid leave no measurable density inside it.
        let s = sector(0.0, 1.0, 0.5);
        let stats = estimate(&s, &[1.0e6, 1.0e6 + 1.0], &params());
        assert!(stats.point_mass);
        assert_eq!(stats.expected_value, 0.5);
    }

    #[test]
    fn annotate_fills_every_sector() {
        let prices = [10.0, 10.0, 10.0, 11.0, 11.0, 50.0, 51.0, 52.0];
        let mut set = build(&prices, &[10.4, 51.0], 0.01, 0.3).unwrap();
        annotate(&mut set, &prices, &params());
        for s in set.sectors() {
            assert!(s.expected_value >= s.lower_bound && s.expected_value <= s.upper_bound);
            assert!(s.median >= s.lower_bound && s.median <= s.upper_bound);
            assert_eq!(s.density_curve.x.len(), s.density_curve.y.len());
        }
        let top = &set.sectors()[1];
        assert!(top.expected_value > 50.0 && top.expected_value < 52.0);
    }
}
