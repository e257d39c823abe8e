//! High-dimensional affinities (P)
//!
//! Each point gets a Gaussian bandwidth chosen so that its conditional
//! neighbor distribution has entropy `ln(perplexity)`. The conditionals are
//! then symmetrized into a joint distribution over all ordered pairs.

use crate::config::BandwidthSearch;
use crate::distance::DistanceMatrix;
use crate::error::{EmbedError, Result};
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Symmetric joint probability matrix with zero diagonal, summing to 1.
///
/// Immutable once built. A different perplexity means a new matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityMatrix {
    n: usize,
    perplexity: f64,
    values: Vec<f64>,
    sigmas: Vec<f64>,
}

/// Conditional distribution of one point and the bandwidth that produced it.
struct ConditionalRow {
    probabilities: Vec<f64>,
    sigma: f64,
    converged: bool,
}

impl AffinityMatrix {
    /// Build P for `distances` at the given perplexity.
    pub fn build(
        distances: &DistanceMatrix,
        perplexity: f64,
        search: &BandwidthSearch,
    ) -> Result<Self> {
        let n = distances.len();
        check_perplexity(perplexity, n)?;

        let target = perplexity.ln();

        #[cfg(feature = "parallel")]
        let rows: Vec<ConditionalRow> = (0..n)
            .into_par_iter()
            .map(|i| conditional_row(distances, i, target, search))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let rows: Vec<ConditionalRow> = (0..n)
            .map(|i| conditional_row(distances, i, target, search))
            .collect();

        let unconverged = rows.iter().filter(|r| !r.converged).count();
        if unconverged > 0 {
            debug!(
                "bandwidth search hit the iteration cap for {} of {} points",
                unconverged, n
            );
        }

        let scale = 1.0 / (2.0 * n as f64);
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            for j in (i + 1)..n {
                let p = (rows[i].probabilities[j] + rows[j].probabilities[i]) * scale;
                values[i * n + j] = p;
                values[j * n + i] = p;
            }
        }

        Ok(Self {
            n,
            perplexity,
            values,
            sigmas: rows.iter().map(|r| r.sigma).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Perplexity this matrix was built for.
    pub fn perplexity(&self) -> f64 {
        self.perplexity
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n + j]
    }

    /// Row-major entries.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Per-point Gaussian bandwidths found by the search.
    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    /// Sum over all entries; 1 up to rounding.
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }
}

/// Perplexity must satisfy `1 < perplexity < n / 3`.
pub fn check_perplexity(perplexity: f64, n: usize) -> Result<()> {
    let upper = n as f64 / 3.0;
    if !(perplexity.is_finite() && perplexity > 1.0 && perplexity < upper) {
        return Err(EmbedError::InvalidPerplexity { perplexity, upper });
    }
    Ok(())
}

/// Bisect sigma geometrically until the row entropy matches `target`.
fn conditional_row(
    distances: &DistanceMatrix,
    i: usize,
    target: f64,
    search: &BandwidthSearch,
) -> ConditionalRow {
    let n = distances.len();
    let squared: Vec<f64> = distances.row(i).iter().map(|d| d * d).collect();
    let min_squared = squared
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(_, &s)| s)
        .fold(f64::INFINITY, f64::min);

    // Start from the row's RMS distance: sqrt(mean^2 + variance).
    let stats = distances.row_stats(i);
    let mut lo = search.sigma_min;
    let mut hi = search.sigma_max;
    let mut sigma = (stats.mean * stats.mean + stats.variance)
        .sqrt()
        .clamp(lo, hi);

    let mut probabilities = vec![0.0; n];
    let mut converged = false;
    for attempt in 0..search.max_iterations {
        let entropy = fill_conditional(&squared, i, min_squared, sigma, &mut probabilities);
        let gap = entropy - target;
        if gap.abs() < search.entropy_tolerance {
            converged = true;
            break;
        }
        if attempt + 1 == search.max_iterations {
            break;
        }
        if gap > 0.0 {
            hi = sigma;
        } else {
            lo = sigma;
        }
        sigma = (lo * hi).sqrt();
    }

    ConditionalRow {
        probabilities,
        sigma,
        converged,
    }
}

/// Write `p_{j|i}` for bandwidth `sigma` into `out` and return its entropy.
///
/// Exponents are shifted by the smallest squared distance so the largest
/// term is exactly 1 and the row never underflows to zero.
fn fill_conditional(
    squared: &[f64],
    i: usize,
    min_squared: f64,
    sigma: f64,
    out: &mut [f64],
) -> f64 {
    let inv = 1.0 / (2.0 * sigma * sigma);
    let mut sum = 0.0;
    for (j, (&s, slot)) in squared.iter().zip(out.iter_mut()).enumerate() {
        *slot = if j == i {
            0.0
        } else {
            (-(s - min_squared) * inv).exp()
        };
        sum += *slot;
    }

    let mut weighted = 0.0;
    for (j, (&s, slot)) in squared.iter().zip(out.iter_mut()).enumerate() {
        *slot /= sum;
        if j != i {
            weighted += *slot * (s - min_squared);
        }
    }
    sum.ln() + weighted * inv
}
