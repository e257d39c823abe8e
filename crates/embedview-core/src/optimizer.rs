//! Gradient descent on KL(P || Q)
//!
//! One call to [`Optimizer::step`] is one bounded unit of work:
//!
//! 1. Student-t kernel weights `w_ij = 1 / (1 + |y_i - y_j|^2)`, `Q = w / sum(w)`
//! 2. Gradient `g_i = 4 sum_j (x P_ij - Q_ij) w_ij (y_i - y_j)`, where `x` is the
//!    early-exaggeration factor (applied here only, never written into P)
//! 3. Momentum update of velocity, then positions, skipping frozen points
//!
//! The new positions and velocities are written to back buffers and swapped
//! into the state only when every value is finite, so a diverging step never
//! leaves a half-updated layout behind.

use crate::affinity::AffinityMatrix;
use crate::config::TsneConfig;
use crate::embedding::{EmbeddingState, Point};
use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Outcome of one optimizer iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Iteration counter after the step
    pub iteration: u64,
    /// KL divergence of the layout the step started from
    pub kl_divergence: f64,
    /// Euclidean norm of the full (n x 2) gradient
    pub gradient_norm: f64,
    /// Whether early exaggeration was applied
    pub exaggerated: bool,
}

/// Scratch buffers reused across steps.
#[derive(Debug, Default)]
pub struct Optimizer {
    weights: Vec<f64>,
    gradient: Vec<Point>,
    next_positions: Vec<Point>,
    next_velocity: Vec<Point>,
}

impl Optimizer {
    pub fn new(n: usize) -> Self {
        Self {
            weights: vec![0.0; n * n],
            gradient: vec![[0.0; 2]; n],
            next_positions: vec![[0.0; 2]; n],
            next_velocity: vec![[0.0; 2]; n],
        }
    }

    /// Advance `state` by one iteration.
    ///
    /// On [`EmbedError::NonFiniteEmbedding`] the state is left exactly as it was.
    pub fn step(
        &mut self,
        affinities: &AffinityMatrix,
        state: &mut EmbeddingState,
        config: &TsneConfig,
    ) -> Result<StepReport> {
        let n = state.len();
        debug_assert_eq!(affinities.len(), n);
        self.ensure_capacity(n);

        let iteration = state.iteration();
        let exaggeration = config.exaggeration_at(iteration);
        let momentum = config.momentum_at(iteration);
        let positions = state.positions();

        let z = fill_weights(positions, &mut self.weights);
        let kl_divergence = kl_from_weights(affinities, &self.weights, z);
        compute_gradient(
            affinities,
            positions,
            &self.weights,
            z,
            exaggeration,
            &mut self.gradient,
        );
        let gradient_norm = self
            .gradient
            .iter()
            .map(|g| g[0] * g[0] + g[1] * g[1])
            .sum::<f64>()
            .sqrt();

        let velocity = state.velocity();
        let frozen_until = state.frozen_until();
        let lr = config.learning_rate;
        for i in 0..n {
            let v = velocity[i];
            if iteration < frozen_until[i] {
                self.next_velocity[i] = [momentum * v[0], momentum * v[1]];
                self.next_positions[i] = positions[i];
            } else {
                let g = self.gradient[i];
                let nv = [momentum * v[0] - lr * g[0], momentum * v[1] - lr * g[1]];
                self.next_velocity[i] = nv;
                self.next_positions[i] = [positions[i][0] + nv[0], positions[i][1] + nv[1]];
            }
        }

        let finite = kl_divergence.is_finite()
            && gradient_norm.is_finite()
            && all_finite(&self.next_positions)
            && all_finite(&self.next_velocity);
        if !finite {
            return Err(EmbedError::NonFiniteEmbedding { iteration });
        }

        state.commit(&mut self.next_positions, &mut self.next_velocity);

        Ok(StepReport {
            iteration: state.iteration(),
            kl_divergence,
            gradient_norm,
            exaggerated: exaggeration != 1.0,
        })
    }

    fn ensure_capacity(&mut self, n: usize) {
        if self.gradient.len() != n {
            *self = Self::new(n);
        }
    }
}

/// KL divergence between `affinities` and the Q induced by `positions`.
pub fn kl_divergence(affinities: &AffinityMatrix, positions: &[Point]) -> f64 {
    let n = positions.len();
    let mut weights = vec![0.0; n * n];
    let z = fill_weights(positions, &mut weights);
    kl_from_weights(affinities, &weights, z)
}

/// Fill Student-t weights (zero diagonal) and return their total.
fn fill_weights(positions: &[Point], weights: &mut [f64]) -> f64 {
    let n = positions.len();
    let mut z = 0.0;
    for i in 0..n {
        weights[i * n + i] = 0.0;
        for j in (i + 1)..n {
            let dx = positions[i][0] - positions[j][0];
            let dy = positions[i][1] - positions[j][1];
            let w = 1.0 / (1.0 + dx * dx + dy * dy);
            weights[i * n + j] = w;
            weights[j * n + i] = w;
            z += 2.0 * w;
        }
    }
    z
}

/// `sum P_ij ln(P_ij / Q_ij)` with `0 ln 0 = 0`.
fn kl_from_weights(affinities: &AffinityMatrix, weights: &[f64], z: f64) -> f64 {
    affinities
        .values()
        .iter()
        .zip(weights)
        .filter(|&(&p, _)| p > 0.0)
        .map(|(&p, &w)| p * (p * z / w).ln())
        .sum()
}

fn compute_gradient(
    affinities: &AffinityMatrix,
    positions: &[Point],
    weights: &[f64],
    z: f64,
    exaggeration: f64,
    gradient: &mut [Point],
) {
    let n = positions.len();
    let row = |i: usize| -> Point {
        let mut g = [0.0; 2];
        for j in 0..n {
            if j == i {
                continue;
            }
            let w = weights[i * n + j];
            let coeff = (exaggeration * affinities.get(i, j) - w / z) * w;
            g[0] += coeff * (positions[i][0] - positions[j][0]);
            g[1] += coeff * (positions[i][1] - positions[j][1]);
        }
        [4.0 * g[0], 4.0 * g[1]]
    };

    #[cfg(feature = "parallel")]
    gradient
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, g)| *g = row(i));

    #[cfg(not(feature = "parallel"))]
    gradient
        .iter_mut()
        .enumerate()
        .for_each(|(i, g)| *g = row(i));
}

fn all_finite(points: &[Point]) -> bool {
    points.iter().all(|p| p[0].is_finite() && p[1].is_finite())
}
