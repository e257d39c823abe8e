//! Session configuration
//!
//! Every tuning constant of the engine lives here with its default, so a
//! caller can deserialize a partial JSON object and get a complete config.

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};

/// Parameters of the per-point Gaussian bandwidth search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthSearch {
    /// Lower bound of the sigma search range (default: 1e-6)
    pub sigma_min: f64,
    /// Upper bound of the sigma search range (default: 1e6)
    pub sigma_max: f64,
    /// Bisection cap per point (default: 50)
    pub max_iterations: usize,
    /// Accepted distance between row entropy and log(perplexity) (default: 1e-5)
    pub entropy_tolerance: f64,
}

impl Default for BandwidthSearch {
    fn default() -> Self {
        Self {
            sigma_min: 1e-6,
            sigma_max: 1e6,
            max_iterations: 50,
            entropy_tolerance: 1e-5,
        }
    }
}

/// Configuration for a t-SNE session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneConfig {
    /// Target effective number of neighbors (default: 30)
    pub perplexity: f64,
    /// Gradient step size (default: 10)
    pub learning_rate: f64,
    /// Iteration at which `run` stops regardless of progress (default: 1000)
    pub max_iterations: u64,
    /// Relative KL improvement over `kl_window` below which a run has converged (default: 1e-4)
    pub convergence_threshold: f64,
    /// Gradient norm below which a run has converged (default: 1e-7)
    pub min_gradient_norm: f64,
    /// Number of recent KL values the convergence monitor compares (default: 10)
    pub kl_window: usize,
    /// Seed for `randomize`; entropy-seeded when absent
    pub seed: Option<u64>,
    /// Factor applied to P inside the gradient during early iterations (default: 4)
    pub exaggeration: f64,
    /// Number of iterations with exaggeration active (default: 100)
    pub exaggeration_iterations: u64,
    pub initial_momentum: f64,
    pub final_momentum: f64,
    /// Iteration at which momentum switches from initial to final (default: 250)
    pub momentum_switch_iteration: u64,
    /// Iterations a dragged point ignores the gradient (default: 10)
    pub drag_cooldown: u64,
    /// Standard deviation of the random initial layout (default: 1e-4)
    pub init_std: f64,
    /// Tolerance when both directions of a pair are supplied (default: 1e-9)
    pub distance_tolerance: f64,
    pub bandwidth: BandwidthSearch,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            learning_rate: 10.0,
            max_iterations: 1000,
            convergence_threshold: 1e-4,
            min_gradient_norm: 1e-7,
            kl_window: 10,
            seed: None,
            exaggeration: 4.0,
            exaggeration_iterations: 100,
            initial_momentum: 0.5,
            final_momentum: 0.8,
            momentum_switch_iteration: 250,
            drag_cooldown: 10,
            init_std: 1e-4,
            distance_tolerance: 1e-9,
            bandwidth: BandwidthSearch::default(),
        }
    }
}

impl TsneConfig {
    /// Check the parameters that do not depend on the dataset.
    ///
    /// Perplexity is checked against the entity count by the affinity builder.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold >= 0.0) {
            return Err(invalid(format!(
                "convergence_threshold must be >= 0, got {}",
                self.convergence_threshold
            )));
        }
        if !(self.min_gradient_norm.is_finite() && self.min_gradient_norm >= 0.0) {
            return Err(invalid(format!(
                "min_gradient_norm must be >= 0, got {}",
                self.min_gradient_norm
            )));
        }
        if self.kl_window < 2 {
            return Err(invalid(format!(
                "kl_window must be at least 2, got {}",
                self.kl_window
            )));
        }
        if !(self.exaggeration.is_finite() && self.exaggeration >= 1.0) {
            return Err(invalid(format!(
                "exaggeration must be >= 1, got {}",
                self.exaggeration
            )));
        }
        for (name, m) in [
            ("initial_momentum", self.initial_momentum),
            ("final_momentum", self.final_momentum),
        ] {
            if !(0.0..1.0).contains(&m) {
                return Err(invalid(format!("{} must be in [0, 1), got {}", name, m)));
            }
        }
        if !(self.init_std.is_finite() && self.init_std > 0.0) {
            return Err(invalid(format!(
                "init_std must be finite and > 0, got {}",
                self.init_std
            )));
        }
        if !(self.distance_tolerance.is_finite() && self.distance_tolerance >= 0.0) {
            return Err(invalid(format!(
                "distance_tolerance must be >= 0, got {}",
                self.distance_tolerance
            )));
        }

        let b = &self.bandwidth;
        if !(b.sigma_min > 0.0 && b.sigma_min < b.sigma_max && b.sigma_max.is_finite()) {
            return Err(invalid(format!(
                "bandwidth range must satisfy 0 < sigma_min < sigma_max, got [{}, {}]",
                b.sigma_min, b.sigma_max
            )));
        }
        if b.max_iterations == 0 {
            return Err(invalid("bandwidth max_iterations must be > 0".to_string()));
        }
        if !(b.entropy_tolerance.is_finite() && b.entropy_tolerance > 0.0) {
            return Err(invalid(format!(
                "bandwidth entropy_tolerance must be > 0, got {}",
                b.entropy_tolerance
            )));
        }
        Ok(())
    }

    /// Momentum factor for the step starting at `iteration`.
    pub fn momentum_at(&self, iteration: u64) -> f64 {
        if iteration < self.momentum_switch_iteration {
            self.initial_momentum
        } else {
            self.final_momentum
        }
    }

    /// Exaggeration factor for the step starting at `iteration`.
    pub fn exaggeration_at(&self, iteration: u64) -> f64 {
        if iteration < self.exaggeration_iterations {
            self.exaggeration
        } else {
            1.0
        }
    }
}

fn invalid(msg: String) -> EmbedError {
    EmbedError::InvalidConfig(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        TsneConfig::default().validate().unwrap();
    }

    #[test]
    fn documented_defaults() {
        let config = TsneConfig::default();
        assert_eq!(config.exaggeration, 4.0);
        assert_eq!(config.exaggeration_iterations, 100);
        assert_eq!(config.initial_momentum, 0.5);
        assert_eq!(config.final_momentum, 0.8);
        assert_eq!(config.momentum_switch_iteration, 250);
        assert_eq!(config.drag_cooldown, 10);
        assert_eq!(config.bandwidth.max_iterations, 50);
        assert_eq!(config.bandwidth.entropy_tolerance, 1e-5);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: TsneConfig =
            serde_json::from_str(r#"{"perplexity": 5.0, "seed": 7, "bandwidth": {"max_iterations": 80}}"#)
                .unwrap();
        assert_eq!(config.perplexity, 5.0);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.learning_rate, 10.0);
        assert_eq!(config.bandwidth.max_iterations, 80);
        assert_eq!(config.bandwidth.sigma_max, 1e6);
    }

    #[test]
    fn rejects_non_positive_learning_rate() {
        let config = TsneConfig {
            learning_rate: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EmbedError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_momentum_of_one() {
        let config = TsneConfig {
            final_momentum: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn schedules_switch_at_configured_iterations() {
        let config = TsneConfig::default();
        assert_eq!(config.momentum_at(0), 0.5);
        assert_eq!(config.momentum_at(249), 0.5);
        assert_eq!(config.momentum_at(250), 0.8);
        assert_eq!(config.exaggeration_at(99), 4.0);
        assert_eq!(config.exaggeration_at(100), 1.0);
    }
}
