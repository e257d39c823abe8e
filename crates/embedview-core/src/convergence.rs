//! Convergence monitoring
//!
//! Keeps a bounded window of recent KL values and decides when a run should
//! stop. KL values from exaggerated iterations are not comparable with later
//! ones and are never entered into the window.

use crate::config::TsneConfig;
use crate::optimizer::StepReport;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Relative KL improvement over the window fell below the threshold
    Converged,
    /// Gradient norm fell below the configured minimum
    GradientVanished,
    /// The iteration cap was reached
    MaxIterations,
    /// A stop command arrived
    Stopped,
    /// A step produced non-finite coordinates and was rejected
    Diverged,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::GradientVanished => write!(f, "gradient vanished"),
            Self::MaxIterations => write!(f, "max iterations"),
            Self::Stopped => write!(f, "stopped"),
            Self::Diverged => write!(f, "diverged"),
        }
    }
}

/// Ring buffer of recent KL values plus the stop thresholds.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    window: usize,
    threshold: f64,
    min_gradient_norm: f64,
    max_iterations: u64,
    history: VecDeque<f64>,
}

impl ConvergenceMonitor {
    pub fn new(config: &TsneConfig) -> Self {
        Self {
            window: config.kl_window,
            threshold: config.convergence_threshold,
            min_gradient_norm: config.min_gradient_norm,
            max_iterations: config.max_iterations,
            history: VecDeque::with_capacity(config.kl_window),
        }
    }

    /// Whether `iteration` has already reached the cap.
    pub fn at_limit(&self, iteration: u64) -> bool {
        iteration >= self.max_iterations
    }

    /// Record a step and return a reason to stop, if any.
    pub fn observe(&mut self, report: &StepReport) -> Option<StopReason> {
        if report.exaggerated {
            self.history.clear();
        } else {
            if self.history.len() == self.window {
                self.history.pop_front();
            }
            self.history.push_back(report.kl_divergence);
        }

        if report.gradient_norm < self.min_gradient_norm {
            return Some(StopReason::GradientVanished);
        }
        if let Some(improvement) = self.relative_improvement() {
            if improvement < self.threshold {
                return Some(StopReason::Converged);
            }
        }
        if self.at_limit(report.iteration) {
            return Some(StopReason::MaxIterations);
        }
        None
    }

    /// `(oldest - newest) / |oldest|` once the window is full.
    ///
    /// Negative when KL rose over the window.
    pub fn relative_improvement(&self) -> Option<f64> {
        if self.history.len() < self.window {
            return None;
        }
        let oldest = *self.history.front()?;
        let newest = *self.history.back()?;
        Some((oldest - newest) / oldest.abs().max(f64::EPSILON))
    }

    /// Recent KL values, oldest first.
    pub fn history(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    /// Forget all history (new layout or new affinities).
    pub fn reset(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(iteration: u64, kl: f64) -> StepReport {
        StepReport {
            iteration,
            kl_divergence: kl,
            gradient_norm: 1.0,
            exaggerated: false,
        }
    }

    fn monitor() -> ConvergenceMonitor {
        ConvergenceMonitor::new(&TsneConfig {
            kl_window: 4,
            convergence_threshold: 1e-3,
            max_iterations: 100,
            ..Default::default()
        })
    }

    #[test]
    fn needs_a_full_window() {
        let mut m = monitor();
        for i in 1..=3 {
            assert_eq!(m.observe(&report(i, 1.0)), None);
        }
        assert_eq!(m.relative_improvement(), None);
        assert_eq!(m.observe(&report(4, 1.0)), Some(StopReason::Converged));
    }

    #[test]
    fn steady_progress_keeps_running() {
        let mut m = monitor();
        let mut kl = 2.0;
        for i in 1..=20 {
            kl *= 0.9;
            assert_eq!(m.observe(&report(i, kl)), None);
        }
        let improvement = m.relative_improvement().unwrap();
        assert!((improvement - (1.0 - 0.9f64.powi(3))).abs() < 1e-12);
    }

    #[test]
    fn window_is_bounded() {
        let mut m = monitor();
        for i in 1..=10 {
            m.observe(&report(i, 10.0 - i as f64));
        }
        assert_eq!(m.history().collect::<Vec<_>>(), vec![3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn exaggerated_steps_are_ignored() {
        let mut m = monitor();
        for i in 1..=3 {
            m.observe(&report(i, 1.0));
        }
        let exaggerated = StepReport {
            exaggerated: true,
            ..report(4, 1.0)
        };
        assert_eq!(m.observe(&exaggerated), None);
        assert_eq!(m.history().count(), 0);
    }

    #[test]
    fn gradient_floor() {
        let mut m = monitor();
        let flat = StepReport {
            gradient_norm: 0.0,
            ..report(1, 1.0)
        };
        assert_eq!(m.observe(&flat), Some(StopReason::GradientVanished));
    }

    #[test]
    fn iteration_cap() {
        let mut m = monitor();
        assert_eq!(m.observe(&report(99, 5.0)), None);
        assert_eq!(m.observe(&report(100, 4.0)), Some(StopReason::MaxIterations));
        assert!(m.at_limit(100));
    }

    #[test]
    fn reset_clears_history() {
        let mut m = monitor();
        for i in 1..=4 {
            m.observe(&report(i, 3.0));
        }
        m.reset();
        assert_eq!(m.history().count(), 0);
        assert_eq!(m.relative_improvement(), None);
    }
}
