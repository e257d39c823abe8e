//! Embedding state
//!
//! The 2D layout and everything the optimizer carries between steps. Only
//! the session mutates it; the optimizer hands back finished buffers that
//! are swapped in whole.

use crate::error::{EmbedError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// A point in the embedding plane.
pub type Point = [f64; 2];

/// Positions, velocities, iteration counter and drag cooldowns.
#[derive(Debug, Clone)]
pub struct EmbeddingState {
    positions: Vec<Point>,
    velocity: Vec<Point>,
    iteration: u64,
    /// Point i ignores the gradient while `iteration < frozen_until[i]`
    frozen_until: Vec<u64>,
    rng: StdRng,
}

impl EmbeddingState {
    /// Random initial layout for `n` points.
    ///
    /// With a seed the layout is reproducible; without one the generator is
    /// seeded from OS entropy.
    pub fn randomized(n: usize, seed: Option<u64>, std_dev: f64) -> Result<Self> {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut state = Self {
            positions: vec![[0.0; 2]; n],
            velocity: vec![[0.0; 2]; n],
            iteration: 0,
            frozen_until: vec![0; n],
            rng,
        };
        state.draw(std_dev)?;
        Ok(state)
    }

    /// Redraw the layout and reset all dynamics.
    ///
    /// A seed reseeds the generator; otherwise the existing stream continues.
    pub fn randomize(&mut self, seed: Option<u64>, std_dev: f64) -> Result<()> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.draw(std_dev)
    }

    fn draw(&mut self, std_dev: f64) -> Result<()> {
        let normal = Normal::new(0.0, std_dev)
            .map_err(|e| EmbedError::InvalidConfig(format!("init_std {}: {}", std_dev, e)))?;
        for p in self.positions.iter_mut() {
            *p = [normal.sample(&mut self.rng), normal.sample(&mut self.rng)];
        }
        self.reset_dynamics();
        Ok(())
    }

    /// Zero velocities, rewind the iteration counter and clear cooldowns.
    /// Positions are kept.
    pub(crate) fn reset_dynamics(&mut self) {
        self.velocity.iter_mut().for_each(|v| *v = [0.0; 2]);
        self.frozen_until.iter_mut().for_each(|f| *f = 0);
        self.iteration = 0;
    }

    /// Move point `index` to `position` and hold it there for `cooldown` iterations.
    ///
    /// No other point is touched.
    pub fn drag(&mut self, index: usize, position: Point, cooldown: u64) -> Result<()> {
        let len = self.len();
        if index >= len {
            return Err(EmbedError::PointOutOfRange { index, len });
        }
        if !(position[0].is_finite() && position[1].is_finite()) {
            return Err(EmbedError::InvalidPosition { index });
        }
        self.positions[index] = position;
        self.velocity[index] = [0.0; 2];
        self.frozen_until[index] = self.iteration.saturating_add(cooldown);
        Ok(())
    }

    /// Swap in the buffers produced by one optimizer step and advance.
    ///
    /// The previous contents are left in the arguments for reuse.
    pub(crate) fn commit(&mut self, positions: &mut Vec<Point>, velocity: &mut Vec<Point>) {
        debug_assert_eq!(positions.len(), self.positions.len());
        debug_assert_eq!(velocity.len(), self.velocity.len());
        std::mem::swap(&mut self.positions, positions);
        std::mem::swap(&mut self.velocity, velocity);
        self.iteration += 1;
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Point] {
        &self.positions
    }

    pub fn velocity(&self) -> &[Point] {
        &self.velocity
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn frozen_until(&self) -> &[u64] {
        &self.frozen_until
    }

    /// Whether point `index` is in its drag cooldown at the current iteration.
    pub fn is_frozen(&self, index: usize) -> bool {
        self.iteration < self.frozen_until[index]
    }

    pub fn is_finite(&self) -> bool {
        self.positions
            .iter()
            .all(|p| p[0].is_finite() && p[1].is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_layouts_repeat() {
        let a = EmbeddingState::randomized(20, Some(42), 1e-4).unwrap();
        let b = EmbeddingState::randomized(20, Some(42), 1e-4).unwrap();
        assert_eq!(a.positions(), b.positions());

        let c = EmbeddingState::randomized(20, Some(43), 1e-4).unwrap();
        assert_ne!(a.positions(), c.positions());
    }

    #[test]
    fn initial_layout_is_small() {
        let state = EmbeddingState::randomized(50, Some(1), 1e-4).unwrap();
        assert!(state
            .positions()
            .iter()
            .all(|p| p[0].abs() < 1e-2 && p[1].abs() < 1e-2));
        assert!(state.velocity().iter().all(|v| *v == [0.0, 0.0]));
        assert_eq!(state.iteration(), 0);
    }

    #[test]
    fn unseeded_randomize_continues_stream() {
        let mut state = EmbeddingState::randomized(10, Some(5), 1e-4).unwrap();
        let first = state.positions().to_vec();
        state.randomize(None, 1e-4).unwrap();
        assert_ne!(state.positions(), first.as_slice());

        state.randomize(Some(5), 1e-4).unwrap();
        assert_eq!(state.positions(), first.as_slice());
    }

    #[test]
    fn randomize_clears_dynamics() {
        let mut state = EmbeddingState::randomized(6, Some(9), 1e-4).unwrap();
        let mut positions = vec![[1.0, 1.0]; 6];
        let mut velocity = vec![[0.5, 0.5]; 6];
        state.commit(&mut positions, &mut velocity);
        state.drag(2, [3.0, 3.0], 10).unwrap();

        state.randomize(Some(9), 1e-4).unwrap();
        assert_eq!(state.iteration(), 0);
        assert!(state.velocity().iter().all(|v| *v == [0.0, 0.0]));
        assert!(state.frozen_until().iter().all(|&f| f == 0));
    }

    #[test]
    fn drag_touches_one_row() {
        let mut state = EmbeddingState::randomized(8, Some(3), 1e-4).unwrap();
        let mut positions = state.positions().to_vec();
        let mut velocity = vec![[0.1, -0.1]; 8];
        state.commit(&mut positions, &mut velocity);
        let before = state.positions().to_vec();

        state.drag(4, [2.5, -1.0], 10).unwrap();

        assert_eq!(state.positions()[4], [2.5, -1.0]);
        assert_eq!(state.velocity()[4], [0.0, 0.0]);
        assert_eq!(state.frozen_until()[4], 11);
        for j in (0..8).filter(|&j| j != 4) {
            assert_eq!(state.positions()[j], before[j]);
            assert_eq!(state.velocity()[j], [0.1, -0.1]);
            assert_eq!(state.frozen_until()[j], 0);
        }
        assert!(state.is_frozen(4));
        assert!(!state.is_frozen(3));
    }

    #[test]
    fn long_cooldown_saturates() {
        let mut state = EmbeddingState::randomized(4, Some(3), 1e-4).unwrap();
        let mut positions = state.positions().to_vec();
        let mut velocity = vec![[0.0, 0.0]; 4];
        state.commit(&mut positions, &mut velocity);

        state.drag(1, [1.0, 1.0], u64::MAX).unwrap();
        assert_eq!(state.frozen_until()[1], u64::MAX);
        assert!(state.is_frozen(1));
    }

    #[test]
    fn drag_validation() {
        let mut state = EmbeddingState::randomized(4, Some(3), 1e-4).unwrap();
        assert_eq!(
            state.drag(4, [0.0, 0.0], 10).unwrap_err(),
            EmbedError::PointOutOfRange { index: 4, len: 4 }
        );
        assert_eq!(
            state.drag(1, [f64::NAN, 0.0], 10).unwrap_err(),
            EmbedError::InvalidPosition { index: 1 }
        );
    }

    #[test]
    fn commit_swaps_and_advances() {
        let mut state = EmbeddingState::randomized(3, Some(1), 1e-4).unwrap();
        let old = state.positions().to_vec();
        let mut positions = vec![[1.0, 2.0]; 3];
        let mut velocity = vec![[0.0, 0.0]; 3];
        state.commit(&mut positions, &mut velocity);
        assert_eq!(state.positions(), &[[1.0, 2.0]; 3]);
        assert_eq!(positions, old);
        assert_eq!(state.iteration(), 1);
    }
}
