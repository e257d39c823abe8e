//! Interactive t-SNE session
//!
//! A [`Session`] owns everything for one chart instance: the resolved
//! distances, the affinity matrix, the embedding state, the optimizer
//! buffers and the convergence monitor. It is the only writer of the
//! embedding state.
//!
//! Work is step-granular. A run is a loop of single steps with the command
//! queue drained at every boundary, so a drag or stop sent from another
//! thread lands between two steps and never inside one.
//!
//! # Example
//!
//! ```rust
//! use embedview_core::{Entity, EmbeddingInput, Session, TsneConfig};
//!
//! let entities: Vec<Entity> = (0..12)
//!     .map(|i| Entity::new(format!("e{}", i), vec![i as f64, (i % 3) as f64]))
//!     .collect();
//! let config = TsneConfig {
//!     perplexity: 3.0,
//!     learning_rate: 1.0,
//!     seed: Some(7),
//!     max_iterations: 50,
//!     ..Default::default()
//! };
//!
//! let mut session = Session::new(&EmbeddingInput::Features(entities), config).unwrap();
//! session.step().unwrap();
//! session.drag(0, [1.0, 1.0]).unwrap();
//! let summary = session.run().unwrap();
//! assert!(summary.iteration <= 50);
//! assert_eq!(session.snapshot().points.len(), 12);
//! ```

use crate::affinity::{check_perplexity, AffinityMatrix};
use crate::command::{Command, CommandQueue, CommandSender};
use crate::config::TsneConfig;
use crate::convergence::{ConvergenceMonitor, StopReason};
use crate::distance::{DistanceMatrix, EmbeddingInput};
use crate::embedding::{EmbeddingState, Point};
use crate::error::{EmbedError, Result};
use crate::optimizer::{self, Optimizer, StepReport};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One point of the layout as seen by the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

/// Current layout plus display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub iteration: u64,
    pub kl_divergence: f64,
    /// Color field chosen by the renderer; carried, never interpreted
    pub color_by: Option<String>,
    pub points: Vec<PointPosition>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub reason: StopReason,
    /// Steps taken by this run
    pub steps: u64,
    /// Iteration counter when the run ended
    pub iteration: u64,
    /// KL divergence reported by the last step of this run
    pub kl_divergence: Option<f64>,
    pub elapsed_ms: u64,
}

/// Outcome notifications emitted while commands are processed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// One optimizer step finished
    Progress(StepReport),
    /// A command was applied
    Applied {
        command: &'static str,
        snapshot: Snapshot,
    },
    RunFinished {
        summary: RunSummary,
        snapshot: Snapshot,
    },
    /// A command failed; the session is unchanged
    Error {
        command: &'static str,
        message: String,
        recoverable: bool,
    },
}

pub struct Session {
    config: TsneConfig,
    distances: DistanceMatrix,
    affinities: AffinityMatrix,
    state: EmbeddingState,
    optimizer: Optimizer,
    monitor: ConvergenceMonitor,
    queue: CommandQueue,
    color_by: Option<String>,
}

impl Session {
    /// Validate the input and config, build P and draw an initial layout.
    ///
    /// Every input validation error surfaces here.
    pub fn new(input: &EmbeddingInput, config: TsneConfig) -> Result<Self> {
        config.validate()?;
        let distances = DistanceMatrix::resolve(input, config.distance_tolerance)?;
        Self::from_distances(distances, config)
    }

    /// Start a session from an already resolved distance matrix.
    pub fn from_distances(distances: DistanceMatrix, config: TsneConfig) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();
        let affinities = AffinityMatrix::build(&distances, config.perplexity, &config.bandwidth)?;
        let n = distances.len();
        let state = EmbeddingState::randomized(n, config.seed, config.init_std)?;

        info!(
            "Session ready: {} points, perplexity {} ({}ms)",
            n,
            config.perplexity,
            start.elapsed().as_millis()
        );

        Ok(Self {
            optimizer: Optimizer::new(n),
            monitor: ConvergenceMonitor::new(&config),
            queue: CommandQueue::new(),
            color_by: None,
            config,
            distances,
            affinities,
            state,
        })
    }

    /// Handle for submitting commands from other threads.
    pub fn sender(&self) -> CommandSender {
        self.queue.sender()
    }

    pub fn config(&self) -> &TsneConfig {
        &self.config
    }

    pub fn distances(&self) -> &DistanceMatrix {
        &self.distances
    }

    pub fn affinities(&self) -> &AffinityMatrix {
        &self.affinities
    }

    pub fn state(&self) -> &EmbeddingState {
        &self.state
    }

    pub fn monitor(&self) -> &ConvergenceMonitor {
        &self.monitor
    }

    pub fn ids(&self) -> &[String] {
        self.distances.ids()
    }

    pub fn len(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    pub fn iteration(&self) -> u64 {
        self.state.iteration()
    }

    pub fn positions(&self) -> &[Point] {
        self.state.positions()
    }

    pub fn color_by(&self) -> Option<&str> {
        self.color_by.as_deref()
    }

    /// Row index of entity `id`.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.ids().iter().position(|candidate| candidate == id)
    }

    /// KL divergence of the current layout.
    pub fn kl_divergence(&self) -> f64 {
        optimizer::kl_divergence(&self.affinities, self.state.positions())
    }

    pub fn snapshot(&self) -> Snapshot {
        let points = self
            .ids()
            .iter()
            .zip(self.state.positions())
            .map(|(id, p)| PointPosition {
                id: id.clone(),
                x: p[0],
                y: p[1],
            })
            .collect();
        Snapshot {
            iteration: self.state.iteration(),
            kl_divergence: self.kl_divergence(),
            color_by: self.color_by.clone(),
            points,
        }
    }

    /// Draw a fresh layout and reset velocity, iteration and cooldowns.
    pub fn randomize(&mut self, seed: Option<u64>) -> Result<()> {
        self.state.randomize(seed, self.config.init_std)?;
        self.monitor.reset();
        debug!("Randomized layout (seed {:?})", seed);
        Ok(())
    }

    /// One optimizer iteration. The report is also recorded by the
    /// convergence monitor so a later run sees a contiguous KL window.
    pub fn step(&mut self) -> Result<StepReport> {
        match self.advance() {
            Ok((report, _)) => Ok(report),
            Err(err) => {
                warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Step and let the monitor judge the result.
    fn advance(&mut self) -> Result<(StepReport, Option<StopReason>)> {
        let report = self
            .optimizer
            .step(&self.affinities, &mut self.state, &self.config)?;
        let reason = self.monitor.observe(&report);
        Ok((report, reason))
    }

    /// Step until converged, capped, stopped or diverged.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.run_with(|_| {})
    }

    /// Like [`Session::run`], reporting every step and every command applied
    /// mid-run to `observer`.
    pub fn run_with<F>(&mut self, mut observer: F) -> Result<RunSummary>
    where
        F: FnMut(SessionEvent),
    {
        self.run_loop(&mut observer)
    }

    /// Move point `index` to `position` and hold it for the drag cooldown.
    ///
    /// KL values from before the drag are dropped from the convergence window.
    pub fn drag(&mut self, index: usize, position: Point) -> Result<()> {
        self.state
            .drag(index, position, self.config.drag_cooldown)?;
        self.monitor.reset();
        debug!(
            "Dragged point {} to ({}, {}) until iteration {}",
            index,
            position[0],
            position[1],
            self.state.frozen_until()[index]
        );
        Ok(())
    }

    /// Change the color field. Layout and optimizer state are not touched.
    pub fn recolor(&mut self, field: Option<String>) {
        self.color_by = field;
    }

    /// Rebuild P for a new perplexity.
    ///
    /// Positions are kept; velocity, iteration, cooldowns and convergence
    /// history are reset. On error nothing changes.
    pub fn set_perplexity(&mut self, perplexity: f64) -> Result<()> {
        if perplexity == self.affinities.perplexity() {
            debug!("Perplexity unchanged at {}", perplexity);
            return Ok(());
        }
        check_perplexity(perplexity, self.len())?;

        let start = Instant::now();
        let affinities = AffinityMatrix::build(&self.distances, perplexity, &self.config.bandwidth)?;
        self.affinities = affinities;
        self.config.perplexity = perplexity;
        self.state.reset_dynamics();
        self.monitor.reset();

        info!(
            "Rebuilt affinities for perplexity {} ({}ms)",
            perplexity,
            start.elapsed().as_millis()
        );
        Ok(())
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) -> Result<()> {
        let candidate = TsneConfig {
            learning_rate,
            ..self.config.clone()
        };
        candidate.validate()?;
        self.config = candidate;
        debug!("Learning rate set to {}", learning_rate);
        Ok(())
    }

    /// Apply one command, reporting outcomes to `observer`.
    pub fn apply<F>(&mut self, command: Command, mut observer: F)
    where
        F: FnMut(SessionEvent),
    {
        self.dispatch(command, &mut observer);
    }

    /// Apply commands as they arrive until the queue is closed.
    pub fn serve<F>(&mut self, mut observer: F)
    where
        F: FnMut(SessionEvent),
    {
        info!("Serving commands for {} points", self.len());
        while let Some(command) = self.queue.wait_next() {
            self.dispatch(command, &mut observer);
        }
        info!("Command queue closed at iteration {}", self.iteration());
    }

    fn dispatch(&mut self, command: Command, observer: &mut dyn FnMut(SessionEvent)) {
        let name = command.name();
        debug!("Applying {}", name);

        match command {
            Command::Run => match self.run_loop(observer) {
                Ok(summary) => observer(SessionEvent::RunFinished {
                    summary,
                    snapshot: self.snapshot(),
                }),
                Err(err) => observer(error_event(name, &err)),
            },
            Command::Step { count } => {
                for _ in 0..count {
                    match self.step() {
                        Ok(report) => observer(SessionEvent::Progress(report)),
                        Err(err) => {
                            observer(error_event(name, &err));
                            return;
                        }
                    }
                }
                observer(SessionEvent::Applied {
                    command: name,
                    snapshot: self.snapshot(),
                });
            }
            Command::Stop => {
                debug!("Stop received with no run in progress");
                observer(SessionEvent::Applied {
                    command: name,
                    snapshot: self.snapshot(),
                });
            }
            other => self.apply_update(other, observer),
        }
    }

    /// Commands that change state without stepping. Safe at any boundary.
    fn apply_update(&mut self, command: Command, observer: &mut dyn FnMut(SessionEvent)) {
        let name = command.name();
        let result = match command {
            Command::Randomize { seed } => self.randomize(seed),
            Command::Drag { index, x, y } => self.drag(index, [x, y]),
            Command::Recolor { field } => {
                self.recolor(field);
                Ok(())
            }
            Command::SetPerplexity { perplexity } => self.set_perplexity(perplexity),
            Command::SetLearningRate { learning_rate } => self.set_learning_rate(learning_rate),
            Command::Snapshot => Ok(()),
            Command::Run | Command::Step { .. } | Command::Stop => {
                debug!("Ignoring {} during a run", name);
                return;
            }
        };

        match result {
            Ok(()) => observer(SessionEvent::Applied {
                command: name,
                snapshot: self.snapshot(),
            }),
            Err(err) => {
                warn!("{} rejected: {}", name, err);
                observer(error_event(name, &err));
            }
        }
    }

    fn run_loop(&mut self, observer: &mut dyn FnMut(SessionEvent)) -> Result<RunSummary> {
        let start = Instant::now();
        let mut steps = 0;
        let mut kl_divergence = None;

        debug!("Run started at iteration {}", self.state.iteration());

        let reason = loop {
            if let Some(reason) = self.drain_pending(observer) {
                break reason;
            }
            if self.monitor.at_limit(self.state.iteration()) {
                break StopReason::MaxIterations;
            }

            let (report, stop) = match self.advance() {
                Ok(outcome) => outcome,
                Err(err) if err.is_recoverable() => {
                    warn!("Run halted: {}", err);
                    observer(error_event("run", &err));
                    break StopReason::Diverged;
                }
                Err(err) => return Err(err),
            };
            steps += 1;
            kl_divergence = Some(report.kl_divergence);
            observer(SessionEvent::Progress(report));

            if let Some(reason) = stop {
                break reason;
            }
        };

        let summary = RunSummary {
            reason,
            steps,
            iteration: self.state.iteration(),
            kl_divergence,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Run finished ({}): {} steps to iteration {} in {}ms",
            summary.reason, summary.steps, summary.iteration, summary.elapsed_ms
        );
        Ok(summary)
    }

    /// Apply queued commands at a step boundary. Returns a stop reason when
    /// the run must end.
    fn drain_pending(&mut self, observer: &mut dyn FnMut(SessionEvent)) -> Option<StopReason> {
        while let Some(command) = self.queue.try_next() {
            if command == Command::Stop {
                debug!("Stop received at iteration {}", self.state.iteration());
                return Some(StopReason::Stopped);
            }
            self.apply_update(command, observer);
        }
        None
    }
}

fn error_event(command: &'static str, err: &EmbedError) -> SessionEvent {
    SessionEvent::Error {
        command,
        message: err.to_string(),
        recoverable: err.is_recoverable(),
    }
}
