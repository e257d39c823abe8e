//! embedview Core Engine
//!
//! Interactive t-SNE for the embedview scatter charts. The engine turns
//! feature vectors or a pairwise distance table into a 2D layout and keeps
//! that layout live while the user steps, runs, drags and re-seeds it.
//!
//! # Pipeline
//!
//! 1. [`distance`] - resolve input into a dense symmetric distance matrix
//! 2. [`affinity`] - per-point bandwidth search and the joint matrix P
//! 3. [`embedding`] - positions, velocities, iteration and drag cooldowns
//! 4. [`optimizer`] - Student-t Q, KL gradient, momentum update
//! 5. [`convergence`] - KL window and stop decisions
//! 6. [`session`] - the single writer, draining [`command`]s between steps
//!
//! # Features
//!
//! - `parallel` - Per-row bandwidth search and gradient rows via rayon.
//!   Results are identical to the sequential build.
//!
//! # Example
//!
//! ```rust
//! use embedview_core::{DistanceTable, DistanceTriple, EmbeddingInput, Session, TsneConfig};
//!
//! let ids = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"];
//! let mut triples = Vec::new();
//! for (i, first) in ids.iter().enumerate() {
//!     for (j, second) in ids.iter().enumerate().skip(i + 1) {
//!         triples.push(DistanceTriple::new(*first, *second, (j - i) as f64));
//!     }
//! }
//!
//! let config = TsneConfig { perplexity: 3.0, learning_rate: 1.0, seed: Some(1), ..Default::default() };
//! let mut session = Session::new(&EmbeddingInput::Distances(DistanceTable::new(triples)), config).unwrap();
//! let report = session.step().unwrap();
//! assert_eq!(report.iteration, 1);
//! ```

pub mod affinity;
pub mod command;
pub mod config;
pub mod convergence;
pub mod distance;
pub mod embedding;
pub mod error;
pub mod optimizer;
pub mod session;

// Re-export main types at crate root
pub use affinity::AffinityMatrix;
pub use command::{Command, CommandSender};
pub use config::{BandwidthSearch, TsneConfig};
pub use convergence::{ConvergenceMonitor, StopReason};
pub use distance::{
    DistanceMatrix, DistanceTable, DistanceTriple, EmbeddingInput, Entity, RowStats, MIN_ENTITIES,
};
pub use embedding::{EmbeddingState, Point};
pub use error::{EmbedError, Result};
pub use optimizer::{Optimizer, StepReport};
pub use session::{PointPosition, RunSummary, Session, SessionEvent, Snapshot};
