//! Interaction commands and the single-writer queue that carries them.
//!
//! Any thread may push commands through a [`CommandSender`]. Only the owning
//! session pops them, and only between optimizer steps.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// External request against a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// New random layout; reseeds when a seed is given
    Randomize {
        #[serde(default)]
        seed: Option<u64>,
    },
    /// Run `count` single iterations
    Step {
        #[serde(default = "default_step_count")]
        count: u64,
    },
    /// Step until converged, stopped or capped
    Run,
    /// End the current run at the next step boundary
    Stop,
    /// Move one point and hold it for the drag cooldown
    Drag { index: usize, x: f64, y: f64 },
    /// Change the color field reported to the renderer
    Recolor {
        #[serde(default)]
        field: Option<String>,
    },
    SetPerplexity { perplexity: f64 },
    SetLearningRate { learning_rate: f64 },
    /// Report the current layout without changing it
    Snapshot,
}

fn default_step_count() -> u64 {
    1
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Randomize { .. } => "randomize",
            Self::Step { .. } => "step",
            Self::Run => "run",
            Self::Stop => "stop",
            Self::Drag { .. } => "drag",
            Self::Recolor { .. } => "recolor",
            Self::SetPerplexity { .. } => "set_perplexity",
            Self::SetLearningRate { .. } => "set_learning_rate",
            Self::Snapshot => "snapshot",
        }
    }
}

#[derive(Default)]
struct Inbox {
    pending: VecDeque<Command>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    inbox: Mutex<Inbox>,
    ready: Condvar,
}

/// Cloneable handle for submitting commands from any thread.
#[derive(Clone)]
pub struct CommandSender {
    shared: Arc<Shared>,
}

impl CommandSender {
    /// Queue a command. Returns false once the queue is closed.
    pub fn send(&self, command: Command) -> bool {
        let mut inbox = self.shared.inbox.lock();
        if inbox.closed {
            return false;
        }
        inbox.pending.push_back(command);
        self.shared.ready.notify_one();
        true
    }

    /// Close the queue. Pending commands are still delivered, and a run in
    /// progress continues until it stops on its own or receives [`Command::Stop`].
    pub fn close(&self) {
        self.shared.inbox.lock().closed = true;
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inbox.lock().closed
    }
}

/// Receiving end, owned by the session.
pub(crate) struct CommandQueue {
    shared: Arc<Shared>,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
        }
    }

    pub(crate) fn sender(&self) -> CommandSender {
        CommandSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Pop the next pending command without blocking.
    pub(crate) fn try_next(&self) -> Option<Command> {
        self.shared.inbox.lock().pending.pop_front()
    }

    /// Block until a command arrives. Returns `None` once the queue is
    /// closed and empty.
    pub(crate) fn wait_next(&self) -> Option<Command> {
        let mut inbox = self.shared.inbox.lock();
        loop {
            if let Some(command) = inbox.pending.pop_front() {
                return Some(command);
            }
            if inbox.closed {
                return None;
            }
            self.shared.ready.wait(&mut inbox);
        }
    }
}
