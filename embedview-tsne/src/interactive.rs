//! Session hosting over stdin/stdout
//!
//! The session lives on a blocking worker and is the only thing that touches
//! its state. The async side only parses lines and pushes commands through a
//! [`CommandSender`], so a `stop` or `drag` typed during a run lands at the
//! next step boundary.
//!
//! Stdin is read on a plain thread rather than the runtime's blocking pool;
//! a read that never returns must not hold up shutdown.

use crate::error::{CliError, Result};
use embedview_core::{Command, CommandSender, RunSummary, Session, SessionEvent, Snapshot};
use std::future::Future;
use std::io::{self, BufRead};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Progress is logged every this many iterations in batch mode.
const PROGRESS_LOG_INTERVAL: u64 = 50;

/// Write one event as a JSON line on stdout.
pub fn emit(event: &SessionEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Failed to serialize event: {}", e),
    }
}

/// Parse one input line into a command. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<std::result::Result<Command, serde_json::Error>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

/// Drive `session` from stdin until EOF or `shutdown` fires.
pub async fn serve_stdin<S>(session: Session, shutdown: S) -> Result<Session>
where
    S: Future<Output = ()>,
{
    let lines = spawn_stdin_reader()?;
    serve_lines(session, UnboundedReceiverStream::new(lines), shutdown).await
}

fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<io::Result<String>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Drive `session` from `lines` until they end or `shutdown` fires.
///
/// On shutdown a `stop` is queued ahead of closing so a run in progress ends.
pub async fn serve_lines<L, S>(mut session: Session, lines: L, shutdown: S) -> Result<Session>
where
    L: Stream<Item = io::Result<String>>,
    S: Future<Output = ()>,
{
    let sender = session.sender();
    let worker = tokio::task::spawn_blocking(move || {
        session.serve(|event| emit(&event));
        session
    });

    tokio::pin!(lines);
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => forward(&sender, &line),
                Some(Err(e)) => break Err(CliError::Io(e)),
                None => {
                    info!("Input closed");
                    break Ok(());
                }
            },
            _ = &mut shutdown => {
                sender.send(Command::Stop);
                break Ok(());
            }
        }
    };

    sender.close();
    let session = worker
        .await
        .map_err(|e| CliError::Internal(format!("session worker failed: {}", e)))?;
    outcome.map(|()| session)
}

fn forward(sender: &CommandSender, line: &str) {
    match parse_line(line) {
        None => {}
        Some(Ok(command)) => {
            debug!("Queued {}", command.name());
            if !sender.send(command) {
                warn!("Command queue already closed");
            }
        }
        Some(Err(e)) => {
            warn!("Ignoring malformed command: {}", e);
            emit(&SessionEvent::Error {
                command: "parse",
                message: e.to_string(),
                recoverable: true,
            });
        }
    }
}

/// Run to completion on a blocking worker. `shutdown` stops the run early.
pub async fn run_batch<S>(mut session: Session, shutdown: S) -> Result<(RunSummary, Snapshot)>
where
    S: Future<Output = ()>,
{
    let sender = session.sender();
    let mut worker = tokio::task::spawn_blocking(move || {
        let summary = session.run_with(|event| match event {
            SessionEvent::Progress(report) if report.iteration % PROGRESS_LOG_INTERVAL == 0 => {
                debug!(
                    "Iteration {}: KL {:.6}, |grad| {:.3e}",
                    report.iteration, report.kl_divergence, report.gradient_norm
                );
            }
            SessionEvent::Error { message, .. } => warn!("{}", message),
            _ => {}
        })?;
        Ok::<_, CliError>((summary, session.snapshot()))
    });

    tokio::pin!(shutdown);
    let finished = tokio::select! {
        joined = &mut worker => Some(joined),
        _ = &mut shutdown => None,
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            sender.send(Command::Stop);
            worker.await
        }
    };
    joined.map_err(|e| CliError::Internal(format!("session worker failed: {}", e)))?
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received terminate signal, stopping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedview_core::{EmbeddingInput, Entity, StopReason, TsneConfig};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn config(max_iterations: u64) -> TsneConfig {
        TsneConfig {
            perplexity: 3.0,
            learning_rate: 1.0,
            max_iterations,
            seed: Some(3),
            ..Default::default()
        }
    }

    fn session_with(config: TsneConfig) -> Session {
        let entities = (0..12)
            .map(|i| Entity::new(format!("e{}", i), vec![(i % 4) as f64, (i / 4) as f64]))
            .collect();
        Session::new(&EmbeddingInput::Features(entities), config).unwrap()
    }

    fn session(max_iterations: u64) -> Session {
        session_with(config(max_iterations))
    }

    /// Only a stop can end a run of this session.
    fn endless_session() -> Session {
        session_with(TsneConfig {
            learning_rate: 0.5,
            max_iterations: u64::MAX,
            exaggeration_iterations: u64::MAX,
            convergence_threshold: 0.0,
            min_gradient_norm: 0.0,
            ..config(0)
        })
    }

    fn lines(input: &[&str]) -> impl Stream<Item = io::Result<String>> {
        tokio_stream::iter(
            input
                .iter()
                .map(|line| Ok(line.to_string()))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn parses_command_lines() {
        assert!(parse_line("   ").is_none());
        assert_eq!(
            parse_line(r#" {"command": "step", "count": 4} "#).unwrap().unwrap(),
            Command::Step { count: 4 }
        );
        assert!(parse_line(r#"{"command": "teleport"}"#).unwrap().is_err());
    }

    #[test]
    fn malformed_line_is_not_queued() {
        let mut host = session(10);
        let sender = host.sender();
        forward(&sender, "not json");
        forward(&sender, "");
        forward(&sender, r#"{"command": "snapshot"}"#);
        sender.close();

        let mut applied = Vec::new();
        host.serve(|event| {
            if let SessionEvent::Applied { command, .. } = event {
                applied.push(command);
            }
        });
        assert_eq!(applied, vec!["snapshot"]);
    }

    #[tokio::test]
    async fn batch_runs_to_the_cap() {
        let (summary, snapshot) = run_batch(session(30), std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(summary.reason, StopReason::MaxIterations);
        assert_eq!(snapshot.iteration, 30);
        assert_eq!(snapshot.points.len(), 12);
    }

    #[tokio::test]
    async fn serves_lines_until_input_ends() {
        let input = lines(&[
            r#"{"command": "step", "count": 3}"#,
            "garbage",
            r#"{"command": "drag", "index": 0, "x": 2.0, "y": -2.0}"#,
            r#"{"command": "recolor", "field": "row"}"#,
        ]);
        let host = serve_lines(session(100), input, std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(host.iteration(), 3);
        assert_eq!(host.positions()[0], [2.0, -2.0]);
        assert_eq!(host.color_by(), Some("row"));
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_for_input() {
        let served = tokio::time::timeout(
            Duration::from_secs(10),
            serve_lines(
                session(100),
                tokio_stream::pending::<io::Result<String>>(),
                async {},
            ),
        )
        .await
        .expect("shutdown blocked on input");
        assert_eq!(served.unwrap().iteration(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_a_run_in_progress() {
        let input = tokio_stream::iter(vec![Ok(r#"{"command": "run"}"#.to_string())])
            .chain(tokio_stream::pending::<io::Result<String>>());
        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        let served = tokio::time::timeout(
            Duration::from_secs(10),
            serve_lines(endless_session(), input, shutdown),
        )
        .await
        .expect("run was not stopped");
        assert!(served.is_ok());
    }

    #[tokio::test]
    async fn batch_stops_on_shutdown() {
        let (summary, snapshot) = run_batch(endless_session(), async {})
            .await
            .unwrap();
        assert_eq!(summary.reason, StopReason::Stopped);
        assert_eq!(summary.iteration, snapshot.iteration);
    }
}
