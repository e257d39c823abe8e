use clap::Parser;
use embedview_core::{Session, SessionEvent};
use embedview_tsne::dataset::{load_config, ConfigOverrides, Dataset};
use embedview_tsne::interactive::{emit, run_batch, serve_stdin, shutdown_signal};
use embedview_tsne::logging;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "embedview-tsne")]
#[command(about = "Interactive t-SNE layouts for embedview scatter charts")]
#[command(version)]
struct Args {
    /// Dataset JSON: {"ids", "features"} or {"triples", "mirror"}
    #[arg(short, long)]
    input: PathBuf,

    /// TsneConfig JSON; missing fields take their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    perplexity: Option<f64>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    max_iterations: Option<u64>,

    /// Seed for reproducible layouts
    #[arg(long)]
    seed: Option<u64>,

    /// Read JSON commands from stdin and write JSON events to stdout
    #[arg(long)]
    interactive: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", value_parser = logging::LEVELS)]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(&args.log_level);

    info!("embedview-tsne {}", env!("CARGO_PKG_VERSION"));

    let overrides = ConfigOverrides {
        perplexity: args.perplexity,
        learning_rate: args.learning_rate,
        max_iterations: args.max_iterations,
        seed: args.seed,
    };
    let config = load_config(args.config.as_deref(), &overrides)?;
    let input = Dataset::load(&args.input)?.into_input()?;
    let session = Session::new(&input, config)?;

    if args.interactive {
        emit(&SessionEvent::Applied {
            command: "snapshot",
            snapshot: session.snapshot(),
        });
        let session = serve_stdin(session, shutdown_signal()).await?;
        info!("Session closed at iteration {}", session.iteration());
    } else {
        let (summary, snapshot) = run_batch(session, shutdown_signal()).await?;
        info!(
            "Finished ({}) after {} steps, KL {:?}",
            summary.reason, summary.steps, summary.kl_divergence
        );
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}
