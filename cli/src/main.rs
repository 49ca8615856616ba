use clap::{Parser, Subcommand};
use physio_core::config::ReconcileConfig;

mod commands;
mod util;

use commands::reconcile::ReconcileCommands;
use commands::session::SessionCommands;

#[derive(Parser)]
#[command(
    name = "physio",
    version,
    about = "Physio CLI: reconcile analysed treatment documents into exercise imports"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "PHYSIO_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Minimum best-candidate confidence for defaulting an exercise to reuse
    #[arg(long, env = "PHYSIO_AUTO_REUSE_THRESHOLD")]
    auto_reuse_threshold: Option<f64>,

    /// Set count for created exercises that carry none
    #[arg(long, env = "PHYSIO_DEFAULT_EXERCISE_SETS")]
    default_exercise_sets: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Reconcile a saved analysis offline
    Reconcile {
        #[command(subcommand)]
        command: ReconcileCommands,
    },
    /// Drive an import session on the API
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

impl Cli {
    fn reconcile_config(&self) -> ReconcileConfig {
        let mut config = ReconcileConfig::default();
        if let Some(threshold) = self.auto_reuse_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                util::exit_error(
                    &format!("--auto-reuse-threshold must be within [0, 1], got {threshold}"),
                    None,
                );
            }
            config.auto_reuse_threshold = threshold;
        }
        if let Some(sets) = self.default_exercise_sets {
            config.default_exercise_sets = sets;
        }
        config
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let api_url = cli.api_url.trim_end_matches('/').to_string();
    let config = cli.reconcile_config();

    let code = match cli.command {
        Commands::Health => commands::health::run(&api_url).await,
        Commands::Reconcile { command } => commands::reconcile::run(config, command),
        Commands::Session { command } => commands::session::run(&api_url, command).await,
    };

    std::process::exit(code);
}
