use clap::{Parser, Subcommand};
use colored::Colorize;
use pyresource::Result;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "pyresource")]
#[command(about = "⚡ On-demand symbol and metadata server for Python distributions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./pyresource.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the configured distributions and serve them over RPC
    Serve {
        #[arg(short, long)]
        addr: Option<String>,

        /// Log call statistics every minute
        #[arg(long)]
        stats: bool,

        /// Memoize query results
        #[arg(long)]
        cache: bool,
    },

    /// Resolve a dotted path and describe the symbol
    Query {
        path: String,

        /// Query a running server instead of loading data locally
        #[arg(short, long)]
        remote: Option<String>,
    },

    /// List distributions in the manifest
    Dists {
        /// Only distributions providing this top-level package
        #[arg(short, long)]
        package: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();
    let result = run(cli).await;

    match result {
        Ok(_) => {
            let elapsed = start.elapsed();
            println!(
                "\n{} Completed in {:.2}s",
                "✓".green().bold(),
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = pyresource::cli::load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve { addr, stats, cache } => {
            pyresource::cli::serve::execute(config, addr, stats, cache).await
        }
        Commands::Query { path, remote } => {
            pyresource::cli::query::execute(config, path, remote).await
        }
        Commands::Dists { package } => pyresource::cli::dists::execute(config, package).await,
    }
}
