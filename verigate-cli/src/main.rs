mod commands;
mod output;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

/// Run a Rust project's build-verification matrix locally
#[derive(Parser, Debug)]
#[command(name = "verigate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every matrix configuration of a workflow
    Run(commands::run::RunArgs),

    /// Check a workflow file and show which steps each configuration runs
    Validate(commands::validate::ValidateArgs),

    /// Inspect or clear the build state cache
    Cache(commands::cache::CacheArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match cli.verbose {
        0 => EnvFilter::new("verigate=warn,verigate_service=warn"),
        1 => EnvFilter::new("verigate=info,verigate_service=info"),
        _ => EnvFilter::new("verigate=debug,verigate_service=debug"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args),
        Commands::Cache(args) => commands::cache::execute(args).await,
    }
}
