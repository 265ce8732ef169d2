mod commands;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use eventscope_core::OutputFormat;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "eventscope")]
#[command(about = "Scrape and normalize event listings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a scrape job and write the normalized records
    Run {
        /// Job file (YAML or JSON)
        #[arg(long)]
        job: PathBuf,
        /// Write records here instead of the job's destination
        #[arg(long)]
        output: Option<PathBuf>,
        /// Override the job's output format
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
        /// Print the targets that would be scraped and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Normalize a JSON array of raw event records
    Normalize {
        /// Raw records file
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "json")]
        format: FormatArg,
    },
    /// Validate a job file without scraping
    CheckJob {
        #[arg(long)]
        job: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Json,
    Ndjson,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Ndjson => OutputFormat::Ndjson,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = eventscope_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    // Records go to stdout; logs stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            job,
            output,
            format,
            dry_run,
        } => {
            commands::run_job(&config, &job, output, format.map(Into::into), dry_run).await?;
        }
        Commands::Normalize {
            input,
            output,
            format,
        } => commands::normalize_file(&config, &input, output, format.into()).await?,
        Commands::CheckJob { job } => commands::check_job(&job)?,
    }

    Ok(())
}
