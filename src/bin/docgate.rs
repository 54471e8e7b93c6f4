use std::fs::File;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use error_chain::ChainedError;
use log::*;

use docgate::{PipelineConfig, ValidationContext};

/// Exit status is 0 for an accepted file, 1 for a rejected one and 2 on errors.
#[derive(Parser, Debug)]
#[command(name = "docgate")]
#[command(about = "Validate an uploaded document", long_about = None)]
struct Cli {
    /// File to validate
    file: PathBuf,

    /// JSON pipeline configuration (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Media type declared by the uploader
    #[arg(long)]
    media_type: Option<String>,

    /// Additionally write the debug log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Structure the file must have, e.g. `pdf`
    #[arg(long = "expect-structure")]
    expected_structure: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: Cli) -> docgate::Result<bool> {
    let log_file = match &cli.log_file {
        Some(path) => Some(File::create(path)?),
        None => None,
    };
    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Warn };
    docgate::init_logging(level, log_file)?;

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let mut context = ValidationContext::new();
    if let Some(structure) = &cli.expected_structure {
        context.insert(docgate::context::EXPECTED_STRUCTURE, structure.as_str());
    }

    let result = docgate::validate_file(&cli.file, cli.media_type.as_deref(), &config, &context).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    return Ok(result.valid);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("{}", e.display_chain().to_string());
            eprintln!("{}", e);
            process::exit(2);
        }
    }
}
