use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use cells::{analyze_batch, AnalysisConfig, AnalysisSession, CellError, CellPipeline, FileImageLoader};
use cli::{config_schema, render_cells, render_report, ConfigFile};
use color_eyre::eyre::Result;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count and classify cells in one or more images
    Analyze {
        /// Images to analyze, reported in the order given
        paths: Vec<PathBuf>,
        /// Analysis configuration (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Also write the report as JSON to this path
        #[arg(long)]
        json: Option<PathBuf>,
        /// Print per-cell measurements for every image
        #[arg(long)]
        cells: bool,
    },
    /// Print the default configuration as TOML
    DefaultConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the JSON schema of the configuration file
    Schema,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Analyze {
            paths,
            config,
            json,
            cells,
        } => {
            analyze(paths, config.as_deref(), json.as_deref(), *cells)?;
        }
        Commands::DefaultConfig { output } => {
            let config = AnalysisConfig::default();
            match output {
                Some(path) => {
                    config.to_toml_file(path)?;
                    info!("Default configuration written to {:?}", path);
                }
                None => print!("{}", config.to_toml()?),
            }
        }
        Commands::Schema => {
            println!("{}", config_schema()?);
        }
    }

    Ok(())
}

fn analyze(
    paths: &[PathBuf],
    config_path: Option<&Path>,
    json_output: Option<&Path>,
    show_cells: bool,
) -> Result<()> {
    let config = match config_path {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::default(),
    };
    let pipeline = CellPipeline::from_config(&config)?;
    info!("{}", pipeline.info());
    info!("Selected {} images for analysis", paths.len());

    let session = match analyze_batch(&pipeline, &FileImageLoader, paths) {
        Ok(session) => session,
        Err(CellError::EmptyInput) => {
            error!("No images selected");
            AnalysisSession::new()
        }
        Err(err) => return Err(err.into()),
    };

    if show_cells {
        for (image_id, result) in session.results() {
            print!("{}", render_cells(image_id, result));
        }
    }

    let report = session.report_with(&config.report);
    print!("{}", render_report(&report));

    if let Some(path) = json_output {
        std::fs::write(path, report.to_json()?)?;
        info!("Report saved to {:?}", path);
    }

    info!(
        "Analysis complete: {} analyzed, {} skipped",
        report.images_analyzed,
        report.skipped.len()
    );
    Ok(())
}
