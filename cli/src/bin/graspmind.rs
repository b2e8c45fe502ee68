use clap::{Parser, Subcommand};
use cli::{Overrides, apply_overrides, check_config, load_config, resolve_credentials, response_schemas, write_artifacts};
use color_eyre::eyre::{Result, WrapErr, bail};
use graspmind::{ImageSource, Orchestrator, PipelineConfig, Stage};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Find the part of an object a robot should grasp", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the five-stage pipeline on one image
    Run {
        /// Path to the input image
        #[arg(short, long)]
        image: PathBuf,
        /// What the user wants to do, e.g. "I want to drink water"
        #[arg(short = 'n', long)]
        instruction: String,
        /// TOML or JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory for mask.png, overlay.png, mask.geojson and result.json
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
        /// Longest image side sent to the models
        #[arg(long)]
        max_dimension: Option<u32>,
        /// Per-stage model, e.g. `--model intent=gpt-4o`
        #[arg(long = "model", value_name = "STAGE=MODEL")]
        models: Vec<String>,
        /// Per-stage temperature, e.g. `--temperature safety=0.2`
        #[arg(long = "temperature", value_name = "STAGE=T")]
        temperatures: Vec<String>,
    },
    /// Print the JSON Schema of stage responses
    Schema {
        /// Only this stage
        #[arg(short, long)]
        stage: Option<Stage>,
    },
    /// Write the default configuration
    InitConfig {
        /// Destination, .toml or .json
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration and report missing API keys
    Check {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { image, instruction, config, output_dir, max_dimension, models, temperatures } => {
            let overrides = Overrides { max_dimension, models, temperatures };
            run(&image, &instruction, config.as_deref(), &output_dir, &overrides).await?;
        }
        Commands::Schema { stage } => {
            let schemas = response_schemas(stage);
            println!("{}", serde_json::to_string_pretty(&schemas)?);
        }
        Commands::InitConfig { output } => {
            PipelineConfig::default().to_file(&output)?;
            info!("Wrote default configuration to {}", output.display());
        }
        Commands::Check { config } => {
            check(config.as_deref())?;
        }
    }

    Ok(())
}

async fn run(
    image_path: &Path,
    instruction: &str,
    config_path: Option<&Path>,
    output_dir: &Path,
    overrides: &Overrides,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, overrides)?;
    let credentials = resolve_credentials(&config);
    for (stage, env_var) in config.missing_credentials(&credentials) {
        warn!("No API key for {stage}: {env_var} is not set");
    }

    let bytes = std::fs::read(image_path)
        .wrap_err_with(|| format!("Failed to read {}", image_path.display()))?;

    info!("Running pipeline on {} ({} bytes)", image_path.display(), bytes.len());
    let orchestrator = Orchestrator::with_http(config, credentials);
    let result = orchestrator.run(ImageSource::Bytes(&bytes), instruction).await;

    let original = result
        .transform
        .and_then(|_| image::load_from_memory(&bytes).ok());
    let artifacts = write_artifacts(&result, original.as_ref(), output_dir)?;
    info!("Wrote {}", artifacts.result.display());
    for path in [&artifacts.detections, &artifacts.detection_summary].into_iter().flatten() {
        info!("Wrote {}", path.display());
    }

    match &result.error {
        None => {
            if let Some(summary) = &result.mask {
                info!("Grasp mask covers {} pixels of {}x{}", summary.area, summary.width, summary.height);
            }
            for path in [&artifacts.mask, &artifacts.overlay, &artifacts.geojson].into_iter().flatten() {
                info!("Wrote {}", path.display());
            }
            Ok(())
        }
        Some(err) => {
            error!("Pipeline failed at {}: {} ({})", err.failed_stage, err.message, err.kind);
            if let Some(raw) = &err.raw_payload {
                error!("Model returned: {raw}");
            }
            bail!("pipeline failed at stage {} with {}", err.failed_stage, err.kind)
        }
    }
}

fn check(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let credentials = resolve_credentials(&config);
    let report = check_config(&config, &credentials);

    for problem in &report.problems {
        error!("{problem}");
    }
    for (stage, env_var) in &report.missing_credentials {
        warn!("{stage}: API key variable {env_var} is not set");
    }

    if report.is_ok() {
        info!("Configuration OK");
        for stage in Stage::MODEL_STAGES {
            if let Some(settings) = config.model_settings(stage, &credentials) {
                info!("{stage}: {} at temperature {} via {}", settings.model, settings.temperature, settings.base_url);
            }
        }
        Ok(())
    } else {
        bail!("configuration check failed")
    }
}
