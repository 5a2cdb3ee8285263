use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facecheck_core::{
    ComparisonVerdict, DetectorOptions, FaceComparator, FaceDetector, FeatureVectorBuilder,
    RecordedDetector,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facecheck", about = "Compare two face images and report a match score")]
struct Cli {
    /// Path to a config.toml (default: $XDG_CONFIG_HOME/facecheck/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a captured image against a reference image
    Compare {
        /// Captured image (path or file:// reference)
        captured: String,
        /// Reference image (path, file:// or http(s) URL); defaults to the configured reference
        reference: Option<String>,
        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
        /// Print why a comparison failed instead of only the verdict
        #[arg(long)]
        explain: bool,
    },
    /// Count the faces the detector reports for an image
    Detect {
        image: String,
    },
    /// Print the feature vector of the first face in an image
    Vector {
        image: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Compare {
            captured,
            reference,
            json,
            explain,
        } => {
            let reference = match reference.or_else(|| config.default_reference.clone()) {
                Some(r) => r,
                None => bail!("no reference image given and no default_reference configured"),
            };
            compare(&config, &captured, &reference, json, explain).await
        }
        Commands::Detect { image } => {
            let faces = detect(&config, &image, DetectorOptions::presence(config.min_face_size))
                .await?;
            println!("{} face(s) detected", faces.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Vector { image } => {
            let faces = detect(&config, &image, DetectorOptions::full(config.min_face_size)).await?;
            let Some(face) = faces.first() else {
                bail!("no face detected in {image}");
            };
            let vector = FeatureVectorBuilder.build(Some(face));
            println!("{}", serde_json::to_string_pretty(&vector)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn compare(
    config: &Config,
    captured: &str,
    reference: &str,
    json: bool,
    explain: bool,
) -> Result<ExitCode> {
    let comparator = FaceComparator::new(
        Arc::new(RecordedDetector),
        config.resolver(),
        config.comparator_config(),
    )?;

    let verdict = if explain {
        match comparator.try_compare(captured, reference).await {
            Ok(report) => {
                eprintln!("euclidean distance: {:.4}", report.euclidean_distance);
                report.verdict
            }
            Err(reason) => {
                eprintln!("comparison failed: {reason}");
                reason.into()
            }
        }
    } else {
        comparator.compare_faces(captured, reference).await
    };

    println!("{}", render_verdict(&verdict, json)?);
    Ok(exit_code(&verdict))
}

/// Human-readable or JSON presentation of a verdict.
fn render_verdict(verdict: &ComparisonVerdict, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string(verdict)?);
    }
    let outcome = if verdict.is_match { "Face verified" } else { "Face not verified" };
    Ok(format!("{outcome}\nMatch score: {:.1}%", verdict.score_percent()))
}

fn exit_code(verdict: &ComparisonVerdict) -> ExitCode {
    if verdict.is_match {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn detect(
    config: &Config,
    image: &str,
    options: DetectorOptions,
) -> Result<facecheck_core::FaceDetectionResult> {
    let resolved = config.resolver().resolve(image).await;
    RecordedDetector
        .detect(&resolved, &options)
        .await
        .with_context(|| format!("detecting faces in {image}"))
}
