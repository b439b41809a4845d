use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use image_uploader::{
    Config, EncodedResult, Pipeline, PipelineError, PipelineObserver, RunOutcome, SelectedFile,
    UploadResponse,
};
use tracing_subscriber::{EnvFilter, fmt};

/// Normalize, downscale and upload one image.
#[derive(Debug, Parser)]
#[command(name = "image-uploader", version)]
struct Args {
    /// Config file (TOML). Defaults to ./uploader.toml when present.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Write the encoded preview bytes here.
    #[arg(long)]
    preview_out: Option<PathBuf>,
    /// Override the MIME type instead of guessing from the file name.
    #[arg(long)]
    mime: Option<String>,
    /// Image to process.
    file: PathBuf,
}

struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_preview(&self, result: &EncodedResult) {
        let size = result.to_bytes().map(|b| b.len()).unwrap_or(0);
        tracing::info!(bytes = size, "preview ready");
    }

    fn on_progress(&self, fraction: f64, _result: &EncodedResult) {
        tracing::info!(percent = format_args!("{:.1}", fraction * 100.0), "uploading");
    }

    fn on_success(&self, response: &UploadResponse, _result: &EncodedResult) {
        tracing::info!(?response, "upload complete");
    }

    fn on_error(&self, error: &PipelineError, _result: &EncodedResult) {
        tracing::error!(error = %error, "upload failed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    // Load config first so we can honor logging.filter directive.
    let cfg = Config::load(args.config.clone()).await?;
    let filter_directive = cfg
        .logging
        .as_ref()
        .and_then(|l| l.filter.clone())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info,image_uploader=debug".to_string());
    fmt()
        .with_env_filter(EnvFilter::new(filter_directive))
        .init();

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;
    let name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let file = SelectedFile::new(name, args.mime.unwrap_or_default(), bytes);

    let pipeline = Pipeline::new(cfg.uploader);
    let outcome = pipeline.run(file, &LogObserver).await?;

    let (preview, response) = match outcome {
        RunOutcome::Skipped => {
            tracing::info!("uploader disabled; nothing done");
            return Ok(());
        }
        RunOutcome::PreviewOnly(preview) => (preview, None),
        RunOutcome::Uploaded { preview, response } => (preview, Some(response)),
    };
    if let Some(path) = &args.preview_out {
        tokio::fs::write(path, preview.to_bytes()?)
            .await
            .with_context(|| format!("writing preview to {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote preview");
    }
    if let Some(response) = response {
        let json = match response {
            UploadResponse::Http(body) => body.to_json(),
            UploadResponse::Custom(v) => v,
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
    }
    Ok(())
}
