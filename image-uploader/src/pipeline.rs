use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::config::UploaderConfig;
use crate::decode::{DecodeError, decode_async};
use crate::encode::{EncodeError, EncodedResult, encode, is_jpeg, reformat};
use crate::orientation::normalize;
use crate::scale::scale;
use crate::transport::{Dimensions, Transport, UploadHandler};
use crate::upload::{ResponseBody, UploadClient, UploadDescriptor, UploadError};

/// A user-selected file as delivered by the file-selection collaborator.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    /// Declared MIME type; may be empty, in which case it is guessed from `name`.
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    fn effective_mime(&self) -> String {
        if !self.mime_type.trim().is_empty() {
            return self.mime_type.trim().to_string();
        }
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .to_string()
    }
}

/// Progress of a single run, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Decoding,
    Normalizing,
    Scaling,
    Encoding,
    PreviewEmitted,
    Uploading,
    Done,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("custom upload handler failed: {0:#}")]
    Handler(anyhow::Error),
}

/// Terminal success value of an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadResponse {
    Http(ResponseBody),
    Custom(JsonValue),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Disabled, or rejected by `before_upload`; nothing ran.
    Skipped,
    /// No transport configured; the run ended after the preview.
    PreviewOnly(EncodedResult),
    Uploaded {
        preview: EncodedResult,
        response: UploadResponse,
    },
}

/// Callbacks surfaced by a run. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    /// Return false to drop the file before any work starts.
    fn before_upload(&self, _file: &SelectedFile) -> bool {
        true
    }
    /// Fires once, after encoding and before any network activity.
    fn on_preview(&self, _result: &EncodedResult) {}
    fn on_progress(&self, _fraction: f64, _result: &EncodedResult) {}
    fn on_success(&self, _response: &UploadResponse, _result: &EncodedResult) {}
    fn on_error(&self, _error: &PipelineError, _result: &EncodedResult) {}
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Decode -> orient -> scale -> encode -> preview -> upload, one file per run.
/// Runs share nothing mutable, so one `Pipeline` may serve concurrent selections.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: UploaderConfig,
    transport: Transport,
}

impl Pipeline {
    pub fn new(config: UploaderConfig) -> Self {
        let transport = match config.endpoint() {
            Some(endpoint) => Transport::Http {
                client: UploadClient::new(),
                endpoint: endpoint.to_string(),
            },
            None => Transport::None,
        };
        Self { config, transport }
    }

    /// Replace the built-in uploader. Takes precedence over `action`.
    pub fn with_handler(mut self, handler: Arc<dyn UploadHandler>) -> Self {
        self.transport = Transport::Custom(handler);
        self
    }

    /// Use a specific HTTP client for the built-in uploader. No effect without an endpoint
    /// or when a custom handler is attached.
    pub fn with_client(mut self, client: UploadClient) -> Self {
        if let Transport::Http { endpoint, .. } = &self.transport {
            let endpoint = endpoint.clone();
            self.transport = Transport::Http { client, endpoint };
        }
        self
    }

    pub fn config(&self) -> &UploaderConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub async fn run(
        &self,
        file: SelectedFile,
        observer: &dyn PipelineObserver,
    ) -> Result<RunOutcome, PipelineError> {
        if self.config.disabled {
            tracing::debug!(file = %file.name, "uploader disabled; ignoring selection");
            return Ok(RunOutcome::Skipped);
        }
        if !observer.before_upload(&file) {
            tracing::debug!(file = %file.name, "selection rejected by before_upload");
            return Ok(RunOutcome::Skipped);
        }
        let mime_type = file.effective_mime();
        let SelectedFile { name, bytes, .. } = file;

        enter(Stage::Decoding, &name);
        let decoded = decode_async(bytes, self.config.auto_rotate).await?;

        enter(Stage::Normalizing, &name);
        let oriented = normalize(decoded.buffer, decoded.orientation);

        enter(Stage::Scaling, &name);
        let target = self.config.scale_target();
        let scaled = scale(oriented, &target);

        enter(Stage::Encoding, &name);
        let quality = if is_jpeg(&mime_type) {
            target.quality
        } else {
            1.0
        };
        let encoded = encode(&scaled, &mime_type, quality)?;
        drop(scaled);
        let result = reformat(&encoded, self.config.result_type);
        let dimensions = Dimensions {
            width: encoded.width,
            height: encoded.height,
        };

        observer.on_preview(&result);
        enter(Stage::PreviewEmitted, &name);

        let response = match &self.transport {
            Transport::None => {
                enter(Stage::Done, &name);
                return Ok(RunOutcome::PreviewOnly(result));
            }
            Transport::Http { client, endpoint } => {
                enter(Stage::Uploading, &name);
                let descriptor = UploadDescriptor::new(
                    endpoint.clone(),
                    self.config.name.clone(),
                    encoded.bytes,
                    name.clone(),
                    encoded.mime,
                );
                client
                    .send(descriptor)
                    .finish(|fraction| observer.on_progress(fraction, &result))
                    .await
                    .map(UploadResponse::Http)
                    .map_err(PipelineError::Upload)
            }
            Transport::Custom(handler) => {
                enter(Stage::Uploading, &name);
                handler
                    .upload(result.clone(), dimensions)
                    .await
                    .map(UploadResponse::Custom)
                    .map_err(PipelineError::Handler)
            }
        };

        enter(Stage::Done, &name);
        match response {
            Ok(response) => {
                observer.on_success(&response, &result);
                Ok(RunOutcome::Uploaded {
                    preview: result,
                    response,
                })
            }
            Err(err) => {
                tracing::warn!(file = %name, transport = self.transport.kind(), error = %err, "upload failed");
                observer.on_error(&err, &result);
                Err(err)
            }
        }
    }
}

fn enter(stage: Stage, file: &str) {
    tracing::debug!(?stage, file = %file, "pipeline stage");
}
