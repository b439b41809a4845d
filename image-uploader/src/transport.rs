use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::encode::EncodedResult;
use crate::upload::UploadClient;

/// Final pixel dimensions of the encoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Caller-supplied replacement for the built-in HTTP uploader.
#[async_trait]
pub trait UploadHandler: Send + Sync {
    /// Deliver the encoded image; resolves once with the handler's success value or error.
    async fn upload(&self, file: EncodedResult, dimensions: Dimensions) -> anyhow::Result<JsonValue>;
}

/// How a pipeline ships its result. Chosen once when the pipeline is configured.
#[derive(Clone)]
pub enum Transport {
    /// Preview only.
    None,
    Http { client: UploadClient, endpoint: String },
    Custom(Arc<dyn UploadHandler>),
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::None => "none",
            Transport::Http { .. } => "http",
            Transport::Custom(_) => "custom",
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Http { endpoint, .. } => f
                .debug_struct("Http")
                .field("endpoint", endpoint)
                .finish(),
            other => f.write_str(other.kind()),
        }
    }
}
