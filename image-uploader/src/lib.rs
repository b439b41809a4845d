pub mod buffer;
pub mod config;
pub mod decode;
pub mod encode;
pub mod orientation;
pub mod pipeline;
pub mod scale;
pub mod transport;
pub mod upload;

pub use buffer::PixelBuffer;
pub use config::{Config, ResultType, UploaderConfig};
pub use encode::EncodedResult;
pub use pipeline::{
    NoopObserver, Pipeline, PipelineError, PipelineObserver, RunOutcome, SelectedFile,
    UploadResponse,
};
pub use transport::{Dimensions, Transport, UploadHandler};
pub use upload::{ResponseBody, TransferEvent, UploadClient, UploadDescriptor, UploadError};
