//! Errors a [MediaCapture](super::MediaCapture) can report.

use thiserror::Error;

use util::worker::WorkerError;

use crate::decoder::DecodeError;
use crate::framing::FramingError;
use crate::source::SourceError;

/// Indicates that a capture was set up wrong.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("The capture is already initialized. Close it before opening something else.")]
    AlreadyInitialized,
    #[error("Unknown input format `{0}`.")]
    UnknownFormat(String),
    #[error("`{0}` has no video or audio stream that can be decoded.")]
    NoUsableStream(String),
    #[error("There's nothing to capture (no decoders and no injected source).")]
    NothingToCapture,
}

/// Anything that can go wrong in a capture.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
}
