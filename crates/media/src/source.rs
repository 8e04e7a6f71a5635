//! The [Source] contract: something that yields [CodedUnit]s from one or more
//! streams until it runs out, and can be rewound.

use std::error::Error;

use thiserror::Error;

use crate::packet::{CodedUnit, MediaKind, Rational};

/// A stream a [Source] can produce units for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    /// The time base of every [CodedUnit] from this stream.
    pub time_base: Rational,
    /// Declared frames per second (video), `0.0` if unknown or not video.
    pub fps: f64,
}

/// A demultiplexed input (a file, a device) that yields coded units.
///
/// Sources are only ever touched by one thread at a time, but that thread
/// changes (a capture's worker reads while the owner opens and closes).
pub trait Source: Send + 'static {
    /// A human readable name, used in logs and errors.
    fn name(&self) -> &str;

    /// Every stream this source can produce units for.
    ///
    /// # Contract
    ///
    /// The returned list never changes.
    fn streams(&self) -> &[StreamInfo];

    /// Read the next unit, from whichever stream comes next. `Ok(None)` means
    /// the source is exhausted (until it's rewound).
    fn read_unit(&mut self) -> Result<Option<CodedUnit>, SourceError>;

    /// Rewind a stream to its first unit.
    fn seek_to_origin(&mut self, stream_index: usize) -> Result<(), SourceError>;

    /// Release whatever the source holds. Nothing else is called afterwards.
    fn close(&mut self) {}

    /// The first stream of the given kind.
    fn first_stream(&self, kind: MediaKind) -> Option<StreamInfo> {
        self.streams().iter().find(|s| s.kind == kind).copied()
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn streams(&self) -> &[StreamInfo] {
        (**self).streams()
    }

    fn read_unit(&mut self) -> Result<Option<CodedUnit>, SourceError> {
        (**self).read_unit()
    }

    fn seek_to_origin(&mut self, stream_index: usize) -> Result<(), SourceError> {
        (**self).seek_to_origin(stream_index)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Indicates that something went wrong opening or reading a [Source].
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open `{name}`: {reason}")]
    Open { name: String, reason: String },
    #[error("Failed to probe the streams of `{name}`: {reason}")]
    Probe { name: String, reason: String },
    #[error("Failed to read from the source: {0}")]
    Read(String),
    #[error("Failed to rewind stream {stream_index}: {reason}")]
    Seek { stream_index: usize, reason: String },
    #[error("The source has no stream with index {0}.")]
    UnknownStream(usize),
    #[error("`{0}` had nothing to read, so it can't be looped.")]
    NothingToLoop(String),
    #[error("{0}")]
    Other(Box<dyn Error + Send + Sync>),
}
