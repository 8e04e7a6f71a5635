//! The [Decoder] contract: per-stream adapters that turn [CodedUnit]s into
//! [Packet](crate::packet::Packet)s.
//!
//! Adapters don't return their output. They're handed a [PacketEmitter] when
//! they're built and emit through it, so `decode` only has to report whether
//! something came out.

mod passthrough;

use std::error::Error;

use thiserror::Error;

use util::signal::Signal;

use crate::codec::{AudioCodec, VideoCodec};
use crate::packet::{CodedUnit, Packet};
use crate::source::StreamInfo;

pub use passthrough::*;

/// Where decoders send what they produce.
pub type PacketEmitter = Signal<Packet>;

/// Decodes one stream.
///
/// The lifecycle is `create` → `open` → any number of `decode`/`flush` calls →
/// `close`. Adapters are used from one thread at a time.
pub trait Decoder: Send + 'static {
    /// [VideoCodec] or [AudioCodec].
    type Params;

    /// The stream this adapter decodes, or [None] if it isn't bound to a
    /// stream of a [Source](crate::source::Source).
    fn stream_index(&self) -> Option<usize>;

    /// What the coded input looks like.
    fn iparams(&self) -> &Self::Params;

    /// What the decoded output looks like. Only meaningful after
    /// [Self::open].
    fn oparams(&self) -> &Self::Params;

    /// The timestamp (microseconds) of the last output, `0` before the first.
    fn pts(&self) -> i64;

    /// Allocate whatever the adapter needs.
    fn create(&mut self) -> Result<(), DecodeError>;

    /// Get ready to decode. Resolves [Self::oparams].
    fn open(&mut self) -> Result<(), DecodeError>;

    /// Release everything. Calling this more than once is fine.
    fn close(&mut self);

    /// Decode one unit. Returns `true` exactly when output was produced (and
    /// emitted).
    fn decode(&mut self, unit: &CodedUnit) -> Result<bool, DecodeError>;

    /// Drain output the adapter is holding on to (reordered frames,
    /// lookahead). Call repeatedly until it returns `false`, after which the
    /// adapter is ready for new input again.
    fn flush(&mut self) -> Result<bool, DecodeError>;
}

pub type BoxedVideoDecoder = Box<dyn Decoder<Params = VideoCodec>>;
pub type BoxedAudioDecoder = Box<dyn Decoder<Params = AudioCodec>>;

/// Builds the adapters for the streams of one kind of
/// [Source](crate::source::Source).
///
/// Returning `Ok(None)` means "I can't decode this stream", and the capture
/// moves on to the next stream of the same kind.
pub trait DecoderFactory<S: ?Sized> {
    fn video_decoder(
        &self,
        source: &S,
        stream: &StreamInfo,
        emitter: PacketEmitter,
    ) -> Result<Option<BoxedVideoDecoder>, DecodeError>;

    fn audio_decoder(
        &self,
        source: &S,
        stream: &StreamInfo,
        emitter: PacketEmitter,
    ) -> Result<Option<BoxedAudioDecoder>, DecodeError>;
}

/// Indicates that a [Decoder] failed.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The unit was corrupt. Skipping it and carrying on is fine.
    #[error("Invalid data in stream {stream_index}: {reason}")]
    InvalidData { stream_index: usize, reason: String },
    #[error("The codec failed: {0}")]
    Codec(String),
    #[error("The decoder isn't open.")]
    Closed,
    #[error("{0}")]
    Other(Box<dyn Error + Send + Sync>),
}

impl DecodeError {
    /// Whether the failure is limited to the unit being decoded.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::InvalidData { .. })
    }
}
