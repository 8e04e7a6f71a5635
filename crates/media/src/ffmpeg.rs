//! FFmpeg-backed [Source](crate::source::Source) and
//! [Decoder](crate::decoder::Decoder)s, used by
//! [MediaCapture::open_file](crate::capture::MediaCapture::open_file).
//!
//! Decoded video is converted to `yuv420p`. Decoded audio keeps the decoder's
//! sample format (planes packed back to back).

mod audio;
mod container;
mod video;

#[cfg(debug_assertions)]
use std::sync::atomic::{AtomicBool, Ordering};

use ctor::ctor;

use ffmpeg::codec::Context as FFmpegCodecContext;
use ffmpeg_next as ffmpeg;

use util::{debug_log_error, debug_log_trace};

use crate::decoder::{BoxedAudioDecoder, BoxedVideoDecoder, DecodeError, DecoderFactory, PacketEmitter};
use crate::packet::Rational;
use crate::source::StreamInfo;

pub use audio::AudioDecoder;
pub use container::{Container, InputFormat, find_input_format};
pub use video::VideoDecoder;

/// Builds [VideoDecoder]s and [AudioDecoder]s for the streams of a
/// [Container].
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegDecoders;

impl FfmpegDecoders {
    /// A codec context for `stream`, or [None] if FFmpeg has no decoder for
    /// its codec.
    fn codec_context(
        source: &Container,
        stream: &StreamInfo,
    ) -> Result<Option<FFmpegCodecContext>, DecodeError> {
        let Some(parameters) = source.codec_parameters(stream.index) else {
            return Ok(None);
        };

        if ffmpeg::decoder::find(parameters.id()).is_none() {
            debug_log_trace!(
                "FFmpeg has no decoder for {:?} (stream {}).",
                parameters.id(),
                stream.index
            );
            return Ok(None);
        }

        FFmpegCodecContext::from_parameters(parameters)
            .map(Some)
            .map_err(codec_error)
    }
}

impl DecoderFactory<Container> for FfmpegDecoders {
    fn video_decoder(
        &self,
        source: &Container,
        stream: &StreamInfo,
        emitter: PacketEmitter,
    ) -> Result<Option<BoxedVideoDecoder>, DecodeError> {
        Ok(Self::codec_context(source, stream)?
            .map(|context| Box::new(VideoDecoder::new(*stream, context, emitter)) as BoxedVideoDecoder))
    }

    fn audio_decoder(
        &self,
        source: &Container,
        stream: &StreamInfo,
        emitter: PacketEmitter,
    ) -> Result<Option<BoxedAudioDecoder>, DecodeError> {
        Ok(Self::codec_context(source, stream)?
            .map(|context| Box::new(AudioDecoder::new(*stream, context, emitter)) as BoxedAudioDecoder))
    }
}

fn codec_error(err: ffmpeg::Error) -> DecodeError {
    DecodeError::Codec(err.to_string())
}

fn rational_from_ffmpeg(rational: ffmpeg::Rational) -> Rational {
    Rational::new(rational.numerator(), rational.denominator())
}

/// Whether `err` means the decoder wants its output read before it takes
/// more input.
fn is_again(err: &ffmpeg::Error) -> bool {
    matches!(err, ffmpeg::Error::Other { errno } if *errno == ffmpeg::ffi::EAGAIN)
}

/// Map a failed `send_packet`. Corrupt input only costs the unit, anything
/// else is fatal.
fn send_error(err: ffmpeg::Error, stream_index: usize) -> DecodeError {
    match err {
        ffmpeg::Error::InvalidData => DecodeError::InvalidData {
            stream_index,
            reason: err.to_string(),
        },
        err => codec_error(err),
    }
}

/// Initializes FFmpeg. This happens when the [crate] is loaded.
///
/// You should never actually call this function.
#[ctor]
fn ffmpeg_init() {
    #[cfg(debug_assertions)]
    {
        static ALREADY_INIT: AtomicBool = AtomicBool::new(false);
        assert!(
            !ALREADY_INIT.swap(true, Ordering::SeqCst),
            "Tried to initialize FFmpeg twice."
        );
    }

    if let Err(err) = ffmpeg::init() {
        debug_log_error!("FFmpeg failed to initialize: {err}");
    }
}
