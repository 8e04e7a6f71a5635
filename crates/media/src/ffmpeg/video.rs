use ffmpeg::codec::Context as FFmpegCodecContext;
use ffmpeg::codec::decoder::Video as FFmpegVideoDecoder;
use ffmpeg::format::Pixel as FFmpegPixelFormat;
use ffmpeg::frame::Video as FFmpegVideoFrame;
use ffmpeg::software::scaling::Context as FFmpegScalingContext;
use ffmpeg::software::scaling::flag::Flags as FFmpegScalingFlags;
use ffmpeg::Packet as FFmpegPacket;
use ffmpeg_next as ffmpeg;

use util::debug_log_warning;

use super::{codec_error, is_again, send_error};
use crate::codec::{DEFAULT_PIXEL_FMT, VideoCodec};
use crate::decoder::{DecodeError, Decoder, PacketEmitter};
use crate::packet::{CodedUnit, MICROS, Packet, PacketKind, Rational};
use crate::source::StreamInfo;

/// Decodes one video stream with FFmpeg and emits `yuv420p` pictures.
pub struct VideoDecoder {
    stream: StreamInfo,
    context: Option<FFmpegCodecContext>,
    decoder: Option<FFmpegVideoDecoder>,
    formatter: Option<Yuv420pFormatter>,
    iparams: VideoCodec,
    oparams: VideoCodec,
    emitter: PacketEmitter,
    /// The time base of the units being sent (it changes to microseconds when
    /// the capture stamps units with wall-clock time).
    time_base: Rational,
    last_pts: i64,
    eof_sent: bool,
}

impl VideoDecoder {
    pub fn new(stream: StreamInfo, context: FFmpegCodecContext, emitter: PacketEmitter) -> Self {
        Self {
            stream,
            context: Some(context),
            decoder: None,
            formatter: None,
            iparams: VideoCodec::new(0, 0, stream.fps),
            oparams: VideoCodec::new(0, 0, stream.fps),
            emitter,
            time_base: stream.time_base,
            last_pts: 0,
            eof_sent: false,
        }
    }

    fn decoder(&mut self) -> Result<&mut FFmpegVideoDecoder, DecodeError> {
        self.decoder.as_mut().ok_or(DecodeError::Closed)
    }

    /// Receive one picture and emit it. Returns `false` once the decoder has
    /// nothing ready.
    fn receive_one(&mut self) -> Result<bool, DecodeError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(DecodeError::Closed);
        };
        let formatter = self.formatter.as_mut().ok_or(DecodeError::Closed)?;

        let Some(frame) = formatter.receive(decoder)? else {
            return Ok(false);
        };

        let time = frame
            .pts()
            .map(|pts| self.time_base.rescale(pts, MICROS))
            .unwrap_or(self.last_pts);
        let data = pack_yuv420p(frame);

        self.last_pts = time;
        self.emitter.emit(&Packet {
            kind: PacketKind::Video {
                width: self.oparams.width,
                height: self.oparams.height,
                pixel_fmt: self.oparams.pixel_fmt.clone(),
            },
            time,
            data,
        });

        Ok(true)
    }

    fn receive_all(&mut self) -> Result<bool, DecodeError> {
        let mut received = false;
        while self.receive_one()? {
            received = true;
        }
        Ok(received)
    }
}

impl Decoder for VideoDecoder {
    type Params = VideoCodec;

    fn stream_index(&self) -> Option<usize> {
        Some(self.stream.index)
    }

    fn iparams(&self) -> &VideoCodec {
        &self.iparams
    }

    fn oparams(&self) -> &VideoCodec {
        &self.oparams
    }

    fn pts(&self) -> i64 {
        self.last_pts
    }

    fn create(&mut self) -> Result<(), DecodeError> {
        let context = self.context.take().ok_or(DecodeError::Closed)?;
        let decoder = context.decoder().video().map_err(codec_error)?;

        self.iparams = VideoCodec {
            encoder: decoder.id().name().to_owned(),
            width: decoder.width(),
            height: decoder.height(),
            pixel_fmt: pixel_format_name(decoder.format()),
            fps: self.stream.fps,
        };
        self.decoder = Some(decoder);

        Ok(())
    }

    fn open(&mut self) -> Result<(), DecodeError> {
        let decoder = self.decoder()?;
        let (format, width, height) = (decoder.format(), decoder.width(), decoder.height());

        if width == 0 || height == 0 {
            return Err(DecodeError::Codec(format!(
                "stream {} has no picture size ({width}x{height})",
                self.stream.index
            )));
        }

        self.formatter = Some(Yuv420pFormatter::new(format, width, height)?);
        self.oparams = VideoCodec {
            encoder: self.iparams.encoder.clone(),
            ..VideoCodec::new(width, height, self.stream.fps)
        };

        Ok(())
    }

    fn close(&mut self) {
        self.formatter = None;
        self.decoder = None;
        self.context = None;
    }

    fn decode(&mut self, unit: &CodedUnit) -> Result<bool, DecodeError> {
        let mut packet = FFmpegPacket::copy(&unit.data);
        packet.set_pts(unit.pts);
        packet.set_dts(unit.dts);
        packet.set_duration(unit.duration);
        self.time_base = unit.time_base;

        let mut received = false;
        if let Err(err) = self.decoder()?.send_packet(&packet) {
            if !is_again(&err) {
                return Err(send_error(err, self.stream.index));
            }

            // Full. Take what's ready and try once more.
            received = self.receive_all()?;
            self.decoder()?
                .send_packet(&packet)
                .map_err(|err| send_error(err, self.stream.index))?;
        }

        Ok(self.receive_all()? || received)
    }

    fn flush(&mut self) -> Result<bool, DecodeError> {
        if !self.eof_sent {
            match self.decoder()?.send_eof() {
                Ok(()) | Err(ffmpeg::Error::Eof) => {}
                Err(err) if is_again(&err) => {}
                Err(err) => return Err(codec_error(err)),
            }
            self.eof_sent = true;
        }

        if self.receive_one()? {
            return Ok(true);
        }

        // Drained. Reset so the decoder takes input again (after a rewind).
        self.decoder()?.flush();
        self.eof_sent = false;
        Ok(false)
    }
}

/// Receives pictures and converts them to `yuv420p` when they're in some other
/// format.
struct Yuv420pFormatter {
    scaler: Option<FFmpegScalingContext>,
    decoded: FFmpegVideoFrame,
    converted: FFmpegVideoFrame,
}

impl Yuv420pFormatter {
    fn new(format: FFmpegPixelFormat, width: u32, height: u32) -> Result<Self, DecodeError> {
        let scaler = if format == FFmpegPixelFormat::YUV420P {
            None
        } else {
            let scaler = FFmpegScalingContext::get(
                format,
                width,
                height,
                FFmpegPixelFormat::YUV420P,
                width,
                height,
                FFmpegScalingFlags::BILINEAR,
            )
            .map_err(|err| DecodeError::Codec(format!("can't convert to yuv420p: {err}")))?;
            Some(scaler)
        };

        Ok(Self {
            scaler,
            decoded: FFmpegVideoFrame::empty(),
            converted: FFmpegVideoFrame::empty(),
        })
    }

    /// The next picture from `decoder` in `yuv420p`, or [None] if nothing is
    /// ready.
    fn receive(
        &mut self,
        decoder: &mut FFmpegVideoDecoder,
    ) -> Result<Option<&FFmpegVideoFrame>, DecodeError> {
        match decoder.receive_frame(&mut self.decoded) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(None),
            Err(err) if is_again(&err) => return Ok(None),
            Err(err) => return Err(codec_error(err)),
        }

        let Some(scaler) = self.scaler.as_mut() else {
            return Ok(Some(&self.decoded));
        };

        if let Err(err) = scaler.run(&self.decoded, &mut self.converted) {
            debug_log_warning!("Failed to convert a picture to yuv420p: {err}");
            return Err(codec_error(err));
        }
        self.converted.set_pts(self.decoded.pts());

        Ok(Some(&self.converted))
    }
}

/// SAFETY: [FFmpegScalingContext] is safe to send between threads, it just
/// isn't marked [Send] (https://github.com/zmwangx/rust-ffmpeg/issues/252).
/// The frames are only touched through `&mut self`.
unsafe impl Send for Yuv420pFormatter {}

/// Copy the three planes of a `yuv420p` picture back to back, dropping the
/// padding at the end of each row.
fn pack_yuv420p(frame: &FFmpegVideoFrame) -> Vec<u8> {
    let (width, height) = (frame.width() as usize, frame.height() as usize);
    let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));

    let mut data = Vec::with_capacity(width * height + 2 * chroma_width * chroma_height);

    for (plane, (row_len, rows)) in [
        (width, height),
        (chroma_width, chroma_height),
        (chroma_width, chroma_height),
    ]
    .into_iter()
    .enumerate()
    {
        let stride = frame.stride(plane);
        let bytes = frame.data(plane);

        for row in 0..rows {
            let start = row * stride;
            data.extend_from_slice(&bytes[start..start + row_len]);
        }
    }

    data
}

fn pixel_format_name(format: FFmpegPixelFormat) -> String {
    format
        .descriptor()
        .map(|descriptor| descriptor.name().to_owned())
        .unwrap_or_else(|| String::from(DEFAULT_PIXEL_FMT))
}
