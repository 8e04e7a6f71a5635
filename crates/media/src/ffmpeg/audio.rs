use ffmpeg::codec::Context as FFmpegCodecContext;
use ffmpeg::codec::decoder::Audio as FFmpegAudioDecoder;
use ffmpeg::frame::Audio as FFmpegAudioFrame;
use ffmpeg::Packet as FFmpegPacket;
use ffmpeg_next as ffmpeg;

use super::{codec_error, is_again, send_error};
use crate::codec::AudioCodec;
use crate::decoder::{DecodeError, Decoder, PacketEmitter};
use crate::packet::{CodedUnit, MICROS, Packet, PacketKind, Rational};
use crate::source::StreamInfo;

/// Decodes one audio stream with FFmpeg. Samples keep the decoder's format.
pub struct AudioDecoder {
    stream: StreamInfo,
    context: Option<FFmpegCodecContext>,
    decoder: Option<FFmpegAudioDecoder>,
    frame: FFmpegAudioFrame,
    params: AudioCodec,
    emitter: PacketEmitter,
    time_base: Rational,
    last_pts: i64,
    eof_sent: bool,
}

impl AudioDecoder {
    pub fn new(stream: StreamInfo, context: FFmpegCodecContext, emitter: PacketEmitter) -> Self {
        Self {
            stream,
            context: Some(context),
            decoder: None,
            frame: FFmpegAudioFrame::empty(),
            params: AudioCodec::new(0, 0, ""),
            emitter,
            time_base: stream.time_base,
            last_pts: 0,
            eof_sent: false,
        }
    }

    fn decoder(&mut self) -> Result<&mut FFmpegAudioDecoder, DecodeError> {
        self.decoder.as_mut().ok_or(DecodeError::Closed)
    }

    fn receive_one(&mut self) -> Result<bool, DecodeError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(DecodeError::Closed);
        };

        match decoder.receive_frame(&mut self.frame) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(false),
            Err(err) if is_again(&err) => return Ok(false),
            Err(err) => return Err(codec_error(err)),
        }

        let time = self
            .frame
            .pts()
            .map(|pts| self.time_base.rescale(pts, MICROS))
            .unwrap_or(self.last_pts);

        self.last_pts = time;
        self.emitter.emit(&Packet {
            kind: PacketKind::Audio {
                channels: self.params.channels,
                sample_rate: self.params.sample_rate,
                sample_fmt: self.params.sample_fmt.clone(),
                samples: self.frame.samples(),
            },
            time,
            data: pack_samples(&self.frame),
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

impl Decoder for AudioDecoder {
    type Params = AudioCodec;

    fn stream_index(&self) -> Option<usize> {
        Some(self.stream.index)
    }

    fn iparams(&self) -> &AudioCodec {
        &self.params
    }

    fn oparams(&self) -> &AudioCodec {
        &self.params
    }

    fn pts(&self) -> i64 {
        self.last_pts
    }

    fn create(&mut self) -> Result<(), DecodeError> {
        let context = self.context.take().ok_or(DecodeError::Closed)?;
        self.decoder = Some(context.decoder().audio().map_err(codec_error)?);
        Ok(())
    }

    fn open(&mut self) -> Result<(), DecodeError> {
        let decoder = self.decoder()?;

        self.params = AudioCodec {
            encoder: decoder.id().name().to_owned(),
            ..AudioCodec::new(decoder.channels() as u16, decoder.rate(), decoder.format().name())
        };

        if self.params.channels == 0 || self.params.sample_rate == 0 {
            return Err(DecodeError::Codec(format!(
                "stream {} has no channel layout or sample rate",
                self.stream.index
            )));
        }

        Ok(())
    }

    fn close(&mut self) {
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

        self.decoder()?.flush();
        self.eof_sent = false;
        Ok(false)
    }
}

/// Copy a frame's samples without the padding FFmpeg leaves after each
/// plane.
fn pack_samples(frame: &FFmpegAudioFrame) -> Vec<u8> {
    let bytes_per_sample = frame.format().bytes();
    let channels = usize::from(frame.channels());

    if frame.is_planar() {
        let plane_len = frame.samples() * bytes_per_sample;
        let mut data = Vec::with_capacity(plane_len * channels);
        for plane in 0..frame.planes() {
            let bytes = frame.data(plane);
            data.extend_from_slice(&bytes[..plane_len.min(bytes.len())]);
        }
        data
    } else {
        let len = frame.samples() * bytes_per_sample * channels;
        let bytes = frame.data(0);
        bytes[..len.min(bytes.len())].to_vec()
    }
}
