use std::ffi::CString;
use std::path::Path;

use ffmpeg::codec::Parameters as FFmpegCodecParameters;
use ffmpeg::format::Format as FFmpegFormat;
use ffmpeg::format::Input as FFmpegInputFormat;
use ffmpeg::format::context::Context as FFmpegFormatContext;
use ffmpeg::format::context::Input as FFmpegInputFormatContext;
use ffmpeg::media::Type as FFmpegMediaType;
use ffmpeg::{Dictionary as FFmpegDictionary, Packet as FFmpegPacket};
use ffmpeg_next as ffmpeg;

use util::{debug_log_info, debug_log_warning};

use super::rational_from_ffmpeg;
use crate::packet::{CodedUnit, MediaKind};
use crate::source::{Source, SourceError, StreamInfo};

/// A demuxer FFmpeg knows by name (e.g. `"v4l2"`, `"matroska"`).
pub struct InputFormat(FFmpegInputFormat);

impl InputFormat {
    pub fn name(&self) -> &str {
        self.0.name()
    }
}

impl std::fmt::Debug for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("InputFormat").field(&self.name()).finish()
    }
}

/// Look up an input format by its short name.
pub fn find_input_format(name: &str) -> Option<InputFormat> {
    let name = CString::new(name).ok()?;

    // SAFETY: `name` is a valid C string that outlives the call. The result is
    // either null or points at one of FFmpeg's static format descriptions.
    let format = unsafe { ffmpeg::ffi::av_find_input_format(name.as_ptr()) };
    if format.is_null() {
        return None;
    }

    // SAFETY: Checked for null above, and the description is never freed.
    Some(InputFormat(unsafe { FFmpegInputFormat::wrap(format as *mut _) }))
}

/// A file or device opened with FFmpeg. Yields the units of its audio and
/// video streams in file order.
pub struct Container {
    name: String,
    input: FFmpegInputFormatContext,
    streams: Vec<StreamInfo>,
    /// Where each entry of `streams` starts, in its own time base.
    origins: Vec<i64>,
}

impl Container {
    /// Open `path`, probing for its format unless `format` is given.
    pub fn open(path: &Path, format: Option<InputFormat>) -> Result<Self, SourceError> {
        let name = path.display().to_string();

        let input = match format {
            None => ffmpeg::format::input(path).map_err(|err| SourceError::Open {
                name: name.clone(),
                reason: err.to_string(),
            })?,
            Some(InputFormat(format)) => {
                let context =
                    ffmpeg::format::open_with(path, &FFmpegFormat::Input(format), FFmpegDictionary::new())
                        .map_err(|err| SourceError::Open {
                            name: name.clone(),
                            reason: err.to_string(),
                        })?;

                match context {
                    FFmpegFormatContext::Input(input) => input,
                    FFmpegFormatContext::Output(_) => {
                        return Err(SourceError::Open {
                            name,
                            reason: String::from("opened for output instead of input"),
                        });
                    }
                }
            }
        };

        let mut streams = Vec::new();
        let mut origins = Vec::new();

        for stream in input.streams() {
            let kind = match stream.parameters().medium() {
                FFmpegMediaType::Video => MediaKind::Video,
                FFmpegMediaType::Audio => MediaKind::Audio,
                _ => continue,
            };

            let frame_rate = stream.avg_frame_rate();
            let fps = if kind == MediaKind::Video && frame_rate.denominator() != 0 {
                f64::from(frame_rate)
            } else {
                0.0
            };

            let time_base = rational_from_ffmpeg(stream.time_base());
            if !time_base.is_valid() {
                debug_log_warning!("Stream {} of `{name}` has no time base.", stream.index());
            }

            streams.push(StreamInfo {
                index: stream.index(),
                kind,
                time_base,
                fps,
            });

            let start_time = stream.start_time();
            origins.push(if start_time == ffmpeg::ffi::AV_NOPTS_VALUE {
                0
            } else {
                start_time
            });
        }

        if streams.is_empty() {
            return Err(SourceError::Probe {
                name,
                reason: String::from("no audio or video streams"),
            });
        }

        debug_log_info!("Opened `{name}` with FFmpeg ({} streams).", streams.len());

        Ok(Self {
            name,
            input,
            streams,
            origins,
        })
    }

    /// What a decoder for stream `stream_index` needs to know.
    pub fn codec_parameters(&self, stream_index: usize) -> Option<FFmpegCodecParameters> {
        self.input
            .stream(stream_index)
            .map(|stream| stream.parameters())
    }

    fn stream_info(&self, stream_index: usize) -> Option<(&StreamInfo, i64)> {
        let position = self.streams.iter().position(|s| s.index == stream_index)?;
        Some((&self.streams[position], self.origins[position]))
    }
}

impl Source for Container {
    fn name(&self) -> &str {
        &self.name
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_unit(&mut self) -> Result<Option<CodedUnit>, SourceError> {
        let mut packet = FFmpegPacket::empty();

        loop {
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(err) => return Err(SourceError::Read(err.to_string())),
            }

            // Units from streams we don't know about (subtitles, data) are
            // skipped.
            let Some((stream, _)) = self.stream_info(packet.stream()) else {
                continue;
            };

            return Ok(Some(CodedUnit {
                stream_index: stream.index,
                kind: stream.kind,
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                pts: packet.pts(),
                dts: packet.dts(),
                duration: packet.duration(),
                time_base: stream.time_base,
            }));
        }
    }

    fn seek_to_origin(&mut self, stream_index: usize) -> Result<(), SourceError> {
        let (_, origin) = self
            .stream_info(stream_index)
            .ok_or(SourceError::UnknownStream(stream_index))?;

        let stream = i32::try_from(stream_index).map_err(|_| SourceError::UnknownStream(stream_index))?;

        // SAFETY: The context pointer is valid for as long as `self.input` is
        // and nothing else is using it (we have `&mut self`).
        let result = unsafe {
            ffmpeg::ffi::av_seek_frame(
                self.input.as_mut_ptr(),
                stream,
                origin,
                ffmpeg::ffi::AVSEEK_FLAG_BACKWARD as i32,
            )
        };

        if result < 0 {
            return Err(SourceError::Seek {
                stream_index,
                reason: ffmpeg::Error::from(result).to_string(),
            });
        }

        Ok(())
    }
}
