//! What a capture's worker thread runs: one of two loop bodies, wrapped so
//! that whatever happens the run ends with the closing signal.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use util::channels::input_throttle::InputThrottle;
use util::signal::Signal;
use util::worker::panic_message;
use util::{debug_log_error, debug_log_info, debug_log_trace, debug_log_warning};

use super::{CaptureError, CaptureShared, CaptureState, ConfigurationError, Resources};
use crate::decoder::{DecodeError, Decoder, PacketEmitter};
use crate::framing::{self, HEADER_LEN};
use crate::packet::{CodedUnit, EncodedFrame, Packet, PacketKind};
use crate::source::{Source, SourceError};
use crate::timing::{LoopSeam, RateLimiter, RealtimeClock};

/// Recorded in place of a panic's message.
pub const UNKNOWN_ERROR: &str = "Unknown Error";

/// Everything one run needs besides the resources it owns.
pub(super) struct Run {
    pub(super) shared: Arc<Mutex<CaptureShared>>,
    pub(super) encoded_frames: Arc<InputThrottle<Option<EncodedFrame>>>,
    pub(super) packets: PacketEmitter,
    pub(super) closing: Signal<()>,
    pub(super) injected: bool,
}

/// The settings read at the top of every iteration.
#[derive(Debug, Clone, Copy)]
struct Flags {
    stopping: bool,
    looping: bool,
    limit_framerate: bool,
    realtime_pts: bool,
}

impl Run {
    /// Run to completion, record how it went, emit the closing signal, and
    /// give the resources back.
    pub(super) fn execute(self, mut resources: Resources) -> Resources {
        debug_log_info!("Capture worker running.");

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if self.injected {
                self.run_injected(&resources)
            } else {
                self.run_container(&mut resources)
            }
        }));

        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => {
                debug_log_error!(
                    "Capture worker panicked: {}",
                    panic_message(payload.as_ref())
                );
                Some(String::from(UNKNOWN_ERROR))
            }
        };

        {
            let mut shared = super::lock_shared(&self.shared);
            if let Some(error) = error {
                debug_log_error!("Capture failed: {error}");
                shared.error = Some(error);
            }
            shared.stopping = true;
            shared.state = CaptureState::Closed;
        }

        debug_log_info!("Capture worker finished.");
        self.closing.emit(&());

        resources
    }

    /// Read units from the source and feed them to the decoders until the
    /// source runs out (and isn't looping) or the capture is stopped.
    fn run_container(&self, resources: &mut Resources) -> Result<(), CaptureError> {
        let Resources {
            source,
            video,
            audio,
        } = resources;

        let source = source
            .as_deref_mut()
            .ok_or(ConfigurationError::NothingToCapture)?;

        if self.flags().looping {
            seek_to_origin(source, video.as_deref(), audio.as_deref())?;
        }

        let clock = RealtimeClock::start();
        let mut limiter =
            RateLimiter::new(video.as_ref().and_then(|v| v.iparams().frame_interval()));
        let mut video_seam = LoopSeam::new();
        let mut audio_seam = LoopSeam::new();
        let mut read_this_lap = false;

        loop {
            let flags = self.flags();
            if flags.stopping {
                debug_log_trace!("Capture stopping.");
                break;
            }

            let Some(mut unit) = source.read_unit()? else {
                if !flags.looping {
                    self.set_state(CaptureState::Draining);
                }

                drain(video.as_deref_mut())?;
                drain(audio.as_deref_mut())?;

                if flags.looping {
                    if !read_this_lap {
                        return Err(SourceError::NothingToLoop(source.name().to_owned()).into());
                    }

                    debug_log_info!("Reached the end of `{}`, looping.", source.name());
                    seek_to_origin(source, video.as_deref(), audio.as_deref())?;
                    video_seam.rewound();
                    audio_seam.rewound();
                    read_this_lap = false;
                    continue;
                }

                debug_log_info!("Reached the end of `{}`.", source.name());
                break;
            };
            read_this_lap = true;

            debug_log_trace!(
                "Read {} unit (stream {}, pts {:?}, {} bytes).",
                unit.kind,
                unit.stream_index,
                unit.pts,
                unit.data.len()
            );

            let unit_stream = Some(unit.stream_index);

            if let Some(decoder) = video
                .as_deref_mut()
                .filter(|d| d.stream_index() == unit_stream)
            {
                if flags.realtime_pts {
                    clock.stamp(&mut unit);
                } else {
                    video_seam.apply(&mut unit);
                }

                if decode_unit(decoder, &unit)? {
                    debug_log_trace!("Decoded video (pts {}).", decoder.pts());

                    if flags.limit_framerate {
                        limiter.pace();
                    }
                }
            } else if let Some(decoder) = audio
                .as_deref_mut()
                .filter(|d| d.stream_index() == unit_stream)
            {
                audio_seam.apply(&mut unit);

                if decode_unit(decoder, &unit)? {
                    debug_log_trace!("Decoded audio (pts {}).", decoder.pts());
                }
            }
        }

        Ok(())
    }

    /// Emit injected frames until the stop marker comes through.
    fn run_injected(&self, resources: &Resources) -> Result<(), CaptureError> {
        let params = resources
            .video
            .as_ref()
            .map(|video| video.oparams().clone())
            .ok_or(ConfigurationError::NothingToCapture)?;

        let clock = RealtimeClock::start();
        let mut packet = Packet {
            kind: PacketKind::Framed {
                width: params.width,
                height: params.height,
            },
            time: 0,
            data: Vec::with_capacity(HEADER_LEN + params.yuv420p_frame_size()),
        };

        while let Some(frame) = self.encoded_frames.next_input() {
            if self.flags().stopping {
                break;
            }

            packet.time = clock.elapsed_micros();
            framing::write_framed(&frame, &mut packet.data)?;

            debug_log_trace!(
                "Emitting injected frame ({} bytes at {}us).",
                packet.data.len(),
                packet.time
            );
            self.packets.emit(&packet);
        }

        Ok(())
    }

    fn set_state(&self, state: CaptureState) {
        super::lock_shared(&self.shared).state = state;
    }

    fn flags(&self) -> Flags {
        let shared = super::lock_shared(&self.shared);
        Flags {
            stopping: shared.stopping,
            looping: shared.looping,
            limit_framerate: shared.limit_framerate,
            realtime_pts: shared.realtime_pts,
        }
    }
}

/// Decode one unit. Corrupt units are skipped with a warning, anything else
/// ends the run.
fn decode_unit<D: Decoder + ?Sized>(decoder: &mut D, unit: &CodedUnit) -> Result<bool, DecodeError> {
    match decoder.decode(unit) {
        Ok(decoded) => Ok(decoded),
        Err(err) if err.is_recoverable() => {
            debug_log_warning!("Skipping a {} unit: {err}", unit.kind);
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Flush a decoder until it has nothing left.
fn drain<D: Decoder + ?Sized>(decoder: Option<&mut D>) -> Result<(), DecodeError> {
    let Some(decoder) = decoder else {
        return Ok(());
    };

    let mut flushed = 0;
    while decoder.flush()? {
        flushed += 1;
    }

    if flushed > 0 {
        debug_log_trace!("Flushed {flushed} buffered output(s).");
    }

    Ok(())
}

fn seek_to_origin<V, A>(
    source: &mut dyn Source,
    video: Option<&V>,
    audio: Option<&A>,
) -> Result<(), CaptureError>
where
    V: Decoder + ?Sized,
    A: Decoder + ?Sized,
{
    let streams = [
        video.and_then(|v| v.stream_index()),
        audio.and_then(|a| a.stream_index()),
    ];

    for stream_index in streams.into_iter().flatten() {
        source.seek_to_origin(stream_index)?;
    }

    Ok(())
}
