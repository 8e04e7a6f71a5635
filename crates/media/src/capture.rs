//! Contains [MediaCapture], which reads media on a dedicated worker thread and
//! emits [Packet](crate::packet::Packet)s at a controlled pace.
//!
//! A capture gets its input one of two ways:
//! - From a [Source] plus one [Decoder] per stream ([MediaCapture::open_stream],
//!   or [MediaCapture::open_file] with the `ffmpeg` feature). The worker reads
//!   units, fixes up their timestamps, and hands them to the decoders, which
//!   emit what they produce.
//! - From frames that are already encoded ([MediaCapture::open_injected]).
//!   Whoever produces them calls [MediaCapture::on_encoded_frame_ready] and the
//!   worker emits each one wrapped in a [framing](crate::framing) header.
//!
//! Run-time failures never cross back to the thread that owns the capture. They
//! are recorded (see [MediaCapture::error]) and the run ends with the closing
//! signal, the same as a clean end of stream.

mod error;
mod options;
mod worker_loop;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use util::channels::input_throttle::InputThrottle;
use util::signal::Signal;
use util::worker::Worker;
use util::{debug_log_error, debug_log_info, debug_log_trace};

use crate::codec::{AudioCodec, Format, VideoCodec};
use crate::decoder::{
    BoxedAudioDecoder, BoxedVideoDecoder, DecodeError, Decoder, DecoderFactory, PacketEmitter,
    Passthrough,
};
use crate::packet::{EncodedFrame, MediaKind};
use crate::source::{Source, StreamInfo};

pub use error::*;
pub use options::*;
pub use worker_loop::UNKNOWN_ERROR;

/// The name reported by [MediaCapture::encoder_format].
pub const FORMAT_NAME: &str = "Capture";

/// The name of every capture's worker thread.
pub const WORKER_THREAD_NAME: &str = "media-capture";

/// Where a capture is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// Never started.
    Idle,
    /// The worker is reading and emitting.
    Running,
    /// The source ran out and the worker is getting the last frames out of the
    /// decoders.
    Draining,
    /// The last run ended (or the capture was closed).
    Closed,
}

/// Something that feeds a capture encoded video frames, described by the size
/// and rate of what it produces.
pub trait EncodedFrameSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn max_fps(&self) -> f64;
}

impl EncodedFrameSource for VideoCodec {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn max_fps(&self) -> f64 {
        self.fps
    }
}

/// Reads media on a worker thread and emits it as
/// [Packet](crate::packet::Packet)s.
///
/// Every method takes `&self`, so a capture can be shared between threads
/// (e.g. in an [Arc]). Dropping a capture [closes](Self::close) it.
///
/// # Example
///
/// ```
/// use media::capture::MediaCapture;
/// use media::codec::VideoCodec;
///
/// let capture = MediaCapture::new();
/// capture.open_injected(&VideoCodec::new(640, 480, 30.0)).unwrap();
/// capture.packets().attach(|packet| println!("{} bytes", packet.data.len()));
///
/// capture.start().unwrap();
/// capture.on_encoded_frame_ready(vec![vec![0x00, 0x01], vec![0x02]]);
/// capture.stop();
/// ```
#[derive(Debug)]
pub struct MediaCapture {
    shared: Arc<Mutex<CaptureShared>>,
    control: Mutex<Control>,
    encoded_frames: Arc<InputThrottle<Option<EncodedFrame>>>,
    packets: PacketEmitter,
    closing: Signal<()>,
}

/// State the worker reads (and writes when a run ends). Never held while
/// anything slow happens.
#[derive(Debug)]
struct CaptureShared {
    state: CaptureState,
    stopping: bool,
    error: Option<String>,
    looping: bool,
    limit_framerate: bool,
    realtime_pts: bool,
    video: Option<VideoCodec>,
    audio: Option<AudioCodec>,
    has_source: bool,
    injected: bool,
}

/// Ownership of the source and decoders. They live here while the capture is
/// idle and move onto the worker thread for the length of a run.
#[derive(Debug, Default)]
struct Control {
    resources: Option<Resources>,
    worker: Option<Worker<Resources>>,
}

struct Resources {
    source: Option<Box<dyn Source>>,
    video: Option<BoxedVideoDecoder>,
    audio: Option<BoxedAudioDecoder>,
}

impl Resources {
    fn has_decoder(&self) -> bool {
        self.video.is_some() || self.audio.is_some()
    }

    fn close(&mut self) {
        if let Some(mut video) = self.video.take() {
            video.close();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.close();
        }
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}

impl std::fmt::Debug for Resources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resources")
            .field("source", &self.source.as_ref().map(|s| s.name().to_owned()))
            .field("video", &self.video.as_ref().map(|v| v.oparams().clone()))
            .field("audio", &self.audio.as_ref().map(|a| a.oparams().clone()))
            .finish()
    }
}

impl MediaCapture {
    /// Create an empty capture. Open something before starting it.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(CaptureShared {
                state: CaptureState::Idle,
                stopping: false,
                error: None,
                looping: false,
                limit_framerate: false,
                realtime_pts: false,
                video: None,
                audio: None,
                has_source: false,
                injected: false,
            })),
            control: Mutex::new(Control::default()),
            encoded_frames: Arc::new(InputThrottle::new(true, "MediaCapture")),
            packets: PacketEmitter::new(),
            closing: Signal::new(),
        }
    }

    /// Create an empty capture with `options` applied.
    pub fn with_options(options: &CaptureOptions) -> Self {
        let capture = Self::new();
        capture.apply_options(options);
        capture
    }

    pub fn apply_options(&self, options: &CaptureOptions) {
        {
            let mut shared = self.lock_shared();
            shared.looping = options.looping;
            shared.limit_framerate = options.limit_framerate;
            shared.realtime_pts = options.realtime_pts;
        }

        self.encoded_frames
            .set_max_inputs_to_buffer(options.max_inputs_to_buffer);
        self.encoded_frames.set_drop_inputs(options.drop_inputs);
        self.encoded_frames
            .set_warn_when_dropping(options.warn_when_dropping);
    }

    /// Open `source`, building decoders for its first decodable video stream
    /// and first decodable audio stream with `factory`.
    pub fn open_stream<S, F>(&self, source: S, factory: &F) -> Result<(), CaptureError>
    where
        S: Source,
        F: DecoderFactory<S> + ?Sized,
    {
        let mut control = self.lock_control();
        Self::ensure_uninitialized(&control)?;

        let mut source = source;
        let name = source.name().to_owned();

        let video = open_first_decoder(source.streams(), MediaKind::Video, |stream| {
            factory.video_decoder(&source, stream, self.packets.clone())
        });
        let video = match video {
            Ok(video) => video,
            Err(err) => {
                source.close();
                return Err(err.into());
            }
        };

        let audio = open_first_decoder(source.streams(), MediaKind::Audio, |stream| {
            factory.audio_decoder(&source, stream, self.packets.clone())
        });
        let mut resources = Resources {
            source: None,
            video,
            audio: None,
        };
        match audio {
            Ok(audio) => resources.audio = audio,
            Err(err) => {
                resources.close();
                source.close();
                return Err(err.into());
            }
        }

        if !resources.has_decoder() {
            source.close();
            return Err(ConfigurationError::NoUsableStream(name).into());
        }

        {
            let mut shared = self.lock_shared();
            shared.video = resources.video.as_ref().map(|v| v.oparams().clone());
            shared.audio = resources.audio.as_ref().map(|a| a.oparams().clone());
            shared.has_source = true;
            shared.injected = false;

            debug_log_info!(
                "Opened `{name}` (video: {:?}, audio: {:?}).",
                shared.video,
                shared.audio
            );
        }

        resources.source = Some(Box::new(source));
        control.resources = Some(resources);

        Ok(())
    }

    /// Open an FFmpeg-readable file (or device). `format` forces a specific
    /// input format (e.g. `"v4l2"`) instead of probing for one.
    #[cfg(feature = "ffmpeg")]
    pub fn open_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
        format: Option<&str>,
    ) -> Result<(), CaptureError> {
        Self::ensure_uninitialized(&self.lock_control())?;

        let format = format
            .map(|name| {
                crate::ffmpeg::find_input_format(name)
                    .ok_or_else(|| ConfigurationError::UnknownFormat(name.to_owned()))
            })
            .transpose()?;

        let container = crate::ffmpeg::Container::open(path.as_ref(), format)?;
        self.open_stream(container, &crate::ffmpeg::FfmpegDecoders)
    }

    /// Set the capture up to emit frames that arrive already encoded (see
    /// [Self::on_encoded_frame_ready]).
    pub fn open_injected(&self, source: &impl EncodedFrameSource) -> Result<(), CaptureError> {
        let mut control = self.lock_control();
        Self::ensure_uninitialized(&control)?;

        let mut passthrough = Passthrough::new(VideoCodec::new(
            source.width(),
            source.height(),
            source.max_fps(),
        ));
        passthrough.create()?;
        passthrough.open()?;

        {
            let mut shared = self.lock_shared();
            shared.video = Some(passthrough.oparams().clone());
            shared.audio = None;
            shared.has_source = false;
            shared.injected = true;

            debug_log_info!("Opened injected source ({:?}).", shared.video);
        }

        control.resources = Some(Resources {
            source: None,
            video: Some(Box::new(passthrough)),
            audio: None,
        });

        Ok(())
    }

    /// Hand the capture one encoded video frame (an ordered list of byte
    /// chunks). Only used with [Self::open_injected].
    ///
    /// Frames are only accepted while a run is in progress. Anything handed
    /// over before [Self::start] or after [Self::stop] is ignored (and not
    /// counted in [Self::dropped_frames]).
    pub fn on_encoded_frame_ready(&self, frame: EncodedFrame) {
        {
            let shared = self.lock_shared();
            if !shared.injected || shared.stopping || shared.state != CaptureState::Running {
                debug_log_trace!("Ignoring an encoded frame (capture isn't accepting any).");
                return;
            }
        }

        self.encoded_frames.queue_input(Some(frame));
    }

    /// Start a run on the worker thread. Does nothing if a run is already in
    /// progress.
    ///
    /// Fails with [ConfigurationError::NothingToCapture] if nothing was opened.
    pub fn start(&self) -> Result<(), CaptureError> {
        let mut control = self.lock_control();

        loop {
            // A worker that has set `stopping` is on its way out even if its
            // thread hasn't exited yet.
            if control.worker.is_some() && !self.lock_shared().stopping {
                debug_log_trace!("The capture is already running.");
                return Ok(());
            }

            let Some(worker) = control.worker.take_if(|w| !w.is_current_thread()) else {
                break;
            };

            // Its closing slots may still be running, and they can call back
            // into the capture.
            drop(control);
            let joined = worker.join();
            control = self.lock_control();
            self.restore_resources(&mut control, joined);
        }

        let Some(resources) = control.resources.take_if(|r| r.has_decoder()) else {
            return Err(ConfigurationError::NothingToCapture.into());
        };

        // Drop anything left over from the last run, including the stop
        // marker it was ended with.
        self.encoded_frames.clear();

        let injected = {
            let mut shared = self.lock_shared();
            shared.stopping = false;
            shared.error = None;
            shared.state = CaptureState::Running;
            shared.injected
        };

        let run = worker_loop::Run {
            shared: self.shared.clone(),
            encoded_frames: self.encoded_frames.clone(),
            packets: self.packets.clone(),
            closing: self.closing.clone(),
            injected,
        };

        match Worker::spawn(WORKER_THREAD_NAME, move || run.execute(resources)) {
            Ok(worker) => {
                control.worker = Some(worker);
                debug_log_info!(
                    "Capture started ({}).",
                    if injected { "injected" } else { "container" }
                );
                Ok(())
            }
            Err(err) => {
                let mut shared = self.lock_shared();
                shared.stopping = true;
                shared.state = CaptureState::Closed;
                shared.error = Some(err.to_string());
                debug_log_error!("Failed to start the capture: {err}");
                Err(err.into())
            }
        }
    }

    /// End the current run and wait for the worker thread to exit. Does
    /// nothing (and returns right away) if the capture isn't running.
    ///
    /// When called from inside a packet or closing slot (on the worker thread)
    /// this only asks the worker to stop, since it can't wait for itself.
    pub fn stop(&self) {
        let worker = {
            let mut control = self.lock_control();
            self.lock_shared().stopping = true;

            let Some(worker) = control.worker.take() else {
                return;
            };

            // Wakes the worker if it's waiting for an injected frame.
            self.encoded_frames.queue_input(None);

            if worker.is_current_thread() {
                control.worker = Some(worker);
                return;
            }

            worker
        };

        debug_log_info!("Stopping the capture.");

        let joined = worker.join();
        let mut control = self.lock_control();
        self.restore_resources(&mut control, joined);
    }

    /// Stop, then close the decoders and the source. The last recorded error
    /// is kept. Safe to call more than once.
    pub fn close(&self) {
        self.stop();

        let mut control = self.lock_control();
        if let Some(mut resources) = control.resources.take() {
            debug_log_info!("Closing the capture.");
            resources.close();
        }

        let mut shared = self.lock_shared();
        shared.video = None;
        shared.audio = None;
        shared.has_source = false;
        shared.injected = false;
        shared.stopping = true;
        shared.state = CaptureState::Closed;
    }

    /// Emitted packets. Attach to this to receive them (on the worker thread).
    pub fn packets(&self) -> &PacketEmitter {
        &self.packets
    }

    /// Emitted exactly once at the end of every run, on the worker thread.
    pub fn closing(&self) -> &Signal<()> {
        &self.closing
    }

    pub fn set_loop_input(&self, looping: bool) {
        self.lock_shared().looping = looping;
    }

    pub fn set_limit_framerate(&self, limit: bool) {
        self.lock_shared().limit_framerate = limit;
    }

    pub fn set_realtime_pts(&self, realtime: bool) {
        self.lock_shared().realtime_pts = realtime;
    }

    pub fn looping(&self) -> bool {
        self.lock_shared().looping
    }

    pub fn limit_framerate(&self) -> bool {
        self.lock_shared().limit_framerate
    }

    pub fn realtime_pts(&self) -> bool {
        self.lock_shared().realtime_pts
    }

    /// The resolved video output, if there is a video stream.
    pub fn video_params(&self) -> Option<VideoCodec> {
        self.lock_shared().video.clone()
    }

    /// The resolved audio output, if there is an audio stream.
    pub fn audio_params(&self) -> Option<AudioCodec> {
        self.lock_shared().audio.clone()
    }

    pub fn has_video(&self) -> bool {
        self.lock_shared().video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.lock_shared().audio.is_some()
    }

    /// Whether a [Source] is open (as opposed to nothing, or injected frames).
    pub fn has_source(&self) -> bool {
        self.lock_shared().has_source
    }

    pub fn is_injected(&self) -> bool {
        self.lock_shared().injected
    }

    /// Why the last run failed, if it did.
    pub fn error(&self) -> Option<String> {
        self.lock_shared().error.clone()
    }

    pub fn stopping(&self) -> bool {
        self.lock_shared().stopping
    }

    pub fn state(&self) -> CaptureState {
        self.lock_shared().state
    }

    /// What this capture outputs.
    pub fn encoder_format(&self) -> Format {
        let shared = self.lock_shared();
        Format {
            name: String::from(FORMAT_NAME),
            video: shared.video.clone(),
            audio: shared.audio.clone(),
        }
    }

    /// How many injected frames were dropped because the worker fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.encoded_frames.dropped_count()
    }

    fn ensure_uninitialized(control: &Control) -> Result<(), ConfigurationError> {
        if control.resources.is_some() || control.worker.is_some() {
            Err(ConfigurationError::AlreadyInitialized)
        } else {
            Ok(())
        }
    }

    /// Take back what a joined worker returned. The lock on `control` was
    /// released for the join, so something else may have been opened since.
    fn restore_resources(
        &self,
        control: &mut Control,
        joined: Result<Resources, util::worker::WorkerError>,
    ) {
        match joined {
            Ok(mut resources) if control.resources.is_some() => {
                debug_log_info!("Closing the last run's decoders (something else was opened).");
                resources.close();
            }
            Ok(resources) => control.resources = Some(resources),
            Err(err) => {
                debug_log_error!("Lost the capture's decoders: {err}");
                let mut shared = self.lock_shared();
                if shared.error.is_none() {
                    shared.error = Some(err.to_string());
                }
            }
        }
    }

    fn lock_shared(&self) -> MutexGuard<'_, CaptureShared> {
        lock_shared(&self.shared)
    }

    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MediaCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// Worker panics are caught and recorded, so a poisoned lock still holds
/// consistent state.
fn lock_shared(shared: &Mutex<CaptureShared>) -> MutexGuard<'_, CaptureShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build, create, and open a decoder for the first stream of `kind` that
/// `build` can handle.
fn open_first_decoder<P: 'static>(
    streams: &[StreamInfo],
    kind: MediaKind,
    mut build: impl FnMut(&StreamInfo) -> Result<Option<Box<dyn Decoder<Params = P>>>, DecodeError>,
) -> Result<Option<Box<dyn Decoder<Params = P>>>, DecodeError> {
    for stream in streams.iter().filter(|s| s.kind == kind) {
        let Some(mut decoder) = build(stream)? else {
            debug_log_trace!("No decoder for {kind} stream {}.", stream.index);
            continue;
        };

        if let Err(err) = decoder.create().and_then(|()| decoder.open()) {
            decoder.close();
            return Err(err);
        }

        return Ok(Some(decoder));
    }

    Ok(None)
}

#[cfg(test)]
mod tests;
