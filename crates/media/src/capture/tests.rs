use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use super::*;
use crate::framing;
use crate::packet::{CodedUnit, MICROS, Packet, PacketKind};
use crate::source::SourceError;

const TIMEOUT: Duration = Duration::from_secs(5);

const VIDEO_STREAM: usize = 0;
const AUDIO_STREAM: usize = 1;

struct FakeSource {
    streams: Vec<StreamInfo>,
    units: Vec<CodedUnit>,
    cursor: usize,
}

impl FakeSource {
    fn video(pts: &[i64], fps: f64) -> Self {
        let mut source = Self {
            streams: vec![StreamInfo {
                index: VIDEO_STREAM,
                kind: MediaKind::Video,
                time_base: MICROS,
                fps,
            }],
            units: Vec::new(),
            cursor: 0,
        };
        source.push_units(VIDEO_STREAM, MediaKind::Video, pts);
        source
    }

    fn with_audio(mut self, pts: &[i64]) -> Self {
        self.streams.push(StreamInfo {
            index: AUDIO_STREAM,
            kind: MediaKind::Audio,
            time_base: MICROS,
            fps: 0.0,
        });
        self.push_units(AUDIO_STREAM, MediaKind::Audio, pts);
        self
    }

    fn push_units(&mut self, stream_index: usize, kind: MediaKind, pts: &[i64]) {
        self.units.extend(pts.iter().enumerate().map(|(i, &pts)| CodedUnit {
            stream_index,
            kind,
            data: vec![i as u8],
            pts: Some(pts),
            dts: Some(pts),
            duration: 0,
            time_base: MICROS,
        }));
    }
}

impl Source for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_unit(&mut self) -> Result<Option<CodedUnit>, SourceError> {
        let unit = self.units.get(self.cursor).cloned();
        if unit.is_some() {
            self.cursor += 1;
        }
        Ok(unit)
    }

    fn seek_to_origin(&mut self, stream_index: usize) -> Result<(), SourceError> {
        if !self.streams.iter().any(|s| s.index == stream_index) {
            return Err(SourceError::UnknownStream(stream_index));
        }
        self.cursor = 0;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fault {
    Never,
    InvalidAt(usize),
    FatalAt(usize),
    PanicAt(usize),
}

/// Emits every unit as-is. Holds `held` extra outputs back until it's flushed.
struct FakeDecoder<P> {
    stream: StreamInfo,
    params: P,
    emitter: PacketEmitter,
    decoded: usize,
    last_pts: i64,
    fault: Fault,
    held: usize,
    still_held: usize,
}

impl<P> FakeDecoder<P> {
    fn emit(&mut self, time: i64, data: Vec<u8>) {
        let kind = match self.stream.kind {
            MediaKind::Video => PacketKind::Video {
                width: 2,
                height: 2,
                pixel_fmt: String::from("yuv420p"),
            },
            MediaKind::Audio => PacketKind::Audio {
                channels: 1,
                sample_rate: 8_000,
                sample_fmt: String::from("s16"),
                samples: data.len(),
            },
        };

        self.last_pts = time;
        self.emitter.emit(&Packet { kind, time, data });
    }
}

impl<P: Send + 'static> Decoder for FakeDecoder<P> {
    type Params = P;

    fn stream_index(&self) -> Option<usize> {
        Some(self.stream.index)
    }

    fn iparams(&self) -> &P {
        &self.params
    }

    fn oparams(&self) -> &P {
        &self.params
    }

    fn pts(&self) -> i64 {
        self.last_pts
    }

    fn create(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn open(&mut self) -> Result<(), DecodeError> {
        self.still_held = self.held;
        Ok(())
    }

    fn close(&mut self) {}

    fn decode(&mut self, unit: &CodedUnit) -> Result<bool, DecodeError> {
        let n = self.decoded;
        self.decoded += 1;

        match self.fault {
            Fault::InvalidAt(i) if i == n => {
                return Err(DecodeError::InvalidData {
                    stream_index: unit.stream_index,
                    reason: String::from("garbage"),
                });
            }
            Fault::FatalAt(i) if i == n => return Err(DecodeError::Codec(String::from("boom"))),
            Fault::PanicAt(i) if i == n => panic!("decoder exploded"),
            _ => {}
        }

        self.emit(unit.pts_micros().unwrap_or(0), unit.data.clone());
        Ok(true)
    }

    fn flush(&mut self) -> Result<bool, DecodeError> {
        if self.still_held == 0 {
            self.still_held = self.held;
            return Ok(false);
        }

        self.still_held -= 1;
        self.emit(self.last_pts, Vec::new());
        Ok(true)
    }
}

struct FakeFactory {
    video: bool,
    audio: bool,
    fault: Fault,
    held: usize,
}

impl FakeFactory {
    fn new() -> Self {
        Self {
            video: true,
            audio: true,
            fault: Fault::Never,
            held: 0,
        }
    }

    fn fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }

    fn decoder<P>(&self, stream: &StreamInfo, params: P, emitter: PacketEmitter) -> FakeDecoder<P> {
        FakeDecoder {
            stream: *stream,
            params,
            emitter,
            decoded: 0,
            last_pts: 0,
            fault: self.fault,
            held: self.held,
            still_held: 0,
        }
    }
}

impl DecoderFactory<FakeSource> for FakeFactory {
    fn video_decoder(
        &self,
        _source: &FakeSource,
        stream: &StreamInfo,
        emitter: PacketEmitter,
    ) -> Result<Option<BoxedVideoDecoder>, DecodeError> {
        if !self.video {
            return Ok(None);
        }

        let params = VideoCodec::new(2, 2, stream.fps);
        Ok(Some(Box::new(self.decoder(stream, params, emitter))))
    }

    fn audio_decoder(
        &self,
        _source: &FakeSource,
        stream: &StreamInfo,
        emitter: PacketEmitter,
    ) -> Result<Option<BoxedAudioDecoder>, DecodeError> {
        if !self.audio {
            return Ok(None);
        }

        let params = AudioCodec::new(1, 8_000, "s16");
        Ok(Some(Box::new(self.decoder(stream, params, emitter))))
    }
}

fn collect_packets(capture: &MediaCapture) -> Receiver<Packet> {
    let (tx, rx) = mpsc::channel();
    capture.packets().attach(move |packet| {
        _ = tx.send(packet.clone());
    });
    rx
}

fn watch_closing(capture: &MediaCapture) -> (Arc<AtomicUsize>, Receiver<()>) {
    let count = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let slot_count = count.clone();
    capture.closing().attach(move |_| {
        slot_count.fetch_add(1, Ordering::SeqCst);
        _ = tx.send(());
    });

    (count, rx)
}

fn wait_for_closing(closed: &Receiver<()>) {
    closed
        .recv_timeout(TIMEOUT)
        .expect("The capture should have closed.");
}

fn take(packets: &Receiver<Packet>, n: usize) -> Vec<Packet> {
    (0..n)
        .map(|_| {
            packets
                .recv_timeout(TIMEOUT)
                .expect("A packet should have been emitted.")
        })
        .collect()
}

fn times(packets: &[Packet]) -> Vec<i64> {
    packets.iter().map(|p| p.time).collect()
}

#[test]
fn starting_with_nothing_open_fails() {
    let capture = MediaCapture::new();

    assert!(matches!(
        capture.start(),
        Err(CaptureError::Configuration(
            ConfigurationError::NothingToCapture
        ))
    ));
    assert_eq!(capture.state(), CaptureState::Idle);
}

#[test]
fn stop_and_close_without_starting_return_right_away() {
    let capture = MediaCapture::new();
    let start = Instant::now();

    capture.stop();
    capture.stop();
    capture.close();
    capture.close();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(capture.error(), None);
}

#[test]
fn plays_to_the_end_then_closes() {
    let capture = MediaCapture::new();
    capture
        .open_stream(FakeSource::video(&[0, 10, 20], 0.0), &FakeFactory::new())
        .unwrap();
    assert!(capture.has_source());
    assert!(capture.has_video());
    assert!(!capture.has_audio());

    let packets = collect_packets(&capture);
    let (closings, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);

    assert_eq!(times(&packets.try_iter().collect::<Vec<_>>()), [0, 10, 20]);
    assert_eq!(closings.load(Ordering::SeqCst), 1);
    assert_eq!(capture.state(), CaptureState::Closed);
    assert!(capture.stopping());
    assert_eq!(capture.error(), None);
}

#[test]
fn held_back_output_is_flushed_at_the_end() {
    let capture = MediaCapture::new();
    let mut factory = FakeFactory::new();
    factory.held = 2;
    capture
        .open_stream(FakeSource::video(&[0, 10, 20], 0.0), &factory)
        .unwrap();

    let packets = collect_packets(&capture);
    let (_, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);

    assert_eq!(
        times(&packets.try_iter().collect::<Vec<_>>()),
        [0, 10, 20, 20, 20]
    );
}

#[test]
fn a_finished_capture_can_run_again() {
    let capture = MediaCapture::new();
    capture
        .open_stream(FakeSource::video(&[0, 10], 0.0), &FakeFactory::new())
        .unwrap();

    let packets = collect_packets(&capture);
    let (closings, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);
    capture.start().unwrap();
    wait_for_closing(&closed);

    // The source isn't rewound between runs unless it's looping.
    assert_eq!(times(&packets.try_iter().collect::<Vec<_>>()), [0, 10]);
    assert_eq!(closings.load(Ordering::SeqCst), 2);
}

#[test]
fn looping_keeps_timestamps_increasing() {
    let capture = MediaCapture::with_options(&CaptureOptions {
        looping: true,
        ..Default::default()
    });
    capture
        .open_stream(FakeSource::video(&[0, 10, 20], 0.0), &FakeFactory::new())
        .unwrap();

    let packets = collect_packets(&capture);
    capture.start().unwrap();
    let received = take(&packets, 9);
    capture.stop();

    assert_eq!(times(&received), [0, 10, 20, 30, 40, 50, 60, 70, 80]);
    assert_eq!(capture.error(), None);
}

#[test]
fn audio_and_video_loop_independently() {
    let capture = MediaCapture::new();
    capture.set_loop_input(true);
    capture
        .open_stream(
            FakeSource::video(&[0, 10, 20], 0.0).with_audio(&[0, 4]),
            &FakeFactory::new(),
        )
        .unwrap();
    assert!(capture.has_audio());

    let packets = collect_packets(&capture);
    capture.start().unwrap();
    let received = take(&packets, 10);
    capture.stop();

    let video: Vec<_> = received.iter().filter(|p| p.is_video()).map(|p| p.time).collect();
    let audio: Vec<_> = received.iter().filter(|p| p.is_audio()).map(|p| p.time).collect();

    assert_eq!(video, [0, 10, 20, 30, 40, 50]);
    assert_eq!(audio, [0, 4, 8, 12]);
}

#[test]
fn realtime_replaces_video_timestamps() {
    let capture = MediaCapture::new();
    capture.set_realtime_pts(true);
    capture
        .open_stream(
            FakeSource::video(&[5_000_000, 0, 7, 3], 0.0),
            &FakeFactory::new(),
        )
        .unwrap();

    let packets = collect_packets(&capture);
    let (_, closed) = watch_closing(&capture);

    let started = Instant::now();
    capture.start().unwrap();
    wait_for_closing(&closed);
    let elapsed = started.elapsed().as_micros() as i64;

    let received = times(&packets.try_iter().collect::<Vec<_>>());
    assert_eq!(received.len(), 4);
    assert!(received.windows(2).all(|w| w[0] <= w[1]));
    assert!(received.iter().all(|&t| (0..=elapsed).contains(&t)));
}

#[test]
fn rate_limiting_spaces_out_video() {
    let capture = MediaCapture::new();
    capture.set_limit_framerate(true);
    capture
        .open_stream(FakeSource::video(&[0, 1, 2, 3, 4, 5], 10.0), &FakeFactory::new())
        .unwrap();

    let (tx, arrivals) = mpsc::channel();
    capture.packets().attach(move |_| {
        _ = tx.send(Instant::now());
    });
    let (_, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);

    let arrivals: Vec<Instant> = arrivals.try_iter().collect();
    assert_eq!(arrivals.len(), 6);

    // Sleeps can run long but never short. Leave some slack for clock
    // granularity.
    for pair in arrivals.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(90));
    }
    assert!(arrivals[5] - arrivals[0] >= Duration::from_millis(450));
}

#[test]
fn corrupt_units_are_skipped() {
    let capture = MediaCapture::new();
    capture
        .open_stream(
            FakeSource::video(&[0, 10, 20], 0.0),
            &FakeFactory::new().fault(Fault::InvalidAt(1)),
        )
        .unwrap();

    let packets = collect_packets(&capture);
    let (_, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);

    assert_eq!(times(&packets.try_iter().collect::<Vec<_>>()), [0, 20]);
    assert_eq!(capture.error(), None);
}

#[test]
fn a_decoder_failure_ends_the_run() {
    let capture = MediaCapture::new();
    capture
        .open_stream(
            FakeSource::video(&[0, 10, 20], 0.0),
            &FakeFactory::new().fault(Fault::FatalAt(1)),
        )
        .unwrap();

    let packets = collect_packets(&capture);
    let (closings, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);

    assert_eq!(times(&packets.try_iter().collect::<Vec<_>>()), [0]);
    assert_eq!(capture.error().as_deref(), Some("The codec failed: boom"));
    assert_eq!(closings.load(Ordering::SeqCst), 1);
    assert_eq!(capture.state(), CaptureState::Closed);
}

#[test]
fn a_decoder_panic_is_recorded_as_unknown() {
    let capture = MediaCapture::new();
    capture
        .open_stream(
            FakeSource::video(&[0, 10], 0.0),
            &FakeFactory::new().fault(Fault::PanicAt(0)),
        )
        .unwrap();

    let (closings, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);

    assert_eq!(capture.error().as_deref(), Some(UNKNOWN_ERROR));
    assert_eq!(closings.load(Ordering::SeqCst), 1);

    // The decoders made it back, so it can be started again.
    capture.start().unwrap();
    wait_for_closing(&closed);
}

#[test]
fn opening_twice_is_rejected() {
    let capture = MediaCapture::new();
    capture
        .open_stream(FakeSource::video(&[0], 0.0), &FakeFactory::new())
        .unwrap();

    assert!(matches!(
        capture.open_stream(FakeSource::video(&[0], 0.0), &FakeFactory::new()),
        Err(CaptureError::Configuration(
            ConfigurationError::AlreadyInitialized
        ))
    ));
    assert!(matches!(
        capture.open_injected(&VideoCodec::new(2, 2, 30.0)),
        Err(CaptureError::Configuration(
            ConfigurationError::AlreadyInitialized
        ))
    ));
}

#[test]
fn a_source_without_decodable_streams_is_rejected() {
    let capture = MediaCapture::new();
    let factory = FakeFactory {
        video: false,
        audio: false,
        ..FakeFactory::new()
    };

    match capture.open_stream(FakeSource::video(&[0], 0.0).with_audio(&[0]), &factory) {
        Err(CaptureError::Configuration(ConfigurationError::NoUsableStream(name))) => {
            assert_eq!(name, "fake");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert!(!capture.has_source());
    assert!(capture.start().is_err());
}

#[test]
fn close_keeps_the_error_and_releases_everything() {
    let capture = MediaCapture::new();
    capture
        .open_stream(
            FakeSource::video(&[0, 10], 0.0),
            &FakeFactory::new().fault(Fault::FatalAt(0)),
        )
        .unwrap();

    let (_, closed) = watch_closing(&capture);
    capture.start().unwrap();
    wait_for_closing(&closed);

    let error = capture.error();
    assert!(error.is_some());

    capture.close();
    assert_eq!(capture.error(), error);
    assert!(!capture.has_source());
    assert!(!capture.has_video());
    assert_eq!(capture.video_params(), None);
    assert_eq!(capture.state(), CaptureState::Closed);

    capture.close();
    assert_eq!(capture.error(), error);

    // Closed captures can be opened again.
    capture.open_injected(&VideoCodec::new(2, 2, 30.0)).unwrap();
}

#[test]
fn injected_frames_are_framed_and_emitted() {
    let capture = MediaCapture::new();
    capture.open_injected(&VideoCodec::new(4, 2, 30.0)).unwrap();
    assert!(capture.is_injected());
    assert!(!capture.has_source());

    let packets = collect_packets(&capture);
    let (closings, closed) = watch_closing(&capture);

    capture.start().unwrap();
    capture.on_encoded_frame_ready(vec![vec![0xAA, 0xBB], vec![0xCC]]);

    let packet = take(&packets, 1).remove(0);
    assert_eq!(
        packet.kind,
        PacketKind::Framed {
            width: 4,
            height: 2
        }
    );
    assert_eq!(framing::read_framed(&packet.data), Ok(&[0xAA, 0xBB, 0xCC][..]));
    assert!(packet.time >= 0);

    capture.stop();
    wait_for_closing(&closed);

    assert_eq!(closings.load(Ordering::SeqCst), 1);
    assert_eq!(capture.state(), CaptureState::Closed);
    assert_eq!(capture.error(), None);
}

#[test]
fn stop_wakes_a_waiting_injected_worker() {
    let capture = MediaCapture::new();
    capture.open_injected(&VideoCodec::new(2, 2, 30.0)).unwrap();
    capture.start().unwrap();
    thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    capture.stop();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(capture.state(), CaptureState::Closed);
}

#[test]
fn injected_capture_restarts_cleanly() {
    let capture = MediaCapture::new();
    capture.open_injected(&VideoCodec::new(2, 2, 30.0)).unwrap();
    let packets = collect_packets(&capture);

    capture.start().unwrap();
    capture.stop();

    // Dropped, nothing is running.
    capture.on_encoded_frame_ready(vec![vec![1]]);

    capture.start().unwrap();
    capture.on_encoded_frame_ready(vec![vec![2]]);

    let packet = take(&packets, 1).remove(0);
    assert_eq!(framing::read_framed(&packet.data), Ok(&[2_u8][..]));

    capture.stop();
}

#[test]
fn stopping_from_the_closing_slot_does_not_deadlock() {
    let capture = Arc::new(MediaCapture::new());
    capture
        .open_stream(FakeSource::video(&[0, 10], 0.0), &FakeFactory::new())
        .unwrap();

    let weak = Arc::downgrade(&capture);
    capture.closing().attach(move |_| {
        if let Some(capture) = weak.upgrade() {
            capture.stop();
        }
    });
    let (_, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);
    capture.close();

    assert_eq!(capture.state(), CaptureState::Closed);
}

/// Attach a closing slot that reports when it's entered, waits a bit (so the
/// run is still ending), then stops the capture from the worker thread.
fn stop_slowly_on_closing(capture: &Arc<MediaCapture>) -> Receiver<()> {
    let (tx, entered) = mpsc::channel();
    let weak = Arc::downgrade(capture);

    capture.closing().attach(move |_| {
        _ = tx.send(());
        thread::sleep(Duration::from_millis(100));
        if let Some(capture) = weak.upgrade() {
            capture.stop();
        }
    });

    entered
}

/// Run `f` on another thread and wait (bounded) for it to return.
fn finishes_in_time<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        _ = tx.send(f());
    });

    rx.recv_timeout(TIMEOUT)
        .expect("The call should have returned while the closing slot was running.")
}

#[test]
fn restarting_while_a_closing_slot_stops_does_not_deadlock() {
    let capture = Arc::new(MediaCapture::new());
    capture
        .open_stream(FakeSource::video(&[0, 10], 0.0), &FakeFactory::new())
        .unwrap();

    let entered = stop_slowly_on_closing(&capture);

    capture.start().unwrap();
    entered.recv_timeout(TIMEOUT).unwrap();

    let restarter = capture.clone();
    let restarted = finishes_in_time(move || restarter.start().map_err(|e| e.to_string()));
    assert_eq!(restarted, Ok(()));

    // The second run starts at the end of the source and closes right away.
    entered.recv_timeout(TIMEOUT).unwrap();

    let closer = capture.clone();
    finishes_in_time(move || closer.close());

    assert_eq!(capture.state(), CaptureState::Closed);
    assert_eq!(capture.error(), None);
}

#[test]
fn closing_while_a_closing_slot_stops_does_not_deadlock() {
    let capture = Arc::new(MediaCapture::new());
    capture
        .open_stream(FakeSource::video(&[0, 10], 0.0), &FakeFactory::new())
        .unwrap();

    let entered = stop_slowly_on_closing(&capture);

    capture.start().unwrap();
    entered.recv_timeout(TIMEOUT).unwrap();

    let closer = capture.clone();
    finishes_in_time(move || closer.close());

    assert!(!capture.has_source());
    assert_eq!(capture.state(), CaptureState::Closed);
    assert!(capture.start().is_err());
}

#[test]
fn a_looping_source_with_nothing_in_it_ends_the_run() {
    let capture = MediaCapture::new();
    capture.set_loop_input(true);
    capture
        .open_stream(FakeSource::video(&[], 0.0), &FakeFactory::new())
        .unwrap();

    let (closings, closed) = watch_closing(&capture);

    capture.start().unwrap();
    wait_for_closing(&closed);

    assert_eq!(
        capture.error().as_deref(),
        Some("`fake` had nothing to read, so it can't be looped.")
    );
    assert_eq!(closings.load(Ordering::SeqCst), 1);
    assert_eq!(capture.state(), CaptureState::Closed);
}

#[test]
fn injected_frames_before_start_are_ignored() {
    let capture = MediaCapture::new();
    capture.open_injected(&VideoCodec::new(2, 2, 30.0)).unwrap();
    let packets = collect_packets(&capture);

    capture.on_encoded_frame_ready(vec![vec![1]]);
    assert_eq!(capture.state(), CaptureState::Idle);
    assert!(capture.encoded_frames.is_empty());

    capture.start().unwrap();
    capture.on_encoded_frame_ready(vec![vec![2]]);

    let packet = take(&packets, 1).remove(0);
    assert_eq!(framing::read_framed(&packet.data), Ok(&[2_u8][..]));
    assert_eq!(capture.dropped_frames(), 0);

    capture.stop();
}

#[test]
fn encoder_format_describes_the_output() {
    let capture = MediaCapture::new();
    capture.open_injected(&VideoCodec::new(8, 6, 25.0)).unwrap();

    let format = capture.encoder_format();
    assert_eq!(format.name, "Capture");
    assert_eq!(format.audio, None);

    let video = format.video.unwrap();
    assert_eq!((video.width, video.height), (8, 6));
    assert_eq!(video.pixel_fmt, "yuv420p");
    assert_eq!(video.fps, 25.0);
}

#[test]
fn options_are_applied() {
    let capture = MediaCapture::with_options(&CaptureOptions {
        looping: true,
        limit_framerate: true,
        realtime_pts: true,
        ..Default::default()
    });

    assert!(capture.looping());
    assert!(capture.limit_framerate());
    assert!(capture.realtime_pts());
}
