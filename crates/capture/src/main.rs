mod args;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use media::capture::MediaCapture;
use util::debug_log::{self, Level};
use util::{debug_log_error, debug_log_info, stop_signals};

use args::Args;

const GENERIC_ERROR_MSG: &str = "Something went wrong.";

/// How often the main thread checks for stop signals and the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Running totals of what the capture emitted.
#[derive(Debug, Default)]
struct Totals {
    video: AtomicU64,
    audio: AtomicU64,
    bytes: AtomicU64,
}

fn main() -> ExitCode {
    let args = Args::default();

    if args.verbose {
        debug_log::set_max_level(Level::Trace);
    }

    let options = match args.capture_options() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = stop_signals::enable() {
        debug_log_error!("Failed to enable stop signal polling: {e}");
        eprintln!("{GENERIC_ERROR_MSG}");
        return ExitCode::FAILURE;
    }

    let capture = MediaCapture::with_options(&options);

    if let Err(e) = capture.open_file(&args.input, args.format.as_deref()) {
        eprintln!("Failed to open `{}`: {e}", args.input.display());
        return ExitCode::FAILURE;
    }

    match serde_json::to_string_pretty(&capture.encoder_format()) {
        Ok(format) => println!("{format}"),
        Err(e) => debug_log_error!("Failed to serialize the capture's format: {e}"),
    }

    let totals = Arc::new(Totals::default());
    let packet_totals = totals.clone();
    capture.packets().attach(move |packet| {
        let count = if packet.is_audio() {
            &packet_totals.audio
        } else {
            &packet_totals.video
        };
        count.fetch_add(1, Ordering::Relaxed);
        packet_totals
            .bytes
            .fetch_add(packet.data.len() as u64, Ordering::Relaxed);
    });

    let (closed_tx, closed_rx) = mpsc::channel();
    capture.closing().attach(move |_| {
        _ = closed_tx.send(());
    });

    if let Err(e) = capture.start() {
        eprintln!("Failed to start the capture: {e}");
        return ExitCode::FAILURE;
    }

    let deadline = args
        .duration
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(|duration| Instant::now() + duration);

    loop {
        match closed_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if stop_signals::received() {
            debug_log_info!("Stop signal received.");
            break;
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            debug_log_info!("Reached the requested duration.");
            break;
        }
    }

    capture.close();

    println!(
        "{} video packets, {} audio packets, {} bytes ({} frames dropped)",
        totals.video.load(Ordering::Relaxed),
        totals.audio.load(Ordering::Relaxed),
        totals.bytes.load(Ordering::Relaxed),
        capture.dropped_frames(),
    );

    if let Some(error) = capture.error() {
        eprintln!("The capture failed: {error}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
