//! Contains [Args], which are parsed command-line flags.

use std::fs;
use std::io;
use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use media::capture::CaptureOptions;

/// Parsed command line arguments.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(about = "Capture a media file or device and report what it emits.")]
pub struct Args {
    /// The file (or device) to read.
    pub input: PathBuf,

    /// Force an FFmpeg input format (e.g. `v4l2`) instead of probing for one.
    #[arg(long)]
    pub format: Option<String>,

    /// Start over when the input runs out.
    #[arg(long = "loop")]
    pub looping: bool,

    /// Don't emit video faster than its frame rate.
    #[arg(long)]
    pub limit_framerate: bool,

    /// Timestamp video with the time since the capture started.
    #[arg(long)]
    pub realtime: bool,

    /// A JSON file with capture options. Flags given on the command line take
    /// precedence.
    #[arg(long, value_name = "JSON")]
    pub options: Option<PathBuf>,

    /// Log every unit that's read and decoded.
    #[arg(long, short)]
    pub verbose: bool,

    /// Stop after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub duration: Option<f64>,
}

impl Args {
    /// The options file (if there is one) with the command line flags
    /// applied on top.
    pub fn capture_options(&self) -> Result<CaptureOptions, OptionsError> {
        let mut options = match &self.options {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => CaptureOptions::default(),
        };

        options.looping |= self.looping;
        options.limit_framerate |= self.limit_framerate;
        options.realtime_pts |= self.realtime;

        Ok(options)
    }
}

impl Default for Args {
    fn default() -> Self {
        Self::parse()
    }
}

/// Indicates that the options file couldn't be used.
#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("Failed to read the options file: {0}")]
    Read(#[from] io::Error),
    #[error("Failed to parse the options file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;

    use super::*;

    #[test]
    fn flags_are_parsed() {
        let args = Args::try_parse_from([
            "capture",
            "clip.mp4",
            "--loop",
            "--format",
            "mp4",
            "--duration",
            "2.5",
        ])
        .unwrap();

        assert_eq!(args.input, PathBuf::from("clip.mp4"));
        assert_eq!(args.format.as_deref(), Some("mp4"));
        assert!(args.looping);
        assert!(!args.realtime);
        assert_eq!(args.duration, Some(2.5));
    }

    #[test]
    fn input_is_required() {
        assert!(Args::try_parse_from(["capture"]).is_err());
    }

    #[test]
    fn flags_override_the_options_file() {
        let path = std::env::temp_dir().join(format!("capture-options-{}.json", std::process::id()));
        fs::write(&path, r#"{ "limit_framerate": true, "max_inputs_to_buffer": 5 }"#).unwrap();

        let args = Args::try_parse_from([
            OsStr::new("capture"),
            OsStr::new("clip.mp4"),
            OsStr::new("--realtime"),
            OsStr::new("--options"),
            path.as_os_str(),
        ])
        .unwrap();
        let options = args.capture_options();
        fs::remove_file(&path).unwrap();

        let options = options.unwrap();
        assert!(options.limit_framerate);
        assert!(options.realtime_pts);
        assert!(!options.looping);
        assert_eq!(options.max_inputs_to_buffer, 5);
    }

    #[test]
    fn a_missing_options_file_is_an_error() {
        let args = Args::try_parse_from([
            "capture",
            "clip.mp4",
            "--options",
            "/definitely/not/here.json",
        ])
        .unwrap();

        assert!(matches!(args.capture_options(), Err(OptionsError::Read(_))));
    }
}
