//! Descriptions of video and audio streams (dimensions, formats, rates).
//!
//! Once a capture has resolved a descriptor it never changes for the lifetime
//! of that capture.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The pixel format used when nothing more specific is known.
pub const DEFAULT_PIXEL_FMT: &str = "yuv420p";

/// Parameters of a video stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCodec {
    pub encoder: String,
    pub width: u32,
    pub height: u32,
    pub pixel_fmt: String,
    /// Frames per second. `0.0` (or less) means unknown.
    pub fps: f64,
}

impl VideoCodec {
    /// A `yuv420p` stream with the given size and rate.
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            encoder: String::new(),
            width,
            height,
            pixel_fmt: String::from(DEFAULT_PIXEL_FMT),
            fps,
        }
    }

    /// The time between two frames, or [None] if [Self::fps] isn't a normal
    /// positive number.
    pub fn frame_interval(&self) -> Option<Duration> {
        fps_to_interval(self.fps)
    }

    /// The size of one uncompressed `yuv420p` picture at this resolution (a
    /// full-size luma plane plus two quarter-size chroma planes).
    pub fn yuv420p_frame_size(&self) -> usize {
        let area = self.width as usize * self.height as usize;
        area * 3 / 2
    }
}

/// Parameters of an audio stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioCodec {
    pub encoder: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_fmt: String,
}

impl AudioCodec {
    pub fn new(channels: u16, sample_rate: u32, sample_fmt: impl Into<String>) -> Self {
        Self {
            encoder: String::new(),
            channels,
            sample_rate,
            sample_fmt: sample_fmt.into(),
        }
    }
}

/// The output a capture produces, by name plus whichever streams it has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub name: String,
    pub video: Option<VideoCodec>,
    pub audio: Option<AudioCodec>,
}

/// The time between frames at `fps` frames per second. [None] is returned if
/// `fps` is not normal and positive non-zero.
pub fn fps_to_interval(fps: f64) -> Option<Duration> {
    if !fps.is_normal() || fps <= 0.0 {
        None
    } else {
        Some(Duration::from_secs(1).div_f64(fps))
    }
}
