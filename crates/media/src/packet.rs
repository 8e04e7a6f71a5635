//! The units of data that move through a capture: [CodedUnit]s going into a
//! decoder, [Packet]s coming out of the pipeline, and the [Rational] time bases
//! their timestamps are measured in.

use std::fmt;

/// Whether a stream carries pictures or sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        })
    }
}

/// A fraction, used as the unit of a timestamp (a timestamp of `n` in time
/// base `1/90000` is `n / 90000` seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

/// Microseconds. Every [Packet] timestamp is in this time base.
pub const MICROS: Rational = Rational::new(1, 1_000_000);

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Whether this can be used as a time base (non-zero numerator and
    /// denominator).
    pub fn is_valid(self) -> bool {
        self.num != 0 && self.den != 0
    }

    /// Convert `value` from this time base to `to`, rounding to the nearest
    /// integer (halfway cases away from zero). Invalid time bases give `0`.
    pub fn rescale(self, value: i64, to: Rational) -> i64 {
        if !self.is_valid() || !to.is_valid() {
            return 0;
        }

        // value * (num / den) / (to.num / to.den)
        let numerator = value as i128 * self.num as i128 * to.den as i128;
        let denominator = self.den as i128 * to.num as i128;

        let (numerator, denominator) = if denominator < 0 {
            (-numerator, -denominator)
        } else {
            (numerator, denominator)
        };

        let half = denominator / 2;
        let rounded = if numerator >= 0 {
            (numerator + half) / denominator
        } else {
            (numerator - half) / denominator
        };

        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// One compressed, timestamped chunk of a single stream, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CodedUnit {
    /// Index of the stream this belongs to (see
    /// [StreamInfo::index](crate::source::StreamInfo::index)).
    pub stream_index: usize,
    pub kind: MediaKind,
    pub data: Vec<u8>,
    /// Presentation timestamp in [Self::time_base] units.
    pub pts: Option<i64>,
    /// Decoding timestamp in [Self::time_base] units.
    pub dts: Option<i64>,
    /// How long this unit lasts in [Self::time_base] units (`0` if unknown).
    pub duration: i64,
    pub time_base: Rational,
}

impl CodedUnit {
    /// The presentation timestamp converted to microseconds.
    pub fn pts_micros(&self) -> Option<i64> {
        self.pts.map(|pts| self.time_base.rescale(pts, MICROS))
    }
}

/// What a [Packet]'s bytes hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketKind {
    /// A decoded picture, planes packed back to back without padding.
    Video {
        width: u32,
        height: u32,
        pixel_fmt: String,
    },
    /// A block of decoded samples. Planar formats have their planes packed
    /// back to back.
    Audio {
        channels: u16,
        sample_rate: u32,
        sample_fmt: String,
        samples: usize,
    },
    /// An externally encoded video frame wrapped in the
    /// [framing](crate::framing) header.
    Framed { width: u32, height: u32 },
}

/// A timestamped payload ready for whoever is listening to a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    /// Presentation time in microseconds.
    pub time: i64,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn is_video(&self) -> bool {
        matches!(
            self.kind,
            PacketKind::Video { .. } | PacketKind::Framed { .. }
        )
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, PacketKind::Audio { .. })
    }
}

/// One externally produced coded video frame, as an ordered list of byte
/// chunks.
pub type EncodedFrame = Vec<Vec<u8>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_between_time_bases() {
        let ninety_khz = Rational::new(1, 90_000);
        assert_eq!(ninety_khz.rescale(90_000, MICROS), 1_000_000);
        assert_eq!(ninety_khz.rescale(3_003, MICROS), 33_367);
        assert_eq!(MICROS.rescale(1_000_000, ninety_khz), 90_000);
    }

    #[test]
    fn rescale_rounds_half_away_from_zero() {
        let thirds = Rational::new(1, 3);
        // 1/3 s = 333333.33 µs, 2/3 s = 666666.67 µs
        assert_eq!(thirds.rescale(1, MICROS), 333_333);
        assert_eq!(thirds.rescale(2, MICROS), 666_667);
        assert_eq!(thirds.rescale(-2, MICROS), -666_667);

        let halves = Rational::new(1, 2);
        assert_eq!(halves.rescale(1, Rational::new(1, 1)), 1);
        assert_eq!(halves.rescale(-1, Rational::new(1, 1)), -1);
    }

    #[test]
    fn invalid_time_base_rescales_to_zero() {
        assert_eq!(Rational::new(0, 1).rescale(100, MICROS), 0);
        assert_eq!(MICROS.rescale(100, Rational::new(1, 0)), 0);
    }

    #[test]
    fn pts_in_micros() {
        let unit = CodedUnit {
            stream_index: 0,
            kind: MediaKind::Video,
            data: Vec::new(),
            pts: Some(25),
            dts: None,
            duration: 1,
            time_base: Rational::new(1, 25),
        };

        assert_eq!(unit.pts_micros(), Some(1_000_000));
    }
}
