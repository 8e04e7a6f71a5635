//! Media capture and pacing.
//!
//! A [MediaCapture](capture::MediaCapture) reads coded units from a
//! [Source](source::Source) (or takes already encoded frames from whoever
//! produces them), runs them through [Decoder](decoder::Decoder)s on a worker
//! thread, and emits the resulting [Packet](packet::Packet)s at a controlled
//! pace.

pub mod capture;
pub mod codec;
pub mod decoder;
pub mod framing;
pub mod packet;
pub mod source;
pub mod timing;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
