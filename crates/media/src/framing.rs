//! The framing used for injected frames: an 8-byte header followed by the
//! frame's chunks back to back.
//!
//! ```text
//! 0        4        8
//! +--------+--------+----------------------+
//! | magic  | length | payload (length B)   |
//! +--------+--------+----------------------+
//! ```
//!
//! Both header fields are little-endian `u32`s. `length` counts payload bytes
//! only.

use thiserror::Error;

/// The first four bytes of every framed buffer.
pub const FRAME_MAGIC: u32 = 0xAABB_CCDD;

/// The size of the header in bytes.
pub const HEADER_LEN: usize = 8;

/// Indicates that a buffer couldn't be framed or unframed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    #[error("The buffer is too short to hold a header ({0} bytes).")]
    ShortBuffer(usize),
    #[error("Bad magic number {0:#010x} (expected {FRAME_MAGIC:#010x}).")]
    BadMagic(u32),
    #[error("The header says the payload is {declared} bytes but {actual} follow it.")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("A {0} byte payload is too large to frame.")]
    PayloadTooLarge(usize),
}

/// Replace the contents of `out` with the header plus every chunk, in order.
///
/// `out`'s allocation is reused, so the same buffer can be passed in for every
/// frame.
pub fn write_framed<C: AsRef<[u8]>>(chunks: &[C], out: &mut Vec<u8>) -> Result<(), FramingError> {
    let payload_len: usize = chunks.iter().map(|c| c.as_ref().len()).sum();
    let declared_len =
        u32::try_from(payload_len).map_err(|_| FramingError::PayloadTooLarge(payload_len))?;

    out.clear();
    out.reserve(HEADER_LEN + payload_len);
    out.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    out.extend_from_slice(&declared_len.to_le_bytes());

    for chunk in chunks {
        out.extend_from_slice(chunk.as_ref());
    }

    Ok(())
}

/// Check a framed buffer's header and return its payload.
pub fn read_framed(buffer: &[u8]) -> Result<&[u8], FramingError> {
    let Some((header, payload)) = buffer.split_first_chunk::<HEADER_LEN>() else {
        return Err(FramingError::ShortBuffer(buffer.len()));
    };

    let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    if magic != FRAME_MAGIC {
        return Err(FramingError::BadMagic(magic));
    }

    let declared = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if declared != payload.len() {
        return Err(FramingError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    Ok(payload)
}
