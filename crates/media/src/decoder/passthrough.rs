//! The [Passthrough] adapter, used when frames arrive already encoded.

use super::{DecodeError, Decoder};
use crate::codec::VideoCodec;
use crate::packet::CodedUnit;

/// A video adapter that never produces anything.
///
/// Injected frames are emitted by the capture itself, so all this adapter does
/// is hold on to the stream description.
#[derive(Debug, Clone)]
pub struct Passthrough {
    params: VideoCodec,
    open: bool,
}

impl Passthrough {
    pub fn new(params: VideoCodec) -> Self {
        Self {
            params,
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl Decoder for Passthrough {
    type Params = VideoCodec;

    fn stream_index(&self) -> Option<usize> {
        None
    }

    fn iparams(&self) -> &VideoCodec {
        &self.params
    }

    fn oparams(&self) -> &VideoCodec {
        &self.params
    }

    fn pts(&self) -> i64 {
        0
    }

    fn create(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn open(&mut self) -> Result<(), DecodeError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn decode(&mut self, _unit: &CodedUnit) -> Result<bool, DecodeError> {
        Ok(false)
    }

    fn flush(&mut self) -> Result<bool, DecodeError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{MICROS, MediaKind};

    #[test]
    fn never_produces_output() {
        let mut adapter = Passthrough::new(VideoCodec::new(4, 4, 30.0));
        adapter.create().unwrap();
        adapter.open().unwrap();
        assert!(adapter.is_open());

        let unit = CodedUnit {
            stream_index: 0,
            kind: MediaKind::Video,
            data: vec![1, 2, 3],
            pts: Some(0),
            dts: Some(0),
            duration: 0,
            time_base: MICROS,
        };

        assert!(!adapter.decode(&unit).unwrap());
        assert!(!adapter.flush().unwrap());
        assert_eq!(adapter.oparams().pixel_fmt, "yuv420p");
        assert_eq!(adapter.stream_index(), None);

        adapter.close();
        adapter.close();
        assert!(!adapter.is_open());
    }
}
