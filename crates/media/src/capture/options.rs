//! Serializable capture settings.

use serde::{Deserialize, Serialize};

use util::channels::input_throttle::DEFAULT_MAX_INPUTS_TO_BUFFER;

/// Everything about a capture that can be configured up front. Missing fields
/// take their default when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Rewind the source when it runs out instead of stopping.
    pub looping: bool,
    /// Don't emit video faster than the stream's frame rate.
    pub limit_framerate: bool,
    /// Replace video timestamps with wall-clock time since the run started.
    pub realtime_pts: bool,
    /// How many injected frames can wait before the oldest are dropped.
    pub max_inputs_to_buffer: usize,
    /// Skip to the newest injected frame when the worker falls behind.
    pub drop_inputs: bool,
    /// Log dropped injected frames as warnings (otherwise as trace messages).
    pub warn_when_dropping: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            looping: false,
            limit_framerate: false,
            realtime_pts: false,
            max_inputs_to_buffer: DEFAULT_MAX_INPUTS_TO_BUFFER,
            drop_inputs: true,
            warn_when_dropping: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_their_defaults() {
        let options: CaptureOptions =
            serde_json::from_str(r#"{ "looping": true, "max_inputs_to_buffer": 4 }"#).unwrap();

        assert_eq!(
            options,
            CaptureOptions {
                looping: true,
                max_inputs_to_buffer: 4,
                ..Default::default()
            }
        );
        assert!(options.drop_inputs);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let options: CaptureOptions = serde_json::from_str(r#"{ "colour": "blue" }"#).unwrap();
        assert_eq!(options, CaptureOptions::default());
    }
}
