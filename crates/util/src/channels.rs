//! This module contains the submodules [drop_queue] and [input_throttle], the
//! blocking queues used to hand work to a dedicated consumer thread.

pub mod drop_queue;
pub mod input_throttle;

use std::time::Duration;

use thiserror::Error;

/// An alias for a [Result] that has [ChannelError] as the error type.
pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelError {
    #[error("The operation timed out after {}+ milliseconds.", timeout.as_millis())]
    Timeout { timeout: Duration },
}

const THREAD_PANIC_MSG: &str = "Another thread panicked while holding a resource this one needs.";
