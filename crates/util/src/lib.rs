//! This library contains general purpose tools shared by the rest of the
//! workspace.

pub mod channels;
pub mod debug_log;
pub mod signal;
pub mod stop_signals;
pub mod worker;
