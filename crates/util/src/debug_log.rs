//! Contains tools for leveled logging to stdout/stderr.
//!
//! Every line says where it was logged from and when. Messages below the
//! current [max level](set_max_level) are skipped before they're formatted.
//! The default is [Level::Info] in debug builds and [Level::Warning] otherwise.

use std::fmt;
use std::io::{IsTerminal, Write};
use std::panic::Location;
use std::sync::atomic::{AtomicU8, Ordering};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Log per-item detail (e.g. every dropped input) to stdout.
#[macro_export]
macro_rules! debug_log_trace {
    ($($arg:tt)*) => {{
        if $crate::debug_log::enabled($crate::debug_log::Level::Trace) {
            $crate::debug_log::log($crate::debug_log::Level::Trace, ::std::format_args!($($arg)*));
        }
    }};
}

/// Log some info to stdout.
#[macro_export]
macro_rules! debug_log_info {
    ($($arg:tt)*) => {{
        if $crate::debug_log::enabled($crate::debug_log::Level::Info) {
            $crate::debug_log::log($crate::debug_log::Level::Info, ::std::format_args!($($arg)*));
        }
    }};
}

/// Log a warning to stderr.
#[macro_export]
macro_rules! debug_log_warning {
    ($($arg:tt)*) => {{
        if $crate::debug_log::enabled($crate::debug_log::Level::Warning) {
            $crate::debug_log::log($crate::debug_log::Level::Warning, ::std::format_args!($($arg)*));
        }
    }};
}

/// Log an error to stderr.
#[macro_export]
macro_rules! debug_log_error {
    ($($arg:tt)*) => {{
        if $crate::debug_log::enabled($crate::debug_log::Level::Error) {
            $crate::debug_log::log($crate::debug_log::Level::Error, ::std::format_args!($($arg)*));
        }
    }};
}

/// How important a log message is. Ordered from least to most important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Level {
    Trace = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    /// Not a message level. Setting this as the max level silences everything.
    Off = 4,
}

impl Level {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Trace,
            1 => Level::Info,
            2 => Level::Warning,
            3 => Level::Error,
            _ => Level::Off,
        }
    }

    fn color(self) -> &'static str {
        match self {
            Level::Trace => "\x1b[36m",
            Level::Info => "\x1b[35m",
            Level::Warning => "\x1b[33m",
            Level::Error | Level::Off => "\x1b[31m",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Trace => "TRACE",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Off => "OFF",
        })
    }
}

/// Whether a message at `level` would currently be printed.
#[inline(always)]
pub fn enabled(level: Level) -> bool {
    level != Level::Off && level >= max_level()
}

/// The least important level that still gets printed.
pub fn max_level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

/// Only print messages at `level` or above.
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Silence all logging. Same as `set_max_level(Level::Off)`.
pub fn disable() {
    set_max_level(Level::Off);
}

/// Print a message. Trace and info go to stdout, everything else to stderr.
///
/// This function gets called by the log macros (e.g. [debug_log_info]) and
/// generally shouldn't be called directly.
#[track_caller]
pub fn log(level: Level, message: fmt::Arguments<'_>) {
    let to_stdout = level < Level::Warning;
    let is_terminal = if to_stdout {
        std::io::stdout().is_terminal()
    } else {
        std::io::stderr().is_terminal()
    };

    let (blue, level_color, reset_color) = if is_terminal {
        ("\x1b[34m", level.color(), "\x1b[0m")
    } else {
        ("", "", "")
    };

    let where_and_when = where_and_when(blue, reset_color);
    let line = format!(
        "{blue}DEBUG LOG{reset_color} [{level_color}{level}{reset_color}]: {message}\n{where_and_when}\n"
    );

    // A closed pipe isn't worth crashing over.
    let _ = if to_stdout {
        std::io::stdout().lock().write_all(line.as_bytes())
    } else {
        std::io::stderr().lock().write_all(line.as_bytes())
    };
}

/// The location of the caller, the time this was called, and the thread it was
/// called from, all as strings.
#[track_caller]
pub fn where_and_when(color: &str, reset_color: &str) -> String {
    let now = OffsetDateTime::now_utc();

    let loc = Location::caller();
    let where_ = format!("{}:{}:{}", loc.file(), loc.line(), loc.column());

    let when = now
        .format(&Rfc3339)
        .unwrap_or_else(|e| format!("Unknown time: {e}"));

    let thread = std::thread::current();
    let thread = thread.name().unwrap_or("<unnamed>");

    format!("\tWhere:  {color}{where_}{reset_color}\n")
        + format!("\tTime:   {color}{when}{reset_color}\n").as_str()
        + format!("\tThread: {color}{thread}{reset_color}").as_str()
}

static MAX_LEVEL: AtomicU8 = AtomicU8::new(if cfg!(debug_assertions) {
    Level::Info as u8
} else {
    Level::Warning as u8
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(Level::Trace < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn level_round_trips_through_u8() {
        for level in [
            Level::Trace,
            Level::Info,
            Level::Warning,
            Level::Error,
            Level::Off,
        ] {
            assert_eq!(Level::from_u8(level as u8), level);
        }
    }

    #[test]
    fn where_and_when_names_this_file() {
        let s = where_and_when("", "");
        assert!(s.contains(file!()));
        assert!(s.contains("Thread:"));
    }
}
