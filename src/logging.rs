use console::style;
use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Print debug messages to stderr as well
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::Relaxed);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

pub(crate) enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

pub(crate) fn emit(level: Level, args: fmt::Arguments) {
    let tag = match level {
        Level::Debug => style("DEBUG").dim(),
        Level::Info => style("INFO ").on_blue().bright(),
        Level::Warn => style("WARN ").on_yellow().bright(),
        Level::Error => style("ERROR").on_red().bright(),
    };
    eprintln!("{} {}", tag, args);
}

macro_rules! debug {
    ($($arg:tt)+) => {
        if $crate::logging::is_verbose() {
            $crate::logging::emit($crate::logging::Level::Debug, format_args!($($arg)+));
        }
    };
}

macro_rules! info {
    ($($arg:tt)+) => {
        $crate::logging::emit($crate::logging::Level::Info, format_args!($($arg)+))
    };
}

macro_rules! warn {
    ($($arg:tt)+) => {
        $crate::logging::emit($crate::logging::Level::Warn, format_args!($($arg)+))
    };
}

macro_rules! error {
    ($($arg:tt)+) => {
        $crate::logging::emit($crate::logging::Level::Error, format_args!($($arg)+))
    };
}
