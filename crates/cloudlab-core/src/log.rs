//! Logging facilities.
//!
//! Component log lines are prefixed with the simulation time, the colored level label and the component name,
//! e.g. `[12.500 DEBUG datacenter] vm #3 allocated on host #1`.

use atty::Stream;
use colored::{Color, ColoredString, Colorize};
use log::error;
use serde_json::json;
use serde_type_name::type_name;

use crate::event::Event;

/// Applies the color to the string if stderr (log) goes to console.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_with_ctx {
    ($level:ident, $label:expr, $color:ident, $ctx:expr, $msg:expr) => (
        log::$level!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(), $crate::log::get_colored($label, $crate::colored::Color::$color), $ctx.name(), $msg
        )
    );
    ($level:ident, $label:expr, $color:ident, $ctx:expr, $format:expr, $($arg:tt)+) => (
        log::$level!(
            target: $ctx.name(),
            concat!("[{:.3} {} {}] ", $format),
            $ctx.time(), $crate::log::get_colored($label, $crate::colored::Color::$color), $ctx.name(), $($arg)+
        )
    );
}

/// Logs a message at the info level.
///
/// The first argument is anything providing `name()` and `time()`, usually a
/// [`SimulationContext`](crate::SimulationContext).
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(info, "INFO ", Green, $ctx, $($arg)+));
}

/// Logs a message at the debug level.
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(debug, "DEBUG", Blue, $ctx, $($arg)+));
}

/// Logs a message at the trace level.
#[macro_export]
macro_rules! log_trace {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(trace, "TRACE", Cyan, $ctx, $($arg)+));
}

/// Logs a message at the warn level.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(warn, "WARN ", Yellow, $ctx, $($arg)+));
}

/// Logs a message at the error level.
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(error, "ERROR", Red, $ctx, $($arg)+));
}

fn describe(event: &Event) -> serde_json::Value {
    json!({
        "type": type_name(&event.data).unwrap_or("?"),
        "data": event.data,
        "src": event.src,
        "dst": event.dst,
    })
}

/// Logs an unhandled event.
///
/// This method is used internally in [`cast!`](crate::cast!) macro.
pub fn log_unhandled_event(event: Event) {
    error!(
        target: "simulation",
        "[{:.3} {} simulation] Unhandled event: {}",
        event.time,
        get_colored("ERROR", Color::Red),
        describe(&event)
    );
}

pub(crate) fn log_undelivered_event(event: Event) {
    error!(
        target: "simulation",
        "[{:.3} {} simulation] Undelivered event: {}",
        event.time,
        get_colored("ERROR", Color::Red),
        describe(&event)
    );
}

pub(crate) fn log_incorrect_event(event: Event, msg: &str) {
    error!(
        target: "simulation",
        "[{:.3} {} simulation] Incorrect event ({}): {}",
        event.time,
        get_colored("ERROR", Color::Red),
        msg,
        describe(&event)
    );
}

pub(crate) fn event_details(event: &Event, src_name: &str) -> serde_json::Value {
    json!({
        "type": type_name(&event.data).unwrap_or("?"),
        "data": event.data,
        "src": src_name,
    })
}
