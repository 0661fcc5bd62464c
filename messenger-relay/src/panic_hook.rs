//! Route panics through `tracing` so they land in the log files.
//!
//! Worker tasks already contain panics from producers and callbacks; this
//! hook covers everything else and keeps a record of the contained ones.

use std::backtrace::Backtrace;
use std::panic::{PanicHookInfo, take_hook};
use std::thread;

use chrono::Local;

/// Install the hook, chaining to whatever hook was installed before.
pub fn install() {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracing::error!(target: "messenger_relay::panic", "{}", panic_record(info));
        }));
        previous_hook(info);
    }));
}

fn panic_record(info: &PanicHookInfo<'_>) -> String {
    let location = info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread_name = thread::current()
        .name()
        .unwrap_or("<unnamed>")
        .to_string();

    format!(
        "{} PANIC thread={thread_name} location={location} payload={}\nBacktrace:\n{}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        payload_text(info),
        Backtrace::capture(),
    )
}

fn payload_text(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        info.to_string()
    }
}
