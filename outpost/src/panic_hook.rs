use std::{
    backtrace::{Backtrace, BacktraceStatus},
    panic::{PanicHookInfo, take_hook},
    thread,
};

use crate::dispatch::panic_message;

/// Installs a global panic hook that logs panics via `tracing` before running
/// the previous hook.
///
/// Publisher panics are caught and turned into job failures by the
/// dispatcher; this hook makes sure they still show up in the logs with a
/// location.
pub fn install() {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracing::error!(target: "outpost::panic", "{}", format_panic_record(panic_info));
        }));

        previous_hook(panic_info);
    }));
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_message(panic_info.payload());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());

    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        format!("PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}")
    } else {
        format!("PANIC thread={thread_name} location={location} payload={payload}")
    }
}
