use log::error;
use std::io::{self, Write};
use std::panic;
use std::thread;

/// Thread-name prefix of rendering units; their panics are caught and reported
/// as unit failures, so the process keeps running.
pub const UNIT_THREAD_PREFIX: &str = "rifagen-unit-";

pub fn initialize_panic_handler() {
    better_panic::install();

    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let name = thread::current().name().unwrap_or("<unnamed>").to_string();
        error!("Panic on thread {name}: {panic_info}");

        if is_unit_thread(&name) {
            return;
        }

        flush_output();
        default_hook(panic_info);

        std::process::exit(1);
    }));
}

fn is_unit_thread(name: &str) -> bool {
    name.starts_with(UNIT_THREAD_PREFIX)
}

/// Terminate a half-written progress line so the report starts on its own line
pub fn flush_output() {
    let _ = io::stdout().flush();
    let _ = writeln!(io::stderr());
}
