//! User-facing stderr lines that are independent of the log filter.

use colored::Colorize;

/// Prints a `[WARN]` line. Never affects the exit code.
pub(crate) fn warn_user(message: &str) {
    eprintln!("[WARN] {message}");
}

/// Formats an error as one `[ERROR]` line.
pub(crate) fn error_line(message: &str) -> String {
    let single = message.lines().map(str::trim).collect::<Vec<_>>().join(" ");
    format!("[ERROR] {single}")
}

/// Prints a progress line unless `quiet`.
pub(crate) fn progress(quiet: bool, message: &str) {
    if !quiet {
        eprintln!("{} {message}", "→".cyan());
    }
}
