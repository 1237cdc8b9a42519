//! Quoting for commands that cross the ssh → shell → shell hop.

/// Wraps `value` in single quotes, turning each `'` into `'\''`.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Quotes every argument and joins them with spaces.
pub(crate) fn quote_all<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable rendering of a command line.
pub(crate) fn display_command<S: AsRef<str>>(args: &[S]) -> String {
    shell_words::join(args.iter().map(AsRef::as_ref))
}
