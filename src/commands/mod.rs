//! CLI command implementations.
//!
//! `run`, `shell` and `exec` share one flow that differs only in the
//! remote command, so they live together in `session`.

pub mod session;
