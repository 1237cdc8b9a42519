//! Environment lookup passed explicitly into resolution code.
//!
//! Resolution never reads `std::env` directly; it asks an `Env`. The
//! process implementation is used by the binary, the map implementation
//! by tests.

use std::path::PathBuf;

/// Read-only view of environment variables.
pub(crate) trait Env: Send + Sync {
    /// Returns the variable's value, treating empty values as unset.
    fn var(&self, key: &str) -> Option<String>;

    /// Home directory from `HOME`, falling back to the platform lookup.
    fn home_dir(&self) -> Option<PathBuf> {
        self.var("HOME").map(PathBuf::from).or_else(dirs::home_dir)
    }

    /// `$XDG_CONFIG_HOME`, else `$HOME/.config`.
    fn config_home(&self) -> Option<PathBuf> {
        self.var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| self.home_dir().map(|h| h.join(".config")))
    }
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

/// A fixed set of variables.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub(crate) struct MapEnv {
    vars: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MapEnv {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            vars: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).filter(|v| !v.is_empty()).cloned()
    }

    fn home_dir(&self) -> Option<PathBuf> {
        self.var("HOME").map(PathBuf::from)
    }
}
