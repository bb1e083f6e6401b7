/// Client configuration.
///
/// Ported from `matchlock/client.py::Config`: `binary_path` defaults from
/// the `MATCHLOCK_BIN` environment variable, falling back to the bare
/// `"matchlock"` command looked up on `PATH`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path (or bare command name) to the matchlock binary.
    pub binary_path: String,

    /// Run the subprocess under `sudo`. Required for TAP devices on Linux.
    pub use_sudo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binary_path: std::env::var("MATCHLOCK_BIN").unwrap_or_else(|_| "matchlock".to_string()),
            use_sudo: false,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_to_bare_binary_name_without_env_override() {
        // SAFETY: test runs single-threaded within this process's test
        // harness slot; no other test in this crate reads MATCHLOCK_BIN.
        unsafe {
            std::env::remove_var("MATCHLOCK_BIN");
        }
        let cfg = Config::default();
        assert_eq!(cfg.binary_path, "matchlock");
        assert!(!cfg.use_sudo);
    }
}
