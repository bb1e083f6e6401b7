//! Minimal `Sandbox` builder: just enough of the original SDK's fluent
//! `with_*` surface for `Client::launch` to have a concrete builder object
//! to adapt (spec §1 explicitly excludes the full builder surface). Callers
//! who want chained `with_*`/`allow_host`/`mount` helpers build a
//! [`crate::options::CreateOptions`] directly instead.

use crate::options::CreateOptions;

pub struct Sandbox {
    options: CreateOptions,
}

impl Sandbox {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            options: CreateOptions::new(image),
        }
    }

    /// Direct access to the embedded options for field-by-field mutation,
    /// e.g. `sandbox.options_mut().allowed_hosts.push(...)`.
    pub fn options_mut(&mut self) -> &mut CreateOptions {
        &mut self.options
    }

    /// Consumes the builder, returning the `CreateOptions` it accumulated.
    /// Hook callbacks are stored as trait objects and are not `Clone`, so
    /// unlike the rest of this crate's getters this one takes `self` by
    /// value rather than returning a clone.
    pub fn into_options(self) -> CreateOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn new_sandbox_carries_image_into_options() {
        let sandbox = Sandbox::new("alpine:latest");
        let opts = sandbox.into_options();
        assert_eq!(opts.image, "alpine:latest");
    }

    #[test]
    fn options_mut_allows_field_mutation_before_launch() {
        let mut sandbox = Sandbox::new("alpine:latest");
        sandbox.options_mut().allowed_hosts.push("example.com".to_string());
        let opts = sandbox.into_options();
        assert_eq!(opts.allowed_hosts, vec!["example.com".to_string()]);
    }
}
