//! Shared test utilities for the ows-config workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Configuration fragment fixtures
//! - In-memory index and range store generators
//! - Temporary configuration directories
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{fixtures, ConfigDir};
//! ```

pub mod config_dir;
pub mod fixtures;
pub mod generators;

pub use config_dir::ConfigDir;
pub use generators::*;

/// Macro asserting that a configuration result is an error whose message
/// contains the given text.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_config_err;
///
/// assert_config_err!(OwsConfig::parse(&cfg), "Duplicate layer name");
/// ```
#[macro_export]
macro_rules! assert_config_err {
    ($result:expr, $needle:expr) => {{
        match $result {
            Ok(_) => panic!("expected an error containing `{}`, got Ok", $needle),
            Err(e) => {
                let msg = e.to_string();
                assert!(
                    msg.contains($needle),
                    "error `{}` does not contain `{}`",
                    msg,
                    $needle
                );
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_config_err_passes() {
        let result: Result<(), String> = Err("Duplicate layer name: ls8".to_string());
        assert_config_err!(result, "Duplicate layer");
    }

    #[test]
    #[should_panic(expected = "expected an error")]
    fn test_assert_config_err_fails_on_ok() {
        let result: Result<(), String> = Ok(());
        assert_config_err!(result, "anything");
    }
}
