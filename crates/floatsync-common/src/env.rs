//! Typed reads of configuration from environment variables.
//!
//! Unset variables fall back to the supplied default. A variable that is set
//! but cannot be parsed is an [`Error::InvalidEnv`], so a typo in a deployment
//! fails at start-up instead of silently running with defaults.

use crate::error::{Error, Result};
use byte_unit::Byte;
use std::str::FromStr;

fn read(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `name` as `T`, or return `default` when unset.
pub fn parsed_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match read(name) {
        None => Ok(default),
        Some(raw) => raw.parse::<T>().map_err(|e| Error::InvalidEnv {
            name: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Parse a byte size such as `512MB`, `1GiB` or a plain integer.
pub fn bytes_or(name: &str, default: u64) -> Result<u64> {
    match read(name) {
        None => Ok(default),
        Some(raw) => Byte::parse_str(&raw, true)
            .map(|b| b.as_u64())
            .map_err(|e| Error::InvalidEnv {
                name: name.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

/// Comma-separated list; empty items are dropped.
pub fn list_or(name: &str, default: &[&str]) -> Vec<String> {
    match read(name) {
        None => default.iter().map(|s| s.to_string()).collect(),
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

pub fn string_opt(name: &str) -> Option<String> {
    read(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parsed_or_default_and_value() {
        std::env::remove_var("FLOATSYNC_TEST_NUM");
        assert_eq!(parsed_or("FLOATSYNC_TEST_NUM", 7usize).unwrap(), 7);

        std::env::set_var("FLOATSYNC_TEST_NUM", " 12 ");
        assert_eq!(parsed_or("FLOATSYNC_TEST_NUM", 7usize).unwrap(), 12);

        std::env::set_var("FLOATSYNC_TEST_NUM", "twelve");
        let err = parsed_or("FLOATSYNC_TEST_NUM", 7usize).unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { .. }));
        std::env::remove_var("FLOATSYNC_TEST_NUM");
    }

    #[test]
    #[serial]
    fn test_bytes_or_units() {
        std::env::set_var("FLOATSYNC_TEST_BYTES", "1GiB");
        assert_eq!(bytes_or("FLOATSYNC_TEST_BYTES", 0).unwrap(), 1024 * 1024 * 1024);

        std::env::set_var("FLOATSYNC_TEST_BYTES", "2048");
        assert_eq!(bytes_or("FLOATSYNC_TEST_BYTES", 0).unwrap(), 2048);

        std::env::remove_var("FLOATSYNC_TEST_BYTES");
        assert_eq!(bytes_or("FLOATSYNC_TEST_BYTES", 99).unwrap(), 99);
    }

    #[test]
    #[serial]
    fn test_list_or() {
        std::env::set_var("FLOATSYNC_TEST_LIST", "a, b,,c ");
        assert_eq!(list_or("FLOATSYNC_TEST_LIST", &["x"]), vec!["a", "b", "c"]);

        std::env::remove_var("FLOATSYNC_TEST_LIST");
        assert_eq!(list_or("FLOATSYNC_TEST_LIST", &["x"]), vec!["x"]);
    }
}
