//! Typed environment variable lookups
//!
//! Unset and blank variables are treated the same way. A variable that is set
//! but does not parse is an error rather than a silent fallback to the default.

use crate::error::{CommonError, Result};
use std::str::FromStr;

/// Read a variable, treating blank values as unset
pub fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read a variable that must be present
pub fn required(name: &str) -> Result<String> {
    var(name).ok_or_else(|| CommonError::missing_env(name))
}

/// Read a variable or fall back to `default`
pub fn var_or(name: &str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

/// Parse a variable if it is set
pub fn parse_opt<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| CommonError::invalid_env(name, &raw, e)),
        None => Ok(None),
    }
}

/// Parse a variable or fall back to `default`
pub fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse_opt(name)?.unwrap_or(default))
}
