//! Typed access to environment settings
//!
//! Values are read after loading an optional `.env` file, so local
//! development can keep overrides next to the workspace.

use crate::error::{CommonError, Result};
use std::str::FromStr;
use std::sync::Once;

static DOTENV: Once = Once::new();

/// Load `.env` once per process. Missing files are ignored.
pub fn load_dotenv() {
    DOTENV.call_once(|| {
        dotenvy::dotenv().ok();
    });
}

/// Read `key` and parse it, falling back to `default` when unset.
///
/// A set but unparsable value is an error rather than a silent default.
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    load_dotenv();
    match std::env::var(key) {
        Ok(raw) => parse_setting(key, &raw),
        Err(_) => Ok(default),
    }
}

/// Parse a raw setting value, tagging failures with the setting name.
pub fn parse_setting<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| CommonError::InvalidSetting {
            key: key.to_string(),
            value: raw.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting_trims_input() {
        let value: u64 = parse_setting("ROWPIPE_TEST", " 42 ").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_setting_reports_key() {
        let err = parse_setting::<u32>("ROWPIPE_TEST", "ten").unwrap_err();
        assert!(err.to_string().contains("ROWPIPE_TEST"));
        assert!(err.to_string().contains("ten"));
    }

    #[test]
    fn test_env_or_uses_default_when_unset() {
        let value: usize = env_or("ROWPIPE_SURELY_UNSET_SETTING", 7).unwrap();
        assert_eq!(value, 7);
    }
}
