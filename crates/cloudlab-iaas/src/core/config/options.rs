//! Config utils.

use std::collections::HashMap;
use std::str::FromStr;

use crate::core::error::ConfigError;

/// Parses config value string, which consists of two parts - name and options.
/// Example: Linear[idle=100,max=250] parts are name Linear and options string "idle=100,max=250".
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.split_once('[') {
        Some((l, r)) => (l.trim().to_string(), Some(r.replace(']', ""))),
        None => (config_str.trim().to_string(), None),
    }
}

/// Parses options string from config value, returns map with option names and values.
///
/// Malformed entries without `=` are skipped.
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    let mut options = HashMap::new();
    for option_str in options_str.split(',') {
        if let Some((name, value)) = option_str.split_once('=') {
            options.insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    options
}

/// Returns the value of required option `key` parsed as `T`.
///
/// `owner` is the name of configured entity and is used only in error messages.
pub fn get_option<T: FromStr>(options: &HashMap<String, String>, key: &str, owner: &str) -> Result<T, ConfigError> {
    let raw = options.get(key).ok_or_else(|| ConfigError::InvalidOption {
        name: owner.to_string(),
        option: key.to_string(),
        reason: "option is missing".to_string(),
    })?;
    raw.parse::<T>().map_err(|_| ConfigError::InvalidOption {
        name: owner.to_string(),
        option: key.to_string(),
        reason: format!("can't parse value `{}`", raw),
    })
}

/// Same as [`get_option`], but returns `default` if the option is absent.
pub fn get_option_or<T: FromStr>(
    options: &HashMap<String, String>,
    key: &str,
    owner: &str,
    default: T,
) -> Result<T, ConfigError> {
    if options.contains_key(key) {
        get_option(options, key, owner)
    } else {
        Ok(default)
    }
}
