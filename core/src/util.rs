use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;

pub fn env_string(var: &str, default: &str) -> String {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

pub fn env_int(var: &str, default: i32) -> anyhow::Result<i32> {
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => value
            .parse()
            .with_context(|| format!("{var} must be an integer, got {value:?}")),
        _ => Ok(default),
    }
}

/// Splits a comma-separated environment variable, dropping empty entries.
pub fn env_list(var: &str) -> Vec<String> {
    env_string(var, "")
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_string_falls_back_to_default() {
        unsafe { std::env::remove_var("RDSCHECK_TEST_UNSET") };
        assert_eq!(env_string("RDSCHECK_TEST_UNSET", "fallback"), "fallback");

        unsafe { std::env::set_var("RDSCHECK_TEST_STRING", "value") };
        assert_eq!(env_string("RDSCHECK_TEST_STRING", "fallback"), "value");
    }

    #[test]
    fn env_int_parses_and_defaults() {
        unsafe { std::env::remove_var("RDSCHECK_TEST_INT_UNSET") };
        assert_eq!(env_int("RDSCHECK_TEST_INT_UNSET", 7).unwrap(), 7);

        unsafe { std::env::set_var("RDSCHECK_TEST_INT", "14") };
        assert_eq!(env_int("RDSCHECK_TEST_INT", 7).unwrap(), 14);
    }

    #[test]
    fn env_int_rejects_non_numeric() {
        unsafe { std::env::set_var("RDSCHECK_TEST_INT_BAD", "one") };
        assert!(env_int("RDSCHECK_TEST_INT_BAD", 7).is_err());
    }

    #[test]
    fn env_list_splits_and_trims() {
        unsafe { std::env::set_var("RDSCHECK_TEST_LIST", "sg-1, sg-2,,sg-3") };
        assert_eq!(env_list("RDSCHECK_TEST_LIST"), vec!["sg-1", "sg-2", "sg-3"]);

        unsafe { std::env::remove_var("RDSCHECK_TEST_LIST_UNSET") };
        assert!(env_list("RDSCHECK_TEST_LIST_UNSET").is_empty());
    }
}
