//! Runtime settings resolved from flags and environment.
//!
//! The reserved `PIGGY_*` variables injected at admission time always win
//! over the positional flags, so a pod rewrite cannot be undone by editing
//! the container args alone.

use crate::cli::Cli;
use std::time::Duration;

/// Environment value with a default when unset or empty.
pub fn get_env(name: &str, default_value: &str) -> String {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val,
        _ => default_value.to_string(),
    }
}

/// Environment value parsed as bool, defaulting when unset. A present but
/// malformed value reads as `false`.
pub fn get_env_bool(name: &str, default_value: bool) -> bool {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().unwrap_or(false),
        _ => default_value,
    }
}

pub fn get_env_u32(name: &str, default_value: u32) -> u32 {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().unwrap_or(default_value),
        _ => default_value,
    }
}

/// Parses a duration given as a `duration-str` form (`5s`, `500ms`) or a
/// bare number of seconds.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    if raw.is_empty() || raw == "0" {
        return None;
    }
    let parsed = duration_str::parse(raw)
        .ok()
        .or_else(|| raw.parse::<u64>().ok().map(Duration::from_secs))?;
    (!parsed.is_zero()).then_some(parsed)
}

/// The agent's resolved run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub standalone: bool,
    pub retries: u32,
    pub initial_delay: Option<Duration>,
    pub ignore_no_env: bool,
    pub debug: bool,
}

impl AgentSettings {
    /// Resolves settings with environment overrides winning over flags.
    pub fn resolve(cli: &Cli) -> Self {
        let standalone = match std::env::var("PIGGY_STANDALONE") {
            Ok(val) if !val.is_empty() => val.parse().unwrap_or(false),
            _ => cli.standalone,
        };
        let retries = match std::env::var("PIGGY_NUMBER_OF_RETRY") {
            Ok(val) if !val.is_empty() => val.parse().unwrap_or(1),
            _ => cli.retry.unwrap_or(1),
        };
        let initial_delay = match std::env::var("PIGGY_INITIAL_DELAY") {
            Ok(val) if !val.is_empty() => parse_duration(&val),
            _ => cli.initial_delay.as_deref().and_then(parse_duration),
        };
        Self {
            standalone,
            retries: retries.max(1),
            initial_delay,
            ignore_no_env: get_env_bool("PIGGY_IGNORE_NO_ENV", false),
            debug: get_env_bool("PIGGY_DEBUG", false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["piggy-env"];
        argv.extend(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    #[serial]
    fn flags_apply_without_env() {
        let cli = cli(&["--standalone", "--retry", "3", "--initial-delay", "2s", "--", "app"]);
        let settings = AgentSettings::resolve(&cli);
        assert!(settings.standalone);
        assert_eq!(settings.retries, 3);
        assert_eq!(settings.initial_delay, Some(Duration::from_secs(2)));
    }

    #[test]
    #[serial]
    fn env_overrides_flags() {
        unsafe {
            std::env::set_var("PIGGY_STANDALONE", "false");
            std::env::set_var("PIGGY_NUMBER_OF_RETRY", "5");
            std::env::set_var("PIGGY_INITIAL_DELAY", "500ms");
        }
        let cli = cli(&["--standalone", "--retry", "3", "--initial-delay", "2s", "--", "app"]);
        let settings = AgentSettings::resolve(&cli);
        assert!(!settings.standalone);
        assert_eq!(settings.retries, 5);
        assert_eq!(settings.initial_delay, Some(Duration::from_millis(500)));
        unsafe {
            std::env::remove_var("PIGGY_STANDALONE");
            std::env::remove_var("PIGGY_NUMBER_OF_RETRY");
            std::env::remove_var("PIGGY_INITIAL_DELAY");
        }
    }

    #[test]
    #[serial]
    fn retries_never_fall_below_one() {
        let cli = cli(&["--retry", "0", "--", "app"]);
        assert_eq!(AgentSettings::resolve(&cli).retries, 1);
    }

    #[rstest::rstest]
    #[case::seconds_suffix("5s", Some(Duration::from_secs(5)))]
    #[case::millis_suffix("500ms", Some(Duration::from_millis(500)))]
    #[case::bare_seconds("7", Some(Duration::from_secs(7)))]
    #[case::zero("0", None)]
    #[case::empty("", None)]
    #[case::garbage("soon", None)]
    fn duration_forms(#[case] raw: &str, #[case] expected: Option<Duration>) {
        assert_eq!(parse_duration(raw), expected);
    }
}
