//! Environment collection, placeholder substitution and sanitization.

use regex::Regex;
use std::collections::BTreeMap;

/// Environment variable names reserved for piggy's internal wiring; dropped
/// from the environment handed to the user command.
pub const RESERVED_ENV_NAMES: [&str; 15] = [
    "PIGGY_AWS_SECRET_NAME",
    "PIGGY_AWS_SSM_PARAMETER_PATH",
    "PIGGY_AWS_REGION",
    "PIGGY_POD_NAME",
    "PIGGY_DEBUG",
    "PIGGY_STANDALONE",
    "PIGGY_ADDRESS",
    "PIGGY_ALLOWED_SA",
    "PIGGY_SKIP_VERIFY_TLS",
    "PIGGY_IGNORE_NO_ENV",
    "PIGGY_DEFAULT_SECRET_NAME_PREFIX",
    "PIGGY_DEFAULT_SECRET_NAME_SUFFIX",
    "PIGGY_DNS_RESOLVER",
    "PIGGY_INITIAL_DELAY",
    "PIGGY_NUMBER_OF_RETRY",
];

const PLACEHOLDER_PATTERN: &str = "^piggy:(.+)$";

/// The environment prepared for exec. Reserved names are rejected at
/// insertion.
#[derive(Debug, Default, PartialEq)]
pub struct SanitizedEnv(Vec<(String, String)>);

impl SanitizedEnv {
    pub fn append(&mut self, name: &str, value: &str) {
        if !RESERVED_ENV_NAMES.contains(&name) {
            self.0.push((name.to_string(), value.to_string()));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value.as_str())
    }

    /// Names of entries whose value still carries the placeholder prefix,
    /// meaning a reference did not resolve.
    pub fn unresolved(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, value)| value.to_ascii_lowercase().starts_with("piggy:"))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// The inherited process environment as a map.
pub fn collect_os_env() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

/// Substitutes `piggy:<key>` values from the secret mapping. Values whose
/// key is absent from the mapping pass through unchanged, as does everything
/// that is not a placeholder. Already-resolved values are never substituted
/// again.
pub fn substitute(
    os_env: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, String>,
) -> SanitizedEnv {
    let placeholder = Regex::new(PLACEHOLDER_PATTERN).expect("placeholder pattern is valid");
    let mut env = SanitizedEnv::default();
    for (name, value) in os_env {
        if let Some(captures) = placeholder.captures(value) {
            if let Some(secret) = secrets.get(&captures[1]) {
                env.append(name, secret);
                continue;
            }
        }
        env.append(name, value);
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_resolved_placeholders() {
        let env = substitute(
            &os_env(&[("DB", "piggy:db"), ("APP", "hello")]),
            &BTreeMap::from([("db".to_string(), "secret!".to_string())]),
        );
        assert_eq!(env.get("DB"), Some("secret!"));
        assert_eq!(env.get("APP"), Some("hello"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn reserved_names_are_dropped() {
        let env = substitute(
            &os_env(&[("PIGGY_ADDRESS", "https://x"), ("PIGGY_POD_NAME", "p"), ("APP", "hello")]),
            &BTreeMap::new(),
        );
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("APP"), Some("hello"));
    }

    #[test]
    fn unresolved_placeholders_survive_and_are_reported() {
        let env = substitute(&os_env(&[("DB", "piggy:absent")]), &BTreeMap::new());
        assert_eq!(env.get("DB"), Some("piggy:absent"));
        assert_eq!(env.unresolved(), ["DB"]);
    }

    #[test]
    fn unresolved_detection_is_case_insensitive() {
        let env = substitute(&os_env(&[("DB", "PIGGY:absent")]), &BTreeMap::new());
        assert_eq!(env.unresolved(), ["DB"]);
    }

    #[test]
    fn substitution_is_idempotent() {
        let secrets = BTreeMap::from([("db".to_string(), "resolved-value".to_string())]);
        let first = substitute(&os_env(&[("DB", "piggy:db"), ("APP", "hello")]), &secrets);
        let as_map: BTreeMap<String, String> = first
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let second = substitute(&as_map, &secrets);
        assert_eq!(first, second);
    }

    #[test]
    fn name_set_is_preserved_minus_reserved() {
        let source = os_env(&[
            ("A", "1"),
            ("B", "piggy:b"),
            ("PIGGY_DEBUG", "true"),
            ("PIGGY_NUMBER_OF_RETRY", "3"),
        ]);
        let env = substitute(&source, &BTreeMap::new());
        let names: Vec<&str> = env.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["A", "B"]);
    }
}
