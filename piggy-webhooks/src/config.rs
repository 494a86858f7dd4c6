//! Piggy configuration options.
//!
//! Every option is resolved from a pod annotation under the
//! [`ANNOTATION_NAMESPACE`] prefix, falling back to a process environment
//! variable whose name is the option uppercased with dashes replaced by
//! underscores (`aws-secret-name` -> `AWS_SECRET_NAME`).

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::time::Duration;

/// Annotation prefix for all piggy options.
pub const ANNOTATION_NAMESPACE: &str = "piggysec.com/";

pub const AWS_SECRET_NAME: &str = "aws-secret-name";
pub const AWS_SSM_PARAMETER_PATH: &str = "aws-ssm-parameter-path";
pub const AWS_REGION: &str = "aws-region";
pub const PIGGY_ENV_IMAGE: &str = "piggy-env-image";
pub const PIGGY_ENV_IMAGE_PULL_POLICY: &str = "piggy-env-image-pull-policy";
pub const PIGGY_ENV_RESOURCE_CPU_REQUEST: &str = "piggy-env-resource-cpu-request";
pub const PIGGY_ENV_RESOURCE_MEMORY_REQUEST: &str = "piggy-env-resource-memory-request";
pub const PIGGY_ENV_RESOURCE_CPU_LIMIT: &str = "piggy-env-resource-cpu-limit";
pub const PIGGY_ENV_RESOURCE_MEMORY_LIMIT: &str = "piggy-env-resource-memory-limit";
pub const PIGGY_PSP_ALLOW_PRIVILEGE_ESCALATION: &str = "piggy-psp-allow-privilege-escalation";
pub const PIGGY_ADDRESS: &str = "piggy-address";
pub const PIGGY_SKIP_VERIFY_TLS: &str = "piggy-skip-verify-tls";
pub const PIGGY_IGNORE_NO_ENV: &str = "piggy-ignore-no-env";
pub const PIGGY_ENFORCE_INTEGRITY: &str = "piggy-enforce-integrity";
pub const PIGGY_ENFORCE_SERVICE_ACCOUNT: &str = "piggy-enforce-service-account";
pub const PIGGY_DEFAULT_SECRET_NAME_PREFIX: &str = "piggy-default-secret-name-prefix";
pub const PIGGY_DEFAULT_SECRET_NAME_SUFFIX: &str = "piggy-default-secret-name-suffix";
pub const PIGGY_DNS_RESOLVER: &str = "piggy-dns-resolver";
pub const PIGGY_INITIAL_DELAY: &str = "piggy-initial-delay";
pub const PIGGY_NUMBER_OF_RETRY: &str = "piggy-number-of-retry";
pub const PIGGY_SECRET_VERSION_STAGE: &str = "piggy-secret-version-stage";
pub const PIGGY_UID: &str = "piggy-uid";
pub const STANDALONE: &str = "standalone";
pub const DEBUG: &str = "debug";
pub const IMAGE_PULL_SECRET: &str = "image-pull-secret";
pub const IMAGE_PULL_SECRET_NAMESPACE: &str = "image-pull-secret-namespace";
pub const IMAGE_SKIP_VERIFY_REGISTRY: &str = "image-skip-verify-registry";

/// The merged piggy configuration for one admission request.
#[derive(Debug, Clone)]
pub struct PiggyConfig {
    pub aws_secret_name: String,
    pub aws_ssm_parameter_path: String,
    pub aws_region: String,
    pub piggy_image: String,
    pub piggy_image_pull_policy: String,
    pub piggy_resource_cpu_request: Quantity,
    pub piggy_resource_memory_request: Quantity,
    pub piggy_resource_cpu_limit: Quantity,
    pub piggy_resource_memory_limit: Quantity,
    pub piggy_psp_allow_privilege_escalation: bool,
    pub piggy_address: String,
    pub piggy_skip_verify_tls: bool,
    pub piggy_ignore_no_env: bool,
    pub piggy_dns_resolver: String,
    pub piggy_initial_delay: Option<Duration>,
    pub piggy_number_of_retry: u32,
    pub standalone: bool,
    pub debug: bool,
    pub image_pull_secret: String,
    pub image_pull_secret_namespace: String,
    pub image_skip_verify_registry: bool,
}

impl PiggyConfig {
    /// Merges the configuration from pod annotations with environment
    /// variable fallbacks.
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        Self {
            aws_secret_name: get_string(annotations, AWS_SECRET_NAME, ""),
            aws_ssm_parameter_path: get_string(annotations, AWS_SSM_PARAMETER_PATH, ""),
            aws_region: get_string(annotations, AWS_REGION, ""),
            piggy_image: get_string(annotations, PIGGY_ENV_IMAGE, ""),
            piggy_image_pull_policy: get_string(annotations, PIGGY_ENV_IMAGE_PULL_POLICY, "Always"),
            piggy_resource_cpu_request: get_quantity(
                annotations,
                PIGGY_ENV_RESOURCE_CPU_REQUEST,
                "50m",
            ),
            piggy_resource_memory_request: get_quantity(
                annotations,
                PIGGY_ENV_RESOURCE_MEMORY_REQUEST,
                "64Mi",
            ),
            piggy_resource_cpu_limit: get_quantity(annotations, PIGGY_ENV_RESOURCE_CPU_LIMIT, "200m"),
            piggy_resource_memory_limit: get_quantity(
                annotations,
                PIGGY_ENV_RESOURCE_MEMORY_LIMIT,
                "64Mi",
            ),
            piggy_psp_allow_privilege_escalation: get_bool(
                annotations,
                PIGGY_PSP_ALLOW_PRIVILEGE_ESCALATION,
                false,
            ),
            piggy_address: get_string(annotations, PIGGY_ADDRESS, ""),
            piggy_skip_verify_tls: get_bool(annotations, PIGGY_SKIP_VERIFY_TLS, true),
            piggy_ignore_no_env: get_bool(annotations, PIGGY_IGNORE_NO_ENV, false),
            piggy_dns_resolver: get_string(annotations, PIGGY_DNS_RESOLVER, ""),
            piggy_initial_delay: get_duration(annotations, PIGGY_INITIAL_DELAY),
            piggy_number_of_retry: get_u32(annotations, PIGGY_NUMBER_OF_RETRY, 1).max(1),
            standalone: get_bool(annotations, STANDALONE, false),
            debug: get_bool(annotations, DEBUG, false),
            image_pull_secret: get_string(annotations, IMAGE_PULL_SECRET, ""),
            image_pull_secret_namespace: get_string(annotations, IMAGE_PULL_SECRET_NAMESPACE, ""),
            image_skip_verify_registry: get_bool(annotations, IMAGE_SKIP_VERIFY_REGISTRY, true),
        }
    }

    /// The gate for pod mutation: at least one secret source or the secret
    /// server address must be configured.
    pub fn is_mutation_enabled(&self) -> bool {
        !self.aws_secret_name.is_empty()
            || !self.aws_ssm_parameter_path.is_empty()
            || !self.piggy_address.is_empty()
    }
}

fn env_name(name: &str) -> String {
    name.to_uppercase().replace('-', "_")
}

/// Environment value with a default when unset or empty.
pub fn get_env(name: &str, default_value: &str) -> String {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val,
        _ => default_value.to_string(),
    }
}

/// Environment value parsed as bool, defaulting when unset or malformed.
pub fn get_env_bool(name: &str, default_value: bool) -> bool {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().unwrap_or(false),
        _ => default_value,
    }
}

/// String option from annotations with env fallback.
pub fn get_string(annotations: &BTreeMap<String, String>, name: &str, default_value: &str) -> String {
    match annotations.get(&format!("{ANNOTATION_NAMESPACE}{name}")) {
        Some(val) => val.clone(),
        None => get_env(&env_name(name), default_value),
    }
}

/// Bool option from annotations with env fallback. A malformed value reads
/// as `false`, matching `strconv.ParseBool` tolerance in prior deployments.
pub fn get_bool(annotations: &BTreeMap<String, String>, name: &str, default_value: bool) -> bool {
    match annotations.get(&format!("{ANNOTATION_NAMESPACE}{name}")) {
        Some(val) => val.parse().unwrap_or(false),
        None => get_env_bool(&env_name(name), default_value),
    }
}

/// Integer option from annotations with env fallback.
pub fn get_u32(annotations: &BTreeMap<String, String>, name: &str, default_value: u32) -> u32 {
    let raw = get_string(annotations, name, "");
    if raw.is_empty() {
        return default_value;
    }
    raw.parse().unwrap_or(default_value)
}

/// Resource quantity option. Quantities are carried verbatim; the API server
/// validates them.
pub fn get_quantity(
    annotations: &BTreeMap<String, String>,
    name: &str,
    default_value: &str,
) -> Quantity {
    Quantity(get_string(annotations, name, default_value))
}

/// Duration option, accepting `duration-str` forms (`5s`, `500ms`) or a bare
/// number of seconds. Unset, zero or malformed values resolve to `None`.
pub fn get_duration(annotations: &BTreeMap<String, String>, name: &str) -> Option<Duration> {
    let raw = get_string(annotations, name, "");
    if raw.is_empty() || raw == "0" {
        return None;
    }
    let parsed = duration_str::parse(&raw)
        .ok()
        .or_else(|| raw.parse::<u64>().ok().map(Duration::from_secs))?;
    (!parsed.is_zero()).then_some(parsed)
}
