//! Operator configuration
//!
//! The validation engine and orchestrator consult a [`ValidationConfig`]
//! snapshot on every pass. The snapshot is immutable; reloads swap the whole
//! value atomically (read-copy-update) so no consumer ever observes a
//! half-applied configuration and the hot validation path takes no lock
//! beyond an Arc clone.

mod watch;

pub use watch::watch_config;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::warn;

use crate::MIN_DRIFT_INTERVAL_SECS;

// ConfigMap data keys. Lists are comma-separated.
const KEY_ACTION_PREFIXES: &str = "policy.action.allowed-prefixes";
const KEY_RESTRICTED_RESOURCES: &str = "policy.resource.restricted";
const KEY_RESTRICTED_S3_RESOURCES: &str = "policy.resource.restricted-s3";
const KEY_MAX_ROLES: &str = "quota.max-roles-per-namespace";
const KEY_MANAGED_POLICY_ARNS: &str = "iam.managed-policy-arns";
const KEY_PERMISSION_BOUNDARY: &str = "iam.permission-boundary-arn";
const KEY_ROLE_NAME_PREFIX: &str = "iam.role-name-prefix";
const KEY_DEFAULT_TRUST_PRINCIPALS: &str = "trust.default-principal-arns";
const KEY_DRIFT_INTERVAL: &str = "drift.interval-seconds";

/// Default per-namespace role quota
///
/// The create-side quota check counts the incoming declaration against the
/// maximum, so a value of 2 admits exactly one declaration per namespace
/// before any ConfigMap is applied. A maximum of 1 would deny every create.
pub const DEFAULT_MAX_ROLES_PER_NAMESPACE: usize = 2;

/// Default prefix for computed role names
pub const DEFAULT_ROLE_NAME_PREFIX: &str = "k8s-";

/// Process-wide validation and orchestration configuration
///
/// Loaded from a ConfigMap at startup and on every change notification.
/// Consumers hold the snapshot by value for the duration of one reconcile
/// pass; it is never mutated mid-pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationConfig {
    /// Action prefixes a tenant's Allow statements may grant
    pub allowed_action_prefixes: Vec<String>,

    /// Substrings no Allow-statement resource may contain
    pub restricted_resources: Vec<String>,

    /// Exact S3 resources no S3-granting statement may reference
    pub restricted_s3_resources: Vec<String>,

    /// Per-namespace declaration quota
    pub max_roles_per_namespace: usize,

    /// Managed policies attached to every reconciled role
    pub managed_policy_arns: Vec<String>,

    /// Permission boundary attached to every reconciled role; empty skips
    /// the attachment
    pub permission_boundary_arn: String,

    /// Prefix for computed role names (role name = prefix + namespace)
    pub role_name_prefix: String,

    /// Trust policy principal ARNs used when a tenant supplies none
    pub default_trust_principal_arns: Vec<String>,

    /// Periodic drift reconciler cadence, floored at
    /// [`MIN_DRIFT_INTERVAL_SECS`]
    pub drift_interval: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_action_prefixes: Vec::new(),
            restricted_resources: Vec::new(),
            restricted_s3_resources: Vec::new(),
            max_roles_per_namespace: DEFAULT_MAX_ROLES_PER_NAMESPACE,
            managed_policy_arns: Vec::new(),
            permission_boundary_arn: String::new(),
            role_name_prefix: DEFAULT_ROLE_NAME_PREFIX.to_string(),
            default_trust_principal_arns: Vec::new(),
            drift_interval: Duration::from_secs(MIN_DRIFT_INTERVAL_SECS),
        }
    }
}

impl ValidationConfig {
    /// Parse a ConfigMap's data into a config snapshot
    ///
    /// Unknown keys are ignored; malformed values fall back to their defaults
    /// with a warning rather than failing the reload, so a typo in one key
    /// cannot take the whole control loop down.
    pub fn from_map(data: &BTreeMap<String, String>) -> Self {
        let defaults = Self::default();

        let drift_secs = parse_number(data, KEY_DRIFT_INTERVAL, MIN_DRIFT_INTERVAL_SECS);
        Self {
            allowed_action_prefixes: parse_list(data, KEY_ACTION_PREFIXES),
            restricted_resources: parse_list(data, KEY_RESTRICTED_RESOURCES),
            restricted_s3_resources: parse_list(data, KEY_RESTRICTED_S3_RESOURCES),
            max_roles_per_namespace: parse_number(
                data,
                KEY_MAX_ROLES,
                DEFAULT_MAX_ROLES_PER_NAMESPACE,
            ),
            managed_policy_arns: parse_list(data, KEY_MANAGED_POLICY_ARNS),
            permission_boundary_arn: data
                .get(KEY_PERMISSION_BOUNDARY)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
            role_name_prefix: data
                .get(KEY_ROLE_NAME_PREFIX)
                .map(|s| s.trim().to_string())
                .unwrap_or(defaults.role_name_prefix),
            default_trust_principal_arns: parse_list(data, KEY_DEFAULT_TRUST_PRINCIPALS),
            drift_interval: Duration::from_secs(drift_secs.max(MIN_DRIFT_INTERVAL_SECS)),
        }
    }

    /// Deterministic role name for a namespace: prefix + namespace
    ///
    /// Identity-provider state is keyed by this name, so the mapping must be
    /// stable across operator restarts.
    pub fn role_name_for(&self, namespace: &str) -> String {
        format!("{}{}", self.role_name_prefix, namespace)
    }
}

fn parse_list(data: &BTreeMap<String, String>, key: &str) -> Vec<String> {
    data.get(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_number<T>(data: &BTreeMap<String, String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match data.get(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "malformed config value, using default");
                default
            }
        },
    }
}

/// Holder for the current [`ValidationConfig`] snapshot
///
/// `snapshot` is the only read path; `reload` swaps the Arc atomically.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Arc<ValidationConfig>>,
}

impl ConfigStore {
    /// Create a store seeded with the given config
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// The current immutable snapshot
    pub fn snapshot(&self) -> Arc<ValidationConfig> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the snapshot from fresh ConfigMap data
    pub fn reload(&self, data: &BTreeMap<String, String>) {
        let next = Arc::new(ValidationConfig::from_map(data));
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_comma_separated_lists() {
        let cfg = ValidationConfig::from_map(&map(&[
            (KEY_ACTION_PREFIXES, "s3:,sts:, dynamodb:"),
            (KEY_RESTRICTED_RESOURCES, "kops, cluster-state"),
        ]));

        assert_eq!(cfg.allowed_action_prefixes, vec!["s3:", "sts:", "dynamodb:"]);
        assert_eq!(cfg.restricted_resources, vec!["kops", "cluster-state"]);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = ValidationConfig::from_map(&BTreeMap::new());
        assert_eq!(cfg.max_roles_per_namespace, DEFAULT_MAX_ROLES_PER_NAMESPACE);
        assert_eq!(cfg.role_name_prefix, DEFAULT_ROLE_NAME_PREFIX);
        assert!(cfg.allowed_action_prefixes.is_empty());
    }

    #[test]
    fn malformed_numbers_warn_and_use_defaults() {
        let cfg = ValidationConfig::from_map(&map(&[(KEY_MAX_ROLES, "lots")]));
        assert_eq!(cfg.max_roles_per_namespace, DEFAULT_MAX_ROLES_PER_NAMESPACE);
    }

    /// The drift cadence can be raised but never lowered below the floor
    #[test]
    fn drift_interval_is_floored() {
        let cfg = ValidationConfig::from_map(&map(&[(KEY_DRIFT_INTERVAL, "10")]));
        assert_eq!(cfg.drift_interval, Duration::from_secs(MIN_DRIFT_INTERVAL_SECS));

        let cfg = ValidationConfig::from_map(&map(&[(KEY_DRIFT_INTERVAL, "3600")]));
        assert_eq!(cfg.drift_interval, Duration::from_secs(3600));
    }

    /// A cluster with no ConfigMap must still admit a namespace's first
    /// declaration; the create check counts the incoming record itself
    #[test]
    fn default_quota_admits_a_first_declaration() {
        use crate::policy::validation::{check_quota, QuotaOp};

        let cfg = ValidationConfig::default();
        assert!(check_quota(0, cfg.max_roles_per_namespace, QuotaOp::Create).is_none());
        assert!(check_quota(1, cfg.max_roles_per_namespace, QuotaOp::Create).is_some());
    }

    #[test]
    fn role_name_is_prefix_plus_namespace() {
        let cfg = ValidationConfig::default();
        assert_eq!(cfg.role_name_for("team-a"), "k8s-team-a");
    }

    /// Story: a reload swaps the snapshot atomically; readers holding the old
    /// Arc keep a consistent view
    #[test]
    fn story_reload_swaps_snapshot_without_disturbing_readers() {
        let store = ConfigStore::new(ValidationConfig::default());
        let before = store.snapshot();

        store.reload(&map(&[(KEY_ACTION_PREFIXES, "s3:")]));
        let after = store.snapshot();

        assert!(before.allowed_action_prefixes.is_empty());
        assert_eq!(after.allowed_action_prefixes, vec!["s3:"]);
    }
}
