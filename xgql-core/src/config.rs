//! Gateway configuration: caching policy, timeouts and refresh policy.
//!
//! Values are read once at startup and are immutable for the life of the
//! process.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::ConfigError;
use crate::reference::GroupKind;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CACHE_IDLE_SECS: u64 = 300;
pub const DEFAULT_CACHE_SWEEP_SECS: u64 = 30;
pub const DEFAULT_MAPPER_REFRESH_MIN_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAPPER_REFRESH_RETRIES: u32 = 1;
pub const DEFAULT_WATCH_RETRY_SECS: u64 = 10;

/// Kinds that are never watch-cached. These are either high cardinality or
/// show up as incidental owner references, and a watch on them would cover
/// the whole cluster.
pub const DEFAULT_NO_CACHE_KINDS: &[(&str, &str)] = &[
    ("", "Node"),
    ("", "Namespace"),
    ("", "Pod"),
    ("", "ConfigMap"),
    ("", "Service"),
    ("", "ServiceAccount"),
    ("", "Secret"),
    ("apps", "Deployment"),
    ("apps", "DaemonSet"),
    ("rbac.authorization.k8s.io", "RoleBinding"),
    ("rbac.authorization.k8s.io", "ClusterRoleBinding"),
];

// ============================================================================
// EXCLUSION SET
// ============================================================================

/// Kinds that are always read with a direct call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    kinds: BTreeSet<GroupKind>,
}

impl Default for ExclusionSet {
    fn default() -> Self {
        DEFAULT_NO_CACHE_KINDS
            .iter()
            .map(|(group, kind)| GroupKind::new(*group, *kind))
            .collect()
    }
}

impl FromIterator<GroupKind> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = GroupKind>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

impl ExclusionSet {
    pub fn empty() -> Self {
        Self {
            kinds: BTreeSet::new(),
        }
    }

    /// Parse a comma separated list such as `Secret,Deployment.apps`.
    /// Blank entries are ignored.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        s.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry.parse::<GroupKind>().map_err(|_| ConfigError::InvalidValue {
                    field: "XGQL_NO_CACHE_KINDS".to_string(),
                    value: entry.to_string(),
                    reason: "expected Kind or Kind.group".to_string(),
                })
            })
            .collect()
    }

    pub fn contains(&self, kind: &GroupKind) -> bool {
        self.kinds.contains(kind)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GroupKind> {
        self.kinds.iter()
    }
}

// ============================================================================
// GATEWAY CONFIGURATION
// ============================================================================

/// How the shared type mapper re-runs discovery after a lookup miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refreshes closer together than this reuse the current mapping.
    pub min_interval: Duration,
    /// How many times a call is retried after a refresh.
    pub retries: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(DEFAULT_MAPPER_REFRESH_MIN_INTERVAL_MS),
            retries: DEFAULT_MAPPER_REFRESH_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub exclusions: ExclusionSet,
    /// Upper bound on any single store call or cache lookup.
    pub call_timeout: Duration,
    /// Clients unused for longer than this are evicted.
    pub cache_idle: Duration,
    /// How often the eviction task scans the cache.
    pub cache_sweep_interval: Duration,
    pub refresh: RefreshPolicy,
    /// Delay before a degraded kind tries to re-establish its watch.
    pub watch_retry_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            exclusions: ExclusionSet::default(),
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            cache_idle: Duration::from_secs(DEFAULT_CACHE_IDLE_SECS),
            cache_sweep_interval: Duration::from_secs(DEFAULT_CACHE_SWEEP_SECS),
            refresh: RefreshPolicy::default(),
            watch_retry_interval: Duration::from_secs(DEFAULT_WATCH_RETRY_SECS),
        }
    }
}

impl GatewayConfig {
    /// Create GatewayConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `XGQL_NO_CACHE_KINDS`: Comma separated kinds never watch-cached (default: built-in list)
    /// - `XGQL_CALL_TIMEOUT_SECS`: Per-call timeout (default: 5)
    /// - `XGQL_CACHE_IDLE_SECS`: Idle time before a client is evicted (default: 300)
    /// - `XGQL_CACHE_SWEEP_SECS`: Eviction scan interval (default: 30)
    /// - `XGQL_MAPPER_REFRESH_MIN_INTERVAL_MS`: Minimum gap between discoveries (default: 1000)
    /// - `XGQL_MAPPER_REFRESH_RETRIES`: Retries after a refresh (default: 1)
    /// - `XGQL_WATCH_RETRY_SECS`: Degraded watch retry delay (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secs = |name: &str, default: u64| {
            Duration::from_secs(
                lookup(name)
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(default),
            )
        };

        let exclusions = match lookup("XGQL_NO_CACHE_KINDS") {
            Some(s) => ExclusionSet::parse(&s)?,
            None => ExclusionSet::default(),
        };

        let refresh = RefreshPolicy {
            min_interval: Duration::from_millis(
                lookup("XGQL_MAPPER_REFRESH_MIN_INTERVAL_MS")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_MAPPER_REFRESH_MIN_INTERVAL_MS),
            ),
            retries: lookup("XGQL_MAPPER_REFRESH_RETRIES")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(DEFAULT_MAPPER_REFRESH_RETRIES),
        };

        let config = Self {
            exclusions,
            call_timeout: secs("XGQL_CALL_TIMEOUT_SECS", DEFAULT_CALL_TIMEOUT_SECS),
            cache_idle: secs("XGQL_CACHE_IDLE_SECS", DEFAULT_CACHE_IDLE_SECS),
            cache_sweep_interval: secs("XGQL_CACHE_SWEEP_SECS", DEFAULT_CACHE_SWEEP_SECS),
            refresh,
            watch_retry_interval: secs("XGQL_WATCH_RETRY_SECS", DEFAULT_WATCH_RETRY_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - every duration except the refresh interval is positive
    /// - the sweep interval does not exceed the idle threshold
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("XGQL_CALL_TIMEOUT_SECS", self.call_timeout),
            ("XGQL_CACHE_IDLE_SECS", self.cache_idle),
            ("XGQL_CACHE_SWEEP_SECS", self.cache_sweep_interval),
            ("XGQL_WATCH_RETRY_SECS", self.watch_retry_interval),
        ];
        for (field, value) in positive {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }

        if self.cache_sweep_interval > self.cache_idle {
            return Err(ConfigError::InvalidValue {
                field: "XGQL_CACHE_SWEEP_SECS".to_string(),
                value: self.cache_sweep_interval.as_secs().to_string(),
                reason: "must not exceed XGQL_CACHE_IDLE_SECS".to_string(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_exclusions() {
        let set = ExclusionSet::default();
        assert_eq!(set.len(), DEFAULT_NO_CACHE_KINDS.len());
        assert!(set.contains(&GroupKind::core("Secret")));
        assert!(set.contains(&GroupKind::new("apps", "Deployment")));
        assert!(set.contains(&GroupKind::new(
            "rbac.authorization.k8s.io",
            "ClusterRoleBinding"
        )));
        assert!(!set.contains(&GroupKind::new("pkg.crossplane.io", "Provider")));
        // Same kind name in a different group is a different kind.
        assert!(!set.contains(&GroupKind::new("example.org", "Secret")));
    }

    #[test]
    fn test_parse_exclusions() {
        let set = ExclusionSet::parse(" Secret, ,Deployment.apps,").unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&GroupKind::core("Secret")));
        assert!(set.contains(&GroupKind::new("apps", "Deployment")));

        assert!(ExclusionSet::parse("").unwrap().is_empty());
        assert!(ExclusionSet::parse("secret").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.cache_idle, Duration::from_secs(300));
        assert_eq!(config.refresh.retries, 1);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("XGQL_NO_CACHE_KINDS", "Secret"),
            ("XGQL_CALL_TIMEOUT_SECS", "2"),
            ("XGQL_CACHE_IDLE_SECS", "60"),
            ("XGQL_CACHE_SWEEP_SECS", "10"),
            ("XGQL_MAPPER_REFRESH_RETRIES", "3"),
        ]))
        .unwrap();
        assert_eq!(config.exclusions.len(), 1);
        assert_eq!(config.call_timeout, Duration::from_secs(2));
        assert_eq!(config.cache_idle, Duration::from_secs(60));
        assert_eq!(config.refresh.retries, 3);
    }

    #[test]
    fn test_from_lookup_ignores_unparseable_numbers() {
        let config =
            GatewayConfig::from_lookup(lookup(&[("XGQL_CALL_TIMEOUT_SECS", "soon")])).unwrap();
        assert_eq!(config.call_timeout, Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS));
    }

    #[test]
    fn test_validate_rejects_zero_and_inverted() {
        let err = GatewayConfig::from_lookup(lookup(&[("XGQL_CALL_TIMEOUT_SECS", "0")]));
        assert!(matches!(err, Err(ConfigError::InvalidValue { .. })));

        let err = GatewayConfig::from_lookup(lookup(&[
            ("XGQL_CACHE_IDLE_SECS", "10"),
            ("XGQL_CACHE_SWEEP_SECS", "20"),
        ]));
        assert!(err.is_err());
    }

    #[test]
    fn test_bad_exclusion_list_is_fatal() {
        let err = GatewayConfig::from_lookup(lookup(&[("XGQL_NO_CACHE_KINDS", "Pod,nope")]));
        assert!(err.is_err());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every parsed kind renders back to an entry that parses to itself.
        #[test]
        fn prop_exclusion_entries_round_trip(
            kinds in prop::collection::vec(("[A-Z][a-zA-Z0-9]{0,12}", "([a-z]{1,8}(\\.[a-z]{1,8}){0,2})?"), 0..8)
        ) {
            let text = kinds
                .iter()
                .map(|(kind, group)| if group.is_empty() { kind.clone() } else { format!("{}.{}", kind, group) })
                .collect::<Vec<_>>()
                .join(",");
            let set = ExclusionSet::parse(&text).unwrap();
            for (kind, group) in &kinds {
                prop_assert!(set.contains(&GroupKind::new(group.clone(), kind.clone())));
            }
            let rendered = set.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
            prop_assert_eq!(ExclusionSet::parse(&rendered).unwrap(), set);
        }
    }
}
