use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::proxy::Target;

const UPSTREAM_PREFIX: &str = "UPSTREAM_";
const ADDRS_SUFFIX: &str = "_ADDRS";
const ROUTES_SUFFIX: &str = "_ROUTES";

/// Path prefixes served by the gateway itself
const RESERVED_ROUTES: [&str; 2] = ["/_internal", "/v1/sessions"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub sessions: SessionConfig,
    pub upstreams: Vec<UpstreamConfig>,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the account service; sign-in is disabled without it
    pub accounts_url: Option<String>,
    pub bind_address: String,
}

#[derive(Clone)]
pub struct SessionConfig {
    pub cleanup_interval_seconds: u64,
    /// Selects the Redis store when set
    pub redis_url: Option<String>,
    pub signing_key: String,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamConfig {
    pub name: String,
    pub routes: Vec<String>,
    pub targets: Vec<Target>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            accounts_url: None,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_seconds: 60,
            redis_url: None,
            signing_key: String::new(),
            ttl_seconds: 1800, // 30 minutes
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("cleanup_interval_seconds", &self.cleanup_interval_seconds)
            .field("redis_url", &self.redis_url)
            .field("signing_key", &"<redacted>")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from `(name, value)` pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let non_empty = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bind_address = non_empty("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let accounts_url = non_empty("ACCOUNTS_URL");

        let signing_key = vars.get("SESSION_KEY").cloned().unwrap_or_default();
        let ttl_seconds = parse_seconds(&vars, "SESSION_TTL_SECONDS", 1800)?;
        let cleanup_interval_seconds = parse_seconds(&vars, "CLEANUP_INTERVAL_SECONDS", 60)?;
        let redis_url = non_empty("REDIS_URL")
            .or_else(|| non_empty("REDIS_ADDR").map(|addr| format!("redis://{addr}/")));

        let config = Config {
            gateway: GatewayConfig {
                accounts_url,
                bind_address,
            },
            sessions: SessionConfig {
                cleanup_interval_seconds,
                redis_url,
                signing_key,
                ttl_seconds,
            },
            upstreams: parse_upstreams(&vars)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sessions.signing_key.is_empty() {
            return Err(invalid("SESSION_KEY must be set to a non-empty value"));
        }
        if self.sessions.ttl_seconds == 0 {
            return Err(invalid("SESSION_TTL_SECONDS must be greater than 0"));
        }
        if self.sessions.cleanup_interval_seconds == 0 {
            return Err(invalid("CLEANUP_INTERVAL_SECONDS must be greater than 0"));
        }
        if self.upstreams.is_empty() {
            return Err(invalid(
                "at least one upstream group (UPSTREAM_<NAME>_ADDRS) is required",
            ));
        }

        let mut seen = HashSet::new();
        for upstream in &self.upstreams {
            if upstream.targets.is_empty() {
                return Err(invalid(format!("upstream {} has no addresses", upstream.name)));
            }
            if upstream.routes.is_empty() {
                return Err(invalid(format!("upstream {} has no routes", upstream.name)));
            }
            for route in &upstream.routes {
                if !route.starts_with('/') || route == "/" {
                    return Err(invalid(format!(
                        "route {route:?} of upstream {} must be a path prefix other than /",
                        upstream.name
                    )));
                }
                if RESERVED_ROUTES
                    .iter()
                    .any(|reserved| route == reserved || route.starts_with(&format!("{reserved}/")))
                {
                    return Err(invalid(format!("route {route:?} is reserved by the gateway")));
                }
                if !seen.insert(route.as_str()) {
                    return Err(invalid(format!("route {route:?} is claimed twice")));
                }
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid(format!("{name} must be a whole number of seconds"))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Collect `UPSTREAM_<NAME>_ADDRS` / `UPSTREAM_<NAME>_ROUTES` pairs, ordered by name.
fn parse_upstreams(vars: &HashMap<String, String>) -> Result<Vec<UpstreamConfig>, ConfigError> {
    let mut groups: BTreeMap<String, (Option<&str>, Option<&str>)> = BTreeMap::new();

    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(UPSTREAM_PREFIX) else {
            continue;
        };
        if let Some(name) = rest.strip_suffix(ADDRS_SUFFIX) {
            groups.entry(name.to_lowercase()).or_default().0 = Some(value);
        } else if let Some(name) = rest.strip_suffix(ROUTES_SUFFIX) {
            groups.entry(name.to_lowercase()).or_default().1 = Some(value);
        }
    }

    groups
        .into_iter()
        .map(|(name, (addrs, routes))| {
            if name.is_empty() {
                return Err(invalid("upstream group names may not be empty"));
            }
            let targets = split_list(addrs.unwrap_or_default())
                .iter()
                .map(|addr| {
                    addr.parse::<Target>()
                        .map_err(|e| invalid(format!("upstream {name}: {e}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let routes = split_list(routes.unwrap_or_default())
                .into_iter()
                .map(|route| {
                    if route.len() > 1 {
                        route.trim_end_matches('/').to_string()
                    } else {
                        route
                    }
                })
                .collect();
            Ok(UpstreamConfig {
                name,
                routes,
                targets,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SESSION_KEY", "s3cr3t"),
            ("UPSTREAM_USERS_ADDRS", "http://users-1:80, users-2:80"),
            ("UPSTREAM_USERS_ROUTES", "/v1/users,/v1/me/"),
        ]
    }

    fn with(extra: &[(&'static str, &'static str)]) -> Result<Config, ConfigError> {
        let mut vars = base();
        vars.extend_from_slice(extra);
        Config::from_vars(vars)
    }

    #[test]
    fn test_defaults() {
        let config = with(&[]).unwrap();

        assert_eq!(config.gateway.bind_address, "0.0.0.0:8080");
        assert!(config.gateway.accounts_url.is_none());
        assert_eq!(config.sessions.ttl(), Duration::from_secs(1800));
        assert_eq!(config.sessions.cleanup_interval(), Duration::from_secs(60));
        assert!(config.sessions.redis_url.is_none());

        assert_eq!(config.upstreams.len(), 1);
        let users = &config.upstreams[0];
        assert_eq!(users.name, "users");
        assert_eq!(users.routes, vec!["/v1/users", "/v1/me"]);
        assert_eq!(users.targets.len(), 2);
        assert_eq!(users.targets[1].to_string(), "http://users-2:80");
    }

    #[test]
    fn test_overrides() {
        let config = with(&[
            ("BIND_ADDRESS", "127.0.0.1:9000"),
            ("SESSION_TTL_SECONDS", "60"),
            ("CLEANUP_INTERVAL_SECONDS", "5"),
            ("ACCOUNTS_URL", "http://accounts:80"),
            ("REDIS_ADDR", "cache:6379"),
        ])
        .unwrap();

        assert_eq!(config.gateway.bind_address, "127.0.0.1:9000");
        assert_eq!(config.sessions.ttl_seconds, 60);
        assert_eq!(config.sessions.cleanup_interval_seconds, 5);
        assert_eq!(config.gateway.accounts_url.as_deref(), Some("http://accounts:80"));
        assert_eq!(config.sessions.redis_url.as_deref(), Some("redis://cache:6379/"));
    }

    #[test]
    fn test_redis_url_wins_over_addr() {
        let config = with(&[
            ("REDIS_URL", "redis://primary:6380/2"),
            ("REDIS_ADDR", "cache:6379"),
        ])
        .unwrap();
        assert_eq!(config.sessions.redis_url.as_deref(), Some("redis://primary:6380/2"));
    }

    #[test]
    fn test_multiple_groups_are_ordered_by_name() {
        let config = with(&[
            ("UPSTREAM_BILLING_ADDRS", "billing:80"),
            ("UPSTREAM_BILLING_ROUTES", "/v1/invoices"),
        ])
        .unwrap();

        let names: Vec<_> = config.upstreams.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["billing", "users"]);
    }

    #[test]
    fn test_missing_signing_key() {
        let result = Config::from_vars([
            ("UPSTREAM_USERS_ADDRS", "users:80"),
            ("UPSTREAM_USERS_ROUTES", "/v1/users"),
        ]);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        assert!(with(&[("SESSION_KEY", "")]).is_err());
    }

    #[test]
    fn test_rejects_bad_durations() {
        assert!(with(&[("SESSION_TTL_SECONDS", "0")]).is_err());
        assert!(with(&[("SESSION_TTL_SECONDS", "soon")]).is_err());
        assert!(with(&[("CLEANUP_INTERVAL_SECONDS", "0")]).is_err());
    }

    #[test]
    fn test_rejects_bad_upstreams() {
        assert!(Config::from_vars([("SESSION_KEY", "s3cr3t")]).is_err());
        assert!(with(&[("UPSTREAM_ORPHAN_ROUTES", "/v1/orphans")]).is_err());
        assert!(with(&[("UPSTREAM_ORPHAN_ADDRS", "orphan:80")]).is_err());
        assert!(with(&[
            ("UPSTREAM_ROOT_ADDRS", "root:80"),
            ("UPSTREAM_ROOT_ROUTES", "/"),
        ])
        .is_err());
        assert!(with(&[
            ("UPSTREAM_REL_ADDRS", "rel:80"),
            ("UPSTREAM_REL_ROUTES", "v1/relative"),
        ])
        .is_err());
        assert!(with(&[
            ("UPSTREAM_AUTH_ADDRS", "auth:80"),
            ("UPSTREAM_AUTH_ROUTES", "/v1/sessions"),
        ])
        .is_err());
        assert!(with(&[
            ("UPSTREAM_DUP_ADDRS", "dup:80"),
            ("UPSTREAM_DUP_ROUTES", "/v1/users"),
        ])
        .is_err());
        assert!(with(&[
            ("UPSTREAM_BAD_ADDRS", "ftp://bad:21"),
            ("UPSTREAM_BAD_ROUTES", "/v1/bad"),
        ])
        .is_err());
    }

    #[test]
    fn test_debug_redacts_signing_key() {
        let config = with(&[]).unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("s3cr3t"));
        assert!(debug.contains("<redacted>"));
    }
}
