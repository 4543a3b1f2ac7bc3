//! # Host Configuration
//!
//! Startup-time configuration for an embedding host: where plugins live,
//! whether dev-mode relaxations apply, the bulkhead/timeout defaults every
//! runtime inherits, and the host-forced P0 governance rules.
//!
//! ## Environment Variables
//!
//! - `PLUGIN_KERNEL_DEV_MODE`: override `dev_mode`
//! - `PLUGIN_KERNEL_PLUGIN_HOME`: override `plugin_home`
//! - `PLUGIN_KERNEL_LOG_LEVEL`: override `logging.level`
//! - `PLUGIN_KERNEL_DEFAULT_TIMEOUT`: override `runtime.default_timeout`,
//!   accepting the same suffixed duration strings as `parse_duration`
//!   (`"500ms"`, `"30s"`, `"1m"`, `"2h"`).

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level host configuration, TOML-loaded with environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Warn-only permissions and hot-reload enablement.
    pub dev_mode: bool,
    /// Whether the host scans `plugin_roots` for packages at startup.
    pub auto_scan: bool,
    /// Primary plugin installation directory.
    pub plugin_home: String,
    /// Additional directories scanned for plugin packages.
    pub plugin_roots: Vec<String>,
    /// Whether governance applies to host-originated calls at all.
    pub host_governance_enabled: bool,
    /// Whether governance applies to host-to-host internal calls.
    pub host_governance_internal_calls: bool,
    /// Whether the permission service is consulted for host callers.
    pub host_check_permissions: bool,
    /// Glob paths seeding the shared-API tier at startup.
    pub preload_api_jars: Vec<String>,
    /// Runtime-wide defaults (bulkhead, timeouts, cleanup cadence).
    pub runtime: RuntimeConfig,
    /// Host-forced P0 governance rules.
    pub rules: Vec<HostRule>,
    /// Structured logging configuration.
    pub logging: LoggingConfig,
    /// Governance-patch persistence configuration.
    pub governance_patch: GovernancePatchConfig,
}

/// Per-runtime defaults applied unless a plugin or patch overrides them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How many historical traffic-stats windows a runtime retains.
    pub max_history_snapshots: usize,
    /// Default per-invocation deadline when no policy sets one.
    #[serde(with = "duration_secs")]
    pub default_timeout: Duration,
    /// Bulkhead semaphore capacity per runtime.
    pub bulkhead_max_concurrent: usize,
    /// How long `invoke` waits to acquire a bulkhead permit before failing.
    #[serde(with = "duration_millis")]
    pub bulkhead_acquire_timeout: Duration,
    /// How long `STOPPING` waits for inflight calls to drain before a forced
    /// cleanup of the dying queue.
    #[serde(with = "duration_secs")]
    pub force_cleanup_delay: Duration,
    /// How often the manager's background task runs `cleanupIdle`.
    #[serde(with = "duration_secs")]
    pub dying_check_interval: Duration,
    /// Bound on the dying queue per instance pool.
    pub max_dying: usize,
    /// Debounce window for the hot-reload detector.
    #[serde(with = "duration_millis")]
    pub reload_debounce: Duration,
    /// Grace period a `STOPPING` runtime drains inflight calls for.
    #[serde(with = "duration_secs")]
    pub grace_period: Duration,
}

/// A single host-forced P0 rule: `pattern` matches `pluginId.methodPattern`
/// glob-style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRule {
    pub pattern: String,
    pub permission: String,
    pub access: plugin_kernel_sdk::AccessType,
    pub audit: bool,
    #[serde(default)]
    pub audit_action: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Governance-patch file location and write discipline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernancePatchConfig {
    pub path: String,
}

impl Default for GovernancePatchConfig {
    fn default() -> Self {
        Self {
            path: "./config/ling-governance-patch.yml".to_string(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_history_snapshots: 10,
            default_timeout: Duration::from_secs(3),
            bulkhead_max_concurrent: 10,
            bulkhead_acquire_timeout: Duration::from_millis(100),
            force_cleanup_delay: Duration::from_secs(30),
            dying_check_interval: Duration::from_secs(5),
            max_dying: 5,
            reload_debounce: Duration::from_millis(1000),
            grace_period: Duration::from_secs(30),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            auto_scan: false,
            plugin_home: "./plugins".to_string(),
            plugin_roots: Vec::new(),
            host_governance_enabled: true,
            host_governance_internal_calls: false,
            host_check_permissions: true,
            preload_api_jars: Vec::new(),
            runtime: RuntimeConfig::default(),
            rules: Vec::new(),
            logging: LoggingConfig::default(),
            governance_patch: GovernancePatchConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: HostConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(dev_mode) = env::var("PLUGIN_KERNEL_DEV_MODE") {
            self.dev_mode = dev_mode.parse().unwrap_or(self.dev_mode);
        }
        if let Ok(home) = env::var("PLUGIN_KERNEL_PLUGIN_HOME") {
            if !home.is_empty() {
                self.plugin_home = home;
            }
        }
        if let Ok(level) = env::var("PLUGIN_KERNEL_LOG_LEVEL") {
            let valid_levels = ["trace", "debug", "info", "warn", "error"];
            if valid_levels.contains(&level.as_str()) {
                self.logging.level = level;
            } else {
                return Err(anyhow::anyhow!(
                    "invalid PLUGIN_KERNEL_LOG_LEVEL '{}', expected one of {:?}",
                    level,
                    valid_levels
                ));
            }
        }
        if let Ok(timeout) = env::var("PLUGIN_KERNEL_DEFAULT_TIMEOUT") {
            self.runtime.default_timeout = parse_duration(&timeout)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.plugin_home.is_empty() {
            return Err(anyhow::anyhow!("plugin_home cannot be empty"));
        }
        if self.runtime.bulkhead_max_concurrent == 0 {
            return Err(anyhow::anyhow!("runtime.bulkhead_max_concurrent cannot be 0"));
        }
        if self.runtime.max_dying == 0 {
            return Err(anyhow::anyhow!("runtime.max_dying cannot be 0"));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!("invalid logging.level '{}'", self.logging.level));
        }
        Ok(())
    }
}

pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow::anyhow!("empty duration string"));
    }
    if let Some(stripped) = s.strip_suffix("ms") {
        let num: u64 = stripped
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number: {}", stripped))?;
        return Ok(Duration::from_millis(num));
    }
    if let Some(stripped) = s.strip_suffix('s') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number: {}", stripped))?;
        return Ok(Duration::from_secs(num));
    }
    if let Some(stripped) = s.strip_suffix('m') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number: {}", stripped))?;
        return Ok(Duration::from_secs(num * 60));
    }
    if let Some(stripped) = s.strip_suffix('h') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number: {}", stripped))?;
        return Ok(Duration::from_secs(num * 3600));
    }
    Err(anyhow::anyhow!("unknown duration unit: {}", s))
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
