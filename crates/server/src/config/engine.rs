use serde::Deserialize;

/// Window periods and store call bounds.
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// Length of the short window in seconds.
    #[serde(default = "default_short_window")]
    pub short_window_seconds: u64,
    /// Length of the billing cycle in days.
    #[serde(default = "default_cycle_days")]
    pub cycle_days: u64,
    /// Upper bound on a single store call, in milliseconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_window_seconds: default_short_window(),
            cycle_days: default_cycle_days(),
            store_timeout_ms: default_store_timeout(),
        }
    }
}

fn default_short_window() -> u64 {
    3_600
}

fn default_cycle_days() -> u64 {
    30
}

fn default_store_timeout() -> u64 {
    2_000
}

/// Backoff for transient store failures.
#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per store call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound on a single delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    25
}

fn default_max_delay() -> u64 {
    500
}

/// Read-through cache for status reports.
#[derive(Debug, Deserialize)]
pub struct StatusConfig {
    /// Cache TTL in seconds; `0` disables the cache.
    #[serde(default)]
    pub cache_ttl_seconds: u64,
    /// Maximum cached reports.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 0,
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_capacity() -> u64 {
    10_000
}

/// Background deletion of ended windows.
#[derive(Debug, Deserialize)]
pub struct MaintenanceConfig {
    /// Whether the sweeper runs.
    #[serde(default = "default_maintenance_enabled")]
    pub enabled: bool,
    /// Keep windows for this many hours after they end.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_maintenance_enabled(),
            retention_hours: default_retention_hours(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

fn default_maintenance_enabled() -> bool {
    true
}

fn default_retention_hours() -> u64 {
    48
}

fn default_sweep_interval() -> u64 {
    3_600
}
