//! Engine configuration
//!
//! One TOML document aggregates every component's tuning. Each section has a
//! `Default` carrying the documented values, so a partial file only needs to
//! name what it overrides.

use bazaar_bus::BusConfig;
use bazaar_cache::CacheTtlTable;
use bazaar_gate::{GateConfig, GateError};
use bazaar_model::BazaarError;
use bazaar_scoring::{ScoringConfig, ScoringConfigError};
use bazaar_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest accepted over-fetch factor
pub const MAX_OVER_FETCH: u32 = 3;

/// Deadlines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Whole-request deadline
    pub request_ms: u64,
    /// Candidate fetch sub-deadline
    pub upstream_ms: u64,
    /// Remote cache get budget
    pub cache_get_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            upstream_ms: 5_000,
            cache_get_ms: 200,
        }
    }
}

impl TimeoutConfig {
    /// Whole-request deadline
    #[inline]
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    /// Candidate fetch sub-deadline
    #[inline]
    #[must_use]
    pub fn upstream(&self) -> Duration {
        Duration::from_millis(self.upstream_ms)
    }

    /// Remote cache get budget
    #[inline]
    #[must_use]
    pub fn cache_get(&self) -> Duration {
        Duration::from_millis(self.cache_get_ms)
    }
}

/// Candidate fetch sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FetchConfig {
    /// Candidates fetched per requested slot, at most 3
    pub over_fetch_factor: u32,
    /// Hard cap on one fetch
    pub max_candidates: usize,
    /// History window for personal context
    pub recent_window_days: u32,
    /// Creation window for the trending candidate set
    pub trending_window_days: u32,
    /// Largest page size accepted
    pub max_limit: u32,
    /// Largest offset accepted
    pub max_offset: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: MAX_OVER_FETCH,
            max_candidates: 300,
            recent_window_days: 7,
            trending_window_days: 30,
            max_limit: 100,
            max_offset: 1_000,
        }
    }
}

/// Cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Fresh and stale TTL per key prefix
    pub ttl: CacheTtlTable,
    /// Entries per layer
    pub capacity: usize,
    /// Page cycles remembered by the deduplicator
    pub max_cycles: u64,
    /// Safety-net lifetime of an unended page cycle
    pub cycle_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: CacheTtlTable::default(),
            capacity: 10_000,
            max_cycles: 10_000,
            cycle_ttl_secs: 60,
        }
    }
}

/// Whole engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Kernel weights, multipliers and floors
    pub scoring: ScoringConfig,
    /// Cache TTLs and sizing
    pub cache: CacheConfig,
    /// Bot signals and rate limits
    pub gate: GateConfig,
    /// Deadlines
    pub timeouts: TimeoutConfig,
    /// Push delivery
    pub bus: BusConfig,
    /// Candidate fetch sizing
    pub fetch: FetchConfig,
    /// Interaction store windows
    pub store: StoreConfig,
}

impl EngineConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and validate a TOML file
    ///
    /// # Errors
    /// Unreadable file, malformed TOML or a failed validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Malformed TOML or a failed validation.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Values TOML cannot represent.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    /// The first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        self.gate.rate_limits.validate()?;
        if self.fetch.over_fetch_factor == 0 || self.fetch.over_fetch_factor > MAX_OVER_FETCH {
            return Err(ConfigError::Invalid(format!(
                "fetch.overFetchFactor must be within 1..={MAX_OVER_FETCH}, got {}",
                self.fetch.over_fetch_factor
            )));
        }
        if self.fetch.recent_window_days == 0 || self.fetch.trending_window_days == 0 {
            return Err(ConfigError::Invalid("fetch windows must be at least one day".into()));
        }
        if self.fetch.max_limit == 0 || self.fetch.max_candidates == 0 {
            return Err(ConfigError::Invalid("fetch limits must be positive".into()));
        }
        if self.timeouts.request_ms == 0 || self.timeouts.upstream_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.timeouts.upstream_ms > self.timeouts.request_ms {
            return Err(ConfigError::Invalid(
                "timeouts.upstreamMs exceeds timeouts.requestMs".into(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be positive".into()));
        }
        if self.bus.queue_capacity == 0 {
            return Err(ConfigError::Invalid("bus.queueCapacity must be positive".into()));
        }
        if self.store.unique_viewer_window_days <= 0 || self.store.recent_window_days == 0 {
            return Err(ConfigError::Invalid("store windows must be at least one day".into()));
        }
        Ok(())
    }

    /// With scoring section
    #[inline]
    #[must_use]
    pub fn with_scoring(mut self, scoring: ScoringConfig) -> Self {
        self.scoring = scoring;
        self
    }

    /// With gate section
    #[inline]
    #[must_use]
    pub fn with_gate(mut self, gate: GateConfig) -> Self {
        self.gate = gate;
        self
    }

    /// With cache TTL table
    #[inline]
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: CacheTtlTable) -> Self {
        self.cache.ttl = ttl;
        self
    }

    /// With timeouts
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// With fetch sizing
    #[inline]
    #[must_use]
    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    /// With bus tuning
    #[inline]
    #[must_use]
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Not representable as TOML
    #[error("cannot render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    /// Kernel section rejected
    #[error("scoring: {0}")]
    Scoring(#[from] ScoringConfigError),

    /// Gate section rejected
    #[error("gate: {0}")]
    Gate(#[from] GateError),

    /// Cross-field constraint violated
    #[error("{0}")]
    Invalid(String),
}

impl From<ConfigError> for BazaarError {
    fn from(err: ConfigError) -> Self {
        BazaarError::Validation(err.to_string())
    }
}
