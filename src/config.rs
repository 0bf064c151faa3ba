//! Configuration management for the memory fabric
//!
//! All configurable parameters in one place with environment variable
//! overrides. Sensible defaults, configurable in production.

use std::env;
use std::path::PathBuf;
use tracing::info;

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins (empty = allow all)
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
        }
    }
}

impl CorsConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(origins) = env::var("FABRIC_CORS_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        config
    }

    pub fn is_restricted(&self) -> bool {
        !self.allowed_origins.is_empty()
    }

    /// Convert to tower-http CorsLayer
    pub fn to_layer(&self) -> tower_http::cors::CorsLayer {
        use tower_http::cors::{AllowOrigin, Any, CorsLayer};

        let mut layer = CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any);

        if self.allowed_origins.is_empty() {
            layer = layer.allow_origin(Any);
        } else {
            let mut valid_origins = Vec::new();
            for origin_str in &self.allowed_origins {
                match origin_str.parse::<axum::http::HeaderValue>() {
                    Ok(origin) => valid_origins.push(origin),
                    Err(_) => tracing::warn!("CORS: invalid origin '{}' - skipping", origin_str),
                }
            }
            layer = layer.allow_origin(AllowOrigin::list(valid_origins));
        }

        layer
    }
}

/// Server configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// Server host address (default: 127.0.0.1)
    pub host: String,

    /// Server port (default: 3040)
    pub port: u16,

    /// Storage path for the RocksDB ledger (default: ./memfabric_data)
    pub storage_path: PathBuf,

    /// Risk score at which MemGuard quarantines content (default: 0.7)
    pub quarantine_threshold: f32,

    /// Strict capability coverage: refuse recall/consolidate when any
    /// declared capability lacks a healthy provider (default: false)
    pub strict_coverage: bool,

    /// Default recall latency budget in milliseconds (default: 800)
    pub recall_budget_ms: u32,

    /// Rate limit: requests per second (default: 2000)
    pub rate_limit_per_second: u64,

    /// Rate limit: burst size (default: 4000)
    pub rate_limit_burst: u32,

    /// Maximum concurrent requests (default: 200)
    pub max_concurrent_requests: usize,

    /// Interval between nightly consolidator cycles in seconds
    /// (default: 86400; lowered in tests)
    pub consolidation_interval_secs: u64,

    /// Path to an external benchmark runner executable, if deployed
    pub benchmark_runner: Option<PathBuf>,

    /// Whether running in production mode
    pub is_production: bool,

    /// CORS configuration
    pub cors: CorsConfig,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3040,
            storage_path: PathBuf::from("./memfabric_data"),
            quarantine_threshold: crate::constants::DEFAULT_QUARANTINE_THRESHOLD,
            strict_coverage: false,
            recall_budget_ms: crate::constants::DEFAULT_RECALL_BUDGET_MS,
            rate_limit_per_second: 2000,
            rate_limit_burst: 4000,
            max_concurrent_requests: 200,
            consolidation_interval_secs: 86_400,
            benchmark_runner: None,
            is_production: false,
            cors: CorsConfig::default(),
        }
    }
}

impl FabricConfig {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.is_production = env::var("FABRIC_ENV")
            .map(|v| {
                let v = v.to_lowercase();
                v == "production" || v == "prod"
            })
            .unwrap_or(false);

        if let Ok(val) = env::var("FABRIC_HOST") {
            config.host = val;
        }

        if let Ok(val) = env::var("FABRIC_PORT") {
            if let Ok(port) = val.parse() {
                config.port = port;
            }
        }

        if let Ok(val) = env::var("FABRIC_STORAGE_PATH") {
            config.storage_path = PathBuf::from(val);
        }

        if let Ok(val) = env::var("FABRIC_QUARANTINE_THRESHOLD") {
            if let Ok(n) = val.parse::<f32>() {
                config.quarantine_threshold = n.clamp(0.45, 1.0);
            }
        }

        if let Ok(val) = env::var("FABRIC_STRICT_COVERAGE") {
            config.strict_coverage = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("FABRIC_RECALL_BUDGET_MS") {
            if let Ok(n) = val.parse::<u32>() {
                config.recall_budget_ms = n.clamp(100, 3000);
            }
        }

        if let Ok(val) = env::var("FABRIC_RATE_LIMIT") {
            if let Ok(n) = val.parse() {
                config.rate_limit_per_second = n;
            }
        }

        if let Ok(val) = env::var("FABRIC_RATE_BURST") {
            if let Ok(n) = val.parse() {
                config.rate_limit_burst = n;
            }
        }

        if let Ok(val) = env::var("FABRIC_MAX_CONCURRENT") {
            if let Ok(n) = val.parse() {
                config.max_concurrent_requests = n;
            }
        }

        if let Ok(val) = env::var("FABRIC_CONSOLIDATION_INTERVAL") {
            if let Ok(n) = val.parse() {
                config.consolidation_interval_secs = n;
            }
        }

        if let Ok(val) = env::var("FABRIC_BENCHMARK_RUNNER") {
            if !val.is_empty() {
                config.benchmark_runner = Some(PathBuf::from(val));
            }
        }

        config.cors = CorsConfig::from_env();

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!(
            "   Mode: {}",
            if self.is_production {
                "PRODUCTION"
            } else {
                "Development"
            }
        );
        info!("   Listen: {}:{}", self.host, self.port);
        info!("   Storage: {:?}", self.storage_path);
        info!("   Quarantine threshold: {:.2}", self.quarantine_threshold);
        info!(
            "   Capability coverage: {}",
            if self.strict_coverage { "strict" } else { "base" }
        );
        info!("   Recall budget: {}ms", self.recall_budget_ms);
        info!(
            "   Rate limit: {} req/sec (burst: {})",
            self.rate_limit_per_second, self.rate_limit_burst
        );
        info!("   Max concurrent: {}", self.max_concurrent_requests);
        info!(
            "   Consolidation interval: {}s",
            self.consolidation_interval_secs
        );
        match &self.benchmark_runner {
            Some(path) => info!("   Benchmark runner: {:?}", path),
            None => info!("   Benchmark runner: none (proxy estimates only)"),
        }
        if self.cors.is_restricted() {
            info!("   CORS origins: {:?}", self.cors.allowed_origins);
        } else {
            info!("   CORS: permissive (all origins allowed)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FabricConfig::default();
        assert_eq!(config.port, 3040);
        assert!(!config.strict_coverage);
        assert!(!config.is_production);
        assert_eq!(config.recall_budget_ms, 800);
    }

    #[test]
    fn test_env_override() {
        env::set_var("FABRIC_PORT", "8080");
        env::set_var("FABRIC_STRICT_COVERAGE", "true");

        let config = FabricConfig::from_env();
        assert_eq!(config.port, 8080);
        assert!(config.strict_coverage);

        env::remove_var("FABRIC_PORT");
        env::remove_var("FABRIC_STRICT_COVERAGE");
    }

    #[test]
    fn test_cors_default_is_permissive() {
        let cors = CorsConfig::default();
        assert!(!cors.is_restricted());
        let _layer = cors.to_layer(); // Should not panic
    }
}
