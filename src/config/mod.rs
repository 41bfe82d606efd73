// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{ResourceError, Result};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Config file (explicit path, else `~/.ocr-resources/config.toml`)
    /// 3. Defaults (lowest)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_source = match path {
            Some(p) => File::from(p.to_path_buf()).required(true),
            None => File::with_name(&Self::default_config_path()).required(false),
        };

        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(file_source)
            // Override with environment variables, e.g. OCR_RESOURCES_POOL__MAX_WORKERS=2
            .add_source(
                Environment::with_prefix("OCR_RESOURCES")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ResourceError::Config(e.to_string()))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| ResourceError::Config(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Rejects combinations the monitor and pool cannot work with.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        for (name, value) in [
            ("memory_warning_threshold", limits.memory_warning_threshold),
            ("memory_critical_threshold", limits.memory_critical_threshold),
            ("gc_threshold", limits.gc_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ResourceError::Config(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }

        if limits.memory_warning_threshold >= limits.memory_critical_threshold {
            return Err(ResourceError::Config(format!(
                "memory_warning_threshold ({}) must be below memory_critical_threshold ({})",
                limits.memory_warning_threshold, limits.memory_critical_threshold
            )));
        }

        check_positive("max_memory_mb", limits.max_memory_mb)?;
        check_seconds("max_processing_time_secs", limits.max_processing_time_secs, false)?;

        if limits.max_concurrent_requests == 0 {
            return Err(ResourceError::Config(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }

        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.pool.max_workers) {
            return Err(ResourceError::Config(format!(
                "max_workers must be between {} and {}, got {}",
                MIN_WORKERS, MAX_WORKERS, self.pool.max_workers
            )));
        }

        if self.pool.max_queue_size == 0 {
            return Err(ResourceError::Config("max_queue_size must be at least 1".to_string()));
        }
        check_positive("pool.max_memory_mb", self.pool.max_memory_mb)?;
        check_seconds("worker_timeout_secs", self.pool.worker_timeout_secs, false)?;
        check_seconds("shutdown_grace_secs", self.pool.shutdown_grace_secs, true)?;

        let cache = &self.optimization;
        for (name, size) in [
            ("model_cache_size", cache.model_cache_size),
            ("result_cache_size", cache.result_cache_size),
            ("preprocessing_cache_size", cache.preprocessing_cache_size),
        ] {
            if size == 0 {
                return Err(ResourceError::Config(format!("{} must be at least 1", name)));
            }
        }
        check_seconds("cache_ttl_hours", cache.cache_ttl_hours * 3600.0, false)?;
        check_positive("model_cache_memory_mb", cache.model_cache_memory_mb)?;
        for (name, mb) in [
            ("large_object_threshold_mb", cache.large_object_threshold_mb),
            ("default_model_size_mb", cache.default_model_size_mb),
        ] {
            if !(mb.is_finite() && mb >= 0.0) {
                return Err(ResourceError::Config(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, mb
                )));
            }
        }

        Ok(())
    }

    fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ocr-resources")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}

/// Longest time any timeout or TTL may be set to: one year.
const MAX_SETTING_SECS: f64 = 365.0 * 24.0 * 3600.0;

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ResourceError::Config(format!(
            "{} must be a finite positive number, got {}",
            name, value
        )))
    }
}

fn check_seconds(name: &str, secs: f64, allow_zero: bool) -> Result<()> {
    let above_floor = if allow_zero { secs >= 0.0 } else { secs > 0.0 };
    if secs.is_finite() && above_floor && secs <= MAX_SETTING_SECS {
        Ok(())
    } else {
        Err(ResourceError::Config(format!(
            "{} is out of range (up to {} seconds allowed), got {} seconds",
            name, MAX_SETTING_SECS, secs
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.limits.memory_warning_threshold = 0.95;
        config.limits.memory_critical_threshold = 0.9;
        assert!(matches!(config.validate(), Err(ResourceError::Config(_))));
    }

    #[test]
    fn test_worker_bounds_rejected() {
        let mut config = AppConfig::default();
        config.pool.max_workers = 11;
        assert!(config.validate().is_err());
        config.pool.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_helpers() {
        let limits = ResourceLimits {
            max_memory_mb: 1000.0,
            ..ResourceLimits::default()
        };
        assert_eq!(limits.warning_mb(), 800.0);
        assert_eq!(limits.critical_mb(), 950.0);
        assert_eq!(limits.gc_trigger_mb(), 700.0);
    }

    #[test]
    fn test_ttl_from_fractional_hours() {
        assert_eq!(ttl_from_hours(0.001).as_millis(), 3600);
        assert_eq!(ttl_from_hours(24.0).as_secs(), 86_400);
    }

    #[test]
    fn test_duration_helpers_never_panic() {
        assert_eq!(ttl_from_hours(1e300), Duration::MAX);
        assert_eq!(ttl_from_hours(f64::INFINITY), Duration::MAX);
        assert_eq!(ttl_from_hours(f64::NAN), Duration::ZERO);

        let pool = ResourcePool {
            worker_timeout_secs: f64::INFINITY,
            shutdown_grace_secs: -1.0,
            ..ResourcePool::default()
        };
        assert_eq!(pool.worker_timeout(), Duration::MAX);
        assert_eq!(pool.shutdown_grace(), Duration::ZERO);
    }

    #[test]
    fn test_out_of_range_timings_rejected() {
        let mut config = AppConfig::default();
        config.optimization.cache_ttl_hours = 1e300;
        assert!(matches!(config.validate(), Err(ResourceError::Config(_))));

        let mut config = AppConfig::default();
        config.pool.worker_timeout_secs = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pool.shutdown_grace_secs = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pool.shutdown_grace_secs = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_cache_sizes_rejected() {
        let mut config = AppConfig::default();
        config.optimization.result_cache_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.optimization.model_cache_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_budgets_must_be_finite() {
        let mut config = AppConfig::default();
        config.optimization.model_cache_memory_mb = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.optimization.default_model_size_mb = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.pool.max_memory_mb = 0.0;
        assert!(config.validate().is_err());
    }
}
