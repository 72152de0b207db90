//! Recognized cache options, their defaults and clamps.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Cache configuration as read from the host's config layer.
///
/// Field names are the recognized option keys. Call [`Config::clamped`]
/// after deserialization; every bound documented here is applied there.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Enables the on-disk tier and its writer workers.
    pub file_cache_enabled: bool,
    /// Base directory, resolved to an absolute path on use.
    pub cache_root: PathBuf,
    /// Enables the expiring in-memory tier.
    pub memory_cache_enabled: bool,
    pub memory_ttl_hours: f64,
    /// Enables the bounded negative-lookup map.
    pub negative_cache_enabled: bool,
    pub negative_ttl_seconds: u64,
    /// Debounced through a 15-minute per-path window.
    pub update_file_time_on_cache_hit: bool,
    /// Files whose last access precedes `now - ttl` are purged.
    pub file_ttl_hours: f64,
    /// Cleanup timer period; `0` disables the timer.
    pub file_cleanup_period_hours: f64,
    /// Shard depth, clamped to `[1, 3]`.
    pub tiers: usize,
    /// Shard prefix length, clamped to `[1, 4]`.
    pub tier_len: usize,
    /// Per-directory entry count that triggers an operator warning.
    pub cache_warn_at: usize,
    /// Lower bound 1000.
    pub negative_max_entries: usize,
    /// Lower bound 100.
    pub negative_prune_batch: usize,
    /// Clamped to `[32 KiB, 2 MiB]`.
    pub deserialize_max_string_bytes: usize,
    /// Clamped to `[8, 512]` MiB.
    pub deserialize_max_data_mb: usize,
    /// Upstream retry attempts, clamped to `[0, 10]`.
    pub backoff_attempts: u32,
    /// Clamped to `[0, 500]` ms.
    pub backoff_initial_ms: u64,
    /// Clamped to `[initial, 2000]` ms.
    pub backoff_max_ms: u64,
    pub bak_cleanup_enabled: bool,
    /// Clamped to `[1, 168]` hours.
    pub bak_max_age_hours: f64,
    /// Writer pool size, clamped to `[1, 4]`.
    pub writer_workers: usize,
    /// Hit-rate report cadence, in requests.
    pub hit_rate_display: u64,
    /// Weak-tier liveness sample size, lower bound 100.
    pub hit_report_weak_sample_target: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file_cache_enabled: true,
            cache_root: PathBuf::from("c_assetcache"),
            memory_cache_enabled: false,
            memory_ttl_hours: 0.016,
            negative_cache_enabled: true,
            negative_ttl_seconds: 120,
            update_file_time_on_cache_hit: false,
            file_ttl_hours: 48.0,
            file_cleanup_period_hours: 1.0,
            tiers: 1,
            tier_len: 3,
            cache_warn_at: 30_000,
            negative_max_entries: 100_000,
            negative_prune_batch: 5_000,
            deserialize_max_string_bytes: 256 * 1024,
            deserialize_max_data_mb: 64,
            backoff_attempts: 3,
            backoff_initial_ms: 5,
            backoff_max_ms: 40,
            bak_cleanup_enabled: true,
            bak_max_age_hours: 24.0,
            writer_workers: 1,
            hit_rate_display: 100,
            hit_report_weak_sample_target: 2_000,
        }
    }
}

impl Config {
    /// Apply every documented bound.
    pub fn clamped(mut self) -> Self {
        self.tiers = self.tiers.clamp(1, 3);
        self.tier_len = self.tier_len.clamp(1, 4);
        self.negative_max_entries = self.negative_max_entries.max(1_000);
        self.negative_prune_batch = self.negative_prune_batch.max(100);
        self.deserialize_max_string_bytes = self
            .deserialize_max_string_bytes
            .clamp(32 * 1024, 2 * 1024 * 1024);
        self.deserialize_max_data_mb = self.deserialize_max_data_mb.clamp(8, 512);
        self.backoff_attempts = self.backoff_attempts.min(10);
        self.backoff_initial_ms = self.backoff_initial_ms.min(500);
        self.backoff_max_ms = self.backoff_max_ms.clamp(self.backoff_initial_ms, 2_000);
        self.bak_max_age_hours = self.bak_max_age_hours.clamp(1.0, 168.0);
        self.writer_workers = self.writer_workers.clamp(1, 4);
        self.hit_rate_display = self.hit_rate_display.max(1);
        self.hit_report_weak_sample_target = self.hit_report_weak_sample_target.max(100);
        self
    }

    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.memory_ttl_hours.max(0.0) * 3600.0)
    }

    /// Kept in milliseconds internally.
    pub fn negative_ttl(&self) -> Duration {
        Duration::from_millis(self.negative_ttl_seconds * 1_000)
    }

    pub fn file_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.file_ttl_hours.max(0.0) * 3600.0)
    }

    /// `None` when the timer is disabled.
    pub fn cleanup_period(&self) -> Option<Duration> {
        if self.file_cleanup_period_hours > 0.0 {
            Some(Duration::from_secs_f64(
                self.file_cleanup_period_hours * 3600.0,
            ))
        } else {
            None
        }
    }

    pub fn bak_max_age(&self) -> Duration {
        Duration::from_secs_f64(self.bak_max_age_hours * 3600.0)
    }

    pub fn max_data_bytes(&self) -> usize {
        self.deserialize_max_data_mb * 1024 * 1024
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// The cache root, made absolute against the working directory.
    pub fn resolved_root(&self) -> PathBuf {
        if self.cache_root.is_absolute() {
            self.cache_root.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.cache_root))
                .unwrap_or_else(|_| self.cache_root.clone())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let cfg = Config::default();
        assert!(cfg.file_cache_enabled);
        assert!(!cfg.memory_cache_enabled);
        assert!(cfg.negative_cache_enabled);
        assert_eq!(cfg.cache_root, PathBuf::from("c_assetcache"));
        assert_eq!(cfg.negative_ttl(), Duration::from_millis(120_000));
        assert_eq!(cfg.tiers, 1);
        assert_eq!(cfg.tier_len, 3);
        assert_eq!(cfg.writer_workers, 1);
        assert_eq!(cfg.max_data_bytes(), 64 * 1024 * 1024);
    }

    #[test]
    fn clamps_pull_extremes_into_range() {
        let cfg = Config {
            tiers: 9,
            tier_len: 0,
            negative_max_entries: 1,
            negative_prune_batch: 1,
            deserialize_max_string_bytes: 1,
            deserialize_max_data_mb: 100_000,
            backoff_attempts: 99,
            backoff_initial_ms: 10_000,
            backoff_max_ms: 1,
            bak_max_age_hours: 0.0,
            writer_workers: 64,
            hit_rate_display: 0,
            hit_report_weak_sample_target: 3,
            ..Config::default()
        }
        .clamped();

        assert_eq!(cfg.tiers, 3);
        assert_eq!(cfg.tier_len, 1);
        assert_eq!(cfg.negative_max_entries, 1_000);
        assert_eq!(cfg.negative_prune_batch, 100);
        assert_eq!(cfg.deserialize_max_string_bytes, 32 * 1024);
        assert_eq!(cfg.deserialize_max_data_mb, 512);
        assert_eq!(cfg.backoff_attempts, 10);
        assert_eq!(cfg.backoff_initial_ms, 500);
        assert_eq!(cfg.backoff_max_ms, 500);
        assert_eq!(cfg.bak_max_age_hours, 1.0);
        assert_eq!(cfg.writer_workers, 4);
        assert_eq!(cfg.hit_rate_display, 1);
        assert_eq!(cfg.hit_report_weak_sample_target, 100);
    }

    #[test]
    fn memory_ttl_is_stored_in_seconds() {
        let cfg = Config::default();
        let secs = cfg.memory_ttl().as_secs_f64();
        assert!((secs - 57.6).abs() < 0.01);
    }

    #[test]
    fn zero_period_disables_the_cleanup_timer() {
        let cfg = Config {
            file_cleanup_period_hours: 0.0,
            ..Config::default()
        };
        assert!(cfg.cleanup_period().is_none());
        assert!(Config::default().cleanup_period().is_some());
    }
}
