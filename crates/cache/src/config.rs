//! Cache configuration for budgets, eviction floors and the disk tier location.
//!
//! Configuration can be loaded from a file, environment variables, or created
//! programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

const MB: usize = 1024 * 1024;

/// Configuration for the image cache.
///
/// The in-memory budget is derived: `max_bytes = memory_ceiling * memory_fraction`
/// and `trim_target_bytes = max_bytes * trim_fraction`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Share of the memory ceiling the decoded-image cache may use
    pub memory_fraction: f64,
    /// Share of the budget that eviction of unpinned variants aims for
    pub trim_fraction: f64,
    /// Pinned variants that always survive eviction
    pub min_pinned_alive: usize,
    /// Memory the process may use, in bytes
    pub memory_ceiling: usize,
    /// Disk cache size limit in bytes
    pub disk_cache_size: usize,
    /// Disk cache level reached after a trim, in bytes
    pub disk_trim_size: usize,
    /// Directory path for disk cache storage
    pub disk_cache_dir: PathBuf,
    /// Decode worker threads
    pub decode_workers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_fraction: 0.125,
            trim_fraction: 0.5,
            min_pinned_alive: 1,
            memory_ceiling: detect_memory_ceiling(),
            disk_cache_size: 10 * MB,
            disk_trim_size: 4 * MB,
            disk_cache_dir: Self::default_cache_dir(),
            decode_workers: default_decode_workers(),
        }
    }
}

impl CacheConfig {
    /// Sets the share of the memory ceiling used by the cache, clamped into (0, 1].
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = clamp_fraction(fraction);
        self
    }

    /// Sets the trim target as a share of the budget, clamped into (0, 1].
    pub fn with_trim_fraction(mut self, fraction: f64) -> Self {
        self.trim_fraction = clamp_fraction(fraction);
        self
    }

    /// Sets the number of pinned variants eviction never goes below.
    pub fn with_min_pinned_alive(mut self, count: usize) -> Self {
        self.min_pinned_alive = count;
        self
    }

    /// Sets the memory ceiling in bytes.
    pub fn with_memory_ceiling(mut self, bytes: usize) -> Self {
        self.memory_ceiling = bytes;
        self
    }

    /// Sets the memory ceiling in megabytes.
    pub fn with_memory_ceiling_mb(self, mb: usize) -> Self {
        self.with_memory_ceiling(mb * MB)
    }

    /// Sets the disk cache size in megabytes.
    pub fn with_disk_mb(mut self, mb: usize) -> Self {
        self.disk_cache_size = mb * MB;
        self
    }

    /// Sets the disk trim level in megabytes.
    pub fn with_disk_trim_mb(mut self, mb: usize) -> Self {
        self.disk_trim_size = mb * MB;
        self
    }

    /// Sets the disk cache directory.
    pub fn with_disk_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.disk_cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Sets the number of decode workers (at least one).
    pub fn with_decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = workers.max(1);
        self
    }

    /// In-memory budget ceiling in bytes.
    pub fn max_bytes(&self) -> usize {
        (self.memory_ceiling as f64 * self.memory_fraction) as usize
    }

    /// Level eviction of unpinned variants aims for, in bytes.
    pub fn trim_target_bytes(&self) -> usize {
        (self.max_bytes() as f64 * self.trim_fraction) as usize
    }

    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/imagine/blobs
    /// - Linux: ~/.cache/imagine/blobs
    /// - Windows: %LOCALAPPDATA%\imagine\blobs
    pub fn default_cache_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("imagine").join("blobs")
        } else {
            PathBuf::from("cache/blobs")
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `IMAGINE_MEMORY_FRACTION`: share of the memory ceiling (default: 0.125)
    /// - `IMAGINE_TRIM_FRACTION`: trim target share of the budget (default: 0.5)
    /// - `IMAGINE_MIN_PINNED_ALIVE`: pinned eviction floor (default: 1)
    /// - `IMAGINE_MEMORY_CEILING_MB`: memory ceiling in MB (default: detected)
    /// - `IMAGINE_DISK_CACHE_MB`: disk cache size in MB (default: 10)
    /// - `IMAGINE_DISK_TRIM_MB`: disk trim level in MB (default: 4)
    /// - `IMAGINE_CACHE_DIR`: disk cache directory path
    /// - `IMAGINE_DECODE_WORKERS`: decode threads (default: available parallelism)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let pairs = [
            ("IMAGINE_MEMORY_FRACTION", "memory_fraction"),
            ("IMAGINE_TRIM_FRACTION", "trim_fraction"),
            ("IMAGINE_MIN_PINNED_ALIVE", "min_pinned_alive"),
            ("IMAGINE_MEMORY_CEILING_MB", "memory_ceiling_mb"),
            ("IMAGINE_DISK_CACHE_MB", "disk_cache_mb"),
            ("IMAGINE_DISK_TRIM_MB", "disk_trim_mb"),
            ("IMAGINE_CACHE_DIR", "disk_cache_dir"),
            ("IMAGINE_DECODE_WORKERS", "decode_workers"),
        ];

        for (var, key) in pairs {
            if let Ok(value) = std::env::var(var) {
                config.apply(key, &value).map_err(|err| err.renamed(var))?;
            }
        }

        Ok(config)
    }

    /// Loads configuration from a `key = value` file.
    ///
    /// Expected file format:
    /// ```text
    /// memory_fraction = 0.125
    /// trim_fraction = 0.5
    /// min_pinned_alive = 1
    /// memory_ceiling_mb = 8192
    /// disk_cache_mb = 10
    /// disk_trim_mb = 4
    /// disk_cache_dir = "/path/to/cache"
    /// decode_workers = 4
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::parse(&contents)
    }

    /// Parses configuration from `key = value` lines; unknown keys are ignored.
    fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                config.apply(key.trim(), value.trim().trim_matches('"'))?;
            }
        }

        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "memory_fraction" => self.memory_fraction = parse_fraction(key, value)?,
            "trim_fraction" => self.trim_fraction = parse_fraction(key, value)?,
            "min_pinned_alive" => self.min_pinned_alive = parse_value(key, value)?,
            "memory_ceiling_mb" => self.memory_ceiling = parse_value::<usize>(key, value)? * MB,
            "disk_cache_mb" => self.disk_cache_size = parse_value::<usize>(key, value)? * MB,
            "disk_trim_mb" => self.disk_trim_size = parse_value::<usize>(key, value)? * MB,
            "disk_cache_dir" => self.disk_cache_dir = PathBuf::from(value),
            "decode_workers" => self.decode_workers = parse_value::<usize>(key, value)?.max(1),
            _ => {}
        }
        Ok(())
    }

    /// Saves configuration to a `key = value` file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.render())?;
        Ok(())
    }

    fn render(&self) -> String {
        format!(
            "# Imagine cache configuration\n\
             memory_fraction = {}\n\
             trim_fraction = {}\n\
             min_pinned_alive = {}\n\
             memory_ceiling_mb = {}\n\
             disk_cache_mb = {}\n\
             disk_trim_mb = {}\n\
             disk_cache_dir = \"{}\"\n\
             decode_workers = {}\n",
            self.memory_fraction,
            self.trim_fraction,
            self.min_pinned_alive,
            self.memory_ceiling / MB,
            self.disk_cache_size / MB,
            self.disk_trim_size / MB,
            self.disk_cache_dir.display(),
            self.decode_workers,
        )
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Value could not be parsed
    #[error("invalid value for configuration key {0}")]
    InvalidValue(String),

    /// Fraction outside (0, 1]
    #[error("{key} must be in (0, 1], got {value}")]
    OutOfRange { key: String, value: f64 },

    /// I/O error reading or writing the configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConfigError {
    fn renamed(self, name: &str) -> Self {
        match self {
            ConfigError::InvalidValue(_) => ConfigError::InvalidValue(name.to_string()),
            ConfigError::OutOfRange { value, .. } => ConfigError::OutOfRange {
                key: name.to_string(),
                value,
            },
            other => other,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_fraction(key: &str, value: &str) -> Result<f64, ConfigError> {
    let fraction: f64 = parse_value(key, value)?;
    if fraction > 0.0 && fraction <= 1.0 {
        Ok(fraction)
    } else {
        Err(ConfigError::OutOfRange {
            key: key.to_string(),
            value: fraction,
        })
    }
}

fn clamp_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        return 1.0;
    }
    fraction.clamp(f64::MIN_POSITIVE, 1.0)
}

fn default_decode_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Total system memory in bytes.
///
/// - **Linux**: parses `MemTotal` from `/proc/meminfo`
/// - **Other platforms**: 8 GiB
#[cfg(target_os = "linux")]
pub fn detect_memory_ceiling() -> usize {
    if let Ok(content) = fs::read_to_string("/proc/meminfo") {
        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                // Format: "MemTotal:       16384000 kB"
                if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<usize>) {
                    return kb * 1024;
                }
            }
        }
    }

    fallback_memory_ceiling()
}

#[cfg(not(target_os = "linux"))]
pub fn detect_memory_ceiling() -> usize {
    fallback_memory_ceiling()
}

const fn fallback_memory_ceiling() -> usize {
    8 * 1024 * 1024 * 1024
}
