//! Cache configuration system for user-configurable cache sizes and locations.
//!
//! Provides a centralized configuration for all cache tiers (array pool,
//! buffer pool, resource cache, disk cache). Configuration can be loaded
//! from a file, environment variables, or created programmatically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Configuration for the cache system.
///
/// User-configurable budgets for the in-memory tiers and the disk cache,
/// plus the disk cache location.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Array reuse pool budget in bytes
    pub array_pool_size: usize,
    /// Pixel buffer pool budget in bytes
    pub buffer_pool_size: usize,
    /// Decoded resource cache budget in bytes
    pub resource_cache_size: usize,
    /// Disk cache budget in bytes
    pub disk_cache_size: u64,
    /// Directory path for disk cache storage
    pub disk_cache_dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            array_pool_size: 4 * 1024 * 1024,       // 4 MB
            buffer_pool_size: 64 * 1024 * 1024,     // 64 MB
            resource_cache_size: 256 * 1024 * 1024, // 256 MB
            disk_cache_size: 250 * 1024 * 1024,     // 250 MB
            disk_cache_dir: Self::default_cache_dir(),
        }
    }
}

impl CacheConfig {
    /// Sets the array pool budget in megabytes.
    pub fn with_array_pool_mb(mut self, mb: usize) -> Self {
        self.array_pool_size = mb * 1024 * 1024;
        self
    }

    /// Sets the buffer pool budget in megabytes.
    pub fn with_buffer_pool_mb(mut self, mb: usize) -> Self {
        self.buffer_pool_size = mb * 1024 * 1024;
        self
    }

    /// Sets the resource cache budget in megabytes.
    pub fn with_resource_cache_mb(mut self, mb: usize) -> Self {
        self.resource_cache_size = mb * 1024 * 1024;
        self
    }

    /// Sets the disk cache budget in megabytes.
    pub fn with_disk_cache_mb(mut self, mb: u64) -> Self {
        self.disk_cache_size = mb * 1024 * 1024;
        self
    }

    /// Sets the disk cache directory.
    pub fn with_disk_cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.disk_cache_dir = path.as_ref().to_path_buf();
        self
    }

    /// Returns the default cache directory for the current platform.
    ///
    /// - macOS: ~/Library/Caches/imgpipe/blobs
    /// - Linux: ~/.cache/imgpipe/blobs
    /// - Windows: %LOCALAPPDATA%\imgpipe\blobs
    pub fn default_cache_dir() -> PathBuf {
        if let Some(cache_dir) = dirs::cache_dir() {
            cache_dir.join("imgpipe").join("blobs")
        } else {
            // Fallback to current directory if cache dir unavailable
            PathBuf::from("cache/blobs")
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `IMGPIPE_ARRAY_POOL_MB`: array pool budget in MB (default: 4)
    /// - `IMGPIPE_BUFFER_POOL_MB`: buffer pool budget in MB (default: 64)
    /// - `IMGPIPE_RESOURCE_CACHE_MB`: resource cache budget in MB (default: 256)
    /// - `IMGPIPE_DISK_CACHE_MB`: disk cache budget in MB (default: 250)
    /// - `IMGPIPE_CACHE_DIR`: disk cache directory path
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("IMGPIPE_ARRAY_POOL_MB") {
            config.array_pool_size = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("IMGPIPE_ARRAY_POOL_MB".to_string()))?
                * 1024
                * 1024;
        }

        if let Ok(val) = std::env::var("IMGPIPE_BUFFER_POOL_MB") {
            config.buffer_pool_size = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("IMGPIPE_BUFFER_POOL_MB".to_string()))?
                * 1024
                * 1024;
        }

        if let Ok(val) = std::env::var("IMGPIPE_RESOURCE_CACHE_MB") {
            config.resource_cache_size = val
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue("IMGPIPE_RESOURCE_CACHE_MB".to_string()))?
                * 1024
                * 1024;
        }

        if let Ok(val) = std::env::var("IMGPIPE_DISK_CACHE_MB") {
            config.disk_cache_size = val
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidValue("IMGPIPE_DISK_CACHE_MB".to_string()))?
                * 1024
                * 1024;
        }

        if let Ok(val) = std::env::var("IMGPIPE_CACHE_DIR") {
            config.disk_cache_dir = PathBuf::from(val);
        }

        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// array_pool_mb = 4
    /// buffer_pool_mb = 64
    /// resource_cache_mb = 256
    /// disk_cache_mb = 250
    /// disk_cache_dir = "/path/to/cache"
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref()).map_err(ConfigError::IoError)?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for line in toml_str.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');

                match key {
                    "array_pool_mb" => {
                        config.array_pool_size = value
                            .parse::<usize>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?
                            * 1024
                            * 1024;
                    }
                    "buffer_pool_mb" => {
                        config.buffer_pool_size = value
                            .parse::<usize>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?
                            * 1024
                            * 1024;
                    }
                    "resource_cache_mb" => {
                        config.resource_cache_size = value
                            .parse::<usize>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?
                            * 1024
                            * 1024;
                    }
                    "disk_cache_mb" => {
                        config.disk_cache_size = value
                            .parse::<u64>()
                            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?
                            * 1024
                            * 1024;
                    }
                    "disk_cache_dir" => {
                        config.disk_cache_dir = PathBuf::from(value);
                    }
                    _ => {} // Ignore unknown keys
                }
            }
        }

        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let toml = self.to_toml();
        fs::write(path.as_ref(), toml).map_err(ConfigError::IoError)
    }

    /// Converts configuration to TOML format.
    fn to_toml(&self) -> String {
        format!(
            "# imgpipe cache configuration\n\
             array_pool_mb = {}\n\
             buffer_pool_mb = {}\n\
             resource_cache_mb = {}\n\
             disk_cache_mb = {}\n\
             disk_cache_dir = \"{}\"\n",
            self.array_pool_size / (1024 * 1024),
            self.buffer_pool_size / (1024 * 1024),
            self.resource_cache_size / (1024 * 1024),
            self.disk_cache_size / (1024 * 1024),
            self.disk_cache_dir.display()
        )
    }

    /// Returns the array pool budget in megabytes.
    pub fn array_pool_mb(&self) -> usize {
        self.array_pool_size / (1024 * 1024)
    }

    /// Returns the buffer pool budget in megabytes.
    pub fn buffer_pool_mb(&self) -> usize {
        self.buffer_pool_size / (1024 * 1024)
    }

    /// Returns the resource cache budget in megabytes.
    pub fn resource_cache_mb(&self) -> usize {
        self.resource_cache_size / (1024 * 1024)
    }

    /// Returns the disk cache budget in megabytes.
    pub fn disk_cache_mb(&self) -> u64 {
        self.disk_cache_size / (1024 * 1024)
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    InvalidValue(String),
    /// I/O error reading or writing configuration file
    IoError(io::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(key) => {
                write!(f, "Invalid value for configuration key: {}", key)
            }
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
