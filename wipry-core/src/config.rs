//! Runtime configuration for the acquisition core.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Product id of the WiPry Clarity accessory.
pub const DEFAULT_PRODUCT_ID: u16 = 0x0C1A;

/// Challenge secret shipped with accessory firmware.
pub const DEFAULT_SHARED_SECRET: &str = "wipry-clarity-accessory";

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub transport: TransportConfig,
    pub parser: ParserConfig,
    pub shutdown: ShutdownConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Stream read settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bytes requested per stream read.
    pub read_chunk_size: usize,
    /// Upper bound on a single blocking read, in milliseconds.
    pub read_timeout_ms: u64,
    /// Raw chunks buffered between reader and parser before the oldest
    /// is evicted.
    pub queue_capacity: usize,
}

/// Frame parser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Beacon containers declaring more than this are treated as corrupt.
    pub max_container_len: usize,
    /// How long the parser waits for a chunk before rechecking for stop.
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Longest wait for a worker thread to exit before it is detached.
    pub join_timeout_ms: u64,
}

/// Accessory authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub shared_secret: String,
    /// Accessories whose `Identify` reply carries another id are rejected.
    pub supported_product_ids: Vec<u16>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, used when `RUST_LOG` is unset.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: 16 * 1024,
            read_timeout_ms: 50,
            queue_capacity: 32,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_container_len: crate::codec::DEFAULT_MAX_CONTAINER_LEN,
            poll_interval_ms: 20,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 2000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shared_secret: DEFAULT_SHARED_SECRET.into(),
            supported_product_ids: vec![DEFAULT_PRODUCT_ID],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Durations ────────────────────────────────────────────────────

impl TransportConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

impl ParserConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl ShutdownConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CoreConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&CoreConfig::default()).unwrap();
        assert!(text.contains("queue_capacity"));
        assert!(text.contains("supported_product_ids"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let cfg = CoreConfig::from_toml_str(
            "[transport]\nqueue_capacity = 4\n\n[auth]\nsupported_product_ids = [1, 2]\n",
        )
        .unwrap();
        assert_eq!(cfg.transport.queue_capacity, 4);
        assert_eq!(cfg.transport.read_chunk_size, 16 * 1024);
        assert_eq!(cfg.auth.supported_product_ids, vec![1, 2]);
        assert_eq!(cfg.auth.shared_secret, DEFAULT_SHARED_SECRET);
        assert_eq!(cfg.shutdown.join_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = CoreConfig::load(Path::new("/nonexistent/wipry-core.toml"));
        assert_eq!(cfg.parser.poll_interval_ms, 20);
    }

    #[test]
    fn write_default_roundtrips() {
        let path = std::env::temp_dir().join(format!("wipry-core-{}.toml", std::process::id()));
        CoreConfig::write_default(&path).unwrap();
        let cfg = CoreConfig::load(&path);
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.auth.supported_product_ids, vec![DEFAULT_PRODUCT_ID]);
    }
}
