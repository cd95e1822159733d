//! Configuration for the liveness service.
//!
//! Loaded from `~/.zerobuild/liveness.toml`; every field has a default so an
//! empty (or missing) file yields a working setup. A handful of environment
//! variables override file values at load time.

pub mod schema;

pub use schema::{
    BackoffStep, FailoverConfig, GatewayConfig, LivenessConfig, MonitorConfig, ProbeConfig,
    SandboxConfig, SandboxProvider, StoreConfig, TransportConfig, WatchConfig,
};

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Default config file location: `~/.zerobuild/liveness.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".zerobuild").join("liveness.toml"))
}

impl LivenessConfig {
    /// Load configuration from `path`, or from the default location when `None`.
    ///
    /// A missing file is not an error: defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                let parsed: LivenessConfig = toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", p.display()))?;
                tracing::debug!("Loaded config from {}", p.display());
                parsed
            }
            _ => LivenessConfig::default(),
        };

        config.apply_env_overrides();
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("E2B_API_KEY") {
            if !key.trim().is_empty() {
                self.sandbox.e2b_api_key = key;
            }
        }
        if let Ok(host) = std::env::var("ZEROBUILD_LIVENESS_HOST") {
            if !host.trim().is_empty() {
                self.gateway.host = host;
            }
        }
        if let Ok(port) = std::env::var("ZEROBUILD_LIVENESS_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.gateway.port = p,
                Err(_) => tracing::warn!("Ignoring invalid ZEROBUILD_LIVENESS_PORT={port}"),
            }
        }
    }

    fn expand_paths(&mut self) -> Result<()> {
        let expanded = shellexpand::full(&self.store.db_path)
            .map_err(|e| anyhow::anyhow!("Failed to expand store.db_path: {e}"))?;
        self.store.db_path = expanded.into_owned();
        Ok(())
    }

    /// Reject settings the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.watch.backoff.is_empty(),
            "watch.backoff must contain at least one step"
        );
        anyhow::ensure!(
            self.watch.backoff.iter().all(|s| s.interval_secs > 0),
            "watch.backoff intervals must be greater than zero"
        );
        anyhow::ensure!(
            self.watch
                .backoff
                .windows(2)
                .all(|w| w[0].interval_secs <= w[1].interval_secs),
            "watch.backoff intervals must be non-decreasing"
        );
        anyhow::ensure!(
            self.watch.channel_capacity > 0,
            "watch.channel_capacity must be greater than zero"
        );
        anyhow::ensure!(
            self.transport.heartbeat_secs > 0,
            "transport.heartbeat_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.monitor.interval_secs > 0,
            "monitor.interval_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.failover.primary_port != self.failover.backup_port,
            "failover.backup_port must differ from failover.primary_port ({})",
            self.failover.primary_port
        );
        anyhow::ensure!(
            self.failover.dev_command.contains("{port}"),
            "failover.dev_command must contain a {{port}} placeholder"
        );
        Ok(())
    }
}
