//! Config schema. All sections default so a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub gateway: GatewayConfig,
    pub sandbox: SandboxConfig,
    pub store: StoreConfig,
    pub watch: WatchConfig,
    pub transport: TransportConfig,
    pub probe: ProbeConfig,
    pub monitor: MonitorConfig,
    pub failover: FailoverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for non-streaming requests (backup launches included).
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            request_timeout_secs: 180,
            max_body_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxProvider {
    E2b,
    Docker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub provider: SandboxProvider,
    pub e2b_api_key: String,
    /// Root of the user project inside every sandbox.
    pub project_root: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            provider: SandboxProvider::E2b,
            e2b_api_key: String::new(),
            project_root: "/home/user/project".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.zerobuild/liveness.db".to_string(),
        }
    }
}

/// One step of the polling schedule: poll every `interval_secs` for `ticks`
/// ticks. The last step repeats forever and its `ticks` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffStep {
    pub interval_secs: u64,
    pub ticks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory inside the sandbox holding the polling watermark files.
    pub marker_dir: String,
    pub tick_timeout_secs: u64,
    pub channel_capacity: usize,
    pub backoff: Vec<BackoffStep>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            marker_dir: "/tmp".to_string(),
            tick_timeout_secs: 30,
            channel_capacity: 256,
            backoff: vec![
                BackoffStep { interval_secs: 5, ticks: 6 },
                BackoffStep { interval_secs: 15, ticks: 6 },
                BackoffStep { interval_secs: 30, ticks: 0 },
            ],
        }
    }
}

impl WatchConfig {
    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub heartbeat_secs: u64,
    /// Frames buffered per connection before the watcher side waits.
    pub frame_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            frame_buffer: 64,
        }
    }
}

impl TransportConfig {
    /// Never shorter than one second.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub fetch_timeout_secs: u64,
    pub port_check_timeout_ms: u64,
    /// Case-insensitive text fragments that mark a tunnel error page.
    pub failure_signatures: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 5,
            port_check_timeout_ms: 5_000,
            failure_signatures: crate::health::signatures::DEFAULT_SIGNATURES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl ProbeConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl MonitorConfig {
    /// Never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub primary_port: u16,
    pub backup_port: u16,
    /// Dev server command; `{port}` is substituted.
    pub dev_command: String,
    /// Frees the backup port before a restart; `{port}` is substituted.
    pub cleanup_command: String,
    pub ready_timeout_secs: u64,
    pub ready_poll_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            primary_port: 3000,
            backup_port: 3001,
            dev_command: "npm run dev -- --port {port} --hostname 0.0.0.0".to_string(),
            cleanup_command:
                "fuser -k {port}/tcp >/dev/null 2>&1 || pkill -f -- '--port {port}' || true"
                    .to_string(),
            ready_timeout_secs: 90,
            ready_poll_ms: 3_000,
        }
    }
}

impl FailoverConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }
}
