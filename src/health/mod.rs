//! Tunnel health: probing, the per-session monitor loop and failover.

pub mod failover;
pub mod launcher;
pub mod monitor;
pub mod port;
pub mod probe;
pub mod signatures;
pub mod state;

pub use failover::{BackupTrigger, FailoverController, FailoverError, FailoverOutcome, SandboxBackup};
pub use launcher::{BackupEndpoint, BackupLauncher};
pub use monitor::{CheckOutcome, HealthProbe, HealthSession, MonitorEvent, MonitorHandle, SandboxProbe};
pub use probe::{ProbeReport, TunnelProbe};
pub use signatures::FailureSignatures;
pub use state::{Endpoint, FailoverAction, HealthState, MonitorPhase, ServerStatus, TunnelStatus};
