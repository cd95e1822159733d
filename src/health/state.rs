//! Per-session tunnel health bookkeeping.

use super::failover::FailoverError;
use super::probe::ProbeReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Connected,
    Disconnected,
    Unknown,
}

impl TunnelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelStatus::Connected => "connected",
            TunnelStatus::Disconnected => "disconnected",
            TunnelStatus::Unknown => "unknown",
        }
    }
}

/// Whether the dev server socket is up, as seen from inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Running,
    Stopped,
}

/// A reachable address for a project's dev server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, port: u16) -> Self {
        Self {
            url: url.into(),
            port,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverAction {
    StartBackup,
    CleanupAndRestart,
}

impl FailoverAction {
    pub fn as_str(self) -> &'static str {
        match self {
            FailoverAction::StartBackup => "start_backup",
            FailoverAction::CleanupAndRestart => "cleanup_and_restart",
        }
    }
}

/// Where a monitor session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    /// Waiting for the dev server's initial startup.
    Idle,
    /// Activated, no check completed yet.
    Polling,
    Healthy,
    Degrading,
    Failover,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthState {
    pub primary: Endpoint,
    /// Endpoint probed and advertised right now.
    pub active: Endpoint,
    pub active_ports: BTreeSet<u16>,
    #[serde(rename = "ngrokStatus")]
    pub tunnel_status: BTreeMap<u16, TunnelStatus>,
    pub is_backup_active: bool,
    pub is_starting_backup: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Failover attempts started in this session, successful or not.
    pub failover_attempts: u32,
    pub phase: MonitorPhase,
}

impl HealthState {
    pub fn new(primary: Endpoint) -> Self {
        Self {
            active_ports: BTreeSet::from([primary.port]),
            tunnel_status: BTreeMap::from([(primary.port, TunnelStatus::Unknown)]),
            active: primary.clone(),
            primary,
            is_backup_active: false,
            is_starting_backup: false,
            last_health_check: None,
            consecutive_failures: 0,
            failover_attempts: 0,
            phase: MonitorPhase::Idle,
        }
    }

    /// Fold a probe result for `port` into the state.
    pub fn record_probe(&mut self, port: u16, report: &ProbeReport) {
        self.last_health_check = Some(Utc::now());
        self.tunnel_status.insert(port, report.tunnel_status);
        if report.is_alive {
            self.consecutive_failures = 0;
            if !self.is_starting_backup {
                self.phase = MonitorPhase::Healthy;
            }
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            if !self.is_starting_backup {
                self.phase = MonitorPhase::Degrading;
            }
        }
    }

    /// Claim the single failover slot. The first attempt of a session starts
    /// a backup; later ones tear down whatever a previous attempt left.
    pub fn begin_failover(&mut self) -> Result<FailoverAction, FailoverError> {
        if self.is_starting_backup {
            return Err(FailoverError::AlreadyInProgress);
        }
        let action = if self.is_backup_active || self.failover_attempts > 0 {
            FailoverAction::CleanupAndRestart
        } else {
            FailoverAction::StartBackup
        };
        self.is_starting_backup = true;
        self.failover_attempts = self.failover_attempts.saturating_add(1);
        self.phase = MonitorPhase::Failover;
        Ok(action)
    }

    /// Switch to the backup endpoint.
    pub fn complete_failover(&mut self, backup: Endpoint) {
        self.active_ports.insert(backup.port);
        self.tunnel_status.insert(backup.port, TunnelStatus::Connected);
        self.is_backup_active = true;
        self.is_starting_backup = false;
        self.consecutive_failures = 0;
        self.active = backup;
        self.phase = MonitorPhase::Healthy;
    }

    /// Release the failover slot without touching anything else, so the
    /// next failed check retries.
    pub fn abort_failover(&mut self) {
        self.is_starting_backup = false;
        self.phase = MonitorPhase::Degrading;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead() -> ProbeReport {
        ProbeReport::disconnected("tunnel gone")
    }

    fn alive() -> ProbeReport {
        ProbeReport::connected()
    }

    #[test]
    fn starts_idle_with_primary_only() {
        let state = HealthState::new(Endpoint::new("https://p.example", 3000));
        assert_eq!(state.active_ports, BTreeSet::from([3000]));
        assert_eq!(state.tunnel_status[&3000], TunnelStatus::Unknown);
        assert_eq!(state.phase, MonitorPhase::Idle);
        assert!(state.last_health_check.is_none());
    }

    #[test]
    fn failures_accumulate_and_success_resets() {
        let mut state = HealthState::new(Endpoint::new("u", 3000));
        state.record_probe(3000, &dead());
        state.record_probe(3000, &dead());
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(state.phase, MonitorPhase::Degrading);
        assert_eq!(state.tunnel_status[&3000], TunnelStatus::Disconnected);

        state.record_probe(3000, &alive());
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.phase, MonitorPhase::Healthy);
        assert!(state.last_health_check.is_some());
    }

    #[test]
    fn second_failover_is_rejected_while_first_runs() {
        let mut state = HealthState::new(Endpoint::new("u", 3000));
        assert_eq!(state.begin_failover().unwrap(), FailoverAction::StartBackup);
        assert!(matches!(
            state.begin_failover(),
            Err(FailoverError::AlreadyInProgress)
        ));
    }

    #[test]
    fn failed_failover_keeps_failure_count_for_retry() {
        let mut state = HealthState::new(Endpoint::new("u", 3000));
        state.record_probe(3000, &dead());
        state.begin_failover().unwrap();
        state.abort_failover();

        assert!(!state.is_starting_backup);
        assert!(!state.is_backup_active);
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.active.port, 3000);
        assert_eq!(
            state.begin_failover().unwrap(),
            FailoverAction::CleanupAndRestart
        );
    }

    #[test]
    fn successful_failover_switches_active_endpoint() {
        let mut state = HealthState::new(Endpoint::new("u", 3000));
        state.record_probe(3000, &dead());
        state.begin_failover().unwrap();
        state.complete_failover(Endpoint::new("https://backup.example", 3001));

        assert_eq!(state.active_ports, BTreeSet::from([3000, 3001]));
        assert_eq!(state.tunnel_status[&3001], TunnelStatus::Connected);
        assert!(state.is_backup_active);
        assert!(!state.is_starting_backup);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.active.url, "https://backup.example");
        assert_eq!(
            state.begin_failover().unwrap(),
            FailoverAction::CleanupAndRestart
        );
    }
}
