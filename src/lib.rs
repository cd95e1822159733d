//! Sandbox liveness and change-event pipeline for ZeroBuild projects.
//!
//! Watches a project's sandbox filesystem and streams changes to
//! subscribers, probes the project's public tunnel, and fails over to a
//! backup dev server when the tunnel dies.

pub mod config;
pub mod gateway;
pub mod health;
pub mod observability;
pub mod resolver;
pub mod sandbox;
pub mod store;
pub mod transport;
pub mod watch;
