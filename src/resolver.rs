//! Resolution of project and sandbox ids into live sandbox handles.

use crate::config::{LivenessConfig, SandboxProvider};
use crate::sandbox::docker::DockerSandboxClient;
use crate::sandbox::e2b::E2bSandboxClient;
use crate::sandbox::SandboxClient;
use crate::store;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Project {0} not found")]
    ProjectNotFound(String),
    #[error("Project {0} has no active sandbox")]
    NoActiveSandbox(String),
    #[error("Sandbox provider error: {0}")]
    Provider(#[from] anyhow::Error),
}

/// Looks up the sandbox that currently serves a project.
#[async_trait]
pub trait SandboxResolver: Send + Sync {
    /// Resolve the sandbox serving `project_id`.
    async fn resolve_project(
        &self,
        project_id: &str,
    ) -> Result<Arc<dyn SandboxClient>, ResolveError>;

    /// Attach to a sandbox by id, independent of any project mapping.
    async fn attach(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxClient>, ResolveError>;
}

/// Resolver backed by the local SQLite store and the configured provider.
pub struct StoreResolver {
    conn: Mutex<Connection>,
    provider: SandboxProvider,
    e2b_api_key: String,
}

impl StoreResolver {
    pub fn open(db_path: &Path, config: &LivenessConfig) -> anyhow::Result<Self> {
        let conn = store::init_db(db_path)?;
        Ok(Self::with_connection(conn, config))
    }

    pub fn with_connection(conn: Connection, config: &LivenessConfig) -> Self {
        Self {
            conn: Mutex::new(conn),
            provider: config.sandbox.provider,
            e2b_api_key: config.sandbox.e2b_api_key.clone(),
        }
    }

    fn client_for(&self, sandbox_id: &str) -> anyhow::Result<Arc<dyn SandboxClient>> {
        let client: Arc<dyn SandboxClient> = match self.provider {
            SandboxProvider::E2b => {
                Arc::new(E2bSandboxClient::attach(self.e2b_api_key.clone(), sandbox_id)?)
            }
            SandboxProvider::Docker => Arc::new(DockerSandboxClient::attach(sandbox_id)?),
        };
        Ok(client)
    }
}

#[async_trait]
impl SandboxResolver for StoreResolver {
    async fn resolve_project(
        &self,
        project_id: &str,
    ) -> Result<Arc<dyn SandboxClient>, ResolveError> {
        if project_id.trim().is_empty() {
            return Err(ResolveError::ProjectNotFound(project_id.to_string()));
        }

        let sandbox_id = store::projects::load_sandbox_id(&self.conn.lock(), project_id)?;
        match sandbox_id {
            Some(id) if !id.trim().is_empty() => Ok(self.client_for(&id)?),
            Some(_) => Err(ResolveError::NoActiveSandbox(project_id.to_string())),
            None => Err(ResolveError::ProjectNotFound(project_id.to_string())),
        }
    }

    async fn attach(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxClient>, ResolveError> {
        if sandbox_id.trim().is_empty() {
            return Err(ResolveError::NoActiveSandbox(String::new()));
        }
        Ok(self.client_for(sandbox_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> (tempfile::TempDir, StoreResolver) {
        let dir = tempfile::tempdir().unwrap();
        let resolver =
            StoreResolver::open(&dir.path().join("liveness.db"), &LivenessConfig::default())
                .unwrap();
        (dir, resolver)
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let (_dir, resolver) = resolver();
        let err = resolver.resolve_project("missing").await.err().unwrap();
        assert!(matches!(err, ResolveError::ProjectNotFound(ref p) if p == "missing"));
    }

    #[tokio::test]
    async fn mapped_project_resolves_to_its_sandbox() {
        let (_dir, resolver) = resolver();
        store::projects::save_sandbox_id(&resolver.conn.lock(), "p1", "sb-42").unwrap();

        let client = resolver.resolve_project("p1").await.unwrap();
        assert_eq!(client.id(), "sb-42");
    }

    #[tokio::test]
    async fn blank_sandbox_id_means_no_active_sandbox() {
        let (_dir, resolver) = resolver();
        store::projects::save_sandbox_id(&resolver.conn.lock(), "p1", " ").unwrap();

        let err = resolver.resolve_project("p1").await.err().unwrap();
        assert!(matches!(err, ResolveError::NoActiveSandbox(_)));
    }

    #[tokio::test]
    async fn attach_rejects_empty_id() {
        let (_dir, resolver) = resolver();
        assert!(resolver.attach("").await.is_err());
        assert_eq!(resolver.attach("sb-7").await.unwrap().id(), "sb-7");
    }
}
