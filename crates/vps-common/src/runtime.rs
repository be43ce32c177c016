use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Everything needed to create one instance container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    /// CPU cores, e.g. "1" or "0.5".
    pub cpu: String,
    /// Memory with unit suffix, e.g. "2g".
    pub ram: String,
    /// Recorded as the `owner` label and checked on every mutating call.
    pub owner: String,
    /// Recorded as the `tier` label for operator visibility.
    pub tier: String,
}

/// Point-in-time resource usage of one container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceStats {
    pub memory_usage_bytes: Option<u64>,
    pub memory_limit_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub running: bool,
}

/// Seam to the container engine. The Docker-backed implementation lives in
/// the executor crate; workflow tests substitute a mock.
///
/// `NotFound` is the only expected failure for operations on unknown names;
/// any other engine failure surfaces as `RuntimeApi` with the underlying
/// message and must not crash the invoking workflow.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create(&self, spec: &CreateSpec) -> Result<()>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str) -> Result<()>;

    async fn restart(&self, name: &str) -> Result<()>;

    async fn remove(&self, name: &str, force: bool) -> Result<()>;

    /// Value of the `owner` label recorded at creation time.
    async fn owner_of(&self, name: &str) -> Result<String>;

    async fn exists(&self, name: &str) -> Result<bool>;

    /// Runs a command inside the container without waiting for it.
    async fn exec_detached(&self, name: &str, command: Vec<String>) -> Result<()>;

    async fn stats(&self, name: &str) -> Result<InstanceStats>;

    /// Spawns the terminal-sharing helper inside the container and scrapes
    /// its output for the session line. `Ok(None)` means the helper never
    /// produced one within the bound; that is an outcome, not an error.
    async fn open_session(&self, name: &str) -> Result<Option<String>>;

    /// Names of all containers carrying this manager's ownership label.
    async fn list_managed(&self) -> Result<Vec<String>>;
}
