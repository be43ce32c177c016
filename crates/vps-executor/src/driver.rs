//! Thin orchestration over the runtime primitives, enforcing that only the
//! provisioning identity (or an admin) can mutate an instance.

use std::sync::Arc;

use tracing::instrument;
use vps_common::{ContainerRuntime, CreateSpec, InstanceStats, Result, VpsError};

/// The identity a command arrived with, as resolved by the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub admin: bool,
}

impl Caller {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            admin: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            admin: true,
        }
    }
}

#[derive(Clone)]
pub struct ContainerDriver {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerDriver {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> Arc<dyn ContainerRuntime> {
        Arc::clone(&self.runtime)
    }

    /// Fails with `NotOwner` before any runtime mutation when the creation
    /// label does not match the caller. Admins pass.
    async fn ensure_owner(&self, caller: &Caller, name: &str) -> Result<()> {
        if caller.admin {
            return Ok(());
        }
        let owner = self.runtime.owner_of(name).await?;
        if owner != caller.id {
            return Err(VpsError::NotOwner {
                name: name.to_string(),
                caller: caller.id.clone(),
            });
        }
        Ok(())
    }

    pub async fn create(&self, spec: &CreateSpec) -> Result<()> {
        self.runtime.create(spec).await
    }

    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn start(&self, caller: &Caller, name: &str) -> Result<()> {
        self.ensure_owner(caller, name).await?;
        self.runtime.start(name).await
    }

    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn stop(&self, caller: &Caller, name: &str) -> Result<()> {
        self.ensure_owner(caller, name).await?;
        self.runtime.stop(name).await
    }

    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn restart(&self, caller: &Caller, name: &str) -> Result<()> {
        self.ensure_owner(caller, name).await?;
        self.runtime.restart(name).await
    }

    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn remove(&self, caller: &Caller, name: &str, force: bool) -> Result<()> {
        self.ensure_owner(caller, name).await?;
        self.runtime.remove(name, force).await
    }

    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn exec_detached(
        &self,
        caller: &Caller,
        name: &str,
        command: Vec<String>,
    ) -> Result<()> {
        self.ensure_owner(caller, name).await?;
        self.runtime.exec_detached(name, command).await
    }

    /// Read-only; no ownership gate, no lock.
    pub async fn stats(&self, name: &str) -> Result<InstanceStats> {
        self.runtime.stats(name).await
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        self.runtime.exists(name).await
    }

    pub async fn open_session(&self, name: &str) -> Result<Option<String>> {
        self.runtime.open_session(name).await
    }

    pub async fn list_managed(&self) -> Result<Vec<String>> {
        self.runtime.list_managed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vps_common::MockContainerRuntime;

    fn driver_with(mock: MockContainerRuntime) -> ContainerDriver {
        ContainerDriver::new(Arc::new(mock))
    }

    #[tokio::test]
    async fn test_owner_mismatch_fails_without_mutating() {
        let mut mock = MockContainerRuntime::new();
        mock.expect_owner_of()
            .returning(|_| Ok("someone-else".to_string()));
        // No expect_stop: a stop call would panic the mock.
        let driver = driver_with(mock);

        let err = driver
            .stop(&Caller::user("u1"), "u1-abcd")
            .await
            .unwrap_err();
        assert!(matches!(err, VpsError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_owner_match_reaches_runtime() {
        let mut mock = MockContainerRuntime::new();
        mock.expect_owner_of().returning(|_| Ok("u1".to_string()));
        mock.expect_stop().times(1).returning(|_| Ok(()));
        let driver = driver_with(mock);

        driver.stop(&Caller::user("u1"), "u1-abcd").await.unwrap();
    }

    #[tokio::test]
    async fn test_admin_bypasses_ownership_label() {
        let mut mock = MockContainerRuntime::new();
        // No owner_of expectation: admins never trigger the lookup.
        mock.expect_remove().times(1).returning(|_, _| Ok(()));
        let driver = driver_with(mock);

        driver
            .remove(&Caller::admin("root"), "u1-abcd", true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_instance_surfaces_not_found() {
        let mut mock = MockContainerRuntime::new();
        mock.expect_owner_of()
            .returning(|name| Err(VpsError::NotFound(name.to_string())));
        let driver = driver_with(mock);

        let err = driver
            .restart(&Caller::user("u1"), "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, VpsError::NotFound(_)));
    }
}
