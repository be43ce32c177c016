use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use vps_common::{Result, VpsConfig, VpsError};
use vps_executor::{Caller, ContainerDriver};
use vps_store::InstanceStore;

use crate::deletion::ConfirmationRegistry;

/// Admin identities: seeded from configuration at startup, extended at
/// runtime by grants that are also written through to the store.
pub struct AdminRoster {
    inner: RwLock<HashSet<String>>,
}

impl AdminRoster {
    pub fn new(seed: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: RwLock::new(seed.into_iter().collect()),
        }
    }

    pub async fn is_admin(&self, user: &str) -> bool {
        self.inner.read().await.contains(user)
    }

    pub async fn grant(&self, user: &str) -> bool {
        self.inner.write().await.insert(user.to_string())
    }
}

/// Everything a workflow needs, owned in one place and cloned cheaply.
#[derive(Clone)]
pub struct VpsContext {
    pub(crate) driver: ContainerDriver,
    pub(crate) store: Arc<dyn InstanceStore>,
    pub(crate) config: Arc<VpsConfig>,
    pub(crate) admins: Arc<AdminRoster>,
    pub(crate) confirmations: Arc<ConfirmationRegistry>,
}

impl VpsContext {
    /// Builds the context, merging the durable admin roster into the
    /// config-seeded one.
    pub async fn new(
        driver: ContainerDriver,
        store: Arc<dyn InstanceStore>,
        config: VpsConfig,
    ) -> Result<Self> {
        let mut seed: Vec<String> = config.admin_ids.clone();
        let granted = store.list_admins().await.map_err(VpsError::from)?;
        seed.extend(granted);
        info!(admins = seed.len(), limit = config.server_limit, "Context initialized");

        Ok(Self {
            driver,
            store: Arc::clone(&store),
            config: Arc::new(config),
            admins: Arc::new(AdminRoster::new(seed)),
            confirmations: Arc::new(ConfirmationRegistry::default()),
        })
    }

    pub fn driver(&self) -> &ContainerDriver {
        &self.driver
    }

    pub fn store(&self) -> &Arc<dyn InstanceStore> {
        &self.store
    }

    pub fn config(&self) -> &VpsConfig {
        &self.config
    }

    /// Resolves an opaque identity into a caller with its admin flag.
    pub async fn caller(&self, user_id: &str) -> Caller {
        Caller {
            id: user_id.to_string(),
            admin: self.admins.is_admin(user_id).await,
        }
    }

    pub(crate) fn require_admin(&self, caller: &Caller) -> Result<()> {
        if caller.admin {
            Ok(())
        } else {
            Err(VpsError::NotAdmin)
        }
    }

    /// Grants admin to a user, durably.
    pub async fn grant_admin(&self, caller: &Caller, user: &str) -> Result<bool> {
        self.require_admin(caller)?;
        self.store.grant_admin(user).await.map_err(VpsError::from)?;
        Ok(self.admins.grant(user).await)
    }

    /// The read-only count behind the periodic status refresh; never touches
    /// the container runtime.
    pub async fn instance_count(&self) -> Result<usize> {
        self.store.count_all().await.map_err(VpsError::from)
    }
}
