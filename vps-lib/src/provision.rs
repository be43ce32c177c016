//! Provisioning workflow: quota check, container create, credential
//! capture, record persist — with rollback when the credential never shows.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{error, info, instrument, warn};
use vps_common::{
    parse_cpu_nanos, parse_duration, parse_mem_bytes, CreateSpec, Expiry, InstanceRecord, Result,
    Tier, VpsError,
};
use vps_executor::Caller;
use vps_store::StoreError;

use crate::VpsContext;

const DEFAULT_IMAGE: &str = "ubuntu:22.04";
const DEFAULT_OS: &str = "Ubuntu 22.04";
const NAME_SUFFIX_LEN: usize = 8;

/// Result of a successful provisioning run.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub record: InstanceRecord,
    pub credential: String,
}

/// `{user}-{random suffix}`: practically unique without a coordination
/// step; a store collision is retried once with a fresh suffix.
fn instance_name(user: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NAME_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{user}-{suffix}")
}

impl VpsContext {
    /// Provisions one instance from a tier for the calling user.
    ///
    /// The quota is checked before anything is created, so a request that
    /// cannot succeed consumes no resources.
    #[instrument(skip(self, creator))]
    pub async fn provision(&self, user_id: &str, creator: &str, tier: Tier) -> Result<Provisioned> {
        let limit = self.config.server_limit;
        let owned = self
            .store
            .count_by_owner(user_id)
            .await
            .map_err(VpsError::from)?;
        if owned >= limit {
            return Err(VpsError::QuotaExceeded { limit });
        }

        let spec = tier.spec();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let name = instance_name(user_id);
            match self
                .run_provision(
                    user_id,
                    creator,
                    name,
                    spec.image,
                    spec.cpu,
                    spec.ram,
                    tier.label(),
                    None,
                )
                .await
            {
                Err(VpsError::DuplicateName(name)) if attempts < 2 => {
                    warn!(%name, "Instance name collided, retrying with a fresh suffix");
                }
                other => return other,
            }
        }
    }

    /// Admin provisioning with explicit specs, a fixed name, and an expiry
    /// derived from a duration string. The per-user quota does not apply.
    #[instrument(skip(self, caller), fields(admin = %caller.id))]
    pub async fn deploy(
        &self,
        caller: &Caller,
        target_user: &str,
        name: &str,
        ram: &str,
        cpu: &str,
        duration: &str,
    ) -> Result<Provisioned> {
        self.require_admin(caller)?;
        // Validate the resource strings up front so nothing is created for
        // a request that cannot succeed.
        parse_mem_bytes(ram)?;
        parse_cpu_nanos(cpu)?;
        let expiry = Expiry::At(Utc::now() + parse_duration(duration)?);

        self.run_provision(
            target_user,
            &caller.id,
            name.to_string(),
            DEFAULT_IMAGE,
            cpu,
            ram,
            "custom",
            Some(expiry),
        )
        .await
    }

    /// Reruns credential capture for one of the caller's instances and
    /// replaces only the stored credential.
    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn regen_credential(
        &self,
        caller: &Caller,
        name: Option<&str>,
    ) -> Result<(String, String)> {
        let owned = self
            .store
            .list_by_owner(&caller.id)
            .await
            .map_err(VpsError::from)?;
        let target = match name {
            Some(wanted) => owned
                .into_iter()
                .find(|r| r.container_name == wanted)
                .ok_or_else(|| VpsError::NotFound(wanted.to_string()))?,
            None => owned
                .into_iter()
                .next()
                .ok_or_else(|| VpsError::NotFound(format!("no instance for {}", caller.id)))?,
        };

        let session = self
            .driver
            .open_session(&target.container_name)
            .await?
            .ok_or(VpsError::CaptureTimeout)?;
        self.store
            .update_credential(&target.container_name, &session)
            .await
            .map_err(VpsError::from)?;
        info!(name = %target.container_name, "Credential regenerated");
        Ok((target.container_name, session))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_provision(
        &self,
        owner: &str,
        creator: &str,
        name: String,
        image: &str,
        cpu: &str,
        ram: &str,
        tier: &str,
        expiry: Option<Expiry>,
    ) -> Result<Provisioned> {
        let spec = CreateSpec {
            name: name.clone(),
            image: image.to_string(),
            cpu: cpu.to_string(),
            ram: ram.to_string(),
            owner: owner.to_string(),
            tier: tier.to_string(),
        };

        // Create failure needs no cleanup: nothing exists yet.
        self.driver.create(&spec).await?;

        let as_owner = Caller::user(owner);
        if let Err(e) = self.driver.start(&as_owner, &name).await {
            warn!(%name, error = %e, "Start failed after create, rolling back");
            self.rollback_container(&name).await;
            return Err(e);
        }

        let credential = match self.driver.open_session(&name).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                warn!(%name, "No session line captured, rolling back");
                self.rollback_container(&name).await;
                return Err(VpsError::CaptureTimeout);
            }
            Err(e) => {
                warn!(%name, error = %e, "Session helper failed, rolling back");
                self.rollback_container(&name).await;
                return Err(e);
            }
        };

        let record = InstanceRecord {
            owner: owner.to_string(),
            container_name: name.clone(),
            ssh_command: Some(credential.clone()),
            ram_limit: ram.to_string(),
            cpu_limit: cpu.to_string(),
            creator: creator.to_string(),
            os_type: DEFAULT_OS.to_string(),
            expiry,
            ports: Vec::new(),
        };

        match self.store.insert(&record).await {
            Ok(()) => {
                info!(%name, owner, "Instance provisioned");
                Ok(Provisioned { record, credential })
            }
            Err(StoreError::Duplicate(dup)) => {
                // The container under the colliding name is ours; take it
                // back out before the caller retries.
                self.rollback_container(&name).await;
                Err(VpsError::DuplicateName(dup))
            }
            Err(other) => {
                // Capture already succeeded, so the container is usable;
                // it is intentionally left running for the operator (or a
                // reconcile pass) while the store failure is surfaced.
                error!(%name, error = %other, "Record persist failed; container left running");
                Err(VpsError::from(other))
            }
        }
    }

    async fn rollback_container(&self, name: &str) {
        if let Err(e) = self.driver.runtime().remove(name, true).await {
            error!(name, error = %e, "Rollback removal failed");
        }
    }
}
