//! Confirmation-gated deletion, single and bulk.
//!
//! The two-phase protocol is front-end agnostic: `propose_*` hands back a
//! token after the authorization check, and `resolve_confirmation` executes
//! or discards within the token's lifetime. An expired or cancelled token
//! performs no lifecycle operation at all.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use vps_common::{Result, VpsError};
use vps_executor::Caller;

use crate::VpsContext;

/// How long a proposed action waits for its confirmation signal.
pub const CONFIRMATION_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    RemoveOne { target: String },
    RemoveAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Confirm,
    Cancel,
}

struct Pending {
    action: PendingAction,
    requested_by: String,
    expires_at: Instant,
}

/// Outstanding proposals, keyed by token.
pub struct ConfirmationRegistry {
    pending: DashMap<Uuid, Pending>,
    ttl: Duration,
}

impl Default for ConfirmationRegistry {
    fn default() -> Self {
        Self {
            pending: DashMap::new(),
            ttl: CONFIRMATION_TTL,
        }
    }
}

impl ConfirmationRegistry {
    fn propose(&self, action: PendingAction, requested_by: &str) -> Uuid {
        self.pending.retain(|_, p| p.expires_at > Instant::now());

        let token = Uuid::new_v4();
        self.pending.insert(
            token,
            Pending {
                action,
                requested_by: requested_by.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        token
    }

    /// Removes and returns the pending action; `Ok(None)` means the token
    /// had already expired. Only the proposer may resolve its token —
    /// anyone else sees it as nonexistent, and the proposal stays pending.
    fn take(&self, token: Uuid, caller: &str) -> Result<Option<PendingAction>> {
        let (_, pending) = self
            .pending
            .remove_if(&token, |_, p| p.requested_by == caller)
            .ok_or_else(|| VpsError::NotFound(token.to_string()))?;
        if pending.expires_at <= Instant::now() {
            return Ok(None);
        }
        Ok(Some(pending.action))
    }
}

/// Aggregate result of a deletion run: one report, even though execution is
/// sequential and tolerates per-instance failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionSummary {
    pub deleted: usize,
    /// Instance name and the reason its deletion stopped.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    Cancelled,
    Expired,
    Executed(DeletionSummary),
}

impl VpsContext {
    /// Proposes removing one instance. Ownership is verified before the
    /// confirmation prompt is ever issued.
    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn propose_remove(&self, caller: &Caller, name: &str) -> Result<Uuid> {
        let record = self
            .store
            .get(name)
            .await
            .map_err(VpsError::from)?
            .ok_or_else(|| VpsError::NotFound(name.to_string()))?;
        if !caller.admin && record.owner != caller.id {
            return Err(VpsError::NotOwner {
                name: name.to_string(),
                caller: caller.id.clone(),
            });
        }

        Ok(self.confirmations.propose(
            PendingAction::RemoveOne {
                target: name.to_string(),
            },
            &caller.id,
        ))
    }

    /// Proposes removing every instance. Admin only.
    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn propose_remove_all(&self, caller: &Caller) -> Result<Uuid> {
        self.require_admin(caller)?;
        Ok(self.confirmations.propose(PendingAction::RemoveAll, &caller.id))
    }

    /// Applies the confirmation signal to a pending proposal.
    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn resolve_confirmation(
        &self,
        caller: &Caller,
        token: Uuid,
        decision: Decision,
    ) -> Result<ConfirmationOutcome> {
        let Some(action) = self.confirmations.take(token, &caller.id)? else {
            info!(%token, "Confirmation expired; nothing changed");
            return Ok(ConfirmationOutcome::Expired);
        };

        if decision == Decision::Cancel {
            info!(%token, "Deletion cancelled; nothing changed");
            return Ok(ConfirmationOutcome::Cancelled);
        }

        let targets = match action {
            PendingAction::RemoveOne { target } => vec![target],
            PendingAction::RemoveAll => self
                .store
                .list_all()
                .await
                .map_err(VpsError::from)?
                .into_iter()
                .map(|r| r.container_name)
                .collect(),
        };

        Ok(ConfirmationOutcome::Executed(
            self.delete_instances(caller, targets).await,
        ))
    }

    /// stop → remove → record delete per instance, each best-effort. One
    /// instance failing never aborts the batch; the record delete is only
    /// reached once its container is actually gone.
    pub(crate) async fn delete_instances(
        &self,
        caller: &Caller,
        targets: Vec<String>,
    ) -> DeletionSummary {
        let mut summary = DeletionSummary::default();

        for name in targets {
            let result: Result<()> = async {
                self.driver.stop(caller, &name).await?;
                self.driver.remove(caller, &name, false).await?;
                self.store.delete(&name).await.map_err(VpsError::from)?;
                Ok(())
            }
            .await;

            match result {
                Ok(()) => {
                    info!(%name, "Instance deleted");
                    summary.deleted += 1;
                }
                Err(e) => {
                    warn!(%name, error = %e, "Deletion failed, continuing with the rest");
                    summary.failed.push((name, e.to_string()));
                }
            }
        }

        summary
    }
}
