//! On-demand scan comparing the record store against actual container
//! existence. A container and its record are one logical unit; this is the
//! detector for the cases where that unit was torn in half (a persist
//! failure leaving a recordless container, or a container removed behind
//! the manager's back). It reports; it does not repair.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use vps_common::{Result, VpsError};
use vps_executor::Caller;

use crate::VpsContext;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Records whose container no longer exists.
    pub missing_containers: Vec<String>,
    /// Managed containers with no record.
    pub orphaned_containers: Vec<String>,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_containers.is_empty() && self.orphaned_containers.is_empty()
    }
}

impl VpsContext {
    #[instrument(skip(self, caller), fields(caller = %caller.id))]
    pub async fn reconcile(&self, caller: &Caller) -> Result<ReconcileReport> {
        self.require_admin(caller)?;

        let recorded: HashSet<String> = self
            .store
            .list_all()
            .await
            .map_err(VpsError::from)?
            .into_iter()
            .map(|r| r.container_name)
            .collect();
        let managed: HashSet<String> = self.driver.list_managed().await?.into_iter().collect();

        let mut report = ReconcileReport {
            missing_containers: recorded.difference(&managed).cloned().collect(),
            orphaned_containers: managed.difference(&recorded).cloned().collect(),
        };
        report.missing_containers.sort();
        report.orphaned_containers.sort();

        if !report.is_consistent() {
            warn!(
                missing = report.missing_containers.len(),
                orphaned = report.orphaned_containers.len(),
                "Store and container runtime disagree"
            );
        }
        Ok(report)
    }
}
