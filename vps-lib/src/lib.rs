use serde::{Deserialize, Serialize};
use vps_common::VpsError;

pub mod commands;
pub mod context;
pub mod deletion;
pub mod provision;
pub mod reconcile;

pub use commands::{dispatch, Command};
pub use context::VpsContext;
pub use deletion::{ConfirmationOutcome, Decision, DeletionSummary, PendingAction};
pub use provision::Provisioned;
pub use reconcile::ReconcileReport;

/// One structured response block: a short title, an explanation, and
/// optional labelled fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<(String, String)>,
}

impl Notice {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }
}

/// What a command invocation hands back to the front-end. `notice` may be
/// shown to a broad audience; `direct` must only ever reach the requesting
/// identity — the access credential travels exclusively through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub notice: Notice,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct: Option<Notice>,
    /// True when the outcome reports a typed failure rather than success.
    pub failed: bool,
}

impl Outcome {
    pub fn success(notice: Notice) -> Self {
        Self {
            notice,
            direct: None,
            failed: false,
        }
    }

    pub fn with_direct(notice: Notice, direct: Notice) -> Self {
        Self {
            notice,
            direct: Some(direct),
            failed: false,
        }
    }

    pub fn failure(err: &VpsError) -> Self {
        let title = match err {
            VpsError::NotFound(_) => "Not Found",
            VpsError::NotOwner { .. } => "Not Your Instance",
            VpsError::NotAdmin => "Access Denied",
            VpsError::QuotaExceeded { .. } => "Creation Limit Reached",
            VpsError::InvalidTier(_) => "Invalid Tier",
            VpsError::InvalidTimeFormat(_) => "Invalid Input",
            VpsError::CaptureTimeout => "Session Capture Failed",
            VpsError::DuplicateName(_) => "Name Collision",
            VpsError::RuntimeApi(_) => "Runtime Error",
            VpsError::Store(_) => "Storage Error",
        };
        Self {
            notice: Notice::new(title, err.to_string()),
            direct: None,
            failed: true,
        }
    }
}
