// Re-export dependencies used in public interfaces of common types

use thiserror::Error;

mod config;
mod parse;
mod runtime;
mod tier;
mod types;

pub use config::VpsConfig;
pub use parse::{parse_cpu_nanos, parse_duration, parse_mem_bytes};
pub use runtime::{ContainerRuntime, CreateSpec, InstanceStats};
#[cfg(any(test, feature = "mocks"))]
pub use runtime::MockContainerRuntime;
pub use tier::{Tier, TierSpec};
pub use types::{Expiry, InstanceRecord, PortMapping};

/// Failure taxonomy for every user-visible operation. Workflows return these
/// instead of panicking; the command layer renders them into responses.
#[derive(Error, Debug)]
pub enum VpsError {
    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Instance '{name}' is not owned by '{caller}'")]
    NotOwner { name: String, caller: String },

    #[error("Instance limit of {limit} reached")]
    QuotaExceeded { limit: usize },

    #[error("Unknown tier: {0}")]
    InvalidTier(String),

    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    #[error("Timed out waiting for a session line from the helper")]
    CaptureTimeout,

    #[error("Instance name already exists: {0}")]
    DuplicateName(String),

    #[error("Admin privileges required")]
    NotAdmin,

    #[error("Container runtime error: {0}")]
    RuntimeApi(String),

    #[error("Store error: {0}")]
    Store(String),
}

// Define the primary Result type for VPS operations
pub type Result<T> = std::result::Result<T, VpsError>;
