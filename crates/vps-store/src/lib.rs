//! Durable tracking of instance records, keyed by container name.
//!
//! All implementations serialize writes at the store boundary, which is what
//! lets concurrent workflows race on different names while operations on the
//! same name stay ordered.

use async_trait::async_trait;
use thiserror::Error;
use vps_common::{InstanceRecord, VpsError};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record already exists: {0}")]
    Duplicate(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for VpsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(name) => VpsError::DuplicateName(name),
            StoreError::NotFound(name) => VpsError::NotFound(name),
            StoreError::Backend(msg) => VpsError::Store(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Fails with `Duplicate` if the container name is already recorded.
    async fn insert(&self, record: &InstanceRecord) -> Result<()>;

    /// Idempotent: deleting an unknown name is not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Replaces only the credential; every other field is untouched.
    /// Fails with `NotFound` if no such record exists.
    async fn update_credential(&self, name: &str, credential: &str) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Option<InstanceRecord>>;

    /// All records, unspecified order.
    async fn list_all(&self) -> Result<Vec<InstanceRecord>>;

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<InstanceRecord>>;

    /// The quota counter: derived, never stored.
    async fn count_by_owner(&self, owner: &str) -> Result<usize>;

    async fn count_all(&self) -> Result<usize>;

    /// Durable half of the admin roster; idempotent.
    async fn grant_admin(&self, user: &str) -> Result<()>;

    async fn list_admins(&self) -> Result<Vec<String>>;
}
