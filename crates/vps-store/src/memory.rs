use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use vps_common::InstanceRecord;

use crate::{InstanceStore, Result, StoreError};

/// In-memory store for development and testing.
#[derive(Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<String, InstanceRecord>>>,
    admins: Arc<RwLock<BTreeSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceStore for MemoryStore {
    async fn insert(&self, record: &InstanceRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.container_name) {
            return Err(StoreError::Duplicate(record.container_name.clone()));
        }
        records.insert(record.container_name.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.records.write().await.remove(name);
        Ok(())
    }

    async fn update_credential(&self, name: &str, credential: &str) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        record.ssh_command = Some(credential.to_string());
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<InstanceRecord>> {
        Ok(self.records.read().await.get(name).cloned())
    }

    async fn list_all(&self) -> Result<Vec<InstanceRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<InstanceRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect())
    }

    async fn count_by_owner(&self, owner: &str) -> Result<usize> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.owner == owner)
            .count())
    }

    async fn count_all(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    async fn grant_admin(&self, user: &str) -> Result<()> {
        self.admins.write().await.insert(user.to_string());
        Ok(())
    }

    async fn list_admins(&self) -> Result<Vec<String>> {
        Ok(self.admins.read().await.iter().cloned().collect())
    }
}
