use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One exposed port mapping on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

/// When an instance is scheduled to go away. `Never` is an explicit
/// "no expiry" decision, distinct from the field being unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiry {
    Never,
    At(DateTime<Utc>),
}

impl Expiry {
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Expiry::Never => None,
            Expiry::At(ts) => Some(*ts),
        }
    }
}

/// One row per live (or recently live) instance. The container name is the
/// primary key and identifies exactly one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub owner: String,
    pub container_name: String,
    /// None until credential capture has succeeded. A record without a
    /// credential must not be presented as connectable.
    pub ssh_command: Option<String>,
    pub ram_limit: String,
    pub cpu_limit: String,
    pub creator: String,
    pub os_type: String,
    pub expiry: Option<Expiry>,
    pub ports: Vec<PortMapping>,
}

impl InstanceRecord {
    pub fn is_connectable(&self) -> bool {
        self.ssh_command.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> InstanceRecord {
        InstanceRecord {
            owner: "u1".into(),
            container_name: "u1-abcd1234".into(),
            ssh_command: None,
            ram_limit: "2g".into(),
            cpu_limit: "1".into(),
            creator: "User One".into(),
            os_type: "Ubuntu 22.04".into(),
            expiry: None,
            ports: vec![],
        }
    }

    #[test]
    fn test_record_without_credential_is_not_connectable() {
        let mut rec = record();
        assert!(!rec.is_connectable());
        rec.ssh_command = Some("ssh abc@sgp1.tmate.io".into());
        assert!(rec.is_connectable());
    }

    #[test]
    fn test_expiry_serialization_distinguishes_never_from_unset() {
        let mut rec = record();
        let unset = serde_json::to_string(&rec).unwrap();
        assert!(unset.contains("\"expiry\":null"));

        rec.expiry = Some(Expiry::Never);
        let never = serde_json::to_string(&rec).unwrap();
        assert!(never.contains("\"expiry\":\"never\""));
    }
}
