use std::env;
use std::path::PathBuf;

/// Process-wide configuration, read once at startup and passed by value.
/// Nothing here is globally mutable; the admin roster derived from
/// `admin_ids` lives in the context and is extended through the store.
#[derive(Debug, Clone)]
pub struct VpsConfig {
    /// Maximum instances per user identity.
    pub server_limit: usize,
    /// Host-wide RAM ceiling reported in node status, e.g. "64g".
    pub ram_ceiling: String,
    /// Public-facing address reported for tunnels.
    pub public_address: String,
    /// Identities granted admin at startup.
    pub admin_ids: Vec<String>,
    pub db_path: PathBuf,
    pub api_host: String,
    pub api_port: u16,
}

impl Default for VpsConfig {
    fn default() -> Self {
        Self {
            server_limit: 1,
            ram_ceiling: "64g".to_string(),
            public_address: "127.0.0.1".to_string(),
            admin_ids: Vec::new(),
            db_path: PathBuf::from("vps_instances.db"),
            api_host: "0.0.0.0".to_string(),
            api_port: 8080,
        }
    }
}

impl VpsConfig {
    /// Builds a config from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let admin_ids = env::var("ADMIN_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            server_limit: env::var("SERVER_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_limit),
            ram_ceiling: env::var("RAM_LIMIT").unwrap_or(defaults.ram_ceiling),
            public_address: env::var("PUBLIC_IP").unwrap_or(defaults.public_address),
            admin_ids,
            db_path: env::var("VPS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            api_host: env::var("VPS_API_HOST").unwrap_or(defaults.api_host),
            api_port: env::var("VPS_API_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.api_port),
        }
    }

    pub fn is_seed_admin(&self, user: &str) -> bool {
        self.admin_ids.iter().any(|id| id == user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VpsConfig::default();
        assert_eq!(config.server_limit, 1);
        assert_eq!(config.ram_ceiling, "64g");
        assert!(!config.is_seed_admin("anyone"));
    }
}
