use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    RestartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, instrument, warn};
use vps_common::{
    parse_cpu_nanos, parse_mem_bytes, ContainerRuntime, CreateSpec, InstanceStats, Result as VpsResult,
    VpsError,
};

pub mod capture;
pub mod driver;
pub mod probe;

pub use bollard;
pub use driver::{Caller, ContainerDriver};

/// Label recording the provisioning identity; checked on every mutating call.
pub const OWNER_LABEL: &str = "vps.owner";
/// Label recording the tier the instance was provisioned from.
pub const TIER_LABEL: &str = "vps.tier";

// --- Custom Error Type ---
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Container creation failed: {0}")]
    CreationFailed(#[source] BollardError),
    #[error("Container start failed: {0}")]
    StartFailed(#[source] BollardError),
    #[error("Container stop failed: {0}")]
    StopFailed(#[source] BollardError),
    #[error("Container restart failed: {0}")]
    RestartFailed(#[source] BollardError),
    #[error("Container removal failed: {0}")]
    RemovalFailed(#[source] BollardError),
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Docker API error: {0}")]
    DockerApi(#[from] BollardError),
    #[error("Internal executor error: {0}")]
    Internal(String),
}

impl From<ExecutorError> for VpsError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::NotFound(name) => VpsError::NotFound(name),
            other => VpsError::RuntimeApi(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Maps a bollard failure to `NotFound` when the engine reports 404,
/// otherwise wraps it with the given constructor.
fn classify(name: &str, err: BollardError, wrap: fn(BollardError) -> ExecutorError) -> ExecutorError {
    if is_not_found(&err) {
        ExecutorError::NotFound(name.to_string())
    } else {
        wrap(err)
    }
}

// --- DockerRuntime Implementation ---

/// Bollard-backed implementation of the container runtime seam.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Arc<Docker>,
}

impl DockerRuntime {
    pub fn new(docker: Arc<Docker>) -> Self {
        Self { docker }
    }

    /// Connects to the local Docker daemon.
    pub fn from_local_defaults() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(ExecutorError::DockerApi)?;
        Ok(Self::new(Arc::new(docker)))
    }

    async fn labels_of(&self, name: &str) -> Result<HashMap<String, String>> {
        let inspect = self
            .docker
            .inspect_container(name, None)
            .await
            .map_err(|e| classify(name, e, ExecutorError::DockerApi))?;
        Ok(inspect
            .config
            .and_then(|c| c.labels)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, spec: &CreateSpec) -> VpsResult<()> {
        let memory = parse_mem_bytes(&spec.ram)?;
        let nano_cpus = parse_cpu_nanos(&spec.cpu)?;

        let mut labels = HashMap::new();
        labels.insert(OWNER_LABEL.to_string(), spec.owner.clone());
        labels.insert(TIER_LABEL.to_string(), spec.tier.clone());

        let host_config = HostConfig {
            memory: Some(memory),
            nano_cpus: Some(nano_cpus),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        });
        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.name.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.docker
            .create_container::<String, String>(options, config)
            .await
            .map_err(|e| VpsError::from(ExecutorError::CreationFailed(e)))?;
        info!(name = %spec.name, "Container created");
        Ok(())
    }

    async fn start(&self, name: &str) -> VpsResult<()> {
        self.docker
            .start_container::<String>(name, None)
            .await
            .map_err(|e| VpsError::from(classify(name, e, ExecutorError::StartFailed)))
    }

    async fn stop(&self, name: &str) -> VpsResult<()> {
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(VpsError::from(classify(name, e, ExecutorError::StopFailed))),
        }
    }

    async fn restart(&self, name: &str) -> VpsResult<()> {
        self.docker
            .restart_container(name, Some(RestartContainerOptions { t: 10 }))
            .await
            .map_err(|e| VpsError::from(classify(name, e, ExecutorError::RestartFailed)))
    }

    async fn remove(&self, name: &str, force: bool) -> VpsResult<()> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| VpsError::from(classify(name, e, ExecutorError::RemovalFailed)))
    }

    async fn owner_of(&self, name: &str) -> VpsResult<String> {
        let labels = self.labels_of(name).await.map_err(VpsError::from)?;
        labels
            .get(OWNER_LABEL)
            .cloned()
            .ok_or_else(|| VpsError::NotFound(name.to_string()))
    }

    async fn exists(&self, name: &str) -> VpsResult<bool> {
        match self.docker.inspect_container(name, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(VpsError::from(ExecutorError::DockerApi(e))),
        }
    }

    async fn exec_detached(&self, name: &str, command: Vec<String>) -> VpsResult<()> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(command),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| VpsError::from(classify(name, e, ExecutorError::DockerApi)))?;

        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| VpsError::from(ExecutorError::DockerApi(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stats(&self, name: &str) -> VpsResult<InstanceStats> {
        let inspect = self
            .docker
            .inspect_container(name, None)
            .await
            .map_err(|e| VpsError::from(classify(name, e, ExecutorError::DockerApi)))?;
        let running = inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false);

        if !running {
            return Ok(InstanceStats {
                running: false,
                ..Default::default()
            });
        }

        let mut stream = self.docker.stats(
            name,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        let sample = match stream.next().await {
            Some(Ok(sample)) => sample,
            Some(Err(e)) => {
                warn!(name, error = %e, "Stats sample failed");
                return Ok(InstanceStats {
                    running: true,
                    ..Default::default()
                });
            }
            None => {
                return Ok(InstanceStats {
                    running: true,
                    ..Default::default()
                })
            }
        };

        let cpu_delta = sample
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(sample.precpu_stats.cpu_usage.total_usage);
        let system_delta = sample
            .cpu_stats
            .system_cpu_usage
            .unwrap_or(0)
            .saturating_sub(sample.precpu_stats.system_cpu_usage.unwrap_or(0));
        let cpu_percent = if system_delta > 0 {
            let online = sample.cpu_stats.online_cpus.unwrap_or(1) as f64;
            Some(cpu_delta as f64 / system_delta as f64 * online * 100.0)
        } else {
            None
        };

        Ok(InstanceStats {
            memory_usage_bytes: sample.memory_stats.usage,
            memory_limit_bytes: sample.memory_stats.limit,
            cpu_percent,
            running: true,
        })
    }

    #[instrument(skip(self))]
    async fn open_session(&self, name: &str) -> VpsResult<Option<String>> {
        // The helper runs in the foreground so its session line lands on
        // stdout; kill_on_drop keeps an abandoned capture from leaking it.
        let mut child = match Command::new("docker")
            .args(["exec", name, "tmate", "-F"])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(name, error = %e, "Failed to spawn session helper");
                return Ok(None);
            }
        };

        let Some(stdout) = child.stdout.take() else {
            warn!(name, "Session helper has no stdout");
            return Ok(None);
        };

        let reader = tokio::io::BufReader::new(stdout);
        let session = capture::read_session_line(reader, capture::LINE_TIMEOUT).await;

        // The helper keeps serving the session; only the scraper goes away.
        if let Err(e) = child.kill().await {
            warn!(name, error = %e, "Failed to reap session helper scraper");
        }

        Ok(session)
    }

    async fn list_managed(&self) -> VpsResult<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![OWNER_LABEL.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| VpsError::from(ExecutorError::DockerApi(e)))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.names)
            .filter_map(|names| names.into_iter().next())
            .map(|name| name.trim_start_matches('/').to_string())
            .collect())
    }
}
