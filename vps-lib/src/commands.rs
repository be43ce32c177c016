//! The typed command surface. Each invocation arrives with an opaque caller
//! identity, runs one workflow, and yields an [`Outcome`] — success or a
//! rendered typed failure, never a panic out of the dispatch loop.

use rand::Rng;
use tracing::instrument;
use uuid::Uuid;
use vps_common::{InstanceRecord, InstanceStats, Result, Tier, VpsError};
use vps_executor::{probe, Caller};

use crate::deletion::Decision;
use crate::{ConfirmationOutcome, Notice, Outcome, VpsContext};

#[derive(Debug, Clone)]
pub enum Command {
    Create {
        tier: String,
    },
    Deploy {
        user_id: String,
        name: String,
        ram: String,
        cpu: String,
        duration: String,
    },
    Remove {
        name: String,
    },
    DeleteAll,
    Confirm {
        token: Uuid,
        decision: Decision,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    Restart {
        name: String,
    },
    RegenCredential {
        name: Option<String>,
    },
    ListAll,
    NodeStatus,
    Tunnel {
        name: String,
        port: u16,
    },
    GrantAdmin {
        user_id: String,
    },
    Reconcile,
}

/// Runs one command for one caller. Failures come back as rendered
/// outcomes; nothing escapes to terminate the caller's loop.
#[instrument(skip(ctx, command), fields(user = %user_id))]
pub async fn dispatch(
    ctx: &VpsContext,
    user_id: &str,
    display_name: Option<&str>,
    command: Command,
) -> Outcome {
    let caller = ctx.caller(user_id).await;
    let creator = display_name.unwrap_or(user_id).to_string();
    route(ctx, &caller, &creator, command)
        .await
        .unwrap_or_else(|err| Outcome::failure(&err))
}

async fn route(
    ctx: &VpsContext,
    caller: &Caller,
    creator: &str,
    command: Command,
) -> Result<Outcome> {
    match command {
        Command::Create { tier } => handle_create(ctx, caller, creator, &tier).await,
        Command::Deploy {
            user_id,
            name,
            ram,
            cpu,
            duration,
        } => handle_deploy(ctx, caller, &user_id, &name, &ram, &cpu, &duration).await,
        Command::Remove { name } => handle_remove(ctx, caller, &name).await,
        Command::DeleteAll => handle_delete_all(ctx, caller).await,
        Command::Confirm { token, decision } => handle_confirm(ctx, caller, token, decision).await,
        Command::Start { name } => {
            ctx.driver().start(caller, &name).await?;
            Ok(Outcome::success(Notice::new(
                "VPS Started",
                format!("VPS '{name}' has been started."),
            )))
        }
        Command::Stop { name } => {
            ctx.driver().stop(caller, &name).await?;
            Ok(Outcome::success(Notice::new(
                "VPS Stopped",
                format!("VPS '{name}' has been stopped."),
            )))
        }
        Command::Restart { name } => {
            ctx.driver().restart(caller, &name).await?;
            Ok(Outcome::success(Notice::new(
                "VPS Restarting",
                format!("VPS '{name}' is restarting."),
            )))
        }
        Command::RegenCredential { name } => handle_regen(ctx, caller, name.as_deref()).await,
        Command::ListAll => handle_list_all(ctx, caller).await,
        Command::NodeStatus => handle_node_status(ctx).await,
        Command::Tunnel { name, port } => handle_tunnel(ctx, caller, &name, port).await,
        Command::GrantAdmin { user_id } => handle_grant_admin(ctx, caller, &user_id).await,
        Command::Reconcile => handle_reconcile(ctx, caller).await,
    }
}

async fn handle_create(
    ctx: &VpsContext,
    caller: &Caller,
    creator: &str,
    tier: &str,
) -> Result<Outcome> {
    let tier: Tier = tier.parse()?;
    let provisioned = ctx.provision(&caller.id, creator, tier).await?;
    let spec = tier.spec();
    let name = &provisioned.record.container_name;

    let notice = Notice::new(
        format!("VPS '{name}' Created"),
        "Your new VPS is ready. The connection command was delivered privately.",
    )
    .field("Tier", tier.label())
    .field("CPU", format!("{} core(s)", spec.cpu))
    .field("RAM", spec.ram);

    let direct = Notice::new(
        format!("New VPS Created: {name}"),
        "Use the following command to connect:",
    )
    .field("SSH Command", &provisioned.credential);

    Ok(Outcome::with_direct(notice, direct))
}

async fn handle_deploy(
    ctx: &VpsContext,
    caller: &Caller,
    user_id: &str,
    name: &str,
    ram: &str,
    cpu: &str,
    duration: &str,
) -> Result<Outcome> {
    let provisioned = ctx.deploy(caller, user_id, name, ram, cpu, duration).await?;

    let notice = Notice::new(
        format!("VPS '{name}' Deployed"),
        format!("Deployed for user {user_id}. The connection command was delivered privately."),
    )
    .field("RAM", ram)
    .field("CPU", cpu)
    .field("Duration", duration);

    let direct = Notice::new(
        format!("VPS Deployed: {name}"),
        "Use the following command to connect:",
    )
    .field("SSH Command", &provisioned.credential);

    Ok(Outcome::with_direct(notice, direct))
}

async fn handle_remove(ctx: &VpsContext, caller: &Caller, name: &str) -> Result<Outcome> {
    let token = ctx.propose_remove(caller, name).await?;
    Ok(Outcome::success(
        Notice::new(
            "Confirm Deletion",
            format!("Are you sure you want to delete VPS '{name}'? Confirm within 60 seconds."),
        )
        .field("Token", token.to_string()),
    ))
}

async fn handle_delete_all(ctx: &VpsContext, caller: &Caller) -> Result<Outcome> {
    let token = ctx.propose_remove_all(caller).await?;
    Ok(Outcome::success(
        Notice::new(
            "Confirm Deletion",
            "Are you sure you want to delete ALL VPS instances? Confirm within 60 seconds.",
        )
        .field("Token", token.to_string()),
    ))
}

async fn handle_confirm(
    ctx: &VpsContext,
    caller: &Caller,
    token: Uuid,
    decision: Decision,
) -> Result<Outcome> {
    match ctx.resolve_confirmation(caller, token, decision).await? {
        ConfirmationOutcome::Cancelled => Ok(Outcome::success(Notice::new(
            "Operation Cancelled",
            "The delete operation has been cancelled. Nothing was changed.",
        ))),
        ConfirmationOutcome::Expired => Ok(Outcome::success(Notice::new(
            "Confirmation Expired",
            "The confirmation window has passed. Nothing was changed.",
        ))),
        ConfirmationOutcome::Executed(summary) => {
            let mut notice = Notice::new(
                "Deletion Complete",
                format!(
                    "Deleted {} instance(s), {} failed.",
                    summary.deleted,
                    summary.failed.len()
                ),
            );
            for (name, reason) in &summary.failed {
                notice = notice.field(format!("Failed: {name}"), reason);
            }
            Ok(Outcome::success(notice))
        }
    }
}

async fn handle_regen(ctx: &VpsContext, caller: &Caller, name: Option<&str>) -> Result<Outcome> {
    let (name, credential) = ctx.regen_credential(caller, name).await?;

    let notice = Notice::new(
        "SSH Session Regenerated",
        format!("New session for '{name}' generated. The command was delivered privately."),
    );
    let direct = Notice::new(
        "New SSH Session Generated",
        "Your SSH session has been regenerated successfully.",
    )
    .field("SSH Connection Command", credential);

    Ok(Outcome::with_direct(notice, direct))
}

async fn handle_list_all(ctx: &VpsContext, caller: &Caller) -> Result<Outcome> {
    ctx.require_admin(caller)?;
    let records = ctx.store().list_all().await.map_err(VpsError::from)?;

    if records.is_empty() {
        return Ok(Outcome::success(Notice::new(
            "VPS Instances",
            "No VPS data available.",
        )));
    }

    // The listing carries credentials, so the whole table goes through the
    // private channel; the broad response only carries the count.
    let mut direct = Notice::new(
        "All VPS Instances",
        "Detailed information about all VPS instances.",
    );
    for record in &records {
        let stats = instance_stats(ctx, &record.container_name).await;
        direct = direct.field(&record.container_name, describe_record(record, &stats));
    }

    let notice = Notice::new(
        "VPS Instances",
        format!(
            "{} instance(s) tracked. Details were delivered privately.",
            records.len()
        ),
    );
    Ok(Outcome::with_direct(notice, direct))
}

async fn handle_node_status(ctx: &VpsContext) -> Result<Outcome> {
    let host = probe::host_stats().await;
    let records = ctx.store().list_all().await.map_err(VpsError::from)?;

    let na = || "N/A".to_string();
    let mut notice = Notice::new(
        "System Resource Usage",
        "Current resource usage of the host system.",
    )
    .field(
        "Memory Usage",
        format!(
            "Used: {} / Total: {}",
            host.used_memory.unwrap_or_else(na),
            host.total_memory.unwrap_or_else(na)
        ),
    )
    .field(
        "Storage Usage",
        format!(
            "Used: {} / Total: {}",
            host.used_disk.unwrap_or_else(na),
            host.total_disk.unwrap_or_else(na)
        ),
    )
    .field("VPS Instances", records.len().to_string());

    for record in &records {
        let stats = instance_stats(ctx, &record.container_name).await;
        notice = notice.field(
            &record.container_name,
            format!(
                "Status: {}\nMemory: {}\nCPU: {}",
                fmt_state(&stats),
                fmt_memory(&stats),
                fmt_cpu(&stats)
            ),
        );
    }

    Ok(Outcome::success(notice))
}

async fn handle_tunnel(
    ctx: &VpsContext,
    caller: &Caller,
    name: &str,
    port: u16,
) -> Result<Outcome> {
    let public_port: u16 = rand::thread_rng().gen_range(1025..=65535);
    let command = vec![
        "ssh".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-R".to_string(),
        format!("{public_port}:localhost:{port}"),
        "ssh.localhost.run".to_string(),
    ];
    ctx.driver().exec_detached(caller, name, command).await?;

    Ok(Outcome::success(
        Notice::new(
            "SSH Tunneling",
            format!("A new tunnel has been created for VPS '{name}'."),
        )
        .field(
            "Public URL",
            format!("{}:{}", ctx.config().public_address, public_port),
        )
        .field(
            "Details",
            format!("Tunneling from port {port} on your VPS to public port {public_port}."),
        ),
    ))
}

async fn handle_grant_admin(ctx: &VpsContext, caller: &Caller, user_id: &str) -> Result<Outcome> {
    let newly = ctx.grant_admin(caller, user_id).await?;
    if newly {
        Ok(Outcome::success(Notice::new(
            "Admin Added",
            format!("{user_id} has been granted admin privileges."),
        )))
    } else {
        Ok(Outcome::success(Notice::new(
            "Already Admin",
            format!("{user_id} already has admin privileges."),
        )))
    }
}

async fn handle_reconcile(ctx: &VpsContext, caller: &Caller) -> Result<Outcome> {
    let report = ctx.reconcile(caller).await?;
    if report.is_consistent() {
        return Ok(Outcome::success(Notice::new(
            "Reconciliation",
            "Records and containers are consistent.",
        )));
    }

    let mut notice = Notice::new(
        "Reconciliation",
        "Records and containers have diverged; operator attention needed.",
    );
    for name in &report.missing_containers {
        notice = notice.field(format!("Missing container: {name}"), "record has no container");
    }
    for name in &report.orphaned_containers {
        notice = notice.field(format!("Orphaned container: {name}"), "container has no record");
    }
    Ok(Outcome::success(notice))
}

async fn instance_stats(ctx: &VpsContext, name: &str) -> InstanceStats {
    ctx.driver().stats(name).await.unwrap_or_default()
}

fn describe_record(record: &InstanceRecord, stats: &InstanceStats) -> String {
    format!(
        "User: {}\nRAM: {}\nCPU: {}\nOS: {}\nCreator: {}\nStatus: {}\nSSH: {}",
        record.owner,
        record.ram_limit,
        record.cpu_limit,
        record.os_type,
        record.creator,
        fmt_state(stats),
        record.ssh_command.as_deref().unwrap_or("(not captured)"),
    )
}

fn fmt_state(stats: &InstanceStats) -> &'static str {
    if stats.running {
        "running"
    } else {
        "stopped"
    }
}

fn fmt_memory(stats: &InstanceStats) -> String {
    match (stats.memory_usage_bytes, stats.memory_limit_bytes) {
        (Some(usage), Some(limit)) => format!(
            "{:.1} MiB / {:.1} MiB",
            usage as f64 / 1_048_576.0,
            limit as f64 / 1_048_576.0
        ),
        (Some(usage), None) => format!("{:.1} MiB", usage as f64 / 1_048_576.0),
        _ => "N/A".to_string(),
    }
}

fn fmt_cpu(stats: &InstanceStats) -> String {
    stats
        .cpu_percent
        .map(|pct| format!("{pct:.2}%"))
        .unwrap_or_else(|| "N/A".to_string())
}
