//! Workflow tests over a mocked container runtime and the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::{advance, Duration};
use vps_common::{InstanceRecord, MockContainerRuntime, Tier, VpsConfig, VpsError};
use vps_executor::{Caller, ContainerDriver};
use vps_lib::{
    dispatch, Command, ConfirmationOutcome, Decision, VpsContext,
};
use vps_store::{InstanceStore, MemoryStore, StoreError};

async fn context_with(
    mock: MockContainerRuntime,
    config: VpsConfig,
) -> (VpsContext, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let driver = ContainerDriver::new(Arc::new(mock));
    let ctx = VpsContext::new(driver, store.clone(), config)
        .await
        .unwrap();
    (ctx, store)
}

fn admin_config() -> VpsConfig {
    VpsConfig {
        server_limit: 1,
        admin_ids: vec!["admin".to_string()],
        ..Default::default()
    }
}

fn record(owner: &str, name: &str) -> InstanceRecord {
    InstanceRecord {
        owner: owner.to_string(),
        container_name: name.to_string(),
        ssh_command: Some("ssh old@sgp1.tmate.io".to_string()),
        ram_limit: "2g".to_string(),
        cpu_limit: "1".to_string(),
        creator: owner.to_string(),
        os_type: "Ubuntu 22.04".to_string(),
        expiry: None,
        ports: vec![],
    }
}

#[tokio::test]
async fn test_provision_4inv_creates_record_with_credential() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_create()
        .withf(|spec| spec.cpu == "1" && spec.ram == "2g" && spec.image == "ubuntu:22.04")
        .times(1)
        .returning(|_| Ok(()));
    mock.expect_owner_of().returning(|_| Ok("u1".to_string()));
    mock.expect_start().times(1).returning(|_| Ok(()));
    mock.expect_open_session()
        .times(1)
        .returning(|_| Ok(Some("ssh fresh@sgp1.tmate.io".to_string())));

    let (ctx, store) = context_with(mock, admin_config()).await;

    let provisioned = ctx.provision("u1", "User One", Tier::Inv4).await.unwrap();

    assert!(provisioned.record.container_name.starts_with("u1-"));
    assert_eq!(provisioned.credential, "ssh fresh@sgp1.tmate.io");
    assert_eq!(provisioned.record.owner, "u1");
    assert_eq!(provisioned.record.cpu_limit, "1");
    assert_eq!(provisioned.record.ram_limit, "2g");

    let stored = store
        .get(&provisioned.record.container_name)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_connectable());
}

#[tokio::test]
async fn test_provision_at_limit_fails_without_creating_anything() {
    // No expectations at all: any runtime call panics the test.
    let mock = MockContainerRuntime::new();
    let (ctx, store) = context_with(mock, admin_config()).await;
    store.insert(&record("u1", "u1-existing")).await.unwrap();

    let err = ctx.provision("u1", "User One", Tier::Inv4).await.unwrap_err();
    assert!(matches!(err, VpsError::QuotaExceeded { limit: 1 }));
    assert_eq!(store.count_all().await.unwrap(), 1);
}

#[tokio::test]
async fn test_second_provision_under_limit_one_hits_quota() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_create().times(1).returning(|_| Ok(()));
    mock.expect_owner_of().returning(|_| Ok("u1".to_string()));
    mock.expect_start().times(1).returning(|_| Ok(()));
    mock.expect_open_session()
        .times(1)
        .returning(|_| Ok(Some("ssh a@tmate".to_string())));

    let (ctx, _store) = context_with(mock, admin_config()).await;

    ctx.provision("u1", "User One", Tier::Inv4).await.unwrap();
    let err = ctx.provision("u1", "User One", Tier::Inv4).await.unwrap_err();
    assert!(matches!(err, VpsError::QuotaExceeded { .. }));
}

#[tokio::test]
async fn test_capture_failure_rolls_back_and_persists_nothing() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_create().times(1).returning(|_| Ok(()));
    mock.expect_owner_of().returning(|_| Ok("u1".to_string()));
    mock.expect_start().times(1).returning(|_| Ok(()));
    mock.expect_open_session().times(1).returning(|_| Ok(None));
    mock.expect_remove()
        .withf(|_, force| *force)
        .times(1)
        .returning(|_, _| Ok(()));

    let (ctx, store) = context_with(mock, admin_config()).await;

    let err = ctx.provision("u1", "User One", Tier::Inv4).await.unwrap_err();
    assert!(matches!(err, VpsError::CaptureTimeout));
    assert_eq!(store.count_all().await.unwrap(), 0);
}

/// Store wrapper that reports a name collision on the first insert only.
struct CollideOnce {
    inner: MemoryStore,
    collided: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl InstanceStore for CollideOnce {
    async fn insert(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        if !self.collided.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Duplicate(record.container_name.clone()));
        }
        self.inner.insert(record).await
    }
    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete(name).await
    }
    async fn update_credential(&self, name: &str, credential: &str) -> Result<(), StoreError> {
        self.inner.update_credential(name, credential).await
    }
    async fn get(&self, name: &str) -> Result<Option<InstanceRecord>, StoreError> {
        self.inner.get(name).await
    }
    async fn list_all(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        self.inner.list_all().await
    }
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<InstanceRecord>, StoreError> {
        self.inner.list_by_owner(owner).await
    }
    async fn count_by_owner(&self, owner: &str) -> Result<usize, StoreError> {
        self.inner.count_by_owner(owner).await
    }
    async fn count_all(&self) -> Result<usize, StoreError> {
        self.inner.count_all().await
    }
    async fn grant_admin(&self, user: &str) -> Result<(), StoreError> {
        self.inner.grant_admin(user).await
    }
    async fn list_admins(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_admins().await
    }
}

#[tokio::test]
async fn test_name_collision_is_retried_once_with_fresh_suffix() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_create().times(2).returning(|_| Ok(()));
    mock.expect_owner_of().returning(|_| Ok("u1".to_string()));
    mock.expect_start().times(2).returning(|_| Ok(()));
    mock.expect_open_session()
        .times(2)
        .returning(|_| Ok(Some("ssh again@tmate".to_string())));
    // The first attempt's container is cleaned up before the retry.
    mock.expect_remove().times(1).returning(|_, _| Ok(()));

    let store = Arc::new(CollideOnce {
        inner: MemoryStore::new(),
        collided: std::sync::atomic::AtomicBool::new(false),
    });
    let driver = ContainerDriver::new(Arc::new(mock));
    let ctx = VpsContext::new(driver, store.clone(), admin_config())
        .await
        .unwrap();

    let provisioned = ctx.provision("u1", "User One", Tier::Inv4).await.unwrap();
    assert_eq!(store.count_all().await.unwrap(), 1);
    assert!(provisioned.record.container_name.starts_with("u1-"));
}

#[tokio::test]
async fn test_delete_all_reports_partial_failure_and_prunes_store() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_stop().returning(|name| {
        if name == "u2-bad" {
            Err(VpsError::RuntimeApi("engine exploded".to_string()))
        } else {
            Ok(())
        }
    });
    mock.expect_remove().returning(|_, _| Ok(()));

    let (ctx, store) = context_with(mock, admin_config()).await;
    for (owner, name) in [("u1", "u1-ok"), ("u2", "u2-bad"), ("u3", "u3-ok")] {
        store.insert(&record(owner, name)).await.unwrap();
    }

    let admin = ctx.caller("admin").await;
    let token = ctx.propose_remove_all(&admin).await.unwrap();
    let outcome = ctx
        .resolve_confirmation(&admin, token, Decision::Confirm)
        .await
        .unwrap();

    let ConfirmationOutcome::Executed(summary) = outcome else {
        panic!("expected execution, got {outcome:?}");
    };
    assert_eq!(summary.deleted, 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "u2-bad");

    // Only the failed instance keeps its record: its store delete was never
    // reached because stop/remove did not succeed.
    assert_eq!(store.count_all().await.unwrap(), 1);
    assert!(store.get("u2-bad").await.unwrap().is_some());
}

#[tokio::test]
async fn test_cancelled_confirmation_changes_nothing() {
    // No stop/remove expectations: a lifecycle call would panic.
    let mock = MockContainerRuntime::new();
    let (ctx, store) = context_with(mock, admin_config()).await;
    store.insert(&record("u1", "u1-keep")).await.unwrap();

    let caller = ctx.caller("u1").await;
    let token = ctx.propose_remove(&caller, "u1-keep").await.unwrap();
    let outcome = ctx
        .resolve_confirmation(&caller, token, Decision::Cancel)
        .await
        .unwrap();

    assert_eq!(outcome, ConfirmationOutcome::Cancelled);
    assert!(store.get("u1-keep").await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_expired_confirmation_changes_nothing() {
    let mock = MockContainerRuntime::new();
    let (ctx, store) = context_with(mock, admin_config()).await;
    store.insert(&record("u1", "u1-keep")).await.unwrap();

    let caller = ctx.caller("u1").await;
    let token = ctx.propose_remove(&caller, "u1-keep").await.unwrap();

    advance(Duration::from_secs(61)).await;

    let outcome = ctx
        .resolve_confirmation(&caller, token, Decision::Confirm)
        .await
        .unwrap();
    assert_eq!(outcome, ConfirmationOutcome::Expired);
    assert!(store.get("u1-keep").await.unwrap().is_some());
}

#[tokio::test]
async fn test_proposal_requires_ownership_before_any_prompt() {
    let mock = MockContainerRuntime::new();
    let (ctx, store) = context_with(mock, admin_config()).await;
    store.insert(&record("u1", "u1-mine")).await.unwrap();

    let intruder = ctx.caller("u2").await;
    let err = ctx.propose_remove(&intruder, "u1-mine").await.unwrap_err();
    assert!(matches!(err, VpsError::NotOwner { .. }));
}

#[tokio::test]
async fn test_confirmation_token_is_bound_to_its_proposer() {
    let mock = MockContainerRuntime::new();
    let (ctx, store) = context_with(mock, admin_config()).await;
    store.insert(&record("u1", "u1-mine")).await.unwrap();

    let owner = ctx.caller("u1").await;
    let token = ctx.propose_remove(&owner, "u1-mine").await.unwrap();

    let other = ctx.caller("u2").await;
    let err = ctx
        .resolve_confirmation(&other, token, Decision::Confirm)
        .await
        .unwrap_err();
    assert!(matches!(err, VpsError::NotFound(_)));

    // The proposal survives the foreign attempt; the proposer can still
    // resolve it.
    let outcome = ctx
        .resolve_confirmation(&owner, token, Decision::Cancel)
        .await
        .unwrap();
    assert_eq!(outcome, ConfirmationOutcome::Cancelled);
}

#[tokio::test]
async fn test_regen_updates_only_the_credential() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_open_session()
        .times(1)
        .returning(|_| Ok(Some("ssh rotated@nyc1.tmate.io".to_string())));

    let (ctx, store) = context_with(mock, admin_config()).await;
    let before = record("u1", "u1-mine");
    store.insert(&before).await.unwrap();

    let caller = ctx.caller("u1").await;
    let (name, credential) = ctx.regen_credential(&caller, None).await.unwrap();
    assert_eq!(name, "u1-mine");
    assert_eq!(credential, "ssh rotated@nyc1.tmate.io");

    let after = store.get("u1-mine").await.unwrap().unwrap();
    assert_eq!(after.ssh_command.as_deref(), Some("ssh rotated@nyc1.tmate.io"));
    assert_eq!(
        InstanceRecord {
            ssh_command: before.ssh_command.clone(),
            ..after
        },
        before
    );
}

#[tokio::test]
async fn test_regen_for_user_without_instances() {
    let mock = MockContainerRuntime::new();
    let (ctx, _store) = context_with(mock, admin_config()).await;

    let caller = ctx.caller("u9").await;
    let err = ctx.regen_credential(&caller, None).await.unwrap_err();
    assert!(matches!(err, VpsError::NotFound(_)));
}

#[tokio::test]
async fn test_dispatch_renders_unknown_tier_as_failure() {
    let mock = MockContainerRuntime::new();
    let (ctx, _store) = context_with(mock, admin_config()).await;

    let outcome = dispatch(
        &ctx,
        "u1",
        None,
        Command::Create {
            tier: "5inv".to_string(),
        },
    )
    .await;
    assert!(outcome.failed);
    assert_eq!(outcome.notice.title, "Invalid Tier");
}

#[tokio::test]
async fn test_dispatch_start_on_foreign_instance_is_denied() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_owner_of().returning(|_| Ok("u1".to_string()));
    // No expect_start: the denial must happen before any mutating call.
    let (ctx, _store) = context_with(mock, admin_config()).await;

    let outcome = dispatch(
        &ctx,
        "u2",
        None,
        Command::Start {
            name: "u1-mine".to_string(),
        },
    )
    .await;
    assert!(outcome.failed);
    assert_eq!(outcome.notice.title, "Not Your Instance");
}

#[tokio::test]
async fn test_dispatch_delete_all_requires_admin() {
    let mock = MockContainerRuntime::new();
    let (ctx, _store) = context_with(mock, admin_config()).await;

    let outcome = dispatch(&ctx, "u1", None, Command::DeleteAll).await;
    assert!(outcome.failed);
    assert_eq!(outcome.notice.title, "Access Denied");
}

#[tokio::test]
async fn test_dispatch_create_keeps_credential_out_of_broad_output() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_create().times(1).returning(|_| Ok(()));
    mock.expect_owner_of().returning(|_| Ok("u1".to_string()));
    mock.expect_start().times(1).returning(|_| Ok(()));
    mock.expect_open_session()
        .times(1)
        .returning(|_| Ok(Some("ssh secret@tmate".to_string())));

    let (ctx, _store) = context_with(mock, admin_config()).await;

    let outcome = dispatch(
        &ctx,
        "u1",
        Some("User One"),
        Command::Create {
            tier: "4inv".to_string(),
        },
    )
    .await;

    assert!(!outcome.failed);
    let broad = format!("{:?}", outcome.notice);
    assert!(!broad.contains("ssh secret@tmate"));

    let direct = outcome.direct.expect("credential must arrive privately");
    assert!(direct
        .fields
        .iter()
        .any(|(_, value)| value == "ssh secret@tmate"));
}

#[tokio::test]
async fn test_grant_admin_persists_and_takes_effect() {
    let mock = MockContainerRuntime::new();
    let (ctx, store) = context_with(mock, admin_config()).await;

    let admin = ctx.caller("admin").await;
    assert!(ctx.grant_admin(&admin, "u7").await.unwrap());
    assert!(!ctx.grant_admin(&admin, "u7").await.unwrap());

    assert!(ctx.caller("u7").await.admin);
    assert_eq!(store.list_admins().await.unwrap(), vec!["u7".to_string()]);
}

#[tokio::test]
async fn test_reconcile_reports_divergence_both_ways() {
    let mut mock = MockContainerRuntime::new();
    mock.expect_list_managed()
        .returning(|| Ok(vec!["u1-live".to_string(), "u9-orphan".to_string()]));

    let (ctx, store) = context_with(mock, admin_config()).await;
    store.insert(&record("u1", "u1-live")).await.unwrap();
    store.insert(&record("u2", "u2-gone")).await.unwrap();

    let admin = ctx.caller("admin").await;
    let report = ctx.reconcile(&admin).await.unwrap();

    assert_eq!(report.missing_containers, vec!["u2-gone".to_string()]);
    assert_eq!(report.orphaned_containers, vec!["u9-orphan".to_string()]);
    assert!(!report.is_consistent());
}
