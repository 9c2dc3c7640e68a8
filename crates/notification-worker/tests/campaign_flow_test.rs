//! 推送活动完整流程集成测试
//!
//! 使用内存存储、内存用户目录和可编排推送通道，无需外部依赖。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notification_worker::NotificationService;
use notification_worker::directory::{InMemoryUserDirectory, TokenResolver};
use notification_worker::models::{
    AppUser, AudienceSelector, CampaignStatus, NotificationLog, TargetPatch, TargetStatus,
    UserRole,
};
use notification_worker::scheduler::GateDecision;
use notification_worker::service::CreateCampaign;
use notification_worker::store::{CampaignStore, MemoryCampaignStore};
use notification_worker::test_utils::{
    FlakyResolver, ScriptedTransport, admin_context, app_user, content, sample_log,
    sample_targets,
};
use push_shared::config::{DispatchConfig, SchedulerConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ==================== 测试装配 ====================

struct Harness {
    store: Arc<MemoryCampaignStore>,
    transport: Arc<ScriptedTransport>,
    service: NotificationService,
    shutdown: watch::Sender<bool>,
}

fn dispatch_config(max_concurrency: usize) -> DispatchConfig {
    DispatchConfig {
        max_concurrency,
        global_max_in_flight: 64,
        send_timeout_ms: 500,
        resolve_concurrency: 4,
    }
}

fn harness_with(
    users: Vec<AppUser>,
    transport: ScriptedTransport,
    resolver: Option<Arc<dyn TokenResolver>>,
    dispatch: DispatchConfig,
) -> Harness {
    let store = Arc::new(MemoryCampaignStore::new());
    let directory = Arc::new(InMemoryUserDirectory::new(users));
    let resolver: Arc<dyn TokenResolver> = match resolver {
        Some(resolver) => resolver,
        None => directory.clone(),
    };
    let transport = Arc::new(transport);
    let (tx, rx) = watch::channel(false);

    let service = NotificationService::build(
        store.clone(),
        directory,
        resolver,
        transport.clone(),
        &dispatch,
        &SchedulerConfig::default(),
        rx,
    );

    Harness {
        store,
        transport,
        service,
        shutdown: tx,
    }
}

fn harness(users: Vec<AppUser>, transport: ScriptedTransport) -> Harness {
    harness_with(users, transport, None, dispatch_config(4))
}

fn request(audience: AudienceSelector) -> CreateCampaign {
    CreateCampaign {
        content: content(),
        audience,
        schedule_at: None,
    }
}

fn forwarded(decision: GateDecision) -> JoinHandle<notification_worker::Result<CampaignStatus>> {
    match decision {
        GateDecision::Forwarded(handle) => handle,
        GateDecision::Scheduled { due_at } => panic!("unexpectedly scheduled at {due_at}"),
    }
}

/// 终态活动必须满足的不变量
fn assert_terminal_invariants(log: &NotificationLog) {
    let status = log.processing_status;
    assert!(status.is_terminal(), "status {status} is not terminal");
    assert!(log.processed_at.is_some(), "processed_at missing for {status}");

    let summary = log.summary();
    match status {
        CampaignStatus::CompletedNoTargets => assert_eq!(summary.total, 0),
        CampaignStatus::Completed => {
            assert!(summary.total > 0);
            assert_eq!(summary.success, summary.total);
        }
        CampaignStatus::PartiallyCompleted => {
            assert!(summary.success > 0 && summary.failed > 0);
            assert_eq!(summary.pending, 0);
        }
        CampaignStatus::Error => {
            // 全部失败，或启动失败时全部仍为 pending
            assert!(summary.total > 0);
            assert!(summary.failed == summary.total || summary.pending == summary.total);
        }
        other => panic!("unexpected terminal status {other}"),
    }

    for target in &log.targets {
        match target.status {
            TargetStatus::Success => {
                assert!(target.message_id.is_some());
                assert!(target.error.is_none());
                assert!(target.attempted_at.is_some());
            }
            TargetStatus::Failed => {
                assert!(target.error.is_some());
                assert!(target.message_id.is_none());
                assert!(target.attempted_at.is_some());
            }
            TargetStatus::Pending => {
                assert_eq!(status, CampaignStatus::Error);
                assert!(target.attempted_at.is_none());
            }
        }
    }
}

// ==================== 基本场景 ====================

#[tokio::test]
async fn test_all_targets_succeed() {
    let h = harness(
        vec![
            app_user("u1", &["t1"]),
            app_user("u2", &["t2"]),
            app_user("u3", &["t3"]),
        ],
        ScriptedTransport::new(),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    let status = forwarded(created.decision).await.unwrap().unwrap();
    assert_eq!(status, CampaignStatus::Completed);

    let log = h.service.get(&ctx, created.log_id).await.unwrap();
    assert_eq!(log.targets.len(), 3);
    assert!(log.targets.iter().all(|t| t.message_id.is_some()));
    assert_eq!(log.admin_creator.uid, "admin-1");
    assert_terminal_invariants(&log);
}

#[tokio::test]
async fn test_user_without_tokens_contributes_no_targets() {
    let h = harness(
        vec![app_user("u1", &[]), app_user("u2", &["t2"])],
        ScriptedTransport::new(),
    );
    let ctx = admin_context("admin-1", UserRole::SuperAdmin);

    let created = h
        .service
        .create(
            &ctx,
            request(AudienceSelector::Users {
                user_ids: vec!["u1".into(), "u2".into()],
            }),
        )
        .await
        .unwrap();
    let status = forwarded(created.decision).await.unwrap().unwrap();
    assert_eq!(status, CampaignStatus::Completed);

    let log = h.store.load(created.log_id).await.unwrap();
    assert_eq!(log.targets.len(), 1);
    assert_eq!(log.targets[0].user_id, "u2");
    assert_terminal_invariants(&log);
}

#[tokio::test]
async fn test_resolver_failure_is_not_fatal() {
    let directory = Arc::new(InMemoryUserDirectory::new(vec![
        app_user("u1", &["t1"]),
        app_user("u2", &["t2"]),
    ]));
    let flaky: Arc<dyn TokenResolver> = Arc::new(FlakyResolver::new(directory.clone(), &["u1"]));
    let h = harness_with(
        vec![app_user("u1", &["t1"]), app_user("u2", &["t2"])],
        ScriptedTransport::new(),
        Some(flaky),
        dispatch_config(4),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    assert_eq!(
        forwarded(created.decision).await.unwrap().unwrap(),
        CampaignStatus::Completed
    );

    let log = h.store.load(created.log_id).await.unwrap();
    assert_eq!(log.targets.len(), 1);
    assert_eq!(log.targets[0].user_id, "u2");
}

#[tokio::test]
async fn test_no_resolvable_tokens_skips_dispatch() {
    let h = harness(
        vec![app_user("u1", &[]), app_user("u2", &[])],
        ScriptedTransport::new(),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    let status = forwarded(created.decision).await.unwrap().unwrap();
    assert_eq!(status, CampaignStatus::CompletedNoTargets);

    let log = h.store.load(created.log_id).await.unwrap();
    assert!(log.targets.is_empty());
    assert_eq!(h.transport.send_count(), 0);
    assert_terminal_invariants(&log);
}

#[tokio::test]
async fn test_partial_failure() {
    let h = harness(
        vec![
            app_user("u1", &["t1"]),
            app_user("u2", &["t2"]),
            app_user("u3", &["t3"]),
            app_user("u4", &["t4"]),
        ],
        ScriptedTransport::new().fail_token("t2").fail_token("t4"),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    let status = forwarded(created.decision).await.unwrap().unwrap();
    assert_eq!(status, CampaignStatus::PartiallyCompleted);

    let log = h.store.load(created.log_id).await.unwrap();
    let failed: Vec<_> = log
        .targets
        .iter()
        .filter(|t| t.status == TargetStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|t| t.error.is_some()));
    assert_terminal_invariants(&log);
}

#[tokio::test]
async fn test_all_targets_fail() {
    let h = harness(
        vec![app_user("u1", &["t1", "t1b"])],
        ScriptedTransport::new().fail_token("t1").fail_token("t1b"),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    assert_eq!(
        forwarded(created.decision).await.unwrap().unwrap(),
        CampaignStatus::Error
    );
    assert_terminal_invariants(&h.store.load(created.log_id).await.unwrap());
}

#[tokio::test]
async fn test_scheduled_campaign_waits_for_due_time() {
    let h = harness(
        vec![app_user("u1", &["t1"]), app_user("u2", &["t2"])],
        ScriptedTransport::new(),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);
    let due = Utc::now() + chrono::Duration::hours(1);

    let created = h
        .service
        .create(
            &ctx,
            CreateCampaign {
                schedule_at: Some(due),
                ..request(AudienceSelector::AllUsers)
            },
        )
        .await
        .unwrap();
    assert!(matches!(created.decision, GateDecision::Scheduled { due_at } if due_at == due));

    let log = h.store.load(created.log_id).await.unwrap();
    assert_eq!(log.processing_status, CampaignStatus::Scheduled);
    assert!(log.targets.is_empty());
    assert!(log.processed_at.is_none());

    let gate = h.service.gate();
    assert!(gate.fire_due(Utc::now()).await.unwrap().is_empty());
    assert_eq!(h.transport.send_count(), 0);

    let handles = gate.fire_due(due).await.unwrap();
    assert_eq!(handles.len(), 1);
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), CampaignStatus::Completed);
    }

    let log = h.store.load(created.log_id).await.unwrap();
    assert_eq!(log.targets.len(), 2);
    assert_terminal_invariants(&log);
}

#[tokio::test]
async fn test_past_schedule_is_forwarded_immediately() {
    let h = harness(vec![app_user("u1", &["t1"])], ScriptedTransport::new());
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(
            &ctx,
            CreateCampaign {
                schedule_at: Some(Utc::now() - chrono::Duration::minutes(1)),
                ..request(AudienceSelector::AllUsers)
            },
        )
        .await
        .unwrap();
    assert_eq!(
        forwarded(created.decision).await.unwrap().unwrap(),
        CampaignStatus::Completed
    );
}

#[tokio::test]
async fn test_unreachable_transport_at_start() {
    let h = harness(
        vec![app_user("u1", &["t1"]), app_user("u2", &["t2"])],
        ScriptedTransport::new().unreachable(),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    assert_eq!(
        forwarded(created.decision).await.unwrap().unwrap(),
        CampaignStatus::Error
    );

    let log = h.store.load(created.log_id).await.unwrap();
    assert_eq!(log.targets.len(), 2);
    assert!(
        log.targets
            .iter()
            .all(|t| t.status == TargetStatus::Pending && t.attempted_at.is_none())
    );
    assert_eq!(h.transport.send_count(), 0);
    assert_terminal_invariants(&log);
}

// ==================== 幂等与恢复 ====================

#[tokio::test]
async fn test_second_run_does_not_resend() {
    let h = harness(
        vec![app_user("u1", &["t1"]), app_user("u2", &["t2"])],
        ScriptedTransport::new().fail_token("t2"),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    let first = forwarded(created.decision).await.unwrap().unwrap();
    let first_log = h.store.load(created.log_id).await.unwrap();

    let second = h
        .service
        .gate()
        .forward(created.log_id)
        .await
        .unwrap()
        .unwrap();
    let second_log = h.store.load(created.log_id).await.unwrap();

    assert_eq!(first, CampaignStatus::PartiallyCompleted);
    assert_eq!(first, second);
    assert_eq!(h.transport.send_count(), 2);
    assert_eq!(first_log.processed_at, second_log.processed_at);
    assert_eq!(first_log.targets, second_log.targets);
}

#[tokio::test]
async fn test_resume_during_dispatch_does_not_resend() {
    let h = harness(
        vec![app_user("u1", &["t1"]), app_user("u2", &["t2"])],
        ScriptedTransport::new().delay_all(Duration::from_millis(300)),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 第一次执行仍在发送，重叠的执行直接返回当前状态
    let overlapping = h.service.resume(created.log_id).await.unwrap().await.unwrap().unwrap();
    assert_eq!(overlapping, CampaignStatus::Processing);

    let status = forwarded(created.decision).await.unwrap().unwrap();
    assert_eq!(status, CampaignStatus::Completed);
    assert_eq!(h.transport.send_count(), 2);

    let mut sent = h.transport.sent_tokens();
    sent.sort();
    assert_eq!(sent, vec!["t1".to_string(), "t2".to_string()]);
    assert_terminal_invariants(&h.store.load(created.log_id).await.unwrap());
}

#[tokio::test]
async fn test_shutdown_drain_waits_for_in_flight_sends() {
    let h = harness(
        vec![app_user("u1", &["t1"]), app_user("u2", &["t2"])],
        ScriptedTransport::new().delay_all(Duration::from_millis(200)),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    // 不持有句柄，只靠 drain 等待
    drop(created.decision);
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.shutdown.send(true).unwrap();
    h.service.gate().drain().await;

    let stored = h.store.load(created.log_id).await.unwrap();
    assert_eq!(stored.processing_status, CampaignStatus::Completed);
    assert_eq!(h.transport.send_count(), 2);
    assert_terminal_invariants(&stored);
}

#[tokio::test]
async fn test_resume_sends_only_pending_targets() {
    let h = harness(vec![], ScriptedTransport::new());

    // 模拟崩溃前已处理一部分目标的活动
    let mut log = sample_log();
    log.processing_status = CampaignStatus::Processing;
    log.targets = sample_targets(&["done", "todo", "bad"]);
    let attempted = Utc::now() - chrono::Duration::minutes(5);
    log.targets[0].apply(&TargetPatch::success("msg-done", attempted));
    log.targets[2].apply(&TargetPatch::failure("rejected", attempted));
    h.store.save(&log).await.unwrap();

    let status = h.service.resume(log.id).await.unwrap().await.unwrap().unwrap();
    assert_eq!(status, CampaignStatus::PartiallyCompleted);
    assert_eq!(h.transport.sent_tokens(), vec!["todo".to_string()]);

    let stored = h.store.load(log.id).await.unwrap();
    assert_eq!(stored.targets[0].attempted_at, Some(attempted));
    assert_eq!(stored.targets[0].message_id.as_deref(), Some("msg-done"));
    assert_terminal_invariants(&stored);
}

#[tokio::test]
async fn test_recover_picks_up_unfinished_campaigns() {
    let h = harness(vec![app_user("u1", &["t1"])], ScriptedTransport::new());

    let pending = sample_log();
    h.store.save(&pending).await.unwrap();

    let mut finished = sample_log();
    finished.processing_status = CampaignStatus::Completed;
    finished.processed_at = Some(Utc::now());
    h.store.save(&finished).await.unwrap();

    let handles = h.service.recover().await.unwrap();
    assert_eq!(handles.len(), 1);
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), CampaignStatus::Completed);
    }
    assert_eq!(h.transport.send_count(), 1);
}

#[tokio::test]
async fn test_resume_rejects_terminal_campaign() {
    let h = harness(vec![], ScriptedTransport::new());
    let mut log = sample_log();
    log.processing_status = CampaignStatus::Completed;
    h.store.save(&log).await.unwrap();

    assert!(matches!(
        h.service.resume(log.id).await,
        Err(notification_worker::NotificationError::InvalidState { .. })
    ));
}

// ==================== 并发与超时 ====================

#[tokio::test]
async fn test_concurrency_is_bounded_per_dispatch() {
    let users: Vec<AppUser> = (0..20)
        .map(|i| app_user(&format!("u{i}"), &[format!("t{i}").as_str()]))
        .collect();
    let h = harness_with(
        users,
        ScriptedTransport::new().delay_all(Duration::from_millis(20)),
        None,
        dispatch_config(3),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    assert_eq!(
        forwarded(created.decision).await.unwrap().unwrap(),
        CampaignStatus::Completed
    );
    assert_eq!(h.transport.send_count(), 20);
    assert!(h.transport.max_in_flight() <= 3);
    assert!(h.transport.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_global_in_flight_limit_across_campaigns() {
    let users: Vec<AppUser> = (0..8)
        .map(|i| app_user(&format!("u{i}"), &[format!("t{i}").as_str()]))
        .collect();
    let h = harness_with(
        users,
        ScriptedTransport::new().delay_all(Duration::from_millis(20)),
        None,
        DispatchConfig {
            global_max_in_flight: 2,
            ..dispatch_config(8)
        },
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let a = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    let b = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    let (ra, rb) = tokio::join!(forwarded(a.decision), forwarded(b.decision));
    assert_eq!(ra.unwrap().unwrap(), CampaignStatus::Completed);
    assert_eq!(rb.unwrap().unwrap(), CampaignStatus::Completed);

    assert_eq!(h.transport.send_count(), 16);
    assert!(h.transport.max_in_flight() <= 2);
}

#[tokio::test]
async fn test_slow_send_times_out() {
    let h = harness(
        vec![app_user("u1", &["fast"]), app_user("u2", &["slow"])],
        ScriptedTransport::new().delay_token("slow", Duration::from_secs(10)),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    assert_eq!(
        forwarded(created.decision).await.unwrap().unwrap(),
        CampaignStatus::PartiallyCompleted
    );

    let log = h.store.load(created.log_id).await.unwrap();
    let slow = log.find_target("u2", "slow").unwrap();
    assert_eq!(slow.status, TargetStatus::Failed);
    assert_eq!(slow.error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_duplicate_pairs_are_collapsed() {
    let h = harness(
        vec![app_user("u1", &["t1", "t1"]), app_user("u2", &["t1"])],
        ScriptedTransport::new(),
    );
    let ctx = admin_context("admin-1", UserRole::SubAdmin);

    let created = h
        .service
        .create(
            &ctx,
            request(AudienceSelector::Users {
                user_ids: vec!["u1".into(), "u2".into(), "u1".into()],
            }),
        )
        .await
        .unwrap();
    forwarded(created.decision).await.unwrap().unwrap();

    let log = h.store.load(created.log_id).await.unwrap();
    let keys: Vec<_> = log
        .targets
        .iter()
        .map(|t| (t.user_id.clone(), t.token.clone()))
        .collect();
    assert_eq!(
        keys,
        vec![
            ("u1".to_string(), "t1".to_string()),
            ("u2".to_string(), "t1".to_string())
        ]
    );
}

// ==================== 取消 ====================

#[tokio::test]
async fn test_cancel_scheduled_campaign() {
    let h = harness(vec![app_user("u1", &["t1"])], ScriptedTransport::new());
    let owner = admin_context("owner", UserRole::SubAdmin);
    let due = Utc::now() + chrono::Duration::minutes(30);

    let created = h
        .service
        .create(
            &owner,
            CreateCampaign {
                schedule_at: Some(due),
                ..request(AudienceSelector::AllUsers)
            },
        )
        .await
        .unwrap();

    assert!(
        h.service
            .cancel_scheduled(&owner, created.log_id)
            .await
            .unwrap()
    );
    assert!(h.service.gate().fire_due(due).await.unwrap().is_empty());

    let log = h.store.load(created.log_id).await.unwrap();
    assert_eq!(log.processing_status, CampaignStatus::Cancelled);
    assert!(log.targets.is_empty());
    assert_eq!(h.transport.send_count(), 0);
}

#[tokio::test]
async fn test_cancel_after_dispatch_returns_false() {
    let h = harness(vec![app_user("u1", &["t1"])], ScriptedTransport::new());
    let ctx = admin_context("admin-1", UserRole::SuperAdmin);

    let created = h
        .service
        .create(&ctx, request(AudienceSelector::AllUsers))
        .await
        .unwrap();
    forwarded(created.decision).await.unwrap().unwrap();

    assert!(!h.service.cancel_scheduled(&ctx, created.log_id).await.unwrap());
}

#[tokio::test]
async fn test_create_rejects_blank_title() {
    let h = harness(vec![], ScriptedTransport::new());
    let ctx = admin_context("admin-1", UserRole::SubAdmin);
    let mut req = request(AudienceSelector::AllUsers);
    req.content.title = "   ".to_string();

    assert!(matches!(
        h.service.create(&ctx, req).await,
        Err(notification_worker::NotificationError::Validation(_))
    ));
    assert!(h.store.is_empty());
}

// ==================== 状态性质 ====================

#[tokio::test]
async fn test_terminal_status_matches_outcome_mix() {
    let cases: [(&[&str], &[&str], CampaignStatus); 4] = [
        (&["a", "b"], &[], CampaignStatus::Completed),
        (&["a", "b"], &["a", "b"], CampaignStatus::Error),
        (&["a", "b", "c"], &["b"], CampaignStatus::PartiallyCompleted),
        (&[], &[], CampaignStatus::CompletedNoTargets),
    ];

    for (tokens, failing, expected) in cases {
        let transport = failing
            .iter()
            .fold(ScriptedTransport::new(), |t, tok| t.fail_token(tok));
        let h = harness(vec![app_user("u1", tokens)], transport);
        let ctx = admin_context("admin-1", UserRole::SubAdmin);

        let created = h
            .service
            .create(&ctx, request(AudienceSelector::AllUsers))
            .await
            .unwrap();
        let status = forwarded(created.decision).await.unwrap().unwrap();
        assert_eq!(status, expected, "tokens={tokens:?} failing={failing:?}");

        let log = h.store.load(created.log_id).await.unwrap();
        assert_terminal_invariants(&log);
        assert_eq!(
            log.processing_status == CampaignStatus::CompletedNoTargets,
            log.targets.is_empty()
        );
    }
}
