//! Terminal registry behavior against simulated hosts

mod common;

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{alice, bob, engine, engine_with, root, test_config};
use ft_core::types::{AuditKind, StreamKind};
use ft_core::{FtError, HostId};
use ft_engine::shell::CLEAR_SEQUENCE;
use ft_engine::terminal::sweep_once;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_concurrent_create_yields_one_session() {
    let engine = engine(&["web"]);
    let host = engine.connector.host("web");
    *host.connect_delay.lock().unwrap() = Duration::from_millis(50);

    let registry = engine.state.registry.clone();
    let creates = (0..8).map(|_| {
        let registry = registry.clone();
        async move { registry.create(&alice(), &HostId::new("web")).await }
    });
    let sessions: Vec<_> = futures::future::join_all(creates)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let first = &sessions[0].id;
    assert!(sessions.iter().all(|s| &s.id == first));
    assert_eq!(host.connect_count(), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(engine.state.pool.len(), 1);
}

#[tokio::test]
async fn test_create_returns_existing_active_session() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;

    let first = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let second = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    assert_eq!(first.id, second.id);

    // Another operator gets their own session and connection
    let other = registry.create(&root(), &HostId::new("web")).await.unwrap();
    assert_ne!(first.id, other.id);
    assert_eq!(engine.state.pool.len(), 2);
}

#[tokio::test]
async fn test_create_unknown_host() {
    let engine = engine(&["web"]);
    let err = engine
        .state
        .registry
        .create(&alice(), &HostId::new("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::HostNotFound(_)));
    assert!(engine.state.registry.is_empty());
}

#[tokio::test]
async fn test_create_refused_connection() {
    let engine = engine(&["web"]);
    engine
        .connector
        .host("web")
        .refuse_connect
        .store(true, Ordering::SeqCst);

    let err = engine
        .state
        .registry
        .create(&alice(), &HostId::new("web"))
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::ConnectFailed { .. }));
    assert!(engine.state.registry.is_empty());
}

#[tokio::test]
async fn test_session_starts_in_home_directory() {
    let engine = engine(&["web"]);
    let session = engine
        .state
        .registry
        .create(&alice(), &HostId::new("web"))
        .await
        .unwrap();
    let descriptor = session.descriptor().await;
    assert_eq!(descriptor.current_dir, "/home/ubuntu");
    assert!(!descriptor.running);
}

#[tokio::test]
async fn test_cd_tracks_directory() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = &session.id;

    let out = registry.execute(id, &alice(), "cd /var/log", false).await.unwrap();
    assert_eq!(out.exit_code, Some(0));
    assert_eq!(out.current_dir, "/var/log");

    let out = registry.execute(id, &alice(), "ls", false).await.unwrap();
    assert_eq!(out.stdout, "syslog\n");

    let out = registry.execute(id, &alice(), "cd /nonexistent", false).await.unwrap();
    assert_eq!(out.exit_code, Some(1));
    assert!(out.stderr.contains("No such file or directory"));
    assert_eq!(out.current_dir, "/var/log");

    let out = registry.execute(id, &alice(), "cd -", false).await.unwrap();
    assert_eq!(out.stdout, "/home/ubuntu\n");
    assert_eq!(out.current_dir, "/home/ubuntu");

    let out = registry.execute(id, &alice(), "cd ..", false).await.unwrap();
    assert_eq!(out.current_dir, "/home");

    let out = registry.execute(id, &alice(), "cd", false).await.unwrap();
    assert_eq!(out.current_dir, "/home/ubuntu");
}

#[tokio::test]
async fn test_compound_cd_uses_pwd_probe() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = &session.id;

    let out = registry
        .execute(id, &alice(), "mkdir proj && cd proj", false)
        .await
        .unwrap();
    assert_eq!(out.exit_code, Some(0));
    assert_eq!(out.current_dir, "/home/ubuntu/proj");
    assert!(!out.stdout.contains("__FT_PWD__"));

    // The exit status of the user's command survives the probe
    let out = registry.execute(id, &alice(), "cd /tmp; false", false).await.unwrap();
    assert_eq!(out.exit_code, Some(1));
    assert_eq!(out.current_dir, "/tmp");

    let out = registry.execute(id, &alice(), "echo here", false).await.unwrap();
    assert_eq!(out.stdout, "here\n");
    assert_eq!(out.current_dir, "/tmp");
}

#[tokio::test]
async fn test_environment_persists_between_commands() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = &session.id;

    let out = registry
        .execute(id, &alice(), "export GREETING=hello", false)
        .await
        .unwrap();
    assert_eq!(out.exit_code, Some(0));

    let out = registry.execute(id, &alice(), "echo $GREETING", false).await.unwrap();
    assert_eq!(out.stdout, "hello\n");

    // Values expand remotely
    registry
        .execute(id, &alice(), "export TARGET=$HOME/out", false)
        .await
        .unwrap();
    let out = registry.execute(id, &alice(), "echo $TARGET", false).await.unwrap();
    assert_eq!(out.stdout, "/home/ubuntu/out\n");

    registry.execute(id, &alice(), "unset GREETING", false).await.unwrap();
    let out = registry
        .execute(id, &alice(), "echo \"[$GREETING]\"", false)
        .await
        .unwrap();
    assert_eq!(out.stdout, "[]\n");
}

#[tokio::test]
async fn test_forced_terminal_variables() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();

    let out = registry
        .execute(&session.id, &alice(), "echo $TERM $DEBIAN_FRONTEND", false)
        .await
        .unwrap();
    assert_eq!(out.stdout, "xterm-256color noninteractive\n");
}

#[tokio::test]
async fn test_nonzero_exit_is_not_an_error() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();

    let out = registry
        .execute(&session.id, &alice(), "no-such-tool", false)
        .await
        .unwrap();
    assert_eq!(out.exit_code, Some(127));
    assert!(out.stderr.contains("command not found"));
}

#[tokio::test]
async fn test_clear_is_synthesized() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let host = engine.connector.host("web");

    let before = host.exec_count();
    let out = registry.execute(&session.id, &alice(), "clear", false).await.unwrap();
    assert!(out.clear);
    assert_eq!(out.stdout, CLEAR_SEQUENCE);
    assert_eq!(host.exec_count(), before);

    let out = registry
        .execute(&session.id, &alice(), "clear-remote", false)
        .await
        .unwrap();
    assert!(out.clear);
    assert_eq!(out.stdout, CLEAR_SEQUENCE);
}

#[tokio::test]
async fn test_poll_has_no_duplicates_or_gaps() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = &session.id;

    registry.execute(id, &alice(), "echo one", false).await.unwrap();
    let first = registry.poll(id, &alice(), Some(0)).await.unwrap();
    assert!(first.has_new_output);
    assert_eq!(first.stdout, "one\n");
    assert_eq!(first.lines[0].stream, StreamKind::Input);
    assert_eq!(first.lines[0].text, "echo one\n");

    registry.execute(id, &alice(), "echo two", false).await.unwrap();
    let second = registry.poll(id, &alice(), Some(first.timestamp)).await.unwrap();
    assert_eq!(second.stdout, "two\n");
    assert!(second.timestamp > first.timestamp);
    assert!(second.lines.iter().all(|l| l.timestamp > first.timestamp));

    let idle = registry.poll(id, &alice(), Some(second.timestamp)).await.unwrap();
    assert!(!idle.has_new_output);
    assert!(idle.lines.is_empty());
    assert_eq!(idle.timestamp, second.timestamp);
    assert_eq!(idle.current_dir, "/home/ubuntu");
}

#[tokio::test]
async fn test_hard_block_happens_before_any_exec() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let host = engine.connector.host("web");

    let before = host.exec_count();
    let err = registry
        .execute(&session.id, &alice(), "rm -rf /", true)
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::CommandBlocked(_)));
    assert_eq!(host.exec_count(), before);

    let audit = engine.inventory.recent_audit(10).await;
    assert!(audit.iter().any(|r| r.kind == AuditKind::CommandBlocked));

    // The session is usable afterwards
    let out = registry.execute(&session.id, &alice(), "echo ok", false).await.unwrap();
    assert_eq!(out.stdout, "ok\n");
}

#[tokio::test]
async fn test_dangerous_command_needs_confirmation() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let host = engine.connector.host("web");

    let before = host.exec_count();
    let err = registry
        .execute(&session.id, &alice(), "shutdown -h now", false)
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::ConfirmationRequired(_)));
    assert_eq!(host.exec_count(), before);

    let out = registry
        .execute(&session.id, &alice(), "shutdown -h now", true)
        .await
        .unwrap();
    assert!(out.warning.is_some());
    assert_eq!(host.exec_count(), before + 1);
}

#[tokio::test]
async fn test_dangerous_command_rejected_by_policy() {
    let mut config = test_config(&["web"]);
    config.policy.allow_dangerous = false;
    let engine = engine_with(config);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();

    let err = registry
        .execute(&session.id, &alice(), "reboot", true)
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::CommandBlocked(_)));
}

#[tokio::test]
async fn test_busy_session_rejects_second_command() {
    let engine = engine(&["web"]);
    let registry = engine.state.registry.clone();
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = session.id.clone();

    let accepted = registry.submit(&id, &alice(), "sleep 0.3", false).await.unwrap();
    assert!(accepted.pending);
    assert!(accepted.exit_code.is_none());
    assert!(session.is_running());

    let err = registry.execute(&id, &alice(), "echo hi", false).await.unwrap_err();
    assert!(matches!(err, FtError::SessionBusy(_)));

    wait_until(|| !session.is_running()).await;
    let out = registry.execute(&id, &alice(), "echo hi", false).await.unwrap();
    assert_eq!(out.stdout, "hi\n");
}

#[tokio::test]
async fn test_submitted_output_arrives_by_polling() {
    let engine = engine(&["web"]);
    let registry = engine.state.registry.clone();
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = session.id.clone();

    let start = registry.poll(&id, &alice(), Some(0)).await.unwrap().timestamp;
    registry.submit(&id, &alice(), "echo later", false).await.unwrap();
    wait_until(|| !session.is_running()).await;

    let polled = registry.poll(&id, &alice(), Some(start)).await.unwrap();
    assert_eq!(polled.stdout, "later\n");
    assert!(!polled.running);
}

#[tokio::test]
async fn test_sessions_are_private_to_their_operator() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = &session.id;

    let err = registry.execute(id, &bob(), "echo hi", false).await.unwrap_err();
    assert!(matches!(err, FtError::SessionNotFound(_)));
    assert!(registry.list(&bob()).await.is_empty());

    // A close by someone else is ignored
    registry.close(id, &bob());
    assert!(registry.get(id, &alice()).is_ok());

    // Elevated operators see everything
    assert!(registry.get(id, &root()).is_ok());
    assert_eq!(registry.list(&root()).await.len(), 1);
}

#[tokio::test]
async fn test_double_close_is_harmless() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = session.id.clone();

    registry.close(&id, &alice());
    registry.close(&id, &alice());
    registry.close(&ft_core::SessionId::new("never-existed"), &alice());

    assert!(matches!(
        registry.get(&id, &alice()),
        Err(FtError::SessionNotFound(_))
    ));
    let err = registry.execute(&id, &alice(), "echo hi", false).await.unwrap_err();
    assert!(matches!(err, FtError::SessionNotFound(_)));

    // The connection goes once its last session is gone
    let pool = engine.state.pool.clone();
    wait_until(|| pool.is_empty()).await;
}

#[tokio::test]
async fn test_new_session_after_close() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let first = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    registry.close(&first.id, &alice());

    let second = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.current_dir().await, "/home/ubuntu");
}

#[tokio::test]
async fn test_release_closes_sessions() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();

    assert!(
        engine
            .state
            .pool
            .release(&HostId::new("web"), &alice().id)
            .await
    );
    assert!(!session.is_active());
    assert_eq!(engine.state.pool.lock_count(), 0);

    let err = registry
        .execute(&session.id, &alice(), "echo hi", false)
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::SessionNotFound(_)));

    // The idle sweep forgets it
    sweep_once(&engine.state).await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_idle_sweep_releases_sessions_and_connections() {
    let mut config = test_config(&["web"]);
    config.timeouts.idle_session = Duration::from_millis(50);
    let engine = engine_with(config);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();

    sweep_once(&engine.state).await;
    assert_eq!(registry.len(), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    sweep_once(&engine.state).await;
    assert!(registry.is_empty());
    assert!(!session.is_active());

    let pool = engine.state.pool.clone();
    wait_until(|| pool.is_empty() && pool.lock_count() == 0).await;
}

#[tokio::test]
async fn test_dropped_connection_is_replaced() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let host = engine.connector.host("web");

    registry.execute(&session.id, &alice(), "cd /srv", false).await.unwrap();
    host.fail_execs.store(1, Ordering::SeqCst);

    let out = registry.execute(&session.id, &alice(), "echo back", false).await.unwrap();
    assert_eq!(out.stdout, "back\n");
    assert_eq!(out.current_dir, "/srv");
    assert_eq!(host.connect_count(), 2);
    assert!(session.is_active());
}

#[tokio::test]
async fn test_create_retries_refused_connect_once() {
    let engine = engine(&["web"]);
    let host = engine.connector.host("web");
    host.refuse_next.store(1, Ordering::SeqCst);

    let session = engine
        .state
        .registry
        .create(&alice(), &HostId::new("web"))
        .await
        .unwrap();
    assert!(session.is_active());
    assert_eq!(session.current_dir().await, "/home/ubuntu");
    assert_eq!(host.connect_count(), 1);
    assert_eq!(host.refuse_next.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_create_requires_host_access() {
    let engine = engine(&["web"]);
    let err = engine
        .state
        .registry
        .create(&bob(), &HostId::new("web"))
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::AccessDenied(_)));
    assert_eq!(engine.connector.host("web").connect_count(), 0);
    assert!(engine.state.registry.is_empty());
}

#[tokio::test]
async fn test_terminal_runs_alongside_long_fanout() {
    let mut config = test_config(&["web"]);
    config.timeouts.command = Duration::from_secs(1);
    let engine = engine_with(config);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let host = engine.connector.host("web");

    engine
        .state
        .fanout
        .run(&alice(), "sleep 3", &[HostId::new("web")], false)
        .await
        .unwrap();
    wait_until(|| host.scripts().iter().any(|s| s.contains("sleep 3"))).await;

    let started = Instant::now();
    let out = registry.execute(&session.id, &alice(), "echo hi", false).await.unwrap();
    assert_eq!(out.stdout, "hi\n");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.state.pool.len(), 1);
}

#[tokio::test]
async fn test_serialized_wait_counts_against_timeout() {
    let engine = engine(&["web"]);
    let conn = engine
        .state
        .pool
        .acquire(&HostId::new("web"), &alice().id, false)
        .await
        .unwrap();

    let holder = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec_serialized("sleep 2", Duration::from_secs(5)).await })
    };
    wait_until(|| conn.is_busy()).await;

    let started = Instant::now();
    let err = conn
        .exec_serialized("echo hi", Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, FtError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(holder.await.unwrap().unwrap().exit_code, 0);
}

#[tokio::test]
async fn test_interrupt_is_echoed() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let host = engine.connector.host("web");

    registry.interrupt(&session.id, &alice()).await.unwrap();
    assert_eq!(host.interrupts.load(Ordering::SeqCst), 1);

    let polled = registry.poll(&session.id, &alice(), Some(0)).await.unwrap();
    assert_eq!(polled.lines.last().map(|l| l.text.as_str()), Some("^C\n"));
}

#[tokio::test]
async fn test_completions() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();
    let id = &session.id;

    let commands = registry.completions(id, &alice(), "ec", None).await.unwrap();
    assert_eq!(commands, vec!["echo".to_string()]);

    let files = registry.completions(id, &alice(), "cat no", None).await.unwrap();
    assert_eq!(files, vec!["cat notes.txt".to_string()]);

    let elsewhere = registry
        .completions(id, &alice(), "cat sys", Some("/var/log"))
        .await
        .unwrap();
    assert_eq!(elsewhere, vec!["cat syslog".to_string()]);

    assert!(registry.completions(id, &alice(), "", None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_terminal_commands_are_audited() {
    let engine = engine(&["web"]);
    let registry = &engine.state.registry;
    let session = registry.create(&alice(), &HostId::new("web")).await.unwrap();

    registry.execute(&session.id, &alice(), "echo audited", false).await.unwrap();

    let audit = engine.inventory.recent_audit(10).await;
    let record = audit
        .iter()
        .find(|r| r.kind == AuditKind::TerminalCommand)
        .unwrap();
    assert_eq!(record.operator_id, alice().id);
    assert_eq!(record.payload["command"], "echo audited");
    assert_eq!(record.payload["exitCode"], 0);
}
