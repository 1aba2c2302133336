//! Integration tests for the session registry.
//!
//! These drive complete session lifecycles through the public API against
//! in-memory drivers, without spawning shells or opening sockets.
//!
//! # Test Organization
//!
//! - `local_sessions` - PTY session lifecycle
//! - `remote_sessions` - connection flow, host keys, liveness
//! - `admission` - session limit and concurrent creation
//! - `metrics` - recorded samples through the registry
//! - `shutdown` - bounded teardown

mod common;

use common::{fast_config, local, remote, Harness, DEFAULT_TIMEOUT, SHORT_TIMEOUT};
use session::test_support::RemoteScript;
use session::{ConnectionStatus, HostKeyCheck, MessageKind, SessionError, SessionEvent, TermSize};
use std::time::Duration;

// ============================================================================
// Local Session Tests
// ============================================================================

mod local_sessions {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn local_session_goes_straight_to_connected() {
        let h = Harness::new();
        let id = h.registry.create_local(local("l1")).expect("should create");

        assert_eq!(h.registry.status(&id), Some(ConnectionStatus::Connected));
        assert_eq!(h.sink.statuses(&id), vec![ConnectionStatus::Connected]);
        assert_eq!(h.registry.active_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn output_and_input_flow_through() {
        let h = Harness::new();
        let id = h.registry.create_local(local("l1")).expect("should create");
        let process = h.local.handle(0).expect("spawned");

        process.feed(b"$ ");
        assert!(h.sink.wait_for_output(&id, "$ ", DEFAULT_TIMEOUT).await);

        h.registry.write(&id, b"ls\r").expect("should write");
        h.registry.write(&id, b"pwd\r").expect("should write");
        assert_eq!(process.written(), b"ls\rpwd\r".to_vec());

        h.registry.resize(&id, 120, 40).expect("should resize");
        assert_eq!(process.resizes(), vec![TermSize::new(120, 40)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn process_exit_reports_closed_and_keeps_entry() {
        let h = Harness::new();
        let id = h.registry.create_local(local("l1")).expect("should create");

        h.local.handle(0).expect("spawned").finish();

        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Closed, DEFAULT_TIMEOUT)
                .await
        );
        assert!(h.sink.output_text(&id).contains("Process exited"));
        assert_eq!(h.registry.status(&id), Some(ConnectionStatus::Closed));
        assert_eq!(h.registry.active_count(), 0);

        h.registry.close(&id).expect("should close");
        assert!(h.registry.status(&id).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_is_idempotent() {
        let h = Harness::new();
        let id = h.registry.create_local(local("l1")).expect("should create");

        h.registry.close(&id).expect("first close");
        h.registry.close(&id).expect("second close");
        h.registry
            .wait_for_close(&id, DEFAULT_TIMEOUT)
            .await
            .expect("reader should finish");
        h.registry.close(&id).expect("close after removal");

        let closed = h
            .sink
            .statuses(&id)
            .into_iter()
            .filter(|s| *s == ConnectionStatus::Closed)
            .count();
        assert_eq!(closed, 1);
        assert!(!h.sink.output_text(&id).contains("Process exited"));
        assert!(h.local.handle(0).expect("spawned").was_released());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn write_to_closed_session_is_dropped() {
        let h = Harness::new();
        let id = h.registry.create_local(local("l1")).expect("should create");
        let process = h.local.handle(0).expect("spawned");

        h.registry.close(&id).expect("should close");
        h.registry.write(&id, b"too late").expect("silently dropped");

        assert!(process.written().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_session_is_not_found() {
        let h = Harness::new();
        assert!(matches!(
            h.registry.write("ghost", b"x"),
            Err(SessionError::NotFound(id)) if id == "ghost"
        ));
        assert!(matches!(
            h.registry.resize("ghost", 80, 24),
            Err(SessionError::NotFound(_))
        ));
        assert!(matches!(
            h.registry.emit_message("ghost", "hi", MessageKind::Info),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_failure_reports_failed_status() {
        let h = Harness::new();
        h.local.fail_with("No such file or directory (os error 2)");

        let result = h.registry.create_local(local("l1"));

        assert!(matches!(result, Err(SessionError::Spawn { .. })));
        assert_eq!(h.sink.statuses("l1"), vec![ConnectionStatus::Failed]);
        let error = h.sink.last_error("l1").expect("error message");
        assert!(error.contains("No such file or directory"), "{error}");
        assert_eq!(h.registry.active_count(), 0);
    }
}

// ============================================================================
// Remote Session Tests
// ============================================================================

mod remote_sessions {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn trusted_host_connects() {
        let h = Harness::new();
        let id = h.registry.create_remote(remote("r1")).expect("should create");

        assert!(
            h.sink
                .wait_for_output(&id, "Session ready", DEFAULT_TIMEOUT)
                .await
        );
        assert_eq!(
            h.sink.statuses(&id),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]
        );
        assert_eq!(
            h.remote.handle().steps(),
            vec!["dial", "handshake", "verify_host_key", "authenticate", "open_channel"]
        );

        let text = h.sink.output_text(&id);
        assert!(text.contains("Authentication methods: agent, password"));
        assert!(text.contains("Connecting to alice@example.com:22"));
        assert!(text.contains("Connection established"));
        assert!(text.contains("\x1bc"));
        assert!(!text.contains("hunter2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn status_events_carry_tab_id() {
        let h = Harness::new();
        let id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Connected, DEFAULT_TIMEOUT)
                .await
        );

        let tabs: Vec<_> = h
            .sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::StatusChanged { tab_id, .. } => Some(tab_id),
                SessionEvent::Output { .. } => None,
            })
            .collect();
        assert!(tabs.iter().all(|tab| tab == "tab-r1"), "{tabs:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn input_before_connect_is_dropped() {
        let h = Harness::with_remote(RemoteScript {
            dial_delay: Duration::from_millis(200),
            ..RemoteScript::default()
        });
        let id = h.registry.create_remote(remote("r1")).expect("should create");

        h.registry.write(&id, b"early").expect("silently dropped");
        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Connected, DEFAULT_TIMEOUT)
                .await
        );
        assert!(h.sink.wait_for_output(&id, "Session ready", DEFAULT_TIMEOUT).await);

        h.registry.write(&id, b"late").expect("should write");
        assert_eq!(h.remote.handle().stream.written(), b"late".to_vec());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resize_while_connecting_applies_to_channel() {
        let h = Harness::with_remote(RemoteScript {
            dial_delay: Duration::from_millis(200),
            ..RemoteScript::default()
        });
        let id = h.registry.create_remote(remote("r1")).expect("should create");

        h.registry.resize(&id, 132, 43).expect("should record size");
        assert!(h.sink.wait_for_output(&id, "Session ready", DEFAULT_TIMEOUT).await);

        assert_eq!(h.remote.handle().channel_size(), Some(TermSize::new(132, 43)));
        let info = h.registry.session(&id).expect("registered");
        assert_eq!((info.cols, info.rows), (132, 43));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_host_key_prompts_then_accepts() {
        let h = Harness::with_remote(RemoteScript {
            host_key: HostKeyCheck::Unknown {
                fingerprint: "SHA256:ab:cd".into(),
            },
            ..RemoteScript::default()
        });
        let id = h.registry.create_remote(remote("r1")).expect("should create");

        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::HostKeyPrompt, DEFAULT_TIMEOUT)
                .await
        );
        assert!(h.sink.wait_for_output(&id, "SHA256:ab:cd", DEFAULT_TIMEOUT).await);
        assert!(h.registry.session(&id).expect("registered").host_key_prompt);

        // Routine messages stay off the terminal while the prompt is up.
        h.registry
            .emit_message(&id, "background noise", MessageKind::Info)
            .expect("should emit");
        assert!(!h.sink.output_text(&id).contains("background noise"));

        h.registry.accept_host_key(&id, true).expect("prompt pending");
        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Connected, DEFAULT_TIMEOUT)
                .await
        );

        assert_eq!(
            h.sink.statuses(&id),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::HostKeyPrompt,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
        let handle = h.remote.handle();
        assert!(handle.host_key_trusted());
        let steps = handle.steps();
        let trusted_at = steps.iter().position(|s| *s == "trust_host_key");
        let auth_at = steps.iter().position(|s| *s == "authenticate");
        assert!(trusted_at < auth_at, "{steps:?}");
        assert!(!h.registry.session(&id).expect("registered").host_key_prompt);
        assert!(matches!(
            h.registry.accept_host_key(&id, true),
            Err(SessionError::NoPendingHostKey(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejected_host_key_fails() {
        let h = Harness::with_remote(RemoteScript {
            host_key: HostKeyCheck::Changed {
                fingerprint: "SHA256:ff:ee".into(),
            },
            ..RemoteScript::default()
        });
        let id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::HostKeyPrompt, DEFAULT_TIMEOUT)
                .await
        );

        h.registry.accept_host_key(&id, false).expect("prompt pending");

        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Failed, DEFAULT_TIMEOUT)
                .await
        );
        let error = h.sink.last_error(&id).expect("error message");
        assert!(error.starts_with("host key verification failed"), "{error}");
        assert!(h.sink.wait_for_output(&id, "Press Enter to retry", SHORT_TIMEOUT).await);
        assert!(h.sink.output_text(&id).contains("known_hosts"));
        assert!(!h.remote.handle().host_key_trusted());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_during_prompt_aborts_quietly() {
        let h = Harness::with_remote(RemoteScript {
            host_key: HostKeyCheck::Unknown {
                fingerprint: "SHA256:01".into(),
            },
            ..RemoteScript::default()
        });
        let id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::HostKeyPrompt, DEFAULT_TIMEOUT)
                .await
        );

        h.registry.close(&id).expect("should close");
        h.registry
            .wait_for_close(&id, DEFAULT_TIMEOUT)
            .await
            .expect("connect thread should unwind");

        assert_eq!(
            h.sink.statuses(&id),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::HostKeyPrompt,
                ConnectionStatus::Closed,
            ]
        );
        assert!(h.registry.status(&id).is_none());
        assert!(!h.remote.handle().steps().contains(&"authenticate"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn auth_failure_shows_hint() {
        let h = Harness::with_remote(RemoteScript {
            auth_error: Some("[Session(-18)] Username/PublicKey combination invalid".into()),
            ..RemoteScript::default()
        });
        let id = h.registry.create_remote(remote("r1")).expect("should create");

        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Failed, DEFAULT_TIMEOUT)
                .await
        );
        assert_eq!(
            h.sink.last_error(&id).as_deref(),
            Some("authentication failed: Username/PublicKey combination invalid")
        );
        assert!(h.sink.wait_for_output(&id, "chmod 600", SHORT_TIMEOUT).await);

        let info = h.registry.session(&id).expect("failed sessions stay listed");
        assert_eq!(info.status, ConnectionStatus::Failed);
        assert_eq!(h.registry.active_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dial_error_is_normalized() {
        let h = Harness::with_remote(RemoteScript {
            dial_error: Some("ssh: failed to connect: connection refused".into()),
            ..RemoteScript::default()
        });
        let id = h.registry.create_remote(remote("r1")).expect("should create");

        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Failed, DEFAULT_TIMEOUT)
                .await
        );
        assert_eq!(h.sink.last_error(&id).as_deref(), Some("connection refused"));
        assert!(h.sink.wait_for_output(&id, "sshd is running", SHORT_TIMEOUT).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn retry_is_a_new_session() {
        let h = Harness::with_remote(RemoteScript {
            dial_error: Some("connection timed out".into()),
            ..RemoteScript::default()
        });
        let first = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(
            h.sink
                .wait_for_status(&first, ConnectionStatus::Failed, DEFAULT_TIMEOUT)
                .await
        );
        assert!(h.sink.wait_for_output(&first, "VPN", SHORT_TIMEOUT).await);

        h.remote.update_script(|script| script.dial_error = None);
        h.registry.close(&first).expect("should close");
        h.registry
            .wait_for_close(&first, DEFAULT_TIMEOUT)
            .await
            .expect("failed session should be released");
        let second = h.registry.create_remote(remote("r2")).expect("should create");

        assert!(
            h.sink
                .wait_for_status(&second, ConnectionStatus::Connected, DEFAULT_TIMEOUT)
                .await
        );
        assert_eq!(h.registry.status(&first), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn server_eof_reports_closed() {
        let h = Harness::new();
        let id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(h.sink.wait_for_output(&id, "Session ready", DEFAULT_TIMEOUT).await);

        h.remote.handle().stream.feed(b"logout\r\n");
        h.remote.handle().stream.finish();

        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Closed, DEFAULT_TIMEOUT)
                .await
        );
        let text = h.sink.output_text(&id);
        assert!(text.contains("logout"));
        assert!(text.contains("Connection closed"));
    }

    // ==== Liveness Tests ====

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unresponsive_server_hangs_then_recovers() {
        let h = Harness::new();
        let id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(h.sink.wait_for_output(&id, "Session ready", DEFAULT_TIMEOUT).await);
        let server = h.remote.handle();

        server.set_responsive(false);
        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Hanging, DEFAULT_TIMEOUT)
                .await
        );
        server.set_responsive(true);
        assert!(h.sink.wait_for_output(&id, "Connection restored", DEFAULT_TIMEOUT).await);

        assert_eq!(h.registry.status(&id), Some(ConnectionStatus::Connected));
        let statuses = h.sink.statuses(&id);
        assert_eq!(
            &statuses[statuses.len() - 2..],
            &[ConnectionStatus::Hanging, ConnectionStatus::Connected]
        );
        assert!(server.probe_count() >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn data_from_hanging_server_recovers() {
        let h = Harness::new();
        let id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(h.sink.wait_for_output(&id, "Session ready", DEFAULT_TIMEOUT).await);
        let server = h.remote.handle();

        server.set_responsive(false);
        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Hanging, DEFAULT_TIMEOUT)
                .await
        );
        server.stream.feed(b"still here");
        assert!(h.sink.wait_for_output(&id, "still here", DEFAULT_TIMEOUT).await);
        assert!(h.sink.wait_for_output(&id, "Connection restored", SHORT_TIMEOUT).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hanging_too_long_fails() {
        let h = Harness::new();
        let id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(h.sink.wait_for_output(&id, "Session ready", DEFAULT_TIMEOUT).await);

        h.remote.handle().set_responsive(false);

        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::Failed, DEFAULT_TIMEOUT)
                .await
        );
        let error = h.sink.last_error(&id).expect("error message");
        assert!(error.contains("stopped responding"), "{error}");
        assert!(h.sink.wait_for_output(&id, "Press Enter to retry", SHORT_TIMEOUT).await);
    }
}

// ============================================================================
// Admission Tests
// ============================================================================

mod admission {
    use super::*;
    use pretty_assertions::assert_eq;
    use session::SessionConfig;
    use std::sync::Arc;

    fn limited(max_sessions: usize) -> Harness {
        Harness::with_config(SessionConfig {
            max_sessions,
            ..fast_config()
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn limit_counts_local_and_remote() {
        let h = limited(2);
        h.registry.create_local(local("l1")).expect("first");
        h.registry.create_remote(remote("r1")).expect("second");

        assert!(matches!(
            h.registry.create_local(local("l2")),
            Err(SessionError::LimitExceeded { max: 2 })
        ));
        assert!(matches!(
            h.registry.create_remote(remote("r2")),
            Err(SessionError::LimitExceeded { max: 2 })
        ));
        // A refused session leaves no trace.
        assert!(h.sink.statuses("l2").is_empty());
        assert_eq!(h.local.spawn_count(), 1);

        h.registry.close("l1").expect("should close");
        h.registry.create_local(local("l2")).expect("slot freed by close");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_respects_limit() {
        let h = Arc::new(limited(8));

        let mut handles = Vec::new();
        for i in 0..32 {
            let h = h.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                h.registry.create_local(local(&format!("l{i}")))
            }));
        }
        let mut created = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.expect("task should not panic") {
                Ok(_) => created += 1,
                Err(SessionError::LimitExceeded { .. }) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(created, 8);
        assert_eq!(refused, 24);
        assert_eq!(h.registry.active_count(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_are_not_interleaved() {
        let h = Arc::new(Harness::new());
        let id = h.registry.create_local(local("l1")).expect("should create");

        let mut handles = Vec::new();
        for byte in [b'a', b'b', b'c', b'd'] {
            let h = h.clone();
            let id = id.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                for _ in 0..50 {
                    h.registry.write(&id, &[byte; 64]).expect("should write");
                }
            }));
        }
        for handle in handles {
            handle.await.expect("writer should not panic");
        }

        let written = h.local.handle(0).expect("spawned").written();
        assert_eq!(written.len(), 4 * 50 * 64);
        assert!(written.chunks(64).all(|chunk| chunk.iter().all(|b| *b == chunk[0])));
    }
}

// ============================================================================
// Metrics Tests
// ============================================================================

mod metrics {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn recorded_stats_are_queryable_until_removal() {
        let h = Harness::new();
        let id = h.registry.create_remote(remote("r1")).expect("should create");

        let recorded = h
            .registry
            .record_stats(&id, [("cpu", "12.5%"), ("memory_used", "1.2 GB")])
            .expect("session exists");
        assert_eq!(recorded, 2);
        assert_eq!(h.registry.metric_history(&id, "cpu").values, vec![12.5]);

        h.registry.close(&id).expect("should close");
        h.registry
            .wait_for_close(&id, DEFAULT_TIMEOUT)
            .await
            .expect("should finish");
        assert!(h.registry.metric_history(&id, "cpu").is_empty());
        assert!(matches!(
            h.registry.record_stats(&id, [("cpu", "1%")]),
            Err(SessionError::NotFound(_))
        ));
    }
}

// ============================================================================
// Shutdown Tests
// ============================================================================

mod shutdown {
    use super::*;
    use pretty_assertions::assert_eq;
    use session::ShutdownCoordinator;
    use std::time::Instant;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_closes_local_and_remote_sessions() {
        let h = Harness::new();
        h.registry.create_local(local("l1")).expect("should create");
        let remote_id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(
            h.sink
                .wait_for_output(&remote_id, "Session ready", DEFAULT_TIMEOUT)
                .await
        );

        let report = ShutdownCoordinator::new(Duration::from_secs(2))
            .run(&h.registry)
            .await;

        assert!(report.is_clean(), "{report:?}");
        assert_eq!(report.closed.len(), 2);
        assert!(h.remote.handle().stream.was_released());
        assert!(h.registry.session_ids().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stuck_session_does_not_hold_up_shutdown() {
        let h = Harness::new();
        h.local.set_stuck(true);
        h.registry.create_local(local("stuck")).expect("should create");
        h.local.set_stuck(false);
        for id in ["a", "b"] {
            h.registry.create_local(local(id)).expect("should create");
        }

        let started = Instant::now();
        let report = ShutdownCoordinator::new(Duration::from_millis(300))
            .run(&h.registry)
            .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.abandoned, vec!["stuck".to_string()]);
        let mut closed = report.closed.clone();
        closed.sort();
        assert_eq!(closed, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_during_host_key_prompt() {
        let h = Harness::with_remote(RemoteScript {
            host_key: HostKeyCheck::Unknown {
                fingerprint: "SHA256:aa".into(),
            },
            ..RemoteScript::default()
        });
        let id = h.registry.create_remote(remote("r1")).expect("should create");
        assert!(
            h.sink
                .wait_for_status(&id, ConnectionStatus::HostKeyPrompt, DEFAULT_TIMEOUT)
                .await
        );

        let report = ShutdownCoordinator::new(Duration::from_secs(2))
            .run(&h.registry)
            .await;

        assert_eq!(report.closed, vec![id.clone()]);
        assert!(!h.sink.statuses(&id).contains(&ConnectionStatus::Failed));
    }
}
