//! Shared fixtures for the session integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use session::test_support::{FakeLocalDriver, FakeRemoteDriver, RecordingSink, RemoteScript};
use session::{
    AuthMethod, LocalSessionRequest, RemoteSessionRequest, RemoteTarget, SessionConfig,
    SessionRegistry,
};
use std::sync::Arc;
use std::time::Duration;

/// Default timeout for waiting on events.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for things that should already have happened.
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(500);

/// Config with timings scaled down so liveness tests finish quickly.
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        animation_tick: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(1),
        keepalive_interval: Duration::from_millis(100),
        hang_threshold: Duration::from_millis(50),
        hang_fail_after: Duration::from_millis(400),
        ..SessionConfig::default()
    }
}

/// A registry wired to in-memory drivers.
pub struct Harness {
    pub registry: SessionRegistry,
    pub sink: Arc<RecordingSink>,
    pub local: FakeLocalDriver,
    pub remote: FakeRemoteDriver,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(fast_config(), RemoteScript::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        Self::build(config, RemoteScript::default())
    }

    pub fn with_remote(script: RemoteScript) -> Self {
        Self::build(fast_config(), script)
    }

    fn build(config: SessionConfig, script: RemoteScript) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let local = FakeLocalDriver::new();
        let remote = FakeRemoteDriver::new(script);
        let registry = SessionRegistry::new(
            config,
            sink.clone(),
            Arc::new(local.clone()),
            Arc::new(remote.clone()),
        );
        Self {
            registry,
            sink,
            local,
            remote,
        }
    }
}

pub fn local(id: &str) -> LocalSessionRequest {
    LocalSessionRequest {
        id: Some(id.into()),
        ..LocalSessionRequest::default()
    }
}

pub fn remote(id: &str) -> RemoteSessionRequest {
    let target = RemoteTarget::new("example.com", 22, "alice")
        .with_auth(AuthMethod::Agent)
        .with_auth(AuthMethod::Password("hunter2".into()));
    RemoteSessionRequest {
        id: Some(id.into()),
        tab_id: Some(format!("tab-{id}")),
        ..RemoteSessionRequest::new(target)
    }
}
