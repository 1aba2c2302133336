//! TOML config file support.
//!
//! Config location: `~/.config/termhub/config.toml`

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;

/// Rule for automatically switching to a profile based on context.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AutoSwitchRule {
    #[serde(default)]
    pub hostname_pattern: Option<String>,
    #[serde(default)]
    pub directory_pattern: Option<String>,
}

/// Named profile that can override config defaults for local sessions.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub auto_switch: Option<AutoSwitchRule>,
}

/// Merged view of config defaults with profile overrides applied.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedProfileConfig {
    pub shell: Option<String>,
    pub working_directory: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// A named remote target, referenced by `name` from the bridge protocol.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct HostEntry {
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub user: Option<String>,
    /// Private key path; `~/` is expanded by the session layer.
    #[serde(default)]
    pub identity_file: Option<String>,
    /// Offer the running ssh-agent before key files.
    #[serde(default = "default_true")]
    pub use_agent: bool,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

/// Remote session tuning.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct SshSettings {
    pub connect_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub hang_threshold_ms: u64,
    pub hang_fail_after_ms: u64,
    /// Trust store override; defaults to `~/.ssh/known_hosts`.
    pub known_hosts: Option<PathBuf>,
    /// User for targets that name none; falls back to `$USER`.
    pub default_user: Option<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: constants::timing::CONNECT_TIMEOUT.as_millis() as u64,
            keepalive_interval_ms: constants::timing::KEEPALIVE_INTERVAL.as_millis() as u64,
            hang_threshold_ms: constants::timing::HANG_THRESHOLD.as_millis() as u64,
            hang_fail_after_ms: constants::timing::HANG_FAIL_AFTER.as_millis() as u64,
            known_hosts: None,
            default_user: None,
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn hang_threshold(&self) -> Duration {
        Duration::from_millis(self.hang_threshold_ms)
    }

    pub fn hang_fail_after(&self) -> Duration {
        Duration::from_millis(self.hang_fail_after_ms)
    }
}

/// Local resource sampling.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct MetricsSettings {
    /// Sample local shell processes into the metrics recorder.
    pub enabled: bool,
    pub default_update_rate_ms: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_update_rate_ms: constants::metrics::DEFAULT_UPDATE_RATE_MS,
        }
    }
}

/// User-facing config parsed from TOML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Maximum number of simultaneously active sessions.
    pub max_sessions: usize,
    /// Global shutdown deadline in milliseconds.
    pub shutdown_deadline_ms: u64,
    /// Connecting animation tick in milliseconds.
    pub animation_tick_ms: u64,
    /// Shell for local sessions; `$SHELL` when unset.
    pub default_shell: Option<String>,
    /// Starting directory for local sessions; home when unset.
    pub default_working_directory: Option<String>,
    /// TERM exported to sessions.
    pub term: String,
    pub ssh: SshSettings,
    pub metrics: MetricsSettings,
    /// Named remote targets.
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    /// Named profiles that override config defaults.
    #[serde(default)]
    pub profiles: Vec<Profile>,
    /// Name of the default profile to use when no auto-switch rule matches.
    #[serde(default)]
    pub default_profile: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sessions: constants::sessions::DEFAULT_MAX_SESSIONS,
            shutdown_deadline_ms: constants::timing::SHUTDOWN_DEADLINE.as_millis() as u64,
            animation_tick_ms: constants::timing::ANIMATION_TICK.as_millis() as u64,
            default_shell: None,
            default_working_directory: None,
            term: constants::sessions::TERM.to_string(),
            ssh: SshSettings::default(),
            metrics: MetricsSettings::default(),
            hosts: Vec::new(),
            profiles: Vec::new(),
            default_profile: None,
        }
    }
}

impl Config {
    pub fn shutdown_deadline(&self) -> Duration {
        Duration::from_millis(self.shutdown_deadline_ms)
    }

    pub fn animation_tick(&self) -> Duration {
        Duration::from_millis(self.animation_tick_ms)
    }

    /// Look up a `[[hosts]]` entry by name.
    pub fn host(&self, name: &str) -> Option<&HostEntry> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Find a profile matching the given context (hostname and/or directory).
    ///
    /// First checks auto_switch rules on all profiles. If no rule matches,
    /// falls back to the default_profile if one is set.
    pub fn resolve_profile(
        &self,
        hostname: Option<&str>,
        directory: Option<&str>,
    ) -> Option<&Profile> {
        for profile in &self.profiles {
            if let Some(rule) = &profile.auto_switch {
                if matches_auto_switch(rule, hostname, directory) {
                    return Some(profile);
                }
            }
        }

        if let Some(default_name) = &self.default_profile {
            return self.profiles.iter().find(|p| p.name == *default_name);
        }

        None
    }

    /// Produce a merged config view where profile values override config defaults.
    pub fn merged_config_for_profile(&self, profile: &Profile) -> MergedProfileConfig {
        MergedProfileConfig {
            shell: profile
                .shell
                .clone()
                .or_else(|| self.default_shell.clone()),
            working_directory: profile
                .working_directory
                .clone()
                .or_else(|| self.default_working_directory.clone()),
            env: profile.env.clone(),
        }
    }

    /// Merged view for a local session started in `directory`.
    pub fn local_defaults(&self, directory: Option<&str>) -> MergedProfileConfig {
        match self.resolve_profile(None, directory) {
            Some(profile) => self.merged_config_for_profile(profile),
            None => MergedProfileConfig {
                shell: self.default_shell.clone(),
                working_directory: self.default_working_directory.clone(),
                env: BTreeMap::new(),
            },
        }
    }

    /// Clamp out-of-range values and drop oversized strings.
    fn sanitized(mut self) -> Self {
        let defaults = Config::default();
        let max_len = constants::settings::MAX_STRING_LENGTH;

        if self.max_sessions == 0 || self.max_sessions > constants::sessions::MAX_SESSIONS_CEILING
        {
            tracing::warn!(
                "max-sessions {} out of range, clamping to 1..={}",
                self.max_sessions,
                constants::sessions::MAX_SESSIONS_CEILING
            );
            self.max_sessions = self
                .max_sessions
                .clamp(1, constants::sessions::MAX_SESSIONS_CEILING);
        }

        if self.animation_tick_ms == 0 {
            self.animation_tick_ms = defaults.animation_tick_ms;
        }

        let rate = self.metrics.default_update_rate_ms;
        if !(constants::metrics::MIN_UPDATE_RATE_MS..=constants::metrics::MAX_UPDATE_RATE_MS)
            .contains(&rate)
        {
            tracing::warn!("metrics.default-update-rate-ms {} out of range, using default", rate);
            self.metrics.default_update_rate_ms = defaults.metrics.default_update_rate_ms;
        }

        if self.default_shell.as_ref().is_some_and(|s| s.len() > max_len) {
            tracing::warn!("default-shell exceeds {} bytes, ignoring", max_len);
            self.default_shell = None;
        }

        if self.term.is_empty() || self.term.len() > max_len {
            self.term = defaults.term;
        }

        self.hosts.retain(|host| {
            let ok = host.hostname.len() <= max_len && !host.hostname.is_empty();
            if !ok {
                tracing::warn!("Dropping host entry {:?}: invalid hostname", host.name);
            }
            ok
        });

        self
    }
}

/// Check whether an auto-switch rule matches the given hostname and directory.
fn matches_auto_switch(
    rule: &AutoSwitchRule,
    hostname: Option<&str>,
    directory: Option<&str>,
) -> bool {
    let hostname_matches = match (&rule.hostname_pattern, hostname) {
        (Some(pattern), Some(host)) => glob_matches(pattern, host),
        (Some(_), None) => false,
        (None, _) => true,
    };

    let directory_matches = match (&rule.directory_pattern, directory) {
        (Some(pattern), Some(dir)) => glob_matches(pattern, dir),
        (Some(_), None) => false,
        (None, _) => true,
    };

    let has_any_pattern = rule.hostname_pattern.is_some() || rule.directory_pattern.is_some();

    has_any_pattern && hostname_matches && directory_matches
}

/// Simple glob matching supporting `*` (any sequence of characters) and `?`
/// (single character). `*` also matches path separators, so `*/projects/*`
/// matches any depth.
fn glob_matches(pattern: &str, text: &str) -> bool {
    let pattern = pattern.as_bytes();
    let text = text.as_bytes();
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Default config file content with comments (generated on first launch).
const DEFAULT_CONFIG: &str = r#"# termhub configuration
# Read once at startup.

# Maximum number of simultaneously active sessions
max-sessions = 64

# How long shutdown waits for sessions to close (milliseconds)
shutdown-deadline-ms = 5000

# Tick of the "Connecting..." animation (milliseconds)
# animation-tick-ms = 500

# Shell for local sessions (defaults to $SHELL)
# default-shell = "/bin/zsh"

# Starting directory for local sessions (defaults to the current directory)
# default-working-directory = "~/projects"

# TERM exported to local shells and requested for remote PTYs
term = "xterm-256color"

[ssh]
connect-timeout-ms = 15000
# Idle time before a liveness probe is sent on a connected session
keepalive-interval-ms = 30000
# Unanswered probe window before a session is marked hanging
hang-threshold-ms = 10000
# How long a hanging session is kept before it is marked failed
hang-fail-after-ms = 60000
# known-hosts = "~/.ssh/known_hosts"
# default-user = "deploy"

[metrics]
# Sample CPU, memory and I/O of local shells
enabled = true
default-update-rate-ms = 1000

# Named remote targets
# [[hosts]]
# name = "web"
# hostname = "web01.prod.example.com"
# port = 22
# user = "deploy"
# identity-file = "~/.ssh/id_ed25519"
# use-agent = true

# Profiles: named sets of overrides for local sessions.
# default-profile = "default"
#
# [[profiles]]
# name = "default"
# shell = "/bin/bash"
#
# [[profiles]]
# name = "projects"
# working-directory = "~/projects"
#
# [profiles.env]
# EDITOR = "nvim"
#
# [profiles.auto-switch]
# directory-pattern = "*/projects/*"
"#;

/// Return the config file path.
pub fn config_path() -> PathBuf {
    termhub_paths::config_file()
}

/// Ensure the config file exists, creating a default if missing.
/// Returns the path to the config file.
pub fn ensure_config_file() -> Option<PathBuf> {
    let path = config_path();
    if !path.exists() {
        let parent = path.parent()?;
        std::fs::create_dir_all(parent).ok()?;
        std::fs::write(&path, DEFAULT_CONFIG).ok()?;
        tracing::info!("Created default config at {:?}", path);
    }
    Some(path)
}

/// Load and parse the config file. Returns default on any error.
pub fn load_config() -> Config {
    load_config_from(&config_path())
}

/// Load and parse a config file at `path`. Returns default on any error.
pub fn load_config_from(path: &Path) -> Config {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to read config: {}", e);
            }
            return Config::default();
        }
    };

    // Size guard
    if content.len() > constants::settings::MAX_FILE_SIZE as usize {
        tracing::warn!(
            "Config file too large ({} bytes), using defaults",
            content.len()
        );
        return Config::default();
    }

    match toml::from_str::<Config>(&content) {
        Ok(cfg) => cfg.sanitized(),
        Err(e) => {
            tracing::warn!("Failed to parse config.toml: {}", e);
            Config::default()
        }
    }
}
