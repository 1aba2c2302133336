//! Where termhub keeps its files.
//!
//! Each location is resolved once and cached. `TERMHUB_CONFIG_DIR`
//! relocates the config directory.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::OnceLock;

const APP_DIR: &str = "termhub";

static CONFIG_DIR: OnceLock<PathBuf> = OnceLock::new();
static KNOWN_HOSTS: OnceLock<PathBuf> = OnceLock::new();

/// An explicit override wins; otherwise `<base>/termhub`, relative to the
/// working directory when the platform has no base directory.
fn app_dir(override_dir: Option<OsString>, base: Option<PathBuf>) -> PathBuf {
    match override_dir.filter(|dir| !dir.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR),
    }
}

/// `$TERMHUB_CONFIG_DIR`, else ~/.config/termhub (or platform equivalent)
pub fn config_dir() -> &'static PathBuf {
    CONFIG_DIR
        .get_or_init(|| app_dir(std::env::var_os("TERMHUB_CONFIG_DIR"), dirs::config_dir()))
}

/// The OpenSSH trust store shared with the system ssh client.
pub fn known_hosts_file() -> &'static PathBuf {
    KNOWN_HOSTS.get_or_init(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ssh")
            .join("known_hosts")
    })
}

/// config_dir()/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
