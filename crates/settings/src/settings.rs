//! Configuration system for termhub.
//!
//! Provides compile-time constants and TOML config file support.

pub mod constants;
pub mod file;

pub use file::{
    config_path, ensure_config_file, load_config, load_config_from, AutoSwitchRule, Config,
    HostEntry, MergedProfileConfig, MetricsSettings, Profile, SshSettings,
};
