use std::path::{Path, PathBuf};
use std::time::Duration;

use procpilot_ipc::paths::{expand_tilde, DEFAULT_SOCKET_PATH};
use procpilot_ipc::SupervisorPaths;
use procpilot_supervisor::tracker::MAX_LOG_READ_SIZE;
use procpilot_supervisor::ServiceSettings;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV: &str = "PROCPILOT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse {path}: {source}")]
	Toml {
		path: String,
		#[source]
		source: toml::de::Error,
	},
}

// ── Global config (~/.config/procpilot/config.toml) ─────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
	#[serde(default)]
	pub supervisor: SupervisorConfig,
	#[serde(default)]
	pub services: ServicesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
	#[serde(default = "default_socket_path")]
	pub socket_path: String,
	#[serde(default = "default_tick_interval")]
	pub tick_interval_ms: u64,
	#[serde(default = "default_client_timeout")]
	pub client_timeout_secs: u64,
	#[serde(default = "default_write_timeout")]
	pub write_timeout_ms: u64,
}

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			socket_path: default_socket_path(),
			tick_interval_ms: default_tick_interval(),
			client_timeout_secs: default_client_timeout(),
			write_timeout_ms: default_write_timeout(),
		}
	}
}

fn default_socket_path() -> String { DEFAULT_SOCKET_PATH.to_string() }
fn default_tick_interval() -> u64 { 200 }
fn default_client_timeout() -> u64 { 10 }
fn default_write_timeout() -> u64 { 2000 }

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
	/// Registry file; defaults to `<config_dir>/services.json`.
	pub registry: Option<String>,
	/// Defaults to `<state_dir>/logs`.
	pub log_dir: Option<String>,
	#[serde(default = "default_max_read_size")]
	pub max_read_size: u64,
	#[serde(default = "default_liveness_window")]
	pub liveness_window_ms: u64,
}

impl Default for ServicesConfig {
	fn default() -> Self {
		Self {
			registry: None,
			log_dir: None,
			max_read_size: default_max_read_size(),
			liveness_window_ms: default_liveness_window(),
		}
	}
}

fn default_max_read_size() -> u64 { MAX_LOG_READ_SIZE }
fn default_liveness_window() -> u64 { 500 }

impl GlobalConfig {
	pub fn socket_path(&self) -> PathBuf {
		expand_tilde(&self.supervisor.socket_path)
	}

	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.supervisor.tick_interval_ms.max(1))
	}

	pub fn client_timeout(&self) -> Duration {
		Duration::from_secs(self.supervisor.client_timeout_secs.max(1))
	}

	pub fn write_timeout(&self) -> Duration {
		Duration::from_millis(self.supervisor.write_timeout_ms.max(1))
	}

	pub fn registry_path(&self, paths: &SupervisorPaths) -> PathBuf {
		match &self.services.registry {
			Some(p) => expand_tilde(p),
			None => paths.registry_path(),
		}
	}

	pub fn log_dir(&self, paths: &SupervisorPaths) -> PathBuf {
		match &self.services.log_dir {
			Some(p) => expand_tilde(p),
			None => paths.log_dir(),
		}
	}

	pub fn service_settings(&self, paths: &SupervisorPaths) -> ServiceSettings {
		let mut settings = ServiceSettings::new(self.log_dir(paths));
		settings.max_read_size = self.services.max_read_size;
		settings.liveness_window = Duration::from_millis(self.services.liveness_window_ms);
		settings
	}
}

/// `$PROCPILOT_CONFIG` if set, else `<config_dir>/config.toml`.
pub fn config_path(paths: &SupervisorPaths) -> PathBuf {
	match std::env::var(CONFIG_ENV) {
		Ok(p) if !p.is_empty() => expand_tilde(&p),
		_ => paths.config_path(),
	}
}

pub fn parse_config(content: &str, origin: &str) -> Result<GlobalConfig, ConfigError> {
	toml::from_str(content).map_err(|source| ConfigError::Toml {
		path: origin.to_string(),
		source,
	})
}

pub fn read_config(path: &Path) -> Result<GlobalConfig, ConfigError> {
	let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
		path: path.display().to_string(),
		source,
	})?;
	parse_config(&content, &path.display().to_string())
}

/// Missing file means defaults; a broken one is reported and ignored.
pub fn load_global_config(paths: &SupervisorPaths) -> GlobalConfig {
	let path = config_path(paths);
	if path.exists() {
		match read_config(&path) {
			Ok(config) => return config,
			Err(e) => eprintln!("warning: {}", e),
		}
	}
	GlobalConfig::default()
}
