use std::path::PathBuf;

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/procpilot.sock";

#[derive(Debug, Clone)]
pub struct SupervisorPaths {
	pub app_name: String,
}

impl Default for SupervisorPaths {
	fn default() -> Self {
		Self::new("procpilot")
	}
}

impl SupervisorPaths {
	pub fn new(app_name: impl Into<String>) -> Self {
		Self {
			app_name: app_name.into(),
		}
	}

	/// `$XDG_STATE_HOME/<app>`, else `~/.local/state/<app>`, else `/tmp/<app>`.
	pub fn state_dir(&self) -> PathBuf {
		resolve_dir(std::env::var("XDG_STATE_HOME").ok(), home_dir(), ".local/state", &self.app_name)
	}

	/// `$XDG_CONFIG_HOME/<app>`, else `~/.config/<app>`, else `/tmp/<app>`.
	pub fn config_dir(&self) -> PathBuf {
		resolve_dir(std::env::var("XDG_CONFIG_HOME").ok(), home_dir(), ".config", &self.app_name)
	}

	pub fn pid_path(&self) -> PathBuf {
		self.state_dir().join("daemon.pid")
	}

	pub fn log_dir(&self) -> PathBuf {
		self.state_dir().join("logs")
	}

	pub fn registry_path(&self) -> PathBuf {
		self.config_dir().join("services.json")
	}

	pub fn config_path(&self) -> PathBuf {
		self.config_dir().join("config.toml")
	}
}

/// Read the PID recorded by a running supervisor.
pub fn read_pid(paths: &SupervisorPaths) -> Option<u32> {
	std::fs::read_to_string(paths.pid_path())
		.ok()
		.and_then(|s| s.trim().parse().ok())
}

// Empty or relative XDG values are ignored, as the base directory spec asks.
fn resolve_dir(xdg: Option<String>, home: Option<PathBuf>, home_rel: &str, app: &str) -> PathBuf {
	let base = xdg
		.map(PathBuf::from)
		.filter(|p| p.is_absolute())
		.or_else(|| home.map(|h| h.join(home_rel)))
		.unwrap_or_else(|| PathBuf::from("/tmp"));
	base.join(app)
}

pub fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

/// Expands a leading `~` or `~/` to `$HOME`.
pub fn expand_tilde(path: &str) -> PathBuf {
	if path == "~" {
		if let Some(home) = home_dir() {
			return home;
		}
	}
	if let Some(rest) = path.strip_prefix("~/") {
		if let Some(home) = home_dir() {
			return home.join(rest);
		}
	}
	PathBuf::from(path)
}
