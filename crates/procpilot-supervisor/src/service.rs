use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use procpilot_ipc::paths::expand_tilde;

use crate::host::ProcessHost;
use crate::marker::{self, Marker};
use crate::registry::ServiceConfig;
use crate::tracker::{LogSessionTracker, MAX_LOG_READ_SIZE};

pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_millis(500);
pub const DEFAULT_STOP_REASON: &str = "N/A";

/// Last liveness probe and when it was taken.
#[derive(Debug, Clone, Copy)]
pub struct LivenessCache {
	result: bool,
	checked_at: Option<Instant>,
	window: Duration,
}

impl LivenessCache {
	pub fn new(window: Duration) -> Self {
		Self {
			result: false,
			checked_at: None,
			window,
		}
	}

	/// The cached result if it is still within the staleness window at `now`.
	pub fn fresh(&self, now: Instant) -> Option<bool> {
		let checked_at = self.checked_at?;
		(now.saturating_duration_since(checked_at) <= self.window).then_some(self.result)
	}

	pub fn record(&mut self, result: bool, now: Instant) {
		self.result = result;
		self.checked_at = Some(now);
	}
}

/// Where services keep their logs and how they probe liveness.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
	pub log_dir: PathBuf,
	pub max_read_size: u64,
	pub liveness_window: Duration,
}

impl ServiceSettings {
	pub fn new(log_dir: impl Into<PathBuf>) -> Self {
		Self {
			log_dir: log_dir.into(),
			max_read_size: MAX_LOG_READ_SIZE,
			liveness_window: DEFAULT_LIVENESS_WINDOW,
		}
	}
}

pub fn standardize_name(name: &str) -> String {
	name.trim().to_lowercase().replace(' ', "_")
}

/// Process-host session name: `<standardized name>_ProcPilot_<id prefix>`.
/// tmux treats `.` and `:` as target separators, so they are replaced.
pub fn session_name(standardized: &str, id: &str) -> String {
	let prefix: String = id.chars().take(8).collect();
	format!("{}_ProcPilot_{}", standardized, prefix).replace(['.', ':'], "_")
}

pub fn log_file_path(log_dir: &Path, id: &str) -> PathBuf {
	log_dir.join(format!("ProcPilot_log_{}.log", id))
}

pub struct Service {
	config: ServiceConfig,
	standardized_name: String,
	session_name: String,
	start_directory: Option<PathBuf>,
	tracker: LogSessionTracker,
	liveness: LivenessCache,
	host: Arc<dyn ProcessHost>,
}

impl Service {
	/// Builds the service and runs an initial log scan so the tracker picks
	/// up sessions from earlier runs.
	pub fn new(config: ServiceConfig, settings: &ServiceSettings, host: Arc<dyn ProcessHost>) -> Self {
		let standardized_name = standardize_name(&config.name);
		let session_name = session_name(&standardized_name, &config.id);
		let start_directory = match config.start_directory.trim() {
			"" => None,
			dir => Some(expand_tilde(dir)),
		};
		let tracker = LogSessionTracker::with_max_read_size(
			log_file_path(&settings.log_dir, &config.id),
			settings.max_read_size,
		);

		let mut service = Self {
			config,
			standardized_name,
			session_name,
			start_directory,
			tracker,
			liveness: LivenessCache::new(settings.liveness_window),
			host,
		};
		if let Err(e) = service.scan_logs() {
			tracing::warn!("{}: initial log scan failed: {}", service.config.name, e);
		}
		service
	}

	pub fn id(&self) -> &str {
		&self.config.id
	}

	pub fn name(&self) -> &str {
		&self.config.name
	}

	pub fn standardized_name(&self) -> &str {
		&self.standardized_name
	}

	pub fn session_name(&self) -> &str {
		&self.session_name
	}

	pub fn config(&self) -> &ServiceConfig {
		&self.config
	}

	pub fn auto_start(&self) -> bool {
		self.config.auto_start
	}

	pub fn start_directory(&self) -> Option<&Path> {
		self.start_directory.as_deref()
	}

	pub fn log_path(&self) -> &Path {
		self.tracker.path()
	}

	pub fn tracker(&self) -> &LogSessionTracker {
		&self.tracker
	}

	pub fn scan_logs(&mut self) -> std::io::Result<usize> {
		self.tracker.handle_new_lines()
	}

	/// Asks the process host whether the session exists. Unless `force` is
	/// set, a result younger than the liveness window is reused.
	pub fn is_running(&mut self, force: bool) -> bool {
		let now = Instant::now();
		if !force {
			if let Some(result) = self.liveness.fresh(now) {
				return result;
			}
		}
		let result = self.host.has_session(&self.session_name);
		self.liveness.record(result, now);
		result
	}

	/// Writes a START marker, launches the session, and pipes its output
	/// into the log. Returns false if it was already running or the launch
	/// failed.
	pub fn start(&mut self) -> bool {
		if self.is_running(true) {
			return false;
		}

		if let Err(e) = self.tracker.write_start_marker() {
			tracing::warn!("{}: failed to write start marker: {}", self.config.name, e);
		}

		if let Err(e) = self.host.start_session(
			&self.session_name,
			self.start_directory.as_deref(),
			&self.config.startup_command,
		) {
			tracing::warn!("{}: failed to start: {}", self.config.name, e);
			let failed = Marker::now(marker::ERROR, vec!["launch failed".to_string()]);
			if let Err(e) = self.tracker.write_marker(&failed) {
				tracing::warn!("{}: failed to write error marker: {}", self.config.name, e);
			}
			return false;
		}

		if let Err(e) = self.host.pipe_output(&self.session_name, self.tracker.path()) {
			tracing::warn!("{}: failed to capture output: {}", self.config.name, e);
		}

		tracing::info!("{}: started in session {}", self.config.name, self.session_name);
		self.liveness.record(true, Instant::now());
		true
	}

	pub fn stop(&mut self) -> bool {
		self.stop_with_reason(DEFAULT_STOP_REASON)
	}

	/// Terminates the session, then records a STOP marker tagged `reason`.
	pub fn stop_with_reason(&mut self, reason: &str) -> bool {
		if !self.is_running(true) {
			return false;
		}

		if let Err(e) = self.host.kill_session(&self.session_name) {
			tracing::warn!("{}: failed to stop: {}", self.config.name, e);
			return false;
		}
		self.liveness.record(false, Instant::now());

		if let Err(e) = self.tracker.write_stop_marker(reason) {
			tracing::warn!("{}: failed to write stop marker: {}", self.config.name, e);
		}
		tracing::info!("{}: stopped ({})", self.config.name, reason);
		true
	}

	/// Stop (ignored if already stopped) then start; the start decides the
	/// outcome.
	pub fn restart(&mut self) -> bool {
		self.stop_with_reason("restart");
		self.start()
	}

	pub fn send_input(&mut self, input: &[u8]) -> bool {
		if !self.is_running(true) {
			return false;
		}
		match self.host.send_input(&self.session_name, input) {
			Ok(()) => true,
			Err(e) => {
				tracing::warn!("{}: failed to send input: {}", self.config.name, e);
				false
			}
		}
	}
}
