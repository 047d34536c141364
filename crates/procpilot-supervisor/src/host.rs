use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::process::{Command, Stdio};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
	#[error("failed to run {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: io::Error,
	},
	#[error("{command} exited with {status}: {stderr}")]
	Failed {
		command: String,
		status: i32,
		stderr: String,
	},
}

/// The external collaborator that actually runs service processes in named,
/// detached sessions.
pub trait ProcessHost: Send + Sync {
	fn has_session(&self, session: &str) -> bool;

	/// Starts a detached session running `command`, in `dir` when given.
	fn start_session(&self, session: &str, dir: Option<&Path>, command: &str) -> Result<(), HostError>;

	/// Continuously appends the session's combined output to `log_path`.
	fn pipe_output(&self, session: &str, log_path: &Path) -> Result<(), HostError>;

	fn kill_session(&self, session: &str) -> Result<(), HostError>;

	/// Types `input` into the session. A trailing newline is sent as Enter.
	fn send_input(&self, session: &str, input: &[u8]) -> Result<(), HostError>;
}

/// [`ProcessHost`] backed by the `tmux` binary.
#[derive(Debug, Clone)]
pub struct TmuxHost {
	program: String,
}

impl Default for TmuxHost {
	fn default() -> Self {
		Self {
			program: "tmux".to_string(),
		}
	}
}

impl TmuxHost {
	pub fn new(program: impl Into<String>) -> Self {
		Self {
			program: program.into(),
		}
	}

	fn command<I, S>(&self, args: I) -> Command
	where
		I: IntoIterator<Item = S>,
		S: AsRef<OsStr>,
	{
		let mut cmd = Command::new(&self.program);
		cmd.args(args).stdin(Stdio::null());
		cmd
	}

	fn run(&self, mut cmd: Command) -> Result<(), HostError> {
		let output = cmd.output().map_err(|source| HostError::Spawn {
			program: self.program.clone(),
			source,
		})?;
		if output.status.success() {
			return Ok(());
		}
		let args: Vec<String> = cmd
			.get_args()
			.map(|a| a.to_string_lossy().to_string())
			.collect();
		Err(HostError::Failed {
			command: format!("{} {}", self.program, args.join(" ")),
			status: output.status.code().unwrap_or(-1),
			stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
		})
	}
}

impl ProcessHost for TmuxHost {
	fn has_session(&self, session: &str) -> bool {
		self.command(["has-session", "-t", session])
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.status()
			.map(|s| s.success())
			.unwrap_or(false)
	}

	fn start_session(&self, session: &str, dir: Option<&Path>, command: &str) -> Result<(), HostError> {
		let mut cmd = self.command(["new-session", "-d", "-s", session]);
		if let Some(dir) = dir {
			cmd.arg("-c").arg(dir);
		}
		cmd.arg(command);
		self.run(cmd)
	}

	fn pipe_output(&self, session: &str, log_path: &Path) -> Result<(), HostError> {
		let pipe = format!("cat >> {}", shell_quote(&log_path.to_string_lossy()));
		self.run(self.command(["pipe-pane", "-t", session, "-o", pipe.as_str()]))
	}

	fn kill_session(&self, session: &str) -> Result<(), HostError> {
		self.run(self.command(["kill-session", "-t", session]))
	}

	fn send_input(&self, session: &str, input: &[u8]) -> Result<(), HostError> {
		let (text, enter) = match input.strip_suffix(b"\n") {
			Some(rest) => (rest, true),
			None => (input, false),
		};
		if !text.is_empty() {
			let mut cmd = self.command(["send-keys", "-t", session, "-l"]);
			cmd.arg(OsStr::from_bytes(text));
			self.run(cmd)?;
		}
		if enter {
			self.run(self.command(["send-keys", "-t", session, "Enter"]))?;
		}
		Ok(())
	}
}

/// Single-quotes `s` for `sh`.
pub fn shell_quote(s: &str) -> String {
	format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn quoting() {
		assert_eq!(shell_quote("/tmp/a b.log"), "'/tmp/a b.log'");
		assert_eq!(shell_quote("it's"), r"'it'\''s'");
	}

	#[test]
	fn missing_binary_reports_spawn_error() {
		let host = TmuxHost::new("procpilot-no-such-binary");
		assert!(!host.has_session("anything"));
		match host.kill_session("anything") {
			Err(HostError::Spawn { program, .. }) => assert_eq!(program, "procpilot-no-such-binary"),
			other => panic!("expected spawn error, got {:?}", other),
		}
	}
}
