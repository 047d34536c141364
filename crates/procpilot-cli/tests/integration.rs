use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

struct Sandbox {
	dir: tempfile::TempDir,
}

impl Sandbox {
	fn new() -> Self {
		let dir = tempfile::tempdir().unwrap();
		let config = format!(
			"[supervisor]\nsocket_path = \"{}\"\ntick_interval_ms = 20\n\n[services]\nregistry = \"{}\"\nlog_dir = \"{}\"\n",
			dir.path().join("pp.sock").display(),
			dir.path().join("services.json").display(),
			dir.path().join("logs").display(),
		);
		std::fs::write(dir.path().join("config.toml"), config).unwrap();
		std::fs::write(dir.path().join("services.json"), "[]").unwrap();
		Self { dir }
	}

	fn path(&self, name: &str) -> PathBuf {
		self.dir.path().join(name)
	}

	fn command(&self, args: &[&str]) -> Command {
		let mut cmd = Command::new(env!("CARGO_BIN_EXE_procpilot"));
		cmd.args(args)
			.env("PROCPILOT_CONFIG", self.path("config.toml"))
			.env("XDG_STATE_HOME", self.path("state"))
			.env("XDG_CONFIG_HOME", self.path("config"))
			.env("RUST_LOG", "info");
		cmd
	}

	fn run(&self, args: &[&str]) -> Output {
		self.command(args).output().unwrap()
	}

	fn spawn_supervisor(&self) -> Child {
		let child = self
			.command(&["run"])
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.spawn()
			.unwrap();
		assert!(wait_for(|| self.pid_path().exists()), "supervisor never wrote its pid file");
		child
	}

	fn pid_path(&self) -> PathBuf {
		self.path("state").join("procpilot").join("daemon.pid")
	}
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + Duration::from_secs(5);
	while Instant::now() < deadline {
		if cond() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(20));
	}
	false
}

fn stdout(output: &Output) -> String {
	String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
	String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn version_and_help() {
	let sandbox = Sandbox::new();
	let version = sandbox.run(&["--version"]);
	assert!(version.status.success());
	assert!(stdout(&version).starts_with("procpilot "));

	let help = sandbox.run(&["help"]);
	assert!(help.status.success());
	assert!(stderr(&help).contains("logs"));
}

#[test]
fn unknown_command_fails() {
	let sandbox = Sandbox::new();
	let output = sandbox.run(&["frobnicate"]);
	assert!(!output.status.success());
	assert!(stderr(&output).contains("unknown command"));
}

#[test]
fn commands_without_supervisor_fail() {
	let sandbox = Sandbox::new();
	let output = sandbox.run(&["status"]);
	assert_eq!(output.status.code(), Some(1));
	assert!(stderr(&output).contains("not running"));

	let output = sandbox.run(&["shutdown"]);
	assert_eq!(output.status.code(), Some(1));
}

#[test]
fn usage_errors() {
	let sandbox = Sandbox::new();
	assert_eq!(sandbox.run(&["start"]).status.code(), Some(1));
	assert_eq!(sandbox.run(&["send", "web"]).status.code(), Some(1));
	assert_eq!(sandbox.run(&["logs", "web", "-n", "many"]).status.code(), Some(1));
}

#[test]
fn supervisor_round_trip_and_shutdown() {
	let sandbox = Sandbox::new();
	let mut child = sandbox.spawn_supervisor();
	let socket = sandbox.path("pp.sock");
	assert!(socket.exists());

	let status = sandbox.run(&["status"]);
	assert!(status.status.success(), "{}", stderr(&status));
	assert!(stdout(&status).contains("no services registered"));

	let print = sandbox.run(&["print", "hello", "supervisor"]);
	assert!(print.status.success());

	let reload = sandbox.run(&["reload"]);
	assert!(stdout(&reload).contains("loaded 0 services"));

	let missing = sandbox.run(&["start", "web"]);
	assert_eq!(missing.status.code(), Some(1));
	assert!(stderr(&missing).contains("unknown service: web"));

	let shutdown = sandbox.run(&["shutdown"]);
	assert!(shutdown.status.success(), "{}", stderr(&shutdown));
	assert!(wait_for(|| matches!(child.try_wait(), Ok(Some(_)))));
	assert!(!socket.exists());
	assert!(!sandbox.pid_path().exists());
}
