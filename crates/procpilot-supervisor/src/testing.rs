//! In-memory [`ProcessHost`] for exercising lifecycle logic without tmux.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::host::{HostError, ProcessHost};

#[derive(Default)]
pub struct FakeHost {
	sessions: Mutex<HashSet<String>>,
	starts: Mutex<HashMap<String, usize>>,
	pipes: Mutex<HashMap<String, PathBuf>>,
	inputs: Mutex<Vec<(String, Vec<u8>)>>,
	probes: AtomicUsize,
	fail_start: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
	m.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeHost {
	/// Simulates a session appearing or dying outside the supervisor.
	pub fn set_running(&self, session: &str, running: bool) {
		let mut sessions = lock(&self.sessions);
		if running {
			sessions.insert(session.to_string());
		} else {
			sessions.remove(session);
		}
	}

	pub fn is_running(&self, session: &str) -> bool {
		lock(&self.sessions).contains(session)
	}

	pub fn fail_starts(&self, fail: bool) {
		self.fail_start.store(fail, Ordering::SeqCst);
	}

	pub fn starts(&self, session: &str) -> usize {
		lock(&self.starts).get(session).copied().unwrap_or(0)
	}

	pub fn piped_to(&self, session: &str) -> Option<PathBuf> {
		lock(&self.pipes).get(session).cloned()
	}

	pub fn inputs(&self) -> Vec<(String, Vec<u8>)> {
		lock(&self.inputs).clone()
	}

	/// Number of liveness queries made so far.
	pub fn probes(&self) -> usize {
		self.probes.load(Ordering::SeqCst)
	}
}

impl ProcessHost for FakeHost {
	fn has_session(&self, session: &str) -> bool {
		self.probes.fetch_add(1, Ordering::SeqCst);
		self.is_running(session)
	}

	fn start_session(&self, session: &str, _dir: Option<&Path>, command: &str) -> Result<(), HostError> {
		if self.fail_start.load(Ordering::SeqCst) {
			return Err(HostError::Failed {
				command: command.to_string(),
				status: 1,
				stderr: "simulated failure".to_string(),
			});
		}
		*lock(&self.starts).entry(session.to_string()).or_default() += 1;
		self.set_running(session, true);
		Ok(())
	}

	fn pipe_output(&self, session: &str, log_path: &Path) -> Result<(), HostError> {
		lock(&self.pipes).insert(session.to_string(), log_path.to_path_buf());
		Ok(())
	}

	fn kill_session(&self, session: &str) -> Result<(), HostError> {
		self.set_running(session, false);
		Ok(())
	}

	fn send_input(&self, session: &str, input: &[u8]) -> Result<(), HostError> {
		lock(&self.inputs).push((session.to_string(), input.to_vec()));
		Ok(())
	}
}
