//! Reconstructs per-run sessions from an append-only log file.
//!
//! The tracker keeps a cursor into the file and only ever parses lines it
//! has not seen before. `START` markers open a session; `STOP`, `SHUTDOWN`,
//! and `ERROR` close it; any other marker is attached to the open session.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::marker::{self, Marker};

/// Largest single read, kept just under the protocol's frame cap so a read
/// can be shipped in one packet.
pub const MAX_LOG_READ_SIZE: u64 = 1024 * 992;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
	pub start_pos: u64,
	pub end_pos: Option<u64>,
	pub start_time: i64,
	pub end_time: Option<i64>,
	pub markers: Vec<Marker>,
}

impl SessionInfo {
	fn open(start: Marker) -> Self {
		Self {
			start_pos: start.position,
			end_pos: None,
			start_time: start.timestamp,
			end_time: None,
			markers: vec![start],
		}
	}

	pub fn is_open(&self) -> bool {
		self.end_pos.is_none()
	}
}

pub struct LogSessionTracker {
	path: PathBuf,
	max_read_size: u64,
	history: Vec<SessionInfo>,
	current: Option<SessionInfo>,
	current_pos: u64,
	current_line: u64,
}

impl LogSessionTracker {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self::with_max_read_size(path, MAX_LOG_READ_SIZE)
	}

	pub fn with_max_read_size(path: impl Into<PathBuf>, max_read_size: u64) -> Self {
		Self {
			path: path.into(),
			max_read_size,
			history: Vec::new(),
			current: None,
			current_pos: 0,
			current_line: 0,
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn current_session(&self) -> Option<&SessionInfo> {
		self.current.as_ref()
	}

	/// Closed sessions, oldest first.
	pub fn history(&self) -> &[SessionInfo] {
		&self.history
	}

	pub fn position(&self) -> u64 {
		self.current_pos
	}

	pub fn line(&self) -> u64 {
		self.current_line
	}

	/// Creates the file and its parent directory when missing.
	fn open(&self) -> io::Result<File> {
		if let Some(dir) = self.path.parent() {
			if !dir.as_os_str().is_empty() {
				fs::create_dir_all(dir)?;
			}
		}
		OpenOptions::new()
			.read(true)
			.append(true)
			.create(true)
			.open(&self.path)
	}

	/// Parses every complete line appended since the last scan. A trailing
	/// line without a newline is left for the next scan. Returns the number
	/// of lines consumed.
	pub fn handle_new_lines(&mut self) -> io::Result<usize> {
		let mut file = self.open()?;
		let len = file.metadata()?.len();
		if len < self.current_pos {
			tracing::warn!(
				"{} shrank below the scan cursor ({} < {}), rescanning",
				self.path.display(),
				len,
				self.current_pos
			);
			self.reset();
		}

		file.seek(SeekFrom::Start(self.current_pos))?;
		let mut reader = BufReader::new(file);
		let mut line = Vec::new();
		let mut consumed = 0;

		loop {
			line.clear();
			let n = reader.read_until(b'\n', &mut line)?;
			if n == 0 || line.last() != Some(&b'\n') {
				break;
			}
			let line_start = self.current_pos;
			self.current_pos += n as u64;
			self.current_line += 1;
			consumed += 1;
			self.handle_line(&line, line_start);
		}
		Ok(consumed)
	}

	fn reset(&mut self) {
		self.history.clear();
		self.current = None;
		self.current_pos = 0;
		self.current_line = 0;
	}

	fn handle_line(&mut self, line: &[u8], line_start: u64) {
		let Ok(text) = std::str::from_utf8(line) else {
			return;
		};
		let Some(mut m) = Marker::parse(text) else {
			return;
		};
		m.position = line_start;
		m.line = self.current_line;
		self.apply_marker(m);
	}

	fn apply_marker(&mut self, m: Marker) {
		if m.name == marker::START {
			self.end_session(m.position, m.timestamp);
			self.current = Some(SessionInfo::open(m));
			return;
		}

		let Some(session) = self.current.as_mut() else {
			tracing::debug!("dropping {} marker outside a session at line {}", m.name, m.line);
			return;
		};

		let terminal = m.is_terminal();
		let (pos, time) = (m.position, m.timestamp);
		session.markers.push(m);
		if terminal {
			self.end_session(pos, time);
		}
	}

	fn end_session(&mut self, end_pos: u64, end_time: i64) {
		if let Some(mut session) = self.current.take() {
			session.end_pos = Some(end_pos);
			session.end_time = Some(end_time);
			self.history.push(session);
		}
	}

	/// Reads up to `max_read_size` bytes starting at `position`. Returns the
	/// bytes and the offset just past them. A position past EOF (the file was
	/// truncated) is clamped to the file size.
	pub fn read_after(&self, position: u64) -> io::Result<(Vec<u8>, u64)> {
		let mut file = self.open()?;
		let position = position.min(file.metadata()?.len());
		file.seek(SeekFrom::Start(position))?;
		let mut data = Vec::new();
		(&mut file).take(self.max_read_size).read_to_end(&mut data)?;
		let end = position + data.len() as u64;
		Ok((data, end))
	}

	/// Reads the tail of the file: up to `num_bytes` (capped at
	/// `max_read_size`) ending `backwards_offset` bytes before EOF. With
	/// `respect_current_session`, never starts before the open session.
	pub fn read_end(
		&self,
		num_bytes: u64,
		backwards_offset: u64,
		respect_current_session: bool,
	) -> io::Result<(Vec<u8>, u64)> {
		let mut file = self.open()?;
		let file_size = file.metadata()?.len();
		if file_size == 0 {
			return Ok((Vec::new(), 0));
		}

		let mut read_size = num_bytes.min(self.max_read_size);
		let mut start = file_size
			.saturating_sub(read_size)
			.saturating_sub(backwards_offset);

		if respect_current_session {
			if let Some(session) = &self.current {
				start = start.max(session.start_pos);
				read_size = read_size.min(file_size.saturating_sub(start));
			}
		}

		file.seek(SeekFrom::Start(start))?;
		let mut data = Vec::new();
		(&mut file).take(read_size).read_to_end(&mut data)?;
		let end = start + data.len() as u64;
		Ok((data, end))
	}

	pub fn write_marker(&self, m: &Marker) -> io::Result<()> {
		let mut file = self.open()?;
		let mut line = String::new();
		if !ends_with_newline(&mut file)? {
			line.push('\n');
		}
		line.push_str(&m.format_line());
		line.push('\n');
		file.write_all(line.as_bytes())
	}

	pub fn write_start_marker(&self) -> io::Result<()> {
		self.write_marker(&Marker::now(marker::START, Vec::new()))
	}

	pub fn write_stop_marker(&self, reason: &str) -> io::Result<()> {
		self.write_marker(&Marker::now(marker::STOP, vec![reason.to_string()]))
	}
}

/// True for an empty file, so the first marker is not preceded by a blank
/// line.
fn ends_with_newline(file: &mut File) -> io::Result<bool> {
	let len = file.metadata()?.len();
	if len == 0 {
		return Ok(true);
	}
	file.seek(SeekFrom::Start(len - 1))?;
	let mut last = [0u8; 1];
	file.read_exact(&mut last)?;
	Ok(last[0] == b'\n')
}
