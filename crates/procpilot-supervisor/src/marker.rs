//! Marker lines written into service logs.
//!
//! ```text
//! --- [PROCPILOT] <name> [<tag>,<tag>] (<YYYY-MM-DD HH:MM:SS>) ---
//! ```
//!
//! Timestamps are UTC with second resolution. The format is read by humans
//! as well as by [`crate::tracker`], so it must stay byte-for-byte stable.

use chrono::{DateTime, NaiveDateTime, Utc};

const PREFIX: &str = "--- [PROCPILOT] ";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const START: &str = "START";
pub const STOP: &str = "STOP";
pub const SHUTDOWN: &str = "SHUTDOWN";
pub const ERROR: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
	pub name: String,
	pub tags: Vec<String>,
	/// Seconds since the epoch.
	pub timestamp: i64,
	/// Byte offset of the marker line's first byte.
	pub position: u64,
	/// 1-based line number.
	pub line: u64,
}

impl Marker {
	/// A marker stamped with the current time, not yet placed in a file.
	pub fn now(name: impl Into<String>, tags: Vec<String>) -> Self {
		Self {
			name: name.into(),
			tags,
			timestamp: Utc::now().timestamp(),
			position: 0,
			line: 0,
		}
	}

	/// Whether this marker closes the session it belongs to.
	pub fn is_terminal(&self) -> bool {
		matches!(self.name.as_str(), STOP | SHUTDOWN | ERROR)
	}

	pub fn format_line(&self) -> String {
		format!(
			"{}{} [{}] ({}) ---",
			PREFIX,
			self.name,
			self.tags.join(","),
			format_timestamp(self.timestamp)
		)
	}

	/// Parses a log line. Anything that is not a well-formed marker,
	/// including one with a malformed timestamp, yields `None`.
	pub fn parse(line: &str) -> Option<Self> {
		let line = line.trim_end_matches(['\n', '\r']);
		let rest = line.strip_prefix(PREFIX)?;
		let (name, rest) = rest.split_once(" [")?;
		if name.is_empty() {
			return None;
		}
		let (tags, rest) = rest.split_once("] (")?;
		let (stamp, _) = rest.split_once(") ---")?;
		let timestamp = parse_timestamp(stamp)?;

		let tags = if tags.is_empty() {
			Vec::new()
		} else {
			tags.split(',').map(str::to_string).collect()
		};

		Some(Self {
			name: name.to_string(),
			tags,
			timestamp,
			position: 0,
			line: 0,
		})
	}
}

pub fn format_timestamp(secs: i64) -> String {
	match DateTime::<Utc>::from_timestamp(secs, 0) {
		Some(t) => t.format(TIME_FORMAT).to_string(),
		None => "0000-00-00 00:00:00".to_string(),
	}
}

pub fn parse_timestamp(s: &str) -> Option<i64> {
	NaiveDateTime::parse_from_str(s, TIME_FORMAT)
		.ok()
		.map(|t| t.and_utc().timestamp())
}
