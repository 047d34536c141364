//! Subtypes and typed payloads exchanged between `procpilot` and its
//! supervisor.

use serde::{Deserialize, Serialize};

pub const CLOSE: &str = "CLOSE";
pub const PRINT: &str = "PRINT";
pub const PRINT_J: &str = "PRINT_J";
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";
pub const STATUS: &str = "STATUS";
pub const START: &str = "START";
pub const STOP: &str = "STOP";
pub const RESTART: &str = "RESTART";
pub const INPUT: &str = "INPUT";
pub const LOGS: &str = "LOGS";
pub const LOGINFO: &str = "LOGINFO";
pub const RELOAD: &str = "RELOAD";
pub const OK: &str = "OK";
pub const ERROR: &str = "ERROR";

/// Default tail size for `LOGS` without an explicit byte count.
pub const DEFAULT_LOG_BYTES: u64 = 16 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintMessage {
	pub message: String,
}

/// Payload of START, STOP and RESTART. `service` is an id or a name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRequest {
	pub service: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequest {
	pub service: String,
	pub input: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsRequest {
	pub service: String,
	/// Tail size; capped by the supervisor's read limit.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bytes: Option<u64>,
	/// Distance from EOF at which the tail ends.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub offset: Option<u64>,
	/// Read forward from this position instead of tailing.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub after: Option<u64>,
	/// Tail across session boundaries.
	#[serde(default)]
	pub whole_file: bool,
}

/// Byte range of the RAW `LOGS` packet that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogInfo {
	pub start: u64,
	pub end: u64,
}

/// Body of OK and ERROR replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
	pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
	pub services: Vec<ServiceStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
	pub id: String,
	pub name: String,
	pub session: String,
	pub running: bool,
	pub auto_start: bool,
	pub start_directory: Option<String>,
	pub startup_command: String,
	/// Closed sessions found in the log.
	pub sessions: usize,
	pub current_session: Option<SessionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
	pub start_pos: u64,
	pub start_time: i64,
	pub markers: usize,
}
