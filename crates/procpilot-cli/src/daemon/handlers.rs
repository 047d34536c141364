use std::path::Path;

use procpilot_ipc::{Packet, PacketType};
use procpilot_supervisor::{Service, ServiceManager};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{self, *};

/// What the loop should do with the connection a packet arrived on.
#[derive(Debug)]
pub enum Outcome {
	Nothing,
	Close,
	Reply(Vec<Packet>),
}

pub fn handle(manager: &mut ServiceManager, registry_path: &Path, packet: &Packet) -> Outcome {
	match packet.subtype() {
		protocol::CLOSE => Outcome::Close,
		protocol::PRINT => {
			tracing::info!(target: "procpilot::client", "{}", String::from_utf8_lossy(packet.payload()));
			Outcome::Nothing
		}
		protocol::PRINT_J => {
			match print_text(packet) {
				Some(text) => tracing::info!(target: "procpilot::client", "{}", text),
				None => tracing::warn!("PRINT_J without a message"),
			}
			Outcome::Nothing
		}
		protocol::PING => reply_raw(PONG, Vec::new()),
		protocol::STATUS => status(manager),
		protocol::START => with_service(manager, packet, |svc| {
			if svc.start() {
				Ok(format!("{} started", svc.name()))
			} else {
				Err(format!("{} is already running or failed to start", svc.name()))
			}
		}),
		protocol::STOP => with_service(manager, packet, |svc| {
			if svc.stop() {
				Ok(format!("{} stopped", svc.name()))
			} else {
				Err(format!("{} is not running", svc.name()))
			}
		}),
		protocol::RESTART => with_service(manager, packet, |svc| {
			if svc.restart() {
				Ok(format!("{} restarted", svc.name()))
			} else {
				Err(format!("{} failed to start", svc.name()))
			}
		}),
		protocol::INPUT => input(manager, packet),
		protocol::LOGS => logs(manager, packet),
		protocol::RELOAD => match manager.load_registry(registry_path) {
			Ok(n) => ok(format!("loaded {} services", n)),
			Err(e) => error(e.to_string()),
		},
		other => {
			tracing::debug!("ignoring packet with subtype {:?}", other);
			Outcome::Nothing
		}
	}
}

fn decode<T: DeserializeOwned>(packet: &Packet) -> Result<T, Outcome> {
	if packet.kind() != PacketType::Json {
		return Err(error(format!("{} expects a JSON payload", packet.subtype())));
	}
	packet
		.decode_json()
		.map_err(|e| error(format!("invalid {} request: {}", packet.subtype(), e)))
}

fn with_service<F>(manager: &mut ServiceManager, packet: &Packet, op: F) -> Outcome
where
	F: FnOnce(&mut Service) -> Result<String, String>,
{
	let request: ServiceRequest = match decode(packet) {
		Ok(r) => r,
		Err(outcome) => return outcome,
	};
	match manager.find_mut(&request.service) {
		Some(svc) => match op(svc) {
			Ok(message) => ok(message),
			Err(message) => error(message),
		},
		None => unknown(&request.service),
	}
}

fn status(manager: &mut ServiceManager) -> Outcome {
	let services = manager
		.services_mut()
		.map(|svc| {
			let tracker = svc.tracker();
			let current_session = tracker.current_session().map(|s| SessionSummary {
				start_pos: s.start_pos,
				start_time: s.start_time,
				markers: s.markers.len(),
			});
			let sessions = tracker.history().len();
			ServiceStatus {
				id: svc.id().to_string(),
				name: svc.name().to_string(),
				session: svc.session_name().to_string(),
				running: svc.is_running(false),
				auto_start: svc.auto_start(),
				start_directory: svc.start_directory().map(|d| d.display().to_string()),
				startup_command: svc.config().startup_command.clone(),
				sessions,
				current_session,
			}
		})
		.collect();
	reply_json(STATUS, &StatusReply { services })
}

/// The `message` of a PRINT_J payload. Strings print bare, any other JSON
/// value prints in its JSON form.
fn print_text(packet: &Packet) -> Option<String> {
	let value = packet.json_map()?.get("message")?;
	Some(value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()))
}

fn input(manager: &mut ServiceManager, packet: &Packet) -> Outcome {
	let request: InputRequest = match decode(packet) {
		Ok(r) => r,
		Err(outcome) => return outcome,
	};
	match manager.find_mut(&request.service) {
		Some(svc) => {
			if svc.send_input(request.input.as_bytes()) {
				ok(format!("sent to {}", svc.name()))
			} else {
				error(format!("{} is not running", svc.name()))
			}
		}
		None => unknown(&request.service),
	}
}

fn logs(manager: &mut ServiceManager, packet: &Packet) -> Outcome {
	let request: LogsRequest = match decode(packet) {
		Ok(r) => r,
		Err(outcome) => return outcome,
	};
	let Some(svc) = manager.find_mut(&request.service) else {
		return unknown(&request.service);
	};
	if let Err(e) = svc.scan_logs() {
		tracing::warn!("{}: log scan failed: {}", svc.name(), e);
	}

	let tracker = svc.tracker();
	let read = match request.after {
		Some(position) => tracker.read_after(position),
		None => tracker.read_end(
			request.bytes.unwrap_or(DEFAULT_LOG_BYTES),
			request.offset.unwrap_or(0),
			!request.whole_file,
		),
	};
	let (data, end) = match read {
		Ok(r) => r,
		Err(e) => return error(format!("failed to read logs for {}: {}", svc.name(), e)),
	};

	let info = LogInfo {
		start: end - data.len() as u64,
		end,
	};
	match (Packet::json(LOGINFO, &info), Packet::raw(LOGS, data)) {
		(Ok(head), Ok(body)) => Outcome::Reply(vec![head, body]),
		(Err(e), _) | (_, Err(e)) => error(format!("cannot send logs: {}", e)),
	}
}

fn unknown(service: &str) -> Outcome {
	error(format!("unknown service: {}", service))
}

fn ok(message: String) -> Outcome {
	reply_json(OK, &Reply { message })
}

fn error(message: String) -> Outcome {
	reply_json(ERROR, &Reply { message })
}

fn reply_json<T: Serialize>(subtype: &str, value: &T) -> Outcome {
	match Packet::json(subtype, value) {
		Ok(p) => Outcome::Reply(vec![p]),
		Err(e) => {
			tracing::error!("failed to build {} reply: {}", subtype, e);
			Outcome::Nothing
		}
	}
}

fn reply_raw(subtype: &str, payload: Vec<u8>) -> Outcome {
	match Packet::raw(subtype, payload) {
		Ok(p) => Outcome::Reply(vec![p]),
		Err(e) => {
			tracing::error!("failed to build {} reply: {}", subtype, e);
			Outcome::Nothing
		}
	}
}
