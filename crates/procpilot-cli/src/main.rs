mod config;
mod daemon;
mod protocol;

use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use owo_colors::OwoColorize;
use procpilot_ipc::{ClientError, Packet, PacketClient, SupervisorPaths};
use serde::de::DeserializeOwned;
use serde::Serialize;

use config::GlobalConfig;
use protocol::*;

const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();
	let paths = SupervisorPaths::default();

	if args.is_empty() {
		print_usage();
		return;
	}

	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("procpilot {}", env!("CARGO_PKG_VERSION")),
		"run" => daemon::start(&paths),
		"status" | "st" => cmd_status(&paths),
		"start" => cmd_service(&paths, START, &args[1..]),
		"stop" => cmd_service(&paths, STOP, &args[1..]),
		"restart" => cmd_service(&paths, RESTART, &args[1..]),
		"logs" => cmd_logs(&paths, &args[1..]),
		"send" => cmd_send(&paths, &args[1..]),
		"print" => cmd_print(&paths, &args[1..]),
		"reload" => cmd_reload(&paths),
		"shutdown" => cmd_shutdown(&paths),
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'procpilot help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {}  lightweight service supervisor", "procpilot".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} <command> [args]", "procpilot".bold());
	eprintln!();

	eprintln!("{}", "services".cyan().bold());
	eprintln!("  {}                       Show every service", "status".bold());
	eprintln!("  {} <service>              Start a service (id or name)", "start".bold());
	eprintln!("  {} <service>               Stop a service", "stop".bold());
	eprintln!("  {} <service>            Stop then start", "restart".bold());
	eprintln!("  {} <service> <text>        Type a line into the service", "send".bold());
	eprintln!();

	eprintln!("{}", "logs".cyan().bold());
	eprintln!("  {} <service> [-n BYTES] [-a] [-f]", "logs".bold());
	eprintln!("      -n  tail size in bytes (default {})", DEFAULT_LOG_BYTES);
	eprintln!("      -a  include earlier sessions");
	eprintln!("      -f  keep printing new output");
	eprintln!();

	eprintln!("{}", "supervisor".cyan().bold());
	eprintln!("  {}                          Run the supervisor in the foreground", "run".bold());
	eprintln!("  {}                       Re-read the service registry", "reload".bold());
	eprintln!("  {} <message>              Write a message to the supervisor log", "print".bold());
	eprintln!("  {}                     Stop the supervisor", "shutdown".bold());
}

// --- Talking to the supervisor ---

fn connect(paths: &SupervisorPaths) -> (GlobalConfig, PacketClient) {
	let config = config::load_global_config(paths);
	let socket = config.socket_path();
	match PacketClient::connect(&socket) {
		Ok(client) => (config, client),
		Err(ClientError::NotRunning) => {
			eprintln!("supervisor is not running on {}", socket.display());
			eprintln!("start it with 'procpilot run'");
			std::process::exit(1);
		}
		Err(e) => fail(e),
	}
}

fn fail(e: impl std::fmt::Display) -> ! {
	eprintln!("{} {}", "error:".red().bold(), e);
	std::process::exit(1);
}

fn json_packet<T: Serialize>(subtype: &str, value: &T) -> Packet {
	Packet::json(subtype, value).unwrap_or_else(|e| fail(e))
}

fn empty_packet(subtype: &str) -> Packet {
	Packet::raw(subtype, Vec::new()).unwrap_or_else(|e| fail(e))
}

fn decode<T: DeserializeOwned>(packet: &Packet) -> T {
	packet.decode_json().unwrap_or_else(|e| fail(e))
}

/// Prints an OK/ERROR reply and exits non-zero on ERROR.
fn report(reply: &Packet) {
	let Reply { message } = decode(reply);
	if reply.subtype() == OK {
		println!("{}", message);
	} else {
		fail(message);
	}
}

fn cmd_status(paths: &SupervisorPaths) {
	let (_, mut client) = connect(paths);
	let reply = client.request(&empty_packet(STATUS)).unwrap_or_else(|e| fail(e));
	let status: StatusReply = decode(&reply);

	if status.services.is_empty() {
		println!("no services registered");
		return;
	}

	let width = status.services.iter().map(|s| s.name.len()).max().unwrap_or(0);
	let now = unix_now();
	for svc in &status.services {
		print_service_line(svc, width, now);
	}
}

fn print_service_line(svc: &ServiceStatus, width: usize, now: i64) {
	let (circle, label) = if svc.running {
		("●".green().to_string(), "on".green().to_string())
	} else if svc.auto_start {
		("●".yellow().to_string(), "pending".yellow().to_string())
	} else {
		("○".dimmed().to_string(), "off".dimmed().to_string())
	};
	let uptime = match (&svc.current_session, svc.running) {
		(Some(session), true) => format_uptime(now.saturating_sub(session.start_time).max(0) as u64),
		_ => "-".to_string(),
	};
	let auto = if svc.auto_start { "auto".cyan().to_string() } else { String::new() };
	println!(
		"{} {:<width$} {:<8} {:<8} {:<4} {}",
		circle,
		svc.name,
		label,
		uptime,
		auto,
		svc.startup_command.dimmed(),
		width = width
	);
}

fn cmd_service(paths: &SupervisorPaths, subtype: &str, args: &[String]) {
	let Some(service) = args.first() else {
		eprintln!("usage: procpilot {} <service>", subtype.to_lowercase());
		std::process::exit(1);
	};
	let (_, mut client) = connect(paths);
	let request = ServiceRequest { service: service.clone() };
	let reply = client.request(&json_packet(subtype, &request)).unwrap_or_else(|e| fail(e));
	report(&reply);
}

fn cmd_send(paths: &SupervisorPaths, args: &[String]) {
	if args.len() < 2 {
		eprintln!("usage: procpilot send <service> <text>");
		std::process::exit(1);
	}
	let (_, mut client) = connect(paths);
	let request = InputRequest {
		service: args[0].clone(),
		input: format!("{}\n", args[1..].join(" ")),
	};
	let reply = client.request(&json_packet(INPUT, &request)).unwrap_or_else(|e| fail(e));
	report(&reply);
}

fn cmd_print(paths: &SupervisorPaths, args: &[String]) {
	if args.is_empty() {
		eprintln!("usage: procpilot print <message>");
		std::process::exit(1);
	}
	let (_, mut client) = connect(paths);
	let message = PrintMessage { message: args.join(" ") };
	client.send(&json_packet(PRINT_J, &message)).unwrap_or_else(|e| fail(e));
	client.send(&empty_packet(CLOSE)).unwrap_or_else(|e| fail(e));
}

fn cmd_reload(paths: &SupervisorPaths) {
	let (_, mut client) = connect(paths);
	let reply = client.request(&empty_packet(RELOAD)).unwrap_or_else(|e| fail(e));
	report(&reply);
}

fn cmd_shutdown(paths: &SupervisorPaths) {
	let Some(pid) = procpilot_ipc::paths::read_pid(paths) else {
		eprintln!("supervisor is not running (no pid file at {})", paths.pid_path().display());
		std::process::exit(1);
	};
	match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
		Ok(()) => println!("sent SIGTERM to supervisor (pid {})", pid),
		Err(e) => fail(format!("failed to signal pid {}: {}", pid, e)),
	}
}

#[derive(Debug)]
struct LogsArgs {
	request: LogsRequest,
	follow: bool,
}

fn parse_logs_args(args: &[String]) -> Result<LogsArgs, String> {
	let mut request = LogsRequest::default();
	let mut follow = false;
	let mut service = None;

	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-f" | "--follow" => follow = true,
			"-a" | "--all" => request.whole_file = true,
			"-n" | "--bytes" => {
				let value = iter.next().ok_or("-n needs a byte count")?;
				let bytes = value.parse().map_err(|_| format!("invalid byte count: {}", value))?;
				request.bytes = Some(bytes);
			}
			flag if flag.starts_with('-') => return Err(format!("unknown flag: {}", flag)),
			name if service.is_none() => service = Some(name.to_string()),
			extra => return Err(format!("unexpected argument: {}", extra)),
		}
	}

	request.service = service.ok_or("missing service")?;
	Ok(LogsArgs { request, follow })
}

fn cmd_logs(paths: &SupervisorPaths, args: &[String]) {
	let LogsArgs { request, follow } = match parse_logs_args(args) {
		Ok(a) => a,
		Err(e) => {
			eprintln!("{}", e);
			eprintln!("usage: procpilot logs <service> [-n BYTES] [-a] [-f]");
			std::process::exit(1);
		}
	};
	let (_, mut client) = connect(paths);

	let mut end = fetch_logs(&mut client, &request);
	if !follow {
		return;
	}
	let mut asked = end;
	loop {
		std::thread::sleep(FOLLOW_INTERVAL);
		let next = follow_request(&request, asked, end);
		asked = next.after.unwrap_or(0);
		end = fetch_logs(&mut client, &next);
	}
}

/// The next request of `logs -f`. A reply ending before the position we
/// asked to resume from means the log was truncated, so tail it again.
fn follow_request(initial: &LogsRequest, asked: u64, end: u64) -> LogsRequest {
	if end < asked {
		eprintln!("{}", "log truncated, following from the tail".dimmed());
		return LogsRequest {
			offset: None,
			after: None,
			..initial.clone()
		};
	}
	LogsRequest {
		service: initial.service.clone(),
		after: Some(end),
		..LogsRequest::default()
	}
}

/// Prints one LOGS reply and returns the offset to continue from.
fn fetch_logs(client: &mut PacketClient, request: &LogsRequest) -> u64 {
	let head = client.request(&json_packet(LOGS, request)).unwrap_or_else(|e| fail(e));
	if head.subtype() != LOGINFO {
		report(&head);
		std::process::exit(1);
	}
	let info: LogInfo = decode(&head);
	let body = client.recv().unwrap_or_else(|e| fail(e));

	let mut stdout = std::io::stdout().lock();
	let _ = stdout.write_all(body.payload());
	let _ = stdout.flush();
	info.end
}

// --- Formatting helpers ---

fn unix_now() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

/// Session uptime in its two largest units, e.g. `3h12m`.
fn format_uptime(secs: u64) -> String {
	const UNITS: [(u64, &str); 4] = [(86400, "d"), (3600, "h"), (60, "m"), (1, "s")];
	let Some(i) = UNITS.iter().position(|(size, _)| secs >= *size) else {
		return "0s".to_string();
	};
	let (major, label) = UNITS[i];
	let mut out = format!("{}{}", secs / major, label);
	if let Some((minor, minor_label)) = UNITS.get(i + 1) {
		let rest = (secs % major) / minor;
		if rest > 0 {
			out.push_str(&format!("{}{}", rest, minor_label));
		}
	}
	out
}
