use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde_json::json;

use procpilot_ipc::client::{self, ClientError, PacketClient};
use procpilot_ipc::packet::{Packet, PacketType};
use procpilot_ipc::paths::{self, SupervisorPaths};
use procpilot_ipc::registry::{ConnectionRegistry, Inbound};

fn socket_in(dir: &tempfile::TempDir) -> PathBuf {
	// Keep socket paths short (SUN_LEN limit ~104)
	dir.path().join("pp.sock")
}

fn bind(dir: &tempfile::TempDir) -> ConnectionRegistry {
	ConnectionRegistry::bind(&socket_in(dir), Duration::from_secs(10), Duration::from_secs(1)).unwrap()
}

fn poll_until(registry: &mut ConnectionRegistry, want: usize) -> Vec<Inbound> {
	let mut got = Vec::new();
	for _ in 0..50 {
		got.extend(registry.poll());
		if got.len() >= want {
			break;
		}
		std::thread::sleep(Duration::from_millis(20));
	}
	got
}

// --- Paths ---

#[test]
fn paths_follow_xdg() {
	let tmp = std::env::temp_dir();
	unsafe { std::env::set_var("XDG_STATE_HOME", &tmp) };
	unsafe { std::env::set_var("XDG_CONFIG_HOME", &tmp) };
	let paths = SupervisorPaths::new("pptest");
	assert_eq!(paths.state_dir(), tmp.join("pptest"));
	assert_eq!(paths.pid_path(), tmp.join("pptest").join("daemon.pid"));
	assert_eq!(paths.log_dir(), tmp.join("pptest").join("logs"));
	assert_eq!(paths.registry_path(), tmp.join("pptest").join("services.json"));
	assert_eq!(paths::read_pid(&paths), None);
}

#[test]
fn tilde_expansion() {
	let home = paths::home_dir().unwrap_or_default();
	assert_eq!(paths::expand_tilde("~/svc"), home.join("svc"));
	assert_eq!(paths::expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
	assert_eq!(paths::expand_tilde("rel~/x"), PathBuf::from("rel~/x"));
}

// --- Registry ---

#[test]
fn bind_replaces_stale_socket_file() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(socket_in(&dir), b"stale").unwrap();
	let registry = bind(&dir);
	assert!(registry.is_empty());
	assert!(client::is_running(registry.socket_path()));
}

#[test]
fn socket_file_removed_on_drop() {
	let dir = tempfile::tempdir().unwrap();
	let registry = bind(&dir);
	let path = registry.socket_path().to_path_buf();
	drop(registry);
	assert!(!path.exists());
}

#[test]
fn accepts_and_reads_packets_in_order() {
	let dir = tempfile::tempdir().unwrap();
	let mut registry = bind(&dir);

	let mut stream = UnixStream::connect(socket_in(&dir)).unwrap();
	stream.write_all(&Packet::raw("PRINT", b"Hello world!".to_vec()).unwrap().encode()).unwrap();
	stream.write_all(&Packet::json("PRINT_J", &json!({"message": "again"})).unwrap().encode()).unwrap();

	let inbound = poll_until(&mut registry, 2);
	assert_eq!(inbound.len(), 2);
	assert_eq!(inbound[0].packet.subtype(), "PRINT");
	assert_eq!(inbound[1].packet.kind(), PacketType::Json);
	assert_eq!(inbound[0].connection, inbound[1].connection);
}

#[test]
fn protocol_violation_closes_only_that_connection() {
	let dir = tempfile::tempdir().unwrap();
	let mut registry = bind(&dir);

	let mut good = UnixStream::connect(socket_in(&dir)).unwrap();
	poll_until(&mut registry, 0);
	let mut bad = UnixStream::connect(socket_in(&dir)).unwrap();
	for _ in 0..10 {
		registry.poll();
		if registry.len() == 2 {
			break;
		}
		std::thread::sleep(Duration::from_millis(20));
	}
	assert_eq!(registry.len(), 2);

	let mut garbage = vec![2u8];
	garbage.extend_from_slice(b"PRINT_J\0");
	garbage.extend_from_slice(&4u32.to_be_bytes());
	garbage.extend_from_slice(b"{{{{");
	bad.write_all(&garbage).unwrap();
	good.write_all(&Packet::raw("PRINT", b"ok".to_vec()).unwrap().encode()).unwrap();

	let inbound = poll_until(&mut registry, 1);
	assert_eq!(inbound.len(), 1);
	assert_eq!(inbound[0].packet.payload(), b"ok");
	assert_eq!(registry.len(), 1);
}

#[test]
fn frames_ahead_of_a_violation_are_still_delivered() {
	let dir = tempfile::tempdir().unwrap();
	let mut registry = bind(&dir);

	let mut stream = UnixStream::connect(socket_in(&dir)).unwrap();
	let mut bytes = Packet::raw("PRINT", b"first".to_vec()).unwrap().encode();
	bytes.push(2u8);
	bytes.extend_from_slice(b"PRINT_J\0");
	bytes.extend_from_slice(&4u32.to_be_bytes());
	bytes.extend_from_slice(b"{{{{");
	stream.write_all(&bytes).unwrap();

	let inbound = poll_until(&mut registry, 1);
	assert_eq!(inbound.len(), 1);
	assert_eq!(inbound[0].packet.payload(), b"first");
	assert!(registry.is_empty());
}

#[test]
fn idle_connections_are_evicted() {
	let dir = tempfile::tempdir().unwrap();
	let mut registry =
		ConnectionRegistry::bind(&socket_in(&dir), Duration::from_millis(50), Duration::from_secs(1)).unwrap();
	let _stream = UnixStream::connect(socket_in(&dir)).unwrap();
	assert!(registry.accept_pending());
	assert_eq!(registry.len(), 1);

	registry.sweep(Instant::now() + Duration::from_secs(1));
	assert!(registry.is_empty());
}

#[test]
fn peer_hangup_is_removed() {
	let dir = tempfile::tempdir().unwrap();
	let mut registry = bind(&dir);
	let stream = UnixStream::connect(socket_in(&dir)).unwrap();
	assert!(registry.accept_pending());
	drop(stream);
	poll_until(&mut registry, 0);
	std::thread::sleep(Duration::from_millis(20));
	registry.poll();
	assert!(registry.is_empty());
}

#[test]
fn send_to_unknown_connection_fails() {
	let dir = tempfile::tempdir().unwrap();
	let mut registry = bind(&dir);
	let packet = Packet::raw("PONG", Vec::new()).unwrap();
	assert!(registry.send(42, &packet).is_err());
}

// --- Client + registry roundtrip ---

#[test]
fn client_request_reply() {
	let dir = tempfile::tempdir().unwrap();
	let mut registry = bind(&dir);
	let path = socket_in(&dir);

	let handle = std::thread::spawn(move || {
		let mut client = PacketClient::connect(&path).unwrap();
		client.request(&Packet::json("PING", &json!({})).unwrap())
	});

	let inbound = poll_until(&mut registry, 1);
	assert_eq!(inbound[0].packet.subtype(), "PING");
	registry
		.send(inbound[0].connection, &Packet::raw("PONG", b"pong".to_vec()).unwrap())
		.unwrap();

	let reply = handle.join().unwrap().unwrap();
	assert_eq!(reply.subtype(), "PONG");
	assert_eq!(reply.payload(), b"pong");
}

#[test]
fn client_connect_returns_not_running() {
	let dir = tempfile::tempdir().unwrap();
	match PacketClient::connect(&socket_in(&dir)) {
		Err(ClientError::NotRunning) => {}
		Err(other) => panic!("expected NotRunning, got {:?}", other),
		Ok(_) => panic!("expected error, got Ok"),
	}
}
