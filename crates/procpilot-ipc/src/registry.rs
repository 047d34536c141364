use std::io;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::connection::{Connection, ConnectionError, ConnectionId};
use crate::packet::Packet;

pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// A packet together with the connection it arrived on.
#[derive(Debug)]
pub struct Inbound {
	pub connection: ConnectionId,
	pub packet: Packet,
}

/// Owns the listening socket and every live client connection. All methods
/// are non-blocking and meant to be driven once per supervisor tick.
pub struct ConnectionRegistry {
	listener: UnixListener,
	socket_path: PathBuf,
	connections: Vec<Connection>,
	idle_timeout: Duration,
	write_timeout: Duration,
	next_id: ConnectionId,
}

impl ConnectionRegistry {
	/// Binds `socket_path`, replacing any stale socket file left behind by a
	/// previous run.
	pub fn bind(socket_path: &Path, idle_timeout: Duration, write_timeout: Duration) -> io::Result<Self> {
		if let Some(parent) = socket_path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent)?;
			}
		}
		if socket_path.exists() {
			std::fs::remove_file(socket_path)?;
		}

		let listener = UnixListener::bind(socket_path)?;
		listener.set_nonblocking(true)?;
		tracing::info!("listening on {}", socket_path.display());

		Ok(Self {
			listener,
			socket_path: socket_path.to_path_buf(),
			connections: Vec::new(),
			idle_timeout,
			write_timeout,
			next_id: 1,
		})
	}

	pub fn socket_path(&self) -> &Path {
		&self.socket_path
	}

	pub fn len(&self) -> usize {
		self.connections.len()
	}

	pub fn is_empty(&self) -> bool {
		self.connections.is_empty()
	}

	pub fn ids(&self) -> Vec<ConnectionId> {
		self.connections.iter().map(|c| c.id()).collect()
	}

	/// At most one accept per call; returns whether a client was accepted.
	pub fn accept_pending(&mut self) -> bool {
		let stream = match self.listener.accept() {
			Ok((stream, _)) => stream,
			Err(e) if e.kind() == io::ErrorKind::WouldBlock => return false,
			Err(e) => {
				tracing::error!("accept error: {}", e);
				return false;
			}
		};

		let id = self.next_id;
		match Connection::new(id, stream, self.write_timeout) {
			Ok(conn) => {
				self.next_id += 1;
				tracing::info!("accepted connection {} ({})", id, conn.peer());
				self.connections.push(conn);
				true
			}
			Err(e) => {
				tracing::warn!("failed to configure accepted connection: {}", e);
				false
			}
		}
	}

	/// Reads once from every open connection and collects all complete
	/// frames. A protocol violation closes only the offending connection.
	pub fn read_all(&mut self) -> Vec<Inbound> {
		let mut inbound = Vec::new();
		for conn in self.connections.iter_mut().filter(|c| !c.is_closed()) {
			conn.fill_buffer();
			let (packets, err) = conn.drain_packets();
			let id = conn.id();
			inbound.extend(packets.into_iter().map(|packet| Inbound { connection: id, packet }));
			if let Some(e) = err {
				tracing::warn!("protocol error from {} ({}): {}", id, conn.peer(), e);
				conn.close();
			}
		}
		inbound
	}

	/// Closes idle connections and drops every closed one.
	pub fn sweep(&mut self, now: Instant) {
		let timeout = self.idle_timeout;
		for conn in self.connections.iter_mut() {
			conn.check_timeout(now, timeout);
		}
		self.connections.retain(|c| !c.is_closed());
	}

	/// One tick of socket work: accept, read, then evict.
	pub fn poll(&mut self) -> Vec<Inbound> {
		self.accept_pending();
		let inbound = self.read_all();
		self.sweep(Instant::now());
		inbound
	}

	pub fn is_open(&self, id: ConnectionId) -> bool {
		self.connections.iter().any(|c| c.id() == id && !c.is_closed())
	}

	pub fn send(&mut self, id: ConnectionId, packet: &Packet) -> Result<(), ConnectionError> {
		let conn = self
			.connections
			.iter_mut()
			.find(|c| c.id() == id)
			.ok_or(ConnectionError::NotConnected)?;
		conn.send_packet(packet)
	}

	pub fn close(&mut self, id: ConnectionId) {
		if let Some(conn) = self.connections.iter_mut().find(|c| c.id() == id) {
			tracing::info!("closing connection {} ({})", id, conn.peer());
			conn.close();
		}
	}
}

impl Drop for ConnectionRegistry {
	fn drop(&mut self) {
		for conn in self.connections.iter_mut() {
			conn.close();
		}
		let _ = std::fs::remove_file(&self.socket_path);
	}
}
