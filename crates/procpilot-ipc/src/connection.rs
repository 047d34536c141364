use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::packet::{self, Packet, ProtocolError};

const READ_CHUNK: usize = 64 * 1024;
const MIN_WRITE_TIMEOUT: Duration = Duration::from_millis(1);

/// Peer label used when the transport has no addressable peer.
pub const UNNAMED_PEER: &str = "unix_socket";

#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("not connected")]
	NotConnected,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
}

pub type ConnectionId = u64;

/// One client session: a non-blocking socket plus its receive buffer.
pub struct Connection {
	id: ConnectionId,
	stream: UnixStream,
	buffer: Vec<u8>,
	peer: String,
	last_active: Instant,
	closed: bool,
	write_timeout: Duration,
}

impl Connection {
	pub fn new(id: ConnectionId, stream: UnixStream, write_timeout: Duration) -> io::Result<Self> {
		stream.set_nonblocking(true)?;
		let peer = stream
			.peer_addr()
			.ok()
			.and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
			.unwrap_or_else(|| UNNAMED_PEER.to_string());
		Ok(Self {
			id,
			stream,
			buffer: Vec::new(),
			peer,
			last_active: Instant::now(),
			closed: false,
			write_timeout,
		})
	}

	pub fn id(&self) -> ConnectionId {
		self.id
	}

	pub fn peer(&self) -> &str {
		&self.peer
	}

	pub fn is_closed(&self) -> bool {
		self.closed
	}

	pub fn last_active(&self) -> Instant {
		self.last_active
	}

	pub fn buffered(&self) -> usize {
		self.buffer.len()
	}

	pub fn close(&mut self) {
		if self.closed {
			return;
		}
		let _ = self.stream.shutdown(std::net::Shutdown::Both);
		self.closed = true;
	}

	/// One non-blocking read. EOF and hard errors close the connection; no
	/// pending data is not an error.
	pub fn fill_buffer(&mut self) -> usize {
		if self.closed {
			return 0;
		}
		let mut chunk = [0u8; READ_CHUNK];
		match self.stream.read(&mut chunk) {
			Ok(0) => {
				tracing::debug!("connection {} ({}) closed by peer", self.id, self.peer);
				self.close();
				0
			}
			Ok(n) => {
				self.buffer.extend_from_slice(&chunk[..n]);
				self.last_active = Instant::now();
				n
			}
			Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => 0,
			Err(e) => {
				tracing::warn!("error reading from {}: {}", self.peer, e);
				self.close();
				0
			}
		}
	}

	/// Splits the next complete frame off the front of the buffer.
	pub fn next_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
		packet::check_header(&self.buffer)?;
		if !packet::is_frame_complete(&self.buffer) {
			return Ok(None);
		}
		let (packet, consumed) = packet::decode_one(&self.buffer)?;
		self.buffer.drain(..consumed);
		Ok(Some(packet))
	}

	/// Every complete frame currently buffered, in arrival order. Frames
	/// decoded before a protocol violation are still returned alongside it.
	pub fn drain_packets(&mut self) -> (Vec<Packet>, Option<ProtocolError>) {
		let mut packets = Vec::new();
		loop {
			match self.next_packet() {
				Ok(Some(packet)) => packets.push(packet),
				Ok(None) => return (packets, None),
				Err(e) => return (packets, Some(e)),
			}
		}
	}

	/// Writes the whole frame or fails. The socket is switched to blocking
	/// with a write timeout for the duration of the send so a frame is never
	/// left half-written on a full socket buffer.
	pub fn send_packet(&mut self, packet: &Packet) -> Result<(), ConnectionError> {
		if self.closed {
			return Err(ConnectionError::NotConnected);
		}
		let bytes = packet.encode();
		let result = self.write_frame(&bytes);
		if result.is_err() {
			self.close();
		}
		result.map_err(ConnectionError::from)
	}

	fn write_frame(&mut self, bytes: &[u8]) -> io::Result<()> {
		self.stream.set_nonblocking(false)?;
		// A zero timeout is rejected by the socket layer.
		self.stream.set_write_timeout(Some(self.write_timeout.max(MIN_WRITE_TIMEOUT)))?;
		let written = self.stream.write_all(bytes);
		self.stream.set_nonblocking(true)?;
		written
	}

	pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
		now.saturating_duration_since(self.last_active) > timeout
	}

	/// Closes the connection when it has been idle longer than `timeout`.
	/// Returns whether it is still open.
	pub fn check_timeout(&mut self, now: Instant, timeout: Duration) -> bool {
		if !self.closed && self.is_idle(now, timeout) {
			tracing::info!("client {} ({}) timed out", self.id, self.peer);
			self.close();
		}
		!self.closed
	}
}
