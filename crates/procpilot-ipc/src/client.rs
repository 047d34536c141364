use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::packet::{self, Packet, ProtocolError};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from client operations.
#[derive(Debug, Error)]
pub enum ClientError {
	/// Supervisor is not running (socket missing or refusing connections).
	#[error("supervisor not running")]
	NotRunning,
	#[error("io error: {0}")]
	Io(#[from] io::Error),
	#[error("protocol error: {0}")]
	Protocol(#[from] ProtocolError),
	/// The supervisor closed the connection before a full reply arrived.
	#[error("connection closed by supervisor")]
	Closed,
}

/// Blocking client that exchanges whole frames with the supervisor.
pub struct PacketClient {
	stream: UnixStream,
	buffer: Vec<u8>,
}

impl PacketClient {
	/// Connect to a running supervisor.
	/// Returns `Err(ClientError::NotRunning)` if nothing is listening.
	pub fn connect(socket_path: &Path) -> Result<Self, ClientError> {
		let stream = UnixStream::connect(socket_path).map_err(|_| ClientError::NotRunning)?;
		stream.set_read_timeout(Some(DEFAULT_READ_TIMEOUT))?;
		Ok(Self {
			stream,
			buffer: Vec::new(),
		})
	}

	pub fn set_read_timeout(&self, timeout: Duration) -> Result<(), ClientError> {
		self.stream.set_read_timeout(Some(timeout))?;
		Ok(())
	}

	pub fn send(&mut self, packet: &Packet) -> Result<(), ClientError> {
		self.stream.write_all(&packet.encode())?;
		Ok(())
	}

	/// Blocks until one complete frame has arrived.
	pub fn recv(&mut self) -> Result<Packet, ClientError> {
		let mut chunk = [0u8; 16 * 1024];
		loop {
			packet::check_header(&self.buffer)?;
			if packet::is_frame_complete(&self.buffer) {
				let (packet, consumed) = packet::decode_one(&self.buffer)?;
				self.buffer.drain(..consumed);
				return Ok(packet);
			}
			let n = self.stream.read(&mut chunk)?;
			if n == 0 {
				return Err(ClientError::Closed);
			}
			self.buffer.extend_from_slice(&chunk[..n]);
		}
	}

	pub fn request(&mut self, packet: &Packet) -> Result<Packet, ClientError> {
		self.send(packet)?;
		self.recv()
	}
}

/// Check if a supervisor is accepting connections on `socket_path`.
pub fn is_running(socket_path: &Path) -> bool {
	UnixStream::connect(socket_path).is_ok()
}
