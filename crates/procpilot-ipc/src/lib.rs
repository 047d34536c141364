//! # procpilot-ipc
//!
//! Framed packet protocol between the procpilot supervisor and its local
//! clients over a Unix domain socket.
//!
//! - [`packet`]: the 13-byte header codec.
//! - [`connection`]: per-client receive buffer with partial-read reassembly.
//! - [`registry`]: non-blocking accept, read, and idle eviction, driven once
//!   per supervisor tick.
//! - [`client`]: a blocking client for the CLI.

pub mod paths;
pub mod packet;
pub mod connection;
pub mod registry;
pub mod client;

pub use paths::SupervisorPaths;
pub use packet::{Packet, PacketType, ProtocolError};
pub use connection::{Connection, ConnectionError, ConnectionId};
pub use registry::{ConnectionRegistry, Inbound};
pub use client::{PacketClient, ClientError};
