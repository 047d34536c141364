//! Fixed-header packet framing.
//!
//! Every frame on the wire is laid out big-endian as:
//!
//! ```text
//! TYPE (1) | SUBTYPE (8, zero-padded UTF-8) | LENGTH (4) | PAYLOAD (LENGTH)
//! ```
//!
//! A frame never exceeds [`MAX_FRAME_SIZE`] bytes including its header.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

pub const HEADER_SIZE: usize = 13;
pub const SUBTYPE_LEN: usize = 8;
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE;

const LENGTH_OFFSET: usize = 1 + SUBTYPE_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
	#[error("invalid subtype {subtype:?} ({len} bytes, at most {SUBTYPE_LEN} without NUL)")]
	InvalidSubtype { subtype: String, len: usize },
	#[error("buffer does not hold a complete frame")]
	IncompleteFrame,
	#[error("subtype is not valid UTF-8")]
	InvalidEncoding,
	#[error("invalid JSON payload: {0}")]
	InvalidPayload(String),
	#[error("JSON payload is not an object")]
	NotAnObject,
	#[error("frame of {size} bytes exceeds the {max} byte limit")]
	FrameTooLarge { size: usize, max: usize },
}

/// Payload interpretation. Unknown type bytes are kept so newer peers can
/// talk to older supervisors without a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
	Raw,
	Json,
	Other(u8),
}

impl PacketType {
	pub fn from_byte(byte: u8) -> Self {
		match byte {
			1 => PacketType::Raw,
			2 => PacketType::Json,
			other => PacketType::Other(other),
		}
	}

	pub fn as_byte(self) -> u8 {
		match self {
			PacketType::Raw => 1,
			PacketType::Json => 2,
			PacketType::Other(b) => b,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
	kind: PacketType,
	subtype: String,
	payload: Vec<u8>,
	json: Option<Map<String, Value>>,
}

impl Packet {
	/// Validates the subtype (at most 8 bytes, no NUL since NUL pads it on
	/// the wire), the payload size and, for JSON packets, that the payload
	/// decodes to an object.
	pub fn new(
		kind: PacketType,
		subtype: impl Into<String>,
		payload: Vec<u8>,
	) -> Result<Self, ProtocolError> {
		let subtype = subtype.into();
		if subtype.len() > SUBTYPE_LEN || subtype.contains('\0') {
			let len = subtype.len();
			return Err(ProtocolError::InvalidSubtype { subtype, len });
		}
		if payload.len() > MAX_PAYLOAD_SIZE {
			return Err(ProtocolError::FrameTooLarge {
				size: HEADER_SIZE + payload.len(),
				max: MAX_FRAME_SIZE,
			});
		}

		let json = match kind {
			PacketType::Json => Some(parse_object(&payload)?),
			_ => None,
		};

		Ok(Self {
			kind,
			subtype,
			payload,
			json,
		})
	}

	pub fn raw(subtype: impl Into<String>, payload: impl Into<Vec<u8>>) -> Result<Self, ProtocolError> {
		Self::new(PacketType::Raw, subtype, payload.into())
	}

	/// Serializes `value` as the payload. It must serialize to a JSON object.
	pub fn json<T: Serialize>(subtype: impl Into<String>, value: &T) -> Result<Self, ProtocolError> {
		let payload =
			serde_json::to_vec(value).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
		Self::new(PacketType::Json, subtype, payload)
	}

	pub fn kind(&self) -> PacketType {
		self.kind
	}

	pub fn subtype(&self) -> &str {
		&self.subtype
	}

	pub fn payload(&self) -> &[u8] {
		&self.payload
	}

	pub fn json_map(&self) -> Option<&Map<String, Value>> {
		self.json.as_ref()
	}

	/// Decodes a JSON payload into a typed record.
	pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
		if self.kind != PacketType::Json {
			return Err(ProtocolError::InvalidPayload("not a JSON packet".to_string()));
		}
		serde_json::from_slice(&self.payload).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
	}

	pub fn frame_size(&self) -> usize {
		HEADER_SIZE + self.payload.len()
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.frame_size());
		out.push(self.kind.as_byte());

		let mut subtype = [0u8; SUBTYPE_LEN];
		subtype[..self.subtype.len()].copy_from_slice(self.subtype.as_bytes());
		out.extend_from_slice(&subtype);

		// Bounded by MAX_PAYLOAD_SIZE at construction.
		out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
		out.extend_from_slice(&self.payload);
		out
	}
}

fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, ProtocolError> {
	let text = std::str::from_utf8(payload)
		.map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
	match serde_json::from_str::<Value>(text) {
		Ok(Value::Object(map)) => Ok(map),
		Ok(_) => Err(ProtocolError::NotAnObject),
		Err(e) => Err(ProtocolError::InvalidPayload(e.to_string())),
	}
}

/// Payload length declared in the header, if the header has arrived.
pub fn declared_length(buffer: &[u8]) -> Option<usize> {
	let bytes: [u8; 4] = buffer.get(LENGTH_OFFSET..HEADER_SIZE)?.try_into().ok()?;
	Some(u32::from_be_bytes(bytes) as usize)
}

/// Rejects a frame as soon as its header declares a size above the cap, so a
/// bogus length cannot make the receive buffer grow without bound.
pub fn check_header(buffer: &[u8]) -> Result<(), ProtocolError> {
	match declared_length(buffer) {
		Some(len) if HEADER_SIZE + len > MAX_FRAME_SIZE => Err(ProtocolError::FrameTooLarge {
			size: HEADER_SIZE + len,
			max: MAX_FRAME_SIZE,
		}),
		_ => Ok(()),
	}
}

pub fn is_frame_complete(buffer: &[u8]) -> bool {
	match declared_length(buffer) {
		Some(len) => buffer.len() >= HEADER_SIZE + len,
		None => false,
	}
}

/// Decodes the frame at the front of `buffer`, returning it with the number
/// of bytes it occupied.
pub fn decode_one(buffer: &[u8]) -> Result<(Packet, usize), ProtocolError> {
	check_header(buffer)?;
	if !is_frame_complete(buffer) {
		return Err(ProtocolError::IncompleteFrame);
	}
	let len = declared_length(buffer).ok_or(ProtocolError::IncompleteFrame)?;

	let kind = PacketType::from_byte(buffer[0]);

	let raw_subtype = &buffer[1..LENGTH_OFFSET];
	let end = raw_subtype
		.iter()
		.rposition(|&b| b != 0)
		.map(|i| i + 1)
		.unwrap_or(0);
	let subtype = std::str::from_utf8(&raw_subtype[..end])
		.map_err(|_| ProtocolError::InvalidEncoding)?
		.to_string();

	let consumed = HEADER_SIZE + len;
	let payload = buffer[HEADER_SIZE..consumed].to_vec();
	let packet = Packet::new(kind, subtype, payload)?;
	Ok((packet, consumed))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn encode_layout() {
		let p = Packet::raw("PRINT", b"hi".to_vec()).unwrap();
		let bytes = p.encode();
		assert_eq!(bytes.len(), 15);
		assert_eq!(bytes[0], 1);
		assert_eq!(&bytes[1..9], b"PRINT\0\0\0");
		assert_eq!(&bytes[9..13], &[0, 0, 0, 2]);
		assert_eq!(&bytes[13..], b"hi");
	}

	#[test]
	fn roundtrip_raw_and_json() {
		let raw = Packet::raw("PRINT", b"Hello world!".to_vec()).unwrap();
		let (decoded, used) = decode_one(&raw.encode()).unwrap();
		assert_eq!(decoded, raw);
		assert_eq!(used, raw.frame_size());

		let js = Packet::json("PRINT_J", &json!({"message": "hey"})).unwrap();
		let (decoded, _) = decode_one(&js.encode()).unwrap();
		assert_eq!(decoded.kind(), PacketType::Json);
		assert_eq!(decoded.subtype(), "PRINT_J");
		assert_eq!(decoded.json_map().unwrap()["message"], "hey");
	}

	#[test]
	fn full_eight_byte_subtype() {
		let p = Packet::raw("ABCDEFGH", Vec::new()).unwrap();
		let (decoded, _) = decode_one(&p.encode()).unwrap();
		assert_eq!(decoded.subtype(), "ABCDEFGH");
	}

	#[test]
	fn subtype_overflow_is_rejected() {
		let err = Packet::raw("TOOLONGXY", Vec::new()).unwrap_err();
		assert!(matches!(err, ProtocolError::InvalidSubtype { len: 9, .. }));

		// three 3-byte characters: 3 chars but 9 bytes
		let err = Packet::raw("日本語", Vec::new()).unwrap_err();
		assert!(matches!(err, ProtocolError::InvalidSubtype { len: 9, .. }));
	}

	#[test]
	fn nul_in_subtype_is_rejected() {
		let err = Packet::raw("A\0", Vec::new()).unwrap_err();
		assert!(matches!(err, ProtocolError::InvalidSubtype { len: 2, .. }));
		assert!(Packet::raw("\0PING", Vec::new()).is_err());
	}

	#[test]
	fn completeness() {
		let bytes = Packet::raw("X", b"abc".to_vec()).unwrap().encode();
		assert!(!is_frame_complete(&bytes[..12]));
		assert!(!is_frame_complete(&bytes[..15]));
		assert!(is_frame_complete(&bytes));
		assert_eq!(decode_one(&bytes[..15]).unwrap_err(), ProtocolError::IncompleteFrame);
	}

	#[test]
	fn invalid_subtype_encoding() {
		let mut bytes = Packet::raw("AB", Vec::new()).unwrap().encode();
		bytes[1] = 0xff;
		assert_eq!(decode_one(&bytes).unwrap_err(), ProtocolError::InvalidEncoding);
	}

	#[test]
	fn malformed_json_payload() {
		let mut bytes = Packet::raw("PRINT_J", b"{nope".to_vec()).unwrap().encode();
		bytes[0] = 2;
		assert!(matches!(decode_one(&bytes), Err(ProtocolError::InvalidPayload(_))));

		let mut bytes = Packet::raw("PRINT_J", b"[1,2]".to_vec()).unwrap().encode();
		bytes[0] = 2;
		assert_eq!(decode_one(&bytes).unwrap_err(), ProtocolError::NotAnObject);
	}

	#[test]
	fn unknown_type_is_opaque() {
		let mut bytes = Packet::raw("FUTURE", b"{nope".to_vec()).unwrap().encode();
		bytes[0] = 7;
		let (p, _) = decode_one(&bytes).unwrap();
		assert_eq!(p.kind(), PacketType::Other(7));
		assert_eq!(p.payload(), b"{nope");
		assert!(p.json_map().is_none());
	}

	#[test]
	fn oversized_declared_length() {
		let mut header = vec![1u8];
		header.extend_from_slice(b"PRINT\0\0\0");
		header.extend_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_be_bytes());
		assert!(matches!(check_header(&header), Err(ProtocolError::FrameTooLarge { .. })));
		assert!(matches!(decode_one(&header), Err(ProtocolError::FrameTooLarge { .. })));

		let exact = (MAX_PAYLOAD_SIZE as u32).to_be_bytes();
		header[9..13].copy_from_slice(&exact);
		assert!(check_header(&header).is_ok());
	}

	#[test]
	fn payload_over_cap_fails_construction() {
		let err = Packet::raw("BIG", vec![0u8; MAX_PAYLOAD_SIZE + 1]).unwrap_err();
		assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
	}

	#[test]
	fn typed_json_decode() {
		#[derive(serde::Deserialize)]
		struct Msg {
			message: String,
		}
		let p = Packet::json("PRINT_J", &json!({"message": "typed"})).unwrap();
		let msg: Msg = p.decode_json().unwrap();
		assert_eq!(msg.message, "typed");
	}
}
