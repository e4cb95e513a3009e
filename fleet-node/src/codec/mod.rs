// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Message Codec (spec §4.1).
//!
//! Every custom message is `magic(4) || kind(2) || length(2) || payload`.
//! The dispatcher performs a peek & check: a buffer whose first four bytes
//! are not [`MAGIC`] is returned unhandled so the host can continue normal
//! processing. Once the magic matches, the message is ours; any malformed
//! framing past that point is a silent drop with a log entry, never an
//! error propagated to the host.

pub mod messages;

use log::trace;

/// `0x48495645` ("HIVE" in ASCII hex), per spec §4.1.
pub const MAGIC: [u8; 4] = [0x48, 0x49, 0x56, 0x45];

/// Maximum payload size, per spec §3's "total message payload" invariant.
pub const MAX_PAYLOAD_LEN: usize = 65_535;

const HEADER_LEN: usize = 4 + 2 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
	HandshakeReq = 32769,
	HandshakeResp = 32770,
	StateUpdate = 32771,
	StateReq = 32772,
	Heartbeat = 32773,
	IntentAnnounce = 32774,
	IntentCommit = 32775,
	IntentAbort = 32776,
	Vouch = 32777,
	BanPropose = 32778,
	BanVote = 32779,
	PeerWarning = 32780,
	PeerAvailable = 32781,
	ExpansionNominate = 32782,
	ExpansionElect = 32783,
	ExpansionAbort = 32784,
	FeeReport = 32785,
	SettlePropose = 32786,
	SettleVote = 32787,
	SettleExecute = 32788,
}

impl MessageKind {
	pub fn from_u16(v: u16) -> Option<Self> {
		use MessageKind::*;
		let kind = match v {
			32769 => HandshakeReq,
			32770 => HandshakeResp,
			32771 => StateUpdate,
			32772 => StateReq,
			32773 => Heartbeat,
			32774 => IntentAnnounce,
			32775 => IntentCommit,
			32776 => IntentAbort,
			32777 => Vouch,
			32778 => BanPropose,
			32779 => BanVote,
			32780 => PeerWarning,
			32781 => PeerAvailable,
			32782 => ExpansionNominate,
			32783 => ExpansionElect,
			32784 => ExpansionAbort,
			32785 => FeeReport,
			32786 => SettlePropose,
			32787 => SettleVote,
			32788 => SettleExecute,
			_ => return None,
		};
		Some(kind)
	}
}

/// A decoded, but not-yet-validated, envelope: the caller still owns
/// parsing `payload` into a kind-specific struct via [`messages`].
pub struct Envelope {
	pub kind: MessageKind,
	pub payload: Vec<u8>,
}

/// Outcome of attempting to interpret a raw host-delivered buffer.
pub enum PeekResult {
	/// Not ours: first four bytes don't match [`MAGIC`]. The host should
	/// continue normal processing.
	NotOurs,
	/// Ours, but malformed past the magic (bad length, unknown kind,
	/// oversized payload, truncated buffer). Caller should log and drop.
	Malformed(&'static str),
	/// Successfully framed.
	Ok(Envelope),
}

/// Peek & check, then attempt to decode. Never returns an `Err` that should
/// propagate past the dispatcher — malformed framing becomes
/// `PeekResult::Malformed`, which dispatcher call sites log and discard.
pub fn peek_and_decode(bytes: &[u8]) -> PeekResult {
	if bytes.len() < 4 || bytes[0..4] != MAGIC {
		return PeekResult::NotOurs;
	}
	if bytes.len() < HEADER_LEN {
		return PeekResult::Malformed("buffer shorter than header");
	}
	let kind_raw = u16::from_be_bytes([bytes[4], bytes[5]]);
	let len = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;

	let kind = match MessageKind::from_u16(kind_raw) {
		Some(k) => k,
		None => {
			trace!("codec: dropping message with unknown kind {}", kind_raw);
			return PeekResult::Malformed("unknown kind");
		},
	};

	if len > MAX_PAYLOAD_LEN {
		return PeekResult::Malformed("payload exceeds maximum length");
	}
	if bytes.len() != HEADER_LEN + len {
		return PeekResult::Malformed("length prefix does not match buffer size");
	}

	PeekResult::Ok(Envelope { kind, payload: bytes[HEADER_LEN..].to_vec() })
}

/// Frame `payload` under `kind` for transmission via the host.
///
/// # Panics
/// Panics if `payload.len()` exceeds [`MAX_PAYLOAD_LEN`]; callers are
/// expected to have already validated their own outbound payload size.
pub fn encode(kind: MessageKind, payload: &[u8]) -> Vec<u8> {
	assert!(payload.len() <= MAX_PAYLOAD_LEN, "outbound payload exceeds maximum length");
	let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
	out.extend_from_slice(&MAGIC);
	out.extend_from_slice(&(kind as u16).to_be_bytes());
	out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
	out.extend_from_slice(payload);
	out
}

/// `node_id` fields must be 66 lowercase hex characters (33-byte compressed pubkey).
pub fn is_valid_node_id(s: &str) -> bool {
	s.len() == 66 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
