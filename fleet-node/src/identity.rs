// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Identity & Handshake (spec §4.2).
//!
//! A peer is trusted only after a two-message `HANDSHAKE_REQ`/`HANDSHAKE_RESP`
//! exchange completes within a 30 second window, and only if the identity it
//! claims in the message body matches the pubkey the host's transport layer
//! reports the message actually came from. Every subsequently received
//! trust-bearing message is re-verified the same way: a completed handshake
//! establishes that a peer exists, it does not exempt later messages from
//! signature or identity-binding checks.

use std::collections::HashMap;
use std::sync::Mutex;

use hex::prelude::*;
use log::{trace, warn};
use rand::RngCore;
use serde::Serialize;

use crate::codec::messages::{HandshakeReq, HandshakeResp, SCHEMA_VERSION};
use crate::codec::is_valid_node_id;
use crate::error::CoreError;
use crate::host::Host;
use crate::signing::signable_text;

const HANDSHAKE_WINDOW_SECS: i64 = 30;

struct PendingHandshake {
	nonce: String,
	started_at: i64,
}

/// Tracks in-flight handshakes and completed-peer verification state.
/// Deliberately not persisted: a restart requires every peer to
/// re-handshake, which is cheap and avoids trusting stale transport state.
pub struct IdentityVerifier {
	pending: Mutex<HashMap<String, PendingHandshake>>,
	verified: Mutex<HashMap<String, i64>>,
}

impl IdentityVerifier {
	pub fn new() -> Self {
		Self { pending: Mutex::new(HashMap::new()), verified: Mutex::new(HashMap::new()) }
	}

	/// Build a signed `HANDSHAKE_REQ` addressed to `peer_id` and remember the
	/// nonce so the eventual response can be matched against it.
	pub async fn begin_handshake(
		&self, peer_id: &str, host: &dyn Host, now: i64,
	) -> Result<HandshakeReq, CoreError> {
		let nonce = random_nonce();
		let node_info = host.node_info().await;
		let mut req = HandshakeReq {
			v: SCHEMA_VERSION,
			from: node_info.node_id,
			ts: now,
			claimed_pubkey: node_info.node_id.clone(),
			nonce: nonce.clone(),
			sig: String::new(),
		};
		req.sig = sign(&req, host).await?;

		self.pending
			.lock()
			.expect("identity pending lock poisoned")
			.insert(peer_id.to_string(), PendingHandshake { nonce, started_at: now });
		Ok(req)
	}

	/// Validate an inbound `HANDSHAKE_REQ` from `transport_peer_id` and, if
	/// valid, build the signed response.
	pub async fn handle_handshake_req(
		&self, req: &HandshakeReq, transport_peer_id: &str, host: &dyn Host, now: i64,
	) -> Result<HandshakeResp, CoreError> {
		verify_binding_and_signature(&req.from, &req.claimed_pubkey, transport_peer_id, req, host)
			.await?;

		let node_info = host.node_info().await;
		let mut resp = HandshakeResp {
			v: SCHEMA_VERSION,
			from: node_info.node_id,
			ts: now,
			claimed_pubkey: node_info.node_id.clone(),
			nonce: req.nonce.clone(),
			sig: String::new(),
		};
		resp.sig = sign(&resp, host).await?;

		self.mark_verified(transport_peer_id, now);
		Ok(resp)
	}

	/// Complete a handshake this node initiated, by validating the peer's
	/// `HANDSHAKE_RESP` against the nonce and the 30s window.
	pub async fn handle_handshake_resp(
		&self, resp: &HandshakeResp, transport_peer_id: &str, host: &dyn Host, now: i64,
	) -> Result<(), CoreError> {
		let pending = {
			let mut guard = self.pending.lock().expect("identity pending lock poisoned");
			guard.remove(transport_peer_id)
		};
		let pending = pending.ok_or(CoreError::UnauthenticatedPeer)?;

		if now - pending.started_at > HANDSHAKE_WINDOW_SECS {
			warn!("identity: handshake with {} timed out", transport_peer_id);
			return Err(CoreError::Timeout);
		}
		if resp.nonce != pending.nonce {
			warn!("identity: handshake nonce mismatch from {}", transport_peer_id);
			return Err(CoreError::MalformedMessage("handshake nonce mismatch".to_string()));
		}

		verify_binding_and_signature(&resp.from, &resp.claimed_pubkey, transport_peer_id, resp, host)
			.await?;

		self.mark_verified(transport_peer_id, now);
		Ok(())
	}

	fn mark_verified(&self, peer_id: &str, now: i64) {
		self.verified.lock().expect("identity verified lock poisoned").insert(peer_id.to_string(), now);
		trace!("identity: {} is now verified", peer_id);
	}

	pub fn is_verified(&self, peer_id: &str) -> bool {
		self.verified.lock().expect("identity verified lock poisoned").contains_key(peer_id)
	}

	pub fn forget(&self, peer_id: &str) {
		self.verified.lock().expect("identity verified lock poisoned").remove(peer_id);
	}

	/// Re-verification entry point used by every other component before
	/// acting on a signed message: checks that `claimed_from` matches the
	/// transport-level sender and that `sig` validates under it. A
	/// completed handshake does not exempt later messages from this check.
	pub async fn verify_signed<T: Serialize>(
		&self, claimed_from: &str, sig: &str, transport_peer_id: &str, msg: &T, host: &dyn Host,
	) -> Result<(), CoreError> {
		if claimed_from != transport_peer_id {
			warn!(
				"identity: claimed sender {} does not match transport sender {}",
				claimed_from, transport_peer_id
			);
			return Err(CoreError::IdentityMismatch);
		}
		if !is_valid_node_id(claimed_from) {
			return Err(CoreError::MalformedMessage("from is not a valid node id".to_string()));
		}
		let text = signable_text(msg).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
		if !host.verify_message(&text, sig, claimed_from).await {
			return Err(CoreError::MalformedMessage("signature verification failed".to_string()));
		}
		Ok(())
	}
}

impl Default for IdentityVerifier {
	fn default() -> Self {
		Self::new()
	}
}

async fn verify_binding_and_signature<T: Serialize>(
	from: &str, claimed_pubkey: &str, transport_peer_id: &str, msg: &T, host: &dyn Host,
) -> Result<(), CoreError> {
	if from != claimed_pubkey || from != transport_peer_id {
		warn!(
			"identity: handshake identity binding failed (from={}, claimed={}, transport={})",
			from, claimed_pubkey, transport_peer_id
		);
		return Err(CoreError::IdentityMismatch);
	}
	if !is_valid_node_id(from) {
		return Err(CoreError::MalformedMessage("from is not a valid node id".to_string()));
	}
	let text = signable_text(msg).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
	let sig = extract_sig(msg)?;
	if !host.verify_message(&text, &sig, from).await {
		return Err(CoreError::MalformedMessage("handshake signature verification failed".to_string()));
	}
	Ok(())
}

fn extract_sig<T: Serialize>(msg: &T) -> Result<String, CoreError> {
	let value = serde_json::to_value(msg).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
	value
		.get("sig")
		.and_then(|v| v.as_str())
		.map(|s| s.to_string())
		.ok_or_else(|| CoreError::MalformedMessage("message carries no sig field".to_string()))
}

async fn sign<T: Serialize>(msg: &T, host: &dyn Host) -> Result<String, CoreError> {
	let text = signable_text(msg).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
	host.sign_message(&text).await.map_err(CoreError::MalformedMessage)
}

fn random_nonce() -> String {
	let mut bytes = [0u8; 16];
	rand::thread_rng().fill_bytes(&mut bytes);
	bytes.to_lower_hex_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::{NodeInfo, PeerInfo};
	use async_trait::async_trait;

	struct StubHost {
		node_id: String,
	}

	#[async_trait]
	impl Host for StubHost {
		async fn send_custom_message(&self, _peer_id: &str, _bytes: Vec<u8>) -> Result<(), String> {
			Ok(())
		}
		async fn sign_message(&self, text: &str) -> Result<String, String> {
			Ok(format!("sig-of-{}-by-{}", text.len(), self.node_id))
		}
		async fn verify_message(&self, text: &str, signature: &str, claimed_pubkey: &str) -> bool {
			signature == format!("sig-of-{}-by-{}", text.len(), claimed_pubkey)
		}
		async fn list_peers(&self) -> Vec<PeerInfo> {
			Vec::new()
		}
		async fn open_channel(&self, _peer_id: &str, _amount_msat: u64) -> Result<(), String> {
			Ok(())
		}
		async fn pay_offer(&self, _offer: &str, _amount_msat: u64) -> Result<(), String> {
			Ok(())
		}
		async fn node_info(&self) -> NodeInfo {
			NodeInfo { node_id: self.node_id.clone(), capacity_msat: 0 }
		}
		async fn forwards_since(&self, _since_unix_secs: i64) -> (u64, u64) {
			(0, 0)
		}
	}

	fn node_id(tag: u8) -> String {
		format!("{:02x}", tag).repeat(33)
	}

	#[tokio::test]
	async fn test_full_handshake_round_trip() {
		let initiator = StubHost { node_id: node_id(0xaa) };
		let responder = StubHost { node_id: node_id(0xbb) };

		let initiator_verifier = IdentityVerifier::new();
		let responder_verifier = IdentityVerifier::new();

		let req = initiator_verifier.begin_handshake(&responder.node_id, &initiator, 1000).await.unwrap();
		let resp = responder_verifier
			.handle_handshake_req(&req, &initiator.node_id, &responder, 1000)
			.await
			.unwrap();
		initiator_verifier.handle_handshake_resp(&resp, &responder.node_id, &initiator, 1001).await.unwrap();

		assert!(initiator_verifier.is_verified(&responder.node_id));
		assert!(responder_verifier.is_verified(&initiator.node_id));
	}

	#[tokio::test]
	async fn test_identity_mismatch_rejected() {
		let initiator = StubHost { node_id: node_id(0xaa) };
		let responder = StubHost { node_id: node_id(0xbb) };
		let initiator_verifier = IdentityVerifier::new();
		let responder_verifier = IdentityVerifier::new();

		let req = initiator_verifier.begin_handshake(&responder.node_id, &initiator, 1000).await.unwrap();
		// Transport reports a different sender than the message claims.
		let err = responder_verifier
			.handle_handshake_req(&req, &node_id(0xcc), &responder, 1000)
			.await
			.unwrap_err();
		assert!(matches!(err, CoreError::IdentityMismatch));
	}

	#[tokio::test]
	async fn test_handshake_expires_after_window() {
		let initiator = StubHost { node_id: node_id(0xaa) };
		let responder = StubHost { node_id: node_id(0xbb) };
		let initiator_verifier = IdentityVerifier::new();
		let responder_verifier = IdentityVerifier::new();

		let req = initiator_verifier.begin_handshake(&responder.node_id, &initiator, 1000).await.unwrap();
		let resp = responder_verifier
			.handle_handshake_req(&req, &initiator.node_id, &responder, 1000)
			.await
			.unwrap();
		let err = initiator_verifier
			.handle_handshake_resp(&resp, &responder.node_id, &initiator, 1000 + HANDSHAKE_WINDOW_SECS + 1)
			.await
			.unwrap_err();
		assert!(matches!(err, CoreError::Timeout));
	}
}
