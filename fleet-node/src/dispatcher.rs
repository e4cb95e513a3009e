// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Inbound message routing.
//!
//! [`Dispatcher::handle_inbound`] is the single entry point for bytes the
//! host hands the core. It peeks the frame, and on anything other than a
//! clean decode for a recognized kind, logs and drops — protocol-level
//! errors never propagate back to the host as an `Err`. Messages from
//! banned peers are dropped before they reach a component.

use log::{debug, trace, warn};

use crate::codec::{self, messages, MessageKind, PeekResult};
use crate::config::Config;
use crate::error::CoreError;
use crate::expansion::Expansion;
use crate::gossip::Gossip;
use crate::host::Host;
use crate::identity::IdentityVerifier;
use crate::intent::IntentLock;
use crate::membership::Membership;
use crate::settlement::Settlement;
use crate::store::Store;

pub struct Dispatcher<'a> {
	pub store: &'a Store,
	pub identity: &'a IdentityVerifier,
	pub host: &'a dyn Host,
}

impl<'a> Dispatcher<'a> {
	pub fn new(store: &'a Store, identity: &'a IdentityVerifier, host: &'a dyn Host) -> Self {
		Self { store, identity, host }
	}

	/// Handle one inbound buffer from `peer_id`. Never returns an error to
	/// the caller; every failure is logged and the message is discarded.
	pub async fn handle_inbound(&self, peer_id: &str, bytes: &[u8], config: &Config, now: i64) {
		match codec::peek_and_decode(bytes) {
			PeekResult::NotOurs => {
				trace!("dispatcher: buffer from {} is not ours, leaving to host", peer_id);
			},
			PeekResult::Malformed(reason) => {
				warn!("dispatcher: dropping malformed buffer from {}: {}", peer_id, reason);
			},
			PeekResult::Ok(envelope) => {
				let membership = Membership::new(self.store, self.identity);
				match membership.is_banned(peer_id, now) {
					Ok(true) => {
						debug!("dispatcher: dropping message from banned peer {}", peer_id);
						return;
					},
					Ok(false) => {},
					Err(e) => {
						warn!("dispatcher: ban lookup failed for {}: {}", peer_id, e);
						return;
					},
				}

				if let Err(e) = self.route(peer_id, envelope.kind, &envelope.payload, config, now).await {
					warn!("dispatcher: dropping {:?} from {}: {}", envelope.kind, peer_id, e);
				}
			},
		}
	}

	async fn route(
		&self, peer_id: &str, kind: MessageKind, payload: &[u8], config: &Config, now: i64,
	) -> Result<(), CoreError> {
		let membership = Membership::new(self.store, self.identity);
		let gossip = Gossip::new(self.store, self.identity);
		let intent = IntentLock::new(self.store, self.identity);
		let expansion = Expansion::new(self.store, self.identity);
		let settlement = Settlement::new(self.store, self.identity);

		macro_rules! parse {
			($t:ty) => {
				serde_json::from_slice::<$t>(payload)
					.map_err(|e| CoreError::MalformedMessage(e.to_string()))?
			};
		}

		match kind {
			MessageKind::HandshakeReq => {
				let req: messages::HandshakeReq = parse!(messages::HandshakeReq);
				membership.check_handshake_rate(peer_id, &config.rate_limits, now)?;
				let resp = self.identity.handle_handshake_req(&req, peer_id, self.host, now).await?;
				membership.ensure_known(peer_id, now)?;
				let bytes = codec::encode(
					MessageKind::HandshakeResp,
					&serde_json::to_vec(&resp).map_err(|e| CoreError::MalformedMessage(e.to_string()))?,
				);
				self.host.send_custom_message(peer_id, bytes).await.map_err(CoreError::MalformedMessage)?;
				Ok(())
			},
			MessageKind::HandshakeResp => {
				let resp: messages::HandshakeResp = parse!(messages::HandshakeResp);
				self.identity.handle_handshake_resp(&resp, peer_id, self.host, now).await?;
				membership.ensure_known(peer_id, now)
			},
			MessageKind::StateUpdate => {
				let update: messages::StateUpdate = parse!(messages::StateUpdate);
				gossip.handle_state_update(&update, peer_id, self.host).await.map(|_| ())
			},
			MessageKind::StateReq => {
				// Anti-entropy: this node can only vouch for the signed
				// freshness of its own record, so it replies with that one
				// record rather than relaying other peers' state without a
				// signature to back it.
				let _req: messages::StateReq = parse!(messages::StateReq);
				if let Some(own) = self.store.get_state_record(&config.node_id)? {
					let update = Gossip::build_state_update(&config.node_id, &own, now);
					let bytes = codec::encode(
						MessageKind::StateUpdate,
						&serde_json::to_vec(&update).map_err(|e| CoreError::MalformedMessage(e.to_string()))?,
					);
					self.host.send_custom_message(peer_id, bytes).await.map_err(CoreError::MalformedMessage)?;
				}
				Ok(())
			},
			MessageKind::Heartbeat => {
				let _hb: messages::Heartbeat = parse!(messages::Heartbeat);
				// Heartbeat carries no signature -- only an already-verified
				// peer (one that completed a handshake) can touch the
				// roster through it. An unauthenticated sender is dropped.
				if !self.identity.is_verified(peer_id) {
					return Err(CoreError::UnauthenticatedPeer);
				}
				membership.ensure_known(peer_id, now)
			},
			MessageKind::IntentAnnounce => {
				let announce: messages::IntentAnnounce = parse!(messages::IntentAnnounce);
				intent.handle_announce(&announce, peer_id, config.intent_cache_max, self.host).await
			},
			MessageKind::IntentCommit => {
				let commit: messages::IntentCommit = parse!(messages::IntentCommit);
				intent.handle_commit(&commit, peer_id, self.host).await
			},
			MessageKind::IntentAbort => {
				let abort: messages::IntentAbort = parse!(messages::IntentAbort);
				intent.handle_abort(&abort, peer_id, self.host).await
			},
			MessageKind::Vouch => {
				let vouch: messages::Vouch = parse!(messages::Vouch);
				membership.handle_vouch(&vouch, peer_id, config, self.host, now).await
			},
			MessageKind::BanPropose => {
				let propose: messages::BanPropose = parse!(messages::BanPropose);
				membership.handle_ban_propose(&propose, peer_id, config, self.host, now).await
			},
			MessageKind::BanVote => {
				let vote: messages::BanVote = parse!(messages::BanVote);
				membership.handle_ban_vote(&vote, peer_id, config, self.host, now).await
			},
			MessageKind::PeerWarning => {
				let warning: messages::PeerWarning = parse!(messages::PeerWarning);
				debug!("dispatcher: {} warned about {}: {}", peer_id, warning.target, warning.reason);
				Ok(())
			},
			MessageKind::PeerAvailable => {
				let available: messages::PeerAvailable = parse!(messages::PeerAvailable);
				membership.check_peer_available_rate(peer_id, &config.rate_limits, now)?;
				debug!("dispatcher: {} reports {} as available", peer_id, available.target);
				Ok(())
			},
			MessageKind::ExpansionNominate => {
				let nominate: messages::ExpansionNominate = parse!(messages::ExpansionNominate);
				expansion.handle_nominate(&nominate, peer_id, self.host).await
			},
			MessageKind::ExpansionElect => {
				let elect: messages::ExpansionElect = parse!(messages::ExpansionElect);
				expansion.handle_elect(&elect, peer_id, self.host).await
			},
			MessageKind::ExpansionAbort => {
				let abort: messages::ExpansionAbort = parse!(messages::ExpansionAbort);
				expansion.handle_abort(&abort, peer_id, self.host).await
			},
			MessageKind::FeeReport => {
				let report: messages::FeeReport = parse!(messages::FeeReport);
				settlement.handle_fee_report(&report, peer_id, self.host).await.map(|_| ())
			},
			MessageKind::SettlePropose => {
				let propose: messages::SettlePropose = parse!(messages::SettlePropose);
				settlement.handle_propose(&propose, peer_id, self.host).await
			},
			MessageKind::SettleVote => {
				let vote: messages::SettleVote = parse!(messages::SettleVote);
				let member_count = membership.member_count()?;
				settlement.handle_vote(&vote, peer_id, member_count, self.host).await
			},
			MessageKind::SettleExecute => {
				let execute: messages::SettleExecute = parse!(messages::SettleExecute);
				settlement.handle_execute(&execute, peer_id, self.host).await
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{GovernanceMode, RateLimitsConfig};
	use crate::host::{NodeInfo, PeerInfo};
	use async_trait::async_trait;
	use std::path::Path;

	struct NoopHost;

	#[async_trait]
	impl Host for NoopHost {
		async fn send_custom_message(&self, _peer_id: &str, _bytes: Vec<u8>) -> Result<(), String> {
			Ok(())
		}
		async fn sign_message(&self, _text: &str) -> Result<String, String> {
			Ok("sig".to_string())
		}
		async fn verify_message(&self, _text: &str, _signature: &str, _claimed_pubkey: &str) -> bool {
			true
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
			NodeInfo { node_id: node_id(0), capacity_msat: 0 }
		}
		async fn forwards_since(&self, _since_unix_secs: i64) -> (u64, u64) {
			(0, 0)
		}
	}

	fn node_id(tag: u8) -> String {
		format!("{:02x}", tag).repeat(33)
	}

	fn test_config() -> Config {
		Config {
			node_id: node_id(0),
			rest_service_addr: "127.0.0.1:9700".parse().unwrap(),
			db_path: "/tmp/unused".into(),
			governance_mode: GovernanceMode::Advisor,
			gossip_threshold_pct: 10.0,
			heartbeat_interval_s: 300,
			antientropy_interval_s: 900,
			intent_wait_s: 10,
			intent_cache_max: 200,
			max_active_rounds: 5,
			expansion_cooldown_s: 300,
			vouch_quorum_pct: 51.0,
			settlement_weights: Default::default(),
			daily_budget_sat: 0,
			reserve_pct: 0.0,
			per_channel_cap_sat: u64::MAX,
			rate_limits: RateLimitsConfig::default(),
			log_level: log::LevelFilter::Info,
		}
	}

	#[tokio::test]
	async fn test_unrecognized_magic_is_ignored_without_panicking() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let host = NoopHost;
		let dispatcher = Dispatcher::new(&store, &identity, &host);
		let config = test_config();

		dispatcher.handle_inbound(&node_id(1), b"not our protocol", &config, 10).await;
		// No panic, no member recorded -- this buffer was never ours.
		assert!(store.get_member(&node_id(1)).unwrap().is_none());
	}

	#[tokio::test]
	async fn test_heartbeat_records_peer_as_neophyte() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let host = NoopHost;
		let dispatcher = Dispatcher::new(&store, &identity, &host);
		let config = test_config();

		let hb = messages::Heartbeat { v: 1, from: node_id(1), ts: 10 };
		let payload = serde_json::to_vec(&hb).unwrap();
		let framed = codec::encode(MessageKind::Heartbeat, &payload);

		dispatcher.handle_inbound(&node_id(1), &framed, &config, 10).await;
		assert!(store.get_member(&node_id(1)).unwrap().is_some());
	}

	#[tokio::test]
	async fn test_malformed_payload_after_magic_is_dropped_not_errored() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let host = NoopHost;
		let dispatcher = Dispatcher::new(&store, &identity, &host);
		let config = test_config();

		let framed = codec::encode(MessageKind::Heartbeat, b"not valid json");
		// Must not panic; the bad payload is simply logged and dropped.
		dispatcher.handle_inbound(&node_id(1), &framed, &config, 10).await;
	}
}
