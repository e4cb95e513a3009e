// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Membership (spec §4.3): the two-tier roster (Neophyte → Member),
//! vouch-based promotion, and ban propose/vote.
//!
//! A fresh peer is recorded as a Neophyte on first successful handshake.
//! Only Members may vouch or propose/vote bans; a subject is promoted once
//! distinct Member vouchers reach `ceil(0.51 * |Members|)`. Bans follow the
//! same quorum shape. Every inbound action is rate-limited per peer, with
//! counters persisted in the store so a restart cannot reset a peer's
//! budget.

use log::{info, warn};

use crate::codec::messages::{BanPropose, BanVote, Vouch};
use crate::config::{Config, RateLimitsConfig};
use crate::error::CoreError;
use crate::host::Host;
use crate::identity::IdentityVerifier;
use crate::store::models::{Member, Tier};
use crate::store::Store;

pub struct Membership<'a> {
	store: &'a Store,
	identity: &'a IdentityVerifier,
}

impl<'a> Membership<'a> {
	pub fn new(store: &'a Store, identity: &'a IdentityVerifier) -> Self {
		Self { store, identity }
	}

	/// Records `node_id` as a Neophyte if it isn't already known. Called on
	/// handshake completion.
	pub fn ensure_known(&self, node_id: &str, now: i64) -> Result<(), CoreError> {
		if self.store.get_member(node_id)?.is_some() {
			return Ok(());
		}
		self.store.upsert_member(&Member {
			node_id: node_id.to_string(),
			tier: Tier::Neophyte,
			first_seen: now,
			last_seen: now,
			vouch_count: 0,
			capacity_msat: 0,
			uptime_pct: 0,
			contribution_ratio: 0.0,
			metadata: Default::default(),
		})?;
		info!("membership: {} recorded as neophyte", node_id);
		Ok(())
	}

	pub fn tier_of(&self, node_id: &str) -> Result<Option<Tier>, CoreError> {
		Ok(self.store.get_member(node_id)?.map(|m| m.tier))
	}

	pub fn is_banned(&self, node_id: &str, now: i64) -> Result<bool, CoreError> {
		self.store.is_banned(node_id, now)
	}

	pub fn member_count(&self) -> Result<u32, CoreError> {
		Ok(self.store.list_members()?.iter().filter(|m| matches!(m.tier, Tier::Member)).count() as u32)
	}

	fn quorum_for(&self, pct: f64) -> Result<u32, CoreError> {
		let members = self.member_count()?.max(1);
		Ok(((members as f64) * pct / 100.0).ceil() as u32)
	}

	/// Fixed bucket boundary for a rate-limit window, so repeated calls in
	/// the same window land in the same counter row.
	fn window_start(now: i64, window_secs: i64) -> i64 {
		(now / window_secs) * window_secs
	}

	fn check_rate_limit(
		&self, peer: &str, kind: &'static str, limit: u32, window_secs: i64, now: i64,
	) -> Result<(), CoreError> {
		if limit == 0 {
			return Ok(());
		}
		let bucket = Self::window_start(now, window_secs);
		let count = self.store.bump_rate_counter(peer, kind, bucket)?;
		if count > limit {
			warn!("membership: {} exceeded rate limit for {}", peer, kind);
			return Err(CoreError::RateLimited(kind));
		}
		Ok(())
	}

	pub async fn handle_vouch(
		&self, vouch: &Vouch, transport_peer_id: &str, config: &Config, host: &dyn Host, now: i64,
	) -> Result<(), CoreError> {
		self.identity.verify_signed(&vouch.from, &vouch.sig, transport_peer_id, vouch, host).await?;
		self.reject_if_banned(&vouch.from, now)?;
		self.check_rate_limit(
			&vouch.from,
			"vouches_per_day",
			config.rate_limits.vouches_per_day,
			86_400,
			now,
		)?;

		if vouch.from == vouch.subject {
			warn!("membership: {} attempted to vouch for itself", vouch.from);
			return Err(CoreError::MalformedMessage("self-vouch is not permitted".to_string()));
		}
		match self.tier_of(&vouch.from)? {
			Some(Tier::Member) => {},
			_ => {
				warn!("membership: neophyte {} attempted to vouch", vouch.from);
				return Err(CoreError::MalformedMessage(
					"only members may vouch for a subject".to_string(),
				));
			},
		}

		self.ensure_known(&vouch.subject, now)?;
		let count = self.store.add_vouch(&vouch.subject, &vouch.from, now)?;

		let mut subject = self.store.get_member(&vouch.subject)?.ok_or(CoreError::NotFound(
			format!("member {} disappeared mid-vouch", vouch.subject),
		))?;
		subject.vouch_count = count;

		if matches!(subject.tier, Tier::Neophyte) {
			let quorum = self.quorum_for(config.vouch_quorum_pct)?;
			if count >= quorum {
				subject.tier = Tier::Member;
				info!(
					"membership: {} promoted to member ({} vouches >= quorum {})",
					vouch.subject, count, quorum
				);
			}
		}
		self.store.upsert_member(&subject)?;
		Ok(())
	}

	pub async fn handle_ban_propose(
		&self, propose: &BanPropose, transport_peer_id: &str, config: &Config, host: &dyn Host,
		now: i64,
	) -> Result<(), CoreError> {
		self.identity.verify_signed(&propose.from, &propose.sig, transport_peer_id, propose, host).await?;
		self.reject_if_banned(&propose.from, now)?;
		self.check_rate_limit(
			&propose.from,
			"ban_proposals_per_day",
			config.rate_limits.ban_proposals_per_day,
			86_400,
			now,
		)?;
		match self.tier_of(&propose.from)? {
			Some(Tier::Member) => {},
			_ => return Err(CoreError::MalformedMessage("only members may propose a ban".to_string())),
		}

		// A one-week expiry from proposal time, generous enough for quorum
		// voting to complete without requiring re-proposal.
		self.store.propose_ban(&propose.target, &propose.from, now, now + 7 * 86_400)?;
		info!("membership: {} proposed a ban against {}", propose.from, propose.target);
		Ok(())
	}

	pub async fn handle_ban_vote(
		&self, vote: &BanVote, transport_peer_id: &str, config: &Config, host: &dyn Host, now: i64,
	) -> Result<(), CoreError> {
		self.identity.verify_signed(&vote.from, &vote.sig, transport_peer_id, vote, host).await?;
		self.reject_if_banned(&vote.from, now)?;
		match self.tier_of(&vote.from)? {
			Some(Tier::Member) => {},
			_ => return Err(CoreError::MalformedMessage("only members may vote on a ban".to_string())),
		}
		if self.store.get_ban(&vote.target)?.is_none() {
			return Err(CoreError::NotFound(format!("no ban proposed for {}", vote.target)));
		}

		if !vote.approve {
			// A "no" vote is simply not counted toward quorum; nothing to persist.
			return Ok(());
		}
		let approvals = self.store.add_ban_vote(&vote.target, &vote.from, true)?;
		let quorum = self.quorum_for(51.0)?;
		if approvals >= quorum {
			self.identity.forget(&vote.target);
			self.store.remove_member(&vote.target)?;
			self.store.remove_ban(&vote.target)?;
			info!(
				"membership: {} banned ({} approvals >= quorum {})",
				vote.target, approvals, quorum
			);
		}
		let _ = config;
		Ok(())
	}

	fn reject_if_banned(&self, node_id: &str, now: i64) -> Result<(), CoreError> {
		if self.store.is_banned(node_id, now)? {
			return Err(CoreError::BannedPeer);
		}
		Ok(())
	}

	pub fn check_handshake_rate(
		&self, peer: &str, limits: &RateLimitsConfig, now: i64,
	) -> Result<(), CoreError> {
		self.check_rate_limit(peer, "handshakes_per_minute", limits.handshakes_per_minute, 60, now)
	}

	pub fn check_peer_available_rate(
		&self, peer: &str, limits: &RateLimitsConfig, now: i64,
	) -> Result<(), CoreError> {
		self.check_rate_limit(
			peer,
			"peer_available_per_minute",
			limits.peer_available_per_minute,
			60,
			now,
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::GovernanceMode;
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

	fn vouch(from: u8, subject: u8) -> Vouch {
		Vouch { v: 1, from: node_id(from), ts: 1, subject: node_id(subject), sig: "sig".to_string() }
	}

	#[tokio::test]
	async fn test_promotion_requires_quorum_of_members() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let membership = Membership::new(&store, &identity);
		let host = NoopHost;
		let config = test_config();

		// Seed three existing Members as vouchers.
		for tag in [1u8, 2, 3] {
			store
				.upsert_member(&Member {
					node_id: node_id(tag),
					tier: Tier::Member,
					first_seen: 0,
					last_seen: 0,
					vouch_count: 0,
					capacity_msat: 0,
					uptime_pct: 100,
					contribution_ratio: 0.0,
					metadata: Default::default(),
				})
				.unwrap();
		}
		// quorum = ceil(0.51 * 3) = 2
		membership.handle_vouch(&vouch(1, 9), node_id(1).as_str(), &config, &host, 10).await.unwrap();
		assert_eq!(membership.tier_of(&node_id(9)).unwrap(), Some(Tier::Neophyte));

		membership.handle_vouch(&vouch(2, 9), node_id(2).as_str(), &config, &host, 11).await.unwrap();
		assert_eq!(membership.tier_of(&node_id(9)).unwrap(), Some(Tier::Member));
	}

	#[tokio::test]
	async fn test_self_vouch_rejected() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let membership = Membership::new(&store, &identity);
		let host = NoopHost;
		let config = test_config();
		store
			.upsert_member(&Member {
				node_id: node_id(1),
				tier: Tier::Member,
				first_seen: 0,
				last_seen: 0,
				vouch_count: 0,
				capacity_msat: 0,
				uptime_pct: 100,
				contribution_ratio: 0.0,
				metadata: Default::default(),
			})
			.unwrap();
		let err = membership
			.handle_vouch(&vouch(1, 1), node_id(1).as_str(), &config, &host, 10)
			.await
			.unwrap_err();
		assert!(matches!(err, CoreError::MalformedMessage(_)));
	}

	#[tokio::test]
	async fn test_neophyte_vouch_rejected() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let membership = Membership::new(&store, &identity);
		let host = NoopHost;
		let config = test_config();
		membership.ensure_known(&node_id(1), 0).unwrap();
		let err = membership
			.handle_vouch(&vouch(1, 9), node_id(1).as_str(), &config, &host, 10)
			.await
			.unwrap_err();
		assert!(matches!(err, CoreError::MalformedMessage(_)));
	}

	#[tokio::test]
	async fn test_ban_quorum_removes_member() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let membership = Membership::new(&store, &identity);
		let host = NoopHost;
		let config = test_config();

		for tag in [1u8, 2, 3, 9] {
			store
				.upsert_member(&Member {
					node_id: node_id(tag),
					tier: Tier::Member,
					first_seen: 0,
					last_seen: 0,
					vouch_count: 0,
					capacity_msat: 0,
					uptime_pct: 100,
					contribution_ratio: 0.0,
					metadata: Default::default(),
				})
				.unwrap();
		}

		let propose = BanPropose {
			v: 1,
			from: node_id(1),
			ts: 1,
			target: node_id(9),
			reason: "misbehavior".to_string(),
			sig: "sig".to_string(),
		};
		membership.handle_ban_propose(&propose, node_id(1).as_str(), &config, &host, 10).await.unwrap();

		let vote1 =
			BanVote { v: 1, from: node_id(1), ts: 1, target: node_id(9), approve: true, sig: "sig".into() };
		let vote2 =
			BanVote { v: 1, from: node_id(2), ts: 1, target: node_id(9), approve: true, sig: "sig".into() };
		membership.handle_ban_vote(&vote1, node_id(1).as_str(), &config, &host, 11).await.unwrap();
		assert!(membership.tier_of(&node_id(9)).unwrap().is_some());
		membership.handle_ban_vote(&vote2, node_id(2).as_str(), &config, &host, 12).await.unwrap();
		assert_eq!(membership.tier_of(&node_id(9)).unwrap(), None);
	}
}
