// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Cooperative Expansion (spec §4.7): a two-phase Nominate/Elect round
//! deciding which member should open a channel toward a prospective
//! `target`. Nominations carry a composite score; the winner is the highest
//! score, ties broken by lowest `node_id`. A per-target cooldown prevents
//! immediately re-running a round against the same target, and at most
//! `MAX_ACTIVE_ROUNDS` rounds may be open at once.

use std::collections::BTreeMap;

use log::{info, warn};

use crate::codec::messages::{ExpansionAbort, ExpansionElect, ExpansionNominate};
use crate::error::CoreError;
use crate::host::Host;
use crate::identity::IdentityVerifier;
use crate::store::models::{ExpansionRound, ExpansionState, Nomination};
use crate::store::Store;

/// Default nominating-phase length, per spec §4.7.
const NOMINATING_WINDOW_SECS: i64 = 45;

pub struct Expansion<'a> {
	store: &'a Store,
	identity: &'a IdentityVerifier,
}

impl<'a> Expansion<'a> {
	pub fn new(store: &'a Store, identity: &'a IdentityVerifier) -> Self {
		Self { store, identity }
	}

	/// Open a new round for `target` if the cooldown has elapsed and the
	/// active-round budget allows it. `round_id` is built to embed `target`
	/// and sort lexicographically by creation time, so two rounds opened
	/// independently for the same target converge deterministically in
	/// [`Self::handle_nominate`] instead of diverging forever.
	pub fn open_round(
		&self, target: &str, max_active_rounds: usize, cooldown_s: i64, now: i64,
	) -> Result<ExpansionRound, CoreError> {
		let active = self.store.active_expansion_rounds()?;
		if active.len() >= max_active_rounds {
			return Err(CoreError::BudgetExceeded);
		}
		if let Some(recent) = active.iter().find(|r| r.target == target) {
			warn!("expansion: round already active for target {}", recent.target);
			return Err(CoreError::IntentConflict);
		}
		if let Some(last_deadline) = self.store.last_closed_expansion_deadline(target)? {
			if now < last_deadline + cooldown_s {
				warn!(
					"expansion: target {} still in cooldown for {} more seconds",
					target,
					last_deadline + cooldown_s - now
				);
				return Err(CoreError::IntentConflict);
			}
		}

		let round = ExpansionRound {
			round_id: format!("{}-{:020}", target, now),
			target: target.to_string(),
			state: ExpansionState::Nominating,
			nominations: BTreeMap::new(),
			winner: None,
			deadline: now + NOMINATING_WINDOW_SECS,
		};
		self.store.put_expansion_round(&round)?;
		info!("expansion: opened round {} for target {}", round.round_id, target);
		Ok(round)
	}

	/// Record a nomination, merging across independently-opened rounds for
	/// the same target per spec §4.7: if the incoming `round_id` doesn't
	/// match any local round but an active round already exists for the
	/// same `target`, the lexicographically lower `round_id` becomes (or
	/// remains) canonical and inherits the other's nominations.
	pub async fn handle_nominate(
		&self, nominate: &ExpansionNominate, transport_peer_id: &str, host: &dyn Host,
	) -> Result<(), CoreError> {
		self
			.identity
			.verify_signed(&nominate.from, &nominate.sig, transport_peer_id, nominate, host)
			.await?;

		let mut round = match self.store.get_expansion_round(&nominate.round_id)? {
			Some(round) => round,
			None => self.merge_or_adopt_round(nominate)?,
		};
		if round.state != ExpansionState::Nominating {
			return Err(CoreError::IntentConflict);
		}
		round.nominations.insert(
			nominate.from.clone(),
			Nomination { nominator: nominate.from.clone(), score: nominate.score.composite() },
		);
		self.store.put_expansion_round(&round)?;
		Ok(())
	}

	fn merge_or_adopt_round(&self, nominate: &ExpansionNominate) -> Result<ExpansionRound, CoreError> {
		let existing = self
			.store
			.active_expansion_rounds()?
			.into_iter()
			.find(|r| r.target == nominate.target);

		match existing {
			Some(existing) if existing.round_id < nominate.round_id => {
				// Our local round already has the lower id; it stays canonical
				// and simply accepts this nomination below.
				Ok(existing)
			},
			Some(mut existing) => {
				// The incoming round_id is lower: it becomes canonical,
				// inheriting our nominations, and our local round is retired.
				info!(
					"expansion: merging round {} into lower-id round {} for target {}",
					existing.round_id, nominate.round_id, nominate.target
				);
				let migrated = ExpansionRound {
					round_id: nominate.round_id.clone(),
					target: nominate.target.clone(),
					state: ExpansionState::Nominating,
					nominations: std::mem::take(&mut existing.nominations),
					winner: None,
					deadline: existing.deadline,
				};
				existing.state = ExpansionState::Expired;
				self.store.put_expansion_round(&existing)?;
				Ok(migrated)
			},
			None => Ok(ExpansionRound {
				round_id: nominate.round_id.clone(),
				target: nominate.target.clone(),
				state: ExpansionState::Nominating,
				nominations: BTreeMap::new(),
				winner: None,
				deadline: nominate.ts + NOMINATING_WINDOW_SECS,
			}),
		}
	}

	/// Close nominations and deterministically pick the winner: highest
	/// composite score, ties broken by lowest `node_id`.
	pub fn elect(&self, round_id: &str, from: &str, now: i64) -> Result<ExpansionElect, CoreError> {
		let mut round = self
			.store
			.get_expansion_round(round_id)?
			.ok_or_else(|| CoreError::NotFound(round_id.to_string()))?;
		if round.state != ExpansionState::Nominating {
			return Err(CoreError::IntentConflict);
		}

		let winner = round
			.nominations
			.iter()
			.max_by(|a, b| {
				a.1.score
					.partial_cmp(&b.1.score)
					.unwrap_or(std::cmp::Ordering::Equal)
					.then_with(|| b.0.cmp(a.0))
			})
			.map(|(node_id, _)| node_id.clone())
			.ok_or(CoreError::QuorumFailure)?;

		round.state = ExpansionState::Electing;
		round.winner = Some(winner.clone());
		self.store.put_expansion_round(&round)?;

		Ok(ExpansionElect {
			v: crate::codec::messages::SCHEMA_VERSION,
			from: from.to_string(),
			ts: now,
			round_id: round_id.to_string(),
			winner,
			sig: String::new(),
		})
	}

	pub async fn handle_elect(
		&self, elect: &ExpansionElect, transport_peer_id: &str, host: &dyn Host,
	) -> Result<(), CoreError> {
		self.identity.verify_signed(&elect.from, &elect.sig, transport_peer_id, elect, host).await?;
		let mut round = self
			.store
			.get_expansion_round(&elect.round_id)?
			.ok_or_else(|| CoreError::NotFound(elect.round_id.clone()))?;
		round.state = ExpansionState::Won;
		round.winner = Some(elect.winner.clone());
		self.store.put_expansion_round(&round)?;
		Ok(())
	}

	pub async fn handle_abort(
		&self, abort: &ExpansionAbort, transport_peer_id: &str, host: &dyn Host,
	) -> Result<(), CoreError> {
		// ExpansionAbort is not a signed message in the wire schema; the
		// transport-level sender is trusted as the abort's origin.
		let _ = host;
		let _ = transport_peer_id;
		if let Some(mut round) = self.store.get_expansion_round(&abort.round_id)? {
			round.state = ExpansionState::Expired;
			self.store.put_expansion_round(&round)?;
		}
		Ok(())
	}

	/// Mark every still-nominating/electing round past its deadline as
	/// `Expired`. The caller provides `now` as the deadline comparator.
	pub fn sweep_expired(&self, now: i64) -> Result<u64, CoreError> {
		let mut swept = 0;
		for mut round in self.store.active_expansion_rounds()? {
			if round.deadline < now {
				round.state = ExpansionState::Expired;
				self.store.put_expansion_round(&round)?;
				swept += 1;
			}
		}
		Ok(swept)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec::messages::NominationScore;
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
			NodeInfo { node_id: "a".repeat(66), capacity_msat: 0 }
		}
		async fn forwards_since(&self, _since_unix_secs: i64) -> (u64, u64) {
			(0, 0)
		}
	}

	fn node_id(tag: u8) -> String {
		format!("{:02x}", tag).repeat(33)
	}

	fn score(v: f64) -> NominationScore {
		NominationScore { capacity_headroom: v, uptime_pct: v, contribution_ratio: v, distinctness: v }
	}

	#[test]
	fn test_election_picks_highest_score_tie_broken_by_node_id() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let expansion = Expansion::new(&store, &identity);

		let mut round = expansion.open_round("target-node", 5, 300, 0).unwrap();
		round.nominations.insert(node_id(2), Nomination { nominator: node_id(2), score: 0.9 });
		round.nominations.insert(node_id(1), Nomination { nominator: node_id(1), score: 0.9 });
		round.nominations.insert(node_id(3), Nomination { nominator: node_id(3), score: 0.5 });
		store.put_expansion_round(&round).unwrap();

		let elect = expansion.elect(&round.round_id, &node_id(1), 10).unwrap();
		assert_eq!(elect.winner, node_id(1));
	}

	#[test]
	fn test_round_budget_enforced() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let expansion = Expansion::new(&store, &identity);

		for i in 0..5u8 {
			expansion.open_round(&format!("target-{}", i), 5, 300, 0).unwrap();
		}
		let err = expansion.open_round("target-overflow", 5, 300, 0).unwrap_err();
		assert!(matches!(err, CoreError::BudgetExceeded));
	}

	#[test]
	fn test_cooldown_blocks_reopening_recently_closed_target() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let expansion = Expansion::new(&store, &identity);

		let mut round = expansion.open_round("target-node", 5, 300, 0).unwrap();
		round.state = ExpansionState::Won;
		store.put_expansion_round(&round).unwrap();

		let err = expansion.open_round("target-node", 5, 300, 100).unwrap_err();
		assert!(matches!(err, CoreError::IntentConflict));

		expansion.open_round("target-node", 5, 300, 400).unwrap();
	}

	#[tokio::test]
	async fn test_nominate_merges_independently_opened_rounds_for_same_target() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let expansion = Expansion::new(&store, &identity);
		let host = NoopHost;

		// Node "aa" opens its round first (lower round_id), node "bb"
		// independently opens a later one for the same target.
		let early = expansion.open_round("target-node", 5, 300, 0).unwrap();
		let late_round_id = format!("target-node-{:020}", 5);

		let nominate_from_bb = ExpansionNominate {
			v: crate::codec::messages::SCHEMA_VERSION,
			from: node_id(0xbb),
			ts: 5,
			round_id: late_round_id,
			target: "target-node".to_string(),
			score: score(0.8),
			sig: String::new(),
		};
		expansion.handle_nominate(&nominate_from_bb, &node_id(0xbb), &host).await.unwrap();

		let merged = store.get_expansion_round(&early.round_id).unwrap().unwrap();
		assert!(merged.nominations.contains_key(&node_id(0xbb)));
	}

	#[tokio::test]
	async fn test_nominate_adopts_lower_remote_round_id() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let expansion = Expansion::new(&store, &identity);
		let host = NoopHost;

		// This node opens its own round at t=10; a remote nomination then
		// arrives referencing a round opened earlier (t=0) for the same
		// target, which must become canonical.
		let ours = expansion.open_round("target-node", 5, 300, 10).unwrap();
		let earlier_round_id = format!("target-node-{:020}", 0);

		let nominate = ExpansionNominate {
			v: crate::codec::messages::SCHEMA_VERSION,
			from: node_id(0xcc),
			ts: 0,
			round_id: earlier_round_id.clone(),
			target: "target-node".to_string(),
			score: score(0.5),
			sig: String::new(),
		};
		expansion.handle_nominate(&nominate, &node_id(0xcc), &host).await.unwrap();

		let canonical = store.get_expansion_round(&earlier_round_id).unwrap().unwrap();
		assert!(canonical.nominations.contains_key(&node_id(0xcc)));
		let retired = store.get_expansion_round(&ours.round_id).unwrap().unwrap();
		assert_eq!(retired.state, ExpansionState::Expired);
	}
}
