// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Settlement Round (spec §4.8): periodic fee-pool settlement among
//! members, keyed by ISO-week `period_id`. Each member gossips a
//! `FEE_REPORT` at most once per period (idempotent per
//! `(reporter, period_id)`); a proposer computes a weighted pool, the
//! fleet votes to quorum, and the proposer executes payouts one offer at a
//! time via [`crate::host::Host::pay_offer`], emitting a `SETTLE_EXECUTE`
//! per payee. A period that has already reached `Settled` can never be
//! proposed again.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use hex::prelude::*;
use log::{info, warn};
use sha2::{Digest, Sha256};

use crate::codec::messages::{FeeReport as WireFeeReport, SettleExecute, SettlePropose, SettleVote};
use crate::config::SettlementWeights;
use crate::error::CoreError;
use crate::host::Host;
use crate::identity::IdentityVerifier;
use crate::store::models::{FeeReport, Member, SettlementRound, SettlementState};
use crate::store::Store;

const PROPOSE_TIMEOUT_SECS: i64 = 6 * 3600;
const EXECUTE_TIMEOUT_SECS: i64 = 24 * 3600;

/// ISO-week period identifier for `unix_secs`, e.g. `"2026-W05"`.
pub fn period_id_for(unix_secs: i64) -> String {
	let dt = Utc.timestamp_opt(unix_secs, 0).single().expect("valid unix timestamp");
	let week = dt.iso_week();
	format!("{:04}-W{:02}", week.year(), week.week())
}

pub struct Settlement<'a> {
	store: &'a Store,
	identity: &'a IdentityVerifier,
}

impl<'a> Settlement<'a> {
	pub fn new(store: &'a Store, identity: &'a IdentityVerifier) -> Self {
		Self { store, identity }
	}

	pub fn record_own_fee_report(
		&self, from: &str, period_id: &str, forwards_count: u64, total_fees_msat: u64, now: i64,
	) -> Result<Option<WireFeeReport>, CoreError> {
		let inserted = self.store.put_fee_report(&FeeReport {
			reporter: from.to_string(),
			period_id: period_id.to_string(),
			forwards_count,
			total_fees_msat,
			observed_at: now,
		})?;
		if !inserted {
			return Ok(None);
		}
		Ok(Some(WireFeeReport {
			v: crate::codec::messages::SCHEMA_VERSION,
			from: from.to_string(),
			ts: now,
			period_id: period_id.to_string(),
			forwards_count,
			total_fees_msat,
			sig: String::new(),
		}))
	}

	pub async fn handle_fee_report(
		&self, report: &WireFeeReport, transport_peer_id: &str, host: &dyn Host,
	) -> Result<bool, CoreError> {
		self.identity.verify_signed(&report.from, &report.sig, transport_peer_id, report, host).await?;
		self.store.put_fee_report(&FeeReport {
			reporter: report.from.clone(),
			period_id: report.period_id.clone(),
			forwards_count: report.forwards_count,
			total_fees_msat: report.total_fees_msat,
			observed_at: report.ts,
		})
	}

	/// Compute each member's weighted share of `total_pool_msat`, from
	/// capacity/volume/uptime, normalized to sum to exactly `total_pool_msat`
	/// with the rounding remainder assigned to the lowest `node_id`.
	pub fn compute_pool(
		members: &[Member], reports: &[FeeReport], weights: &SettlementWeights, total_pool_msat: u64,
	) -> BTreeMap<String, u64> {
		if members.is_empty() || total_pool_msat == 0 {
			return BTreeMap::new();
		}
		let volume_by_node: BTreeMap<&str, u64> =
			reports.iter().map(|r| (r.reporter.as_str(), r.total_fees_msat)).collect();

		let total_capacity: u64 = members.iter().map(|m| m.capacity_msat).sum();
		let total_volume: u64 = volume_by_node.values().sum();
		let total_uptime: u64 = members.iter().map(|m| m.uptime_pct as u64).sum();

		let mut raw_scores: BTreeMap<String, f64> = BTreeMap::new();
		for member in members {
			let capacity_share = share(member.capacity_msat, total_capacity);
			let volume_share =
				share(volume_by_node.get(member.node_id.as_str()).copied().unwrap_or(0), total_volume);
			let uptime_share = share(member.uptime_pct as u64, total_uptime);
			let score = weights.capacity * capacity_share
				+ weights.volume * volume_share
				+ weights.uptime * uptime_share;
			raw_scores.insert(member.node_id.clone(), score);
		}

		let score_sum: f64 = raw_scores.values().sum();
		let mut pool = BTreeMap::new();
		let mut distributed = 0u64;
		if score_sum <= 0.0 {
			return pool;
		}
		for (node_id, score) in &raw_scores {
			let amount = ((score / score_sum) * total_pool_msat as f64).floor() as u64;
			distributed += amount;
			pool.insert(node_id.clone(), amount);
		}
		// Stable remainder assignment: the lowest node_id absorbs whatever
		// floor() left on the table, so the pool always sums exactly.
		let remainder = total_pool_msat.saturating_sub(distributed);
		if remainder > 0 {
			if let Some((lowest, _)) = raw_scores.iter().next() {
				*pool.entry(lowest.clone()).or_insert(0) += remainder;
			}
		}
		pool
	}

	pub fn data_hash_for(period_id: &str, pool: &BTreeMap<String, u64>) -> String {
		let mut hasher = Sha256::new();
		hasher.update(period_id.as_bytes());
		for (node_id, amount) in pool {
			hasher.update(node_id.as_bytes());
			hasher.update(amount.to_be_bytes());
		}
		hasher.finalize().to_lower_hex_string()
	}

	pub fn propose(
		&self, proposer: &str, period_id: &str, pool: BTreeMap<String, u64>, now: i64,
	) -> Result<SettlePropose, CoreError> {
		if self.store.period_already_settled(period_id)? {
			return Err(CoreError::PeriodAlreadySettled(period_id.to_string()));
		}
		let data_hash = Self::data_hash_for(period_id, &pool);
		self.store.put_settlement_round(&SettlementRound {
			period_id: period_id.to_string(),
			proposer: proposer.to_string(),
			data_hash: data_hash.clone(),
			pool: pool.clone(),
			votes: Vec::new(),
			state: SettlementState::Proposed,
			created_at: now,
			finalized_at: None,
		})?;
		info!("settlement: proposed round for period {} (hash {})", period_id, data_hash);
		Ok(SettlePropose {
			v: crate::codec::messages::SCHEMA_VERSION,
			from: proposer.to_string(),
			ts: now,
			period_id: period_id.to_string(),
			pool,
			data_hash,
			sig: String::new(),
		})
	}

	pub async fn handle_propose(
		&self, propose: &SettlePropose, transport_peer_id: &str, host: &dyn Host,
	) -> Result<(), CoreError> {
		self.identity.verify_signed(&propose.from, &propose.sig, transport_peer_id, propose, host).await?;
		if self.store.period_already_settled(&propose.period_id)? {
			return Err(CoreError::PeriodAlreadySettled(propose.period_id.clone()));
		}
		if self.store.get_settlement_round(&propose.period_id)?.is_some() {
			// A round is already open for this period; do not overwrite it
			// with a competing proposal.
			return Ok(());
		}
		let computed = Self::data_hash_for(&propose.period_id, &propose.pool);
		if computed != propose.data_hash {
			return Err(CoreError::MalformedMessage("pool does not match declared data_hash".to_string()));
		}
		self.store.put_settlement_round(&SettlementRound {
			period_id: propose.period_id.clone(),
			proposer: propose.from.clone(),
			data_hash: propose.data_hash.clone(),
			pool: propose.pool.clone(),
			votes: Vec::new(),
			state: SettlementState::Proposed,
			created_at: propose.ts,
			finalized_at: None,
		})?;
		Ok(())
	}

	pub fn vote(&self, period_id: &str, from: &str, now: i64) -> Result<SettleVote, CoreError> {
		let round = self
			.store
			.get_settlement_round(period_id)?
			.ok_or_else(|| CoreError::NotFound(period_id.to_string()))?;
		Ok(SettleVote {
			v: crate::codec::messages::SCHEMA_VERSION,
			from: from.to_string(),
			ts: now,
			period_id: period_id.to_string(),
			data_hash: round.data_hash,
			approve: true,
			sig: String::new(),
		})
	}

	/// Records a vote and advances the round to `Quorum` once approvals
	/// reach 51% of `member_count`.
	pub async fn handle_vote(
		&self, vote: &SettleVote, transport_peer_id: &str, member_count: u32, host: &dyn Host,
	) -> Result<(), CoreError> {
		self.identity.verify_signed(&vote.from, &vote.sig, transport_peer_id, vote, host).await?;
		let mut round = self
			.store
			.get_settlement_round(&vote.period_id)?
			.ok_or_else(|| CoreError::NotFound(vote.period_id.clone()))?;
		if round.data_hash != vote.data_hash {
			return Err(CoreError::MalformedMessage("vote references a stale data_hash".to_string()));
		}
		if !vote.approve || round.state != SettlementState::Proposed {
			return Ok(());
		}
		let approvals = self.store.add_settlement_vote(&vote.period_id, &vote.from)?;
		let quorum = ((member_count.max(1) as f64) * 0.51).ceil() as u32;
		if approvals >= quorum {
			round.state = SettlementState::Quorum;
			self.store.put_settlement_round(&round)?;
			info!("settlement: round {} reached quorum ({} approvals)", vote.period_id, approvals);
		}
		Ok(())
	}

	/// Execute payouts for a round that has reached quorum. `offer_for`
	/// resolves a member's node_id to a payable offer string (drawn from
	/// that member's own advertised metadata); members with no resolvable
	/// offer are skipped with a warning rather than failing the whole round.
	pub async fn execute(
		&self, period_id: &str, payer: &str, host: &dyn Host, now: i64,
		offer_for: impl Fn(&str) -> Option<String>,
	) -> Result<Vec<SettleExecute>, CoreError> {
		let mut round = self
			.store
			.get_settlement_round(period_id)?
			.ok_or_else(|| CoreError::NotFound(period_id.to_string()))?;
		if round.state != SettlementState::Quorum {
			return Err(CoreError::QuorumFailure);
		}
		round.state = SettlementState::Executing;
		self.store.put_settlement_round(&round)?;

		let mut receipts = Vec::new();
		for (node_id, amount_msat) in &round.pool {
			if *amount_msat == 0 || node_id == payer {
				continue;
			}
			let Some(offer) = offer_for(node_id) else {
				warn!("settlement: no payable offer for {}, skipping payout", node_id);
				continue;
			};
			match host.pay_offer(&offer, *amount_msat).await {
				Ok(()) => {
					receipts.push(SettleExecute {
						v: crate::codec::messages::SCHEMA_VERSION,
						from: payer.to_string(),
						ts: now,
						period_id: period_id.to_string(),
						to: node_id.clone(),
						amount_msat: *amount_msat,
						receipt: format!("paid:{}:{}", period_id, node_id),
						sig: String::new(),
					});
				},
				Err(e) => {
					warn!("settlement: payout to {} failed: {}", node_id, e);
				},
			}
		}

		round.state = SettlementState::Settled;
		round.finalized_at = Some(now);
		self.store.put_settlement_round(&round)?;
		info!("settlement: period {} settled with {} payouts", period_id, receipts.len());
		Ok(receipts)
	}

	pub async fn handle_execute(
		&self, execute: &SettleExecute, transport_peer_id: &str, host: &dyn Host,
	) -> Result<(), CoreError> {
		self.identity.verify_signed(&execute.from, &execute.sig, transport_peer_id, execute, host).await?;
		if let Some(mut round) = self.store.get_settlement_round(&execute.period_id)? {
			round.state = SettlementState::Settled;
			round.finalized_at = Some(execute.ts);
			self.store.put_settlement_round(&round)?;
		}
		Ok(())
	}

	/// Abort rounds stuck past their propose (6h) or execute (24h) timeout.
	pub fn sweep_timeouts(&self, now: i64, period_ids: &[String]) -> Result<u64, CoreError> {
		let mut swept = 0;
		for period_id in period_ids {
			let Some(mut round) = self.store.get_settlement_round(period_id)? else { continue };
			let timed_out = match round.state {
				SettlementState::Proposed => now - round.created_at > PROPOSE_TIMEOUT_SECS,
				SettlementState::Quorum | SettlementState::Executing => {
					now - round.created_at > EXECUTE_TIMEOUT_SECS
				},
				_ => false,
			};
			if timed_out {
				round.state = SettlementState::Aborted;
				self.store.put_settlement_round(&round)?;
				swept += 1;
			}
		}
		Ok(swept)
	}
}

fn share(value: u64, total: u64) -> f64 {
	if total == 0 {
		0.0
	} else {
		value as f64 / total as f64
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::models::Tier;
	use std::path::Path;

	fn node_id(tag: u8) -> String {
		format!("{:02x}", tag).repeat(33)
	}

	fn member(tag: u8, capacity: u64, uptime: u8) -> Member {
		Member {
			node_id: node_id(tag),
			tier: Tier::Member,
			first_seen: 0,
			last_seen: 0,
			vouch_count: 0,
			capacity_msat: capacity,
			uptime_pct: uptime,
			contribution_ratio: 0.0,
			metadata: Default::default(),
		}
	}

	#[test]
	fn test_period_id_is_iso_week() {
		// 2026-01-28 is in ISO week 2026-W05.
		let ts = chrono::Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap().timestamp();
		assert_eq!(period_id_for(ts), "2026-W05");
	}

	#[test]
	fn test_pool_sums_exactly_to_total() {
		let members = vec![member(1, 1000, 100), member(2, 3000, 50)];
		let reports = vec![FeeReport {
			reporter: node_id(1),
			period_id: "2026-W05".to_string(),
			forwards_count: 10,
			total_fees_msat: 500,
			observed_at: 0,
		}];
		let weights = SettlementWeights::default();
		let pool = Settlement::compute_pool(&members, &reports, &weights, 1_000_000);
		let total: u64 = pool.values().sum();
		assert_eq!(total, 1_000_000);
	}

	#[test]
	fn test_data_hash_changes_with_pool() {
		let mut pool_a = BTreeMap::new();
		pool_a.insert(node_id(1), 100u64);
		let mut pool_b = pool_a.clone();
		pool_b.insert(node_id(1), 200u64);
		assert_ne!(
			Settlement::data_hash_for("2026-W05", &pool_a),
			Settlement::data_hash_for("2026-W05", &pool_b)
		);
	}

	#[test]
	fn test_propose_rejects_already_settled_period() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let settlement = Settlement::new(&store, &identity);

		store
			.put_settlement_round(&SettlementRound {
				period_id: "2026-W05".to_string(),
				proposer: node_id(1),
				data_hash: "hash".to_string(),
				pool: BTreeMap::new(),
				votes: Vec::new(),
				state: SettlementState::Settled,
				created_at: 0,
				finalized_at: Some(1),
			})
			.unwrap();

		let err = settlement.propose(&node_id(1), "2026-W05", BTreeMap::new(), 10).unwrap_err();
		assert!(matches!(err, CoreError::PeriodAlreadySettled(_)));
	}
}
