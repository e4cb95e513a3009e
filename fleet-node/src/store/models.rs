// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Data model (spec §3), decoupled from the wire payload types in
//! [`crate::codec::messages`] — storage schema should evolve independently
//! of the wire format, the same reasoning `ldk-server`'s
//! `io::persist::types` gives for keeping `StoredForwardedPayment` separate
//! from its proto twin.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::messages::ChannelSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
	Neophyte,
	Member,
}

impl Tier {
	pub fn as_str(&self) -> &'static str {
		match self {
			Tier::Neophyte => "neophyte",
			Tier::Member => "member",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"neophyte" => Some(Tier::Neophyte),
			"member" => Some(Tier::Member),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
	pub node_id: String,
	pub tier: Tier,
	pub first_seen: i64,
	pub last_seen: i64,
	pub vouch_count: u32,
	pub capacity_msat: u64,
	pub uptime_pct: u8,
	pub contribution_ratio: f64,
	pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BanRecord {
	pub target: String,
	pub proposer: String,
	pub votes: Vec<String>,
	pub created_at: i64,
	pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
	pub node_id: String,
	pub version: u64,
	pub updated_at: i64,
	pub channels: Vec<ChannelSummary>,
	pub capacity_msat: u64,
	pub uptime_pct: u8,
	pub total_fees_msat: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentState {
	Announced,
	Committed,
	Aborted,
	Expired,
}

impl IntentState {
	pub fn as_str(&self) -> &'static str {
		match self {
			IntentState::Announced => "announced",
			IntentState::Committed => "committed",
			IntentState::Aborted => "aborted",
			IntentState::Expired => "expired",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"announced" => Some(IntentState::Announced),
			"committed" => Some(IntentState::Committed),
			"aborted" => Some(IntentState::Aborted),
			"expired" => Some(IntentState::Expired),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
	pub intent_id: String,
	pub owner: String,
	pub kind: String,
	pub subject: String,
	pub announced_at: i64,
	pub commit_deadline: i64,
	pub state: IntentState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeeReport {
	pub reporter: String,
	pub period_id: String,
	pub forwards_count: u64,
	pub total_fees_msat: u64,
	pub observed_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementState {
	Proposed,
	Quorum,
	Executing,
	Settled,
	Aborted,
}

impl SettlementState {
	pub fn as_str(&self) -> &'static str {
		match self {
			SettlementState::Proposed => "proposed",
			SettlementState::Quorum => "quorum",
			SettlementState::Executing => "executing",
			SettlementState::Settled => "settled",
			SettlementState::Aborted => "aborted",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"proposed" => Some(SettlementState::Proposed),
			"quorum" => Some(SettlementState::Quorum),
			"executing" => Some(SettlementState::Executing),
			"settled" => Some(SettlementState::Settled),
			"aborted" => Some(SettlementState::Aborted),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRound {
	pub period_id: String,
	pub proposer: String,
	pub data_hash: String,
	pub pool: BTreeMap<String, u64>,
	pub votes: Vec<String>,
	pub state: SettlementState,
	pub created_at: i64,
	pub finalized_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionState {
	Nominating,
	Electing,
	Won,
	Expired,
}

impl ExpansionState {
	pub fn as_str(&self) -> &'static str {
		match self {
			ExpansionState::Nominating => "nominating",
			ExpansionState::Electing => "electing",
			ExpansionState::Won => "won",
			ExpansionState::Expired => "expired",
		}
	}

	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"nominating" => Some(ExpansionState::Nominating),
			"electing" => Some(ExpansionState::Electing),
			"won" => Some(ExpansionState::Won),
			"expired" => Some(ExpansionState::Expired),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nomination {
	pub nominator: String,
	pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpansionRound {
	pub round_id: String,
	pub target: String,
	pub state: ExpansionState,
	pub nominations: BTreeMap<String, Nomination>,
	pub winner: Option<String>,
	pub deadline: i64,
}

/// An executor-bound action recorded under `advisor`/`oracle` governance
/// instead of being invoked immediately (spec §4.9/§9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PendingActionKind {
	ApplyFeePolicy { channel: String, policy_json: String },
	RequestRebalance { from: String, to: String, amount_msat: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
	pub id: String,
	pub kind: PendingActionKind,
	pub created_at: i64,
}
