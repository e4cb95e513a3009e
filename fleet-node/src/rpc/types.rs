// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! JSON request/response bodies for the operator RPC surface (spec §7).
//!
//! Response bodies are dedicated view structs rather than the storage
//! models themselves, converted by the `*_to_view` functions below --
//! the same separation `ldk-server`'s `util/proto_adapter.rs` draws
//! between its internal types and the wire types an API response sends.

use std::collections::BTreeMap;

use hyper::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::store::models::{
	BanRecord, ExpansionRound, FeeReport, Intent, Member, PendingAction, PendingActionKind,
	SettlementRound, StateRecord,
};

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
	pub code: String,
	pub message: String,
}

/// Map a [`CoreError`] to the body and status code an operator client sees.
pub fn to_error_response(err: CoreError) -> (ErrorResponse, StatusCode) {
	let status = match &err {
		CoreError::NotFound(_) => StatusCode::NOT_FOUND,
		CoreError::BannedPeer
		| CoreError::UnauthenticatedPeer
		| CoreError::IdentityMismatch
		| CoreError::RateLimited(_) => StatusCode::FORBIDDEN,
		CoreError::InvalidConfig(_) | CoreError::MalformedMessage(_) => StatusCode::BAD_REQUEST,
		CoreError::IntentConflict
		| CoreError::QuorumFailure
		| CoreError::PeriodAlreadySettled(_)
		| CoreError::BudgetExceeded => StatusCode::CONFLICT,
		CoreError::Timeout | CoreError::ExecutorUnavailable | CoreError::StoreBusy => {
			StatusCode::SERVICE_UNAVAILABLE
		},
		CoreError::SchemaMismatch { .. } | CoreError::Store(_) | CoreError::Io(_) => {
			StatusCode::INTERNAL_SERVER_ERROR
		},
	};
	(ErrorResponse { code: err.code().to_string(), message: err.to_string() }, status)
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
	pub node_id: String,
	pub tier: &'static str,
	pub first_seen: i64,
	pub last_seen: i64,
	pub vouch_count: u32,
	pub capacity_msat: u64,
	pub uptime_pct: u8,
	pub contribution_ratio: f64,
	pub metadata: BTreeMap<String, String>,
}

pub fn member_to_view(member: &Member) -> MemberView {
	MemberView {
		node_id: member.node_id.clone(),
		tier: member.tier.as_str(),
		first_seen: member.first_seen,
		last_seen: member.last_seen,
		vouch_count: member.vouch_count,
		capacity_msat: member.capacity_msat,
		uptime_pct: member.uptime_pct,
		contribution_ratio: member.contribution_ratio,
		metadata: member.metadata.clone(),
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct BanView {
	pub target: String,
	pub proposer: String,
	pub votes: Vec<String>,
	pub created_at: i64,
	pub expires_at: i64,
}

pub fn ban_to_view(ban: &BanRecord) -> BanView {
	BanView {
		target: ban.target.clone(),
		proposer: ban.proposer.clone(),
		votes: ban.votes.clone(),
		created_at: ban.created_at,
		expires_at: ban.expires_at,
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct StateRecordView {
	pub node_id: String,
	pub version: u64,
	pub updated_at: i64,
	pub channel_count: usize,
	pub capacity_msat: u64,
	pub uptime_pct: u8,
	pub total_fees_msat: u64,
}

pub fn state_record_to_view(record: &StateRecord) -> StateRecordView {
	StateRecordView {
		node_id: record.node_id.clone(),
		version: record.version,
		updated_at: record.updated_at,
		channel_count: record.channels.len(),
		capacity_msat: record.capacity_msat,
		uptime_pct: record.uptime_pct,
		total_fees_msat: record.total_fees_msat,
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentView {
	pub intent_id: String,
	pub owner: String,
	pub kind: String,
	pub subject: String,
	pub announced_at: i64,
	pub commit_deadline: i64,
	pub state: &'static str,
}

pub fn intent_to_view(intent: &Intent) -> IntentView {
	IntentView {
		intent_id: intent.intent_id.clone(),
		owner: intent.owner.clone(),
		kind: intent.kind.clone(),
		subject: intent.subject.clone(),
		announced_at: intent.announced_at,
		commit_deadline: intent.commit_deadline,
		state: intent.state.as_str(),
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionRoundView {
	pub round_id: String,
	pub target: String,
	pub state: &'static str,
	pub nomination_count: usize,
	pub winner: Option<String>,
	pub deadline: i64,
}

pub fn expansion_round_to_view(round: &ExpansionRound) -> ExpansionRoundView {
	ExpansionRoundView {
		round_id: round.round_id.clone(),
		target: round.target.clone(),
		state: round.state.as_str(),
		nomination_count: round.nominations.len(),
		winner: round.winner.clone(),
		deadline: round.deadline,
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementRoundView {
	pub period_id: String,
	pub proposer: String,
	pub data_hash: String,
	pub pool: BTreeMap<String, u64>,
	pub vote_count: usize,
	pub state: &'static str,
	pub created_at: i64,
	pub finalized_at: Option<i64>,
}

pub fn settlement_round_to_view(round: &SettlementRound) -> SettlementRoundView {
	SettlementRoundView {
		period_id: round.period_id.clone(),
		proposer: round.proposer.clone(),
		data_hash: round.data_hash.clone(),
		pool: round.pool.clone(),
		vote_count: round.votes.len(),
		state: round.state.as_str(),
		created_at: round.created_at,
		finalized_at: round.finalized_at,
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeReportView {
	pub reporter: String,
	pub period_id: String,
	pub forwards_count: u64,
	pub total_fees_msat: u64,
	pub observed_at: i64,
}

pub fn fee_report_to_view(report: &FeeReport) -> FeeReportView {
	FeeReportView {
		reporter: report.reporter.clone(),
		period_id: report.period_id.clone(),
		forwards_count: report.forwards_count,
		total_fees_msat: report.total_fees_msat,
		observed_at: report.observed_at,
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
	pub node_id: String,
	pub governance_mode: String,
	pub member_count: u32,
	pub neophyte_count: u32,
	pub peer_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MembersResponse {
	pub members: Vec<MemberView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopologyResponse {
	pub records: Vec<StateRecordView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VouchRequest {
	pub subject: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VouchResponse {
	pub subject: String,
	pub vouch_count: u32,
	pub promoted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanRequest {
	pub target: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BanResponse {
	pub target: String,
	pub approvals: u32,
	pub banned: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentListResponse {
	pub intents: Vec<IntentView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionListResponse {
	pub rounds: Vec<ExpansionRoundView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementStatusResponse {
	pub round: Option<SettlementRoundView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementProposeRequest {
	pub period_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementProposeResponse {
	pub period_id: String,
	pub pool: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeReportsResponse {
	pub period_id: String,
	pub reports: Vec<FeeReportView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveMemberRequest {
	pub node_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoveMemberResponse {
	pub node_id: String,
	pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingActionView {
	pub id: String,
	pub kind: PendingActionKind,
	pub created_at: i64,
}

pub fn pending_action_to_view(action: &PendingAction) -> PendingActionView {
	PendingActionView {
		id: action.id.clone(),
		kind: action.kind.clone(),
		created_at: action.created_at,
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingActionsResponse {
	pub actions: Vec<PendingActionView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApproveActionRequest {
	pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApproveActionResponse {
	pub id: String,
	pub invoked: bool,
}
