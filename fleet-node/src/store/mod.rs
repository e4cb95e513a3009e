// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Persistence (spec §4, §5): a single SQLite file behind a
//! `Mutex<Connection>`, the same single-writer discipline `ldk-server`'s
//! `SqliteStore` uses. Readers and the writer share one connection here
//! rather than a reader pool, since the core's read volume is low relative
//! to the gossip/dispatch path that already serializes through the
//! scheduler's lock.

pub mod models;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use log::{info, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::codec::messages::ChannelSummary;
use crate::error::CoreError;
use models::{
	BanRecord, ExpansionRound, ExpansionState, FeeReport, Intent, IntentState, Member, Nomination,
	PendingAction, PendingActionKind, SettlementRound, SettlementState, StateRecord, Tier,
};

/// Bumped whenever the schema changes in an incompatible way. `Store::open`
/// fails closed rather than attempting a silent migration.
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

CREATE TABLE IF NOT EXISTS members (
    node_id TEXT PRIMARY KEY,
    tier TEXT NOT NULL,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL,
    vouch_count INTEGER NOT NULL,
    capacity_msat INTEGER NOT NULL,
    uptime_pct INTEGER NOT NULL,
    contribution_ratio REAL NOT NULL,
    metadata_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS vouches (
    subject TEXT NOT NULL,
    voucher TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (subject, voucher)
);

CREATE TABLE IF NOT EXISTS bans (
    target TEXT PRIMARY KEY,
    proposer TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ban_votes (
    target TEXT NOT NULL,
    voter TEXT NOT NULL,
    approve INTEGER NOT NULL,
    PRIMARY KEY (target, voter)
);

CREATE TABLE IF NOT EXISTS state_records (
    node_id TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    channels_json TEXT NOT NULL,
    capacity_msat INTEGER NOT NULL,
    uptime_pct INTEGER NOT NULL,
    total_fees_msat INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS intents (
    intent_id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    kind TEXT NOT NULL,
    subject TEXT NOT NULL,
    announced_at INTEGER NOT NULL,
    commit_deadline INTEGER NOT NULL,
    state TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fee_reports (
    reporter TEXT NOT NULL,
    period_id TEXT NOT NULL,
    forwards_count INTEGER NOT NULL,
    total_fees_msat INTEGER NOT NULL,
    observed_at INTEGER NOT NULL,
    PRIMARY KEY (reporter, period_id)
);

CREATE TABLE IF NOT EXISTS settlement_rounds (
    period_id TEXT PRIMARY KEY,
    proposer TEXT NOT NULL,
    data_hash TEXT NOT NULL,
    pool_json TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    finalized_at INTEGER
);

CREATE TABLE IF NOT EXISTS settlement_votes (
    period_id TEXT NOT NULL,
    voter TEXT NOT NULL,
    PRIMARY KEY (period_id, voter)
);

CREATE TABLE IF NOT EXISTS expansion_rounds (
    round_id TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    state TEXT NOT NULL,
    winner TEXT,
    deadline INTEGER NOT NULL,
    nominations_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rate_limit_counters (
    peer TEXT NOT NULL,
    counter_kind TEXT NOT NULL,
    window_start INTEGER NOT NULL,
    count INTEGER NOT NULL,
    PRIMARY KEY (peer, counter_kind, window_start)
);

CREATE TABLE IF NOT EXISTS pending_actions (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload_json TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
"#;

pub struct Store {
	conn: Mutex<Connection>,
}

impl Store {
	/// Open (creating if absent) the SQLite database at `path`, or an
	/// in-memory database when `path` is `:memory:`. Fails closed on any
	/// schema version mismatch rather than attempting to migrate silently.
	pub fn open(path: &Path) -> Result<Self, CoreError> {
		let conn = if path.as_os_str() == ":memory:" {
			Connection::open_in_memory()?
		} else {
			Connection::open(path)?
		};
		conn.pragma_update(None, "journal_mode", "WAL")?;
		conn.pragma_update(None, "foreign_keys", "ON")?;
		conn.execute_batch(SCHEMA)?;

		let found: Option<i64> =
			conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0)).optional()?;
		match found {
			None => {
				conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![
					CURRENT_SCHEMA_VERSION
				])?;
				info!("store: initialized fresh schema at version {}", CURRENT_SCHEMA_VERSION);
			},
			Some(v) if v == CURRENT_SCHEMA_VERSION => {},
			Some(found) => {
				warn!(
					"store: refusing to open database with schema version {} (expected {})",
					found, CURRENT_SCHEMA_VERSION
				);
				return Err(CoreError::SchemaMismatch { found, expected: CURRENT_SCHEMA_VERSION });
			},
		}

		Ok(Self { conn: Mutex::new(conn) })
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
		self.conn.lock().expect("store connection lock poisoned")
	}

	// -- members -----------------------------------------------------------

	pub fn get_member(&self, node_id: &str) -> Result<Option<Member>, CoreError> {
		let conn = self.lock();
		conn.query_row(
			"SELECT node_id, tier, first_seen, last_seen, vouch_count, capacity_msat, uptime_pct, \
			 contribution_ratio, metadata_json FROM members WHERE node_id = ?1",
			params![node_id],
			row_to_member,
		)
		.optional()
		.map_err(CoreError::from)
	}

	pub fn upsert_member(&self, member: &Member) -> Result<(), CoreError> {
		let metadata_json = serde_json::to_string(&member.metadata)
			.map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
		let conn = self.lock();
		conn.execute(
			"INSERT INTO members (node_id, tier, first_seen, last_seen, vouch_count, \
			 capacity_msat, uptime_pct, contribution_ratio, metadata_json) \
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
			 ON CONFLICT(node_id) DO UPDATE SET tier = excluded.tier, last_seen = excluded.last_seen, \
			 vouch_count = excluded.vouch_count, capacity_msat = excluded.capacity_msat, \
			 uptime_pct = excluded.uptime_pct, contribution_ratio = excluded.contribution_ratio, \
			 metadata_json = excluded.metadata_json",
			params![
				member.node_id,
				member.tier.as_str(),
				member.first_seen,
				member.last_seen,
				member.vouch_count,
				member.capacity_msat as i64,
				member.uptime_pct as i64,
				member.contribution_ratio,
				metadata_json,
			],
		)?;
		Ok(())
	}

	pub fn list_members(&self) -> Result<Vec<Member>, CoreError> {
		let conn = self.lock();
		let mut stmt = conn.prepare(
			"SELECT node_id, tier, first_seen, last_seen, vouch_count, capacity_msat, uptime_pct, \
			 contribution_ratio, metadata_json FROM members ORDER BY node_id",
		)?;
		let rows = stmt.query_map([], row_to_member)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
	}

	pub fn remove_member(&self, node_id: &str) -> Result<(), CoreError> {
		let conn = self.lock();
		conn.execute("DELETE FROM members WHERE node_id = ?1", params![node_id])?;
		conn.execute("DELETE FROM vouches WHERE subject = ?1 OR voucher = ?1", params![node_id])?;
		Ok(())
	}

	/// Record `voucher` vouching for `subject`; returns the distinct voucher
	/// count for `subject` after insertion.
	pub fn add_vouch(&self, subject: &str, voucher: &str, now: i64) -> Result<u32, CoreError> {
		let conn = self.lock();
		conn.execute(
			"INSERT OR IGNORE INTO vouches (subject, voucher, created_at) VALUES (?1, ?2, ?3)",
			params![subject, voucher, now],
		)?;
		let count: i64 =
			conn.query_row("SELECT COUNT(*) FROM vouches WHERE subject = ?1", params![subject], |r| {
				r.get(0)
			})?;
		Ok(count as u32)
	}

	pub fn vouch_count(&self, subject: &str) -> Result<u32, CoreError> {
		let conn = self.lock();
		let count: i64 =
			conn.query_row("SELECT COUNT(*) FROM vouches WHERE subject = ?1", params![subject], |r| {
				r.get(0)
			})?;
		Ok(count as u32)
	}

	pub fn has_vouched(&self, subject: &str, voucher: &str) -> Result<bool, CoreError> {
		let conn = self.lock();
		let count: i64 = conn.query_row(
			"SELECT COUNT(*) FROM vouches WHERE subject = ?1 AND voucher = ?2",
			params![subject, voucher],
			|r| r.get(0),
		)?;
		Ok(count > 0)
	}

	// -- bans ----------------------------------------------------------------

	pub fn get_ban(&self, target: &str) -> Result<Option<BanRecord>, CoreError> {
		let conn = self.lock();
		let base = conn
			.query_row(
				"SELECT target, proposer, created_at, expires_at FROM bans WHERE target = ?1",
				params![target],
				|r| {
					Ok((
						r.get::<_, String>(0)?,
						r.get::<_, String>(1)?,
						r.get::<_, i64>(2)?,
						r.get::<_, i64>(3)?,
					))
				},
			)
			.optional()?;
		let Some((target, proposer, created_at, expires_at)) = base else {
			return Ok(None);
		};
		let mut stmt = conn.prepare("SELECT voter FROM ban_votes WHERE target = ?1")?;
		let votes = stmt
			.query_map(params![target], |r| r.get::<_, String>(0))?
			.collect::<Result<Vec<_>, _>>()?;
		Ok(Some(BanRecord { target, proposer, votes, created_at, expires_at }))
	}

	pub fn propose_ban(
		&self, target: &str, proposer: &str, now: i64, expires_at: i64,
	) -> Result<(), CoreError> {
		let conn = self.lock();
		conn.execute(
			"INSERT OR IGNORE INTO bans (target, proposer, created_at, expires_at) \
			 VALUES (?1, ?2, ?3, ?4)",
			params![target, proposer, now, expires_at],
		)?;
		Ok(())
	}

	/// Records a vote and returns the total approving vote count.
	pub fn add_ban_vote(&self, target: &str, voter: &str, approve: bool) -> Result<u32, CoreError> {
		let conn = self.lock();
		conn.execute(
			"INSERT OR REPLACE INTO ban_votes (target, voter, approve) VALUES (?1, ?2, ?3)",
			params![target, voter, approve as i64],
		)?;
		let count: i64 = conn.query_row(
			"SELECT COUNT(*) FROM ban_votes WHERE target = ?1 AND approve = 1",
			params![target],
			|r| r.get(0),
		)?;
		Ok(count as u32)
	}

	pub fn remove_ban(&self, target: &str) -> Result<(), CoreError> {
		let conn = self.lock();
		conn.execute("DELETE FROM bans WHERE target = ?1", params![target])?;
		conn.execute("DELETE FROM ban_votes WHERE target = ?1", params![target])?;
		Ok(())
	}

	pub fn is_banned(&self, node_id: &str, now: i64) -> Result<bool, CoreError> {
		let conn = self.lock();
		let count: i64 = conn.query_row(
			"SELECT COUNT(*) FROM bans WHERE target = ?1 AND expires_at > ?2",
			params![node_id, now],
			|r| r.get(0),
		)?;
		Ok(count > 0)
	}

	// -- state records ---------------------------------------------------

	pub fn get_state_record(&self, node_id: &str) -> Result<Option<StateRecord>, CoreError> {
		let conn = self.lock();
		conn.query_row(
			"SELECT node_id, version, updated_at, channels_json, capacity_msat, uptime_pct, \
			 total_fees_msat FROM state_records WHERE node_id = ?1",
			params![node_id],
			row_to_state_record,
		)
		.optional()
		.map_err(CoreError::from)
	}

	pub fn put_state_record(&self, record: &StateRecord) -> Result<(), CoreError> {
		let channels_json = serde_json::to_string(&record.channels)
			.map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
		let conn = self.lock();
		conn.execute(
			"INSERT INTO state_records (node_id, version, updated_at, channels_json, \
			 capacity_msat, uptime_pct, total_fees_msat) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
			 ON CONFLICT(node_id) DO UPDATE SET version = excluded.version, \
			 updated_at = excluded.updated_at, channels_json = excluded.channels_json, \
			 capacity_msat = excluded.capacity_msat, uptime_pct = excluded.uptime_pct, \
			 total_fees_msat = excluded.total_fees_msat",
			params![
				record.node_id,
				record.version as i64,
				record.updated_at,
				channels_json,
				record.capacity_msat as i64,
				record.uptime_pct as i64,
				record.total_fees_msat as i64,
			],
		)?;
		Ok(())
	}

	pub fn list_state_records(&self) -> Result<Vec<StateRecord>, CoreError> {
		let conn = self.lock();
		let mut stmt = conn.prepare(
			"SELECT node_id, version, updated_at, channels_json, capacity_msat, uptime_pct, \
			 total_fees_msat FROM state_records ORDER BY node_id",
		)?;
		let rows = stmt.query_map([], row_to_state_record)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
	}

	// -- intents -----------------------------------------------------------

	pub fn get_intent(&self, intent_id: &str) -> Result<Option<Intent>, CoreError> {
		let conn = self.lock();
		conn.query_row(
			"SELECT intent_id, owner, kind, subject, announced_at, commit_deadline, state \
			 FROM intents WHERE intent_id = ?1",
			params![intent_id],
			row_to_intent,
		)
		.optional()
		.map_err(CoreError::from)
	}

	pub fn put_intent(&self, intent: &Intent) -> Result<(), CoreError> {
		let conn = self.lock();
		conn.execute(
			"INSERT INTO intents (intent_id, owner, kind, subject, announced_at, \
			 commit_deadline, state) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
			 ON CONFLICT(intent_id) DO UPDATE SET state = excluded.state",
			params![
				intent.intent_id,
				intent.owner,
				intent.kind,
				intent.subject,
				intent.announced_at,
				intent.commit_deadline,
				intent.state.as_str(),
			],
		)?;
		Ok(())
	}

	/// Intents competing for `subject` that are still in the `Announced`
	/// state, ordered lexicographically by `intent_id` (lowest first), for
	/// the deterministic tie-break.
	pub fn competing_intents(&self, subject: &str) -> Result<Vec<Intent>, CoreError> {
		let conn = self.lock();
		let mut stmt = conn.prepare(
			"SELECT intent_id, owner, kind, subject, announced_at, commit_deadline, state \
			 FROM intents WHERE subject = ?1 AND state = 'announced' ORDER BY intent_id ASC",
		)?;
		let rows = stmt.query_map(params![subject], row_to_intent)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
	}

	/// All intents regardless of state, for the operator RPC surface.
	pub fn list_intents(&self) -> Result<Vec<Intent>, CoreError> {
		let conn = self.lock();
		let mut stmt = conn.prepare(
			"SELECT intent_id, owner, kind, subject, announced_at, commit_deadline, state \
			 FROM intents ORDER BY announced_at DESC",
		)?;
		let rows = stmt.query_map([], row_to_intent)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
	}

	pub fn expire_stale_intents(&self, now: i64) -> Result<u64, CoreError> {
		let conn = self.lock();
		let changed = conn.execute(
			"UPDATE intents SET state = 'expired' WHERE state = 'announced' AND commit_deadline < ?1",
			params![now],
		)?;
		Ok(changed as u64)
	}

	/// Trim the intent cache down to `cache_max` rows, dropping the oldest
	/// (by `announced_at`) first. Returns the number of rows dropped.
	pub fn evict_oldest_intents_over_capacity(&self, cache_max: usize) -> Result<u64, CoreError> {
		let conn = self.lock();
		let dropped = conn.execute(
			"DELETE FROM intents WHERE intent_id NOT IN \
			 (SELECT intent_id FROM intents ORDER BY announced_at DESC LIMIT ?1)",
			params![cache_max as i64],
		)?;
		Ok(dropped as u64)
	}

	// -- fee reports ---------------------------------------------------------

	pub fn put_fee_report(&self, report: &FeeReport) -> Result<bool, CoreError> {
		let conn = self.lock();
		let changed = conn.execute(
			"INSERT OR IGNORE INTO fee_reports (reporter, period_id, forwards_count, \
			 total_fees_msat, observed_at) VALUES (?1, ?2, ?3, ?4, ?5)",
			params![
				report.reporter,
				report.period_id,
				report.forwards_count as i64,
				report.total_fees_msat as i64,
				report.observed_at,
			],
		)?;
		Ok(changed > 0)
	}

	pub fn fee_reports_for_period(&self, period_id: &str) -> Result<Vec<FeeReport>, CoreError> {
		let conn = self.lock();
		let mut stmt = conn.prepare(
			"SELECT reporter, period_id, forwards_count, total_fees_msat, observed_at \
			 FROM fee_reports WHERE period_id = ?1 ORDER BY reporter",
		)?;
		let rows = stmt.query_map(params![period_id], |r| {
			Ok(FeeReport {
				reporter: r.get(0)?,
				period_id: r.get(1)?,
				forwards_count: r.get::<_, i64>(2)? as u64,
				total_fees_msat: r.get::<_, i64>(3)? as u64,
				observed_at: r.get(4)?,
			})
		})?;
		rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
	}

	// -- settlement rounds -----------------------------------------------

	pub fn get_settlement_round(&self, period_id: &str) -> Result<Option<SettlementRound>, CoreError> {
		let conn = self.lock();
		let base = conn
			.query_row(
				"SELECT period_id, proposer, data_hash, pool_json, state, created_at, \
				 finalized_at FROM settlement_rounds WHERE period_id = ?1",
				params![period_id],
				row_to_settlement_base,
			)
			.optional()?;
		let Some(mut round) = base else {
			return Ok(None);
		};
		let mut stmt = conn.prepare("SELECT voter FROM settlement_votes WHERE period_id = ?1")?;
		let votes = stmt
			.query_map(params![period_id], |r| r.get::<_, String>(0))?
			.collect::<Result<Vec<_>, _>>()?;
		round.votes = votes;
		Ok(Some(round))
	}

	pub fn put_settlement_round(&self, round: &SettlementRound) -> Result<(), CoreError> {
		let pool_json = serde_json::to_string(&round.pool)
			.map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
		let conn = self.lock();
		conn.execute(
			"INSERT INTO settlement_rounds (period_id, proposer, data_hash, pool_json, state, \
			 created_at, finalized_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
			 ON CONFLICT(period_id) DO UPDATE SET state = excluded.state, \
			 finalized_at = excluded.finalized_at",
			params![
				round.period_id,
				round.proposer,
				round.data_hash,
				pool_json,
				round.state.as_str(),
				round.created_at,
				round.finalized_at,
			],
		)?;
		Ok(())
	}

	/// Records a vote and returns the total vote count for the round.
	pub fn add_settlement_vote(&self, period_id: &str, voter: &str) -> Result<u32, CoreError> {
		let conn = self.lock();
		conn.execute(
			"INSERT OR IGNORE INTO settlement_votes (period_id, voter) VALUES (?1, ?2)",
			params![period_id, voter],
		)?;
		let count: i64 = conn.query_row(
			"SELECT COUNT(*) FROM settlement_votes WHERE period_id = ?1",
			params![period_id],
			|r| r.get(0),
		)?;
		Ok(count as u32)
	}

	/// True if any settlement round has already reached `Settled` for this
	/// period, per the period-idempotency invariant.
	pub fn period_already_settled(&self, period_id: &str) -> Result<bool, CoreError> {
		let conn = self.lock();
		let count: i64 = conn.query_row(
			"SELECT COUNT(*) FROM settlement_rounds WHERE period_id = ?1 AND state = 'settled'",
			params![period_id],
			|r| r.get(0),
		)?;
		Ok(count > 0)
	}

	// -- expansion rounds -------------------------------------------------

	pub fn get_expansion_round(&self, round_id: &str) -> Result<Option<ExpansionRound>, CoreError> {
		let conn = self.lock();
		conn.query_row(
			"SELECT round_id, target, state, winner, deadline, nominations_json \
			 FROM expansion_rounds WHERE round_id = ?1",
			params![round_id],
			row_to_expansion_round,
		)
		.optional()
		.map_err(CoreError::from)
	}

	pub fn put_expansion_round(&self, round: &ExpansionRound) -> Result<(), CoreError> {
		let nominations_json = serde_json::to_string(&round.nominations)
			.map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
		let conn = self.lock();
		conn.execute(
			"INSERT INTO expansion_rounds (round_id, target, state, winner, deadline, \
			 nominations_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
			 ON CONFLICT(round_id) DO UPDATE SET state = excluded.state, \
			 winner = excluded.winner, nominations_json = excluded.nominations_json",
			params![
				round.round_id,
				round.target,
				round.state.as_str(),
				round.winner,
				round.deadline,
				nominations_json,
			],
		)?;
		Ok(())
	}

	pub fn active_expansion_rounds(&self) -> Result<Vec<ExpansionRound>, CoreError> {
		let conn = self.lock();
		let mut stmt = conn.prepare(
			"SELECT round_id, target, state, winner, deadline, nominations_json \
			 FROM expansion_rounds WHERE state IN ('nominating', 'electing') ORDER BY round_id",
		)?;
		let rows = stmt.query_map([], row_to_expansion_round)?;
		rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
	}

	/// Deadline of the most recently closed (non-active) round for
	/// `target`, if any -- the anchor a per-target cooldown is measured
	/// from.
	pub fn last_closed_expansion_deadline(&self, target: &str) -> Result<Option<i64>, CoreError> {
		let conn = self.lock();
		conn.query_row(
			"SELECT MAX(deadline) FROM expansion_rounds \
			 WHERE target = ?1 AND state NOT IN ('nominating', 'electing')",
			params![target],
			|r| r.get::<_, Option<i64>>(0),
		)
		.map_err(CoreError::from)
	}

	// -- rate limiting -----------------------------------------------------

	/// Increments the counter for `(peer, counter_kind, window_start)` and
	/// returns the new count. Counters persist across restarts so a peer
	/// cannot reset its budget by waiting for the node to restart.
	pub fn bump_rate_counter(
		&self, peer: &str, counter_kind: &str, window_start: i64,
	) -> Result<u32, CoreError> {
		let conn = self.lock();
		conn.execute(
			"INSERT INTO rate_limit_counters (peer, counter_kind, window_start, count) \
			 VALUES (?1, ?2, ?3, 1) \
			 ON CONFLICT(peer, counter_kind, window_start) DO UPDATE SET count = count + 1",
			params![peer, counter_kind, window_start],
		)?;
		let count: i64 = conn.query_row(
			"SELECT count FROM rate_limit_counters WHERE peer = ?1 AND counter_kind = ?2 \
			 AND window_start = ?3",
			params![peer, counter_kind, window_start],
			|r| r.get(0),
		)?;
		Ok(count as u32)
	}

	pub fn prune_rate_counters(&self, older_than: i64) -> Result<u64, CoreError> {
		let conn = self.lock();
		let changed = conn
			.execute("DELETE FROM rate_limit_counters WHERE window_start < ?1", params![older_than])?;
		Ok(changed as u64)
	}

	// -- pending actions (advisor/oracle governance) ------------------------

	pub fn put_pending_action(&self, action: &PendingAction) -> Result<(), CoreError> {
		let conn = self.lock();
		let kind_label = match &action.kind {
			PendingActionKind::ApplyFeePolicy { .. } => "apply_fee_policy",
			PendingActionKind::RequestRebalance { .. } => "request_rebalance",
		};
		let payload_json = serde_json::to_string(&action.kind)
			.map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
		conn.execute(
			"INSERT INTO pending_actions (id, kind, payload_json, created_at) \
			 VALUES (?1, ?2, ?3, ?4)",
			params![action.id, kind_label, payload_json, action.created_at],
		)?;
		Ok(())
	}

	pub fn list_pending_actions(&self) -> Result<Vec<PendingAction>, CoreError> {
		let conn = self.lock();
		let mut stmt = conn.prepare(
			"SELECT id, payload_json, created_at FROM pending_actions ORDER BY created_at ASC",
		)?;
		let rows = stmt.query_map([], |r| {
			let id: String = r.get(0)?;
			let payload_json: String = r.get(1)?;
			let created_at: i64 = r.get(2)?;
			Ok((id, payload_json, created_at))
		})?;
		let mut actions = Vec::new();
		for row in rows {
			let (id, payload_json, created_at) = row?;
			let kind: PendingActionKind = serde_json::from_str(&payload_json)
				.map_err(|e| rusqlite::Error::FromSqlConversionFailure(
					1,
					rusqlite::types::Type::Text,
					Box::new(e),
				))?;
			actions.push(PendingAction { id, kind, created_at });
		}
		Ok(actions)
	}

	pub fn remove_pending_action(&self, id: &str) -> Result<(), CoreError> {
		let conn = self.lock();
		conn.execute("DELETE FROM pending_actions WHERE id = ?1", params![id])?;
		Ok(())
	}
}

fn row_to_member(r: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
	let tier_str: String = r.get(1)?;
	let metadata_json: String = r.get(8)?;
	let metadata: BTreeMap<String, String> = serde_json::from_str(&metadata_json).unwrap_or_default();
	Ok(Member {
		node_id: r.get(0)?,
		tier: Tier::parse(&tier_str).unwrap_or(Tier::Neophyte),
		first_seen: r.get(2)?,
		last_seen: r.get(3)?,
		vouch_count: r.get::<_, i64>(4)? as u32,
		capacity_msat: r.get::<_, i64>(5)? as u64,
		uptime_pct: r.get::<_, i64>(6)? as u8,
		contribution_ratio: r.get(7)?,
		metadata,
	})
}

fn row_to_state_record(r: &rusqlite::Row<'_>) -> rusqlite::Result<StateRecord> {
	let channels_json: String = r.get(3)?;
	let channels: Vec<ChannelSummary> = serde_json::from_str(&channels_json).unwrap_or_default();
	Ok(StateRecord {
		node_id: r.get(0)?,
		version: r.get::<_, i64>(1)? as u64,
		updated_at: r.get(2)?,
		channels,
		capacity_msat: r.get::<_, i64>(4)? as u64,
		uptime_pct: r.get::<_, i64>(5)? as u8,
		total_fees_msat: r.get::<_, i64>(6)? as u64,
	})
}

fn row_to_intent(r: &rusqlite::Row<'_>) -> rusqlite::Result<Intent> {
	let state_str: String = r.get(6)?;
	Ok(Intent {
		intent_id: r.get(0)?,
		owner: r.get(1)?,
		kind: r.get(2)?,
		subject: r.get(3)?,
		announced_at: r.get(4)?,
		commit_deadline: r.get(5)?,
		state: IntentState::parse(&state_str).unwrap_or(IntentState::Expired),
	})
}

fn row_to_settlement_base(r: &rusqlite::Row<'_>) -> rusqlite::Result<SettlementRound> {
	let pool_json: String = r.get(3)?;
	let state_str: String = r.get(4)?;
	let pool: BTreeMap<String, u64> = serde_json::from_str(&pool_json).unwrap_or_default();
	Ok(SettlementRound {
		period_id: r.get(0)?,
		proposer: r.get(1)?,
		data_hash: r.get(2)?,
		pool,
		votes: Vec::new(),
		state: SettlementState::parse(&state_str).unwrap_or(SettlementState::Aborted),
		created_at: r.get(5)?,
		finalized_at: r.get(6)?,
	})
}

fn row_to_expansion_round(r: &rusqlite::Row<'_>) -> rusqlite::Result<ExpansionRound> {
	let state_str: String = r.get(2)?;
	let nominations_json: String = r.get(5)?;
	let nominations: BTreeMap<String, Nomination> =
		serde_json::from_str(&nominations_json).unwrap_or_default();
	Ok(ExpansionRound {
		round_id: r.get(0)?,
		target: r.get(1)?,
		state: ExpansionState::parse(&state_str).unwrap_or(ExpansionState::Expired),
		nominations,
		winner: r.get(3)?,
		deadline: r.get(4)?,
	})
}

#[cfg(test)]
mod tests {
	use super::models::*;
	use super::*;
	use std::collections::BTreeMap;

	fn open_memory() -> Store {
		Store::open(Path::new(":memory:")).unwrap()
	}

	#[test]
	fn test_schema_initializes_fresh() {
		let store = open_memory();
		assert!(store.list_members().unwrap().is_empty());
	}

	#[test]
	fn test_member_upsert_and_fetch() {
		let store = open_memory();
		let member = Member {
			node_id: "a".repeat(66),
			tier: Tier::Neophyte,
			first_seen: 1,
			last_seen: 1,
			vouch_count: 0,
			capacity_msat: 1000,
			uptime_pct: 99,
			contribution_ratio: 0.5,
			metadata: BTreeMap::new(),
		};
		store.upsert_member(&member).unwrap();
		let fetched = store.get_member(&member.node_id).unwrap().unwrap();
		assert_eq!(fetched.tier, Tier::Neophyte);

		let mut promoted = member.clone();
		promoted.tier = Tier::Member;
		store.upsert_member(&promoted).unwrap();
		let fetched = store.get_member(&member.node_id).unwrap().unwrap();
		assert_eq!(fetched.tier, Tier::Member);
	}

	#[test]
	fn test_vouch_count_is_distinct() {
		let store = open_memory();
		let subject = "b".repeat(66);
		assert_eq!(store.add_vouch(&subject, "v1", 1).unwrap(), 1);
		assert_eq!(store.add_vouch(&subject, "v2", 2).unwrap(), 2);
		// Same voucher vouching twice does not inflate the count.
		assert_eq!(store.add_vouch(&subject, "v1", 3).unwrap(), 2);
	}

	#[test]
	fn test_competing_intents_ordered_lexicographically() {
		let store = open_memory();
		for id in ["zzz", "aaa", "mmm"] {
			store
				.put_intent(&Intent {
					intent_id: id.to_string(),
					owner: "owner".to_string(),
					kind: "open_channel".to_string(),
					subject: "target".to_string(),
					announced_at: 1,
					commit_deadline: 100,
					state: IntentState::Announced,
				})
				.unwrap();
		}
		let competing = store.competing_intents("target").unwrap();
		let ids: Vec<&str> = competing.iter().map(|i| i.intent_id.as_str()).collect();
		assert_eq!(ids, vec!["aaa", "mmm", "zzz"]);
	}

	#[test]
	fn test_evict_oldest_intents_over_capacity_keeps_newest() {
		let store = open_memory();
		for (id, announced_at) in [("i1", 1), ("i2", 2), ("i3", 3), ("i4", 4)] {
			store
				.put_intent(&Intent {
					intent_id: id.to_string(),
					owner: "owner".to_string(),
					kind: "open_channel".to_string(),
					subject: "target".to_string(),
					announced_at,
					commit_deadline: 100,
					state: IntentState::Announced,
				})
				.unwrap();
		}
		let dropped = store.evict_oldest_intents_over_capacity(2).unwrap();
		assert_eq!(dropped, 2);
		let mut remaining: Vec<String> = store.list_intents().unwrap().into_iter().map(|i| i.intent_id).collect();
		remaining.sort();
		assert_eq!(remaining, vec!["i3".to_string(), "i4".to_string()]);
	}

	#[test]
	fn test_period_idempotency() {
		let store = open_memory();
		let round = SettlementRound {
			period_id: "2026-W05".to_string(),
			proposer: "p".to_string(),
			data_hash: "hash".to_string(),
			pool: BTreeMap::new(),
			votes: Vec::new(),
			state: SettlementState::Settled,
			created_at: 1,
			finalized_at: Some(2),
		};
		store.put_settlement_round(&round).unwrap();
		assert!(store.period_already_settled("2026-W05").unwrap());
		assert!(!store.period_already_settled("2026-W06").unwrap());
	}

	#[test]
	fn test_rate_counter_persists_and_prunes() {
		let store = open_memory();
		assert_eq!(store.bump_rate_counter("peer", "vouch", 100).unwrap(), 1);
		assert_eq!(store.bump_rate_counter("peer", "vouch", 100).unwrap(), 2);
		assert_eq!(store.bump_rate_counter("peer", "vouch", 200).unwrap(), 1);
		let pruned = store.prune_rate_counters(150).unwrap();
		assert_eq!(pruned, 1);
	}
}
