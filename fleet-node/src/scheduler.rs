// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Scheduler (spec §4.10, §5): the background duty cycles that drive
//! gossip, intent monitoring, membership maintenance, expansion planning,
//! settlement, and anti-entropy. Every loop waits on [`wait`], never a bare
//! `tokio::time::sleep`, so a shutdown signal interrupts it promptly
//! instead of waiting out the remainder of an interval. Calls into the host
//! are serialized through a single lock with a bounded acquisition timeout,
//! so one stuck host RPC cannot silently wedge every duty cycle at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{watch, Mutex};

use crate::codec::messages::{ExpansionNominate, IntentKind, NominationScore};
use crate::codec::MessageKind;
use crate::config::{Config, ConfigManager, GovernanceMode};
use crate::error::CoreError;
use crate::expansion::Expansion;
use crate::gossip::Gossip;
use crate::host::Host;
use crate::identity::IdentityVerifier;
use crate::intent::IntentLock;
use crate::settlement::{self, Settlement};
use crate::store::models::{ExpansionRound, ExpansionState, IntentState, SettlementState, StateRecord, Tier};
use crate::store::Store;

const HOST_CALL_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_PLANNER_SKIPS_PER_CYCLE: usize = 5;
const PER_TARGET_MARKET_SHARE_CAP_PCT: f64 = 20.0;

/// Waits out `interval` unless `shutdown` fires first. Returns `false` once
/// shutdown has been requested, so callers can break their loop instead of
/// looping forever on an already-cancelled receiver.
async fn wait(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
	if *shutdown.borrow() {
		return false;
	}
	tokio::select! {
		_ = tokio::time::sleep(interval) => true,
		result = shutdown.changed() => result.is_ok() && !*shutdown.borrow(),
	}
}

pub struct Scheduler {
	store: Arc<Store>,
	identity: Arc<IdentityVerifier>,
	host: Arc<dyn Host>,
	config: Arc<ConfigManager>,
	host_lock: Mutex<()>,
	uptime_ticks: AtomicU64,
	uptime_healthy_ticks: AtomicU64,
}

impl Scheduler {
	pub fn new(
		store: Arc<Store>, identity: Arc<IdentityVerifier>, host: Arc<dyn Host>, config: Arc<ConfigManager>,
	) -> Self {
		Self {
			store,
			identity,
			host,
			config,
			host_lock: Mutex::new(()),
			uptime_ticks: AtomicU64::new(0),
			uptime_healthy_ticks: AtomicU64::new(0),
		}
	}

	/// Fraction of gossip ticks (since this node started) whose host call
	/// completed within [`HOST_CALL_TIMEOUT`] -- this node's own
	/// self-reported liveness measure, per spec §3's `uptime_pct`.
	fn uptime_pct(&self) -> u8 {
		let total = self.uptime_ticks.load(Ordering::Relaxed);
		if total == 0 {
			return 100;
		}
		let healthy = self.uptime_healthy_ticks.load(Ordering::Relaxed);
		((healthy * 100) / total).min(100) as u8
	}

	/// Acquire exclusive access to the host for the duration of the guard.
	/// Bounded so a wedged host RPC surfaces as a timeout rather than
	/// starving every other duty cycle indefinitely.
	async fn acquire_host(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, CoreError> {
		tokio::time::timeout(HOST_CALL_TIMEOUT, self.host_lock.lock())
			.await
			.map_err(|_| CoreError::Timeout)
	}

	pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
		let gossip = tokio::spawn(self.clone().gossip_loop(shutdown.clone()));
		let antientropy = tokio::spawn(self.clone().antientropy_loop(shutdown.clone()));
		let intents = tokio::spawn(self.clone().intent_monitor_loop(shutdown.clone()));
		let membership = tokio::spawn(self.clone().membership_loop(shutdown.clone()));
		let planner = tokio::spawn(self.clone().planner_loop(shutdown.clone()));
		let settlement = tokio::spawn(self.clone().settlement_loop(shutdown));

		let _ = tokio::join!(gossip, antientropy, intents, membership, planner, settlement);
	}

	async fn gossip_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		loop {
			let interval = Duration::from_secs(self.config.snapshot().heartbeat_interval_s);
			if let Err(e) = self.gossip_tick().await {
				warn!("scheduler: gossip tick failed: {}", e);
			}
			if !wait(interval, &mut shutdown).await {
				info!("scheduler: gossip loop shutting down");
				return;
			}
		}
	}

	async fn gossip_tick(&self) -> Result<(), CoreError> {
		let config = self.config.snapshot();
		let gossip = Gossip::new(&self.store, &self.identity);

		self.uptime_ticks.fetch_add(1, Ordering::Relaxed);
		let guard = self.acquire_host().await?;
		self.uptime_healthy_ticks.fetch_add(1, Ordering::Relaxed);
		let info = self.host.node_info().await;
		let (_, total_fees) = self.host.forwards_since(0).await;
		drop(guard);

		let snapshot = StateRecord {
			node_id: config.node_id.clone(),
			version: 0,
			updated_at: unix_now(),
			channels: Vec::new(),
			capacity_msat: info.capacity_msat,
			uptime_pct: self.uptime_pct(),
			total_fees_msat: total_fees,
		};
		let record = gossip.refresh_own_state(&config.node_id, &snapshot)?;
		let update = Gossip::build_state_update(&config.node_id, &record, unix_now());
		self.broadcast(MessageKind::StateUpdate, &update).await
	}

	async fn antientropy_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		loop {
			let interval = Duration::from_secs(self.config.snapshot().antientropy_interval_s);
			if let Err(e) = self.antientropy_tick().await {
				warn!("scheduler: anti-entropy tick failed: {}", e);
			}
			if !wait(interval, &mut shutdown).await {
				info!("scheduler: anti-entropy loop shutting down");
				return;
			}
		}
	}

	async fn antientropy_tick(&self) -> Result<(), CoreError> {
		let config = self.config.snapshot();
		let gossip = Gossip::new(&self.store, &self.identity);
		let req = gossip.build_state_req(&config.node_id, unix_now())?;
		self.broadcast(MessageKind::StateReq, &req).await
	}

	async fn intent_monitor_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		loop {
			if let Err(e) = self.intent_monitor_tick().await {
				warn!("scheduler: intent monitor tick failed: {}", e);
			}
			if !wait(Duration::from_secs(1), &mut shutdown).await {
				info!("scheduler: intent monitor loop shutting down");
				return;
			}
		}
	}

	async fn intent_monitor_tick(&self) -> Result<(), CoreError> {
		let config = self.config.snapshot();
		let lock = IntentLock::new(&self.store, &self.identity);
		let now = unix_now();

		if !matches!(config.governance_mode, GovernanceMode::Advisor) {
			self.commit_won_intents(&lock, &config, now).await?;
		}

		let swept = lock.sweep_expired(now - 2 * config.intent_wait_s as i64, config.intent_wait_s)?;
		if swept > 0 {
			debug!("scheduler: expired {} stale intents", swept);
		}
		Ok(())
	}

	/// The active side of Announce -> Wait -> Commit (spec §4.5): once the
	/// wait window on an intent this node owns has elapsed, commit it if it
	/// won the tie-break and, for an open-channel intent, invoke the actual
	/// channel open.
	async fn commit_won_intents(
		&self, lock: &IntentLock<'_>, config: &Config, now: i64,
	) -> Result<(), CoreError> {
		let own_pending: Vec<_> = self
			.store
			.list_intents()?
			.into_iter()
			.filter(|i| {
				i.owner == config.node_id && i.state == IntentState::Announced && i.commit_deadline <= now
			})
			.collect();

		for intent in own_pending {
			match lock.commit(&intent.intent_id, &intent.subject, now) {
				Ok(commit) => {
					info!("scheduler: committed intent {} for subject {}", intent.intent_id, intent.subject);
					self.broadcast(MessageKind::IntentCommit, &commit).await?;
					if intent.kind == "open_channel" {
						self.open_channel_for(&intent.subject, config).await?;
					}
				},
				Err(CoreError::IntentConflict) => {
					debug!("scheduler: intent {} lost the tie-break", intent.intent_id);
				},
				Err(e) => warn!("scheduler: failed to commit intent {}: {}", intent.intent_id, e),
			}
		}
		Ok(())
	}

	async fn open_channel_for(&self, target: &str, config: &Config) -> Result<(), CoreError> {
		let guard = self.acquire_host().await?;
		let result = self.host.open_channel(target, config.per_channel_cap_sat.saturating_mul(1000)).await;
		drop(guard);
		match result {
			Ok(()) => {
				info!("scheduler: opened channel toward {}", target);
				Ok(())
			},
			Err(e) => {
				warn!("scheduler: host failed to open channel toward {}: {}", target, e);
				Err(CoreError::MalformedMessage(e))
			},
		}
	}

	async fn membership_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		loop {
			if let Err(e) = self.membership_tick().await {
				warn!("scheduler: membership tick failed: {}", e);
			}
			if !wait(Duration::from_secs(60), &mut shutdown).await {
				info!("scheduler: membership loop shutting down");
				return;
			}
		}
	}

	async fn membership_tick(&self) -> Result<(), CoreError> {
		let now = unix_now();
		let pruned = self.store.prune_rate_counters(now - 2 * 86_400)?;
		if pruned > 0 {
			debug!("scheduler: pruned {} stale rate-limit counters", pruned);
		}
		self.handshake_unverified_peers(now).await
	}

	/// Proactively handshake any transport-connected peer this node hasn't
	/// yet verified (spec §8 scenario 1) -- without this, a peer that never
	/// happens to initiate its own handshake stays forever unauthenticated.
	async fn handshake_unverified_peers(&self, now: i64) -> Result<(), CoreError> {
		let guard = self.acquire_host().await?;
		let peers = self.host.list_peers().await;
		for peer in peers.into_iter().filter(|p| p.is_connected) {
			if self.identity.is_verified(&peer.node_id) {
				continue;
			}
			match self.identity.begin_handshake(&peer.node_id, self.host.as_ref(), now).await {
				Ok(req) => {
					let payload = serde_json::to_vec(&req).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
					let framed = crate::codec::encode(MessageKind::HandshakeReq, &payload);
					if let Err(e) = self.host.send_custom_message(&peer.node_id, framed).await {
						warn!("scheduler: failed to send handshake to {}: {}", peer.node_id, e);
					}
				},
				Err(e) => warn!("scheduler: failed to begin handshake with {}: {}", peer.node_id, e),
			}
		}
		drop(guard);
		Ok(())
	}

	async fn planner_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		loop {
			if let Err(e) = self.planner_tick().await {
				warn!("scheduler: planner tick failed: {}", e);
			}
			if !wait(Duration::from_secs(600), &mut shutdown).await {
				info!("scheduler: planner loop shutting down");
				return;
			}
		}
	}

	/// Consider opening new Cooperative Expansion rounds against candidate
	/// targets surfaced via `PEER_AVAILABLE` gossip, skipping any target
	/// this node already holds more than 20% of known capacity toward, and
	/// logging (not erroring) any target skipped for budget reasons, capped
	/// at 5 logged skips per cycle to avoid flooding logs during a cold
	/// start with many simultaneous candidates.
	async fn planner_tick(&self) -> Result<(), CoreError> {
		let config = self.config.snapshot();
		if matches!(config.governance_mode, GovernanceMode::Advisor) {
			debug!("scheduler: planner tick skipped, governance mode is advisor");
			return Ok(());
		}

		let expansion = Expansion::new(&self.store, &self.identity);
		let records = self.store.list_state_records()?;
		let total_capacity: u64 = records.iter().map(|r| r.capacity_msat).sum();

		let mut skipped = 0usize;
		for record in &records {
			if record.node_id == config.node_id {
				continue;
			}
			let share_pct =
				if total_capacity == 0 { 0.0 } else { record.capacity_msat as f64 / total_capacity as f64 * 100.0 };
			if share_pct > PER_TARGET_MARKET_SHARE_CAP_PCT {
				if skipped < MAX_PLANNER_SKIPS_PER_CYCLE {
					debug!(
						"scheduler: skipping expansion toward {}, already at {:.1}% market share",
						record.node_id, share_pct
					);
					skipped += 1;
				}
				continue;
			}
			match expansion.open_round(
				&record.node_id,
				config.max_active_rounds,
				config.expansion_cooldown_s as i64,
				unix_now(),
			) {
				Ok(round) => {
					info!("scheduler: opened expansion round {} for {}", round.round_id, record.node_id);
					if let Err(e) = self.nominate_self(&round, &config, total_capacity).await {
						warn!("scheduler: failed to self-nominate for round {}: {}", round.round_id, e);
					}
				},
				Err(CoreError::BudgetExceeded) => break,
				Err(CoreError::IntentConflict) => continue,
				Err(e) => warn!("scheduler: failed to open expansion round for {}: {}", record.node_id, e),
			}
		}

		self.elect_closed_rounds(&expansion, &config).await?;
		let swept = expansion.sweep_expired(unix_now())?;
		if swept > 0 {
			debug!("scheduler: expired {} stale expansion rounds", swept);
		}
		Ok(())
	}

	/// Broadcast this node's own candidacy to open the channel a freshly
	/// opened round is deciding, scored from data already on hand: headroom
	/// relative to known network capacity and this node's own uptime.
	/// `contribution_ratio` and `distinctness` have no tracked per-node
	/// signal yet, so they are reported as neutral fixed midpoints.
	async fn nominate_self(
		&self, round: &ExpansionRound, config: &Config, total_capacity: u64,
	) -> Result<(), CoreError> {
		let guard = self.acquire_host().await?;
		let info = self.host.node_info().await;
		drop(guard);

		let network_capacity = total_capacity + info.capacity_msat;
		let share_pct = if network_capacity == 0 {
			0.0
		} else {
			info.capacity_msat as f64 / network_capacity as f64 * 100.0
		};
		let score = NominationScore {
			capacity_headroom: (100.0 - share_pct).max(0.0),
			uptime_pct: self.uptime_pct() as f64,
			contribution_ratio: 50.0,
			distinctness: 50.0,
		};
		let nominate = ExpansionNominate {
			v: crate::codec::messages::SCHEMA_VERSION,
			from: config.node_id.clone(),
			ts: unix_now(),
			round_id: round.round_id.clone(),
			target: round.target.clone(),
			score,
			sig: String::new(),
		};
		self.broadcast(MessageKind::ExpansionNominate, &nominate).await
	}

	/// Elect a winner for every round whose nominating window has closed,
	/// broadcast the result, and if this node won, start the Intent Lock
	/// that actually drives the channel open (spec §4.7 -> §4.5).
	async fn elect_closed_rounds(&self, expansion: &Expansion<'_>, config: &Config) -> Result<(), CoreError> {
		let now = unix_now();
		for round in self.store.active_expansion_rounds()? {
			if round.state != ExpansionState::Nominating || round.deadline > now {
				continue;
			}
			let elect = match expansion.elect(&round.round_id, &config.node_id, now) {
				Ok(elect) => elect,
				Err(CoreError::QuorumFailure) => continue,
				Err(e) => {
					warn!("scheduler: failed to elect winner for round {}: {}", round.round_id, e);
					continue;
				},
			};
			info!("scheduler: round {} elected {} as winner", round.round_id, elect.winner);
			self.broadcast(MessageKind::ExpansionElect, &elect).await?;

			if elect.winner == config.node_id {
				let lock = IntentLock::new(&self.store, &self.identity);
				let announce =
					lock.announce(&config.node_id, IntentKind::OpenChannel, &round.target, config.intent_wait_s, now)?;
				info!("scheduler: announced open-channel intent for {}", round.target);
				self.broadcast(MessageKind::IntentAnnounce, &announce).await?;
			}
		}
		Ok(())
	}

	async fn settlement_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		loop {
			if let Err(e) = self.settlement_tick().await {
				warn!("scheduler: settlement tick failed: {}", e);
			}
			if !wait(Duration::from_secs(60), &mut shutdown).await {
				info!("scheduler: settlement loop shutting down");
				return;
			}
		}
	}

	async fn settlement_tick(&self) -> Result<(), CoreError> {
		let config = self.config.snapshot();
		let now = unix_now();
		let period_id = settlement::period_id_for(now);
		let previous_period_id = settlement::period_id_for(now - 7 * 86_400);
		let settlement_mod = Settlement::new(&self.store, &self.identity);

		let guard = self.acquire_host().await?;
		let (forwards_count, total_fees) = self.host.forwards_since(now - 7 * 86_400).await;
		drop(guard);

		if let Some(report) =
			settlement_mod.record_own_fee_report(&config.node_id, &period_id, forwards_count, total_fees, now)?
		{
			self.broadcast(MessageKind::FeeReport, &report).await?;
		}

		self.maybe_propose_settlement(&settlement_mod, &config, &previous_period_id, now).await?;
		self.maybe_execute_settlement(&settlement_mod, &config, &previous_period_id, now).await
	}

	/// The lowest `node_id` among current Members proposes each period's
	/// settlement, once, as soon as the period has elapsed. No leader
	/// election is needed: every member can independently compute the same
	/// deterministic proposer and stay quiet if it isn't them.
	async fn maybe_propose_settlement(
		&self, settlement_mod: &Settlement<'_>, config: &Config, period_id: &str, now: i64,
	) -> Result<(), CoreError> {
		if self.store.period_already_settled(period_id)? {
			return Ok(());
		}
		if self.store.get_settlement_round(period_id)?.is_some() {
			return Ok(());
		}

		let members: Vec<_> =
			self.store.list_members()?.into_iter().filter(|m| matches!(m.tier, Tier::Member)).collect();
		let Some(proposer) = members.iter().map(|m| m.node_id.clone()).min() else {
			return Ok(());
		};
		if proposer != config.node_id {
			return Ok(());
		}

		let reports = self.store.fee_reports_for_period(period_id)?;
		let total_pool: u64 = reports.iter().map(|r| r.total_fees_msat).sum();
		let pool = Settlement::compute_pool(&members, &reports, &config.settlement_weights, total_pool);
		let propose = settlement_mod.propose(&config.node_id, period_id, pool, now)?;
		info!("scheduler: proposed settlement for period {}", period_id);
		self.broadcast(MessageKind::SettlePropose, &propose).await
	}

	/// Once a round this node proposed reaches `Quorum`, execute payouts.
	/// Offers are resolved from each payee's advertised member metadata
	/// (key `"offer"`); members without one are skipped by `Settlement::execute`.
	async fn maybe_execute_settlement(
		&self, settlement_mod: &Settlement<'_>, config: &Config, period_id: &str, now: i64,
	) -> Result<(), CoreError> {
		let Some(round) = self.store.get_settlement_round(period_id)? else {
			return Ok(());
		};
		if round.state != SettlementState::Quorum || round.proposer != config.node_id {
			return Ok(());
		}

		let members = self.store.list_members()?;
		let offer_for = move |node_id: &str| -> Option<String> {
			members.iter().find(|m| m.node_id == node_id).and_then(|m| m.metadata.get("offer").cloned())
		};
		let guard = self.acquire_host().await?;
		let receipts =
			settlement_mod.execute(period_id, &config.node_id, self.host.as_ref(), now, offer_for).await?;
		drop(guard);
		for receipt in receipts {
			self.broadcast(MessageKind::SettleExecute, &receipt).await?;
		}
		Ok(())
	}

	async fn broadcast<T: serde::Serialize>(&self, kind: MessageKind, msg: &T) -> Result<(), CoreError> {
		let payload = serde_json::to_vec(msg).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
		let framed = crate::codec::encode(kind, &payload);

		let guard = self.acquire_host().await?;
		let peers = self.host.list_peers().await;
		for peer in peers.into_iter().filter(|p| p.is_connected) {
			if let Err(e) = self.host.send_custom_message(&peer.node_id, framed.clone()).await {
				warn!("scheduler: failed to send to {}: {}", peer.node_id, e);
			}
		}
		drop(guard);
		Ok(())
	}
}

fn unix_now() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.expect("system clock before epoch")
		.as_secs() as i64
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{load_config, ArgsConfig};
	use crate::host::{NodeInfo, PeerInfo};
	use async_trait::async_trait;
	use std::path::Path;

	struct CountingHost {
		sent: std::sync::atomic::AtomicU32,
	}

	#[async_trait]
	impl Host for CountingHost {
		async fn send_custom_message(&self, _peer_id: &str, _bytes: Vec<u8>) -> Result<(), String> {
			self.sent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			Ok(())
		}
		async fn sign_message(&self, _text: &str) -> Result<String, String> {
			Ok("sig".to_string())
		}
		async fn verify_message(&self, _text: &str, _signature: &str, _claimed_pubkey: &str) -> bool {
			true
		}
		async fn list_peers(&self) -> Vec<PeerInfo> {
			vec![PeerInfo { node_id: "b".repeat(66), is_connected: true }]
		}
		async fn open_channel(&self, _peer_id: &str, _amount_msat: u64) -> Result<(), String> {
			Ok(())
		}
		async fn pay_offer(&self, _offer: &str, _amount_msat: u64) -> Result<(), String> {
			Ok(())
		}
		async fn node_info(&self) -> NodeInfo {
			NodeInfo { node_id: "a".repeat(66), capacity_msat: 1000 }
		}
		async fn forwards_since(&self, _since_unix_secs: i64) -> (u64, u64) {
			(3, 500)
		}
	}

	fn test_config_manager() -> Arc<ConfigManager> {
		let args = ArgsConfig {
			config_file: None,
			node_id: Some("a".repeat(66)),
			rest_service_address: Some("127.0.0.1:9700".to_string()),
			db_path: Some(":memory:".to_string()),
			governance_mode: Some("autonomous".to_string()),
			check_config: false,
		};
		Arc::new(ConfigManager::new(load_config(&args).unwrap()))
	}

	#[tokio::test]
	async fn test_gossip_tick_broadcasts_to_connected_peers() {
		let store = Arc::new(Store::open(Path::new(":memory:")).unwrap());
		let identity = Arc::new(IdentityVerifier::new());
		let host = Arc::new(CountingHost { sent: std::sync::atomic::AtomicU32::new(0) });
		let config = test_config_manager();
		let scheduler = Scheduler::new(store, identity, host.clone(), config);

		scheduler.gossip_tick().await.unwrap();
		assert_eq!(host.sent.load(std::sync::atomic::Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_wait_returns_false_immediately_after_shutdown() {
		let (tx, mut rx) = watch::channel(false);
		tx.send(true).unwrap();
		let continued = wait(Duration::from_secs(3600), &mut rx).await;
		assert!(!continued);
	}

	#[tokio::test]
	async fn test_planner_respects_market_share_cap() {
		let store = Arc::new(Store::open(Path::new(":memory:")).unwrap());
		let identity = Arc::new(IdentityVerifier::new());
		let host = Arc::new(CountingHost { sent: std::sync::atomic::AtomicU32::new(0) });
		let config = test_config_manager();
		let scheduler = Scheduler::new(store.clone(), identity, host, config);

		store
			.put_state_record(&StateRecord {
				node_id: "b".repeat(66),
				version: 1,
				updated_at: 0,
				channels: Vec::new(),
				capacity_msat: 900,
				uptime_pct: 100,
				total_fees_msat: 0,
			})
			.unwrap();
		store
			.put_state_record(&StateRecord {
				node_id: "c".repeat(66),
				version: 1,
				updated_at: 0,
				channels: Vec::new(),
				capacity_msat: 100,
				uptime_pct: 100,
				total_fees_msat: 0,
			})
			.unwrap();

		scheduler.planner_tick().await.unwrap();
		// "b" holds 90% market share and must be skipped; "c" holds 10% and
		// should get an expansion round opened.
		assert!(store.active_expansion_rounds().unwrap().iter().any(|r| r.target == "c".repeat(66)));
		assert!(!store.active_expansion_rounds().unwrap().iter().any(|r| r.target == "b".repeat(66)));
	}
}
