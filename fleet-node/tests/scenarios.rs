// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! End-to-end scenarios spanning multiple coordination components, each
//! driven through a pair of independent [`Store`]s standing in for two
//! fleet members exchanging messages directly (no transport layer).

use std::path::Path;

use async_trait::async_trait;
use fleet_node::codec::messages::IntentKind;
use fleet_node::config::{Config, GovernanceMode, RateLimitsConfig};
use fleet_node::executor::{Executor, ExecutorBridge, RebalanceStatus};
use fleet_node::host::{Host, NodeInfo, PeerInfo};
use fleet_node::identity::IdentityVerifier;
use fleet_node::intent::IntentLock;
use fleet_node::membership::Membership;
use fleet_node::settlement::Settlement;
use fleet_node::store::models::{Member, Tier};
use fleet_node::store::Store;

struct NoopHost {
	node_id: String,
}

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
		NodeInfo { node_id: self.node_id.clone(), capacity_msat: 0 }
	}
	async fn forwards_since(&self, _since_unix_secs: i64) -> (u64, u64) {
		(0, 0)
	}
}

fn node_id(tag: u8) -> String {
	format!("{:02x}", tag).repeat(33)
}

fn test_config(node_id: String) -> Config {
	Config {
		node_id,
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
async fn test_vouch_quorum_promotes_neophyte_to_member() {
	let store = Store::open(Path::new(":memory:")).unwrap();
	let identity = IdentityVerifier::new();
	let membership = Membership::new(&store, &identity);
	let host = NoopHost { node_id: node_id(0) };
	let config = test_config(node_id(0));

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

	let subject = node_id(9);
	let make_vouch = |from: u8| fleet_node::codec::messages::Vouch {
		v: fleet_node::codec::messages::SCHEMA_VERSION,
		from: node_id(from),
		ts: 1,
		subject: subject.clone(),
		sig: "sig".to_string(),
	};

	membership.handle_vouch(&make_vouch(1), &node_id(1), &config, &host, 10).await.unwrap();
	assert_eq!(membership.tier_of(&subject).unwrap(), Some(Tier::Neophyte));

	// quorum = ceil(0.51 * 3) = 2
	membership.handle_vouch(&make_vouch(2), &node_id(2), &config, &host, 11).await.unwrap();
	assert_eq!(membership.tier_of(&subject).unwrap(), Some(Tier::Member));
}

#[tokio::test]
async fn test_competing_intents_resolve_to_the_same_winner_on_both_sides() {
	let store_a = Store::open(Path::new(":memory:")).unwrap();
	let store_b = Store::open(Path::new(":memory:")).unwrap();
	let identity_a = IdentityVerifier::new();
	let identity_b = IdentityVerifier::new();
	let lock_a = IntentLock::new(&store_a, &identity_a);
	let lock_b = IntentLock::new(&store_b, &identity_b);
	let host_a = NoopHost { node_id: node_id(1) };
	let host_b = NoopHost { node_id: node_id(2) };

	let subject = node_id(9);
	let announce_a =
		lock_a.announce(&node_id(1), IntentKind::OpenChannel, &subject, 10, 100).unwrap();
	let announce_b =
		lock_b.announce(&node_id(2), IntentKind::OpenChannel, &subject, 10, 100).unwrap();

	// Cross-pollinate: each side learns about the other's announcement.
	lock_a.handle_announce(&announce_b, &node_id(2), 200, &host_a).await.unwrap();
	lock_b.handle_announce(&announce_a, &node_id(1), 200, &host_b).await.unwrap();

	let a_wins_on_a = lock_a.is_winner(&announce_a.intent_id, &subject).unwrap();
	let a_wins_on_b = lock_b.is_winner(&announce_a.intent_id, &subject).unwrap();
	assert_eq!(a_wins_on_a, a_wins_on_b, "both stores must agree on the tie-break winner");

	let b_wins_on_a = lock_a.is_winner(&announce_b.intent_id, &subject).unwrap();
	assert_ne!(a_wins_on_a, b_wins_on_a, "exactly one of the two competing intents wins");
}

#[tokio::test]
async fn test_settlement_round_progresses_from_propose_to_settled() {
	let store = Store::open(Path::new(":memory:")).unwrap();
	let identity = IdentityVerifier::new();
	let settlement = Settlement::new(&store, &identity);
	let host = NoopHost { node_id: node_id(1) };

	let members = vec![
		Member {
			node_id: node_id(1),
			tier: Tier::Member,
			first_seen: 0,
			last_seen: 0,
			vouch_count: 0,
			capacity_msat: 1_000_000,
			uptime_pct: 100,
			contribution_ratio: 0.0,
			metadata: Default::default(),
		},
		Member {
			node_id: node_id(2),
			tier: Tier::Member,
			first_seen: 0,
			last_seen: 0,
			vouch_count: 0,
			capacity_msat: 1_000_000,
			uptime_pct: 100,
			contribution_ratio: 0.0,
			metadata: Default::default(),
		},
	];

	let period_id = "2026-W05".to_string();
	let pool = Settlement::compute_pool(&members, &[], &Default::default(), 1_000);
	assert_eq!(pool.values().sum::<u64>(), 1_000);

	settlement.propose(&node_id(1), &period_id, pool.clone(), 1000).unwrap();
	settlement.handle_vote(
		&settlement.vote(&period_id, &node_id(1), 1001).unwrap(),
		&node_id(1),
		2,
		&host,
	).await.unwrap();
	settlement.handle_vote(
		&settlement.vote(&period_id, &node_id(2), 1002).unwrap(),
		&node_id(2),
		2,
		&host,
	).await.unwrap();

	let round = store.get_settlement_round(&period_id).unwrap().unwrap();
	assert_eq!(round.state, fleet_node::store::models::SettlementState::Quorum);

	let receipts =
		settlement.execute(&period_id, &node_id(1), &host, 1003, |_node_id| Some("offer".to_string())).await.unwrap();
	assert_eq!(receipts.len(), 1, "only the non-payer member gets a payout");

	let round = store.get_settlement_round(&period_id).unwrap().unwrap();
	assert_eq!(round.state, fleet_node::store::models::SettlementState::Settled);
}

struct FailingExecutor;

#[async_trait]
impl Executor for FailingExecutor {
	async fn apply_fee_policy(&self, _channel: &str, _policy_json: &str) -> Result<(), String> {
		Err("always fails".to_string())
	}
	async fn request_rebalance(
		&self, _from: &str, _to: &str, _amount_msat: u64,
	) -> Result<(), String> {
		Err("always fails".to_string())
	}
	async fn get_status(&self) -> Result<RebalanceStatus, String> {
		Ok(RebalanceStatus { in_flight: 0 })
	}
}

#[tokio::test]
async fn test_circuit_breaker_opens_after_repeated_failures() {
	let bridge = ExecutorBridge::new(FailingExecutor);
	for _ in 0..3 {
		assert!(bridge.apply_fee_policy("chan", "{}").await.is_err());
	}
	// The fourth attempt should be rejected locally by the open breaker
	// rather than dispatched to the (still failing) executor.
	let err = bridge.apply_fee_policy("chan", "{}").await.unwrap_err();
	assert_eq!(err.code(), "executor_unavailable");
}
