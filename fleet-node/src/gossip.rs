// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! State Map & Gossip (spec §4.4).
//!
//! Each node owns exactly one [`crate::store::models::StateRecord`], whose
//! `version` increments only when its content hash changes. Outbound
//! `STATE_UPDATE`s are emitted when the node's own capacity moves by more
//! than the configured relative threshold, on a periodic heartbeat, or in
//! response to a `STATE_REQ`. Inbound updates are merged only if
//! `incoming.version` is strictly greater than the version already stored
//! for that owner.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use log::{debug, warn};

use crate::codec::messages::{ChannelSummary, StateReq, StateUpdate};
use crate::error::CoreError;
use crate::host::Host;
use crate::identity::IdentityVerifier;
use crate::store::models::StateRecord;
use crate::store::Store;

pub struct Gossip<'a> {
	store: &'a Store,
	identity: &'a IdentityVerifier,
}

fn content_hash(channels: &[ChannelSummary], capacity_msat: u64, uptime_pct: u8, fees: u64) -> u64 {
	let mut hasher = DefaultHasher::new();
	capacity_msat.hash(&mut hasher);
	uptime_pct.hash(&mut hasher);
	fees.hash(&mut hasher);
	for c in channels {
		c.channel_id.hash(&mut hasher);
		c.local_balance_msat.hash(&mut hasher);
		c.capacity_msat.hash(&mut hasher);
	}
	hasher.finish()
}

impl<'a> Gossip<'a> {
	pub fn new(store: &'a Store, identity: &'a IdentityVerifier) -> Self {
		Self { store, identity }
	}

	/// Recompute this node's own state from the host's live view, bumping
	/// `version` only if the content actually changed. Returns the record to
	/// gossip when the caller decides an emission is warranted.
	pub fn refresh_own_state(&self, node_id: &str, host_snapshot: &StateRecord) -> Result<StateRecord, CoreError> {
		let existing = self.store.get_state_record(node_id)?;
		let new_hash = content_hash(
			&host_snapshot.channels,
			host_snapshot.capacity_msat,
			host_snapshot.uptime_pct,
			host_snapshot.total_fees_msat,
		);
		let record = match existing {
			Some(prev) => {
				let prev_hash = content_hash(
					&prev.channels,
					prev.capacity_msat,
					prev.uptime_pct,
					prev.total_fees_msat,
				);
				if prev_hash == new_hash {
					prev
				} else {
					StateRecord { version: prev.version + 1, ..host_snapshot.clone() }
				}
			},
			None => StateRecord { version: 1, ..host_snapshot.clone() },
		};
		self.store.put_state_record(&record)?;
		Ok(record)
	}

	/// True if `current` deviates from `previous` capacity by more than
	/// `threshold_pct` (relative), the emission trigger named in spec §4.4.
	pub fn exceeds_threshold(previous_capacity_msat: u64, current_capacity_msat: u64, threshold_pct: f64) -> bool {
		if previous_capacity_msat == 0 {
			return current_capacity_msat != 0;
		}
		let delta = (current_capacity_msat as f64 - previous_capacity_msat as f64).abs();
		let relative = delta / previous_capacity_msat as f64 * 100.0;
		relative > threshold_pct
	}

	pub fn build_state_update(node_id: &str, record: &StateRecord, now: i64) -> StateUpdate {
		StateUpdate {
			v: crate::codec::messages::SCHEMA_VERSION,
			from: node_id.to_string(),
			ts: now,
			version: record.version,
			channels: record.channels.clone(),
			capacity_msat: record.capacity_msat,
			uptime_pct: record.uptime_pct,
			total_fees_msat: record.total_fees_msat,
			sig: String::new(),
		}
	}

	/// Merge an inbound, already-signed `STATE_UPDATE`. Rejects stale or
	/// equal versions silently (this is normal gossip redundancy, not a
	/// protocol violation) and only persists a strictly newer version.
	pub async fn handle_state_update(
		&self, update: &StateUpdate, transport_peer_id: &str, host: &dyn Host,
	) -> Result<bool, CoreError> {
		self.identity.verify_signed(&update.from, &update.sig, transport_peer_id, update, host).await?;

		let existing = self.store.get_state_record(&update.from)?;
		if let Some(existing) = &existing {
			if update.version <= existing.version {
				debug!(
					"gossip: dropping stale state update from {} (incoming {} <= stored {})",
					update.from, update.version, existing.version
				);
				return Ok(false);
			}
		}

		self.store.put_state_record(&StateRecord {
			node_id: update.from.clone(),
			version: update.version,
			updated_at: update.ts,
			channels: update.channels.clone(),
			capacity_msat: update.capacity_msat,
			uptime_pct: update.uptime_pct,
			total_fees_msat: update.total_fees_msat,
		})?;
		Ok(true)
	}

	/// Build a `STATE_REQ` advertising the highest version known for every
	/// peer, for the anti-entropy sweep.
	pub fn build_state_req(&self, node_id: &str, now: i64) -> Result<StateReq, CoreError> {
		let mut since_versions = BTreeMap::new();
		for record in self.store.list_state_records()? {
			since_versions.insert(record.node_id, record.version);
		}
		Ok(StateReq { v: crate::codec::messages::SCHEMA_VERSION, from: node_id.to_string(), ts: now, since_versions })
	}

	/// Respond to a peer's `STATE_REQ` with every locally-held record whose
	/// version is newer than what the peer claims to already have.
	pub fn records_missing_for(&self, req: &StateReq) -> Result<Vec<StateRecord>, CoreError> {
		let mut out = Vec::new();
		for record in self.store.list_state_records()? {
			let known = req.since_versions.get(&record.node_id).copied().unwrap_or(0);
			if record.version > known {
				out.push(record);
			}
		}
		Ok(out)
	}

	pub fn warn_unknown_owner(&self, node_id: &str) {
		warn!("gossip: state update references unknown owner {}", node_id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
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

	#[test]
	fn test_threshold_detects_relative_move() {
		assert!(Gossip::exceeds_threshold(1_000_000, 1_200_000, 10.0));
		assert!(!Gossip::exceeds_threshold(1_000_000, 1_050_000, 10.0));
	}

	#[test]
	fn test_refresh_bumps_version_only_on_change() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let gossip = Gossip::new(&store, &identity);
		let node_id = "a".repeat(66);

		let snapshot = StateRecord {
			node_id: node_id.clone(),
			version: 0,
			updated_at: 1,
			channels: Vec::new(),
			capacity_msat: 1000,
			uptime_pct: 99,
			total_fees_msat: 0,
		};
		let r1 = gossip.refresh_own_state(&node_id, &snapshot).unwrap();
		assert_eq!(r1.version, 1);

		let r2 = gossip.refresh_own_state(&node_id, &snapshot).unwrap();
		assert_eq!(r2.version, 1, "unchanged content must not bump version");

		let mut changed = snapshot.clone();
		changed.capacity_msat = 2000;
		let r3 = gossip.refresh_own_state(&node_id, &changed).unwrap();
		assert_eq!(r3.version, 2);
	}

	#[tokio::test]
	async fn test_merge_rejects_stale_version() {
		let store = Store::open(Path::new(":memory:")).unwrap();
		let identity = IdentityVerifier::new();
		let gossip = Gossip::new(&store, &identity);
		let host = NoopHost;
		let owner = "b".repeat(66);

		let update_v2 = StateUpdate {
			v: 1,
			from: owner.clone(),
			ts: 1,
			version: 2,
			channels: Vec::new(),
			capacity_msat: 5000,
			uptime_pct: 100,
			total_fees_msat: 0,
			sig: "sig".to_string(),
		};
		assert!(gossip.handle_state_update(&update_v2, &owner, &host).await.unwrap());

		let update_v1 = StateUpdate { version: 1, ..update_v2.clone() };
		assert!(!gossip.handle_state_update(&update_v1, &owner, &host).await.unwrap());

		let stored = store.get_state_record(&owner).unwrap().unwrap();
		assert_eq!(stored.version, 2);
	}
}
