// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Composition root wiring the Store, Host, Executor, Scheduler, and RPC
//! layer together into a single handle the binary entrypoint drives.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{Config, ConfigManager};
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::executor::{Executor, ExecutorBridge};
use crate::host::Host;
use crate::identity::IdentityVerifier;
use crate::rpc::{RpcContext, RpcService};
use crate::scheduler::Scheduler;
use crate::store::Store;

/// The coordination core for one fleet member. Every field is `Arc`-backed
/// so `FleetNode` itself is cheap to clone into the RPC service and the
/// inbound-message accept loop.
#[derive(Clone)]
pub struct FleetNode {
	pub store: Arc<Store>,
	pub identity: Arc<IdentityVerifier>,
	pub host: Arc<dyn Host>,
	pub executor: Arc<ExecutorBridge<Box<dyn Executor>>>,
	pub config: Arc<ConfigManager>,
	pub scheduler: Arc<Scheduler>,
}

impl FleetNode {
	/// Open the store at `config.db_path` and wire every component behind
	/// it. `db_path` is immutable for the node's lifetime; later
	/// `ConfigManager::reload` calls reject attempts to change it.
	pub fn new(
		config: Config, host: Arc<dyn Host>, executor: Box<dyn Executor>,
	) -> Result<Self, CoreError> {
		let store = Arc::new(Store::open(&config.db_path)?);
		let identity = Arc::new(IdentityVerifier::new());
		let executor = Arc::new(ExecutorBridge::new(executor));
		let config = Arc::new(ConfigManager::new(config));
		let scheduler = Arc::new(Scheduler::new(
			Arc::clone(&store),
			Arc::clone(&identity),
			Arc::clone(&host),
			Arc::clone(&config),
		));
		Ok(Self { store, identity, host, executor, config, scheduler })
	}

	/// Hand one inbound buffer from `peer_id` to the dispatcher. Never
	/// returns an error -- protocol-level failures are logged and dropped.
	pub async fn handle_inbound(&self, peer_id: &str, bytes: &[u8], now: i64) {
		let snapshot = self.config.snapshot();
		let dispatcher = Dispatcher::new(&self.store, &self.identity, self.host.as_ref());
		dispatcher.handle_inbound(peer_id, bytes, &snapshot, now).await;
	}

	/// A cheaply-cloned bundle of this node's `Arc` handles for the RPC
	/// service to dispatch against.
	pub fn rpc_context(&self) -> RpcContext {
		RpcContext {
			store: Arc::clone(&self.store),
			identity: Arc::clone(&self.identity),
			host: Arc::clone(&self.host),
			executor: Arc::clone(&self.executor),
			config: Arc::clone(&self.config),
		}
	}

	pub fn rpc_service(&self) -> RpcService {
		RpcService::new(self.rpc_context())
	}

	/// Run the background duty cycles until `shutdown` fires. Returns once
	/// every loop has observed the signal and joined.
	pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
		Arc::clone(&self.scheduler).run(shutdown).await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{load_config, ArgsConfig};
	use crate::executor::RebalanceStatus;
	use crate::host::{NodeInfo, PeerInfo};
	use async_trait::async_trait;

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

	struct NoopExecutor;

	#[async_trait]
	impl Executor for NoopExecutor {
		async fn apply_fee_policy(&self, _channel: &str, _policy_json: &str) -> Result<(), String> {
			Ok(())
		}
		async fn request_rebalance(
			&self, _from: &str, _to: &str, _amount_msat: u64,
		) -> Result<(), String> {
			Ok(())
		}
		async fn get_status(&self) -> Result<RebalanceStatus, String> {
			Ok(RebalanceStatus { in_flight: 0 })
		}
	}

	fn test_config() -> Config {
		load_config(&ArgsConfig {
			config_file: None,
			node_id: Some("a".repeat(66)),
			rest_service_address: Some("127.0.0.1:9700".to_string()),
			db_path: Some(":memory:".to_string()),
			governance_mode: Some("autonomous".to_string()),
			check_config: false,
		})
		.unwrap()
	}

	#[tokio::test]
	async fn test_node_wires_up_and_handles_malformed_inbound_without_panicking() {
		let node = FleetNode::new(test_config(), Arc::new(NoopHost), Box::new(NoopExecutor)).unwrap();
		node.handle_inbound(&"b".repeat(66), b"garbage", 1000).await;
		assert!(node.store.get_member(&"b".repeat(66)).unwrap().is_none());
	}

	#[tokio::test]
	async fn test_rpc_context_shares_the_same_store() {
		let node = FleetNode::new(test_config(), Arc::new(NoopHost), Box::new(NoopExecutor)).unwrap();
		let ctx = node.rpc_context();
		assert!(Arc::ptr_eq(&ctx.store, &node.store));
	}
}
