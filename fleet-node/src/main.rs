// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::Parser;
use fleet_node::config::{load_config, ArgsConfig};
use fleet_node::executor::{Executor, RebalanceStatus};
use fleet_node::host::{Host, NodeInfo, PeerInfo};
use fleet_node::node::FleetNode;
use fleet_node::rpc::RpcService;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use log::{error, info};
use tokio::net::TcpListener;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;

/// Placeholder [`Host`] used when the binary is run without a real plugin
/// transport wired in. The Host interface is consumed, not designed, by
/// this crate (spec non-goal); production deployments supply their own
/// adapter to an actual Lightning node instead of this one. Signing here
/// is a deterministic stand-in, not cryptographically meaningful.
struct StandaloneHost {
	node_id: String,
	peers: Mutex<HashMap<String, bool>>,
}

impl StandaloneHost {
	fn new(node_id: String) -> Self {
		Self { node_id, peers: Mutex::new(HashMap::new()) }
	}
}

#[async_trait]
impl Host for StandaloneHost {
	async fn send_custom_message(&self, peer_id: &str, _bytes: Vec<u8>) -> Result<(), String> {
		let connected =
			self.peers.lock().expect("peers lock poisoned").get(peer_id).copied().unwrap_or(false);
		if connected {
			Ok(())
		} else {
			Err(format!("{} is not connected", peer_id))
		}
	}

	async fn sign_message(&self, text: &str) -> Result<String, String> {
		Ok(format!("sig-of-{}-by-{}", text.len(), self.node_id))
	}

	async fn verify_message(&self, text: &str, signature: &str, claimed_pubkey: &str) -> bool {
		signature == format!("sig-of-{}-by-{}", text.len(), claimed_pubkey)
	}

	async fn list_peers(&self) -> Vec<PeerInfo> {
		self.peers
			.lock()
			.expect("peers lock poisoned")
			.iter()
			.map(|(node_id, &is_connected)| PeerInfo { node_id: node_id.clone(), is_connected })
			.collect()
	}

	async fn open_channel(&self, _peer_id: &str, _amount_msat: u64) -> Result<(), String> {
		Err("no transport configured: standalone host cannot open channels".to_string())
	}

	async fn pay_offer(&self, _offer: &str, _amount_msat: u64) -> Result<(), String> {
		Err("no transport configured: standalone host cannot pay offers".to_string())
	}

	async fn node_info(&self) -> NodeInfo {
		NodeInfo { node_id: self.node_id.clone(), capacity_msat: 0 }
	}

	async fn forwards_since(&self, _since_unix_secs: i64) -> (u64, u64) {
		(0, 0)
	}
}

struct StandaloneExecutor;

#[async_trait]
impl Executor for StandaloneExecutor {
	async fn apply_fee_policy(&self, channel: &str, policy_json: &str) -> Result<(), String> {
		info!("standalone executor: would apply fee policy to {}: {}", channel, policy_json);
		Ok(())
	}

	async fn request_rebalance(
		&self, from: &str, to: &str, amount_msat: u64,
	) -> Result<(), String> {
		info!("standalone executor: would rebalance {} msat from {} to {}", amount_msat, from, to);
		Ok(())
	}

	async fn get_status(&self) -> Result<RebalanceStatus, String> {
		Ok(RebalanceStatus { in_flight: 0 })
	}
}

fn main() {
	let args = ArgsConfig::parse();

	let config = match load_config(&args) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("invalid configuration: {}", e);
			std::process::exit(2);
		},
	};

	env_logger::Builder::new().filter_level(config.log_level).init();

	if args.check_config {
		println!("configuration OK: node_id={}, rest_service_addr={}", config.node_id, config.rest_service_addr);
		std::process::exit(0);
	}

	let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
		Ok(runtime) => runtime,
		Err(e) => {
			eprintln!("failed to start tokio runtime: {}", e);
			std::process::exit(1);
		},
	};

	let rest_service_addr = config.rest_service_addr;
	let host = Arc::new(StandaloneHost::new(config.node_id.clone()));

	let node = match FleetNode::new(config, host, Box::new(StandaloneExecutor)) {
		Ok(node) => Arc::new(node),
		Err(e) => {
			eprintln!("failed to initialize coordination core: {}", e);
			std::process::exit(1);
		},
	};

	runtime.block_on(async move {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);

		let scheduler_node = Arc::clone(&node);
		let scheduler_handle =
			tokio::spawn(async move { scheduler_node.run(shutdown_rx).await });

		let mut sigterm_stream = match tokio::signal::unix::signal(SignalKind::terminate()) {
			Ok(stream) => stream,
			Err(e) => {
				error!("failed to register SIGTERM handler: {}", e);
				std::process::exit(1);
			},
		};

		let listener = match TcpListener::bind(rest_service_addr).await {
			Ok(listener) => listener,
			Err(e) => {
				error!("failed to bind {}: {}", rest_service_addr, e);
				std::process::exit(1);
			},
		};
		info!("operator RPC listening on {}", rest_service_addr);

		loop {
			tokio::select! {
				res = listener.accept() => {
					match res {
						Ok((stream, peer_addr)) => {
							let io = TokioIo::new(stream);
							let service: RpcService = node.rpc_service();
							tokio::spawn(async move {
								if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
									error!("rpc connection from {} failed: {}", peer_addr, e);
								}
							});
						},
						Err(e) => error!("failed to accept rpc connection: {}", e),
					}
				},
				_ = tokio::signal::ctrl_c() => {
					info!("received CTRL-C, shutting down");
					break;
				},
				_ = sigterm_stream.recv() => {
					info!("received SIGTERM, shutting down");
					break;
				},
			}
		}

		let _ = shutdown_tx.send(true);
		if let Err(e) = scheduler_handle.await {
			error!("scheduler task panicked: {}", e);
		}
	});

	info!("shutdown complete");
}
