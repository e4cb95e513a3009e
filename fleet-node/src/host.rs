//! The host interface consumed by the core (spec §6).
//!
//! The host node signs and transports custom messages, opens channels, and
//! pays offers. The core never talks to a wire transport directly — it
//! calls through this trait, which a real plugin host implements and tests
//! substitute with an in-memory double.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
	pub node_id: String,
	pub is_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
	pub node_id: String,
	pub capacity_msat: u64,
}

/// Operations the coordination core requires from the host node.
///
/// RPC calls through this trait are expected to be serialized by the caller
/// (the Scheduler) through a single lock with a bounded acquisition timeout,
/// per spec §4.10, to avoid host-side reentrancy hazards.
#[async_trait]
pub trait Host: Send + Sync {
	/// Send a framed custom message to `peer_id`. Errors are host-transport
	/// failures (peer disconnected, etc.), never protocol-level rejections.
	async fn send_custom_message(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), String>;

	/// Sign `text` with the host's long-term node key.
	async fn sign_message(&self, text: &str) -> Result<String, String>;

	/// Verify `signature` over `text` under `claimed_pubkey`.
	async fn verify_message(&self, text: &str, signature: &str, claimed_pubkey: &str) -> bool;

	/// List peers currently known to the host's transport layer.
	async fn list_peers(&self) -> Vec<PeerInfo>;

	/// Open a channel of `amount` (msat) to `peer_id`.
	async fn open_channel(&self, peer_id: &str, amount_msat: u64) -> Result<(), String>;

	/// Pay a BOLT11/BOLT12-class offer string for `amount` msat.
	async fn pay_offer(&self, offer: &str, amount_msat: u64) -> Result<(), String>;

	/// This node's own identity and capacity snapshot.
	async fn node_info(&self) -> NodeInfo;

	/// Total fees forwarded since `since_unix_secs`.
	async fn forwards_since(&self, since_unix_secs: i64) -> (u64, u64);
}
