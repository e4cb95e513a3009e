// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Configuration loading and hot-reload.
//!
//! Layered the way `ldk-server` layers its config: a `TomlConfig` parsed
//! from disk, overlaid with CLI/env overrides via `ArgsConfig`, merged by a
//! `ConfigBuilder` into an immutable [`Config`]. Hot-reload publishes a new
//! `Config` behind an `ArcSwap` so in-flight duty cycles keep observing the
//! snapshot they started with.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::{fs, io};

use arc_swap::ArcSwap;
use clap::Parser;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Behavior variant consulted exactly once per action-producing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceMode {
	/// Record proposed actions as `pending_actions`; never invoke the executor.
	Advisor,
	/// Invoke the executor within budget and rate limits.
	Autonomous,
	/// Defer the binary go/no-go decision to an external oracle interface.
	Oracle,
}

impl FromStr for GovernanceMode {
	type Err = io::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"advisor" => Ok(GovernanceMode::Advisor),
			"autonomous" => Ok(GovernanceMode::Autonomous),
			"oracle" => Ok(GovernanceMode::Oracle),
			other => Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				format!("Unknown governance_mode '{}', expected advisor|autonomous|oracle", other),
			)),
		}
	}
}

impl fmt::Display for GovernanceMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			GovernanceMode::Advisor => "advisor",
			GovernanceMode::Autonomous => "autonomous",
			GovernanceMode::Oracle => "oracle",
		};
		write!(f, "{}", s)
	}
}

/// Settlement pool weighting, default `(0.30, 0.60, 0.10)` capacity/volume/uptime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SettlementWeights {
	pub capacity: f64,
	pub volume: f64,
	pub uptime: f64,
}

impl Default for SettlementWeights {
	fn default() -> Self {
		Self { capacity: 0.30, volume: 0.60, uptime: 0.10 }
	}
}

/// Fully resolved, immutable node configuration.
#[derive(Debug, Clone)]
pub struct Config {
	pub node_id: String,
	pub rest_service_addr: SocketAddr,
	pub db_path: PathBuf,
	pub governance_mode: GovernanceMode,
	pub gossip_threshold_pct: f64,
	pub heartbeat_interval_s: u64,
	pub antientropy_interval_s: u64,
	pub intent_wait_s: u64,
	pub intent_cache_max: usize,
	pub max_active_rounds: usize,
	pub expansion_cooldown_s: u64,
	pub vouch_quorum_pct: f64,
	pub settlement_weights: SettlementWeights,
	pub daily_budget_sat: u64,
	pub reserve_pct: f64,
	pub per_channel_cap_sat: u64,
	pub rate_limits: RateLimitsConfig,
	pub log_level: LevelFilter,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitsConfig {
	pub vouches_per_day: u32,
	pub ban_proposals_per_day: u32,
	pub handshakes_per_minute: u32,
	pub peer_available_per_minute: u32,
}

impl Default for RateLimitsConfig {
	fn default() -> Self {
		Self {
			vouches_per_day: 10,
			ban_proposals_per_day: 3,
			handshakes_per_minute: 6,
			peer_available_per_minute: 10,
		}
	}
}

/// TOML file schema. Unknown keys are rejected per-section (fail closed).
#[derive(Deserialize, Serialize, Default)]
pub struct TomlConfig {
	node: Option<NodeSection>,
	store: Option<StoreSection>,
	governance: Option<GovernanceSection>,
	gossip: Option<GossipSection>,
	intent: Option<IntentSection>,
	expansion: Option<ExpansionSection>,
	settlement: Option<SettlementSection>,
	rate_limits: Option<RateLimitsSection>,
	log: Option<LogSection>,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct NodeSection {
	node_id: String,
	rest_service_address: String,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct StoreSection {
	db_path: String,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct GovernanceSection {
	mode: Option<String>,
	daily_budget_sat: Option<u64>,
	reserve_pct: Option<f64>,
	per_channel_cap_sat: Option<u64>,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct GossipSection {
	threshold_pct: Option<f64>,
	heartbeat_interval_s: Option<u64>,
	antientropy_interval_s: Option<u64>,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct IntentSection {
	wait_s: Option<u64>,
	cache_max: Option<usize>,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ExpansionSection {
	max_active_rounds: Option<usize>,
	cooldown_s: Option<u64>,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct SettlementSection {
	vouch_quorum_pct: Option<f64>,
	weight_capacity: Option<f64>,
	weight_volume: Option<f64>,
	weight_uptime: Option<f64>,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RateLimitsSection {
	vouches_per_day: Option<u32>,
	ban_proposals_per_day: Option<u32>,
	handshakes_per_minute: Option<u32>,
	peer_available_per_minute: Option<u32>,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
	level: Option<String>,
}

/// CLI/env overrides, layered over the TOML file.
#[derive(Parser, Debug, Clone)]
#[command(version, about = "Fleet coordination core", long_about = None)]
pub struct ArgsConfig {
	#[arg(help = "Path to the TOML configuration file.")]
	pub config_file: Option<String>,

	#[arg(long, env = "FLEET_NODE_ID", help = "This node's long-term identity (hex pubkey).")]
	pub node_id: Option<String>,

	#[arg(long, env = "FLEET_REST_SERVICE_ADDRESS", help = "Operator RPC listen address.")]
	pub rest_service_address: Option<String>,

	#[arg(long, env = "FLEET_DB_PATH", help = "Path to the SQLite database file.")]
	pub db_path: Option<String>,

	#[arg(long, env = "FLEET_GOVERNANCE_MODE", help = "advisor|autonomous|oracle")]
	pub governance_mode: Option<String>,

	#[arg(long, help = "Validate the resolved configuration and exit.")]
	pub check_config: bool,
}

#[derive(Default)]
struct ConfigBuilder {
	node_id: Option<String>,
	rest_service_address: Option<String>,
	db_path: Option<String>,
	governance_mode: Option<String>,
	gossip_threshold_pct: Option<f64>,
	heartbeat_interval_s: Option<u64>,
	antientropy_interval_s: Option<u64>,
	intent_wait_s: Option<u64>,
	intent_cache_max: Option<usize>,
	max_active_rounds: Option<usize>,
	expansion_cooldown_s: Option<u64>,
	vouch_quorum_pct: Option<f64>,
	settlement_weights: SettlementWeights,
	daily_budget_sat: Option<u64>,
	reserve_pct: Option<f64>,
	per_channel_cap_sat: Option<u64>,
	rate_limits: RateLimitsConfig,
	log_level: Option<String>,
}

impl ConfigBuilder {
	fn merge_toml(&mut self, toml: TomlConfig) {
		if let Some(node) = toml.node {
			self.node_id = Some(node.node_id);
			self.rest_service_address = Some(node.rest_service_address);
		}
		if let Some(store) = toml.store {
			self.db_path = Some(store.db_path);
		}
		if let Some(gov) = toml.governance {
			self.governance_mode = gov.mode.or(self.governance_mode.clone());
			self.daily_budget_sat = gov.daily_budget_sat.or(self.daily_budget_sat);
			self.reserve_pct = gov.reserve_pct.or(self.reserve_pct);
			self.per_channel_cap_sat = gov.per_channel_cap_sat.or(self.per_channel_cap_sat);
		}
		if let Some(gossip) = toml.gossip {
			self.gossip_threshold_pct = gossip.threshold_pct.or(self.gossip_threshold_pct);
			self.heartbeat_interval_s = gossip.heartbeat_interval_s.or(self.heartbeat_interval_s);
			self.antientropy_interval_s =
				gossip.antientropy_interval_s.or(self.antientropy_interval_s);
		}
		if let Some(intent) = toml.intent {
			self.intent_wait_s = intent.wait_s.or(self.intent_wait_s);
			self.intent_cache_max = intent.cache_max.or(self.intent_cache_max);
		}
		if let Some(expansion) = toml.expansion {
			self.max_active_rounds = expansion.max_active_rounds.or(self.max_active_rounds);
			self.expansion_cooldown_s = expansion.cooldown_s.or(self.expansion_cooldown_s);
		}
		if let Some(settlement) = toml.settlement {
			self.vouch_quorum_pct = settlement.vouch_quorum_pct.or(self.vouch_quorum_pct);
			if let Some(c) = settlement.weight_capacity {
				self.settlement_weights.capacity = c;
			}
			if let Some(v) = settlement.weight_volume {
				self.settlement_weights.volume = v;
			}
			if let Some(u) = settlement.weight_uptime {
				self.settlement_weights.uptime = u;
			}
		}
		if let Some(rl) = toml.rate_limits {
			if let Some(v) = rl.vouches_per_day {
				self.rate_limits.vouches_per_day = v;
			}
			if let Some(v) = rl.ban_proposals_per_day {
				self.rate_limits.ban_proposals_per_day = v;
			}
			if let Some(v) = rl.handshakes_per_minute {
				self.rate_limits.handshakes_per_minute = v;
			}
			if let Some(v) = rl.peer_available_per_minute {
				self.rate_limits.peer_available_per_minute = v;
			}
		}
		if let Some(log) = toml.log {
			self.log_level = log.level.or(self.log_level.clone());
		}
	}

	fn merge_args(&mut self, args: &ArgsConfig) {
		if let Some(node_id) = &args.node_id {
			self.node_id = Some(node_id.clone());
		}
		if let Some(addr) = &args.rest_service_address {
			self.rest_service_address = Some(addr.clone());
		}
		if let Some(db_path) = &args.db_path {
			self.db_path = Some(db_path.clone());
		}
		if let Some(mode) = &args.governance_mode {
			self.governance_mode = Some(mode.clone());
		}
	}

	fn build(self) -> io::Result<Config> {
		let node_id = self.node_id.ok_or_else(|| missing_field_err("node_id"))?;
		if node_id.len() != 66 || !node_id.chars().all(|c| c.is_ascii_hexdigit()) {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				"node_id must be a 66-character lowercase hex string".to_string(),
			));
		}

		let rest_service_addr = self
			.rest_service_address
			.ok_or_else(|| missing_field_err("rest_service_address"))?
			.parse::<SocketAddr>()
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

		let db_path = PathBuf::from(self.db_path.ok_or_else(|| missing_field_err("db_path"))?);

		let governance_mode = self
			.governance_mode
			.as_deref()
			.map(GovernanceMode::from_str)
			.transpose()?
			.unwrap_or(GovernanceMode::Advisor);

		let log_level = self
			.log_level
			.as_ref()
			.map(|level_str| {
				LevelFilter::from_str(level_str).map_err(|e| {
					io::Error::new(
						io::ErrorKind::InvalidInput,
						format!("Invalid log level configured: {}", e),
					)
				})
			})
			.transpose()?
			.unwrap_or(LevelFilter::Info);

		Ok(Config {
			node_id,
			rest_service_addr,
			db_path,
			governance_mode,
			gossip_threshold_pct: self.gossip_threshold_pct.unwrap_or(10.0),
			heartbeat_interval_s: self.heartbeat_interval_s.unwrap_or(300),
			antientropy_interval_s: self.antientropy_interval_s.unwrap_or(900),
			intent_wait_s: self.intent_wait_s.unwrap_or(10),
			intent_cache_max: self.intent_cache_max.unwrap_or(200),
			max_active_rounds: self.max_active_rounds.unwrap_or(5),
			expansion_cooldown_s: self.expansion_cooldown_s.unwrap_or(300),
			vouch_quorum_pct: self.vouch_quorum_pct.unwrap_or(51.0),
			settlement_weights: self.settlement_weights,
			daily_budget_sat: self.daily_budget_sat.unwrap_or(0),
			reserve_pct: self.reserve_pct.unwrap_or(0.0),
			per_channel_cap_sat: self.per_channel_cap_sat.unwrap_or(u64::MAX),
			rate_limits: self.rate_limits,
			log_level,
		})
	}
}

fn missing_field_err(field: &str) -> io::Error {
	io::Error::new(
		io::ErrorKind::InvalidInput,
		format!(
			"Missing `{}`. Please provide it via config file, CLI argument, or environment variable.",
			field
		),
	)
}

pub fn load_config(args: &ArgsConfig) -> io::Result<Config> {
	let mut builder = ConfigBuilder::default();

	if let Some(path) = &args.config_file {
		builder.merge_toml(read_toml(Path::new(path))?);
	}

	builder.merge_args(args);
	builder.build()
}

fn read_toml(path: &Path) -> io::Result<TomlConfig> {
	let content = fs::read_to_string(path).map_err(|e| {
		io::Error::new(e.kind(), format!("Failed to read config file '{:?}': {}", path, e))
	})?;
	toml::from_str(&content).map_err(|e| {
		io::Error::new(
			io::ErrorKind::InvalidData,
			format!("Config file contains invalid TOML format: {}", e),
		)
	})
}

/// Owns the live configuration snapshot and performs validated hot-reload.
///
/// `db_path` is immutable after startup: a reload that changes it is
/// rejected outright rather than partially applied.
pub struct ConfigManager {
	current: ArcSwap<Config>,
}

impl ConfigManager {
	pub fn new(initial: Config) -> Self {
		Self { current: ArcSwap::from_pointee(initial) }
	}

	pub fn snapshot(&self) -> Arc<Config> {
		self.current.load_full()
	}

	/// Validate a full replacement config and, only on success, publish it.
	/// In-flight duty cycles that already hold the old `Arc<Config>` keep
	/// running against it until their next `snapshot()` call.
	pub fn reload(&self, args: &ArgsConfig) -> io::Result<()> {
		let next = load_config(args)?;
		let current = self.snapshot();
		if next.db_path != current.db_path {
			return Err(io::Error::new(
				io::ErrorKind::InvalidInput,
				"db_path is immutable after startup".to_string(),
			));
		}
		self.current.store(Arc::new(next));
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn args(config_file: Option<String>) -> ArgsConfig {
		ArgsConfig {
			config_file,
			node_id: Some(
				"02aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
			),
			rest_service_address: Some("127.0.0.1:9700".to_string()),
			db_path: Some("/tmp/fleet-test.sqlite".to_string()),
			governance_mode: None,
			check_config: false,
		}
	}

	#[test]
	fn test_config_from_args_only() {
		let config = load_config(&args(None)).unwrap();
		assert_eq!(config.governance_mode, GovernanceMode::Advisor);
		assert_eq!(config.intent_wait_s, 10);
		assert_eq!(config.max_active_rounds, 5);
		assert_eq!(config.vouch_quorum_pct, 51.0);
	}

	#[test]
	fn test_config_from_file() {
		let dir = std::env::temp_dir();
		let path = dir.join("fleet_test_config_from_file.toml");
		std::fs::write(
			&path,
			r#"
			[node]
			node_id = "02bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
			rest_service_address = "127.0.0.1:9701"

			[store]
			db_path = "/tmp/fleet-file.sqlite"

			[governance]
			mode = "autonomous"
			daily_budget_sat = 500000

			[intent]
			wait_s = 15
			"#,
		)
		.unwrap();

		let mut a = args(Some(path.to_string_lossy().to_string()));
		a.node_id = None;
		a.rest_service_address = None;
		a.db_path = None;
		let config = load_config(&a).unwrap();
		assert_eq!(config.governance_mode, GovernanceMode::Autonomous);
		assert_eq!(config.daily_budget_sat, 500000);
		assert_eq!(config.intent_wait_s, 15);
	}

	#[test]
	fn test_rejects_unknown_toml_keys() {
		let dir = std::env::temp_dir();
		let path = dir.join("fleet_test_unknown_keys.toml");
		std::fs::write(
			&path,
			r#"
			[node]
			node_id = "02cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc"
			rest_service_address = "127.0.0.1:9702"
			typo_field = true
			"#,
		)
		.unwrap();
		let err = read_toml(&path).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidData);
	}

	#[test]
	fn test_reload_rejects_db_path_change() {
		let manager = ConfigManager::new(load_config(&args(None)).unwrap());
		let mut changed = args(None);
		changed.db_path = Some("/tmp/other.sqlite".to_string());
		let err = manager.reload(&changed).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
	}

	#[test]
	fn test_reload_accepts_compatible_change() {
		let manager = ConfigManager::new(load_config(&args(None)).unwrap());
		let mut changed = args(None);
		changed.governance_mode = Some("oracle".to_string());
		manager.reload(&changed).unwrap();
		assert_eq!(manager.snapshot().governance_mode, GovernanceMode::Oracle);
	}
}
