// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Operator command-line client for the `fleet-node` RPC surface.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "fleet-cli", about = "operator client for a fleet-node instance")]
struct Cli {
	/// Base URL of the node's operator RPC service.
	#[arg(long, default_value = "http://127.0.0.1:9700", global = true)]
	node_address: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
	/// Show this node's identity, governance mode, and member/peer counts.
	Status,
	/// List known members and their tiers.
	Members,
	/// List the gossiped state records this node holds.
	Topology,
	/// Vouch for a prospective member, promoting them on quorum.
	Vouch {
		/// Node ID (66-character hex string) of the prospective member.
		subject: String,
	},
	/// Propose banning a member.
	Ban {
		/// Node ID (66-character hex string) of the member to ban.
		target: String,
	},
	/// List in-flight coordination intents.
	Intents,
	/// List active cooperative expansion rounds.
	Expansions,
	/// Show the settlement round for a period (defaults to the current one).
	SettlementStatus {
		/// ISO-week period identifier, e.g. `2026-W05`.
		#[arg(long)]
		period: Option<String>,
	},
	/// Force a settlement proposal for a period (escape hatch; see --help).
	SettlementPropose {
		/// ISO-week period identifier, defaults to the current one.
		#[arg(long)]
		period: Option<String>,
	},
	/// List fee reports observed for a period (defaults to the current one).
	FeeReports {
		#[arg(long)]
		period: Option<String>,
	},
	/// Immediately remove a member, bypassing the ban-vote quorum.
	RemoveMember {
		/// Node ID (66-character hex string) of the member to remove.
		node_id: String,
	},
	/// List actions awaiting operator approval under advisor/oracle governance.
	PendingActions,
	/// Approve and invoke a pending action by id.
	ApproveAction {
		/// Id of the pending action, as shown by `pending-actions`.
		id: String,
	},
	/// Print a shell completion script for this CLI.
	Completions {
		shell: Shell,
	},
}

fn main() {
	let cli = Cli::parse();

	if let Command::Completions { shell } = &cli.command {
		let mut command = Cli::command();
		let name = command.get_name().to_string();
		generate(*shell, &mut command, name, &mut std::io::stdout());
		return;
	}

	let client = match reqwest::blocking::Client::builder().build() {
		Ok(client) => client,
		Err(e) => {
			eprintln!("failed to build http client: {}", e);
			std::process::exit(1);
		},
	};

	let result = match &cli.command {
		Command::Status => get(&client, &cli.node_address, "/status", &[]),
		Command::Members => get(&client, &cli.node_address, "/members", &[]),
		Command::Topology => get(&client, &cli.node_address, "/topology", &[]),
		Command::Vouch { subject } => {
			post(&client, &cli.node_address, "/vouch", &VouchBody { subject })
		},
		Command::Ban { target } => post(&client, &cli.node_address, "/ban", &BanBody { target }),
		Command::Intents => get(&client, &cli.node_address, "/intents", &[]),
		Command::Expansions => get(&client, &cli.node_address, "/expansions", &[]),
		Command::SettlementStatus { period } => get(
			&client,
			&cli.node_address,
			"/settlement-status",
			&period.as_deref().map(|p| ("period_id", p)).into_iter().collect::<Vec<_>>(),
		),
		Command::SettlementPropose { period } => post(
			&client,
			&cli.node_address,
			"/settlement-propose",
			&SettlementProposeBody { period_id: period.clone() },
		),
		Command::FeeReports { period } => get(
			&client,
			&cli.node_address,
			"/fee-reports",
			&period.as_deref().map(|p| ("period_id", p)).into_iter().collect::<Vec<_>>(),
		),
		Command::RemoveMember { node_id } => {
			post(&client, &cli.node_address, "/remove-member", &RemoveMemberBody { node_id })
		},
		Command::PendingActions => get(&client, &cli.node_address, "/pending-actions", &[]),
		Command::ApproveAction { id } => {
			post(&client, &cli.node_address, "/approve-action", &ApproveActionBody { id })
		},
		Command::Completions { .. } => unreachable!("handled above"),
	};

	match result {
		Ok(body) => {
			print_pretty(&body);
		},
		Err(e) => {
			eprintln!("{}", e);
			std::process::exit(1);
		},
	}
}

#[derive(Serialize)]
struct VouchBody<'a> {
	subject: &'a str,
}

#[derive(Serialize)]
struct BanBody<'a> {
	target: &'a str,
}

#[derive(Serialize)]
struct SettlementProposeBody {
	period_id: Option<String>,
}

#[derive(Serialize)]
struct RemoveMemberBody<'a> {
	node_id: &'a str,
}

#[derive(Serialize)]
struct ApproveActionBody<'a> {
	id: &'a str,
}

fn get(
	client: &reqwest::blocking::Client, node_address: &str, path: &str, query: &[(&str, &str)],
) -> Result<Value, String> {
	let response = client
		.get(format!("{}{}", node_address, path))
		.query(query)
		.send()
		.map_err(|e| format!("request failed: {}", e))?;
	read_response(response)
}

fn post<T: Serialize>(
	client: &reqwest::blocking::Client, node_address: &str, path: &str, body: &T,
) -> Result<Value, String> {
	let response = client
		.post(format!("{}{}", node_address, path))
		.json(body)
		.send()
		.map_err(|e| format!("request failed: {}", e))?;
	read_response(response)
}

fn read_response(response: reqwest::blocking::Response) -> Result<Value, String> {
	let status = response.status();
	let value: Value =
		response.json().map_err(|e| format!("could not parse node response: {}", e))?;
	if status.is_success() {
		Ok(value)
	} else {
		let message = value
			.get("message")
			.and_then(Value::as_str)
			.unwrap_or("request failed")
			.to_string();
		Err(format!("{}: {}", status, message))
	}
}

fn print_pretty(value: &Value) {
	match serde_json::to_string_pretty(value) {
		Ok(text) => println!("{}", text),
		Err(_) => println!("{}", value),
	}
}
