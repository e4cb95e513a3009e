// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Operator RPC surface (spec §7): a small JSON-over-HTTP service an
//! operator or `fleet-cli` talks to, following the same
//! `Service<Request<Incoming>>` dispatch `ldk-server`'s `service.rs` uses
//! for its node API, adapted from protobuf bodies to JSON ones.

mod types;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::CoreError;
use crate::executor::{Executor, ExecutorBridge};
use crate::host::Host;
use crate::identity::IdentityVerifier;
use crate::membership::Membership;
use crate::settlement::{self, Settlement};
use crate::store::models::Tier;
use crate::store::Store;

pub use types::*;

/// Shared state the RPC service dispatches against. Cheap to clone --
/// every field is already an `Arc`.
#[derive(Clone)]
pub struct RpcContext {
	pub store: Arc<Store>,
	pub identity: Arc<IdentityVerifier>,
	pub host: Arc<dyn Host>,
	pub executor: Arc<ExecutorBridge<Box<dyn Executor>>>,
	pub config: Arc<ConfigManager>,
}

#[derive(Clone)]
pub struct RpcService {
	context: RpcContext,
}

impl RpcService {
	pub fn new(context: RpcContext) -> Self {
		Self { context }
	}
}

impl Service<Request<Incoming>> for RpcService {
	type Response = Response<Full<Bytes>>;
	type Error = hyper::Error;
	type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn call(&self, req: Request<Incoming>) -> Self::Future {
		let context = self.context.clone();
		Box::pin(async move { Ok(route(context, req).await) })
	}
}

async fn route(context: RpcContext, req: Request<Incoming>) -> Response<Full<Bytes>> {
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let query = req.uri().query().unwrap_or("").to_string();

	let result = match (&method, path.as_str()) {
		(&Method::GET, "/status") => handle_status(&context).await,
		(&Method::GET, "/members") => handle_members(&context).await,
		(&Method::GET, "/topology") => handle_topology(&context).await,
		(&Method::POST, "/vouch") => handle_json(req, |body| handle_vouch(&context, body)).await,
		(&Method::POST, "/ban") => handle_json(req, |body| handle_ban(&context, body)).await,
		(&Method::GET, "/intents") => handle_intents(&context).await,
		(&Method::GET, "/expansions") => handle_expansions(&context).await,
		(&Method::GET, "/settlement-status") => handle_settlement_status(&context, &query).await,
		(&Method::POST, "/settlement-propose") => {
			handle_json(req, |body| handle_settlement_propose(&context, body)).await
		},
		(&Method::GET, "/fee-reports") => handle_fee_reports(&context, &query).await,
		(&Method::POST, "/remove-member") => {
			handle_json(req, |body| handle_remove_member(&context, body)).await
		},
		(&Method::GET, "/pending-actions") => handle_pending_actions(&context).await,
		(&Method::POST, "/approve-action") => {
			handle_json(req, |body| handle_approve_action(&context, body)).await
		},
		_ => Err(CoreError::NotFound(format!("{} {}", method, path))),
	};

	match result {
		Ok(body) => Response::builder()
			.status(StatusCode::OK)
			.header("content-type", "application/json")
			.body(Full::new(body))
			// unwrap safety: body only errors when previous chained calls failed.
			.unwrap(),
		Err(e) => {
			let (error_response, status) = to_error_response(e);
			let body = serde_json::to_vec(&error_response).unwrap_or_default();
			Response::builder()
				.status(status)
				.header("content-type", "application/json")
				.body(Full::new(Bytes::from(body)))
				// unwrap safety: body only errors when previous chained calls failed.
				.unwrap()
		},
	}
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
	query.split('&').find_map(|pair| {
		let (k, v) = pair.split_once('=')?;
		(k == key).then_some(v)
	})
}

async fn handle_json<F, Fut>(req: Request<Incoming>, handler: F) -> Result<Bytes, CoreError>
where
	F: FnOnce(Vec<u8>) -> Fut,
	Fut: Future<Output = Result<Bytes, CoreError>>,
{
	let bytes = req
		.into_body()
		.collect()
		.await
		.map_err(|e| CoreError::MalformedMessage(e.to_string()))?
		.to_bytes();
	handler(bytes.to_vec()).await
}

fn parse_body<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CoreError> {
	serde_json::from_slice(bytes).map_err(|e| CoreError::MalformedMessage(e.to_string()))
}

fn to_json<T: Serialize>(value: &T) -> Result<Bytes, CoreError> {
	serde_json::to_vec(value)
		.map(Bytes::from)
		.map_err(|e| CoreError::MalformedMessage(e.to_string()))
}

fn now() -> i64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}

/// Frame and fan a self-originated message out to every connected peer,
/// logging (not failing the request over) individual send errors -- the
/// same best-effort broadcast [`crate::scheduler::Scheduler`] uses for its
/// own duty-cycle announcements.
async fn broadcast<T: Serialize>(
	host: &dyn Host, kind: crate::codec::MessageKind, msg: &T,
) -> Result<(), CoreError> {
	let payload = serde_json::to_vec(msg).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
	let framed = crate::codec::encode(kind, &payload);
	for peer in host.list_peers().await {
		if !peer.is_connected {
			continue;
		}
		if let Err(e) = host.send_custom_message(&peer.node_id, framed.clone()).await {
			warn!("rpc: failed to broadcast {:?} to {}: {}", kind, peer.node_id, e);
		}
	}
	Ok(())
}

async fn handle_status(context: &RpcContext) -> Result<Bytes, CoreError> {
	let config = context.config.snapshot();
	let members = context.store.list_members()?;
	let member_count = members.iter().filter(|m| matches!(m.tier, Tier::Member)).count() as u32;
	let neophyte_count = members.iter().filter(|m| matches!(m.tier, Tier::Neophyte)).count() as u32;
	let peer_count = context.host.list_peers().await.iter().filter(|p| p.is_connected).count();
	to_json(&StatusResponse {
		node_id: config.node_id.clone(),
		governance_mode: config.governance_mode.to_string(),
		member_count,
		neophyte_count,
		peer_count,
	})
}

async fn handle_members(context: &RpcContext) -> Result<Bytes, CoreError> {
	let members = context.store.list_members()?.iter().map(member_to_view).collect();
	to_json(&MembersResponse { members })
}

async fn handle_topology(context: &RpcContext) -> Result<Bytes, CoreError> {
	let records = context.store.list_state_records()?.iter().map(state_record_to_view).collect();
	to_json(&TopologyResponse { records })
}

/// The node vouches for `subject` on the operator's behalf: signs and
/// processes the vouch locally exactly as a peer-originated one would be,
/// then gossips it so other members observe the promotion too.
async fn handle_vouch(context: &RpcContext, body: Vec<u8>) -> Result<Bytes, CoreError> {
	let request: VouchRequest = parse_body(&body)?;
	let config = context.config.snapshot();
	let now = now();
	let node_info = context.host.node_info().await;

	let mut vouch = crate::codec::messages::Vouch {
		v: crate::codec::messages::SCHEMA_VERSION,
		from: node_info.node_id.clone(),
		ts: now,
		subject: request.subject.clone(),
		sig: String::new(),
	};
	let text = crate::signing::signable_text(&vouch).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
	vouch.sig =
		context.host.sign_message(&text).await.map_err(CoreError::MalformedMessage)?;

	let membership = Membership::new(&context.store, &context.identity);
	membership.handle_vouch(&vouch, &node_info.node_id, &config, context.host.as_ref(), now).await?;
	broadcast(context.host.as_ref(), crate::codec::MessageKind::Vouch, &vouch).await?;

	let vouch_count = context.store.vouch_count(&request.subject)?;
	let promoted =
		membership.tier_of(&request.subject)?.map(|t| matches!(t, Tier::Member)).unwrap_or(false);
	to_json(&VouchResponse { subject: request.subject, vouch_count, promoted })
}

/// The node proposes a ban against `target` on the operator's behalf.
async fn handle_ban(context: &RpcContext, body: Vec<u8>) -> Result<Bytes, CoreError> {
	let request: BanRequest = parse_body(&body)?;
	let config = context.config.snapshot();
	let now = now();
	let node_info = context.host.node_info().await;

	let mut propose = crate::codec::messages::BanPropose {
		v: crate::codec::messages::SCHEMA_VERSION,
		from: node_info.node_id.clone(),
		ts: now,
		target: request.target.clone(),
		reason: "operator-initiated".to_string(),
		sig: String::new(),
	};
	let text =
		crate::signing::signable_text(&propose).map_err(|e| CoreError::MalformedMessage(e.to_string()))?;
	propose.sig =
		context.host.sign_message(&text).await.map_err(CoreError::MalformedMessage)?;

	let membership = Membership::new(&context.store, &context.identity);
	membership
		.handle_ban_propose(&propose, &node_info.node_id, &config, context.host.as_ref(), now)
		.await?;
	broadcast(context.host.as_ref(), crate::codec::MessageKind::BanPropose, &propose).await?;

	let banned = context.store.is_banned(&request.target, now)?;
	let approvals = context.store.get_ban(&request.target)?.map(|b| b.votes.len() as u32).unwrap_or(0);
	to_json(&BanResponse { target: request.target, approvals, banned })
}

async fn handle_intents(context: &RpcContext) -> Result<Bytes, CoreError> {
	let intents = context.store.list_intents()?.iter().map(intent_to_view).collect();
	to_json(&IntentListResponse { intents })
}

async fn handle_expansions(context: &RpcContext) -> Result<Bytes, CoreError> {
	let rounds = context.store.active_expansion_rounds()?.iter().map(expansion_round_to_view).collect();
	to_json(&ExpansionListResponse { rounds })
}

async fn handle_settlement_status(context: &RpcContext, query: &str) -> Result<Bytes, CoreError> {
	let period_id = query_param(query, "period_id")
		.map(str::to_string)
		.unwrap_or_else(|| settlement::period_id_for(now()));
	let round = context.store.get_settlement_round(&period_id)?.as_ref().map(settlement_round_to_view);
	to_json(&SettlementStatusResponse { round })
}

/// Force a settlement proposal for `period_id` (defaulting to the current
/// period) regardless of the scheduler's deterministic-proposer rotation --
/// an operator escape hatch for a period that is stuck because its elected
/// proposer is offline.
async fn handle_settlement_propose(context: &RpcContext, body: Vec<u8>) -> Result<Bytes, CoreError> {
	let request: SettlementProposeRequest = parse_body(&body)?;
	let config = context.config.snapshot();
	let now = now();
	let period_id = request.period_id.unwrap_or_else(|| settlement::period_id_for(now));

	let members: Vec<_> =
		context.store.list_members()?.into_iter().filter(|m| matches!(m.tier, Tier::Member)).collect();
	let reports = context.store.fee_reports_for_period(&period_id)?;
	let total_pool: u64 = reports.iter().map(|r| r.total_fees_msat).sum();
	let pool = Settlement::compute_pool(&members, &reports, &config.settlement_weights, total_pool);

	let settlement_mod = Settlement::new(&context.store, &context.identity);
	let propose = settlement_mod.propose(&config.node_id, &period_id, pool.clone(), now)?;
	broadcast(context.host.as_ref(), crate::codec::MessageKind::SettlePropose, &propose).await?;
	to_json(&SettlementProposeResponse { period_id, pool })
}

async fn handle_fee_reports(context: &RpcContext, query: &str) -> Result<Bytes, CoreError> {
	let period_id = query_param(query, "period_id")
		.map(str::to_string)
		.unwrap_or_else(|| settlement::period_id_for(now()));
	let reports = context.store.fee_reports_for_period(&period_id)?.iter().map(fee_report_to_view).collect();
	to_json(&FeeReportsResponse { period_id, reports })
}

/// Immediately remove a member without the usual ban-vote quorum -- for
/// an operator acting on out-of-band evidence (spec §7 explicitly carves
/// this out as a privileged local operation, not a gossiped one).
async fn handle_remove_member(context: &RpcContext, body: Vec<u8>) -> Result<Bytes, CoreError> {
	let request: RemoveMemberRequest = parse_body(&body)?;
	let existed = context.store.get_member(&request.node_id)?.is_some();
	if existed {
		context.identity.forget(&request.node_id);
		context.store.remove_member(&request.node_id)?;
	}
	to_json(&RemoveMemberResponse { node_id: request.node_id, removed: existed })
}

async fn handle_pending_actions(context: &RpcContext) -> Result<Bytes, CoreError> {
	let actions = context.store.list_pending_actions()?.iter().map(pending_action_to_view).collect();
	to_json(&PendingActionsResponse { actions })
}

/// Invoke a pending action an operator reviewed under `advisor`/`oracle`
/// governance, then drop its record.
async fn handle_approve_action(context: &RpcContext, body: Vec<u8>) -> Result<Bytes, CoreError> {
	let request: ApproveActionRequest = parse_body(&body)?;
	let actions = context.store.list_pending_actions()?;
	let action = actions
		.into_iter()
		.find(|a| a.id == request.id)
		.ok_or_else(|| CoreError::NotFound(format!("pending action {}", request.id)))?;
	context.executor.invoke(&action.kind).await?;
	context.store.remove_pending_action(&request.id)?;
	to_json(&ApproveActionResponse { id: request.id, invoked: true })
}
