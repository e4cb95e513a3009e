//! Executor Bridge (spec §4.9): a circuit-breaker-guarded adapter over the
//! external executor interface.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{info, warn};

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceStatus {
	pub in_flight: u32,
}

/// Operations the coordination core requires from the external executor.
/// Accessed only through [`ExecutorBridge`], never directly.
#[async_trait]
pub trait Executor: Send + Sync {
	async fn apply_fee_policy(&self, channel: &str, policy_json: &str) -> Result<(), String>;
	async fn request_rebalance(&self, from: &str, to: &str, amount_msat: u64)
		-> Result<(), String>;
	async fn get_status(&self) -> Result<RebalanceStatus, String>;
}

#[async_trait]
impl Executor for Box<dyn Executor> {
	async fn apply_fee_policy(&self, channel: &str, policy_json: &str) -> Result<(), String> {
		(**self).apply_fee_policy(channel, policy_json).await
	}
	async fn request_rebalance(
		&self, from: &str, to: &str, amount_msat: u64,
	) -> Result<(), String> {
		(**self).request_rebalance(from, to, amount_msat).await
	}
	async fn get_status(&self) -> Result<RebalanceStatus, String> {
		(**self).get_status().await
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

const FAILURE_THRESHOLD: u32 = 3;
const OPEN_COOLDOWN: Duration = Duration::from_secs(60);

struct BreakerInner {
	state: BreakerState,
	failure_count: u32,
	opened_at: Option<Instant>,
}

/// Closed/Open/HalfOpen circuit breaker guarding calls into [`Executor`].
///
/// - Closed: forward calls, count consecutive failures.
/// - Open: reject immediately once `failure_count >= 3`.
/// - HalfOpen: after a 60s cooldown, allow exactly one probe call.
pub struct ExecutorBridge<E: Executor> {
	executor: E,
	breaker: Mutex<BreakerInner>,
}

impl<E: Executor> ExecutorBridge<E> {
	pub fn new(executor: E) -> Self {
		Self {
			executor,
			breaker: Mutex::new(BreakerInner {
				state: BreakerState::Closed,
				failure_count: 0,
				opened_at: None,
			}),
		}
	}

	/// Returns `Ok(())` to proceed, or `Err(ExecutorUnavailable)` if the
	/// breaker is Open and no probe slot is available yet.
	fn admit(&self) -> Result<(), CoreError> {
		let mut inner = self.breaker.lock().expect("breaker lock poisoned");
		match inner.state {
			BreakerState::Closed => Ok(()),
			BreakerState::HalfOpen => Ok(()),
			BreakerState::Open => {
				let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
				if elapsed >= OPEN_COOLDOWN {
					inner.state = BreakerState::HalfOpen;
					info!("executor circuit breaker: Open -> HalfOpen, allowing probe call");
					Ok(())
				} else {
					Err(CoreError::ExecutorUnavailable)
				}
			},
		}
	}

	fn record_success(&self) {
		let mut inner = self.breaker.lock().expect("breaker lock poisoned");
		if inner.state != BreakerState::Closed {
			info!("executor circuit breaker: {:?} -> Closed", inner.state);
		}
		inner.state = BreakerState::Closed;
		inner.failure_count = 0;
		inner.opened_at = None;
	}

	fn record_failure(&self) {
		let mut inner = self.breaker.lock().expect("breaker lock poisoned");
		match inner.state {
			BreakerState::HalfOpen => {
				warn!("executor circuit breaker: HalfOpen -> Open (probe failed)");
				inner.state = BreakerState::Open;
				inner.opened_at = Some(Instant::now());
			},
			BreakerState::Closed => {
				inner.failure_count += 1;
				if inner.failure_count >= FAILURE_THRESHOLD {
					warn!(
						"executor circuit breaker: Closed -> Open ({} consecutive failures)",
						inner.failure_count
					);
					inner.state = BreakerState::Open;
					inner.opened_at = Some(Instant::now());
				}
			},
			BreakerState::Open => {},
		}
	}

	pub async fn apply_fee_policy(&self, channel: &str, policy_json: &str) -> Result<(), CoreError> {
		self.admit()?;
		match self.executor.apply_fee_policy(channel, policy_json).await {
			Ok(()) => {
				self.record_success();
				Ok(())
			},
			Err(e) => {
				self.record_failure();
				Err(CoreError::MalformedMessage(e))
			},
		}
	}

	pub async fn request_rebalance(
		&self, from: &str, to: &str, amount_msat: u64,
	) -> Result<(), CoreError> {
		self.admit()?;
		match self.executor.request_rebalance(from, to, amount_msat).await {
			Ok(()) => {
				self.record_success();
				Ok(())
			},
			Err(e) => {
				self.record_failure();
				Err(CoreError::MalformedMessage(e))
			},
		}
	}

	pub async fn get_status(&self) -> Result<RebalanceStatus, CoreError> {
		self.admit()?;
		match self.executor.get_status().await {
			Ok(status) => {
				self.record_success();
				Ok(status)
			},
			Err(e) => {
				self.record_failure();
				Err(CoreError::MalformedMessage(e))
			},
		}
	}

	/// Route a proposed action through the governance mode in effect
	/// (spec §9): `advisor` and `oracle` persist the action as a
	/// `pending_actions` row for later operator review rather than
	/// invoking the executor directly; `autonomous` invokes it now.
	pub async fn submit(
		&self, action: crate::store::models::PendingActionKind, mode: crate::config::GovernanceMode,
		store: &crate::store::Store, now: i64,
	) -> Result<ActionOutcome, CoreError> {
		use crate::config::GovernanceMode;
		match mode {
			GovernanceMode::Advisor | GovernanceMode::Oracle => {
				let id = uuid::Uuid::new_v4().to_string();
				store.put_pending_action(&crate::store::models::PendingAction {
					id: id.clone(),
					kind: action,
					created_at: now,
				})?;
				info!("executor bridge: recorded pending action {} under {:?} governance", id, mode);
				Ok(ActionOutcome::Recorded { id })
			},
			GovernanceMode::Autonomous => {
				self.invoke(&action).await?;
				Ok(ActionOutcome::Invoked)
			},
		}
	}

	/// Invoke a pending action directly -- the operator-approval path for
	/// an action recorded under `advisor`/`oracle` governance.
	pub async fn invoke(&self, action: &crate::store::models::PendingActionKind) -> Result<(), CoreError> {
		use crate::store::models::PendingActionKind;
		match action {
			PendingActionKind::ApplyFeePolicy { channel, policy_json } => {
				self.apply_fee_policy(channel, policy_json).await
			},
			PendingActionKind::RequestRebalance { from, to, amount_msat } => {
				self.request_rebalance(from, to, *amount_msat).await
			},
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
	Recorded { id: String },
	Invoked,
}
