//! Typed failures for the coordination core.
//!
//! Every fallible core operation returns [`CoreError`]. Inbound protocol
//! errors are logged and dropped by the dispatcher rather than propagated;
//! everything else bubbles up as one of these variants so callers (Store
//! transactions, RPC handlers, background loops) can match on the kind
//! without parsing a message string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
	#[error("malformed message: {0}")]
	MalformedMessage(String),

	#[error("peer is not authenticated")]
	UnauthenticatedPeer,

	#[error("claimed identity does not match transport-level sender")]
	IdentityMismatch,

	#[error("peer is banned")]
	BannedPeer,

	#[error("rate limit exceeded for {0}")]
	RateLimited(&'static str),

	#[error("store schema version mismatch: found {found}, expected {expected}")]
	SchemaMismatch { found: i64, expected: i64 },

	#[error("store is busy")]
	StoreBusy,

	#[error("conflicting intent already committed for this subject")]
	IntentConflict,

	#[error("executor is unavailable (circuit breaker open)")]
	ExecutorUnavailable,

	#[error("quorum was not reached")]
	QuorumFailure,

	#[error("period {0} has already settled")]
	PeriodAlreadySettled(String),

	#[error("action exceeds configured budget")]
	BudgetExceeded,

	#[error("operation timed out")]
	Timeout,

	#[error("not found: {0}")]
	NotFound(String),

	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("storage error: {0}")]
	Store(#[from] rusqlite::Error),

	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

impl CoreError {
	/// Machine-readable code, stable across message-text changes.
	pub fn code(&self) -> &'static str {
		match self {
			CoreError::MalformedMessage(_) => "malformed_message",
			CoreError::UnauthenticatedPeer => "unauthenticated_peer",
			CoreError::IdentityMismatch => "identity_mismatch",
			CoreError::BannedPeer => "banned_peer",
			CoreError::RateLimited(_) => "rate_limited",
			CoreError::SchemaMismatch { .. } => "schema_mismatch",
			CoreError::StoreBusy => "store_busy",
			CoreError::IntentConflict => "intent_conflict",
			CoreError::ExecutorUnavailable => "executor_unavailable",
			CoreError::QuorumFailure => "quorum_failure",
			CoreError::PeriodAlreadySettled(_) => "period_already_settled",
			CoreError::Timeout => "timeout",
			CoreError::BudgetExceeded => "budget_exceeded",
			CoreError::NotFound(_) => "not_found",
			CoreError::InvalidConfig(_) => "invalid_config",
			CoreError::Store(_) => "store_error",
			CoreError::Io(_) => "io_error",
		}
	}

	/// Exit code for operator-facing CLI/RPC failures, per spec: 0 success,
	/// 1 typed failure, 2 unknown command (chosen by the caller, not here).
	pub fn exit_code(&self) -> i32 {
		1
	}
}
