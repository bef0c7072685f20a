//! Error types for the settlement engine.
//!
//! Every public operation is all-or-nothing: an error return means no state
//! was mutated by that call. Batch operations are the one exception and
//! report per-item failures instead of aborting (see `batch`).

use crate::types::{AccountId, Amount, RequestId, RoundId, Tick};
use thiserror::Error;

/// Root error type for all engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("entry validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("state conflict: {0}")]
    State(#[from] StateError),

    #[error("authorization error: {0}")]
    Authorization(#[from] AuthError),

    #[error("timing error: {0}")]
    Timing(#[from] TimingError),

    #[error("limit exceeded: {0}")]
    Limit(#[from] LimitError),

    #[error("not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Construction/setup errors, rejected before any state exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("identity for '{0}' must not be empty")]
    EmptyIdentity(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),
}

/// Per-call input validation errors; nothing was mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("stake must be non-zero")]
    ZeroStake,

    #[error("subplay count {count} exceeds maximum {max}")]
    CountLimitExceeded { count: u32, max: u32 },

    #[error("wager {amount} is below the minimum {min}")]
    BelowMinimum { amount: Amount, min: Amount },

    #[error("picks must not be empty")]
    EmptyPicks,

    #[error("side {0} is out of range")]
    SideOutOfRange(u16),

    #[error("sides must be strictly ascending and unique")]
    SidesNotAscending,

    #[error("mode {mode} allows at most {max} sides per entry")]
    ModePickLimit { mode: u8, max: usize },

    #[error("expected {expected} random values, got {got}")]
    ValueCountMismatch { expected: usize, got: usize },

    #[error("amount arithmetic overflows the 128-bit money range")]
    AmountOverflow,

    #[error("no multiplier table configured for {0} rows")]
    RowsUnsupported(u8),

    #[error("multiplier table for {rows} rows must have rows + 1 entries, got {got}")]
    TableSizeMismatch { rows: u8, got: usize },
}

/// State-machine conflicts: the call arrived in a state that forbids it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("an entry is already pending for this account")]
    EntryInProgress,

    #[error("request {0} is not in progress")]
    RequestNotInProgress(RequestId),

    #[error("request {0} was issued for a backend that is no longer active")]
    BackendMismatch(RequestId),

    #[error("round is already paused")]
    RoundAlreadyPaused,

    #[error("round is not paused")]
    RoundNotPaused,

    #[error("request {0} is not the current round's request")]
    RequestNotForCurrentRound(RequestId),

    #[error("round {0} is not resolved")]
    RoundNotResolved(RoundId),

    #[error("round {0} failed; stakes are refundable via withdraw")]
    RoundFailed(RoundId),

    #[error("cannot withdraw from successfully resolved round {0}")]
    CannotWithdrawFromSuccessfulRound(RoundId),

    #[error("round {0} is still open")]
    RoundStillOpen(RoundId),
}

/// Caller is not allowed to perform the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("'{0}' is not the designated resolver")]
    NotResolver(AccountId),

    #[error("'{0}' is not an owner or manager")]
    NotManager(AccountId),
}

/// The call is valid but arrived too early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimingError {
    #[error("timeout not elapsed: {elapsed} of {required} ticks")]
    TimeoutNotElapsed { elapsed: Tick, required: Tick },
}

/// A configured bound was exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("batch of {len} exceeds the limit of {max}")]
    BatchSizeExceeded { len: usize, max: usize },

    #[error("mode {mode} stake cap {cap} exceeded")]
    ModeStakeCapExceeded { mode: u8, cap: Amount },
}

/// The referenced entity does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFoundError {
    #[error("no pending entry for '{0}'")]
    NoEntryForAccount(AccountId),

    #[error("no entry for '{account}' in round {round}")]
    NoEntryForRound { account: AccountId, round: RoundId },
}

/// Failures surfaced by the fungible-ledger collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    #[error("account '{0}' has not opted in to engine transfers")]
    NotOptedIn(AccountId),
}

/// Convenience alias used throughout the crate.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = EngineError::from(StateError::RequestNotInProgress(7));
        assert!(err.to_string().contains("state conflict"));
        assert!(err.to_string().contains("request 7"));

        let err = EngineError::from(ValidationError::RowsUnsupported(9));
        assert!(err.to_string().contains("9 rows"));
    }

    #[test]
    fn test_error_conversion() {
        let err: EngineError = ValidationError::ZeroStake.into();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_errors_are_comparable() {
        let a = EngineError::from(TimingError::TimeoutNotElapsed {
            elapsed: 1,
            required: 5,
        });
        let b = EngineError::from(TimingError::TimeoutNotElapsed {
            elapsed: 1,
            required: 5,
        });
        assert_eq!(a, b);
    }
}
