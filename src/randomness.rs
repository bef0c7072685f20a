//! Randomness request routing across interchangeable backends.
//!
//! One backend is active at a time. Every issued request is tagged with
//! the backend active at issue time and its owning context; resolution
//! consumes the ticket exactly once and is only valid while the tagged
//! backend is still the active one. Requests stranded by a backend switch
//! are never resolvable again and exit through the timeout paths of the
//! owning coordinator.

use crate::clock::TickClock;
use crate::errors::{AuthError, EngineResult, StateError};
use crate::types::{AccountId, RequestId, RoundId, Tick};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// The three interchangeable entropy-delivery mechanisms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Entropy derived in-band from a keyed hash; resolvable immediately.
    ImmediateHash,
    /// External callback provider, variant A.
    CallbackA,
    /// External callback provider, variant B.
    CallbackB,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::ImmediateHash => write!(f, "immediate-hash"),
            BackendKind::CallbackA => write!(f, "callback-a"),
            BackendKind::CallbackB => write!(f, "callback-b"),
        }
    }
}

/// Who a request belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestContext {
    /// Individual-model wager owned by one account.
    Entry { owner: AccountId },
    /// One pooled round.
    Round { round_id: RoundId },
}

/// An outstanding entropy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub id: RequestId,
    pub backend: BackendKind,
    pub context: RequestContext,
    pub issued_at: Tick,
    /// Number of raw values the resolution must deliver.
    pub count: usize,
}

/// Issues and validates randomness requests against the active backend.
pub struct RandomnessRouter {
    resolver: AccountId,
    active: RwLock<BackendKind>,
    pending: DashMap<RequestId, RequestTicket>,
    next_id: AtomicU64,
    clock: Arc<TickClock>,
    seed: [u8; 32],
}

impl RandomnessRouter {
    pub fn new(
        resolver: AccountId,
        active: BackendKind,
        clock: Arc<TickClock>,
        seed: [u8; 32],
    ) -> Self {
        Self {
            resolver,
            active: RwLock::new(active),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            clock,
            seed,
        }
    }

    /// Router with a randomly generated hash seed.
    pub fn new_random(resolver: AccountId, active: BackendKind, clock: Arc<TickClock>) -> Self {
        let seed = rand::random::<[u8; 32]>();
        Self::new(resolver, active, clock, seed)
    }

    pub fn active_backend(&self) -> BackendKind {
        *self.active.read().expect("backend lock poisoned")
    }

    /// Switch the active backend. Outstanding requests keep their original
    /// tag and become unresolvable until the original backend is restored.
    pub fn set_active_backend(&self, backend: BackendKind) {
        let mut active = self.active.write().expect("backend lock poisoned");
        if *active != backend {
            tracing::info!(from = %*active, to = %backend, "switching randomness backend");
            *active = backend;
        }
    }

    /// Issue a request for `count` raw values under the active backend.
    pub fn issue(&self, context: RequestContext, count: usize) -> RequestId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let ticket = RequestTicket {
            id,
            backend: self.active_backend(),
            context,
            issued_at: self.clock.now(),
            count,
        };
        tracing::debug!(request = id, backend = %ticket.backend, "issued randomness request");
        self.pending.insert(id, ticket);
        id
    }

    /// Look at an outstanding ticket without consuming it.
    pub fn ticket(&self, id: RequestId) -> Option<RequestTicket> {
        self.pending.get(&id).map(|t| t.clone())
    }

    /// Validate that `caller` may resolve `id` right now, without
    /// consuming the ticket. Coordinators call this before mutating their
    /// own state so a rejected resolution leaves everything untouched.
    pub fn check(&self, caller: &str, id: RequestId) -> EngineResult<()> {
        if caller != self.resolver {
            return Err(AuthError::NotResolver(caller.to_string()).into());
        }
        let ticket = self
            .pending
            .get(&id)
            .ok_or(StateError::RequestNotInProgress(id))?;
        if ticket.backend != self.active_backend() {
            return Err(StateError::BackendMismatch(id).into());
        }
        Ok(())
    }

    /// Consume a ticket exactly once. A second call for the same id fails
    /// with a state conflict.
    pub fn take(&self, caller: &str, id: RequestId) -> EngineResult<RequestTicket> {
        self.check(caller, id)?;
        let (_, ticket) = self
            .pending
            .remove(&id)
            .ok_or(StateError::RequestNotInProgress(id))?;
        tracing::debug!(request = id, "consumed randomness request");
        Ok(ticket)
    }

    /// Deterministically derive the raw values for an immediate-hash
    /// ticket: `sha256(seed || id || i)` truncated to u64 per value.
    pub fn derive_values(&self, id: RequestId) -> EngineResult<Vec<u64>> {
        let ticket = self
            .pending
            .get(&id)
            .ok_or(StateError::RequestNotInProgress(id))?;
        if ticket.backend != BackendKind::ImmediateHash {
            return Err(StateError::BackendMismatch(id).into());
        }

        let values = (0..ticket.count)
            .map(|i| {
                let mut hasher = Sha256::new();
                hasher.update(self.seed);
                hasher.update(id.to_be_bytes());
                hasher.update((i as u64).to_be_bytes());
                let digest = hasher.finalize();
                u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
            })
            .collect();
        Ok(values)
    }

    /// Drop a stranded ticket so a late delivery fails as not-in-progress.
    /// Used by the timeout-withdraw and round-failure paths.
    pub fn discard(&self, id: RequestId) -> bool {
        let removed = self.pending.remove(&id).is_some();
        if removed {
            tracing::debug!(request = id, "discarded randomness request");
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;

    fn router(active: BackendKind) -> RandomnessRouter {
        RandomnessRouter::new(
            "resolver".to_string(),
            active,
            Arc::new(TickClock::new()),
            [7u8; 32],
        )
    }

    fn entry_ctx(owner: &str) -> RequestContext {
        RequestContext::Entry {
            owner: owner.to_string(),
        }
    }

    #[test]
    fn test_issue_assigns_monotonic_ids_from_one() {
        let router = router(BackendKind::CallbackA);
        assert_eq!(router.issue(entry_ctx("alice"), 1), 1);
        assert_eq!(router.issue(entry_ctx("bob"), 2), 2);
        assert_eq!(router.pending_count(), 2);
    }

    #[test]
    fn test_take_is_exactly_once() {
        let router = router(BackendKind::CallbackA);
        let id = router.issue(entry_ctx("alice"), 1);

        let ticket = router.take("resolver", id).unwrap();
        assert_eq!(ticket.count, 1);

        let err = router.take("resolver", id).unwrap_err();
        assert_eq!(
            err,
            EngineError::State(StateError::RequestNotInProgress(id))
        );
    }

    #[test]
    fn test_only_resolver_may_take() {
        let router = router(BackendKind::CallbackB);
        let id = router.issue(entry_ctx("alice"), 1);

        let err = router.take("mallory", id).unwrap_err();
        assert!(matches!(err, EngineError::Authorization(_)));
        // The ticket survived the rejected call.
        assert!(router.ticket(id).is_some());
    }

    #[test]
    fn test_backend_switch_strands_requests() {
        let router = router(BackendKind::ImmediateHash);
        let id = router.issue(entry_ctx("alice"), 1);

        router.set_active_backend(BackendKind::CallbackA);
        let err = router.take("resolver", id).unwrap_err();
        assert_eq!(err, EngineError::State(StateError::BackendMismatch(id)));

        // Requests issued under the new backend resolve normally.
        let id2 = router.issue(entry_ctx("bob"), 1);
        assert!(router.take("resolver", id2).is_ok());

        // Restoring the original backend makes the stranded ticket live again.
        router.set_active_backend(BackendKind::ImmediateHash);
        assert!(router.take("resolver", id).is_ok());
    }

    #[test]
    fn test_derive_values_is_deterministic_per_request() {
        let router = router(BackendKind::ImmediateHash);
        let id = router.issue(entry_ctx("alice"), 3);

        let first = router.derive_values(id).unwrap();
        let second = router.derive_values(id).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);

        let other = router.issue(entry_ctx("bob"), 3);
        assert_ne!(first, router.derive_values(other).unwrap());
    }

    #[test]
    fn test_derive_values_rejects_callback_tickets() {
        let router = router(BackendKind::CallbackA);
        let id = router.issue(entry_ctx("alice"), 1);
        assert!(router.derive_values(id).is_err());
    }

    #[test]
    fn test_discard_makes_late_resolution_fail() {
        let router = router(BackendKind::CallbackA);
        let id = router.issue(entry_ctx("alice"), 1);
        assert!(router.discard(id));
        assert!(!router.discard(id));

        let err = router.take("resolver", id).unwrap_err();
        assert_eq!(
            err,
            EngineError::State(StateError::RequestNotInProgress(id))
        );
    }
}
