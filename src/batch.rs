//! Bounded batch resolution with per-item partial failure.
//!
//! Each request id in a batch resolves independently and is dispatched to
//! the coordinator owning it (individual entry or pooled round). Items
//! that fail are reported in a zero-padded, order-preserving failure list;
//! items that already succeeded within the same call stay committed.

use crate::config::EngineConfig;
use crate::errors::{EngineResult, LimitError, StateError, ValidationError};
use crate::events::{EngineEvent, EventLog};
use crate::plinko::PlinkoGame;
use crate::randomness::{BackendKind, RandomnessRouter, RequestContext};
use crate::spin::SpinGame;
use crate::types::RequestId;
use std::sync::Arc;

/// One resolution delivery: a request id and its raw values. Values may be
/// left empty for immediate-hash requests, in which case they are derived
/// in-band.
#[derive(Debug, Clone)]
pub struct ResolveItem {
    pub request_id: RequestId,
    pub values: Vec<u64>,
}

impl ResolveItem {
    pub fn new(request_id: RequestId, values: Vec<u64>) -> Self {
        Self { request_id, values }
    }

    /// Item for an immediate-hash request whose values are derived in-band.
    pub fn immediate(request_id: RequestId) -> Self {
        Self {
            request_id,
            values: Vec::new(),
        }
    }
}

/// Batch resolve/claim front end over both coordinators.
pub struct BatchProcessor {
    config: Arc<EngineConfig>,
    router: Arc<RandomnessRouter>,
    plinko: Arc<PlinkoGame>,
    spin: Arc<SpinGame>,
    events: Arc<EventLog>,
}

impl BatchProcessor {
    pub fn new(
        config: Arc<EngineConfig>,
        router: Arc<RandomnessRouter>,
        plinko: Arc<PlinkoGame>,
        spin: Arc<SpinGame>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            config,
            router,
            plinko,
            spin,
            events,
        }
    }

    /// Resolve up to `resolve_limit` requests in one call. Returns the
    /// failure list: position `i` carries `items[i].request_id` if that
    /// item failed, 0 if it succeeded. Oversized batches fail entirely
    /// before touching any item.
    pub fn batch_resolve(&self, caller: &str, items: &[ResolveItem]) -> EngineResult<Vec<RequestId>> {
        let limit = self.config.batch.resolve_limit;
        if items.len() > limit {
            return Err(LimitError::BatchSizeExceeded {
                len: items.len(),
                max: limit,
            }
            .into());
        }

        let mut failures = vec![0; items.len()];
        for (i, item) in items.iter().enumerate() {
            if let Err(err) = self.resolve_one(caller, item) {
                tracing::debug!(request = item.request_id, %err, "batch resolve item failed");
                failures[i] = item.request_id;
            }
        }

        if failures.iter().any(|&id| id != 0) {
            self.events.record(EngineEvent::FailedRequestIds {
                ids: failures.clone(),
            });
        }
        Ok(failures)
    }

    fn resolve_one(&self, caller: &str, item: &ResolveItem) -> EngineResult<()> {
        let ticket = self
            .router
            .ticket(item.request_id)
            .ok_or(StateError::RequestNotInProgress(item.request_id))?;
        let derive = ticket.backend == BackendKind::ImmediateHash && item.values.is_empty();

        match ticket.context {
            RequestContext::Entry { .. } => {
                if derive {
                    self.plinko.resolve_immediate(caller, item.request_id)?;
                } else {
                    self.plinko.resolve(caller, item.request_id, &item.values)?;
                }
            }
            RequestContext::Round { .. } => {
                if derive {
                    self.spin.resolve_immediate(caller, item.request_id)?;
                } else {
                    let raw = *item.values.first().ok_or(ValidationError::ValueCountMismatch {
                        expected: 1,
                        got: 0,
                    })?;
                    self.spin.resolve(caller, item.request_id, raw)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TickClock;
    use crate::config::ConfigBuilder;
    use crate::errors::EngineError;
    use crate::ledger::{FungibleLedger, InMemoryLedger};
    use crate::rewards::RewardEngine;
    use crate::types::RiskLevel;

    struct Fixture {
        batch: BatchProcessor,
        plinko: Arc<PlinkoGame>,
        spin: Arc<SpinGame>,
        events: Arc<EventLog>,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(
            ConfigBuilder::new()
                .active_backend(BackendKind::CallbackA)
                .build(),
        );
        let ledger = Arc::new(InMemoryLedger::new());
        for account in ["alice", "bob", "carol", "dave", "host", "protocol"] {
            ledger.opt_in(account);
            ledger.credit(account, 1_000_000).unwrap();
        }

        let clock = Arc::new(TickClock::new());
        let router = Arc::new(RandomnessRouter::new(
            config.identities.resolver.clone(),
            BackendKind::CallbackA,
            clock.clone(),
            [4u8; 32],
        ));
        let events = Arc::new(EventLog::new());
        let plinko = Arc::new(PlinkoGame::new(
            config.clone(),
            ledger.clone(),
            router.clone(),
            Arc::new(RewardEngine::new()),
            clock.clone(),
            events.clone(),
        ));
        let spin = Arc::new(SpinGame::new(
            config.clone(),
            ledger,
            router.clone(),
            clock,
            events.clone(),
        ));
        let batch = BatchProcessor::new(config, router, plinko.clone(), spin.clone(), events.clone());
        Fixture {
            batch,
            plinko,
            spin,
            events,
        }
    }

    #[test]
    fn test_batch_partial_failure_commits_successes() {
        let f = fixture();
        let id1 = f.plinko.submit("alice", 100, 1, RiskLevel::Low, 8, 0, 0).unwrap();
        let id2 = f.plinko.submit("bob", 100, 1, RiskLevel::Low, 8, 0, 0).unwrap();
        let id3 = f.plinko.submit("carol", 100, 1, RiskLevel::Low, 8, 0, 0).unwrap();
        let id4 = f.plinko.submit("dave", 100, 1, RiskLevel::Low, 8, 0, 0).unwrap();

        // Pre-resolve id2 so its batch item fails as already consumed.
        f.plinko.resolve("resolver", id2, &[0]).unwrap();

        let items = vec![
            ResolveItem::new(id1, vec![0]),
            ResolveItem::new(id2, vec![0]),
            ResolveItem::new(id3, vec![0]),
            ResolveItem::new(id4, vec![0]),
        ];
        let failures = f.batch.batch_resolve("resolver", &items).unwrap();
        assert_eq!(failures, vec![0, id2, 0, 0]);

        // The three live entries were committed despite the failure.
        assert_eq!(f.plinko.pending_count(), 0);
        let events = f.events.snapshot();
        assert!(events.contains(&EngineEvent::FailedRequestIds {
            ids: vec![0, id2, 0, 0],
        }));
    }

    #[test]
    fn test_oversized_batch_rejected_entirely() {
        let f = fixture();
        let id = f.plinko.submit("alice", 100, 1, RiskLevel::Low, 8, 0, 0).unwrap();

        let items: Vec<ResolveItem> = (0..21)
            .map(|_| ResolveItem::new(id, vec![0]))
            .collect();
        let err = f.batch.batch_resolve("resolver", &items).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Limit(LimitError::BatchSizeExceeded { len: 21, max: 20 })
        ));
        // Nothing was resolved.
        assert_eq!(f.plinko.pending_count(), 1);
    }

    #[test]
    fn test_batch_dispatches_round_requests() {
        let f = fixture();
        f.spin.submit("alice", &[0], &[100]).unwrap();
        let round_request = f.spin.pause_and_request("owner").unwrap();
        let entry_request = f.plinko.submit("bob", 100, 1, RiskLevel::Low, 8, 0, 0).unwrap();

        let failures = f
            .batch
            .batch_resolve(
                "resolver",
                &[
                    ResolveItem::new(round_request, vec![4]),
                    ResolveItem::new(entry_request, vec![0]),
                ],
            )
            .unwrap();
        assert_eq!(failures, vec![0, 0]);
        assert_eq!(f.spin.current_round(), 2);
        assert_eq!(f.plinko.pending_count(), 0);
    }

    #[test]
    fn test_unknown_id_reported_not_fatal() {
        let f = fixture();
        let id = f.plinko.submit("alice", 100, 1, RiskLevel::Low, 8, 0, 0).unwrap();
        let failures = f
            .batch
            .batch_resolve(
                "resolver",
                &[ResolveItem::new(9_999, vec![0]), ResolveItem::new(id, vec![0])],
            )
            .unwrap();
        assert_eq!(failures, vec![9_999, 0]);
    }
}
