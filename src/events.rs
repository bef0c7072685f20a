//! Observable engine events.
//!
//! Events are appended to an in-memory log after the state mutation that
//! produced them has committed. The log is an observation surface only;
//! nothing in the engine reads it back.

use crate::types::{AccountId, Amount, RequestId, RiskLevel, RoundId};
use serde::Serialize;
use std::sync::RwLock;

/// Everything the engine announces to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PlinkoEntrySubmitted {
        owner: AccountId,
        request_id: RequestId,
        stake: Amount,
        count: u32,
        risk: RiskLevel,
        rows: u8,
    },
    PlinkoEntryResolved {
        owner: AccountId,
        request_id: RequestId,
        payout: Amount,
        played: u32,
    },
    PlinkoEntryWithdrawn {
        owner: AccountId,
        refund: Amount,
    },
    SpinEntrySubmitted {
        owner: AccountId,
        round_id: RoundId,
        total: Amount,
    },
    RoundRandomnessRequested {
        round_id: RoundId,
        request_id: RequestId,
    },
    RoundResolved {
        round_id: RoundId,
        result: u64,
    },
    RoundFailed {
        round_id: RoundId,
    },
    EntriesClaimed {
        beneficiary: AccountId,
        round_ids: Vec<RoundId>,
        rewards: Vec<Amount>,
    },
    SpinEntryWithdrawn {
        owner: AccountId,
        round_id: RoundId,
        refund: Amount,
    },
    FailedRequestIds {
        ids: Vec<RequestId>,
    },
}

/// Append-only event log.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<EngineEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn record(&self, event: EngineEvent) {
        self.events.write().expect("event log poisoned").push(event);
    }

    /// Copy of everything recorded so far, in order.
    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events.read().expect("event log poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().expect("event log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_preserves_order() {
        let log = EventLog::new();
        log.record(EngineEvent::RoundFailed { round_id: 1 });
        log.record(EngineEvent::RoundResolved {
            round_id: 2,
            result: 42,
        });

        let events = log.snapshot();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], EngineEvent::RoundFailed { round_id: 1 });
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let event = EngineEvent::PlinkoEntryWithdrawn {
            owner: "alice".to_string(),
            refund: 500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"plinko_entry_withdrawn\""));
        assert!(json.contains("\"refund\":500"));
    }
}
