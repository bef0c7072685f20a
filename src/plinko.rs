//! Individual-model settlement coordinator (Plinko).
//!
//! One pending entry per account. Submission debits the full stake and
//! issues a single randomness request sized to the subplay count; the
//! later resolution replays each subplay against the reward tables,
//! honoring stop-loss/stop-gain early exit, and settles user reward plus
//! host/protocol fees from the stake snapshot captured at submission.

use crate::clock::{TickClock, TimeoutGuard};
use crate::config::EngineConfig;
use crate::errors::{
    EngineResult, LedgerError, NotFoundError, StateError, ValidationError,
};
use crate::events::{EngineEvent, EventLog};
use crate::ledger::FungibleLedger;
use crate::randomness::{RandomnessRouter, RequestContext};
use crate::rewards::RewardEngine;
use crate::types::{AccountId, Amount, RequestId, RiskLevel, Tick, WAD};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// One user's pending individual wager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlinkoEntry {
    pub owner: AccountId,
    /// Stake per subplay.
    pub stake: Amount,
    pub count: u32,
    pub risk: RiskLevel,
    pub rows: u8,
    /// Cumulative net-loss threshold halting further subplays; 0 disables.
    pub stop_loss: Amount,
    /// Cumulative net-gain threshold halting further subplays; 0 disables.
    pub stop_gain: Amount,
    pub request_id: RequestId,
    pub submitted_at: Tick,
}

/// Outcome of a resolved entry, returned to the caller and mirrored in the
/// event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlinkoSettlement {
    /// Sum of subplay rewards plus unplayed-subplay refunds.
    pub payout: Amount,
    /// Subplays actually evaluated before a stop threshold hit.
    pub played: u32,
    /// Stake refunded for unplayed subplays, included in `payout`.
    pub refund: Amount,
    pub host_fee: Amount,
    pub protocol_fee: Amount,
}

#[derive(Debug, Default)]
struct Book {
    by_owner: HashMap<AccountId, RequestId>,
    by_request: HashMap<RequestId, PlinkoEntry>,
}

/// Settlement coordinator for the individual model.
pub struct PlinkoGame {
    config: Arc<EngineConfig>,
    ledger: Arc<dyn FungibleLedger>,
    router: Arc<RandomnessRouter>,
    rewards: Arc<RewardEngine>,
    clock: Arc<TickClock>,
    guard: TimeoutGuard,
    events: Arc<EventLog>,
    book: RwLock<Book>,
}

impl PlinkoGame {
    pub fn new(
        config: Arc<EngineConfig>,
        ledger: Arc<dyn FungibleLedger>,
        router: Arc<RandomnessRouter>,
        rewards: Arc<RewardEngine>,
        clock: Arc<TickClock>,
        events: Arc<EventLog>,
    ) -> Self {
        let guard = TimeoutGuard::new(config.timing.timeout_ticks);
        Self {
            config,
            ledger,
            router,
            rewards,
            clock,
            guard,
            events,
            book: RwLock::new(Book::default()),
        }
    }

    /// Submit a wager of `count` subplays at `stake` each. Debits
    /// `stake * count` and issues one randomness request for the wager.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &self,
        owner: &str,
        stake: Amount,
        count: u32,
        risk: RiskLevel,
        rows: u8,
        stop_loss: Amount,
        stop_gain: Amount,
    ) -> EngineResult<RequestId> {
        if stake == 0 {
            return Err(ValidationError::ZeroStake.into());
        }
        if count == 0 || count > self.config.wager.max_subplays {
            return Err(ValidationError::CountLimitExceeded {
                count,
                max: self.config.wager.max_subplays,
            }
            .into());
        }
        let total = stake
            .checked_mul(count as u128)
            .ok_or(ValidationError::AmountOverflow)?;
        if total < self.config.wager.min_wager {
            return Err(ValidationError::BelowMinimum {
                amount: total,
                min: self.config.wager.min_wager,
            }
            .into());
        }
        let max_multiplier = self.rewards.max_multiplier(risk, rows)?;
        // Settlement math must stay exact: every subplay at the table
        // maximum plus the refund must fit u128 (and i128 for the running
        // net), and so must the fee computation on the full stake.
        let worst_payout = stake
            .checked_mul(max_multiplier)
            .map(|v| v / WAD)
            .and_then(|v| v.checked_mul(count as u128))
            .and_then(|v| v.checked_add(total))
            .ok_or(ValidationError::AmountOverflow)?;
        if i128::try_from(worst_payout).is_err()
            || total.checked_mul(self.config.host_fee_fraction()).is_none()
        {
            return Err(ValidationError::AmountOverflow.into());
        }

        let mut book = self.book.write().expect("plinko book poisoned");
        if book.by_owner.contains_key(owner) {
            return Err(StateError::EntryInProgress.into());
        }

        self.ledger.debit(owner, total)?;

        let request_id = self.router.issue(
            RequestContext::Entry {
                owner: owner.to_string(),
            },
            count as usize,
        );
        let entry = PlinkoEntry {
            owner: owner.to_string(),
            stake,
            count,
            risk,
            rows,
            stop_loss,
            stop_gain,
            request_id,
            submitted_at: self.clock.now(),
        };
        book.by_owner.insert(owner.to_string(), request_id);
        book.by_request.insert(request_id, entry);

        tracing::info!(owner, request = request_id, stake, count, "plinko entry submitted");
        self.events.record(EngineEvent::PlinkoEntrySubmitted {
            owner: owner.to_string(),
            request_id,
            stake,
            count,
            risk,
            rows,
        });
        Ok(request_id)
    }

    /// Resolve a pending entry with externally delivered raw values.
    pub fn resolve(
        &self,
        caller: &str,
        request_id: RequestId,
        raws: &[u64],
    ) -> EngineResult<PlinkoSettlement> {
        let mut book = self.book.write().expect("plinko book poisoned");

        let entry = book
            .by_request
            .get(&request_id)
            .ok_or(StateError::RequestNotInProgress(request_id))?
            .clone();
        if raws.len() != entry.count as usize {
            return Err(ValidationError::ValueCountMismatch {
                expected: entry.count as usize,
                got: raws.len(),
            }
            .into());
        }

        // Compute the full settlement before consuming anything so a
        // rejected resolution leaves every piece of state untouched.
        let settlement = self.settle(&entry, raws)?;
        self.ensure_payable(&entry.owner, &settlement)?;

        // Consumes the ticket; enforces resolver identity and backend tag.
        self.router.take(caller, request_id)?;

        if settlement.payout > 0 {
            self.ledger.credit(&entry.owner, settlement.payout)?;
        }
        if settlement.host_fee > 0 {
            self.ledger
                .credit(&self.config.identities.host, settlement.host_fee)?;
        }
        if settlement.protocol_fee > 0 {
            self.ledger
                .credit(&self.config.identities.protocol, settlement.protocol_fee)?;
        }

        book.by_owner.remove(&entry.owner);
        book.by_request.remove(&request_id);

        tracing::info!(
            owner = %entry.owner,
            request = request_id,
            payout = settlement.payout,
            played = settlement.played,
            "plinko entry resolved"
        );
        self.events.record(EngineEvent::PlinkoEntryResolved {
            owner: entry.owner.clone(),
            request_id,
            payout: settlement.payout,
            played: settlement.played,
        });
        Ok(settlement)
    }

    /// Immediate-hash convenience: derive the draws in-band and resolve.
    pub fn resolve_immediate(
        &self,
        caller: &str,
        request_id: RequestId,
    ) -> EngineResult<PlinkoSettlement> {
        let raws = self.router.derive_values(request_id)?;
        self.resolve(caller, request_id, &raws)
    }

    /// Timeout fail-safe: refund the full original stake once the
    /// threshold has elapsed and the entry is still pending.
    pub fn withdraw(&self, owner: &str) -> EngineResult<Amount> {
        let mut book = self.book.write().expect("plinko book poisoned");

        let request_id = *book
            .by_owner
            .get(owner)
            .ok_or_else(|| NotFoundError::NoEntryForAccount(owner.to_string()))?;
        let entry = book
            .by_request
            .get(&request_id)
            .cloned()
            .ok_or_else(|| NotFoundError::NoEntryForAccount(owner.to_string()))?;

        self.guard.check(self.clock.now(), entry.submitted_at)?;

        let refund = entry.stake * entry.count as u128;
        if !self.ledger.is_authorized(owner) {
            return Err(LedgerError::NotOptedIn(owner.to_string()).into());
        }
        self.ledger.credit(owner, refund)?;

        self.router.discard(request_id);
        book.by_owner.remove(owner);
        book.by_request.remove(&request_id);

        tracing::info!(owner, request = request_id, refund, "plinko entry withdrawn");
        self.events.record(EngineEvent::PlinkoEntryWithdrawn {
            owner: owner.to_string(),
            refund,
        });
        Ok(refund)
    }

    /// The pending entry for `owner`, if any.
    pub fn pending_entry(&self, owner: &str) -> Option<PlinkoEntry> {
        let book = self.book.read().expect("plinko book poisoned");
        let request_id = book.by_owner.get(owner)?;
        book.by_request.get(request_id).cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.book.read().expect("plinko book poisoned").by_owner.len()
    }

    /// Pure settlement computation for one entry against its raw draws.
    fn settle(&self, entry: &PlinkoEntry, raws: &[u64]) -> EngineResult<PlinkoSettlement> {
        let mut rewards_sum: Amount = 0;
        let mut net: i128 = 0;
        let mut played: u32 = 0;

        for &raw in raws {
            let reward = self
                .rewards
                .plinko_reward(entry.risk, entry.rows, raw, entry.stake)?;
            rewards_sum += reward;
            net += reward as i128 - entry.stake as i128;
            played += 1;

            // Thresholds beyond the i128 range can never trigger.
            if entry.stop_loss > 0
                && net <= -i128::try_from(entry.stop_loss).unwrap_or(i128::MAX)
            {
                break;
            }
            if entry.stop_gain > 0
                && net >= i128::try_from(entry.stop_gain).unwrap_or(i128::MAX)
            {
                break;
            }
        }

        let refund = entry.stake * (entry.count - played) as u128;
        let played_stake = entry.stake * played as u128;
        Ok(PlinkoSettlement {
            payout: rewards_sum + refund,
            played,
            refund,
            host_fee: played_stake * self.config.host_fee_fraction() / WAD,
            protocol_fee: played_stake * self.config.protocol_fee_fraction() / WAD,
        })
    }

    /// Authorization pre-check so credits cannot fail after the
    /// randomness ticket has been consumed.
    fn ensure_payable(&self, owner: &str, settlement: &PlinkoSettlement) -> EngineResult<()> {
        if settlement.payout > 0 && !self.ledger.is_authorized(owner) {
            return Err(LedgerError::NotOptedIn(owner.to_string()).into());
        }
        if settlement.host_fee > 0 && !self.ledger.is_authorized(&self.config.identities.host) {
            return Err(LedgerError::NotOptedIn(self.config.identities.host.clone()).into());
        }
        if settlement.protocol_fee > 0
            && !self.ledger.is_authorized(&self.config.identities.protocol)
        {
            return Err(LedgerError::NotOptedIn(self.config.identities.protocol.clone()).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::errors::EngineError;
    use crate::ledger::InMemoryLedger;
    use crate::randomness::BackendKind;

    struct Fixture {
        game: PlinkoGame,
        ledger: Arc<InMemoryLedger>,
        clock: Arc<TickClock>,
    }

    fn fixture(backend: BackendKind) -> Fixture {
        let config = Arc::new(ConfigBuilder::new().active_backend(backend).build());
        let ledger = Arc::new(InMemoryLedger::new());
        for account in ["alice", "bob", "host", "protocol"] {
            ledger.opt_in(account);
        }
        ledger.credit("alice", 1_000_000_000).unwrap();
        ledger.credit("bob", 1_000_000_000).unwrap();

        let clock = Arc::new(TickClock::new());
        let router = Arc::new(RandomnessRouter::new(
            config.identities.resolver.clone(),
            backend,
            clock.clone(),
            [1u8; 32],
        ));
        let game = PlinkoGame::new(
            config,
            ledger.clone(),
            router,
            Arc::new(RewardEngine::new()),
            clock.clone(),
            Arc::new(EventLog::new()),
        );
        Fixture { game, ledger, clock }
    }

    #[test]
    fn test_submit_debits_and_records() {
        let f = fixture(BackendKind::CallbackA);
        let before = f.ledger.balance_of("alice");

        let id = f
            .game
            .submit("alice", 1_000, 3, RiskLevel::Low, 8, 0, 0)
            .unwrap();
        assert_eq!(f.ledger.balance_of("alice"), before - 3_000);
        assert_eq!(f.game.pending_entry("alice").unwrap().request_id, id);
    }

    #[test]
    fn test_submit_validations() {
        let f = fixture(BackendKind::CallbackA);
        assert!(matches!(
            f.game.submit("alice", 0, 1, RiskLevel::Low, 8, 0, 0),
            Err(EngineError::Validation(ValidationError::ZeroStake))
        ));
        assert!(matches!(
            f.game.submit("alice", 1_000, 11, RiskLevel::Low, 8, 0, 0),
            Err(EngineError::Validation(ValidationError::CountLimitExceeded { .. }))
        ));
        assert!(matches!(
            f.game.submit("alice", 1_000, 1, RiskLevel::Low, 9, 0, 0),
            Err(EngineError::Validation(ValidationError::RowsUnsupported(9)))
        ));

        f.game.submit("alice", 1_000, 1, RiskLevel::Low, 8, 0, 0).unwrap();
        assert!(matches!(
            f.game.submit("alice", 1_000, 1, RiskLevel::Low, 8, 0, 0),
            Err(EngineError::State(StateError::EntryInProgress))
        ));
    }

    #[test]
    fn test_submit_rejects_overflowing_stake() {
        let f = fixture(BackendKind::CallbackA);
        let before = f.ledger.balance_of("alice");

        let err = f
            .game
            .submit("alice", u128::MAX / 4 + 251, 4, RiskLevel::Low, 8, 0, 0)
            .unwrap_err();
        assert_eq!(err, EngineError::Validation(ValidationError::AmountOverflow));
        // Nothing was debited and no entry exists.
        assert_eq!(f.ledger.balance_of("alice"), before);
        assert!(f.game.pending_entry("alice").is_none());

        // A stake whose worst-case payout overflows is rejected even when
        // the total itself fits.
        let err = f
            .game
            .submit("alice", u128::MAX / 8, 1, RiskLevel::High, 8, 0, 0)
            .unwrap_err();
        assert_eq!(err, EngineError::Validation(ValidationError::AmountOverflow));
    }

    #[test]
    fn test_resolve_pays_reward_and_fees() {
        let f = fixture(BackendKind::CallbackA);
        let id = f
            .game
            .submit("alice", 10_000, 1, RiskLevel::Low, 8, 0, 0)
            .unwrap();
        let alice_before = f.ledger.balance_of("alice");

        // raw 0 lands at position 0: 5.6x at low risk, 8 rows.
        let settlement = f.game.resolve("resolver", id, &[0]).unwrap();
        assert_eq!(settlement.payout, 56_000);
        assert_eq!(settlement.played, 1);
        // Fees: 15% resp. 5% of the 1% PPV on played stake.
        assert_eq!(settlement.host_fee, 15);
        assert_eq!(settlement.protocol_fee, 5);

        assert_eq!(f.ledger.balance_of("alice"), alice_before + 56_000);
        assert_eq!(f.ledger.balance_of("host"), 15);
        assert_eq!(f.ledger.balance_of("protocol"), 5);
        assert!(f.game.pending_entry("alice").is_none());
    }

    #[test]
    fn test_resolve_is_exactly_once() {
        let f = fixture(BackendKind::CallbackA);
        let id = f
            .game
            .submit("alice", 1_000, 1, RiskLevel::Low, 8, 0, 0)
            .unwrap();

        f.game.resolve("resolver", id, &[0]).unwrap();
        let err = f.game.resolve("resolver", id, &[0]).unwrap_err();
        assert_eq!(err, EngineError::State(StateError::RequestNotInProgress(id)));
    }

    #[test]
    fn test_resolve_rejects_wrong_value_count() {
        let f = fixture(BackendKind::CallbackA);
        let id = f
            .game
            .submit("alice", 1_000, 2, RiskLevel::Low, 8, 0, 0)
            .unwrap();
        let err = f.game.resolve("resolver", id, &[0]).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::ValueCountMismatch { expected: 2, got: 1 })
        ));
        // Entry still pending after the rejected call.
        assert!(f.game.pending_entry("alice").is_some());
    }

    #[test]
    fn test_stop_loss_refunds_unplayed_subplays() {
        let f = fixture(BackendKind::CallbackA);
        // Stake 10_000 x 2 subplays, stop-loss 5_000. The center position
        // (raw with 4 low bits set) pays 0.5x: net -5_000 on subplay one.
        let id = f
            .game
            .submit("alice", 10_000, 2, RiskLevel::Low, 8, 5_000, 5_000)
            .unwrap();

        let settlement = f.game.resolve("resolver", id, &[0b1111, 0]).unwrap();
        assert_eq!(settlement.played, 1);
        assert_eq!(settlement.refund, 10_000);
        // 0.5x reward on the played subplay plus full refund of the second.
        assert_eq!(settlement.payout, 5_000 + 10_000);
        // Fees only on the played subplay.
        assert_eq!(settlement.host_fee, 15);
        assert_eq!(settlement.protocol_fee, 5);
    }

    #[test]
    fn test_stop_gain_halts_on_win() {
        let f = fixture(BackendKind::CallbackA);
        // First subplay pays 5.6x: net +46_000 >= stop-gain.
        let id = f
            .game
            .submit("alice", 10_000, 3, RiskLevel::Low, 8, 0, 40_000)
            .unwrap();

        let settlement = f.game.resolve("resolver", id, &[0, 0, 0]).unwrap();
        assert_eq!(settlement.played, 1);
        assert_eq!(settlement.refund, 20_000);
        assert_eq!(settlement.payout, 56_000 + 20_000);
    }

    #[test]
    fn test_withdraw_requires_timeout() {
        let f = fixture(BackendKind::CallbackA);
        f.game
            .submit("alice", 1_000, 2, RiskLevel::Low, 8, 0, 0)
            .unwrap();

        let err = f.game.withdraw("alice").unwrap_err();
        assert!(matches!(err, EngineError::Timing(_)));

        f.clock.advance(200);
        let refund = f.game.withdraw("alice").unwrap();
        assert_eq!(refund, 2_000);
        assert!(f.game.pending_entry("alice").is_none());

        // Withdrawn entries cannot be withdrawn again.
        assert!(matches!(
            f.game.withdraw("alice"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_withdraw_blocks_late_resolution() {
        let f = fixture(BackendKind::CallbackA);
        let id = f
            .game
            .submit("alice", 1_000, 1, RiskLevel::Low, 8, 0, 0)
            .unwrap();
        f.clock.advance(200);
        f.game.withdraw("alice").unwrap();

        let err = f.game.resolve("resolver", id, &[0]).unwrap_err();
        assert_eq!(err, EngineError::State(StateError::RequestNotInProgress(id)));
    }

    #[test]
    fn test_immediate_hash_resolution() {
        let f = fixture(BackendKind::ImmediateHash);
        let id = f
            .game
            .submit("alice", 1_000, 2, RiskLevel::Low, 8, 0, 0)
            .unwrap();

        let settlement = f.game.resolve_immediate("resolver", id).unwrap();
        assert_eq!(settlement.played, 2);
        assert!(f.game.pending_entry("alice").is_none());
    }
}
