//! Pooled-model settlement coordinator (Spin).
//!
//! All participants stake into one shared round; the round pauses, draws a
//! single random result, and payouts are pull-based via `claim`. Unlike
//! the individual model, host/protocol fees are realized at submission
//! time, which is why a failed-round withdraw also reverses them.

use crate::clock::{TickClock, TimeoutGuard};
use crate::config::EngineConfig;
use crate::errors::{
    AuthError, EngineResult, LedgerError, LimitError, NotFoundError, StateError, ValidationError,
};
use crate::events::{EngineEvent, EventLog};
use crate::ledger::FungibleLedger;
use crate::randomness::{RandomnessRouter, RequestContext};
use crate::rewards::{
    decode_side, side_wins, spin_reward, SPIN_MODE_PICK_LIMIT,
};
use crate::types::{AccountId, Amount, RequestId, RoundId, Tick, WAD};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Terminal state of a past round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Resolved(u64),
    Failed,
}

/// One user's stakes within a round. Sides are stored in the validated,
/// strictly ascending order they were submitted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpinEntry {
    pub owner: AccountId,
    pub round_id: RoundId,
    pub picks: Vec<(u16, Amount)>,
    pub total: Amount,
}

#[derive(Debug, Clone, Copy)]
struct PausedState {
    paused_at: Tick,
    request_id: RequestId,
}

#[derive(Debug, Default)]
struct Book {
    /// Current round id; the current round is Open unless `paused` is set.
    current: RoundId,
    paused: Option<PausedState>,
    history: HashMap<RoundId, RoundOutcome>,
    entries: HashMap<(AccountId, RoundId), SpinEntry>,
    /// Stake accumulated per mode within the current round.
    mode_totals: [Amount; 3],
}

/// Settlement coordinator for the pooled model.
pub struct SpinGame {
    config: Arc<EngineConfig>,
    ledger: Arc<dyn FungibleLedger>,
    router: Arc<RandomnessRouter>,
    clock: Arc<TickClock>,
    guard: TimeoutGuard,
    events: Arc<EventLog>,
    book: RwLock<Book>,
}

impl SpinGame {
    pub fn new(
        config: Arc<EngineConfig>,
        ledger: Arc<dyn FungibleLedger>,
        router: Arc<RandomnessRouter>,
        clock: Arc<TickClock>,
        events: Arc<EventLog>,
    ) -> Self {
        let guard = TimeoutGuard::new(config.timing.timeout_ticks);
        let book = Book {
            current: 1,
            ..Book::default()
        };
        Self {
            config,
            ledger,
            router,
            clock,
            guard,
            events,
            book: RwLock::new(book),
        }
    }

    /// Stake into the currently open round. Fees are credited to host and
    /// protocol immediately, proportional to the staked total.
    pub fn submit(&self, owner: &str, sides: &[u16], amounts: &[Amount]) -> EngineResult<RoundId> {
        if sides.is_empty() {
            return Err(ValidationError::EmptyPicks.into());
        }
        if sides.len() != amounts.len() {
            return Err(ValidationError::ValueCountMismatch {
                expected: sides.len(),
                got: amounts.len(),
            }
            .into());
        }

        let mut mode_counts = [0usize; 3];
        let mut mode_sums = [0u128; 3];
        let mut total: Amount = 0;
        let mut worst_reward: Amount = 0;
        let mut previous: Option<u16> = None;
        for (&side, &amount) in sides.iter().zip(amounts) {
            let (mode, _) = decode_side(side)?;
            if let Some(prev) = previous {
                if side <= prev {
                    return Err(ValidationError::SidesNotAscending.into());
                }
            }
            previous = Some(side);

            if amount < self.config.wager.min_spin_amount {
                return Err(ValidationError::BelowMinimum {
                    amount,
                    min: self.config.wager.min_spin_amount,
                }
                .into());
            }

            let mode = mode as usize;
            mode_counts[mode] += 1;
            if mode_counts[mode] > SPIN_MODE_PICK_LIMIT[mode] {
                return Err(ValidationError::ModePickLimit {
                    mode: mode as u8,
                    max: SPIN_MODE_PICK_LIMIT[mode],
                }
                .into());
            }
            mode_sums[mode] = mode_sums[mode]
                .checked_add(amount)
                .ok_or(ValidationError::AmountOverflow)?;
            total = total
                .checked_add(amount)
                .ok_or(ValidationError::AmountOverflow)?;
            // Bound the claim-time payout now so a winning entry can
            // always be paid later.
            worst_reward = worst_reward
                .checked_add(spin_reward(amount, mode as u8, self.config.fees.ppv)?)
                .ok_or(ValidationError::AmountOverflow)?;
        }

        let mut book = self.book.write().expect("spin book poisoned");
        if book.paused.is_some() {
            return Err(StateError::RoundAlreadyPaused.into());
        }
        let round_id = book.current;
        let key = (owner.to_string(), round_id);
        if book.entries.contains_key(&key) {
            return Err(StateError::EntryInProgress.into());
        }

        let mut projected = [0u128; 3];
        for mode in 0..3 {
            projected[mode] = book.mode_totals[mode]
                .checked_add(mode_sums[mode])
                .ok_or(ValidationError::AmountOverflow)?;
            let cap = self.config.wager.mode_stake_caps[mode];
            if cap > 0 && projected[mode] > cap {
                return Err(LimitError::ModeStakeCapExceeded {
                    mode: mode as u8,
                    cap,
                }
                .into());
            }
        }

        let host_fee = total
            .checked_mul(self.config.host_fee_fraction())
            .ok_or(ValidationError::AmountOverflow)?
            / WAD;
        let protocol_fee = total
            .checked_mul(self.config.protocol_fee_fraction())
            .ok_or(ValidationError::AmountOverflow)?
            / WAD;

        self.ensure_fee_recipients_authorized(host_fee, protocol_fee)?;
        self.ledger.debit(owner, total)?;
        if host_fee > 0 {
            self.ledger.credit(&self.config.identities.host, host_fee)?;
        }
        if protocol_fee > 0 {
            self.ledger
                .credit(&self.config.identities.protocol, protocol_fee)?;
        }

        book.mode_totals = projected;
        book.entries.insert(
            key,
            SpinEntry {
                owner: owner.to_string(),
                round_id,
                picks: sides.iter().copied().zip(amounts.iter().copied()).collect(),
                total,
            },
        );

        tracing::info!(owner, round = round_id, total, "spin entry submitted");
        self.events.record(EngineEvent::SpinEntrySubmitted {
            owner: owner.to_string(),
            round_id,
            total,
        });
        Ok(round_id)
    }

    /// Pause the current round and request its single random number.
    /// Restricted to owner/manager identities.
    pub fn pause_and_request(&self, caller: &str) -> EngineResult<RequestId> {
        if !self.config.is_manager(caller) {
            return Err(AuthError::NotManager(caller.to_string()).into());
        }

        let mut book = self.book.write().expect("spin book poisoned");
        if book.paused.is_some() {
            return Err(StateError::RoundAlreadyPaused.into());
        }

        let round_id = book.current;
        let request_id = self
            .router
            .issue(RequestContext::Round { round_id }, 1);
        book.paused = Some(PausedState {
            paused_at: self.clock.now(),
            request_id,
        });

        tracing::info!(round = round_id, request = request_id, "round paused for randomness");
        self.events.record(EngineEvent::RoundRandomnessRequested {
            round_id,
            request_id,
        });
        Ok(request_id)
    }

    /// Resolve the paused round with its delivered random result. Opens
    /// the next round; payout is pull-based via `claim`.
    pub fn resolve(&self, caller: &str, request_id: RequestId, raw: u64) -> EngineResult<()> {
        let mut book = self.book.write().expect("spin book poisoned");

        let paused = book.paused.ok_or(StateError::RoundNotPaused)?;
        if paused.request_id != request_id {
            return Err(StateError::RequestNotForCurrentRound(request_id).into());
        }

        // Consumes the ticket; enforces resolver identity and backend tag.
        self.router.take(caller, request_id)?;

        let round_id = book.current;
        book.history.insert(round_id, RoundOutcome::Resolved(raw));
        self.open_next_round(&mut book);

        tracing::info!(round = round_id, result = raw, "round resolved");
        self.events.record(EngineEvent::RoundResolved {
            round_id,
            result: raw,
        });
        Ok(())
    }

    /// Immediate-hash convenience: derive the round result in-band.
    pub fn resolve_immediate(&self, caller: &str, request_id: RequestId) -> EngineResult<()> {
        let raws = self.router.derive_values(request_id)?;
        self.resolve(caller, request_id, raws[0])
    }

    /// Timeout fail-safe: mark the paused round failed without consuming a
    /// result. Callable by anyone once the threshold has elapsed.
    pub fn fail_round(&self) -> EngineResult<RoundId> {
        let mut book = self.book.write().expect("spin book poisoned");

        let paused = book.paused.ok_or(StateError::RoundNotPaused)?;
        self.guard.check(self.clock.now(), paused.paused_at)?;

        self.router.discard(paused.request_id);
        let round_id = book.current;
        book.history.insert(round_id, RoundOutcome::Failed);
        self.open_next_round(&mut book);

        tracing::warn!(round = round_id, "round failed; randomness never arrived");
        self.events.record(EngineEvent::RoundFailed { round_id });
        Ok(round_id)
    }

    /// Claim `beneficiary`'s winnings in one resolved round. Anyone may
    /// trigger the claim; a missing entry is a silent no-op returning 0.
    pub fn claim(&self, round_id: RoundId, beneficiary: &str) -> EngineResult<Amount> {
        let mut book = self.book.write().expect("spin book poisoned");
        let reward = match self.claim_in_book(&mut book, round_id, beneficiary)? {
            Some(reward) => reward,
            // No entry was consumed, so there is nothing to announce.
            None => return Ok(0),
        };

        self.events.record(EngineEvent::EntriesClaimed {
            beneficiary: beneficiary.to_string(),
            round_ids: vec![round_id],
            rewards: vec![reward],
        });
        Ok(reward)
    }

    /// Claim across several rounds. Per-round failures (round unresolved,
    /// round failed) are skipped without aborting the batch; the returned
    /// rewards align with the input, 0 where a round was skipped.
    pub fn batch_claim(
        &self,
        round_ids: &[RoundId],
        beneficiary: &str,
    ) -> EngineResult<Vec<Amount>> {
        if round_ids.len() > self.config.batch.claim_limit {
            return Err(LimitError::BatchSizeExceeded {
                len: round_ids.len(),
                max: self.config.batch.claim_limit,
            }
            .into());
        }

        let mut book = self.book.write().expect("spin book poisoned");
        let mut rewards = Vec::with_capacity(round_ids.len());
        for &round_id in round_ids {
            match self.claim_in_book(&mut book, round_id, beneficiary) {
                Ok(reward) => rewards.push(reward.unwrap_or(0)),
                Err(err) => {
                    tracing::debug!(round = round_id, %err, "batch claim skipped round");
                    rewards.push(0);
                }
            }
        }

        self.events.record(EngineEvent::EntriesClaimed {
            beneficiary: beneficiary.to_string(),
            round_ids: round_ids.to_vec(),
            rewards: rewards.clone(),
        });
        Ok(rewards)
    }

    /// Withdraw a stake from a failed round, reversing the fees that were
    /// realized at submission time. Never permitted for open, future, or
    /// successfully resolved rounds.
    pub fn withdraw(&self, round_id: RoundId, beneficiary: &str) -> EngineResult<Amount> {
        let mut book = self.book.write().expect("spin book poisoned");

        match book.history.get(&round_id) {
            Some(RoundOutcome::Failed) => {}
            Some(RoundOutcome::Resolved(_)) => {
                return Err(StateError::CannotWithdrawFromSuccessfulRound(round_id).into());
            }
            None => return Err(StateError::RoundStillOpen(round_id).into()),
        }

        let key = (beneficiary.to_string(), round_id);
        let entry = book
            .entries
            .get(&key)
            .ok_or_else(|| NotFoundError::NoEntryForRound {
                account: beneficiary.to_string(),
                round: round_id,
            })?
            .clone();

        let host_fee = entry.total * self.config.host_fee_fraction() / WAD;
        let protocol_fee = entry.total * self.config.protocol_fee_fraction() / WAD;
        self.ensure_reversible(beneficiary, host_fee, protocol_fee)?;

        if host_fee > 0 {
            self.ledger.debit(&self.config.identities.host, host_fee)?;
        }
        if protocol_fee > 0 {
            self.ledger
                .debit(&self.config.identities.protocol, protocol_fee)?;
        }
        self.ledger.credit(beneficiary, entry.total)?;

        book.entries.remove(&key);

        tracing::info!(owner = beneficiary, round = round_id, refund = entry.total, "spin entry withdrawn");
        self.events.record(EngineEvent::SpinEntryWithdrawn {
            owner: beneficiary.to_string(),
            round_id,
            refund: entry.total,
        });
        Ok(entry.total)
    }

    /// For each input round id, returns the id if `user` holds an
    /// unclaimed winning entry in a resolved round, else 0. Round ids are
    /// allocated from 1, so 0 is never a legitimate id.
    pub fn filter_winning_rounds(&self, round_ids: &[RoundId], user: &str) -> Vec<RoundId> {
        let book = self.book.read().expect("spin book poisoned");
        round_ids
            .iter()
            .map(|&round_id| {
                let result = match book.history.get(&round_id) {
                    Some(RoundOutcome::Resolved(result)) => *result,
                    _ => return 0,
                };
                let key = (user.to_string(), round_id);
                match book.entries.get(&key) {
                    Some(entry)
                        if entry
                            .picks
                            .iter()
                            .any(|&(side, _)| side_wins(side, result).unwrap_or(false)) =>
                    {
                        round_id
                    }
                    _ => 0,
                }
            })
            .collect()
    }

    /// Id of the round currently accepting entries (or paused).
    pub fn current_round(&self) -> RoundId {
        self.book.read().expect("spin book poisoned").current
    }

    pub fn is_paused(&self) -> bool {
        self.book.read().expect("spin book poisoned").paused.is_some()
    }

    /// Terminal outcome of a past round, if any.
    pub fn round_outcome(&self, round_id: RoundId) -> Option<RoundOutcome> {
        self.book
            .read()
            .expect("spin book poisoned")
            .history
            .get(&round_id)
            .copied()
    }

    /// The stored entry for `(user, round)`, if not yet claimed/withdrawn.
    pub fn entry(&self, user: &str, round_id: RoundId) -> Option<SpinEntry> {
        self.book
            .read()
            .expect("spin book poisoned")
            .entries
            .get(&(user.to_string(), round_id))
            .cloned()
    }

    fn open_next_round(&self, book: &mut Book) {
        book.current += 1;
        book.paused = None;
        book.mode_totals = [0; 3];
    }

    /// Returns `None` when no entry exists for `(beneficiary, round)`, so
    /// callers can tell a real claim from a silent no-op.
    fn claim_in_book(
        &self,
        book: &mut Book,
        round_id: RoundId,
        beneficiary: &str,
    ) -> EngineResult<Option<Amount>> {
        let key = (beneficiary.to_string(), round_id);
        let entry = match book.entries.get(&key) {
            Some(entry) => entry.clone(),
            // Already claimed or withdrawn.
            None => return Ok(None),
        };

        let result = match book.history.get(&round_id) {
            Some(RoundOutcome::Resolved(result)) => *result,
            Some(RoundOutcome::Failed) => {
                return Err(StateError::RoundFailed(round_id).into());
            }
            None => return Err(StateError::RoundNotResolved(round_id).into()),
        };

        let mut reward: Amount = 0;
        for &(side, amount) in &entry.picks {
            if side_wins(side, result)? {
                let (mode, _) = decode_side(side)?;
                reward = reward
                    .checked_add(spin_reward(amount, mode, self.config.fees.ppv)?)
                    .ok_or(ValidationError::AmountOverflow)?;
            }
        }

        if reward > 0 {
            if !self.ledger.is_authorized(beneficiary) {
                return Err(LedgerError::NotOptedIn(beneficiary.to_string()).into());
            }
            self.ledger.credit(beneficiary, reward)?;
        }
        book.entries.remove(&key);

        tracing::info!(owner = beneficiary, round = round_id, reward, "spin entry claimed");
        Ok(Some(reward))
    }

    fn ensure_fee_recipients_authorized(
        &self,
        host_fee: Amount,
        protocol_fee: Amount,
    ) -> EngineResult<()> {
        if host_fee > 0 && !self.ledger.is_authorized(&self.config.identities.host) {
            return Err(LedgerError::NotOptedIn(self.config.identities.host.clone()).into());
        }
        if protocol_fee > 0 && !self.ledger.is_authorized(&self.config.identities.protocol) {
            return Err(LedgerError::NotOptedIn(self.config.identities.protocol.clone()).into());
        }
        Ok(())
    }

    /// Fee reversal must be able to complete in full before any of it runs:
    /// every debited and credited account must be opted in and funded.
    fn ensure_reversible(
        &self,
        beneficiary: &str,
        host_fee: Amount,
        protocol_fee: Amount,
    ) -> EngineResult<()> {
        if !self.ledger.is_authorized(beneficiary) {
            return Err(LedgerError::NotOptedIn(beneficiary.to_string()).into());
        }
        let host = &self.config.identities.host;
        if host_fee > 0 {
            if !self.ledger.is_authorized(host) {
                return Err(LedgerError::NotOptedIn(host.clone()).into());
            }
            if self.ledger.balance_of(host) < host_fee {
                return Err(LedgerError::InsufficientFunds {
                    needed: host_fee,
                    available: self.ledger.balance_of(host),
                }
                .into());
            }
        }
        let protocol = &self.config.identities.protocol;
        if protocol_fee > 0 {
            if !self.ledger.is_authorized(protocol) {
                return Err(LedgerError::NotOptedIn(protocol.clone()).into());
            }
            if self.ledger.balance_of(protocol) < protocol_fee {
                return Err(LedgerError::InsufficientFunds {
                    needed: protocol_fee,
                    available: self.ledger.balance_of(protocol),
                }
                .into());
            }
        }
        Ok(())
    }
}
