//! Fungible-token ledger collaborator.
//!
//! The engine never owns token balances; it debits stakes (burn) and
//! credits payouts/fees (mint) through this seam. Accounts must opt in
//! before the engine may move value on their behalf; a missing opt-in
//! propagates as an authorization failure out of whichever settlement
//! operation touched the account.

use crate::errors::{EngineResult, LedgerError};
use crate::types::{AccountId, Amount};
use dashmap::DashMap;
use std::sync::RwLock;

/// Mint/burn token ledger contract consumed by the settlement engine.
pub trait FungibleLedger: Send + Sync {
    /// Burn `amount` from `account`. Fails if the account has not opted in
    /// or holds insufficient balance.
    fn debit(&self, account: &str, amount: Amount) -> EngineResult<()>;

    /// Mint `amount` to `account`. Fails if the account has not opted in.
    fn credit(&self, account: &str, amount: Amount) -> EngineResult<()>;

    fn balance_of(&self, account: &str) -> Amount;

    /// Total minted supply; conservation checks compare deltas of this.
    fn total_supply(&self) -> Amount;

    /// Whether `account` has authorized the engine to mint/burn for it.
    fn is_authorized(&self, account: &str) -> bool;
}

/// In-memory reference ledger used by tests and embedders.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: DashMap<AccountId, Amount>,
    authorized: DashMap<AccountId, ()>,
    supply: RwLock<Amount>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorize the engine for `account`.
    pub fn opt_in(&self, account: &str) {
        self.authorized.insert(account.to_string(), ());
    }

    /// Revoke the engine's authorization for `account`.
    pub fn opt_out(&self, account: &str) {
        self.authorized.remove(account);
    }

    fn ensure_authorized(&self, account: &str) -> EngineResult<()> {
        if !self.is_authorized(account) {
            return Err(LedgerError::NotOptedIn(account.to_string()).into());
        }
        Ok(())
    }
}

impl FungibleLedger for InMemoryLedger {
    fn debit(&self, account: &str, amount: Amount) -> EngineResult<()> {
        self.ensure_authorized(account)?;

        let mut entry = self.balances.entry(account.to_string()).or_insert(0);
        if *entry < amount {
            return Err(LedgerError::InsufficientFunds {
                needed: amount,
                available: *entry,
            }
            .into());
        }
        *entry -= amount;
        drop(entry);

        *self.supply.write().expect("supply lock poisoned") -= amount;
        Ok(())
    }

    fn credit(&self, account: &str, amount: Amount) -> EngineResult<()> {
        self.ensure_authorized(account)?;

        *self.balances.entry(account.to_string()).or_insert(0) += amount;
        *self.supply.write().expect("supply lock poisoned") += amount;
        Ok(())
    }

    fn balance_of(&self, account: &str) -> Amount {
        self.balances.get(account).map(|b| *b).unwrap_or(0)
    }

    fn total_supply(&self) -> Amount {
        *self.supply.read().expect("supply lock poisoned")
    }

    fn is_authorized(&self, account: &str) -> bool {
        self.authorized.contains_key(account)
    }
}
