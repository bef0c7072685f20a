//! Fairline - Provably-Fair Wagering Settlement Engine
//!
//! Deterministic settlement core for games of chance: users stake fungible
//! tokens on an individual-model game (Plinko) or a pooled-round game
//! (Spin); a pluggable randomness backend supplies entropy asynchronously;
//! the engine converts entropy plus wager parameters into payouts, fees
//! and refunds with exactly-once resolution, conservation of value across
//! mint/burn, and timeout fail-safes when entropy never arrives.
//!
//! Execution is strictly sequential: every public operation is atomic
//! relative to every other, and long-running entropy acquisition is
//! modeled as two calls (`issue`, then an arbitrarily delayed `resolve`)
//! rather than a blocking wait.

pub mod batch;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod plinko;
pub mod randomness;
pub mod rewards;
pub mod spin;
pub mod types;

pub use batch::{BatchProcessor, ResolveItem};
pub use clock::{TickClock, TimeoutGuard};
pub use config::{ConfigBuilder, ConfigLoader, EngineConfig};
pub use engine::Engine;
pub use errors::{EngineError, EngineResult};
pub use events::{EngineEvent, EventLog};
pub use ledger::{FungibleLedger, InMemoryLedger};
pub use plinko::{PlinkoEntry, PlinkoGame, PlinkoSettlement};
pub use randomness::{BackendKind, RandomnessRouter, RequestContext, RequestTicket};
pub use rewards::RewardEngine;
pub use spin::{RoundOutcome, SpinEntry, SpinGame};
pub use types::{AccountId, Amount, RequestId, RiskLevel, RoundId, Tick, WAD};
