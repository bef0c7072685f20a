//! Engine facade: wires configuration, ledger, randomness and both
//! settlement coordinators into one assembly.

use crate::batch::BatchProcessor;
use crate::clock::TickClock;
use crate::config::EngineConfig;
use crate::errors::{AuthError, EngineResult};
use crate::events::EventLog;
use crate::ledger::FungibleLedger;
use crate::plinko::PlinkoGame;
use crate::randomness::{BackendKind, RandomnessRouter};
use crate::rewards::RewardEngine;
use crate::spin::SpinGame;
use crate::types::Tick;
use std::sync::Arc;

/// Fully wired settlement engine.
pub struct Engine {
    config: Arc<EngineConfig>,
    clock: Arc<TickClock>,
    router: Arc<RandomnessRouter>,
    rewards: Arc<RewardEngine>,
    events: Arc<EventLog>,
    ledger: Arc<dyn FungibleLedger>,
    plinko: Arc<PlinkoGame>,
    spin: Arc<SpinGame>,
    batch: Arc<BatchProcessor>,
}

impl Engine {
    /// Build an engine with a random immediate-hash seed. Fails with a
    /// Configuration error before any state exists if the config is bad.
    pub fn new(config: EngineConfig, ledger: Arc<dyn FungibleLedger>) -> EngineResult<Self> {
        Self::with_seed(config, ledger, rand::random())
    }

    /// Build an engine with an explicit immediate-hash seed, for
    /// reproducible tests and replay.
    pub fn with_seed(
        config: EngineConfig,
        ledger: Arc<dyn FungibleLedger>,
        seed: [u8; 32],
    ) -> EngineResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let clock = Arc::new(TickClock::new());
        let events = Arc::new(EventLog::new());
        let router = Arc::new(RandomnessRouter::new(
            config.identities.resolver.clone(),
            config.randomness.active_backend,
            clock.clone(),
            seed,
        ));
        let rewards = Arc::new(RewardEngine::new());

        let plinko = Arc::new(PlinkoGame::new(
            config.clone(),
            ledger.clone(),
            router.clone(),
            rewards.clone(),
            clock.clone(),
            events.clone(),
        ));
        let spin = Arc::new(SpinGame::new(
            config.clone(),
            ledger.clone(),
            router.clone(),
            clock.clone(),
            events.clone(),
        ));
        let batch = Arc::new(BatchProcessor::new(
            config.clone(),
            router.clone(),
            plinko.clone(),
            spin.clone(),
            events.clone(),
        ));

        tracing::info!(backend = %config.randomness.active_backend, "engine assembled");
        Ok(Self {
            config,
            clock,
            router,
            rewards,
            events,
            ledger,
            plinko,
            spin,
            batch,
        })
    }

    pub fn plinko(&self) -> &PlinkoGame {
        &self.plinko
    }

    pub fn spin(&self) -> &SpinGame {
        &self.spin
    }

    pub fn batch(&self) -> &BatchProcessor {
        &self.batch
    }

    pub fn rewards(&self) -> &RewardEngine {
        &self.rewards
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn ledger(&self) -> &Arc<dyn FungibleLedger> {
        &self.ledger
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Advance the discrete clock; drives the timeout fail-safes.
    pub fn advance_ticks(&self, ticks: Tick) {
        self.clock.advance(ticks);
    }

    pub fn current_tick(&self) -> Tick {
        self.clock.now()
    }

    pub fn active_backend(&self) -> BackendKind {
        self.router.active_backend()
    }

    /// Switch the active randomness backend. Owner/manager only.
    /// Requests issued under the previous backend become unresolvable and
    /// exit through the timeout paths.
    pub fn set_active_backend(&self, caller: &str, backend: BackendKind) -> EngineResult<()> {
        if !self.config.is_manager(caller) {
            return Err(AuthError::NotManager(caller.to_string()).into());
        }
        self.router.set_active_backend(backend);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::errors::EngineError;
    use crate::ledger::InMemoryLedger;

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.identities.host = String::new();
        let result = Engine::new(config, Arc::new(InMemoryLedger::new()));
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_backend_switch_requires_manager() {
        let config = ConfigBuilder::new().build();
        let engine = Engine::new(config, Arc::new(InMemoryLedger::new())).unwrap();

        assert!(engine
            .set_active_backend("mallory", BackendKind::CallbackB)
            .is_err());
        assert_eq!(engine.active_backend(), BackendKind::ImmediateHash);

        engine
            .set_active_backend("owner", BackendKind::CallbackB)
            .unwrap();
        assert_eq!(engine.active_backend(), BackendKind::CallbackB);
    }

    #[test]
    fn test_tick_driver() {
        let engine = Engine::new(EngineConfig::default(), Arc::new(InMemoryLedger::new())).unwrap();
        assert_eq!(engine.current_tick(), 0);
        engine.advance_ticks(7);
        assert_eq!(engine.current_tick(), 7);
    }
}
