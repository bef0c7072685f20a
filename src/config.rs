//! Configuration for the settlement engine.
//!
//! Centralized configuration with validation, defaults, TOML loading and
//! environment variable overrides. The engine only reads these values;
//! there is no hot-reload path, so a loaded config is immutable for the
//! lifetime of an [`crate::engine::Engine`].

use crate::errors::{ConfigError, EngineResult};
use crate::randomness::BackendKind;
use crate::types::{AccountId, Amount, Tick, WAD};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub identities: IdentityConfig,
    pub fees: FeeConfig,
    pub wager: WagerConfig,
    pub timing: TimingConfig,
    pub batch: BatchConfig,
    pub randomness: RandomnessConfig,
}

/// Privileged identities and fee recipients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Admin account allowed to pause rounds and switch backends.
    pub owner: AccountId,
    /// Additional accounts with manager rights.
    pub managers: Vec<AccountId>,
    /// The only identity allowed to deliver randomness resolutions.
    pub resolver: AccountId,
    /// Host fee recipient.
    pub host: AccountId,
    /// Protocol fee recipient.
    pub protocol: AccountId,
}

/// House-edge parameters, WAD-scaled. Amounts are stored as decimal
/// strings on disk because TOML has no 128-bit integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Protocol probability value: the house-edge fraction taken out of
    /// winning payouts and split between host and protocol.
    #[serde(with = "amount_field")]
    pub ppv: Amount,
}

/// Per-wager limits. Amounts are stored as decimal strings on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerConfig {
    /// Maximum subplays per individual-model wager.
    pub max_subplays: u32,
    /// Minimum total wager (`stake * count`) for the individual model.
    #[serde(with = "amount_field")]
    pub min_wager: Amount,
    /// Minimum amount per pooled-model pick.
    #[serde(with = "amount_field")]
    pub min_spin_amount: Amount,
    /// Per-mode total-stake caps for one pooled round; 0 means unlimited.
    #[serde(with = "amount_array_field")]
    pub mode_stake_caps: [Amount; 3],
}

/// Timeout fail-safe thresholds, in ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Ticks a request may stay pending before refund paths open.
    pub timeout_ticks: Tick,
}

/// Batch operation bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum items per `batch_resolve` call.
    pub resolve_limit: usize,
    /// Maximum rounds per `batch_claim` call.
    pub claim_limit: usize,
}

/// Randomness backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomnessConfig {
    /// Backend active at engine construction time.
    pub active_backend: BackendKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identities: IdentityConfig::default(),
            fees: FeeConfig::default(),
            wager: WagerConfig::default(),
            timing: TimingConfig::default(),
            batch: BatchConfig::default(),
            randomness: RandomnessConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            owner: "owner".to_string(),
            managers: vec![],
            resolver: "resolver".to_string(),
            host: "host".to_string(),
            protocol: "protocol".to_string(),
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            ppv: WAD / 100, // 1%
        }
    }
}

impl Default for WagerConfig {
    fn default() -> Self {
        Self {
            max_subplays: 10,
            min_wager: 1,
            min_spin_amount: 1,
            mode_stake_caps: [0, 0, 0],
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self { timeout_ticks: 200 }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            resolve_limit: 20,
            claim_limit: 20,
        }
    }
}

impl Default for RandomnessConfig {
    fn default() -> Self {
        Self {
            active_backend: BackendKind::ImmediateHash,
        }
    }
}

impl EngineConfig {
    /// Host fee per wagered unit: 15% of PPV, WAD-scaled.
    pub fn host_fee_fraction(&self) -> Amount {
        self.fees.ppv * 15 / 100
    }

    /// Protocol fee per wagered unit: 5% of PPV, WAD-scaled.
    pub fn protocol_fee_fraction(&self) -> Amount {
        self.fees.ppv * 5 / 100
    }

    /// Whether `caller` holds owner or manager rights.
    pub fn is_manager(&self, caller: &str) -> bool {
        self.identities.owner == caller || self.identities.managers.iter().any(|m| m == caller)
    }

    /// Validate configuration values; called at engine construction.
    pub fn validate(&self) -> EngineResult<()> {
        if self.identities.owner.is_empty() {
            return Err(ConfigError::EmptyIdentity("identities.owner").into());
        }
        if self.identities.resolver.is_empty() {
            return Err(ConfigError::EmptyIdentity("identities.resolver").into());
        }
        if self.identities.host.is_empty() {
            return Err(ConfigError::EmptyIdentity("identities.host").into());
        }
        if self.identities.protocol.is_empty() {
            return Err(ConfigError::EmptyIdentity("identities.protocol").into());
        }
        if self.identities.managers.iter().any(|m| m.is_empty()) {
            return Err(ConfigError::EmptyIdentity("identities.managers").into());
        }

        if self.fees.ppv >= WAD {
            return Err(ConfigError::InvalidValue {
                field: "fees.ppv",
                reason: "house edge must be below 100%".to_string(),
            }
            .into());
        }

        if self.wager.max_subplays == 0 {
            return Err(ConfigError::InvalidValue {
                field: "wager.max_subplays",
                reason: "must allow at least one subplay".to_string(),
            }
            .into());
        }

        if self.timing.timeout_ticks == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timing.timeout_ticks",
                reason: "timeout threshold cannot be zero".to_string(),
            }
            .into());
        }

        if self.batch.resolve_limit == 0 || self.batch.claim_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch",
                reason: "batch limits cannot be zero".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

mod amount_field {
    use super::Amount;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

mod amount_array_field {
    use super::Amount;
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        values: &[Amount; 3],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let raw: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[Amount; 3], D::Error> {
        let raw = <[String; 3]>::deserialize(deserializer)?;
        let mut values = [0; 3];
        for (slot, text) in values.iter_mut().zip(raw.iter()) {
            *slot = text.parse().map_err(de::Error::custom)?;
        }
        Ok(values)
    }
}

/// Configuration loader with environment variable support.
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path.
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables.
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::LoadFailed(format!("failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::LoadFailed(format!("failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        if let Ok(resolver) = env::var("FAIRLINE_RESOLVER") {
            config.identities.resolver = resolver;
        }
        if let Ok(owner) = env::var("FAIRLINE_OWNER") {
            config.identities.owner = owner;
        }
        if let Ok(ticks) = env::var("FAIRLINE_TIMEOUT_TICKS") {
            config.timing.timeout_ticks =
                ticks.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "FAIRLINE_TIMEOUT_TICKS",
                    reason: format!("invalid tick count '{}'", ticks),
                })?;
        }
        if let Ok(limit) = env::var("FAIRLINE_BATCH_RESOLVE_LIMIT") {
            config.batch.resolve_limit =
                limit.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "FAIRLINE_BATCH_RESOLVE_LIMIT",
                    reason: format!("invalid limit '{}'", limit),
                })?;
        }

        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigError::SaveFailed(format!("failed to write {}: {}", path, e)).into())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for programmatic configuration.
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn identities(mut self, identities: IdentityConfig) -> Self {
        self.config.identities = identities;
        self
    }

    pub fn ppv(mut self, ppv: Amount) -> Self {
        self.config.fees.ppv = ppv;
        self
    }

    pub fn wager(mut self, wager: WagerConfig) -> Self {
        self.config.wager = wager;
        self
    }

    pub fn timeout_ticks(mut self, ticks: Tick) -> Self {
        self.config.timing.timeout_ticks = ticks;
        self
    }

    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.config.batch = batch;
        self
    }

    pub fn active_backend(mut self, backend: BackendKind) -> Self {
        self.config.randomness.active_backend = backend;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
