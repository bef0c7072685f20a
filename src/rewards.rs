//! Pure reward computation: multiplier tables and payout math.
//!
//! Nothing in this module touches ledger or request state. Given game
//! parameters and a raw random value, the functions here deterministically
//! produce WAD-scaled multipliers and payouts.

use crate::errors::{EngineResult, ValidationError};
use crate::types::{tenths, Amount, RiskLevel, WAD};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;

/// Cardinality per spin mode: a mode-`m` side wins with probability
/// `1 / SPIN_MODE_CARDINALITY[m]`.
pub const SPIN_MODE_CARDINALITY: [u64; 3] = [2, 10, 100];

/// Maximum sides per mode a single entry may submit.
pub const SPIN_MODE_PICK_LIMIT: [usize; 3] = [1, 4, 9];

/// First encoded side of each mode in the flat side space.
pub const SPIN_MODE_OFFSET: [u16; 3] = [0, 2, 12];

/// Total number of encoded sides (2 + 10 + 100).
pub const SPIN_SIDE_COUNT: u16 = 112;

/// Crash multipliers are capped at 1000x.
const CRASH_CAP: Amount = 1_000 * WAD;

/// Decode a flat-encoded side into `(mode, index)`.
pub fn decode_side(side: u16) -> EngineResult<(u8, u64)> {
    if side >= SPIN_SIDE_COUNT {
        return Err(ValidationError::SideOutOfRange(side).into());
    }
    for mode in (0..3usize).rev() {
        if side >= SPIN_MODE_OFFSET[mode] {
            return Ok((mode as u8, (side - SPIN_MODE_OFFSET[mode]) as u64));
        }
    }
    unreachable!("offset table starts at 0")
}

/// Whether an encoded side wins against a round result.
pub fn side_wins(side: u16, result: u64) -> EngineResult<bool> {
    let (mode, index) = decode_side(side)?;
    Ok(result % SPIN_MODE_CARDINALITY[mode as usize] == index)
}

/// Payout for one winning spin side: `stake * cardinality`, reduced by the
/// house edge. Losing sides pay nothing; their stake was already burned.
pub fn spin_reward(stake: Amount, mode: u8, ppv: Amount) -> EngineResult<Amount> {
    let cardinality = SPIN_MODE_CARDINALITY[mode as usize] as u128;
    let gross = stake
        .checked_mul(cardinality)
        .and_then(|v| v.checked_mul(WAD - ppv))
        .ok_or(ValidationError::AmountOverflow)?;
    Ok(gross / WAD)
}

/// Plinko landing position: population count of the low `rows` bits of the
/// raw draw, in `0..=rows`.
pub fn landing_position(raw: u64, rows: u8) -> usize {
    let mask = if rows >= 64 { u64::MAX } else { (1u64 << rows) - 1 };
    (raw & mask).count_ones() as usize
}

/// Reference crash multiplier: closed-form hazard approximating
/// `P(X <= x) = 1 - 1/x`, derived from the low 32 bits of the draw.
/// Used for off-line expected-value calibration only; the settlement state
/// machine never consumes it.
pub fn crash_multiplier(raw: u64) -> Amount {
    let u = (raw & 0xFFFF_FFFF) as u128;
    let denom = (1u128 << 32) - u;
    let multiplier = WAD * (1u128 << 32) / denom;
    multiplier.min(CRASH_CAP)
}

static DEFAULT_TABLES: Lazy<HashMap<(RiskLevel, u8), Vec<Amount>>> = Lazy::new(|| {
    let mut tables = HashMap::new();
    let mut insert = |risk, rows, tenths_values: &[u128]| {
        let table: Vec<Amount> = tenths_values.iter().map(|&v| tenths(v)).collect();
        tables.insert((risk, rows), table);
    };

    insert(RiskLevel::Low, 8, &[56, 21, 11, 10, 5, 10, 11, 21, 56]);
    insert(RiskLevel::Medium, 8, &[130, 30, 13, 7, 4, 7, 13, 30, 130]);
    insert(RiskLevel::High, 8, &[290, 40, 15, 3, 2, 3, 15, 40, 290]);

    insert(
        RiskLevel::Low,
        12,
        &[100, 30, 16, 14, 11, 10, 5, 10, 11, 14, 16, 30, 100],
    );
    insert(
        RiskLevel::Medium,
        12,
        &[330, 110, 40, 20, 11, 6, 3, 6, 11, 20, 40, 110, 330],
    );
    insert(
        RiskLevel::High,
        12,
        &[1700, 240, 81, 20, 7, 2, 2, 2, 7, 20, 81, 240, 1700],
    );

    insert(
        RiskLevel::Low,
        16,
        &[160, 90, 20, 14, 14, 12, 11, 10, 5, 10, 11, 12, 14, 14, 20, 90, 160],
    );
    insert(
        RiskLevel::Medium,
        16,
        &[1100, 410, 100, 50, 30, 15, 10, 5, 3, 5, 10, 15, 30, 50, 100, 410, 1100],
    );
    insert(
        RiskLevel::High,
        16,
        &[10000, 1300, 260, 90, 40, 20, 2, 2, 2, 2, 2, 20, 40, 90, 260, 1300, 10000],
    );

    tables
});

/// Multiplier tables for the plinko path. Read-only during settlement;
/// tables may be added or replaced through the admin surface before play.
#[derive(Debug)]
pub struct RewardEngine {
    tables: RwLock<HashMap<(RiskLevel, u8), Vec<Amount>>>,
}

impl Default for RewardEngine {
    fn default() -> Self {
        Self {
            tables: RwLock::new(DEFAULT_TABLES.clone()),
        }
    }
}

impl RewardEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `(risk, rows)` table is configured.
    pub fn supports(&self, risk: RiskLevel, rows: u8) -> bool {
        self.tables
            .read()
            .expect("reward table lock poisoned")
            .contains_key(&(risk, rows))
    }

    /// Install or replace the table for `(risk, rows)`. The table must
    /// carry exactly `rows + 1` WAD-scaled multipliers.
    pub fn set_table(&self, risk: RiskLevel, rows: u8, table: Vec<Amount>) -> EngineResult<()> {
        if table.len() != rows as usize + 1 {
            return Err(ValidationError::TableSizeMismatch {
                rows,
                got: table.len(),
            }
            .into());
        }
        self.tables
            .write()
            .expect("reward table lock poisoned")
            .insert((risk, rows), table);
        Ok(())
    }

    /// WAD-scaled multiplier for one raw draw.
    pub fn plinko_multiplier(&self, risk: RiskLevel, rows: u8, raw: u64) -> EngineResult<Amount> {
        let tables = self.tables.read().expect("reward table lock poisoned");
        let table = tables
            .get(&(risk, rows))
            .ok_or(ValidationError::RowsUnsupported(rows))?;
        Ok(table[landing_position(raw, rows)])
    }

    /// Largest multiplier in the `(risk, rows)` table. Submission bounds
    /// its worst-case payout arithmetic against this.
    pub fn max_multiplier(&self, risk: RiskLevel, rows: u8) -> EngineResult<Amount> {
        let tables = self.tables.read().expect("reward table lock poisoned");
        let table = tables
            .get(&(risk, rows))
            .ok_or(ValidationError::RowsUnsupported(rows))?;
        Ok(table.iter().copied().max().unwrap_or(0))
    }

    /// Reward for one plinko subplay.
    pub fn plinko_reward(
        &self,
        risk: RiskLevel,
        rows: u8,
        raw: u64,
        stake: Amount,
    ) -> EngineResult<Amount> {
        let multiplier = self.plinko_multiplier(risk, rows, raw)?;
        let gross = stake
            .checked_mul(multiplier)
            .ok_or(ValidationError::AmountOverflow)?;
        Ok(gross / WAD)
    }
}
