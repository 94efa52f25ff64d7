#![deny(warnings)]

//! Round economics for DiversiTrack.
//!
//! This module provides:
//! - Drawing market events from the catalog (uniform, shuffled or sequential)
//! - The fallback return for asset classes an event does not list
//! - Round settlement: returns first, then the contribution split pro rata
//! - End-of-game scoring with a volatility penalty and diversification bonus

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sim_core::{Allocation, AssetBreakdown, AssetClass, Event, EventCatalog, RoundRecord};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors produced by economic helpers.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EconError {
    /// Random fallback bound must lie within [0, 1].
    #[error("invalid fallback bound: {0}")]
    InvalidBound(Decimal),
    /// Numeric conversion between f64 and Decimal failed.
    #[error("non-finite numeric conversion")]
    NonFinite,
    /// A value left the representable Decimal range.
    #[error("portfolio value overflow in round {round}")]
    Overflow { round: u32 },
}

/// Seeded RNG for reproducible games; entropy-seeded when `seed` is None.
pub fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// How events are picked from the catalog round after round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawMode {
    /// Independent uniform pick each round; events may recur.
    #[default]
    Uniform,
    /// Every event once in random order before any repeats.
    Shuffled,
    /// Catalog order, wrapping around.
    Sequential,
}

/// Draws events from an immutable catalog according to a [`DrawMode`].
#[derive(Clone, Debug)]
pub struct EventDeck {
    catalog: EventCatalog,
    mode: DrawMode,
    order: Vec<usize>,
    cursor: usize,
}

impl EventDeck {
    pub fn new(catalog: EventCatalog, mode: DrawMode) -> Self {
        let order = (0..catalog.len()).collect();
        Self {
            catalog,
            mode,
            order,
            cursor: 0,
        }
    }

    /// Pick the next event.
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &Event {
        let n = self.catalog.len();
        let idx = match self.mode {
            DrawMode::Uniform => rng.gen_range(0..n),
            DrawMode::Sequential => {
                let i = self.cursor % n;
                self.cursor = (i + 1) % n;
                i
            }
            DrawMode::Shuffled => {
                if self.cursor == 0 {
                    self.order.shuffle(rng);
                }
                let i = self.order[self.cursor];
                self.cursor = (self.cursor + 1) % n;
                i
            }
        };
        // Catalogs are non-empty by construction, so `idx < n`.
        &self.catalog.events()[idx]
    }

    /// Forget draw progress, as when a new game starts.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

/// Return applied to an asset class the drawn event does not list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReturn {
    /// Unlisted assets are flat.
    #[default]
    Zero,
    /// Uniform return in [-bound, bound], drawn per asset per round.
    Random { bound: Decimal },
}

impl FallbackReturn {
    pub fn validate(&self) -> Result<(), EconError> {
        match self {
            FallbackReturn::Zero => Ok(()),
            FallbackReturn::Random { bound } => {
                if *bound < Decimal::ZERO || *bound > Decimal::ONE {
                    Err(EconError::InvalidBound(*bound))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Resolve a return for one unlisted asset, rounded to basis points.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> Decimal {
        match self {
            FallbackReturn::Zero => Decimal::ZERO,
            FallbackReturn::Random { bound } => {
                let b = bound.to_f64().unwrap_or(0.0).abs();
                let r: f64 = rng.gen_range(-b..=b);
                Decimal::from_f64(r)
                    .map(|d| d.round_dp(4))
                    .unwrap_or(Decimal::ZERO)
            }
        }
    }
}

/// Split `contribution` across funded assets in proportion to their amounts.
///
/// Shares are whole currency units. Units left after flooring go to the
/// assets with the largest fractional remainders (display order breaks
/// ties), so the shares always sum to the whole part of `contribution`; any
/// fractional cents follow the largest share. Unfunded assets get zero, and
/// nothing is distributed when no asset is funded.
pub fn apportion_contribution(
    allocation: &Allocation,
    contribution: Decimal,
) -> BTreeMap<AssetClass, Decimal> {
    let mut shares: BTreeMap<AssetClass, Decimal> =
        AssetClass::ALL.iter().map(|a| (*a, Decimal::ZERO)).collect();
    let active_total = allocation.active_total();
    if active_total.is_zero() || contribution <= Decimal::ZERO {
        return shares;
    }

    let mut remainders: Vec<(AssetClass, Decimal)> = Vec::with_capacity(AssetClass::ALL.len());
    let mut assigned = Decimal::ZERO;
    for (asset, amount) in allocation.iter() {
        if amount <= Decimal::ZERO {
            continue;
        }
        let exact = match contribution.checked_mul(amount) {
            Some(product) => product / active_total,
            None => amount / active_total * contribution,
        };
        let floor = exact.floor();
        shares.insert(asset, floor);
        assigned += floor;
        remainders.push((asset, exact - floor));
    }

    // Stable sort keeps display order among equal remainders.
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    let mut leftover = contribution - assigned;
    for (asset, _) in remainders.iter().cycle().take(remainders.len() * 2) {
        if leftover < Decimal::ONE {
            break;
        }
        if let Some(s) = shares.get_mut(asset) {
            *s += Decimal::ONE;
            leftover -= Decimal::ONE;
        }
    }
    if leftover > Decimal::ZERO {
        let largest = shares
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(asset, _)| *asset);
        if let Some(s) = largest.and_then(|asset| shares.get_mut(&asset)) {
            *s += leftover;
        }
    }
    shares
}

/// Settle one round for an already validated allocation.
///
/// Returns are applied to the allocated amounts and truncated to whole units;
/// the contribution is credited afterwards and does not earn the round's
/// return. The only failure is a total that no longer fits in a `Decimal`.
pub fn settle_round<R: Rng + ?Sized>(
    round: u32,
    allocation: &Allocation,
    event: &Event,
    contribution: Decimal,
    fallback: &FallbackReturn,
    rng: &mut R,
) -> Result<RoundRecord, EconError> {
    let overflow = EconError::Overflow { round };
    let shares = apportion_contribution(allocation, contribution);
    let mut breakdown = Vec::with_capacity(AssetClass::ALL.len());
    let mut credited = Decimal::ZERO;
    let mut new_total = Decimal::ZERO;
    for (asset, old_value) in allocation.iter() {
        let (return_fraction, listed) = match event.return_for(asset) {
            Some(r) => (r, true),
            None => (fallback.resolve(rng), false),
        };
        let share = shares.get(&asset).copied().unwrap_or(Decimal::ZERO);
        let new_value = old_value
            .checked_mul(Decimal::ONE + return_fraction)
            .map(|grown| grown.trunc())
            .and_then(|grown| grown.checked_add(share))
            .ok_or_else(|| overflow.clone())?;
        credited += share;
        new_total = new_total.checked_add(new_value).ok_or_else(|| overflow.clone())?;
        breakdown.push(AssetBreakdown {
            asset,
            old_value,
            return_fraction,
            listed,
            contribution: share,
            new_value,
        });
    }
    debug!(round, event = %event.name, %credited, %new_total, "round settled");
    Ok(RoundRecord {
        round,
        event: event.clone(),
        breakdown,
        contribution: credited,
        new_total,
    })
}

/// Scoring constants.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    /// Penalty per unit of return volatility, in multiples of starting capital.
    pub penalty_multiplier: Decimal,
    /// Bonus for ending with enough funded asset classes.
    pub diversification_bonus: Decimal,
    /// Funded classes needed for the bonus.
    pub diversification_threshold: usize,
}

/// Penalty per unit of volatility, as a multiple of starting capital.
pub const DEFAULT_PENALTY_MULTIPLIER: Decimal = dec!(2);
/// Bonus awarded for a diversified final portfolio.
pub const DEFAULT_DIVERSIFICATION_BONUS: Decimal = dec!(20000);
/// Funded classes required for the bonus.
pub const DEFAULT_DIVERSIFICATION_THRESHOLD: usize = 4;

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            penalty_multiplier: DEFAULT_PENALTY_MULTIPLIER,
            diversification_bonus: DEFAULT_DIVERSIFICATION_BONUS,
            diversification_threshold: DEFAULT_DIVERSIFICATION_THRESHOLD,
        }
    }
}

/// Components of a final score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub final_total: Decimal,
    /// Final total minus starting capital.
    pub total_return: Decimal,
    /// Population standard deviation of per-round returns.
    pub volatility: f64,
    pub volatility_penalty: Decimal,
    pub diversification_bonus: Decimal,
    /// Asset classes with a positive final value.
    pub funded_assets: usize,
    pub score: Decimal,
}

impl ScoreBreakdown {
    /// Score as stored on the leaderboard (truncated toward zero).
    pub fn leaderboard_score(&self) -> i64 {
        self.score.trunc().to_i64().unwrap_or(if self.score.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }
}

/// Population standard deviation; zero for fewer than one sample.
pub fn population_std_dev(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    var.sqrt()
}

/// Fractional change between consecutive totals, starting from `starting_capital`.
/// A round that starts from a zero total counts as a zero return.
pub fn per_round_returns(starting_capital: Decimal, history: &[RoundRecord]) -> Vec<f64> {
    let mut prev = starting_capital;
    let mut out = Vec::with_capacity(history.len());
    for rec in history {
        let r = if prev.is_zero() {
            0.0
        } else {
            (rec.new_total / prev - Decimal::ONE).to_f64().unwrap_or(0.0)
        };
        out.push(r);
        prev = rec.new_total;
    }
    out
}

/// Score a finished game from its round history.
pub fn score_history(
    starting_capital: Decimal,
    history: &[RoundRecord],
    rules: &ScoringRules,
) -> Result<ScoreBreakdown, EconError> {
    let (final_total, funded_assets) = match history.last() {
        Some(last) => (last.new_total, last.portfolio().funded_count()),
        None => (starting_capital, 0),
    };
    let total_return = final_total - starting_capital;
    let volatility = population_std_dev(&per_round_returns(starting_capital, history));
    if !volatility.is_finite() {
        return Err(EconError::NonFinite);
    }
    let vol_dec = Decimal::from_f64(volatility).ok_or(EconError::NonFinite)?;
    let volatility_penalty = vol_dec
        .checked_mul(rules.penalty_multiplier)
        .and_then(|v| v.checked_mul(starting_capital))
        .ok_or(EconError::NonFinite)?
        .round_dp(2);
    let diversification_bonus = if funded_assets >= rules.diversification_threshold {
        rules.diversification_bonus
    } else {
        Decimal::ZERO
    };
    let score = total_return
        .checked_sub(volatility_penalty)
        .and_then(|s| s.checked_add(diversification_bonus))
        .ok_or(EconError::NonFinite)?;
    Ok(ScoreBreakdown {
        final_total,
        total_return,
        volatility,
        volatility_penalty,
        diversification_bonus,
        funded_assets,
        score,
    })
}
