#![deny(warnings)]

//! Core domain models and invariants for DiversiTrack.
//!
//! This crate defines the serializable types shared by the round simulation,
//! the session state machine and the leaderboard stores, together with the
//! validation helpers that guard configuration and allocation input.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Fewest rounds a session may be configured with.
pub const MIN_ROUNDS: u32 = 1;
/// Most rounds a session may be configured with.
pub const MAX_ROUNDS: u32 = 20;
/// Largest periodic contribution accepted at setup.
pub const MAX_CONTRIBUTION: i64 = 1_000_000;
/// Rounds played when the player does not choose.
pub const DEFAULT_ROUNDS: u32 = 10;
/// Contribution (SIP) applied each round when the player does not choose.
pub const DEFAULT_CONTRIBUTION: i64 = 10_000;
/// Capital every session starts with.
pub const DEFAULT_STARTING_CAPITAL: i64 = 1_000_000;
/// Largest starting capital a rules file may set.
pub const MAX_STARTING_CAPITAL: i64 = 1_000_000_000_000;
/// Largest per-round return an event may list (+1000%).
pub const MAX_EVENT_RETURN: Decimal = dec!(10);

/// The fixed set of asset classes a player can fund.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    /// Domestic stocks.
    Equity,
    /// Bonds and deposits.
    Debt,
    /// Gold.
    Gold,
    /// Property.
    #[serde(alias = "Real Estate", alias = "realestate")]
    RealEstate,
    /// Foreign markets.
    International,
}

impl AssetClass {
    /// All asset classes in display order.
    pub const ALL: [AssetClass; 5] = [
        AssetClass::Equity,
        AssetClass::Debt,
        AssetClass::Gold,
        AssetClass::RealEstate,
        AssetClass::International,
    ];

    /// Human-readable label, e.g. "Real Estate".
    pub fn label(self) -> &'static str {
        match self {
            AssetClass::Equity => "Equity",
            AssetClass::Debt => "Debt",
            AssetClass::Gold => "Gold",
            AssetClass::RealEstate => "Real Estate",
            AssetClass::International => "International",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Holdings per asset class. Every class is always present (possibly at zero).
///
/// A portfolio is replaced wholesale after each round and never edited in
/// place by the simulation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Portfolio(BTreeMap<AssetClass, Decimal>);

impl Portfolio {
    /// Build a portfolio from per-asset values; missing classes hold zero.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (AssetClass, Decimal)>,
    {
        let mut map: BTreeMap<AssetClass, Decimal> =
            AssetClass::ALL.iter().map(|a| (*a, Decimal::ZERO)).collect();
        for (asset, value) in values {
            map.insert(asset, value);
        }
        Self(map)
    }

    /// Split `capital` evenly in whole currency units; any remainder goes to
    /// the first classes in display order.
    pub fn equal_split(capital: Decimal) -> Self {
        let capital = capital.trunc();
        let n = Decimal::from(AssetClass::ALL.len() as u32);
        let base = (capital / n).trunc();
        let mut leftover = capital - base * n;
        Self::from_values(AssetClass::ALL.iter().map(|a| {
            let extra = if leftover > Decimal::ZERO {
                leftover -= Decimal::ONE;
                Decimal::ONE
            } else {
                Decimal::ZERO
            };
            (*a, base + extra)
        }))
    }

    /// Value held in `asset`.
    pub fn get(&self, asset: AssetClass) -> Decimal {
        self.0.get(&asset).copied().unwrap_or(Decimal::ZERO)
    }

    /// Sum of all holdings.
    pub fn total(&self) -> Decimal {
        self.0.values().copied().sum()
    }

    /// Number of classes holding a strictly positive value.
    pub fn funded_count(&self) -> usize {
        self.0.values().filter(|v| **v > Decimal::ZERO).count()
    }

    /// Iterate holdings in display order.
    pub fn iter(&self) -> impl Iterator<Item = (AssetClass, Decimal)> + '_ {
        self.0.iter().map(|(a, v)| (*a, *v))
    }
}

/// A player's proposed split of the carried-forward total for one round.
/// Classes left out are treated as zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Allocation(BTreeMap<AssetClass, Decimal>);

impl Allocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the current holdings, as the original form pre-filled its inputs.
    pub fn from_portfolio(portfolio: &Portfolio) -> Self {
        Self(portfolio.iter().collect())
    }

    /// Builder-style setter.
    pub fn with(mut self, asset: AssetClass, amount: Decimal) -> Self {
        self.set(asset, amount);
        self
    }

    pub fn set(&mut self, asset: AssetClass, amount: Decimal) {
        self.0.insert(asset, amount);
    }

    pub fn get(&self, asset: AssetClass) -> Decimal {
        self.0.get(&asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn total(&self) -> Decimal {
        self.0.values().copied().sum()
    }

    /// Sum of the strictly positive amounts.
    pub fn active_total(&self) -> Decimal {
        self.0.values().filter(|v| **v > Decimal::ZERO).copied().sum()
    }

    /// Iterate every asset class in display order, zero-filling gaps.
    pub fn iter(&self) -> impl Iterator<Item = (AssetClass, Decimal)> + '_ {
        AssetClass::ALL.iter().map(|a| (*a, self.get(*a)))
    }
}

/// Whether an event reads as good or bad news overall.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTone {
    /// At least one listed asset gains.
    Rally,
    /// No listed asset gains.
    Slump,
}

/// A named market event with per-asset return fractions (-0.25 = -25%).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Display name, e.g. "Oil Price Shock".
    pub name: String,
    /// Return applied to each listed asset class.
    pub returns: BTreeMap<AssetClass, Decimal>,
}

impl Event {
    pub fn new<I>(name: impl Into<String>, returns: I) -> Self
    where
        I: IntoIterator<Item = (AssetClass, Decimal)>,
    {
        Self {
            name: name.into(),
            returns: returns.into_iter().collect(),
        }
    }

    /// Listed return for `asset`, if the event names it.
    pub fn return_for(&self, asset: AssetClass) -> Option<Decimal> {
        self.returns.get(&asset).copied()
    }

    pub fn tone(&self) -> EventTone {
        if self.returns.values().any(|r| *r > Decimal::ZERO) {
            EventTone::Rally
        } else {
            EventTone::Slump
        }
    }
}

/// Immutable table of events that rounds draw from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EventCatalog(Vec<Event>);

impl EventCatalog {
    /// Validate and wrap a list of events. Every return must lie within
    /// [-1, [`MAX_EVENT_RETURN`]].
    pub fn new(events: Vec<Event>) -> Result<Self, ValidationError> {
        if events.is_empty() {
            return Err(ValidationError::EmptyCatalog);
        }
        for e in &events {
            let out_of_range = |r: &Decimal| *r < -Decimal::ONE || *r > MAX_EVENT_RETURN;
            if let Some((asset, _)) = e.returns.iter().find(|(_, r)| out_of_range(r)) {
                return Err(ValidationError::InvalidReturn {
                    event: e.name.clone(),
                    asset: *asset,
                });
            }
        }
        Ok(Self(events))
    }

    /// The ten events of the classic game.
    pub fn builtin() -> Self {
        use AssetClass::*;
        let ev = |name: &str, r: [Decimal; 5]| {
            Event::new(
                name,
                [Equity, Debt, Gold, RealEstate, International].into_iter().zip(r),
            )
        };
        Self(vec![
            ev("COVID-19 Pandemic Crash", [dec!(-0.25), dec!(0.03), dec!(0.08), dec!(-0.15), dec!(-0.20)]),
            ev("Global Tech Rally", [dec!(0.20), dec!(-0.01), dec!(-0.02), dec!(0.12), dec!(0.25)]),
            ev("US Fed Rate Hike", [dec!(-0.08), dec!(-0.04), dec!(0.05), dec!(-0.06), dec!(-0.05)]),
            ev("Geopolitical Tension in Asia", [dec!(-0.10), dec!(0.01), dec!(0.06), dec!(-0.08), dec!(-0.12)]),
            ev("Infrastructure Boom", [dec!(0.15), dec!(0.02), dec!(-0.01), dec!(0.20), dec!(0.05)]),
            ev("Oil Price Shock", [dec!(-0.12), dec!(-0.01), dec!(0.07), dec!(-0.10), dec!(-0.08)]),
            ev("Green Energy Revolution", [dec!(0.18), dec!(0.00), dec!(0.02), dec!(0.14), dec!(0.10)]),
            ev("SIP Magic", [dec!(0.10), dec!(0.05), dec!(0.07), dec!(0.06), dec!(0.08)]),
            ev("Recession Scare", [dec!(-0.20), dec!(0.04), dec!(0.10), dec!(-0.15), dec!(-0.18)]),
            ev("Budget Boost to Infra", [dec!(0.16), dec!(0.01), dec!(-0.01), dec!(0.18), dec!(0.05)]),
        ])
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.0
    }
}

impl Default for EventCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl<'de> Deserialize<'de> for EventCatalog {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let events = Vec::<Event>::deserialize(deserializer)?;
        EventCatalog::new(events).map_err(serde::de::Error::custom)
    }
}

/// Per-player settings chosen at setup and read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name shown on the leaderboard.
    pub player_name: String,
    /// Rounds to play, within [`MIN_ROUNDS`, `MAX_ROUNDS`].
    pub rounds: u32,
    /// Cash added each round, within [0, `MAX_CONTRIBUTION`].
    pub contribution: Decimal,
}

impl SessionConfig {
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            rounds: DEFAULT_ROUNDS,
            contribution: Decimal::from(DEFAULT_CONTRIBUTION),
        }
    }
}

/// One asset's line in a round's breakdown table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBreakdown {
    pub asset: AssetClass,
    /// Amount allocated going into the round.
    pub old_value: Decimal,
    /// Return fraction applied.
    pub return_fraction: Decimal,
    /// False when the event did not list the asset and the fallback applied.
    pub listed: bool,
    /// Contribution share credited after returns.
    pub contribution: Decimal,
    pub new_value: Decimal,
}

/// Immutable record of one settled round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 1-based round index.
    pub round: u32,
    pub event: Event,
    /// One line per asset class, in display order.
    pub breakdown: Vec<AssetBreakdown>,
    /// Total contribution credited this round.
    pub contribution: Decimal,
    /// Sum of the new values.
    pub new_total: Decimal,
}

impl RoundRecord {
    /// Portfolio after the round.
    pub fn portfolio(&self) -> Portfolio {
        Portfolio::from_values(self.breakdown.iter().map(|b| (b.asset, b.new_value)))
    }

    /// Total allocated going into the round.
    pub fn old_total(&self) -> Decimal {
        self.breakdown.iter().map(|b| b.old_value).sum()
    }
}

/// A finished game's line on the leaderboard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Score")]
    pub score: i64,
}

impl LeaderboardEntry {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Entries sorted by descending score. Ties keep insertion order and names
/// are not deduplicated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Leaderboard(Vec<LeaderboardEntry>);

impl Leaderboard {
    pub fn from_entries(mut entries: Vec<LeaderboardEntry>) -> Self {
        entries.sort_by(|a, b| b.score.cmp(&a.score));
        Self(entries)
    }

    /// Add an entry and re-sort the whole board.
    pub fn append(mut self, entry: LeaderboardEntry) -> Self {
        self.0.push(entry);
        Self::from_entries(self.0)
    }

    /// The best `n` entries.
    pub fn top(&self, n: usize) -> &[LeaderboardEntry] {
        &self.0[..n.min(self.0.len())]
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// External store holding the leaderboard between games.
///
/// Writes are whole-board read-modify-write cycles; implementations are not
/// expected to guard against concurrent writers.
pub trait LeaderboardStore {
    /// Read the full board. A store that has never been written is empty.
    fn load(&self) -> anyhow::Result<Leaderboard>;

    /// Replace the stored board with `board`.
    fn persist(&self, board: &Leaderboard) -> anyhow::Result<()>;

    /// Load, insert `entry`, re-sort, persist, and return the new board.
    fn append(&self, entry: LeaderboardEntry) -> anyhow::Result<Leaderboard> {
        let board = self.load()?.append(entry);
        self.persist(&board)?;
        Ok(board)
    }
}

/// Validation errors for configuration, catalogs and allocations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Allocation does not add up to the carried-forward total.
    #[error("allocation must total {expected}, got {actual}")]
    AllocationMismatch { expected: Decimal, actual: Decimal },
    /// A numeric setting is outside its bounds.
    #[error("{field} must be within [{min}, {max}], got {value}")]
    InvalidConfig {
        field: &'static str,
        value: Decimal,
        min: Decimal,
        max: Decimal,
    },
    /// Player name is blank.
    #[error("player name must not be empty")]
    EmptyName,
    #[error("amount for {asset} must not be negative")]
    NegativeAmount { asset: AssetClass },
    #[error("amount {amount} for {asset} is not a multiple of {step}")]
    OffStep {
        asset: AssetClass,
        amount: Decimal,
        step: Decimal,
    },
    #[error("amount {amount} for {asset} exceeds available capital {ceiling}")]
    AboveCeiling {
        asset: AssetClass,
        amount: Decimal,
        ceiling: Decimal,
    },
    #[error("event catalog must contain at least one event")]
    EmptyCatalog,
    /// Below -100% a holding would turn negative.
    #[error("event '{event}' has a return outside [-100%, +1000%] for {asset}")]
    InvalidReturn { event: String, asset: AssetClass },
}

/// Validate player settings collected at setup.
pub fn validate_config(cfg: &SessionConfig) -> Result<(), ValidationError> {
    if cfg.player_name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if !(MIN_ROUNDS..=MAX_ROUNDS).contains(&cfg.rounds) {
        return Err(ValidationError::InvalidConfig {
            field: "rounds",
            value: Decimal::from(cfg.rounds),
            min: Decimal::from(MIN_ROUNDS),
            max: Decimal::from(MAX_ROUNDS),
        });
    }
    let max = Decimal::from(MAX_CONTRIBUTION);
    if cfg.contribution < Decimal::ZERO || cfg.contribution > max || !cfg.contribution.fract().is_zero() {
        return Err(ValidationError::InvalidConfig {
            field: "contribution",
            value: cfg.contribution,
            min: Decimal::ZERO,
            max,
        });
    }
    Ok(())
}

/// Check a proposed allocation against the carried-forward total.
///
/// Each amount must be non-negative, a whole multiple of `step` (when `step`
/// is positive) and no larger than `required_total`; the amounts must sum to
/// exactly `required_total`.
pub fn validate_allocation(
    allocation: &Allocation,
    required_total: Decimal,
    step: Decimal,
) -> Result<(), ValidationError> {
    for (asset, amount) in allocation.iter() {
        if amount < Decimal::ZERO {
            return Err(ValidationError::NegativeAmount { asset });
        }
        if step > Decimal::ZERO && !(amount % step).is_zero() {
            return Err(ValidationError::OffStep { asset, amount, step });
        }
        if amount > required_total {
            return Err(ValidationError::AboveCeiling {
                asset,
                amount,
                ceiling: required_total,
            });
        }
    }
    // Each amount is at most `required_total`, so an overflowing sum is a mismatch.
    let actual = allocation
        .iter()
        .try_fold(Decimal::ZERO, |acc, (_, amount)| acc.checked_add(amount))
        .unwrap_or(Decimal::MAX);
    if actual != required_total {
        debug!(%required_total, %actual, "allocation rejected");
        return Err(ValidationError::AllocationMismatch {
            expected: required_total,
            actual,
        });
    }
    Ok(())
}
