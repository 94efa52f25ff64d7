#![deny(warnings)]

//! Session runtime: the round-by-round state machine of a DiversiTrack game.
//!
//! A [`Session`] is driven by discrete commands (start, submit an allocation,
//! advance, finish, reset) and owns everything a single game needs. Nothing is
//! shared between sessions.

use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sim_core::{
    validate_allocation, validate_config, Allocation, EventCatalog, LeaderboardEntry,
    LeaderboardStore, Portfolio, RoundRecord, SessionConfig, ValidationError,
    DEFAULT_STARTING_CAPITAL, MAX_STARTING_CAPITAL,
};
use sim_econ::{
    score_history, seeded_rng, settle_round, DrawMode, EconError, EventDeck, FallbackReturn,
    ScoreBreakdown, ScoringRules,
};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Process-wide game rules, fixed before any session starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameRules {
    /// Capital each game starts with, split evenly across asset classes.
    pub starting_capital: Decimal,
    /// Allocation granularity; zero disables the step check.
    pub allocation_step: Decimal,
    pub draw_mode: DrawMode,
    pub fallback: FallbackReturn,
    /// Seed for reproducible event draws; entropy when absent.
    pub rng_seed: Option<u64>,
    pub scoring: ScoringRules,
    /// Leaderboard entries shown after a game.
    pub leaderboard_size: usize,
    pub events: EventCatalog,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            starting_capital: Decimal::from(DEFAULT_STARTING_CAPITAL),
            allocation_step: Decimal::ONE,
            draw_mode: DrawMode::default(),
            fallback: FallbackReturn::default(),
            rng_seed: None,
            scoring: ScoringRules::default(),
            leaderboard_size: 10,
            events: EventCatalog::builtin(),
        }
    }
}

impl GameRules {
    /// Parse rules from YAML; omitted fields keep their defaults.
    pub fn from_yaml(text: &str) -> Result<Self, SessionError> {
        let rules: GameRules =
            serde_yaml::from_str(text).map_err(|e| SessionError::Rules(e.to_string()))?;
        rules.validate()?;
        Ok(rules)
    }

    /// Read and parse a YAML rules file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SessionError::Rules(format!("{}: {e}", path.as_ref().display()))
        })?;
        Self::from_yaml(&text)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if self.starting_capital <= Decimal::ZERO || !self.starting_capital.fract().is_zero() {
            return Err(SessionError::Rules(format!(
                "starting_capital must be a positive whole amount, got {}",
                self.starting_capital
            )));
        }
        if self.starting_capital > Decimal::from(MAX_STARTING_CAPITAL) {
            return Err(SessionError::Rules(format!(
                "starting_capital must not exceed {MAX_STARTING_CAPITAL}, got {}",
                self.starting_capital
            )));
        }
        if self.allocation_step < Decimal::ZERO {
            return Err(SessionError::Rules(format!(
                "allocation_step must not be negative, got {}",
                self.allocation_step
            )));
        }
        if self.leaderboard_size == 0 {
            return Err(SessionError::Rules("leaderboard_size must be > 0".into()));
        }
        self.fallback.validate()?;
        Ok(())
    }
}

/// Where a session is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Waiting for player settings.
    Setup,
    /// Waiting for a valid allocation for `round`.
    Allocating { round: u32 },
    /// `round` has been applied; waiting for the player to move on.
    Settled { round: u32 },
    /// All rounds played; the score is final.
    GameOver,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Setup => f.write_str("setup"),
            Phase::Allocating { round } => write!(f, "allocating round {round}"),
            Phase::Settled { round } => write!(f, "round {round} settled"),
            Phase::GameOver => f.write_str("game over"),
        }
    }
}

/// Errors returned by session commands. None of them alter session state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Command not allowed in the current phase.
    #[error("cannot {command} during {phase}")]
    InvalidTransition { command: &'static str, phase: Phase },
    /// Settlement or scoring arithmetic failed.
    #[error(transparent)]
    Econ(#[from] EconError),
    #[error("leaderboard store failed: {0}")]
    Store(String),
    #[error("invalid rules: {0}")]
    Rules(String),
}

/// What a finished game hands to the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GameSummary {
    pub player: String,
    pub score: ScoreBreakdown,
    /// Best entries after this game was recorded.
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// One player's game.
pub struct Session {
    rules: GameRules,
    deck: EventDeck,
    rng: ChaCha8Rng,
    phase: Phase,
    config: Option<SessionConfig>,
    round: u32,
    portfolio: Portfolio,
    history: Vec<RoundRecord>,
    totals: Vec<Decimal>,
    score: Option<ScoreBreakdown>,
    summary: Option<GameSummary>,
}

impl Session {
    /// Create a session waiting in [`Phase::Setup`].
    pub fn new(rules: GameRules) -> Result<Self, SessionError> {
        rules.validate()?;
        let deck = EventDeck::new(rules.events.clone(), rules.draw_mode);
        let rng = seeded_rng(rules.rng_seed);
        let portfolio = Portfolio::equal_split(rules.starting_capital);
        Ok(Self {
            rules,
            deck,
            rng,
            phase: Phase::Setup,
            config: None,
            round: 0,
            portfolio,
            history: Vec::new(),
            totals: Vec::new(),
            score: None,
            summary: None,
        })
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 1-based round index; 0 before the game starts and `rounds + 1` once over.
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn config(&self) -> Option<&SessionConfig> {
        self.config.as_ref()
    }

    /// Holdings carried into the next allocation.
    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Amount the next allocation must add up to.
    pub fn required_total(&self) -> Decimal {
        self.portfolio.total()
    }

    pub fn history(&self) -> &[RoundRecord] {
        &self.history
    }

    /// Portfolio total after each settled round.
    pub fn totals(&self) -> &[Decimal] {
        &self.totals
    }

    /// Per-round holdings, for charting the game.
    pub fn value_series(&self) -> Vec<(u32, Portfolio)> {
        self.history.iter().map(|r| (r.round, r.portfolio())).collect()
    }

    /// Final score, available once the game is over.
    pub fn score(&self) -> Option<&ScoreBreakdown> {
        self.score.as_ref()
    }

    fn reject(&self, command: &'static str) -> SessionError {
        warn!(command, phase = %self.phase, "command rejected");
        SessionError::InvalidTransition {
            command,
            phase: self.phase,
        }
    }

    /// Apply player settings and open round 1.
    pub fn start(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        if self.phase != Phase::Setup {
            return Err(self.reject("start"));
        }
        validate_config(&config)?;
        info!(player = %config.player_name, rounds = config.rounds, contribution = %config.contribution, "game started");
        self.config = Some(config);
        self.round = 1;
        self.portfolio = Portfolio::equal_split(self.rules.starting_capital);
        self.phase = Phase::Allocating { round: 1 };
        Ok(())
    }

    /// Validate `allocation`, draw an event and settle the current round.
    pub fn submit_allocation(
        &mut self,
        allocation: &Allocation,
    ) -> Result<&RoundRecord, SessionError> {
        let round = match self.phase {
            Phase::Allocating { round } => round,
            _ => return Err(self.reject("submit an allocation")),
        };
        let contribution = match &self.config {
            Some(cfg) => cfg.contribution,
            None => return Err(self.reject("submit an allocation")),
        };
        validate_allocation(allocation, self.required_total(), self.rules.allocation_step)?;

        // Draw on copies so a failed settlement leaves the deck and RNG untouched.
        let mut deck = self.deck.clone();
        let mut rng = self.rng.clone();
        let event = deck.draw(&mut rng).clone();
        let record = settle_round(
            round,
            allocation,
            &event,
            contribution,
            &self.rules.fallback,
            &mut rng,
        )?;
        self.deck = deck;
        self.rng = rng;
        info!(round, event = %record.event.name, total = %record.new_total, "round settled");
        self.portfolio = record.portfolio();
        self.totals.push(record.new_total);
        self.history.push(record);
        self.phase = Phase::Settled { round };
        Ok(&self.history[self.history.len() - 1])
    }

    /// Move past a settled round: open the next one, or end the game after
    /// the last round and compute the score.
    pub fn advance(&mut self) -> Result<Phase, SessionError> {
        let round = match self.phase {
            Phase::Settled { round } => round,
            _ => return Err(self.reject("advance")),
        };
        let rounds = self.config.as_ref().map(|c| c.rounds).unwrap_or(round);
        if round >= rounds {
            let score = score_history(self.rules.starting_capital, &self.history, &self.rules.scoring)?;
            info!(score = %score.score, penalty = %score.volatility_penalty, bonus = %score.diversification_bonus, "game over");
            self.score = Some(score);
            self.round = round + 1;
            self.phase = Phase::GameOver;
        } else {
            self.round = round + 1;
            self.phase = Phase::Allocating { round: self.round };
            debug!(round = self.round, "next round");
        }
        Ok(self.phase)
    }

    /// Record the result on the leaderboard and return the game summary.
    ///
    /// The entry is appended once; later calls return the same summary.
    pub fn finish(&mut self, store: &dyn LeaderboardStore) -> Result<GameSummary, SessionError> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }
        let (score, player) = match (&self.phase, &self.score, &self.config) {
            (Phase::GameOver, Some(score), Some(cfg)) => (score.clone(), cfg.player_name.clone()),
            _ => return Err(self.reject("finish")),
        };
        let entry = LeaderboardEntry::new(player.clone(), score.leaderboard_score());
        let board = store
            .append(entry)
            .map_err(|e| SessionError::Store(format!("{e:#}")))?;
        info!(player = %player, entries = board.len(), "leaderboard updated");
        let summary = GameSummary {
            player,
            score,
            leaderboard: board.top(self.rules.leaderboard_size).to_vec(),
        };
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// Discard the game and return to [`Phase::Setup`]. The rules and the
    /// random stream carry over.
    pub fn reset(&mut self) {
        info!(phase = %self.phase, "session reset");
        self.phase = Phase::Setup;
        self.config = None;
        self.round = 0;
        self.portfolio = Portfolio::equal_split(self.rules.starting_capital);
        self.history.clear();
        self.totals.clear();
        self.score = None;
        self.summary = None;
        self.deck.rewind();
    }
}
