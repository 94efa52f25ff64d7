use persistence::{CsvLeaderboardStore, MemoryLeaderboardStore};
use proptest::prelude::*;
use rust_decimal::Decimal;
use sim_core::{Allocation, AssetClass, LeaderboardEntry, LeaderboardStore, SessionConfig};
use sim_econ::DrawMode;
use sim_runtime::{GameRules, Phase, Session, SessionError};

fn d(v: i64) -> Decimal {
    Decimal::from(v)
}

fn sequential_session(rounds: u32, contribution: i64) -> Session {
    let rules = GameRules {
        draw_mode: DrawMode::Sequential,
        rng_seed: Some(42),
        ..GameRules::default()
    };
    let mut s = Session::new(rules).unwrap();
    let mut cfg = SessionConfig::new("Meera");
    cfg.rounds = rounds;
    cfg.contribution = d(contribution);
    s.start(cfg).unwrap();
    s
}

#[test]
fn first_classic_round_is_the_pandemic_crash() {
    let mut s = sequential_session(10, 0);
    let alloc = Allocation::from_portfolio(s.portfolio());
    let rec = s.submit_allocation(&alloc).unwrap();
    assert_eq!(rec.event.name, "COVID-19 Pandemic Crash");
    assert_eq!(rec.new_total, d(902_000));
    let values: Vec<Decimal> = rec.breakdown.iter().map(|b| b.new_value).collect();
    assert_eq!(
        values,
        vec![d(150_000), d(206_000), d(216_000), d(170_000), d(160_000)]
    );
}

#[test]
fn full_game_keeps_every_invariant() {
    let mut s = sequential_session(10, 10_000);
    let mut previous_total = s.required_total();
    while let Phase::Allocating { round } = s.phase() {
        assert_eq!(round, s.round());
        let alloc = Allocation::from_portfolio(s.portfolio());
        assert_eq!(alloc.total(), previous_total);
        let rec = s.submit_allocation(&alloc).unwrap().clone();
        let grown: Decimal = rec
            .breakdown
            .iter()
            .map(|b| (b.old_value * (Decimal::ONE + b.return_fraction)).trunc())
            .sum();
        assert_eq!(rec.new_total, grown + d(10_000));
        assert_eq!(s.phase(), Phase::Settled { round });
        previous_total = rec.new_total;
        s.advance().unwrap();
    }
    assert_eq!(s.phase(), Phase::GameOver);
    assert_eq!(s.history().len(), 10);
    assert_eq!(s.round(), 11);

    let score = s.score().unwrap().clone();
    assert_eq!(score.final_total, previous_total);
    assert_eq!(score.total_return, previous_total - d(1_000_000));
    assert_eq!(score.funded_assets, 5);
    assert_eq!(score.diversification_bonus, d(20_000));
    assert!(score.volatility > 0.0);

    let store = MemoryLeaderboardStore::default();
    store.append(LeaderboardEntry::new("Old Timer", i64::MAX)).unwrap();
    let summary = s.finish(&store).unwrap();
    assert_eq!(summary.leaderboard.len(), 2);
    assert_eq!(summary.leaderboard[0].name, "Old Timer");
    assert_eq!(summary.leaderboard[1].score, score.leaderboard_score());
}

#[test]
fn concentrated_player_loses_bonus() {
    let mut s = sequential_session(1, 0);
    let alloc = Allocation::new()
        .with(AssetClass::Gold, d(500_000))
        .with(AssetClass::Debt, d(500_000));
    s.submit_allocation(&alloc).unwrap();
    s.advance().unwrap();
    let score = s.score().unwrap();
    assert_eq!(score.funded_assets, 2);
    assert_eq!(score.diversification_bonus, Decimal::ZERO);
    // Gold +8%, Debt +3% on the pandemic crash.
    assert_eq!(score.final_total, d(540_000 + 515_000));
}

#[test]
fn results_land_in_csv_leaderboard() {
    let dir = tempfile::tempdir().unwrap();
    let store = CsvLeaderboardStore::new(dir.path().join("leaderboard.csv"));
    for name in ["first", "second"] {
        let mut s = sequential_session(1, 0);
        let alloc = Allocation::from_portfolio(s.portfolio());
        s.submit_allocation(&alloc).unwrap();
        s.advance().unwrap();
        s.finish(&store).unwrap();
        assert_eq!(s.history()[0].round, 1, "{name}");
    }
    let board = store.load().unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board.entries()[0].name, "first");
}

#[test]
fn commands_out_of_phase_are_rejected() {
    let mut s = Session::new(GameRules::default()).unwrap();
    assert!(matches!(
        s.submit_allocation(&Allocation::new()),
        Err(SessionError::InvalidTransition { phase: Phase::Setup, .. })
    ));
    assert!(matches!(s.advance(), Err(SessionError::InvalidTransition { .. })));
    s.start(SessionConfig::new("Kabir")).unwrap();
    assert!(matches!(
        s.start(SessionConfig::new("Kabir")),
        Err(SessionError::InvalidTransition { .. })
    ));
    assert!(matches!(s.advance(), Err(SessionError::InvalidTransition { .. })));
}

proptest! {
    #[test]
    fn rejected_allocations_never_touch_state(parts in proptest::collection::vec(0i64..400_000, 5)) {
        let mut s = sequential_session(3, 10_000);
        let alloc = AssetClass::ALL
            .iter()
            .zip(&parts)
            .fold(Allocation::new(), |a, (asset, p)| a.with(*asset, d(*p)));
        let before = s.portfolio().clone();
        let outcome = s.submit_allocation(&alloc).map(|_| ());
        match outcome {
            Ok(_) => prop_assert_eq!(alloc.total(), d(1_000_000)),
            Err(_) => {
                prop_assert_eq!(s.phase(), Phase::Allocating { round: 1 });
                prop_assert_eq!(s.portfolio(), &before);
                prop_assert!(s.history().is_empty());
            }
        }
    }
}
