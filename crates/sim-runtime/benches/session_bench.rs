use criterion::{criterion_group, criterion_main, Criterion};
use sim_core::{Allocation, SessionConfig};
use sim_runtime::{GameRules, Phase, Session};

fn bench_full_game(c: &mut Criterion) {
    let rules = GameRules {
        rng_seed: Some(42),
        ..GameRules::default()
    };
    c.bench_function("full_game_20_rounds", |b| {
        b.iter(|| {
            let mut session = Session::new(rules.clone()).unwrap();
            let mut cfg = SessionConfig::new("bench");
            cfg.rounds = 20;
            session.start(cfg).unwrap();
            while let Phase::Allocating { .. } = session.phase() {
                let alloc = Allocation::from_portfolio(session.portfolio());
                let _ = session.submit_allocation(&alloc).unwrap();
                let _ = session.advance().unwrap();
            }
            session.score().cloned()
        })
    });
}

criterion_group!(benches, bench_full_game);
criterion_main!(benches);
