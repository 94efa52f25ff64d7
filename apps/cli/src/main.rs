#![deny(warnings)]

//! Terminal front-end for DiversiTrack: collects settings and allocations,
//! prints each round's breakdown and the final score, and records the result
//! on the leaderboard.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use sim_core::{
    Allocation, AssetClass, EventTone, LeaderboardStore, RoundRecord, SessionConfig,
    DEFAULT_CONTRIBUTION, DEFAULT_ROUNDS,
};
use sim_runtime::{GameRules, GameSummary, Phase, Session, SessionError};
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Clone)]
struct Options {
    name: Option<String>,
    rounds: Option<u32>,
    sip: Option<Decimal>,
    seed: Option<u64>,
    rules: Option<String>,
    leaderboard: Option<String>,
    auto: bool,
    json: bool,
    version: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Options {
    let mut opts = Options::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--name" => opts.name = it.next(),
            "--rounds" => opts.rounds = it.next().and_then(|s| s.parse().ok()),
            "--sip" => opts.sip = it.next().and_then(|s| parse_amount(&s)),
            "--seed" => opts.seed = it.next().and_then(|s| s.parse().ok()),
            "--rules" => opts.rules = it.next(),
            "--leaderboard" => opts.leaderboard = it.next(),
            "--auto" => opts.auto = true,
            "--json" => opts.json = true,
            "--version" | "-V" => opts.version = true,
            _ => {}
        }
    }
    opts
}

/// Parse an amount typed by the player, tolerating `_` and `,` separators.
fn parse_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s.chars().filter(|c| !matches!(c, '_' | ',' | '₹')).collect();
    Decimal::from_str(cleaned.trim()).ok()
}

/// Whole currency units with thousands separators, e.g. `₹1,002,000`.
fn money(value: Decimal) -> String {
    let digits = value.trunc().abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if value.trunc().is_sign_negative() && !value.trunc().is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}₹{grouped}")
}

/// Print `msg` and read one trimmed line; `None` once input is exhausted.
fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, msg: &str) -> Result<Option<String>> {
    write!(out, "{msg}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Build the player's settings from flags, prompting for anything missing.
fn read_config<R: BufRead, W: Write>(
    opts: &Options,
    use_flags: bool,
    input: &mut R,
    out: &mut W,
) -> Result<Option<SessionConfig>> {
    let name = match opts.name.clone().filter(|_| use_flags) {
        Some(n) => n,
        None => match prompt(input, out, "Enter your name to track your score: ")? {
            Some(n) => n,
            None => return Ok(None),
        },
    };
    let mut cfg = SessionConfig::new(name);
    match opts.rounds.filter(|_| use_flags) {
        Some(r) => cfg.rounds = r,
        None if opts.auto => {}
        None => match prompt(input, out, &format!("Rounds [{DEFAULT_ROUNDS}]: "))? {
            Some(s) if !s.is_empty() => cfg.rounds = s.parse().unwrap_or(0),
            Some(_) => {}
            None => return Ok(None),
        },
    }
    match opts.sip.filter(|_| use_flags) {
        Some(c) => cfg.contribution = c,
        None if opts.auto => {}
        None => {
            let msg = format!("SIP per round [{}]: ", money(Decimal::from(DEFAULT_CONTRIBUTION)));
            match prompt(input, out, &msg)? {
                Some(s) if !s.is_empty() => {
                    cfg.contribution = parse_amount(&s).unwrap_or(Decimal::NEGATIVE_ONE)
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
    }
    Ok(Some(cfg))
}

/// Ask for each asset's amount, defaulting to the current holding.
fn read_allocation<R: BufRead, W: Write>(
    session: &Session,
    input: &mut R,
    out: &mut W,
) -> Result<Option<Allocation>> {
    let mut alloc = Allocation::new();
    for asset in AssetClass::ALL {
        let current = session.portfolio().get(asset);
        loop {
            let msg = format!("  {:<14} [{}]: ", asset.label(), money(current));
            let Some(line) = prompt(input, out, &msg)? else {
                return Ok(None);
            };
            if line.is_empty() {
                alloc.set(asset, current);
                break;
            }
            match parse_amount(&line) {
                Some(v) => {
                    alloc.set(asset, v);
                    break;
                }
                None => writeln!(out, "  not a number: {line}")?,
            }
        }
    }
    Ok(Some(alloc))
}

fn print_round<W: Write>(out: &mut W, rec: &RoundRecord) -> Result<()> {
    let mood = match rec.event.tone() {
        EventTone::Rally => "markets cheer",
        EventTone::Slump => "markets groan",
    };
    writeln!(out, "\nRound {} Event: {} ({mood})", rec.round, rec.event.name)?;
    writeln!(
        out,
        "{:<14} {:>14} {:>9} {:>12} {:>14}",
        "Asset", "Old Value", "Return %", "SIP Applied", "New Value"
    )?;
    for b in &rec.breakdown {
        let pct = format!("{:.1}%", b.return_fraction * Decimal::ONE_HUNDRED);
        let pct = if b.listed { pct } else { format!("{pct}*") };
        writeln!(
            out,
            "{:<14} {:>14} {:>9} {:>12} {:>14}",
            b.asset.label(),
            money(b.old_value),
            pct,
            money(b.contribution),
            money(b.new_value)
        )?;
    }
    if rec.breakdown.iter().any(|b| !b.listed) {
        writeln!(out, "* not affected by this event; fallback return applied")?;
    }
    writeln!(out, "Portfolio total: {}", money(rec.new_total))?;
    Ok(())
}

fn print_summary<W: Write>(out: &mut W, session: &Session, summary: &GameSummary) -> Result<()> {
    writeln!(out, "\nGame Over")?;
    writeln!(out, "Final portfolio of {}", summary.player)?;
    for (asset, value) in session.portfolio().iter() {
        writeln!(out, "  {:<14} {:>14}", asset.label(), money(value))?;
    }
    writeln!(out, "\nPortfolio by round")?;
    let header: String = AssetClass::ALL.iter().map(|a| format!(" {:>14}", a.label())).collect();
    writeln!(out, "{:>5}{header} {:>16}", "Round", "Total")?;
    for (round, portfolio) in session.value_series() {
        let cells: String = portfolio.iter().map(|(_, v)| format!(" {:>14}", money(v))).collect();
        writeln!(out, "{round:>5}{cells} {:>16}", money(portfolio.total()))?;
    }
    writeln!(out)?;
    let s = &summary.score;
    writeln!(out, "Final Score:           {}", money(s.score))?;
    writeln!(out, "Diversification Bonus: {}", money(s.diversification_bonus))?;
    writeln!(out, "Volatility Penalty:    {}", money(s.volatility_penalty))?;
    writeln!(out, "\nLeaderboard")?;
    for (i, e) in summary.leaderboard.iter().enumerate() {
        writeln!(out, "{:>3}. {:<20} {:>14}", i + 1, e.name, money(Decimal::from(e.score)))?;
    }
    Ok(())
}

/// Drive one or more games until input runs out or the player stops.
fn play<R: BufRead, W: Write>(
    session: &mut Session,
    opts: &Options,
    store: &dyn LeaderboardStore,
    input: &mut R,
    out: &mut W,
) -> Result<()> {
    let mut use_flags = true;
    loop {
        let Some(cfg) = read_config(opts, use_flags, input, out)? else {
            return Ok(());
        };
        let rounds = cfg.rounds;
        if let Err(e) = session.start(cfg) {
            if opts.auto {
                bail!(e);
            }
            writeln!(out, "{e}")?;
            use_flags = false;
            continue;
        }

        while let Phase::Allocating { round } = session.phase() {
            writeln!(
                out,
                "\nRound {round}/{rounds}: allocate {}",
                money(session.required_total())
            )?;
            let alloc = if opts.auto {
                Allocation::from_portfolio(session.portfolio())
            } else {
                match read_allocation(session, input, out)? {
                    Some(a) => a,
                    None => return Ok(()),
                }
            };
            match session.submit_allocation(&alloc) {
                Ok(rec) => print_round(out, rec)?,
                Err(SessionError::Validation(e)) if !opts.auto => {
                    writeln!(out, "Allocation rejected: {e}")?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            if !opts.auto && prompt(input, out, "Press Enter for the next round ")?.is_none() {
                return Ok(());
            }
            session.advance()?;
        }

        let summary = session.finish(store)?;
        if opts.json {
            writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
        } else {
            print_summary(out, session, &summary)?;
        }
        info!(player = %summary.player, score = summary.score.leaderboard_score(), "game recorded");

        if opts.auto {
            return Ok(());
        }
        match prompt(input, out, "\nPlay again? [y/N] ")? {
            Some(a) if a.eq_ignore_ascii_case("y") => {
                session.reset();
                use_flags = false;
            }
            _ => return Ok(()),
        }
    }
}

fn main() -> Result<()> {
    // Logging setup; stderr keeps the game table on stdout readable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let opts = parse_args(std::env::args().skip(1));
    if opts.version {
        println!(
            "diversitrack {} ({} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }
    info!(?opts, "starting CLI");

    let mut rules = match &opts.rules {
        Some(path) => GameRules::load(path)?,
        None => GameRules::default(),
    };
    if opts.seed.is_some() {
        rules.rng_seed = opts.seed;
    }
    let location = opts
        .leaderboard
        .clone()
        .unwrap_or_else(|| persistence::default_csv_path().to_string());
    let store = persistence::open_store(&location)?;
    let mut session = Session::new(rules)?;

    println!("DiversiTrack: The Journey to Financial Freedom");
    println!("Allocate smartly, diversify, and win!");
    let stdin = io::stdin();
    let stdout = io::stdout();
    play(&mut session, &opts, store.as_ref(), &mut stdin.lock(), &mut stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryLeaderboardStore;
    use sim_econ::DrawMode;

    fn session() -> Session {
        Session::new(GameRules {
            draw_mode: DrawMode::Sequential,
            rng_seed: Some(1),
            ..GameRules::default()
        })
        .unwrap()
    }

    fn args(list: &[&str]) -> Options {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags() {
        let o = args(&["--name", "Asha", "--rounds", "5", "--sip", "5,000", "--auto", "--bogus"]);
        assert_eq!(o.name.as_deref(), Some("Asha"));
        assert_eq!(o.rounds, Some(5));
        assert_eq!(o.sip, Some(Decimal::from(5_000)));
        assert!(o.auto && !o.json);
    }

    #[test]
    fn money_groups_thousands() {
        assert_eq!(money(Decimal::from(1_002_000)), "₹1,002,000");
        assert_eq!(money(Decimal::from(-950)), "-₹950");
        assert_eq!(money(Decimal::new(99999, 2)), "₹999");
        assert_eq!(money(Decimal::ZERO), "₹0");
    }

    #[test]
    fn auto_game_records_score() {
        let opts = args(&["--name", "Bot", "--rounds", "3", "--sip", "0", "--auto"]);
        let store = MemoryLeaderboardStore::default();
        let mut out = Vec::new();
        let mut s = session();
        play(&mut s, &opts, &store, &mut io::empty(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Round 1 Event: COVID-19 Pandemic Crash"));
        assert!(text.contains("Game Over"));
        let table: Vec<&str> = text
            .split("Portfolio by round")
            .nth(1)
            .unwrap()
            .lines()
            .skip(1)
            .take_while(|l| !l.is_empty())
            .collect();
        assert_eq!(table.len(), 4);
        assert!(table[0].contains("Real Estate"));
        assert!(table[3].trim_start().starts_with('3'));
        assert!(table[3].ends_with(&money(s.required_total())));
        assert_eq!(store.load().unwrap().entries()[0].name, "Bot");
        assert_eq!(s.phase(), Phase::GameOver);
    }

    #[test]
    fn interactive_game_reprompts_on_mismatch() {
        let opts = args(&["--name", "Asha", "--rounds", "1", "--sip", "10000"]);
        let script = [
            "100000", "", "", "", "", // sums to 900,000
            "", "", "", "", "", // keep the even split
            "",  // next round
            "n", // play again?
        ]
        .join("\n");
        let store = MemoryLeaderboardStore::default();
        let mut out = Vec::new();
        let mut s = session();
        play(&mut s, &opts, &store, &mut script.as_bytes(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Allocation rejected: allocation must total 1000000, got 900000"));
        assert!(text.contains("Final Score:"));
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn json_summary_is_machine_readable() {
        let opts = args(&["--name", "Bot", "--rounds", "1", "--auto", "--json"]);
        let store = MemoryLeaderboardStore::default();
        let mut out = Vec::new();
        play(&mut session(), &opts, &store, &mut io::empty(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let json_start = text.find('{').unwrap();
        let v: serde_json::Value = serde_json::from_str(&text[json_start..]).unwrap();
        assert_eq!(v["player"], "Bot");
        assert!(v["leaderboard"].as_array().unwrap().len() == 1);
    }

    #[test]
    fn stops_cleanly_when_input_ends() {
        let opts = Options::default();
        let store = MemoryLeaderboardStore::default();
        let mut out = Vec::new();
        let mut s = session();
        play(&mut s, &opts, &store, &mut "Asha\n".as_bytes(), &mut out).unwrap();
        assert_eq!(s.phase(), Phase::Setup);
        assert!(store.load().unwrap().is_empty());
    }
}
