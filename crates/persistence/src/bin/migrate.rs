#![deny(warnings)]

use persistence::default_sqlite_url;

/// Prepare the SQLite leaderboard database. Accepts an optional URL argument.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let arg = std::env::args().nth(1);
    let url = arg.as_deref().unwrap_or(default_sqlite_url());
    let pool = persistence::init_db(url).await?;
    let existing = persistence::load_entries(&pool).await?.len();
    println!("Leaderboard ready at {} ({} entries)", url, existing);
    Ok(())
}
