//! Ledger Inspector
//!
//! Opens a ledger database read-side and prints its owner, trade count, the most
//! recent trades and the result of the integrity walk.
//!
//! Usage:
//!   ledger-inspect --path ledger.db --recent 10 --actor actor1...
//!
//! Environment:
//!   LEDGER_PATH - Database directory (default: ledger.db)
//!   LEDGER_RECENT - Number of trailing trades to print (default: 10)
//!   RUST_LOG - Log filter

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use trade_ledger::{Actor, LedgerConfig, TradeLedger, utils::cents_to_display};

#[derive(Parser, Debug)]
#[command(name = "ledger-inspect")]
#[command(about = "Print the state of a trade ledger database")]
struct Args {
    /// Ledger database directory
    #[arg(long, env = "LEDGER_PATH", default_value = "ledger.db")]
    path: PathBuf,

    /// Number of trailing trades to print
    #[arg(long, env = "LEDGER_RECENT", default_value = "10")]
    recent: usize,

    /// Also print the effective access level of this actor
    #[arg(long)]
    actor: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let args = Args::parse();

    if !args.path.exists() {
        bail!("no ledger database at {}", args.path.display());
    }

    let config = LedgerConfig::new(&args.path)
        .with_flush_on_write(false)
        .with_recent_limit(args.recent);
    let ledger = TradeLedger::open_existing(config)
        .with_context(|| format!("failed to open ledger at {}", args.path.display()))?;

    info!(path = %args.path.display(), "ledger opened");
    println!("owner          = {}", ledger.owner());
    println!("ledger.count() = {}", ledger.count());

    for (position, trade) in ledger.recent()? {
        println!(
            "[{position}] tradeId={} symbol={} price={} qty={} buy={} sell={} ts={}",
            trade.trade_id,
            trade.symbol,
            cents_to_display(trade.price_cents),
            trade.quantity,
            trade.buy_order_id,
            trade.sell_order_id,
            trade.timestamp.unix_seconds(),
        );
    }

    if let Some(address) = args.actor {
        let actor = Actor::parse(&address)?;
        println!("access level of {actor} = {}", ledger.resolve(&actor));
    }

    let verified = ledger.verify().context("integrity check failed")?;
    println!("verified {verified} trades");

    Ok(())
}
