//! Reconciliation Runner CLI
//!
//! Offline entrypoint for running daily reconciliation against a mirror
//! database, for cron jobs and post-incident checks.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin aeonpay-recon -- --db ./aeonpay.db --day 2025-03-14
//! cargo run --bin aeonpay-recon -- --db ./aeonpay.db          # yesterday
//! ```
//!
//! # Exit Codes
//!
//! - 0: Day reconciled balanced
//! - 1: Day reconciled with a mismatch
//! - 2: Configuration or runtime error

use chrono::{Duration, NaiveDate};
use clap::Parser;
use std::sync::Arc;

use aeonpay_backend::{
    clock::Clock,
    db::Db,
    instruments::InstrumentManager,
    ledger::Ledger,
    plans::PlanStore,
    recon::{ReconEngine, ReconStatus},
};

/// Run daily reconciliation against a mirror database
#[derive(Parser, Debug)]
#[command(name = "aeonpay-recon")]
#[command(about = "Reconcile one day's instrument totals against the ledger")]
struct Cli {
    /// Path to the SQLite mirror
    #[arg(short, long, env = "AEONPAY_DB_PATH", default_value = "./aeonpay.db")]
    db: String,

    /// Day to reconcile (YYYY-MM-DD); defaults to yesterday
    #[arg(long)]
    day: Option<NaiveDate>,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,
}

fn main() {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(2);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<i32> {
    let clock = Clock::system();
    let db = Arc::new(Db::open(&cli.db)?);

    let plans = Arc::new(PlanStore::new(clock.clone(), None));
    plans.hydrate(db.load_plans()?);

    let instruments = Arc::new(InstrumentManager::new(plans, clock.clone(), None));
    instruments.hydrate(
        db.load_vouchers()?,
        db.load_mandates()?,
        db.load_redemptions()?,
        db.load_executions()?,
    );

    let ledger = Arc::new(Ledger::hydrate(db.load_ledger_entries()?));

    let engine = ReconEngine::new(instruments, ledger, clock.clone(), Some(db));
    let day = cli
        .day
        .unwrap_or_else(|| (clock.now() - Duration::days(1)).date_naive());
    let report = engine.run(day);

    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");

    Ok(match report.status {
        ReconStatus::Balanced => 0,
        ReconStatus::Mismatch => 1,
    })
}
