//! AeonPay - Campus Group Payments Engine
//!
//! Plans hold a shared budget; vouchers and mandates carve it up per
//! member; the intent/confirm flow spends it; every settlement lands in
//! a double-entry ledger that daily reconciliation checks against the
//! instrument records.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use dotenv::dotenv;
use std::path::Path;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aeonpay_backend::{
    api::{create_router, AppState},
    clock::Clock,
    db::Db,
    directory::MerchantDirectory,
    idempotency::IdempotencyGate,
    instruments::InstrumentManager,
    ledger::Ledger,
    models::Config,
    payments::{PaymentEngine, StubRail, ThresholdGuardrail},
    plans::PlanStore,
    recon::ReconEngine,
    seed,
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("🚀 AeonPay engine starting");

    let config = Arc::new(Config::from_env()?);
    let clock = Clock::system();

    let db = Arc::new(Db::open(&config.database_path).context("Failed to open database")?);
    info!("📊 Database initialized at: {}", config.database_path);

    // Hydrate every store from the SQLite mirror before accepting traffic.
    let directory = Arc::new(MerchantDirectory::new(Some(db.clone())));
    directory.hydrate(db.load_campuses()?, db.load_merchants()?);

    let plans = Arc::new(PlanStore::new(clock.clone(), Some(db.clone())));
    plans.hydrate(db.load_plans()?);

    let instruments = Arc::new(InstrumentManager::new(
        plans.clone(),
        clock.clone(),
        Some(db.clone()),
    ));
    instruments.hydrate(
        db.load_vouchers()?,
        db.load_mandates()?,
        db.load_redemptions()?,
        db.load_executions()?,
    );

    let ledger = Arc::new(Ledger::hydrate(db.load_ledger_entries()?));

    let payments = Arc::new(PaymentEngine::new(
        plans.clone(),
        instruments.clone(),
        ledger.clone(),
        directory.clone(),
        Box::new(ThresholdGuardrail {
            threshold: config.guardrail_threshold,
        }),
        config.guardrail_mode,
        Box::new(StubRail),
        clock.clone(),
        Some(db.clone()),
    ));
    payments.hydrate(db.load_transactions()?);

    let gate = Arc::new(IdempotencyGate::new(clock.clone(), Some(db.clone())));
    gate.hydrate(db.load_idempotents()?);

    let recon = Arc::new(ReconEngine::new(
        instruments.clone(),
        ledger.clone(),
        clock.clone(),
        Some(db.clone()),
    ));
    recon.hydrate(db.load_recon_reports()?);

    info!(
        plans = plans.plan_count(),
        merchants = directory.merchant_count(),
        ledger_entries = ledger.entry_count(),
        "💾 State hydrated from mirror"
    );

    if config.seed_demo_data {
        let (campuses, merchants) = seed::seed_directory(&directory);
        if campuses > 0 {
            info!(campuses, merchants, "🌱 Seeded merchant directory");
        }
        let seeded_plans = seed::seed_demo_plans(&plans, &clock);
        if seeded_plans > 0 {
            info!(plans = seeded_plans, "🌱 Seeded demo plans");
        }
    }

    let state = AppState {
        config: config.clone(),
        clock: clock.clone(),
        db,
        directory,
        plans,
        instruments: instruments.clone(),
        ledger,
        payments,
        recon: recon.clone(),
        gate: gate.clone(),
    };

    // Instrument expiry sweep: flips past-expiry vouchers and mandates so
    // reads never show a stale `active`.
    let sweep_instruments = instruments.clone();
    let sweep_secs = config.expiry_sweep_secs;
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(sweep_secs));
        loop {
            ticker.tick().await;
            let (vouchers, mandates) = sweep_instruments.sweep_expired();
            if vouchers > 0 || mandates > 0 {
                info!(vouchers, mandates, "🧹 Expired instruments swept");
            }
        }
    });

    // Idempotency retention sweep.
    let sweep_gate = gate.clone();
    let gate_sweep_secs = config.idempotency_sweep_secs;
    let retention = ChronoDuration::hours(config.idempotency_retention_hours);
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(gate_sweep_secs));
        loop {
            ticker.tick().await;
            let removed = sweep_gate.sweep_expired(retention);
            if removed > 0 {
                info!(removed, "🧹 Idempotency keys swept");
            }
        }
    });

    // Scheduled reconciliation of the previous day.
    if config.recon_schedule_enabled {
        let scheduled_recon = recon.clone();
        let recon_secs = config.recon_interval_secs;
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(recon_secs));
            loop {
                ticker.tick().await;
                let report = scheduled_recon.run_previous_day();
                info!(
                    day = %report.day,
                    status = report.status.as_str(),
                    "🧾 Scheduled reconciliation finished"
                );
            }
        });
    } else {
        warn!("⚠️ Scheduled reconciliation disabled via configuration");
    }

    let app = create_router(state).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aeonpay_backend=debug,aeonpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the manifest directory
    // for runs launched from elsewhere with --manifest-path.
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
