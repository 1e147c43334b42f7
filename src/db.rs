//! SQLite mirror of the in-memory stores.
//!
//! The authoritative state lives in memory; every mutation is echoed here
//! best-effort (`let _ = db.record_*`), and on boot the stores rehydrate from
//! these tables. Amounts are stored as decimal strings, timestamps as RFC3339.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::directory::{Campus, Merchant};
use crate::instruments::{Execution, Redemption};
use crate::ledger::{LedgerEntry, LedgerLeg};
use crate::models::{
    Mandate, MandateState, PaymentMode, Plan, PlanStatus, Transaction, TxnStatus, Voucher,
    VoucherState,
};
use crate::money::parse_stored_amount;
use crate::recon::{ReconReport, ReconStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS campuses (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    location    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS merchants (
    id          TEXT PRIMARY KEY,
    campus_id   TEXT NOT NULL,
    name        TEXT NOT NULL,
    category    TEXT NOT NULL,
    icon        TEXT NOT NULL,
    location    TEXT NOT NULL,
    active      INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_merchants_campus ON merchants(campus_id);

CREATE TABLE IF NOT EXISTS plans (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    campus_id           TEXT NOT NULL,
    cap_per_head        TEXT NOT NULL,
    window_start        TEXT NOT NULL,
    window_end          TEXT NOT NULL,
    merchant_whitelist  TEXT NOT NULL,
    status              TEXT NOT NULL,
    created_by          TEXT NOT NULL,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plan_members (
    plan_id     TEXT NOT NULL,
    user_id     TEXT NOT NULL,
    PRIMARY KEY (plan_id, user_id)
);

CREATE TABLE IF NOT EXISTS vouchers (
    id                  TEXT PRIMARY KEY,
    plan_id             TEXT NOT NULL,
    member_user_id      TEXT NOT NULL,
    initial_amount      TEXT NOT NULL,
    remaining_amount    TEXT NOT NULL,
    merchant_list       TEXT NOT NULL,
    state               TEXT NOT NULL,
    expires_at          TEXT NOT NULL,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_vouchers_plan ON vouchers(plan_id);

CREATE TABLE IF NOT EXISTS mandates (
    id              TEXT PRIMARY KEY,
    plan_id         TEXT NOT NULL,
    member_user_id  TEXT NOT NULL,
    cap_amount      TEXT NOT NULL,
    remaining_cap   TEXT NOT NULL,
    valid_from      TEXT NOT NULL,
    valid_to        TEXT NOT NULL,
    state           TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_mandates_plan ON mandates(plan_id);

CREATE TABLE IF NOT EXISTS transactions (
    intent_id           TEXT PRIMARY KEY,
    plan_id             TEXT NOT NULL,
    member_user_id      TEXT NOT NULL,
    merchant_id         TEXT NOT NULL,
    amount              TEXT NOT NULL,
    mode                TEXT NOT NULL,
    status              TEXT NOT NULL,
    guardrail_triggered INTEGER NOT NULL DEFAULT 0,
    guardrail_reason    TEXT,
    failure_reason      TEXT,
    rrn                 TEXT,
    created_at          TEXT NOT NULL,
    finalized_at        TEXT
);
CREATE INDEX IF NOT EXISTS idx_transactions_plan ON transactions(plan_id);

CREATE TABLE IF NOT EXISTS ledger_entries (
    entry_id        INTEGER PRIMARY KEY,
    transaction_id  TEXT NOT NULL,
    account         TEXT NOT NULL,
    leg             TEXT NOT NULL,
    amount          TEXT NOT NULL,
    posted_at       TEXT NOT NULL,
    reversal        INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_ledger_txn ON ledger_entries(transaction_id);
CREATE INDEX IF NOT EXISTS idx_ledger_account ON ledger_entries(account);

CREATE TABLE IF NOT EXISTS redemptions (
    id              TEXT PRIMARY KEY,
    voucher_id      TEXT NOT NULL,
    plan_id         TEXT NOT NULL,
    member_user_id  TEXT NOT NULL,
    merchant_id     TEXT NOT NULL,
    amount          TEXT NOT NULL,
    transaction_ref TEXT NOT NULL,
    redeemed_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS executions (
    id              TEXT PRIMARY KEY,
    mandate_id      TEXT NOT NULL,
    plan_id         TEXT NOT NULL,
    member_user_id  TEXT NOT NULL,
    merchant_id     TEXT NOT NULL,
    amount          TEXT NOT NULL,
    transaction_ref TEXT NOT NULL,
    executed_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS idempotent_requests (
    key         TEXT PRIMARY KEY,
    response    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recon_reports (
    day             TEXT PRIMARY KEY,
    voucher_total   TEXT NOT NULL,
    mandate_total   TEXT NOT NULL,
    ledger_total    TEXT NOT NULL,
    status          TEXT NOT NULL,
    deltas          TEXT NOT NULL,
    generated_at    TEXT NOT NULL
);
"#;

/// Handle to the mirror database. Cheap to share behind an `Arc`.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open sqlite db at {}", path.as_ref().display()))?;

        // WAL keeps readers unblocked while the mirror writes.
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute_batch(SCHEMA).context("create mirror schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ===== CAMPUSES & MERCHANTS =====

    pub fn record_campus(&self, campus: &Campus) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO campuses (id, name, location) VALUES (?1, ?2, ?3)",
            params![campus.id, campus.name, campus.location],
        )?;
        Ok(())
    }

    pub fn record_merchant(&self, merchant: &Merchant) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO merchants (id, campus_id, name, category, icon, location, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                merchant.id,
                merchant.campus_id,
                merchant.name,
                merchant.category,
                merchant.icon,
                merchant.location,
                merchant.active as i64,
            ],
        )?;
        Ok(())
    }

    pub fn load_campuses(&self) -> Result<Vec<Campus>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached("SELECT id, name, location FROM campuses ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Campus {
                id: row.get(0)?,
                name: row.get(1)?,
                location: row.get(2)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("load campuses")
    }

    pub fn load_merchants(&self) -> Result<Vec<Merchant>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, campus_id, name, category, icon, location, active FROM merchants ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Merchant {
                id: row.get(0)?,
                campus_id: row.get(1)?,
                name: row.get(2)?,
                category: row.get(3)?,
                icon: row.get(4)?,
                location: row.get(5)?,
                active: row.get::<_, i64>(6)? != 0,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("load merchants")
    }

    // ===== PLANS =====

    pub fn record_plan(&self, plan: &Plan) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO plans
             (id, name, campus_id, cap_per_head, window_start, window_end,
              merchant_whitelist, status, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                plan.id,
                plan.name,
                plan.campus_id,
                plan.cap_per_head.to_string(),
                ts_str(&plan.window_start),
                ts_str(&plan.window_end),
                serde_json::to_string(&plan.merchant_whitelist)?,
                plan.status.as_str(),
                plan.created_by,
                ts_str(&plan.created_at),
            ],
        )?;
        tx.execute("DELETE FROM plan_members WHERE plan_id = ?1", params![plan.id])?;
        for member in &plan.member_ids {
            tx.execute(
                "INSERT INTO plan_members (plan_id, user_id) VALUES (?1, ?2)",
                params![plan.id, member],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_plans(&self) -> Result<Vec<Plan>> {
        let conn = self.conn.lock();

        let mut members: HashMap<String, Vec<String>> = HashMap::new();
        {
            let mut stmt =
                conn.prepare_cached("SELECT plan_id, user_id FROM plan_members ORDER BY user_id")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (plan_id, user_id) = row?;
                members.entry(plan_id).or_default().push(user_id);
            }
        }

        let mut stmt = conn.prepare_cached(
            "SELECT id, name, campus_id, cap_per_head, window_start, window_end,
                    merchant_whitelist, status, created_by, created_at
             FROM plans ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name, campus_id, cap, start, end, whitelist, status, created_by, created_at) =
                row?;
            out.push(Plan {
                member_ids: members.remove(&id).unwrap_or_default(),
                name,
                campus_id,
                cap_per_head: parse_stored_amount(&cap)?,
                window_start: parse_ts(&start)?,
                window_end: parse_ts(&end)?,
                merchant_whitelist: serde_json::from_str(&whitelist)?,
                status: PlanStatus::parse(&status)
                    .with_context(|| format!("bad plan status: {status}"))?,
                created_by,
                created_at: parse_ts(&created_at)?,
                id,
            });
        }
        Ok(out)
    }

    // ===== VOUCHERS & MANDATES =====

    pub fn record_voucher(&self, voucher: &Voucher) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO vouchers
             (id, plan_id, member_user_id, initial_amount, remaining_amount,
              merchant_list, state, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                voucher.id,
                voucher.plan_id,
                voucher.member_user_id,
                voucher.initial_amount.to_string(),
                voucher.remaining_amount.to_string(),
                serde_json::to_string(&voucher.merchant_list)?,
                voucher.state.as_str(),
                ts_str(&voucher.expires_at),
                ts_str(&voucher.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn load_vouchers(&self) -> Result<Vec<Voucher>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, plan_id, member_user_id, initial_amount, remaining_amount,
                    merchant_list, state, expires_at, created_at
             FROM vouchers ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, plan_id, member, initial, remaining, list, state, expires, created) = row?;
            out.push(Voucher {
                id,
                plan_id,
                member_user_id: member,
                initial_amount: parse_stored_amount(&initial)?,
                remaining_amount: parse_stored_amount(&remaining)?,
                merchant_list: serde_json::from_str(&list)?,
                state: VoucherState::parse(&state)
                    .with_context(|| format!("bad voucher state: {state}"))?,
                expires_at: parse_ts(&expires)?,
                created_at: parse_ts(&created)?,
            });
        }
        Ok(out)
    }

    pub fn record_mandate(&self, mandate: &Mandate) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO mandates
             (id, plan_id, member_user_id, cap_amount, remaining_cap,
              valid_from, valid_to, state, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                mandate.id,
                mandate.plan_id,
                mandate.member_user_id,
                mandate.cap_amount.to_string(),
                mandate.remaining_cap.to_string(),
                ts_str(&mandate.valid_from),
                ts_str(&mandate.valid_to),
                mandate.state.as_str(),
                ts_str(&mandate.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn load_mandates(&self) -> Result<Vec<Mandate>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, plan_id, member_user_id, cap_amount, remaining_cap,
                    valid_from, valid_to, state, created_at
             FROM mandates ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, plan_id, member, cap, remaining, from, to, state, created) = row?;
            out.push(Mandate {
                id,
                plan_id,
                member_user_id: member,
                cap_amount: parse_stored_amount(&cap)?,
                remaining_cap: parse_stored_amount(&remaining)?,
                valid_from: parse_ts(&from)?,
                valid_to: parse_ts(&to)?,
                state: MandateState::parse(&state)
                    .with_context(|| format!("bad mandate state: {state}"))?,
                created_at: parse_ts(&created)?,
            });
        }
        Ok(out)
    }

    // ===== TRANSACTIONS & LEDGER =====

    pub fn record_transaction(&self, txn: &Transaction) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO transactions
             (intent_id, plan_id, member_user_id, merchant_id, amount, mode, status,
              guardrail_triggered, guardrail_reason, failure_reason, rrn, created_at, finalized_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                txn.intent_id,
                txn.plan_id,
                txn.member_user_id,
                txn.merchant_id,
                txn.amount.to_string(),
                txn.mode.as_str(),
                txn.status.as_str(),
                txn.guardrail_triggered as i64,
                txn.guardrail_reason,
                txn.failure_reason,
                txn.rrn,
                ts_str(&txn.created_at),
                txn.finalized_at.as_ref().map(ts_str),
            ],
        )?;
        Ok(())
    }

    pub fn load_transactions(&self) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT intent_id, plan_id, member_user_id, merchant_id, amount, mode, status,
                    guardrail_triggered, guardrail_reason, failure_reason, rrn,
                    created_at, finalized_at
             FROM transactions ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, Option<String>>(12)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (
                intent_id,
                plan_id,
                member,
                merchant,
                amount,
                mode,
                status,
                guardrail,
                guardrail_reason,
                failure_reason,
                rrn,
                created,
                finalized,
            ) = row?;
            out.push(Transaction {
                intent_id,
                plan_id,
                member_user_id: member,
                merchant_id: merchant,
                amount: parse_stored_amount(&amount)?,
                mode: PaymentMode::parse(&mode)
                    .with_context(|| format!("bad payment mode: {mode}"))?,
                status: TxnStatus::parse(&status)
                    .with_context(|| format!("bad transaction status: {status}"))?,
                guardrail_triggered: guardrail != 0,
                guardrail_reason,
                failure_reason,
                rrn,
                created_at: parse_ts(&created)?,
                finalized_at: finalized.as_deref().map(parse_ts).transpose()?,
            });
        }
        Ok(out)
    }

    /// Writes a posted batch in one transaction so the mirror never holds
    /// half a batch.
    pub fn record_ledger_entries(&self, entries: &[LedgerEntry]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for entry in entries {
            tx.execute(
                "INSERT OR REPLACE INTO ledger_entries
                 (entry_id, transaction_id, account, leg, amount, posted_at, reversal)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.entry_id as i64,
                    entry.transaction_id,
                    entry.account,
                    entry.leg.as_str(),
                    entry.amount.to_string(),
                    ts_str(&entry.posted_at),
                    entry.reversal as i64,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_ledger_entries(&self) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT entry_id, transaction_id, account, leg, amount, posted_at, reversal
             FROM ledger_entries ORDER BY entry_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (entry_id, transaction_id, account, leg, amount, posted_at, reversal) = row?;
            out.push(LedgerEntry {
                entry_id: entry_id as u64,
                transaction_id,
                account,
                leg: LedgerLeg::parse(&leg).with_context(|| format!("bad ledger leg: {leg}"))?,
                amount: parse_stored_amount(&amount)?,
                posted_at: parse_ts(&posted_at)?,
                reversal: reversal != 0,
            });
        }
        Ok(out)
    }

    // ===== REDEMPTIONS & EXECUTIONS =====

    pub fn record_redemption(&self, redemption: &Redemption) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO redemptions
             (id, voucher_id, plan_id, member_user_id, merchant_id, amount, transaction_ref, redeemed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                redemption.id,
                redemption.voucher_id,
                redemption.plan_id,
                redemption.member_user_id,
                redemption.merchant_id,
                redemption.amount.to_string(),
                redemption.transaction_ref,
                ts_str(&redemption.redeemed_at),
            ],
        )?;
        Ok(())
    }

    pub fn load_redemptions(&self) -> Result<Vec<Redemption>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, voucher_id, plan_id, member_user_id, merchant_id, amount,
                    transaction_ref, redeemed_at
             FROM redemptions ORDER BY redeemed_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, voucher_id, plan_id, member, merchant, amount, txn_ref, redeemed) = row?;
            out.push(Redemption {
                id,
                voucher_id,
                plan_id,
                member_user_id: member,
                merchant_id: merchant,
                amount: parse_stored_amount(&amount)?,
                transaction_ref: txn_ref,
                redeemed_at: parse_ts(&redeemed)?,
            });
        }
        Ok(out)
    }

    pub fn record_execution(&self, execution: &Execution) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO executions
             (id, mandate_id, plan_id, member_user_id, merchant_id, amount, transaction_ref, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                execution.id,
                execution.mandate_id,
                execution.plan_id,
                execution.member_user_id,
                execution.merchant_id,
                execution.amount.to_string(),
                execution.transaction_ref,
                ts_str(&execution.executed_at),
            ],
        )?;
        Ok(())
    }

    pub fn load_executions(&self) -> Result<Vec<Execution>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, mandate_id, plan_id, member_user_id, merchant_id, amount,
                    transaction_ref, executed_at
             FROM executions ORDER BY executed_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, mandate_id, plan_id, member, merchant, amount, txn_ref, executed) = row?;
            out.push(Execution {
                id,
                mandate_id,
                plan_id,
                member_user_id: member,
                merchant_id: merchant,
                amount: parse_stored_amount(&amount)?,
                transaction_ref: txn_ref,
                executed_at: parse_ts(&executed)?,
            });
        }
        Ok(out)
    }

    // ===== IDEMPOTENCY =====

    pub fn record_idempotent(
        &self,
        key: &str,
        response: &serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO idempotent_requests (key, response, created_at)
             VALUES (?1, ?2, ?3)",
            params![key, response.to_string(), ts_str(&created_at)],
        )?;
        Ok(())
    }

    pub fn load_idempotents(&self) -> Result<Vec<(String, serde_json::Value, DateTime<Utc>)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT key, response, created_at FROM idempotent_requests")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, response, created) = row?;
            out.push((key, serde_json::from_str(&response)?, parse_ts(&created)?));
        }
        Ok(out)
    }

    pub fn delete_idempotents_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM idempotent_requests WHERE created_at < ?1",
            params![ts_str(&cutoff)],
        )?;
        Ok(removed)
    }

    // ===== RECON =====

    pub fn record_recon_report(&self, report: &ReconReport) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO recon_reports
             (day, voucher_total, mandate_total, ledger_total, status, deltas, generated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                day_str(report.day),
                report.voucher_total.to_string(),
                report.mandate_total.to_string(),
                report.ledger_total.to_string(),
                report.status.as_str(),
                serde_json::to_string(&report.deltas)?,
                ts_str(&report.generated_at),
            ],
        )?;
        Ok(())
    }

    pub fn load_recon_reports(&self) -> Result<Vec<ReconReport>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT day, voucher_total, mandate_total, ledger_total, status, deltas, generated_at
             FROM recon_reports ORDER BY day",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (day, vtotal, mtotal, ltotal, status, deltas, generated) = row?;
            out.push(ReconReport {
                day: parse_day(&day)?,
                voucher_total: parse_stored_amount(&vtotal)?,
                mandate_total: parse_stored_amount(&mtotal)?,
                ledger_total: parse_stored_amount(&ltotal)?,
                status: ReconStatus::parse(&status)
                    .with_context(|| format!("bad recon status: {status}"))?,
                deltas: serde_json::from_str(&deltas)?,
                generated_at: parse_ts(&generated)?,
            });
        }
        Ok(out)
    }
}

fn ts_str(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp: {s}"))?
        .with_timezone(&Utc))
}

fn day_str(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("bad day: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PostingLeg;
    use crate::models::PlanStatus;
    use rust_decimal_macros::dec;
    use tempfile::NamedTempFile;

    fn temp_db() -> (Db, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let db = Db::open(file.path()).unwrap();
        (db, file)
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn sample_plan() -> Plan {
        Plan {
            id: "plan_0001".into(),
            name: "Sports Day".into(),
            campus_id: "campus-1".into(),
            member_ids: vec!["user-1".into(), "user-2".into()],
            cap_per_head: dec!(200.00),
            window_start: ts("2025-03-14T08:00:00Z"),
            window_end: ts("2025-03-14T20:00:00Z"),
            merchant_whitelist: vec!["merchant-campus-1-0".into()],
            status: PlanStatus::Active,
            created_by: "user-1".into(),
            created_at: ts("2025-03-13T10:00:00Z"),
        }
    }

    #[test]
    fn plan_round_trips_with_members() {
        let (db, _file) = temp_db();
        let plan = sample_plan();
        db.record_plan(&plan).unwrap();

        let loaded = db.load_plans().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], plan);
    }

    #[test]
    fn plan_rewrite_replaces_member_rows() {
        let (db, _file) = temp_db();
        let mut plan = sample_plan();
        db.record_plan(&plan).unwrap();

        plan.member_ids = vec!["user-3".into()];
        plan.status = PlanStatus::Completed;
        db.record_plan(&plan).unwrap();

        let loaded = db.load_plans().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].member_ids, vec!["user-3".to_string()]);
        assert_eq!(loaded[0].status, PlanStatus::Completed);
    }

    #[test]
    fn voucher_upsert_keeps_latest_balance() {
        let (db, _file) = temp_db();
        let mut voucher = Voucher {
            id: "vch_0001".into(),
            plan_id: "plan_0001".into(),
            member_user_id: "user-1".into(),
            initial_amount: dec!(100.00),
            remaining_amount: dec!(100.00),
            merchant_list: vec![],
            state: VoucherState::Active,
            expires_at: ts("2025-03-14T20:00:00Z"),
            created_at: ts("2025-03-14T08:00:00Z"),
        };
        db.record_voucher(&voucher).unwrap();

        voucher.remaining_amount = dec!(40.00);
        db.record_voucher(&voucher).unwrap();

        let loaded = db.load_vouchers().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].remaining_amount, dec!(40.00));
        assert_eq!(loaded[0].initial_amount, dec!(100.00));
    }

    #[test]
    fn ledger_batch_round_trips_in_order() {
        let (db, _file) = temp_db();
        let ledger = crate::ledger::Ledger::new();
        let entries = ledger
            .post(
                "intent_1700000000_4242",
                vec![
                    PostingLeg::debit("plan:plan_0001:vouchers", dec!(60.00)),
                    PostingLeg::credit("merchant:merchant-campus-1-0:revenue", dec!(60.00)),
                ],
                ts("2025-03-14T12:00:00Z"),
            )
            .unwrap();
        db.record_ledger_entries(&entries).unwrap();

        let loaded = db.load_ledger_entries().unwrap();
        assert_eq!(loaded, entries);

        let rebuilt = crate::ledger::Ledger::hydrate(loaded);
        assert_eq!(rebuilt.entry_count(), 2);
        assert!(rebuilt.verify_balanced());
    }

    #[test]
    fn idempotent_sweep_removes_old_rows_only() {
        let (db, _file) = temp_db();
        let body = serde_json::json!({"ok": true});
        db.record_idempotent("old-key", &body, ts("2025-03-13T00:00:00Z"))
            .unwrap();
        db.record_idempotent("new-key", &body, ts("2025-03-14T10:00:00Z"))
            .unwrap();

        let removed = db
            .delete_idempotents_before(ts("2025-03-14T00:00:00Z"))
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = db.load_idempotents().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, "new-key");
    }
}
