//! Double-Entry Ledger for AeonPay
//!
//! Every movement of value in the system lands here as a balanced set of
//! postings against structured account names. Redemptions and executions
//! post here; so do corrections.
//!
//! # Design Principles
//!
//! 1. **Immutability**: postings are append-only. No updates, no deletions.
//! 2. **Balance**: every batch must satisfy sum(debits) == sum(credits).
//! 3. **Atomicity**: a batch is appended whole or rejected whole.
//! 4. **Corrections are reversals**: mistakes get a new leg-swapped batch
//!    linked to the original transaction, never an edit.
//!
//! # Invariants
//!
//! 1. Every stored batch balances for all time.
//! 2. Amounts are strictly positive; the leg carries direction.
//! 3. One original batch per transaction id; at most one reversal.
//! 4. All legs of one batch share one timestamp.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::clock::day_bounds;
use crate::error::{CoreError, CoreResult};

// ============================================================================
// LEG / ENTRY TYPES
// ============================================================================

/// Which side of the book a posting hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerLeg {
    Debit,
    Credit,
}

impl LedgerLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerLeg::Debit => "debit",
            LedgerLeg::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(LedgerLeg::Debit),
            "credit" => Some(LedgerLeg::Credit),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            LedgerLeg::Debit => LedgerLeg::Credit,
            LedgerLeg::Credit => LedgerLeg::Debit,
        }
    }
}

/// One leg of a posting batch, as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingLeg {
    pub account: String,
    pub leg: LedgerLeg,
    pub amount: Decimal,
}

impl PostingLeg {
    pub fn debit(account: impl Into<String>, amount: Decimal) -> Self {
        PostingLeg {
            account: account.into(),
            leg: LedgerLeg::Debit,
            amount,
        }
    }

    pub fn credit(account: impl Into<String>, amount: Decimal) -> Self {
        PostingLeg {
            account: account.into(),
            leg: LedgerLeg::Credit,
            amount,
        }
    }
}

/// A stored ledger row. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: u64,
    pub transaction_id: String,
    pub account: String,
    pub leg: LedgerLeg,
    pub amount: Decimal,
    pub posted_at: DateTime<Utc>,
    /// True when this row belongs to a correction batch.
    #[serde(default)]
    pub reversal: bool,
}

impl LedgerEntry {
    /// Signed contribution to a net (credit minus debit) balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.leg {
            LedgerLeg::Credit => self.amount,
            LedgerLeg::Debit => -self.amount,
        }
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Bespoke counters surfaced on the admin endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    pub entries_appended: u64,
    pub batches_posted: u64,
    pub batches_rejected: u64,
    pub reversals_posted: u64,
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Default)]
struct LedgerInner {
    entries: Vec<LedgerEntry>,
    next_entry_id: u64,
    posted_txns: HashSet<String>,
    reversed_txns: HashSet<String>,
    stats: LedgerStats,
}

/// The append-only double-entry book. One mutex guards validation plus the
/// whole batch append, so a batch lands atomically or not at all.
pub struct Ledger {
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    pub fn new() -> Self {
        Ledger {
            inner: Mutex::new(LedgerInner {
                next_entry_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Rebuilds a ledger from mirrored rows at boot. Rows must already be
    /// in append order.
    pub fn hydrate(rows: Vec<LedgerEntry>) -> Self {
        let mut posted_txns = HashSet::new();
        let mut reversed_txns = HashSet::new();
        let mut stats = LedgerStats::default();
        let next_entry_id = rows.iter().map(|r| r.entry_id).max().unwrap_or(0) + 1;

        for row in &rows {
            stats.entries_appended += 1;
            if row.reversal {
                reversed_txns.insert(row.transaction_id.clone());
            } else {
                posted_txns.insert(row.transaction_id.clone());
            }
        }
        stats.batches_posted = posted_txns.len() as u64;
        stats.reversals_posted = reversed_txns.len() as u64;

        Ledger {
            inner: Mutex::new(LedgerInner {
                entries: rows,
                next_entry_id,
                posted_txns,
                reversed_txns,
                stats,
            }),
        }
    }

    /// Appends a balanced batch of legs for one transaction. Returns the
    /// stored rows (callers mirror them to the database).
    pub fn post(
        &self,
        transaction_id: &str,
        legs: Vec<PostingLeg>,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<LedgerEntry>> {
        let mut inner = self.inner.lock();

        if let Err(e) = validate_batch(&legs) {
            inner.stats.batches_rejected += 1;
            return Err(e);
        }
        if inner.posted_txns.contains(transaction_id) {
            inner.stats.batches_rejected += 1;
            return Err(CoreError::LedgerRejected(format!(
                "transaction {transaction_id} already posted"
            )));
        }

        let rows = append_batch(&mut inner, transaction_id, &legs, now, false);
        inner.posted_txns.insert(transaction_id.to_string());
        inner.stats.batches_posted += 1;
        Ok(rows)
    }

    /// Posts the leg-swapped correction batch for a transaction.
    pub fn reverse(
        &self,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Vec<LedgerEntry>> {
        let mut inner = self.inner.lock();

        if !inner.posted_txns.contains(transaction_id) {
            inner.stats.batches_rejected += 1;
            return Err(CoreError::LedgerRejected(format!(
                "transaction {transaction_id} has no postings to reverse"
            )));
        }
        if inner.reversed_txns.contains(transaction_id) {
            inner.stats.batches_rejected += 1;
            return Err(CoreError::LedgerRejected(format!(
                "transaction {transaction_id} already reversed"
            )));
        }

        let swapped: Vec<PostingLeg> = inner
            .entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id && !e.reversal)
            .map(|e| PostingLeg {
                account: e.account.clone(),
                leg: e.leg.opposite(),
                amount: e.amount,
            })
            .collect();

        let rows = append_batch(&mut inner, transaction_id, &swapped, now, true);
        inner.reversed_txns.insert(transaction_id.to_string());
        inner.stats.reversals_posted += 1;
        Ok(rows)
    }

    pub fn entries_for_transaction(&self, transaction_id: &str) -> Vec<LedgerEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect()
    }

    /// Net balance (credits minus debits) for an account over a half-open
    /// window [start, end).
    pub fn sum_account_range(
        &self,
        account: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Decimal {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.account == account && e.posted_at >= start && e.posted_at < end)
            .map(|e| e.signed_amount())
            .sum()
    }

    /// Point-in-time copy of one day's rows. Recon works on this so the
    /// book never blocks on report computation.
    pub fn day_snapshot(&self, day: NaiveDate) -> Vec<LedgerEntry> {
        let (start, end) = day_bounds(day);
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.posted_at >= start && e.posted_at < end)
            .cloned()
            .collect()
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn stats(&self) -> LedgerStats {
        self.inner.lock().stats.clone()
    }

    /// Verifies the standing invariant: total debits equal total credits
    /// across the whole book.
    pub fn verify_balanced(&self) -> bool {
        let total: Decimal = self.inner.lock().entries.iter().map(|e| e.signed_amount()).sum();
        total == Decimal::ZERO
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_batch(legs: &[PostingLeg]) -> CoreResult<()> {
    if legs.len() < 2 {
        return Err(CoreError::LedgerRejected(format!(
            "batch needs at least two legs, got {}",
            legs.len()
        )));
    }
    for leg in legs {
        if leg.amount <= Decimal::ZERO {
            return Err(CoreError::LedgerRejected(format!(
                "non-positive amount {} on account {}",
                leg.amount, leg.account
            )));
        }
        if leg.account.is_empty() {
            return Err(CoreError::LedgerRejected("empty account name".to_string()));
        }
    }

    let debits: Decimal = legs
        .iter()
        .filter(|l| l.leg == LedgerLeg::Debit)
        .map(|l| l.amount)
        .sum();
    let credits: Decimal = legs
        .iter()
        .filter(|l| l.leg == LedgerLeg::Credit)
        .map(|l| l.amount)
        .sum();
    if debits != credits {
        return Err(CoreError::LedgerRejected(format!(
            "unbalanced batch: debits {debits} != credits {credits}"
        )));
    }
    Ok(())
}

fn append_batch(
    inner: &mut LedgerInner,
    transaction_id: &str,
    legs: &[PostingLeg],
    now: DateTime<Utc>,
    reversal: bool,
) -> Vec<LedgerEntry> {
    let mut rows = Vec::with_capacity(legs.len());
    for leg in legs {
        let row = LedgerEntry {
            entry_id: inner.next_entry_id,
            transaction_id: transaction_id.to_string(),
            account: leg.account.clone(),
            leg: leg.leg,
            amount: leg.amount,
            posted_at: now,
            reversal,
        };
        inner.next_entry_id += 1;
        inner.stats.entries_appended += 1;
        inner.entries.push(row.clone());
        rows.push(row);
    }
    rows
}

// ============================================================================
// TESTS
// ============================================================================
