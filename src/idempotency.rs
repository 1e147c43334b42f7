//! Idempotency gate for mutating API calls.
//!
//! Callers pass the `Idempotency-Key` header value; the first successful
//! execution under a key stores its serialized response, and every later
//! call with the same key replays that stored body without re-running the
//! operation. Concurrent duplicates serialize on a per-key lock, so under
//! races the operation still runs at most once. Failed attempts store
//! nothing; a retry after a failure executes again.
//!
//! Entries are kept for a configurable retention window and garbage
//! collected by a background sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::future::Future;
use tokio::sync::Mutex as AsyncMutex;

use crate::clock::Clock;
use crate::db::Db;

struct Stored {
    body: Value,
    created_at: DateTime<Utc>,
}

/// What the gate handed back: the response body, and whether it came from
/// the store instead of a fresh execution.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub body: Value,
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct GateStats {
    pub entries: usize,
    pub replays: u64,
}

pub struct IdempotencyGate {
    stored: RwLock<HashMap<String, Stored>>,
    // Per-key locks live until the sweep reaps them; keeping them around
    // past completion is what lets late duplicates serialize correctly.
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    clock: Clock,
    db: Option<Arc<Db>>,
    replays: AtomicU64,
}

impl IdempotencyGate {
    pub fn new(clock: Clock, db: Option<Arc<Db>>) -> Self {
        Self {
            stored: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            clock,
            db,
            replays: AtomicU64::new(0),
        }
    }

    pub fn hydrate(&self, rows: Vec<(String, Value, DateTime<Utc>)>) {
        let mut stored = self.stored.write();
        for (key, body, created_at) in rows {
            stored.insert(key, Stored { body, created_at });
        }
    }

    /// Runs `op` under `key`. Without a key the operation always executes.
    pub async fn execute<E, F, Fut>(&self, key: Option<String>, op: F) -> Result<GateOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let Some(key) = key else {
            let body = op().await?;
            return Ok(GateOutcome {
                body,
                replayed: false,
            });
        };

        if let Some(body) = self.stored_body(&key) {
            self.replays.fetch_add(1, Ordering::Relaxed);
            return Ok(GateOutcome {
                body,
                replayed: true,
            });
        }

        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(key.clone()).or_default().clone()
        };
        let _guard = lock.lock().await;

        // A duplicate that lost the race replays what the winner stored.
        if let Some(body) = self.stored_body(&key) {
            self.replays.fetch_add(1, Ordering::Relaxed);
            return Ok(GateOutcome {
                body,
                replayed: true,
            });
        }

        let body = op().await?;
        let now = self.clock.now();
        self.stored.write().insert(
            key.clone(),
            Stored {
                body: body.clone(),
                created_at: now,
            },
        );
        if let Some(db) = &self.db {
            let _ = db.record_idempotent(&key, &body, now);
        }
        Ok(GateOutcome {
            body,
            replayed: false,
        })
    }

    fn stored_body(&self, key: &str) -> Option<Value> {
        self.stored.read().get(key).map(|s| s.body.clone())
    }

    /// Drops entries older than `retention`, plus the idle per-key locks
    /// that no longer guard anything. Returns how many entries went.
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let cutoff = self.clock.now() - retention;

        let removed = {
            let mut stored = self.stored.write();
            let before = stored.len();
            stored.retain(|_, s| s.created_at >= cutoff);
            let removed = before - stored.len();

            let mut locks = self.locks.lock();
            locks.retain(|key, lock| stored.contains_key(key) || Arc::strong_count(lock) > 1);
            removed
        };

        if removed > 0 {
            if let Some(db) = &self.db {
                let _ = db.delete_idempotents_before(cutoff);
            }
            tracing::info!(removed, "🧹 idempotency sweep");
        }
        removed
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            entries: self.stored.read().len(),
            replays: self.replays.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn gate() -> IdempotencyGate {
        IdempotencyGate::new(Clock::fixed(ts("2025-03-14T10:00:00Z")), None)
    }

    #[tokio::test]
    async fn second_call_replays_without_executing() {
        let gate = gate();
        let runs = AtomicUsize::new(0);

        let first = gate
            .execute::<CoreError, _, _>(Some("k1".into()), || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"minted": 3}))
            })
            .await
            .unwrap();
        assert!(!first.replayed);

        let second = gate
            .execute::<CoreError, _, _>(Some("k1".into()), || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"minted": 99}))
            })
            .await
            .unwrap();

        assert!(second.replayed);
        assert_eq!(second.body, first.body);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(gate.stats().replays, 1);
    }

    #[tokio::test]
    async fn missing_key_always_executes() {
        let gate = gate();
        let runs = AtomicUsize::new(0);

        for _ in 0..3 {
            let out = gate
                .execute::<CoreError, _, _>(None, || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"ok": true}))
                })
                .await
                .unwrap();
            assert!(!out.replayed);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failure_is_not_stored_and_retry_runs() {
        let gate = gate();
        let runs = AtomicUsize::new(0);

        let err = gate
            .execute::<CoreError, _, _>(Some("k1".into()), || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::validation("amount must be positive"))
            })
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::validation("amount must be positive"));

        let retry = gate
            .execute::<CoreError, _, _>(Some("k1".into()), || async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"ok": true}))
            })
            .await
            .unwrap();

        assert!(!retry.replayed);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicates_execute_once() {
        let gate = Arc::new(gate());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                gate.execute::<CoreError, _, _>(Some("shared".into()), || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    Ok(json!({"winner": true}))
                })
                .await
                .unwrap()
            }));
        }

        let mut replayed = 0;
        for handle in handles {
            let out = handle.await.unwrap();
            assert_eq!(out.body, json!({"winner": true}));
            if out.replayed {
                replayed += 1;
            }
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(replayed, 7);
    }

    #[tokio::test]
    async fn sweep_drops_entries_past_retention() {
        let clock = Clock::fixed(ts("2025-03-14T10:00:00Z"));
        let gate = IdempotencyGate::new(clock.clone(), None);

        gate.execute::<CoreError, _, _>(Some("old".into()), || async { Ok(json!(1)) })
            .await
            .unwrap();

        clock.advance(Duration::hours(25));
        gate.execute::<CoreError, _, _>(Some("fresh".into()), || async { Ok(json!(2)) })
            .await
            .unwrap();

        let removed = gate.sweep_expired(Duration::hours(24));
        assert_eq!(removed, 1);
        assert_eq!(gate.stats().entries, 1);

        // The fresh key still replays; the swept key re-executes.
        let fresh = gate
            .execute::<CoreError, _, _>(Some("fresh".into()), || async { Ok(json!(99)) })
            .await
            .unwrap();
        assert!(fresh.replayed);
        assert_eq!(fresh.body, json!(2));

        let old = gate
            .execute::<CoreError, _, _>(Some("old".into()), || async { Ok(json!(99)) })
            .await
            .unwrap();
        assert!(!old.replayed);
    }
}
