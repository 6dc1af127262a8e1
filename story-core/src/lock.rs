//! Per-session compile lock.
//!
//! Compiling a story is the one expensive, non-idempotent step, so only
//! one request may run it per session at a time. The lock lives on the
//! session document itself and is checked and set inside a single store
//! transaction. A holder that never released (crashed worker, dropped
//! request) stops blocking others once the lock is older than the
//! staleness window.

use crate::clock::Clock;
use crate::store::{DocumentStore, StoreError};
use crate::story::Story;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of trying to take the compile lock.
#[derive(Debug, Clone)]
pub enum LockAttempt {
    /// The caller holds the lock and must release it when done.
    Acquired,
    /// Another request holds a fresh lock.
    InProgress {
        started_at: Option<DateTime<Utc>>,
        request_id: Option<String>,
    },
    /// The session already produced its story.
    AlreadyCompleted(Box<Story>),
}

pub struct CompileLock {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl CompileLock {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check and set the lock for `session_id` in one transaction.
    pub async fn try_acquire(
        &self,
        session_id: &str,
        request_id: &str,
    ) -> Result<LockAttempt, StoreError> {
        let now = self.clock.now();
        let timeout = chrono::Duration::from_std(self.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365));

        // The transaction closure cannot return data, so the verdict is
        // passed out through this slot.
        let verdict: Arc<Mutex<Option<Verdict>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&verdict);
        let request_id_owned = request_id.to_string();

        self.store
            .transact_session(
                session_id,
                Box::new(move |session| {
                    let decision = if session.is_completed() {
                        Verdict::Completed
                    } else if session.compile_in_progress
                        && is_fresh(session.compile_started_at, now, timeout)
                    {
                        Verdict::Held {
                            started_at: session.compile_started_at,
                            request_id: session.compile_request_id.clone(),
                        }
                    } else {
                        if session.compile_in_progress {
                            tracing::warn!(
                                session_id = %session.id,
                                stale_request =
                                    session.compile_request_id.as_deref().unwrap_or("-"),
                                "Taking over stale compile lock"
                            );
                        }
                        session.compile_in_progress = true;
                        session.compile_started_at = Some(now);
                        session.compile_request_id = Some(request_id_owned);
                        Verdict::Taken
                    };
                    let commit = matches!(decision, Verdict::Taken);
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(decision);
                    }
                    commit
                }),
            )
            .await?;

        let decision = verdict.lock().ok().and_then(|mut guard| guard.take());
        match decision {
            Some(Verdict::Taken) => {
                tracing::debug!(session_id, request_id, "Compile lock acquired");
                Ok(LockAttempt::Acquired)
            }
            Some(Verdict::Held {
                started_at,
                request_id: holder,
            }) => {
                tracing::info!(
                    session_id,
                    request_id,
                    holder = holder.as_deref().unwrap_or("-"),
                    "Compile already in progress"
                );
                Ok(LockAttempt::InProgress {
                    started_at,
                    request_id: holder,
                })
            }
            Some(Verdict::Completed) => match self.store.get_story(session_id).await? {
                Some(story) => Ok(LockAttempt::AlreadyCompleted(Box::new(story))),
                None => Err(StoreError::not_found("stories", session_id)),
            },
            None => Err(StoreError::not_found("sessions", session_id)),
        }
    }

    /// Clear the lock if `request_id` still holds it. A failed compile
    /// records its error either way.
    ///
    /// Returns `false` when another request took the lock over in the
    /// meantime; that holder's lock is left in place.
    pub async fn release(
        &self,
        session_id: &str,
        request_id: &str,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let error = error.map(str::to_string);
        let released: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&released);
        let request_id_owned = request_id.to_string();

        self.store
            .transact_session(
                session_id,
                Box::new(move |session| {
                    let holds =
                        session.compile_request_id.as_deref() == Some(request_id_owned.as_str());
                    if holds {
                        session.compile_in_progress = false;
                        session.compile_started_at = None;
                    } else {
                        tracing::warn!(
                            session_id = %session.id,
                            request_id = %request_id_owned,
                            holder = session.compile_request_id.as_deref().unwrap_or("-"),
                            "Compile lock was taken over, leaving it in place"
                        );
                    }
                    let changed = holds || error.is_some();
                    if error.is_some() {
                        session.last_error = error;
                    }
                    if let Ok(mut guard) = slot.lock() {
                        *guard = Some(holds);
                    }
                    changed
                }),
            )
            .await?;

        let released = released.lock().ok().and_then(|mut guard| guard.take()).unwrap_or(false);
        if released {
            tracing::debug!(session_id, request_id, "Compile lock released");
        }
        Ok(released)
    }
}

enum Verdict {
    Taken,
    Held {
        started_at: Option<DateTime<Utc>>,
        request_id: Option<String>,
    },
    Completed,
}

/// A lock with no start time is treated as stale. A start time in the
/// future (clock skew between workers) counts as fresh.
fn is_fresh(
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timeout: chrono::Duration,
) -> bool {
    match started_at {
        Some(started) => now.signed_duration_since(started) < timeout,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionStatus};
    use crate::store::MemoryStore;
    use crate::testing::ManualClock;

    async fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, CompileLock) {
        let store = Arc::new(MemoryStore::new());
        store.put_session(Session::new("s1", "child-1")).await.unwrap();
        let clock = Arc::new(ManualClock::new());
        let lock = CompileLock::new(store.clone(), clock.clone(), Duration::from_secs(120));
        (store, clock, lock)
    }

    #[test]
    fn test_freshness() {
        let now = Utc::now();
        let window = chrono::Duration::seconds(120);
        assert!(is_fresh(Some(now - chrono::Duration::seconds(119)), now, window));
        assert!(!is_fresh(Some(now - chrono::Duration::seconds(120)), now, window));
        assert!(is_fresh(Some(now + chrono::Duration::seconds(30)), now, window));
        assert!(!is_fresh(None, now, window));
    }

    #[tokio::test]
    async fn test_second_acquire_within_window_is_refused() {
        let (store, clock, lock) = setup().await;

        assert!(matches!(lock.try_acquire("s1", "req-1").await.unwrap(), LockAttempt::Acquired));
        clock.advance(Duration::from_secs(60));

        match lock.try_acquire("s1", "req-2").await.unwrap() {
            LockAttempt::InProgress { request_id, .. } => {
                assert_eq!(request_id.as_deref(), Some("req-1"))
            }
            other => panic!("expected InProgress, got {other:?}"),
        }

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.compile_request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let (store, clock, lock) = setup().await;

        lock.try_acquire("s1", "req-1").await.unwrap();
        clock.advance(Duration::from_secs(121));

        assert!(matches!(lock.try_acquire("s1", "req-2").await.unwrap(), LockAttempt::Acquired));
        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.compile_request_id.as_deref(), Some("req-2"));
        assert_eq!(session.compile_started_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn test_release_records_error() {
        let (store, _clock, lock) = setup().await;

        lock.try_acquire("s1", "req-1").await.unwrap();
        assert!(lock.release("s1", "req-1", Some("model exploded")).await.unwrap());

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert!(!session.compile_in_progress);
        assert_eq!(session.last_error.as_deref(), Some("model exploded"));
        assert!(matches!(lock.try_acquire("s1", "req-2").await.unwrap(), LockAttempt::Acquired));
    }

    #[tokio::test]
    async fn test_old_holder_cannot_release_taken_over_lock() {
        let (store, clock, lock) = setup().await;

        lock.try_acquire("s1", "req-1").await.unwrap();
        clock.advance(Duration::from_secs(121));
        assert!(matches!(lock.try_acquire("s1", "req-2").await.unwrap(), LockAttempt::Acquired));

        // The slow first request finishes and fails after the takeover.
        let released = lock.release("s1", "req-1", Some("late failure")).await.unwrap();
        assert!(!released);

        let session = store.get_session("s1").await.unwrap().unwrap();
        assert!(session.compile_in_progress);
        assert_eq!(session.compile_request_id.as_deref(), Some("req-2"));
        assert_eq!(session.last_error.as_deref(), Some("late failure"));

        clock.advance(Duration::from_secs(5));
        match lock.try_acquire("s1", "req-3").await.unwrap() {
            LockAttempt::InProgress { request_id, .. } => {
                assert_eq!(request_id.as_deref(), Some("req-2"))
            }
            other => panic!("expected InProgress, got {other:?}"),
        }

        assert!(lock.release("s1", "req-2", None).await.unwrap());
        assert!(!store.get_session("s1").await.unwrap().unwrap().compile_in_progress);
    }

    #[tokio::test]
    async fn test_completed_without_story_is_an_error() {
        let (store, _clock, lock) = setup().await;
        store
            .transact_session(
                "s1",
                Box::new(|session| {
                    session.status = SessionStatus::Completed;
                    true
                }),
            )
            .await
            .unwrap();

        let err = lock.try_acquire("s1", "req-1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { collection: "stories", .. }));
    }

    #[tokio::test]
    async fn test_missing_session() {
        let (_store, _clock, lock) = setup().await;
        assert!(lock.try_acquire("nope", "req-1").await.is_err());
    }
}
