//! Timeout enforcement.
//!
//! # Responsibilities
//! - Run an operation on its own task so the caller's wait can be bounded
//! - Abort the task once the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - An abandoned task is aborted and its output dropped, so a socket that
//!   shows up late is closed instead of leaking
//! - Dropping the caller's future aborts the task as well

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Outcome of [`spawn_bounded`].
#[derive(Debug)]
pub enum Bounded<T> {
    /// The task finished in time.
    Completed(T),
    /// The deadline passed first; the task was aborted.
    TimedOut,
    /// The task panicked or was aborted from elsewhere.
    Cancelled,
}

impl<T> Bounded<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Bounded::TimedOut)
    }
}

/// Aborts the task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run `task` on a background task and wait at most `limit` for it.
///
/// `None` waits without a bound.
pub async fn spawn_bounded<F>(limit: Option<Duration>, task: F) -> Bounded<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut handle = AbortOnDrop(tokio::spawn(task));
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut handle.0).await {
            Ok(joined) => joined,
            Err(_) => return Bounded::TimedOut,
        },
        None => (&mut handle.0).await,
    };
    match joined {
        Ok(output) => Bounded::Completed(output),
        Err(e) => {
            if e.is_panic() {
                tracing::error!(error = %e, "Bounded task panicked");
            }
            Bounded::Cancelled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn completes_within_limit() {
        let result = spawn_bounded(Some(Duration::from_millis(100)), async { 7 }).await;
        assert!(matches!(result, Bounded::Completed(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_drops_late_output() {
        struct Flag(Arc<AtomicBool>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let flag = Flag(dropped.clone());
        let started = tokio::time::Instant::now();
        let result = spawn_bounded(Some(Duration::from_millis(50)), async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            flag
        })
        .await;

        assert!(result.is_timed_out());
        assert_eq!(started.elapsed(), Duration::from_millis(50));
        tokio::task::yield_now().await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panics_are_reported_as_cancelled() {
        let result = spawn_bounded(None, async {
            panic!("boom");
        })
        .await;
        assert!(matches!(result, Bounded::<()>::Cancelled));
    }
}
