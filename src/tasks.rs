//! Supervised background tasks (§4.C).
//!
//! Each task is a fallible async unit of work run on a fixed period. Unlike
//! the reference implementation — which only slept after a *successful*
//! iteration and could spin hot on a persistently failing task — every
//! iteration here sleeps for the full period regardless of outcome, and a
//! task never exits: a failure is logged and the loop continues.

use std::future::Future;
use std::time::Duration;

use tracing::error;

/// Spawn `work` as a named, periodically-repeating background task. `work`
/// is called anew on each tick; its future runs to completion before the
/// period's sleep begins (no overlapping invocations of the same task).
pub fn spawn<F, Fut>(name: &'static str, period: Duration, mut work: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    tokio::spawn(async move {
        loop {
            if let Err(err) = work().await {
                error!(task = name, error = ?err, "task iteration failed");
            }
            tokio::time::sleep(period).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_spawn_runs_repeatedly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        spawn("test-task", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2, "task should have ticked more than once");
    }

    #[tokio::test]
    async fn test_spawn_continues_after_failure() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        spawn("failing-task", Duration::from_millis(5), move || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    anyhow::bail!("first iteration fails on purpose");
                }
                Ok(())
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(counter.load(Ordering::SeqCst) >= 2, "a failed iteration must not stop the loop");
    }
}
