//! Minimum-interval gate for rate-limited external services

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum spacing between successive calls.
///
/// Callers wait their turn instead of bursting; the tokio mutex is fair, so
/// concurrent waiters are released in arrival order.
#[derive(Debug)]
pub struct MinIntervalGate {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl MinIntervalGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until at least `min_interval` has passed since the previous call was let through
    pub async fn wait(&self) {
        let mut last = self.last.lock().await;

        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                debug!("Rate gate holding call for {:?}", ready_at - Instant::now());
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_call_passes_immediately() {
        let gate = MinIntervalGate::new(Duration::from_secs(5));
        let started = Instant::now();
        gate.wait().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_successive_calls_are_spaced() {
        let gate = MinIntervalGate::new(Duration::from_millis(40));
        let started = Instant::now();
        for _ in 0..3 {
            gate.wait().await;
        }
        // Two enforced gaps after the first call
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let gate = Arc::new(MinIntervalGate::new(Duration::from_millis(30)));
        let started = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.wait().await;
                Instant::now()
            }));
        }

        let mut passed = Vec::new();
        for handle in handles {
            passed.push(handle.await.unwrap());
        }
        passed.sort();

        for pair in passed.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(30));
        }
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
