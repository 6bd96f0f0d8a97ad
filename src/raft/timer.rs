use std::time::Duration;

use tokio::time::Instant;

/// A cancellable one-shot timer on the tokio monotonic clock.
///
/// The timer itself is just a deadline; the node's event loop selects on
/// [`expired`] for whichever timers its current role arms. That keeps all
/// timer effects inside the single state-owning task, and under
/// `tokio::time::pause` the whole thing is deterministic in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms (or re-arms) the timer to fire `after` from now.
    pub fn set(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Disarms the timer. Idempotent.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline; zero when disarmed or already past.
    pub fn remaining(&self) -> Duration {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Completes at `deadline`, or never when `None`. Select-arm helper.
pub async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
