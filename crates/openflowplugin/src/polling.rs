//! Periodic statistics gathering with an adaptive delay.
//!
//! After every round the pause before the next one doubles while rounds
//! take longer on average than the current pause, and halves back towards
//! the base interval otherwise.

use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::config::PollingConfig;
use crate::statistics::StatisticsService;

/// Budget of one round before any round has been timed.
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(50);

/// Pause between statistics rounds, adapted to how long rounds take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveDelay {
    base: Duration,
    max: Duration,
    current: Duration,
    total: Duration,
    rounds: u32,
}

impl AdaptiveDelay {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
            total: Duration::ZERO,
            rounds: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Mean duration of the recorded rounds.
    pub fn average(&self) -> Option<Duration> {
        (self.rounds > 0).then(|| self.total / self.rounds)
    }

    /// Time allowed for the next round: three times the mean round, or
    /// [`ROUND_TIMEOUT`] until a round has been timed.
    pub fn round_timeout(&self) -> Duration {
        match self.average() {
            Some(average) if !average.is_zero() => average.saturating_mul(3),
            _ => ROUND_TIMEOUT,
        }
    }

    /// Record one round and return the pause before the next.
    pub fn record(&mut self, elapsed: Duration) -> Duration {
        self.total = self.total.saturating_add(elapsed);
        self.rounds = self.rounds.saturating_add(1);
        let average = self.total / self.rounds;
        self.current = if average > self.current {
            self.current.saturating_mul(2).min(self.max)
        } else {
            (self.current / 2).max(self.base)
        };
        self.current
    }
}

/// Poll `service` until its device goes away.
///
/// The task is aborted by the registry when the device disconnects; the
/// validity check only covers a device that died between two rounds.
pub(crate) async fn poll_device(service: StatisticsService, config: PollingConfig) {
    let node = service.device().device_info().node_id().clone();
    let mut delay = AdaptiveDelay::new(config.base_interval, config.max_interval);
    debug!(%node, interval_ms = delay.current().as_millis() as u64, "statistics polling started");
    loop {
        tokio::time::sleep(delay.current()).await;
        if !service.device().is_valid() {
            debug!(%node, "device no longer valid; statistics polling stopped");
            return;
        }
        let budget = delay.round_timeout();
        let started = Instant::now();
        match tokio::time::timeout(budget, service.gather_dynamic()).await {
            Ok(Ok(fragments)) => trace!(%node, fragments, "statistics round complete"),
            Ok(Err(err)) => warn!(%node, %err, "statistics round failed"),
            Err(_) => info!(
                %node,
                budget_ms = budget.as_millis() as u64,
                "statistics round still in progress; abandoned"
            ),
        }
        let next = delay.record(started.elapsed());
        trace!(%node, next_ms = next.as_millis() as u64, "next statistics round scheduled");
    }
}
