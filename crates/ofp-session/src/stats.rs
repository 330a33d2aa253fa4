//! Message counters, event timing and session statistics.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ofp_wire::MessageType;

/// Stage of a message's life at which it is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum StatisticsGroup {
    /// Message received from the switch.
    FromSwitch,
    /// Outbound request entered the session layer.
    ToSwitchEntered,
    /// Outbound request refused by the request quota.
    ToSwitchReservationRejected,
    /// Outbound request registered and about to be written.
    ToSwitchReadyForSubmit,
    ToSwitchSubmitSuccess,
    ToSwitchSubmitFailure,
}

impl StatisticsGroup {
    pub fn name(self) -> &'static str {
        match self {
            StatisticsGroup::FromSwitch => "FROM_SWITCH",
            StatisticsGroup::ToSwitchEntered => "TO_SWITCH_ENTERED",
            StatisticsGroup::ToSwitchReservationRejected => "TO_SWITCH_RESERVATION_REJECTED",
            StatisticsGroup::ToSwitchReadyForSubmit => "TO_SWITCH_READY_FOR_SUBMIT",
            StatisticsGroup::ToSwitchSubmitSuccess => "TO_SWITCH_SUBMIT_SUCCESS",
            StatisticsGroup::ToSwitchSubmitFailure => "TO_SWITCH_SUBMIT_FAILURE",
        }
    }
}

impl fmt::Display for StatisticsGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One counter of [`MessageIntelligenceAgency`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MessageCounter {
    pub group: StatisticsGroup,
    pub message: &'static str,
    pub count: u64,
}

/// Counts messages per (statistics group, message kind).
#[derive(Debug, Default)]
pub struct MessageIntelligenceAgency {
    counters: DashMap<(StatisticsGroup, &'static str), AtomicU64>,
}

impl MessageIntelligenceAgency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spy_message(&self, group: StatisticsGroup, kind: MessageType) {
        self.spy_named(group, kind.name());
    }

    pub fn spy_named(&self, group: StatisticsGroup, message: &'static str) {
        self.counters
            .entry((group, message))
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, group: StatisticsGroup, kind: MessageType) -> u64 {
        self.counters
            .get(&(group, kind.name()))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Every non-zero counter, ordered by group then message name.
    pub fn snapshot(&self) -> Vec<MessageCounter> {
        let mut counters: Vec<MessageCounter> = self
            .counters
            .iter()
            .map(|entry| MessageCounter {
                group: entry.key().0,
                message: entry.key().1,
                count: entry.value().load(Ordering::Relaxed),
            })
            .filter(|c| c.count > 0)
            .collect();
        counters.sort_by(|a, b| (a.group, a.message).cmp(&(b.group, b.message)));
        counters
    }

    pub fn reset(&self) {
        self.counters.clear();
    }
}

/// Timing summary of one named event.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EventTimes {
    pub event: String,
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Copy)]
struct EventTimeState {
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

/// Measures durations of named session events (handshake, echo round trip).
#[derive(Debug, Default)]
pub struct EventsTimeCounter {
    events: Mutex<HashMap<String, EventTimeState>>,
}

/// Running measurement returned by [`EventsTimeCounter::start`].
#[derive(Debug, Clone, Copy)]
pub struct EventTimer {
    started: Instant,
}

impl EventTimer {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl EventsTimeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> EventTimer {
        EventTimer {
            started: Instant::now(),
        }
    }

    /// Record the time elapsed since `timer` was started.
    pub fn finish(&self, event: &str, timer: EventTimer) {
        self.record(event, timer.elapsed());
    }

    pub fn record(&self, event: &str, elapsed: Duration) {
        let mut events = self.events.lock().expect("events mutex poisoned");
        match events.get_mut(event) {
            Some(state) => {
                state.count += 1;
                state.total += elapsed;
                state.min = state.min.min(elapsed);
                state.max = state.max.max(elapsed);
            }
            None => {
                events.insert(
                    event.to_owned(),
                    EventTimeState {
                        count: 1,
                        total: elapsed,
                        min: elapsed,
                        max: elapsed,
                    },
                );
            }
        }
    }

    pub fn snapshot(&self) -> Vec<EventTimes> {
        let events = self.events.lock().expect("events mutex poisoned");
        let mut times: Vec<EventTimes> = events
            .iter()
            .map(|(event, state)| EventTimes {
                event: event.clone(),
                count: state.count,
                avg_ms: state.total.as_secs_f64() * 1_000.0 / state.count as f64,
                min_ms: state.min.as_secs_f64() * 1_000.0,
                max_ms: state.max.as_secs_f64() * 1_000.0,
            })
            .collect();
        times.sort_by(|a, b| a.event.cmp(&b.event));
        times
    }

    pub fn reset(&self) {
        self.events.lock().expect("events mutex poisoned").clear();
    }
}

/// Immutable view of [`SessionStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SessionCounters {
    pub connections_accepted: u64,
    pub handshakes_completed: u64,
    pub handshake_failures: u64,
    pub duplicate_connections: u64,
    pub disconnects: u64,
    pub echo_timeouts: u64,
    pub correlation_misses: u64,
    pub quota_rejections: u64,
    pub malformed_frames: u64,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub elapsed: Duration,
}

/// Connection lifecycle counters.
#[derive(Debug)]
pub struct SessionStats {
    connections_accepted: AtomicU64,
    handshakes_completed: AtomicU64,
    handshake_failures: AtomicU64,
    duplicate_connections: AtomicU64,
    disconnects: AtomicU64,
    echo_timeouts: AtomicU64,
    correlation_misses: AtomicU64,
    quota_rejections: AtomicU64,
    malformed_frames: AtomicU64,
    start: Instant,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            handshakes_completed: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
            duplicate_connections: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            echo_timeouts: AtomicU64::new(0),
            correlation_misses: AtomicU64::new(0),
            quota_rejections: AtomicU64::new(0),
            malformed_frames: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    pub fn record_connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_handshake_failure(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection refused because its device slot was taken.
    pub fn record_duplicate_connection(&self) {
        self.duplicate_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_echo_timeout(&self) {
        self.echo_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reply whose xid matched no pending request.
    pub fn record_correlation_miss(&self) {
        self.correlation_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quota_rejection(&self) {
        self.quota_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionCounters {
        SessionCounters {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshake_failures: self.handshake_failures.load(Ordering::Relaxed),
            duplicate_connections: self.duplicate_connections.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            echo_timeouts: self.echo_timeouts.load(Ordering::Relaxed),
            correlation_misses: self.correlation_misses.load(Ordering::Relaxed),
            quota_rejections: self.quota_rejections.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            elapsed: self.start.elapsed(),
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Full instrumentation snapshot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct InstrumentationSnapshot {
    pub session: SessionCounters,
    pub messages: Vec<MessageCounter>,
    pub events: Vec<EventTimes>,
}

/// Instrumentation shared by every connection of a controller.
#[derive(Debug, Default)]
pub struct Instrumentation {
    pub messages: MessageIntelligenceAgency,
    pub events: EventsTimeCounter,
    pub session: SessionStats,
}

impl Instrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> InstrumentationSnapshot {
        InstrumentationSnapshot {
            session: self.session.snapshot(),
            messages: self.messages.snapshot(),
            events: self.events.snapshot(),
        }
    }

    /// Clear message counters and event timings. Session counters keep running.
    pub fn reset(&self) {
        self.messages.reset();
        self.events.reset();
    }
}

/// Event name for handshake durations.
pub const EVENT_HANDSHAKE: &str = "handshake";
/// Event name for echo keepalive round trips.
pub const EVENT_ECHO_ROUND_TRIP: &str = "echo_round_trip";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_group_and_kind() {
        let mia = MessageIntelligenceAgency::new();
        mia.spy_message(StatisticsGroup::FromSwitch, MessageType::EchoReply);
        mia.spy_message(StatisticsGroup::FromSwitch, MessageType::EchoReply);
        mia.spy_message(StatisticsGroup::ToSwitchEntered, MessageType::EchoRequest);
        assert_eq!(
            mia.count(StatisticsGroup::FromSwitch, MessageType::EchoReply),
            2
        );
        let snapshot = mia.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].group, StatisticsGroup::FromSwitch);
        mia.reset();
        assert!(mia.snapshot().is_empty());
    }

    #[test]
    fn event_times_track_min_max() {
        let events = EventsTimeCounter::new();
        events.record(EVENT_HANDSHAKE, Duration::from_millis(10));
        events.record(EVENT_HANDSHAKE, Duration::from_millis(30));
        let snapshot = events.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].count, 2);
        assert!((snapshot[0].avg_ms - 20.0).abs() < 1e-6);
        assert!((snapshot[0].min_ms - 10.0).abs() < 1e-6);
        assert!((snapshot[0].max_ms - 30.0).abs() < 1e-6);
    }

    #[test]
    fn session_counters_snapshot() {
        let stats = SessionStats::new();
        stats.record_echo_timeout();
        stats.record_correlation_miss();
        stats.record_correlation_miss();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.echo_timeouts, 1);
        assert_eq!(snapshot.correlation_misses, 2);
        assert_eq!(snapshot.disconnects, 0);
    }
}
