//! Reading session state machine.
//!
//! ```text
//!            start (guard ok)             countdown reaches 0
//!   IDLE ───────────────────▶ COUNTDOWN(n) ──────────────────▶ ACTIVE
//!     ▲                           │                               │
//!     └──────── stop (no command) ┘                               │
//!     └──────────────────── stop / teardown (stop command) ───────┘
//! ```
//!
//! The orchestrator never touches a clock or a backend. Callers pass `now`
//! in, fire the single pending timer when its deadline passes, and execute
//! the returned [`Directive`]s. At most one timer is pending at any time, so
//! a countdown can never be driven twice.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::connection::ConnectionState;

/// Countdown cadence.
pub const TICK_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingState {
    Idle,
    Countdown { remaining: u32 },
    Active,
}

/// What a start is checked against: the resolved device and its liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartGuard<'a> {
    pub device_id: Option<&'a str>,
    pub connection: ConnectionState,
}

impl<'a> StartGuard<'a> {
    pub fn check(&self) -> Result<&'a str, StartRejection> {
        let device_id = self.device_id.ok_or(StartRejection::NoDevice)?;
        if !self.connection.permits_start() {
            return Err(StartRejection::DeviceOffline);
        }
        Ok(device_id)
    }

    pub fn permits_start(&self) -> bool {
        self.check().is_ok()
    }
}

/// Why a start was refused. Shown as a disabled action, not raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartRejection {
    #[error("no device is available for this driver")]
    NoDevice,
    #[error("the device is offline")]
    DeviceOffline,
    #[error("the view has been closed")]
    ViewClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartOutcome {
    CountdownStarted { secs: u32 },
    AlreadyCountingDown,
    AlreadyActive,
}

/// Command the caller must send to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Start { device_id: String },
    Stop { device_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerKind {
    AutoStart,
    CountdownTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTimer {
    pub kind: TimerKind,
    pub due_at_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutoStart {
    /// Not yet fired; waiting for the guard to pass.
    Waiting,
    Armed,
    /// Fired, or pre-empted by a manual start or stop.
    Consumed,
}

#[derive(Debug, Clone)]
pub struct ReadingOrchestrator {
    countdown_secs: u32,
    auto_start_delay_ms: i64,
    state: ReadingState,
    auto_start: AutoStart,
    timer: Option<PendingTimer>,
    active_device: Option<String>,
    torn_down: bool,
}

impl ReadingOrchestrator {
    pub fn new(countdown_secs: u32, auto_start_delay_ms: u64) -> Self {
        Self {
            countdown_secs: countdown_secs.max(1),
            auto_start_delay_ms: i64::try_from(auto_start_delay_ms).unwrap_or(i64::MAX),
            state: ReadingState::Idle,
            auto_start: AutoStart::Waiting,
            timer: None,
            active_device: None,
            torn_down: false,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.countdown_secs, config.auto_start_delay_ms)
    }

    pub fn state(&self) -> ReadingState {
        self.state
    }

    pub fn pending_timer(&self) -> Option<PendingTimer> {
        self.timer
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.timer.map(|timer| timer.due_at_ms)
    }

    /// Device the last start command went to, while `ACTIVE`.
    pub fn active_device(&self) -> Option<&str> {
        self.active_device.as_deref()
    }

    pub fn auto_start_consumed(&self) -> bool {
        self.auto_start == AutoStart::Consumed
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Re-evaluates the automatic start against the current guard.
    ///
    /// Arms the one-shot timer the first time the view is ready; disarms it
    /// if readiness is lost before it fires. Never affects a countdown or an
    /// active reading.
    pub fn sync_guard(&mut self, guard: StartGuard<'_>, now_ms: i64) {
        if self.torn_down || self.state != ReadingState::Idle {
            return;
        }
        match (self.auto_start, guard.permits_start()) {
            (AutoStart::Waiting, true) => {
                let due_at_ms = now_ms.saturating_add(self.auto_start_delay_ms);
                self.timer = Some(PendingTimer {
                    kind: TimerKind::AutoStart,
                    due_at_ms,
                });
                self.auto_start = AutoStart::Armed;
                debug!(due_at_ms, "Automatic start armed");
            }
            (AutoStart::Armed, false) => {
                self.clear_auto_timer();
                self.auto_start = AutoStart::Waiting;
                debug!("Automatic start disarmed");
            }
            _ => {}
        }
    }

    pub fn request_start(
        &mut self,
        guard: StartGuard<'_>,
        now_ms: i64,
    ) -> Result<StartOutcome, StartRejection> {
        if self.torn_down {
            return Err(StartRejection::ViewClosed);
        }
        match self.state {
            ReadingState::Countdown { .. } => return Ok(StartOutcome::AlreadyCountingDown),
            ReadingState::Active => return Ok(StartOutcome::AlreadyActive),
            ReadingState::Idle => {}
        }

        let device_id = guard.check()?;
        self.auto_start = AutoStart::Consumed;
        self.begin_countdown(device_id, now_ms);
        Ok(StartOutcome::CountdownStarted {
            secs: self.countdown_secs,
        })
    }

    pub fn request_stop(&mut self) -> Option<Directive> {
        if self.auto_start != AutoStart::Consumed {
            self.clear_auto_timer();
            self.auto_start = AutoStart::Consumed;
        }
        match self.state {
            ReadingState::Idle => None,
            ReadingState::Countdown { remaining } => {
                self.state = ReadingState::Idle;
                self.timer = None;
                info!(remaining, "Countdown cancelled");
                None
            }
            ReadingState::Active => self.finish_active("Reading stopped"),
        }
    }

    /// Fires the pending timer if it is due.
    pub fn on_timer(&mut self, guard: StartGuard<'_>, now_ms: i64) -> Option<Directive> {
        let timer = self.timer.filter(|timer| timer.due_at_ms <= now_ms)?;
        self.timer = None;

        match timer.kind {
            TimerKind::AutoStart => {
                if self.state != ReadingState::Idle {
                    self.auto_start = AutoStart::Consumed;
                    return None;
                }
                match guard.check() {
                    Ok(device_id) => {
                        self.auto_start = AutoStart::Consumed;
                        info!(device_id, "Automatic start");
                        self.begin_countdown(device_id, now_ms);
                    }
                    Err(rejection) => {
                        self.auto_start = AutoStart::Waiting;
                        debug!(%rejection, "Automatic start deferred");
                    }
                }
                None
            }
            TimerKind::CountdownTick => self.tick(guard, timer.due_at_ms),
        }
    }

    /// Undoes a commit whose start command could not be delivered.
    pub fn abort_start(&mut self) {
        if self.state == ReadingState::Active {
            warn!(device_id = ?self.active_device, "Start command not delivered, back to idle");
            self.state = ReadingState::Idle;
            self.active_device = None;
        }
    }

    /// Marks a reading as running after a start command was re-sent from
    /// `IDLE`. Returns false when the state did not change.
    pub fn resume_active(&mut self, device_id: &str) -> bool {
        if self.torn_down || self.state != ReadingState::Idle {
            return false;
        }
        self.state = ReadingState::Active;
        self.active_device = Some(device_id.to_string());
        self.timer = None;
        self.auto_start = AutoStart::Consumed;
        info!(device_id, "Reading resumed after resend");
        true
    }

    /// Ends the view. Returns the stop command when a reading is running.
    pub fn teardown(&mut self) -> Option<Directive> {
        if self.torn_down {
            return None;
        }
        self.torn_down = true;
        self.timer = None;
        self.auto_start = AutoStart::Consumed;
        match self.state {
            ReadingState::Active => self.finish_active("Reading stopped on teardown"),
            ReadingState::Countdown { .. } => {
                self.state = ReadingState::Idle;
                None
            }
            ReadingState::Idle => None,
        }
    }

    fn begin_countdown(&mut self, device_id: &str, now_ms: i64) {
        self.state = ReadingState::Countdown {
            remaining: self.countdown_secs,
        };
        self.timer = Some(PendingTimer {
            kind: TimerKind::CountdownTick,
            due_at_ms: now_ms.saturating_add(TICK_MS),
        });
        info!(device_id, secs = self.countdown_secs, "Countdown started");
    }

    fn tick(&mut self, guard: StartGuard<'_>, due_at_ms: i64) -> Option<Directive> {
        let ReadingState::Countdown { remaining } = self.state else {
            return None;
        };

        let Some(device_id) = guard.device_id else {
            warn!("Device disappeared during countdown, cancelling");
            self.state = ReadingState::Idle;
            return None;
        };

        let remaining = remaining.saturating_sub(1);
        if remaining > 0 {
            self.state = ReadingState::Countdown { remaining };
            self.timer = Some(PendingTimer {
                kind: TimerKind::CountdownTick,
                due_at_ms: due_at_ms.saturating_add(TICK_MS),
            });
            debug!(remaining, "Countdown tick");
            return None;
        }

        self.state = ReadingState::Active;
        self.active_device = Some(device_id.to_string());
        info!(device_id, "Reading started");
        Some(Directive::Start {
            device_id: device_id.to_string(),
        })
    }

    fn finish_active(&mut self, message: &'static str) -> Option<Directive> {
        self.state = ReadingState::Idle;
        let device_id = self.active_device.take()?;
        info!(device_id = %device_id, "{}", message);
        Some(Directive::Stop { device_id })
    }

    fn clear_auto_timer(&mut self) {
        if matches!(self.timer, Some(PendingTimer { kind: TimerKind::AutoStart, .. })) {
            self.timer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const MAC: &str = "AA:BB:CC:DD:EE:FF";

    fn ready() -> StartGuard<'static> {
        StartGuard {
            device_id: Some(MAC),
            connection: ConnectionState::Connected,
        }
    }

    fn offline() -> StartGuard<'static> {
        StartGuard {
            device_id: Some(MAC),
            connection: ConnectionState::Offline,
        }
    }

    fn no_device() -> StartGuard<'static> {
        StartGuard {
            device_id: None,
            connection: ConnectionState::NoData,
        }
    }

    /// Fires timers until none is due at `until`, collecting directives.
    fn run_until(
        orch: &mut ReadingOrchestrator,
        guard: StartGuard<'_>,
        until: i64,
    ) -> (usize, Vec<Directive>) {
        let mut fired = 0;
        let mut directives = Vec::new();
        while let Some(deadline) = orch.next_deadline().filter(|d| *d <= until) {
            fired += 1;
            directives.extend(orch.on_timer(guard, deadline));
        }
        (fired, directives)
    }

    #[test]
    fn manual_start_ticks_ten_times_then_starts_once() {
        let mut orch = ReadingOrchestrator::new(10, 500);
        let outcome = orch.request_start(ready(), T0).expect("start");
        assert_eq!(outcome, StartOutcome::CountdownStarted { secs: 10 });

        let mut directives = Vec::new();
        for tick in 1..=10u32 {
            let deadline = orch.next_deadline().expect("tick pending");
            assert_eq!(deadline, T0 + i64::from(tick) * TICK_MS);
            directives.extend(orch.on_timer(ready(), deadline));
            if tick < 10 {
                assert_eq!(orch.state(), ReadingState::Countdown { remaining: 10 - tick });
            }
        }

        assert_eq!(
            directives,
            vec![Directive::Start {
                device_id: MAC.to_string()
            }]
        );
        assert_eq!(orch.state(), ReadingState::Active);
        assert_eq!(orch.next_deadline(), None);
    }

    #[test]
    fn timer_not_yet_due_does_nothing() {
        let mut orch = ReadingOrchestrator::new(3, 500);
        orch.request_start(ready(), T0).expect("start");
        assert_eq!(orch.on_timer(ready(), T0 + 999), None);
        assert_eq!(orch.state(), ReadingState::Countdown { remaining: 3 });
    }

    #[test]
    fn stop_during_countdown_emits_nothing() {
        let mut orch = ReadingOrchestrator::new(10, 500);
        orch.request_start(ready(), T0).expect("start");
        orch.on_timer(ready(), T0 + TICK_MS);

        assert_eq!(orch.request_stop(), None);
        assert_eq!(orch.state(), ReadingState::Idle);
        assert_eq!(orch.next_deadline(), None);
        let (fired, directives) = run_until(&mut orch, ready(), T0 + 60_000);
        assert_eq!((fired, directives.len()), (0, 0));
    }

    #[test]
    fn stop_while_active_targets_started_device() {
        let mut orch = ReadingOrchestrator::new(1, 500);
        orch.request_start(ready(), T0).expect("start");
        orch.on_timer(ready(), T0 + TICK_MS);
        assert_eq!(orch.active_device(), Some(MAC));

        assert_eq!(
            orch.request_stop(),
            Some(Directive::Stop {
                device_id: MAC.to_string()
            })
        );
        assert_eq!(orch.state(), ReadingState::Idle);
        assert_eq!(orch.request_stop(), None);
    }

    #[test]
    fn start_is_rejected_without_device_or_when_offline() {
        let mut orch = ReadingOrchestrator::new(10, 500);
        assert_eq!(orch.request_start(no_device(), T0), Err(StartRejection::NoDevice));
        assert_eq!(orch.request_start(offline(), T0), Err(StartRejection::DeviceOffline));
        assert_eq!(orch.state(), ReadingState::Idle);
        assert!(!orch.auto_start_consumed());
    }

    #[test]
    fn stale_and_unreported_devices_may_start() {
        for connection in [ConnectionState::Stale, ConnectionState::NoData] {
            let mut orch = ReadingOrchestrator::new(10, 500);
            let guard = StartGuard {
                device_id: Some(MAC),
                connection,
            };
            assert!(orch.request_start(guard, T0).is_ok());
        }
    }

    #[test]
    fn start_during_countdown_or_active_is_a_no_op() {
        let mut orch = ReadingOrchestrator::new(2, 500);
        orch.request_start(ready(), T0).expect("start");
        let pending = orch.pending_timer();
        assert_eq!(
            orch.request_start(ready(), T0 + 300),
            Ok(StartOutcome::AlreadyCountingDown)
        );
        assert_eq!(orch.pending_timer(), pending);

        run_until(&mut orch, ready(), T0 + 2 * TICK_MS);
        assert_eq!(orch.request_start(ready(), T0 + 5_000), Ok(StartOutcome::AlreadyActive));
    }

    #[test]
    fn offline_after_commit_does_not_cancel() {
        let mut orch = ReadingOrchestrator::new(2, 500);
        orch.request_start(ready(), T0).expect("start");
        let (_, directives) = run_until(&mut orch, offline(), T0 + 2 * TICK_MS);
        assert_eq!(directives.len(), 1);
        assert_eq!(orch.state(), ReadingState::Active);
    }

    #[test]
    fn device_lost_during_countdown_cancels_without_command() {
        let mut orch = ReadingOrchestrator::new(5, 500);
        orch.request_start(ready(), T0).expect("start");
        assert_eq!(orch.on_timer(no_device(), T0 + TICK_MS), None);
        assert_eq!(orch.state(), ReadingState::Idle);
        assert_eq!(orch.next_deadline(), None);
    }

    #[test]
    fn late_tick_keeps_cadence() {
        let mut orch = ReadingOrchestrator::new(5, 500);
        orch.request_start(ready(), T0).expect("start");
        orch.on_timer(ready(), T0 + TICK_MS + 400);
        assert_eq!(orch.next_deadline(), Some(T0 + 2 * TICK_MS));
    }

    #[test]
    fn teardown_while_active_emits_exactly_one_stop() {
        let mut orch = ReadingOrchestrator::new(1, 500);
        orch.request_start(ready(), T0).expect("start");
        orch.on_timer(ready(), T0 + TICK_MS);

        assert_eq!(
            orch.teardown(),
            Some(Directive::Stop {
                device_id: MAC.to_string()
            })
        );
        assert_eq!(orch.teardown(), None);
        assert_eq!(orch.request_start(ready(), T0 + 5_000), Err(StartRejection::ViewClosed));
    }

    #[test]
    fn teardown_while_idle_or_counting_emits_nothing() {
        let mut idle = ReadingOrchestrator::new(10, 500);
        assert_eq!(idle.teardown(), None);

        let mut counting = ReadingOrchestrator::new(10, 500);
        counting.request_start(ready(), T0).expect("start");
        assert_eq!(counting.teardown(), None);
        assert_eq!(counting.next_deadline(), None);
    }

    #[test]
    fn abort_start_returns_to_idle() {
        let mut orch = ReadingOrchestrator::new(1, 500);
        orch.request_start(ready(), T0).expect("start");
        orch.on_timer(ready(), T0 + TICK_MS);
        orch.abort_start();
        assert_eq!(orch.state(), ReadingState::Idle);
        assert_eq!(orch.active_device(), None);
        assert_eq!(
            orch.request_start(ready(), T0 + 2_000),
            Ok(StartOutcome::CountdownStarted { secs: 1 })
        );
    }

    #[test]
    fn resume_active_only_from_idle() {
        let mut orch = ReadingOrchestrator::new(1, 500);
        assert!(orch.resume_active(MAC));
        assert_eq!(orch.state(), ReadingState::Active);
        assert!(!orch.resume_active(MAC));
        assert!(matches!(orch.request_stop(), Some(Directive::Stop { .. })));
    }

    #[test]
    fn auto_start_arms_once_ready_and_fires_after_delay() {
        let mut orch = ReadingOrchestrator::new(10, 500);
        orch.sync_guard(no_device(), T0);
        assert_eq!(orch.next_deadline(), None);

        orch.sync_guard(ready(), T0 + 100);
        assert_eq!(
            orch.pending_timer(),
            Some(PendingTimer {
                kind: TimerKind::AutoStart,
                due_at_ms: T0 + 600
            })
        );

        // Re-syncing while armed does not push the deadline out.
        orch.sync_guard(ready(), T0 + 400);
        assert_eq!(orch.next_deadline(), Some(T0 + 600));

        assert_eq!(orch.on_timer(ready(), T0 + 600), None);
        assert_eq!(orch.state(), ReadingState::Countdown { remaining: 10 });
        assert!(orch.auto_start_consumed());
    }

    #[test]
    fn auto_start_fires_at_most_once_across_flaps() {
        let mut orch = ReadingOrchestrator::new(1, 500);
        let mut starts = 0;
        let mut now = T0;

        for _ in 0..3 {
            orch.sync_guard(offline(), now);
            orch.sync_guard(ready(), now);
            now += 2_000;
            let (_, directives) = run_until(&mut orch, ready(), now);
            starts += directives
                .iter()
                .filter(|d| matches!(d, Directive::Start { .. }))
                .count();
            orch.request_stop();
            now += 1_000;
        }

        assert_eq!(starts, 1);
    }

    #[test]
    fn going_offline_disarms_until_recovery() {
        let mut orch = ReadingOrchestrator::new(10, 500);
        orch.sync_guard(ready(), T0);
        orch.sync_guard(offline(), T0 + 200);
        assert_eq!(orch.next_deadline(), None);
        assert!(!orch.auto_start_consumed());

        orch.sync_guard(ready(), T0 + 5_000);
        assert_eq!(orch.next_deadline(), Some(T0 + 5_500));
    }

    #[test]
    fn auto_start_deferred_if_guard_fails_at_fire_time() {
        let mut orch = ReadingOrchestrator::new(10, 500);
        orch.sync_guard(ready(), T0);
        assert_eq!(orch.on_timer(offline(), T0 + 500), None);
        assert_eq!(orch.state(), ReadingState::Idle);
        assert!(!orch.auto_start_consumed());
    }

    #[test]
    fn manual_action_pre_empts_auto_start() {
        let mut orch = ReadingOrchestrator::new(10, 500);
        orch.sync_guard(ready(), T0);
        assert_eq!(orch.request_stop(), None);
        assert!(orch.auto_start_consumed());
        assert_eq!(orch.next_deadline(), None);

        orch.sync_guard(ready(), T0 + 1_000);
        assert_eq!(orch.next_deadline(), None);
    }

    #[test]
    fn rejection_serializes_for_the_ui() {
        let value = serde_json::to_value(StartRejection::DeviceOffline).expect("encode");
        assert_eq!(value, serde_json::json!("DEVICE_OFFLINE"));
        let state = serde_json::to_value(ReadingState::Countdown { remaining: 3 }).expect("encode");
        assert_eq!(state, serde_json::json!({ "state": "COUNTDOWN", "remaining": 3 }));
    }
}
