//! A [`DriverView`] wired to a backend.
//!
//! The session owns every subscription of one driver screen and executes the
//! view's effects: it swaps the device status subscription when resolution
//! changes and writes reading commands to the device control channel.
//!
//! Subscriptions deliver into one queue whose receiver is handed back from
//! [`DriverSession::open`]. The owner drains it with [`DriverSession::pump`]
//! (or feeds single events through [`DriverSession::handle_event`]) and
//! fires timers with [`DriverSession::fire_due`], so all state changes happen
//! on one thread, one event at a time.
//!
//! Teardown sends the stop command before any subscription is released.

use chrono::Utc;
use tracing::{error, info, warn};
use vitals_protocol::{paths, validate_key, ReadingCommand};

use crate::backend::{
    feed_channel, Backend, Feed, FeedEvent, FeedReceiver, FeedSender, Subscription,
};
use crate::config::MonitorConfig;
use crate::error::{Result, VitalsError};
use crate::orchestrator::{StartOutcome, StartRejection};
use crate::view::{CommandKind, DriverView, ViewEffect, ViewSnapshot};

/// Upper bound on timer firings handled by one [`DriverSession::fire_due`] call.
const MAX_FIRINGS_PER_CALL: usize = 256;

pub struct DriverSession<B: Backend> {
    backend: B,
    view: DriverView,
    sink: FeedSender,
    feeds: Vec<Subscription>,
    status: Option<Subscription>,
    closed: bool,
}

impl<B: Backend> DriverSession<B> {
    /// Opens the view for `driver_id` and subscribes to the registry, both
    /// session sources and the driver's directory entry.
    ///
    /// Subscriptions that cannot be opened are reported through the queue as
    /// failed feeds; only an invalid driver id is an error.
    pub fn open(
        backend: B,
        driver_id: &str,
        config: &MonitorConfig,
    ) -> Result<(Self, FeedReceiver)> {
        validate_key("driver_id", driver_id)?;

        let (sink, receiver) = feed_channel();
        let mut session = Self {
            backend,
            view: DriverView::new(driver_id, config),
            sink,
            feeds: Vec::new(),
            status: None,
            closed: false,
        };

        let wanted = [
            (paths::DEVICES.to_string(), Feed::Registry),
            (paths::primary_sessions(driver_id), Feed::PrimarySessions),
            (paths::legacy_sessions(driver_id), Feed::LegacySessions),
            (paths::driver(driver_id), Feed::DriverDirectory),
        ];
        for (path, feed) in wanted {
            if let Some(subscription) = session.subscribe_or_report(&path, feed) {
                session.feeds.push(subscription);
            }
        }

        info!(driver_id, feeds = session.feeds.len(), "Driver view opened");
        Ok((session, receiver))
    }

    fn subscribe_or_report(&self, path: &str, feed: Feed) -> Option<Subscription> {
        match self.backend.subscribe(path, feed.clone(), self.sink.clone()) {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(path, error = %err, "Subscription failed");
                let _ = self.sink.send(FeedEvent::failed(feed, err.to_string()));
                None
            }
        }
    }

    pub fn view(&self) -> &DriverView {
        &self.view
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.view.snapshot()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.view.next_deadline()
    }

    /// Applies every queued event. Returns how many were handled.
    pub fn pump(&mut self, receiver: &mut FeedReceiver, now_ms: i64) -> Result<usize> {
        let mut handled = 0;
        while let Ok(event) = receiver.try_recv() {
            self.handle_event(event, now_ms)?;
            handled += 1;
        }
        Ok(handled)
    }

    pub fn handle_event(&mut self, event: FeedEvent, now_ms: i64) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let effects = self.view.handle_feed(event, now_ms);
        self.execute_all(effects)
    }

    /// Fires every timer due at `now_ms`, including ticks that were missed.
    pub fn fire_due(&mut self, now_ms: i64) -> Result<()> {
        for _ in 0..MAX_FIRINGS_PER_CALL {
            match self.view.next_deadline() {
                Some(deadline) if deadline <= now_ms && !self.closed => {
                    let effects = self.view.on_timer(now_ms);
                    self.execute_all(effects)?;
                }
                _ => return Ok(()),
            }
        }
        warn!(now_ms, "Timer firing limit reached");
        Ok(())
    }

    /// Re-classifies liveness; call on the refresh interval.
    pub fn refresh(&mut self, now_ms: i64) {
        self.view.refresh_connection(now_ms);
    }

    pub fn request_start(
        &mut self,
        now_ms: i64,
    ) -> std::result::Result<StartOutcome, StartRejection> {
        if self.closed {
            return Err(StartRejection::ViewClosed);
        }
        self.view.request_start(now_ms)
    }

    pub fn request_stop(&mut self, now_ms: i64) -> Result<()> {
        let effects = self.view.request_stop(now_ms);
        self.execute_all(effects)
    }

    /// Re-sends the last failed command. Returns false when there was none.
    pub fn retry_failed_command(&mut self, now_ms: i64) -> Result<bool> {
        match self.view.retry_effect(now_ms) {
            Some(effect) => {
                self.execute(effect)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes the view: stop command first, then every subscription.
    pub fn teardown(mut self, now_ms: i64) -> Result<()> {
        self.close(now_ms)
    }

    fn close(&mut self, now_ms: i64) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let effects = self.view.teardown(now_ms);
        let result = self.execute_all(effects);
        self.closed = true;

        if let Some(status) = self.status.take() {
            status.unsubscribe();
        }
        for subscription in self.feeds.drain(..) {
            subscription.unsubscribe();
        }
        info!(driver_id = self.view.driver_id(), "Driver view closed");
        result
    }

    fn execute_all(&mut self, effects: Vec<ViewEffect>) -> Result<()> {
        for effect in effects {
            self.execute(effect)?;
        }
        Ok(())
    }

    fn execute(&mut self, effect: ViewEffect) -> Result<()> {
        match effect {
            ViewEffect::WatchDeviceStatus(mac) => {
                self.status = None;
                if let Some(mac) = mac {
                    let path = paths::device_status(&mac);
                    self.status = self.subscribe_or_report(&path, Feed::DeviceStatus(mac));
                }
                Ok(())
            }
            ViewEffect::SendCommand { device_id, command } => {
                let value = serde_json::to_value(&command).map_err(|source| VitalsError::Json {
                    context: "encoding start command".to_string(),
                    source,
                })?;
                let outcome = self.backend.write(&paths::device_control(&device_id), value);
                self.settle(device_id, CommandKind::Start, outcome)
            }
            ViewEffect::StopReading { device_id } => {
                let outcome = self
                    .backend
                    .patch_update(&paths::device_control(&device_id), ReadingCommand::stop_patch());
                self.settle(device_id, CommandKind::Stop, outcome)
            }
        }
    }

    fn settle(&mut self, device_id: String, kind: CommandKind, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                info!(device_id = %device_id, ?kind, "Reading command sent");
                self.view.record_command_sent(&device_id, kind);
                Ok(())
            }
            Err(err) => {
                let details = err.to_string();
                error!(device_id = %device_id, ?kind, error = %details, "Reading command failed");
                self.view.record_command_failure(&device_id, kind, details.clone());
                Err(VitalsError::CommandWrite { device_id, details })
            }
        }
    }
}

impl<B: Backend> Drop for DriverSession<B> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = self.close(Utc::now().timestamp_millis()) {
            error!(error = %err, "Teardown on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::orchestrator::ReadingState;
    use serde_json::json;

    const T0: i64 = 1_700_000_000_000;

    fn store() -> MemoryBackend {
        MemoryBackend::from_value(json!({
            "devices": {
                "AA": { "type": "assigned", "assignedDriver": "d1", "status": { "lastSeen": T0 } }
            },
            "sessions": { "d1": { "s1": { "timestamp": 10, "heartRate": 70 } } }
        }))
    }

    #[test]
    fn open_rejects_invalid_driver_id() {
        let result = DriverSession::open(MemoryBackend::new(), "bad/id", &MonitorConfig::default());
        assert!(matches!(result, Err(VitalsError::Validation(_))));
    }

    #[test]
    fn opening_watches_resolved_device() {
        let backend = store();
        let (mut session, mut rx) =
            DriverSession::open(backend.clone(), "d1", &MonitorConfig::default()).expect("open");
        session.pump(&mut rx, T0).expect("pump");
        // Status event queued by the new subscription.
        session.pump(&mut rx, T0).expect("pump");

        let snapshot = session.snapshot();
        assert_eq!(snapshot.device_id.as_deref(), Some("AA"));
        assert_eq!(snapshot.connection, crate::connection::ConnectionState::Connected);
        assert_eq!(snapshot.session_count, 1);
        // registry, primary, legacy, profile, status
        assert_eq!(backend.subscriber_count(), 5);
    }

    #[test]
    fn teardown_releases_all_subscriptions() {
        let backend = store();
        let (mut session, mut rx) =
            DriverSession::open(backend.clone(), "d1", &MonitorConfig::default()).expect("open");
        session.pump(&mut rx, T0).expect("pump");
        session.teardown(T0).expect("teardown");
        assert_eq!(backend.subscriber_count(), 0);
    }

    #[test]
    fn dropping_an_active_session_still_stops_the_device() {
        let backend = store();
        let config = MonitorConfig {
            countdown_secs: 1,
            ..MonitorConfig::default()
        };
        {
            let (mut session, mut rx) =
                DriverSession::open(backend.clone(), "d1", &config).expect("open");
            session.pump(&mut rx, T0).expect("pump");
            session.request_start(T0).expect("start");
            session.fire_due(T0 + 1_000).expect("fire");
            assert_eq!(session.view().reading_state(), ReadingState::Active);
        }
        assert_eq!(
            backend.read_once("deviceControl/AA/startReading").expect("read"),
            Some(json!(false))
        );
        assert_eq!(backend.subscriber_count(), 0);
    }
}
