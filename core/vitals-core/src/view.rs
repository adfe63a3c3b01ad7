//! One driver's live screen, without I/O.
//!
//! [`DriverView`] composes device resolution, liveness, session
//! reconciliation, latest-reading selection and the reading orchestrator.
//! Inputs are feed events, timer firings and user requests; outputs are
//! [`ViewEffect`]s that the owner executes against a backend. Every derived
//! value is recomputed from the latest inputs, never patched incrementally.

use serde::Serialize;
use tracing::{debug, info, warn};
use vitals_protocol::{DeviceStatus, DriverProfile, ReadingCommand, RequestedBy};

use crate::backend::{Feed, FeedEvent, FeedUpdate};
use crate::config::MonitorConfig;
use crate::connection::{ConnectionState, Thresholds};
use crate::devices::{self, DeviceRegistry, Resolution, ResolutionReason};
use crate::orchestrator::{
    Directive, ReadingOrchestrator, ReadingState, StartGuard, StartOutcome, StartRejection,
};
use crate::sessions::{
    self, GsrSeries, SessionEntry, SessionMap, SessionReconciler, SessionSource, SourceUpdate,
};
use crate::snapshot::decode_value;

/// Work the owner of a view must carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEffect {
    /// Replace the device status subscription (`None`: drop it).
    WatchDeviceStatus(Option<String>),
    SendCommand {
        device_id: String,
        command: ReadingCommand,
    },
    StopReading { device_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Start,
    Stop,
}

/// Last command that could not be written; cleared by a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedCommand {
    pub device_id: String,
    pub kind: CommandKind,
    pub details: String,
}

/// Everything the screen renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub driver_id: String,
    pub display_name: String,
    pub device_id: Option<String>,
    pub device_label: Option<String>,
    pub resolution: ResolutionReason,
    pub connection: ConnectionState,
    pub connection_label: &'static str,
    pub reading: ReadingState,
    pub start_enabled: bool,
    pub latest: Option<SessionEntry>,
    /// Latest reading carries at least one vital.
    pub has_data: bool,
    pub session_count: usize,
    pub legacy_degraded: bool,
    pub failed_command: Option<FailedCommand>,
}

fn guard_of(resolution: &Resolution, connection: ConnectionState) -> StartGuard<'_> {
    StartGuard {
        device_id: resolution.device_id.as_deref(),
        connection,
    }
}

#[derive(Debug, Clone)]
pub struct DriverView {
    driver_id: String,
    thresholds: Thresholds,
    profile: Option<DriverProfile>,
    registry: DeviceRegistry,
    resolution: Resolution,
    last_seen: Option<i64>,
    connection: ConnectionState,
    reconciler: SessionReconciler,
    latest: Option<SessionEntry>,
    orchestrator: ReadingOrchestrator,
    failed_command: Option<FailedCommand>,
}

impl DriverView {
    pub fn new(driver_id: impl Into<String>, config: &MonitorConfig) -> Self {
        Self {
            driver_id: driver_id.into(),
            thresholds: Thresholds {
                stale_ms: config.stale_threshold_ms,
                offline_ms: config.offline_threshold_ms,
            },
            profile: None,
            registry: DeviceRegistry::new(),
            resolution: Resolution::none(),
            last_seen: None,
            connection: ConnectionState::NoData,
            reconciler: SessionReconciler::new(),
            latest: None,
            orchestrator: ReadingOrchestrator::from_config(config),
            failed_command: None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inputs
    // ─────────────────────────────────────────────────────────────────────

    pub fn handle_feed(&mut self, event: FeedEvent, now_ms: i64) -> Vec<ViewEffect> {
        match event.feed {
            Feed::Registry => {
                let registry = match event.update {
                    FeedUpdate::Value(value) => devices::registry_from_snapshot(value),
                    FeedUpdate::Failed(reason) => {
                        warn!(reason = %reason, "Device registry unavailable, treating as empty");
                        DeviceRegistry::new()
                    }
                };
                self.apply_registry(registry, now_ms)
            }
            Feed::DeviceStatus(mac) => {
                self.apply_status(&mac, event.update, now_ms);
                Vec::new()
            }
            Feed::PrimarySessions => {
                self.apply_sessions(SessionSource::Primary, event.update);
                Vec::new()
            }
            Feed::LegacySessions => {
                self.apply_sessions(SessionSource::Legacy, event.update);
                Vec::new()
            }
            Feed::DriverDirectory => {
                self.profile = match event.update {
                    FeedUpdate::Value(value) => decode_value(value, "driver profile"),
                    FeedUpdate::Failed(reason) => {
                        warn!(reason = %reason, "Driver profile unavailable");
                        None
                    }
                };
                Vec::new()
            }
        }
    }

    fn apply_registry(&mut self, registry: DeviceRegistry, now_ms: i64) -> Vec<ViewEffect> {
        self.registry = registry;
        let resolution = devices::resolve(&self.registry, &self.driver_id);
        let mut effects = Vec::new();

        if resolution.device_id != self.resolution.device_id {
            info!(
                driver_id = %self.driver_id,
                from = ?self.resolution.device_id,
                to = ?resolution.device_id,
                reason = ?resolution.reason,
                "Device resolution changed"
            );
            if resolution.is_degraded() {
                warn!(
                    driver_id = %self.driver_id,
                    "No assigned or test device, using arbitrary device"
                );
            }
            self.last_seen = None;
            effects.push(ViewEffect::WatchDeviceStatus(resolution.device_id.clone()));
        }
        self.resolution = resolution;
        self.refresh_connection(now_ms);
        effects
    }

    fn apply_status(&mut self, mac: &str, update: FeedUpdate, now_ms: i64) {
        if self.resolution.device_id.as_deref() != Some(mac) {
            debug!(mac, "Ignoring status of unwatched device");
            return;
        }
        self.last_seen = match update {
            FeedUpdate::Value(value) => {
                decode_value::<DeviceStatus>(value, "device status").and_then(|s| s.last_seen)
            }
            FeedUpdate::Failed(reason) => {
                warn!(mac, reason = %reason, "Device status unavailable");
                None
            }
        };
        self.refresh_connection(now_ms);
    }

    fn apply_sessions(&mut self, source: SessionSource, update: FeedUpdate) {
        let update = match update {
            FeedUpdate::Value(value) => SourceUpdate::from_snapshot(source, value),
            FeedUpdate::Failed(reason) => SourceUpdate::Unavailable(reason),
        };
        let merged = self.reconciler.apply(source, update);
        self.latest = sessions::latest(merged);
    }

    /// Re-classifies liveness against `now`; also re-checks the automatic start.
    pub fn refresh_connection(&mut self, now_ms: i64) -> ConnectionState {
        let connection = self.thresholds.classify(self.last_seen, now_ms);
        if connection != self.connection {
            info!(
                device_id = ?self.resolution.device_id,
                from = ?self.connection,
                to = ?connection,
                "Connection state changed"
            );
            self.connection = connection;
        }
        let guard = guard_of(&self.resolution, self.connection);
        self.orchestrator.sync_guard(guard, now_ms);
        self.connection
    }

    /// Fires the pending timer if due.
    pub fn on_timer(&mut self, now_ms: i64) -> Vec<ViewEffect> {
        self.refresh_connection(now_ms);
        let guard = guard_of(&self.resolution, self.connection);
        let directive = self.orchestrator.on_timer(guard, now_ms);
        self.effects_for(directive, now_ms)
    }

    pub fn request_start(&mut self, now_ms: i64) -> Result<StartOutcome, StartRejection> {
        self.refresh_connection(now_ms);
        let guard = guard_of(&self.resolution, self.connection);
        let result = self.orchestrator.request_start(guard, now_ms);
        if let Err(rejection) = &result {
            info!(driver_id = %self.driver_id, %rejection, "Start rejected");
        }
        result
    }

    pub fn request_stop(&mut self, now_ms: i64) -> Vec<ViewEffect> {
        let directive = self.orchestrator.request_stop();
        self.effects_for(directive, now_ms)
    }

    pub fn teardown(&mut self, now_ms: i64) -> Vec<ViewEffect> {
        let directive = self.orchestrator.teardown();
        self.effects_for(directive, now_ms)
    }

    fn effects_for(&self, directive: Option<Directive>, now_ms: i64) -> Vec<ViewEffect> {
        match directive {
            Some(Directive::Start { device_id }) => vec![ViewEffect::SendCommand {
                device_id,
                command: ReadingCommand::start(self.driver_id.clone(), RequestedBy::Driver, now_ms),
            }],
            Some(Directive::Stop { device_id }) => vec![ViewEffect::StopReading { device_id }],
            None => Vec::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Command outcomes
    // ─────────────────────────────────────────────────────────────────────

    /// Records a write that failed. A failed start leaves the view idle.
    pub fn record_command_failure(&mut self, device_id: &str, kind: CommandKind, details: String) {
        if kind == CommandKind::Start {
            self.orchestrator.abort_start();
        }
        self.failed_command = Some(FailedCommand {
            device_id: device_id.to_string(),
            kind,
            details,
        });
    }

    /// Records a write that went through.
    pub fn record_command_sent(&mut self, device_id: &str, kind: CommandKind) {
        if kind == CommandKind::Start {
            self.orchestrator.resume_active(device_id);
        }
        self.failed_command = None;
    }

    /// Effect that re-sends the last failed command, if any.
    ///
    /// A failed stop is re-sent as is. A failed start is re-sent with a fresh
    /// timestamp only while the view is idle and the start guard still passes
    /// for the same device; otherwise it is dropped and a new start has to go
    /// through the countdown.
    pub fn retry_effect(&mut self, now_ms: i64) -> Option<ViewEffect> {
        let failed = self.failed_command.clone()?;
        match failed.kind {
            CommandKind::Stop => Some(ViewEffect::StopReading {
                device_id: failed.device_id,
            }),
            CommandKind::Start => {
                if self.orchestrator.is_torn_down()
                    || self.orchestrator.state() != ReadingState::Idle
                {
                    self.failed_command = None;
                    return None;
                }
                self.refresh_connection(now_ms);
                match guard_of(&self.resolution, self.connection).check() {
                    Ok(device_id) if device_id == failed.device_id => {}
                    Ok(device_id) => {
                        info!(
                            from = %failed.device_id,
                            to = device_id,
                            "Device changed, start not resent"
                        );
                        self.failed_command = None;
                        return None;
                    }
                    Err(rejection) => {
                        info!(device_id = %failed.device_id, %rejection, "Start not resent");
                        self.failed_command = None;
                        return None;
                    }
                }
                Some(ViewEffect::SendCommand {
                    device_id: failed.device_id,
                    command: ReadingCommand::start(
                        self.driver_id.clone(),
                        RequestedBy::Driver,
                        now_ms,
                    ),
                })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Derived values
    // ─────────────────────────────────────────────────────────────────────

    pub fn driver_id(&self) -> &str {
        &self.driver_id
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    pub fn device_id(&self) -> Option<&str> {
        self.resolution.device_id.as_deref()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn reading_state(&self) -> ReadingState {
        self.orchestrator.state()
    }

    pub fn next_deadline(&self) -> Option<i64> {
        self.orchestrator.next_deadline()
    }

    pub fn sessions(&self) -> &SessionMap {
        self.reconciler.merged()
    }

    pub fn latest(&self) -> Option<&SessionEntry> {
        self.latest.as_ref()
    }

    pub fn history(&self) -> Vec<SessionEntry> {
        sessions::newest_first(self.reconciler.merged())
    }

    pub fn gsr_series(&self) -> GsrSeries {
        sessions::gsr_series(self.reconciler.merged())
    }

    pub fn failed_command(&self) -> Option<&FailedCommand> {
        self.failed_command.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.orchestrator.is_torn_down()
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let guard = guard_of(&self.resolution, self.connection);
        ViewSnapshot {
            driver_id: self.driver_id.clone(),
            display_name: self
                .profile
                .as_ref()
                .map(|profile| profile.display_name().to_string())
                .unwrap_or_default(),
            device_id: self.resolution.device_id.clone(),
            device_label: self
                .resolution
                .device_id
                .as_deref()
                .map(|mac| devices::device_label(&self.registry, mac)),
            resolution: self.resolution.reason,
            connection: self.connection,
            connection_label: self.connection.label(),
            reading: self.orchestrator.state(),
            start_enabled: !self.is_closed()
                && self.orchestrator.state() == ReadingState::Idle
                && guard.permits_start(),
            latest: self.latest.clone(),
            has_data: self
                .latest
                .as_ref()
                .is_some_and(|entry| entry.record.has_vitals()),
            session_count: self.reconciler.merged().len(),
            legacy_degraded: self.reconciler.is_degraded(SessionSource::Legacy),
            failed_command: self.failed_command.clone(),
        }
    }
}
