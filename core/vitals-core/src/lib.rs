//! # vitals-core
//!
//! Device connectivity and reading-session reconciliation for the driver
//! vitals monitor.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Feeds are queued on
//!   `tokio::sync` channels, which work without a runtime; clients bring
//!   their own event loop.
//! - **Sans-IO state**: [`DriverView`] and [`ReadingOrchestrator`] take `now`
//!   as an argument and return effects. Only [`DriverSession`] touches a
//!   [`Backend`].
//! - **Graceful degradation**: Unreadable or malformed upstream data becomes
//!   an empty collection, never an error.
//! - **Recompute, don't patch**: Every derived value is rebuilt from the last
//!   snapshot of each input.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vitals_core::{DriverSession, MemoryBackend, MonitorConfig};
//!
//! let backend = MemoryBackend::load(&store_path)?;
//! let config = MonitorConfig::default();
//! let (mut session, mut feed) = DriverSession::open(backend, "driver-1", &config)?;
//! session.pump(&mut feed, now_ms)?;
//! session.fire_due(now_ms)?;
//! let snapshot = session.snapshot();
//! ```

pub mod admin;
pub mod backend;
pub mod config;
pub mod connection;
pub mod devices;
pub mod driver_session;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod sessions;
pub mod snapshot;
pub mod view;

pub use admin::{AdminConsole, FleetSummary};
pub use backend::{
    feed_channel, Backend, Feed, FeedEvent, FeedReceiver, FeedSender, FeedUpdate, MemoryBackend,
    Subscription,
};
pub use config::*;
pub use connection::{
    classify, ConnectionState, Thresholds, OFFLINE_THRESHOLD_MS, STALE_THRESHOLD_MS,
};
pub use devices::{resolve, DeviceRegistry, Resolution, ResolutionReason};
pub use driver_session::DriverSession;
pub use error::{Result, VitalsError};
pub use export::{export_rows, ExportRow};
pub use orchestrator::{
    Directive, PendingTimer, ReadingOrchestrator, ReadingState, StartGuard, StartOutcome,
    StartRejection, TimerKind,
};
pub use sessions::{SessionEntry, SessionMap, SessionReconciler, SessionSource, SourceUpdate};
pub use view::{CommandKind, DriverView, FailedCommand, ViewEffect, ViewSnapshot};
