//! One-shot subcommands over the store file.

use std::path::Path;

use chrono::{TimeZone, Utc};
use tracing::info;
use vitals_core::sessions::TemperatureBand;
use vitals_core::{
    export_rows, AdminConsole, ConnectionState, DriverSession, MemoryBackend, MonitorConfig,
    Result, ViewSnapshot, VitalsError,
};
use vitals_protocol::SessionRecord;

use crate::live;

fn format_time(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{}ms", ms),
    }
}

fn format_vitals(record: &SessionRecord) -> String {
    let mut parts = Vec::new();
    if let Some(temperature) = record.temperature {
        let band = match TemperatureBand::of(temperature) {
            TemperatureBand::Normal => "normal",
            TemperatureBand::Elevated => "elevated",
            TemperatureBand::High => "high",
        };
        parts.push(format!("temp {:.1}°C ({})", temperature, band));
    }
    if let Some(heart_rate) = record.heart_rate {
        parts.push(format!("hr {:.0} bpm", heart_rate));
    }
    if let Some(spo2) = record.spo2 {
        parts.push(format!("spo2 {:.0}%", spo2));
    }
    if let Some(gsr) = record.gsr {
        parts.push(format!("gsr {:.2}", gsr));
    }
    if parts.is_empty() {
        "(no values)".to_string()
    } else {
        parts.join(", ")
    }
}

fn print_report(snapshot: &ViewSnapshot) {
    println!("═══════════════════════════════════════════════════════════");
    println!("  Driver {}  {}", snapshot.driver_id, snapshot.display_name);
    println!("═══════════════════════════════════════════════════════════");
    println!();

    println!("── Device ────────────────────────────────────────────────");
    match (&snapshot.device_id, &snapshot.device_label) {
        (Some(mac), Some(label)) => {
            println!("  {} [{}] via {:?}", label, mac, snapshot.resolution);
        }
        _ => println!("  (no device available, start disabled)"),
    }
    println!(
        "  Connection: {:?} ({})",
        snapshot.connection, snapshot.connection_label
    );
    println!("  Reading: {:?}", snapshot.reading);
    println!(
        "  Start: {}",
        if snapshot.start_enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();

    println!("── Latest Reading ────────────────────────────────────────");
    match &snapshot.latest {
        Some(latest) => println!(
            "  {}  {}  {}",
            format_time(latest.record.timestamp),
            latest.session_id,
            format_vitals(&latest.record)
        ),
        None => println!("  (no readings yet)"),
    }
    if !snapshot.has_data && snapshot.connection != ConnectionState::Offline {
        println!("  Waiting for sensor data");
    }
    if snapshot.legacy_degraded {
        println!("  ⚠ legacy readings unavailable, showing primary only");
    }
    println!();
}

pub fn check(
    store: &Path,
    driver_id: &str,
    config: &MonitorConfig,
    now: Option<i64>,
) -> Result<()> {
    let backend = MemoryBackend::load(store)?;
    let now = now.unwrap_or_else(|| Utc::now().timestamp_millis());

    let (mut session, mut feed) = DriverSession::open(&backend, driver_id, config)?;
    session.pump(&mut feed, now)?;
    session.refresh(now);

    print_report(&session.snapshot());

    let history = session.view().history();
    println!("── History ({}) ──────────────────────────────────────────", history.len());
    for entry in &history {
        println!(
            "  {}  {}  {}",
            format_time(entry.record.timestamp),
            entry.session_id,
            format_vitals(&entry.record)
        );
    }
    if history.is_empty() {
        println!("  (empty)");
    }

    let gsr = session.view().gsr_series();
    println!();
    println!(
        "GSR points: {}{}",
        gsr.points.len(),
        if gsr.is_plottable() {
            ""
        } else {
            " (not enough for a trend)"
        }
    );

    session.teardown(now)
}

pub fn watch(
    store: &Path,
    driver_id: &str,
    config: &MonitorConfig,
    start: bool,
    save: bool,
) -> Result<()> {
    let backend = MemoryBackend::load(store)?;
    let result = live::run_watch(backend.clone(), driver_id, config, start);
    if save {
        backend.save(store)?;
        info!(store = %store.display(), "Store saved");
    }
    result
}

/// Loads the store, runs `op` against it, and saves it back on success.
fn with_admin<T>(
    store: &Path,
    op: impl FnOnce(&AdminConsole<'_, MemoryBackend>) -> Result<T>,
) -> Result<T> {
    let backend = MemoryBackend::load(store)?;
    let value = op(&AdminConsole::new(&backend))?;
    backend.save(store)?;
    Ok(value)
}

pub fn assign(store: &Path, device: &str, driver_id: &str) -> Result<()> {
    with_admin(store, |admin| admin.assign_device(device, driver_id))?;
    println!("{} assigned to {}", device, driver_id);
    Ok(())
}

pub fn set_test(store: &Path, device: &str) -> Result<()> {
    with_admin(store, |admin| admin.set_test_device(device))?;
    println!("{} is now the test device", device);
    Ok(())
}

pub fn start(store: &Path, driver_id: &str, device: Option<&str>) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    let mac = with_admin(store, |admin| match device {
        Some(mac) => admin
            .start_reading(mac, driver_id, now)
            .map(|_| mac.to_string()),
        None => admin
            .start_reading_for_driver(driver_id, now)
            .map(|(mac, _)| mac),
    })?;
    println!("Start sent to {} for {}", mac, driver_id);
    Ok(())
}

pub fn stop(store: &Path, device: &str) -> Result<()> {
    with_admin(store, |admin| admin.stop_reading(device))?;
    println!("Stop sent to {}", device);
    Ok(())
}

pub fn disable_driver(store: &Path, driver_id: &str) -> Result<()> {
    with_admin(store, |admin| admin.disable_driver(driver_id))?;
    println!("{} disabled", driver_id);
    Ok(())
}

pub fn provision(store: &Path, uid: &str, username: &str, email: Option<&str>) -> Result<()> {
    with_admin(store, |admin| admin.provision_driver_records(uid, username, email))?;
    println!("{} provisioned as {}", uid, username);
    Ok(())
}

pub fn fleet(store: &Path) -> Result<()> {
    let backend = MemoryBackend::load(store)?;
    let summary = AdminConsole::new(&backend).fleet_summary()?;
    let line = serde_json::to_string(&summary).map_err(|source| VitalsError::Json {
        context: "encoding fleet summary".to_string(),
        source,
    })?;
    println!("{}", line);
    Ok(())
}

pub fn export(store: &Path) -> Result<()> {
    let backend = MemoryBackend::load(store)?;
    for row in export_rows(&backend)? {
        let line = serde_json::to_string(&row).map_err(|source| VitalsError::Json {
            context: "encoding export row".to_string(),
            source,
        })?;
        println!("{}", line);
    }
    Ok(())
}
