//! `vitals watch`: a live driver view on a current-thread runtime.
//!
//! One task owns the session. It waits on the feed queue, the orchestrator's
//! next deadline, the liveness refresh interval, operator input and Ctrl-C,
//! and handles whichever fires first. Snapshots are printed to stdout as
//! JSON lines whenever they change.

use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vitals_core::{DriverSession, MemoryBackend, MonitorConfig, Result, ViewSnapshot, VitalsError};

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn instant_for(deadline_ms: i64) -> Instant {
    let delay = u64::try_from(deadline_ms.saturating_sub(now_ms())).unwrap_or(0);
    Instant::now() + Duration::from_millis(delay)
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Start,
    Stop,
    Retry,
    Quit,
}

fn parse_operator(line: &str) -> Option<Operator> {
    match line.trim().to_ascii_lowercase().as_str() {
        "start" | "s" => Some(Operator::Start),
        "stop" | "x" => Some(Operator::Stop),
        "retry" | "r" => Some(Operator::Retry),
        "quit" | "q" | "exit" => Some(Operator::Quit),
        _ => None,
    }
}

pub fn run_watch(
    backend: MemoryBackend,
    driver_id: &str,
    config: &MonitorConfig,
    start: bool,
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| VitalsError::Io {
            context: "starting runtime".to_string(),
            source,
        })?;
    runtime.block_on(watch(backend, driver_id, config, start))
}

async fn watch(
    backend: MemoryBackend,
    driver_id: &str,
    config: &MonitorConfig,
    start: bool,
) -> Result<()> {
    let (mut session, mut feed) = DriverSession::open(backend, driver_id, config)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let mut refresh = time::interval(Duration::from_millis(config.connection_refresh_ms));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;

    session.pump(&mut feed, now_ms())?;
    if start {
        apply_operator(&mut session, Operator::Start);
    }
    let mut last_printed = None;
    print_if_changed(&session.snapshot(), &mut last_printed);

    loop {
        let deadline = session.next_deadline().map(instant_for);
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Interrupted, closing view");
                break;
            }
            event = feed.recv() => {
                let Some(event) = event else { break };
                if let Err(err) = session.handle_event(event, now_ms()) {
                    warn!(error = %err, "Feed event failed");
                }
            }
            _ = sleep_until_deadline(deadline) => {
                if let Err(err) = session.fire_due(now_ms()) {
                    warn!(error = %err, "Timer handling failed");
                }
            }
            _ = refresh.tick() => {
                session.refresh(now_ms());
            }
            line = input.next_line(), if input_open => {
                match line {
                    Ok(Some(line)) => match parse_operator(&line) {
                        Some(Operator::Quit) => break,
                        Some(operator) => apply_operator(&mut session, operator),
                        None => warn!(
                            input = %line.trim(),
                            "Unknown command (start, stop, retry, quit)"
                        ),
                    },
                    Ok(None) => input_open = false,
                    Err(err) => {
                        warn!(error = %err, "Reading operator input failed");
                        input_open = false;
                    }
                }
            }
        }
        print_if_changed(&session.snapshot(), &mut last_printed);
    }

    session.teardown(now_ms())
}

fn apply_operator(session: &mut DriverSession<MemoryBackend>, operator: Operator) {
    let now = now_ms();
    match operator {
        Operator::Start => match session.request_start(now) {
            Ok(outcome) => info!(?outcome, "Start requested"),
            Err(rejection) => warn!(%rejection, "Start unavailable"),
        },
        Operator::Stop => {
            if let Err(err) = session.request_stop(now) {
                warn!(error = %err, "Stop failed, use retry");
            }
        }
        Operator::Retry => match session.retry_failed_command(now) {
            Ok(true) => info!("Command re-sent"),
            Ok(false) => info!("Nothing to retry"),
            Err(err) => warn!(error = %err, "Retry failed"),
        },
        Operator::Quit => {}
    }
}

fn print_if_changed(snapshot: &ViewSnapshot, last: &mut Option<ViewSnapshot>) {
    if last.as_ref() == Some(snapshot) {
        return;
    }
    match serde_json::to_string(snapshot) {
        Ok(line) => println!("{}", line),
        Err(err) => warn!(error = %err, "Snapshot encoding failed"),
    }
    *last = Some(snapshot.clone());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_words_and_shortcuts() {
        assert_eq!(parse_operator("start"), Some(Operator::Start));
        assert_eq!(parse_operator(" STOP \n"), Some(Operator::Stop));
        assert_eq!(parse_operator("r"), Some(Operator::Retry));
        assert_eq!(parse_operator("q"), Some(Operator::Quit));
        assert_eq!(parse_operator("launch"), None);
    }

    #[test]
    fn past_deadline_sleeps_zero() {
        let before = Instant::now();
        let at = instant_for(now_ms() - 5_000);
        assert!(at <= Instant::now() + Duration::from_millis(1));
        assert!(at >= before);
    }
}
