//! vitals: driver vitals monitor command line.
//!
//! Works against a JSON store file holding the backend tree
//! (`~/.vitals/store.json` unless `--store` is given).
//!
//! ## Subcommands
//!
//! - `check`: One-shot driver view (device, liveness, latest reading, history)
//! - `watch`: Live driver view until Ctrl-C; stop command is sent on exit
//! - `assign`, `set-test`, `start`, `stop`, `disable-driver`, `provision`: Admin writes
//! - `fleet`, `export`: Fleet summary and export rows as JSON lines

mod commands;
mod live;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use vitals_core::{get_vitals_dir, load_config, Result, VitalsError};

#[derive(Parser)]
#[command(name = "vitals")]
#[command(about = "Driver vitals monitor")]
#[command(version)]
struct Cli {
    /// Backend store file (JSON tree)
    #[arg(long, global = true, value_name = "FILE")]
    store: Option<PathBuf>,

    /// Monitor configuration (TOML); defaults to ~/.vitals/monitor.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a driver's current view
    Check {
        #[arg(long)]
        driver: String,

        /// Evaluate liveness at this time (ms since epoch) instead of now
        #[arg(long)]
        now: Option<i64>,
    },

    /// Run a driver's live view (stdin: start, stop, retry, quit)
    Watch {
        #[arg(long)]
        driver: String,

        /// Request a start right away instead of waiting for the automatic one
        #[arg(long)]
        start: bool,

        /// Write the store back when the view closes
        #[arg(long)]
        save: bool,
    },

    /// Assign a device to a driver
    Assign {
        #[arg(long)]
        device: String,
        #[arg(long)]
        driver: String,
    },

    /// Mark a device as the shared test device
    SetTest {
        #[arg(long)]
        device: String,
    },

    /// Send a start command on a driver's behalf
    Start {
        #[arg(long)]
        driver: String,

        /// Target device; defaults to the driver's assigned device, else the test device
        #[arg(long)]
        device: Option<String>,
    },

    /// Send a stop command to a device
    Stop {
        #[arg(long)]
        device: String,
    },

    /// Mark a driver inactive
    DisableDriver {
        #[arg(long)]
        driver: String,
    },

    /// Write user, directory and username records for a driver account
    Provision {
        #[arg(long)]
        uid: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: Option<String>,
    },

    /// Print driver and device counts
    Fleet,

    /// Print every driver's reconciled readings as JSON lines, oldest first
    Export,
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init(cli.log_dir.as_deref());

    if let Err(err) = run(cli) {
        tracing::error!(error = %err, "vitals failed");
        std::process::exit(1);
    }
}

fn store_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => get_vitals_dir()
            .map(|dir| dir.join("store.json"))
            .ok_or_else(|| VitalsError::ConfigInvalid("home directory not found".to_string())),
    }
}

fn run(cli: Cli) -> Result<()> {
    let store = store_path(cli.store)?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { driver, now } => commands::check(&store, &driver, &config, now),
        Commands::Watch {
            driver,
            start,
            save,
        } => commands::watch(&store, &driver, &config, start, save),
        Commands::Assign { device, driver } => commands::assign(&store, &device, &driver),
        Commands::SetTest { device } => commands::set_test(&store, &device),
        Commands::Start { driver, device } => commands::start(&store, &driver, device.as_deref()),
        Commands::Stop { device } => commands::stop(&store, &device),
        Commands::DisableDriver { driver } => commands::disable_driver(&store, &driver),
        Commands::Provision {
            uid,
            username,
            email,
        } => commands::provision(&store, &uid, &username, email.as_deref()),
        Commands::Fleet => commands::fleet(&store),
        Commands::Export => commands::export(&store),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vitals",
            "check",
            "--driver",
            "d1",
            "--store",
            "/tmp/store.json",
            "--now",
            "42",
        ])
        .expect("parse");
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/store.json")));
        assert!(matches!(
            cli.command,
            Commands::Check { ref driver, now: Some(42) } if driver == "d1"
        ));
    }

    #[test]
    fn start_device_is_optional() {
        let cli = Cli::try_parse_from(["vitals", "start", "--driver", "d1"]).expect("parse");
        assert!(matches!(cli.command, Commands::Start { device: None, .. }));
    }
}
