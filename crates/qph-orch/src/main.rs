//! qphreplay - replays a recorded switch-state sequence through the
//! lookup-class engine.
//!
//! The input file holds a JSON array of switch-state snapshots. Starting
//! from an empty switch, each consecutive pair becomes one state delta;
//! every class assignment the engine computes is printed to stdout as one
//! JSON object per line. Useful for reproducing classification decisions
//! from captured state without a live pipeline.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use qph_orch::lookup_class::{LookupClassOrch, LookupClassOrchCallbacks, RouteClassUpdate};
use qph_orch::state::{StateDelta, SwitchState};

/// Queue-per-host classification replay driver
#[derive(Parser, Debug)]
#[command(name = "qphreplay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a JSON array of switch-state snapshots
    input: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

struct StdoutEmitter;

impl LookupClassOrchCallbacks for StdoutEmitter {
    fn update_route_classes(&self, updates: &[RouteClassUpdate]) {
        for update in updates {
            match serde_json::to_string(update) {
                Ok(line) => println!("{line}"),
                Err(err) => error!("failed to encode update: {err}"),
            }
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .init();

    let raw = match fs::read_to_string(&args.input) {
        Ok(raw) => raw,
        Err(err) => {
            error!("cannot read {}: {err}", args.input.display());
            return ExitCode::FAILURE;
        }
    };
    let snapshots: Vec<SwitchState> = match serde_json::from_str(&raw) {
        Ok(snapshots) => snapshots,
        Err(err) => {
            error!("cannot parse {}: {err}", args.input.display());
            return ExitCode::FAILURE;
        }
    };

    info!("replaying {} snapshots", snapshots.len());

    let mut orch = LookupClassOrch::new(Arc::new(StdoutEmitter));
    let mut previous = Arc::new(SwitchState::default());

    for (index, snapshot) in snapshots.into_iter().enumerate() {
        let next = Arc::new(snapshot);
        let delta = StateDelta::new(previous, Arc::clone(&next));
        if let Err(err) = orch.apply(&delta) {
            // An invariant violation means the bookkeeping can no longer be
            // trusted; bail out instead of replaying further deltas.
            error!("delta {index}: {err}");
            return ExitCode::FAILURE;
        }
        previous = next;
    }

    let stats = orch.stats();
    info!(
        "done: {} deltas, {} classified, {} unclassified, {} updates emitted",
        stats.deltas_applied,
        stats.routes_classified,
        stats.routes_unclassified,
        stats.updates_emitted
    );
    ExitCode::SUCCESS
}
