//! Operator recompute tool — forces a fresh assessment for one case.
//!
//! Standalone binary for support and ops runbooks: runs the same pipeline the
//! event lifecycle runs and prints the persisted record as pretty JSON.
//!
//! Build: `cargo build --bin caseintel-recompute`
//! Usage: `caseintel-recompute <case_id> [decision_type] [--actor NAME]`
//!
//! The actor defaults to "system", which bypasses the debounce window. Pass
//! `--actor` to attribute the run to a person in the audit trail; unprivileged
//! actors are throttled inside the window like any other manual recompute.

use std::process;
use std::sync::Arc;

use caseintel::case_reader::SqliteCaseReader;
use caseintel::db::CaseDb;
use caseintel::intelligence::lifecycle;
use caseintel::registry::DECISION_CSF;
use caseintel::state::{load_config, EngineState};
use caseintel::types::SYSTEM_ACTOR;

const USAGE: &str = "Usage: caseintel-recompute <case_id> [decision_type] [--actor NAME]";

struct Args {
    case_id: String,
    decision_type: String,
    actor: String,
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut case_id: Option<String> = None;
    let mut decision_type: Option<String> = None;
    let mut actor = SYSTEM_ACTOR.to_string();

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--actor" => {
                actor = argv.next().ok_or("--actor requires a value")?;
            }
            "--help" | "-h" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => {
                return Err(format!("Unknown flag: {flag}\n{USAGE}"));
            }
            positional => {
                if case_id.is_none() {
                    case_id = Some(positional.to_string());
                } else if decision_type.is_none() {
                    decision_type = Some(positional.to_string());
                } else {
                    return Err(format!("Unexpected argument: {positional}\n{USAGE}"));
                }
            }
        }
    }

    Ok(Args {
        case_id: case_id.ok_or_else(|| format!("Missing case_id\n{USAGE}"))?,
        decision_type: decision_type.unwrap_or_else(|| DECISION_CSF.to_string()),
        actor,
    })
}

async fn run(args: Args) -> Result<(), String> {
    let config = load_config()?;

    let db = CaseDb::open().map_err(|e| format!("Failed to open database: {e}"))?;
    let reader =
        SqliteCaseReader::at_default_path().map_err(|e| format!("Failed to open reader: {e}"))?;

    lifecycle::apply_feature_flags(&config);
    let state = Arc::new(EngineState::new(config, db, Arc::new(reader)));

    let record = lifecycle::recompute(&state, &args.case_id, &args.decision_type, &args.actor)
        .await
        .map_err(|e| format!("{e}\n  hint: {}", e.recovery_suggestion()))?;

    let json = serde_json::to_string_pretty(&record)
        .map_err(|e| format!("Failed to serialize record: {e}"))?;
    println!("{json}");

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            process::exit(1);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
