//! Command-line entry point for running simulations and inspecting audit chains.

#![deny(unsafe_code)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use warden_core::config::IngestMode;
use warden_core::PipelineError;
use warden_orchestrator::RunRequest;

#[derive(Parser, Debug)]
#[command(name = "warden", about = "Run oversight-pipeline simulations and inspect their audit trails")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one simulation end to end.
    Simulate {
        #[arg(long)]
        scenario: Option<PathBuf>,
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        policy_pack: Option<PathBuf>,
        #[arg(long, value_parser = parse_ingest_mode)]
        ingest_mode: Option<IngestMode>,
        #[arg(long)]
        approver_id: Option<String>,
        #[arg(long)]
        approver_token: Option<String>,
    },
    /// Verify an existing audit log's hash chain (and signatures, if configured) standalone.
    VerifyAudit {
        #[arg(long)]
        audit: PathBuf,
        #[arg(long)]
        sign_secret: Option<String>,
        #[arg(long, default_value_t = false)]
        require_signing: bool,
    },
}

fn parse_ingest_mode(raw: &str) -> Result<IngestMode, String> {
    match raw {
        "scenario" => Ok(IngestMode::Scenario),
        "tail" => Ok(IngestMode::Tail),
        "modules_media" => Ok(IngestMode::ModulesMedia),
        other => Err(format!("unknown ingest mode '{other}' (expected scenario|tail|modules_media)")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.cmd {
        Command::Simulate { scenario, config, out, policy_pack, ingest_mode, approver_id, approver_token } => {
            run_simulate(scenario, config, out, policy_pack, ingest_mode, approver_id, approver_token)
        }
        Command::VerifyAudit { audit, sign_secret, require_signing } => {
            run_verify_audit(&audit, sign_secret.as_deref(), require_signing)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(category = e.category(), message = %e, "warden exited with an error");
            eprintln!("error[{}]: {e}", e.category());
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_simulate(
    scenario: Option<PathBuf>,
    config: PathBuf,
    out: PathBuf,
    policy_pack: Option<PathBuf>,
    ingest_mode: Option<IngestMode>,
    approver_id: Option<String>,
    approver_token: Option<String>,
) -> Result<(), PipelineError> {
    let request = RunRequest {
        scenario_path: scenario,
        config_path: config,
        out_dir: out,
        policy_pack,
        ingest_mode_override: ingest_mode,
        approver_id,
        approver_token,
        cancel: Arc::new(AtomicBool::new(false)),
    };
    let outcome = warden_orchestrator::run(&request)?;
    println!(
        "events={} approved={} pending={} risk_held={} export_failures={}",
        outcome.event_count,
        outcome.approved_count,
        outcome.pending_count,
        outcome.risk_held_count,
        outcome.export_failures.len(),
    );
    for failure in &outcome.export_failures {
        eprintln!("export sink '{}' failed: {}", failure.sink, failure.message);
    }
    Ok(())
}

fn run_verify_audit(audit: &PathBuf, sign_secret: Option<&str>, require_signing: bool) -> Result<(), PipelineError> {
    warden_audit::verify_chain(audit, sign_secret, require_signing)?;
    println!("audit chain ok: {}", audit.display());
    Ok(())
}
