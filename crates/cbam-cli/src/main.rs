//! CBAM emission ledger CLI.
//!
//! Provides the `cbam` binary for batch recomputation and inspection of a
//! ledger stored in a SQLite database. Recalculation goes through the same
//! `EmissionService::recompute_graph` the HTTP endpoint uses, so both entry
//! points produce identical values.
//!
//! The CLI does not take the server's in-process run lock; do not run a
//! batch recompute against a database a live server is writing to.

use std::process;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde::Serialize;

use cbam_core::id::{EdgeId, ProcessId, ProductId};
use cbam_core::result::PropagationResult;
use cbam_server::error::ApiError;
use cbam_server::schema::edges::{EdgeView, ListEdgesQuery};
use cbam_server::schema::emissions::{
    ChainSummaryView, ProcessEmissionView, ProductEmissionView, ViolationView,
};
use cbam_server::service::{EmissionService, RecomputeOptions};
use cbam_storage::SqliteStore;

/// Exit code for a run that finished with errors, cycles or a timeout.
const EXIT_INCOMPLETE: i32 = 1;
/// Exit code for an unknown record or an invalid argument.
const EXIT_INVALID: i32 = 2;
/// Exit code for database and other I/O failures.
const EXIT_STORAGE: i32 = 3;

/// CBAM emission ledger tools.
#[derive(Parser)]
#[command(name = "cbam", about = "CBAM emission ledger tools")]
struct Cli {
    /// Path to the ledger database file.
    #[arg(short, long, global = true, default_value = "cbam.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Recompute propagated emissions.
    Recalculate {
        /// Check ledger invariants after writing.
        #[arg(long)]
        validate: bool,

        /// Stop writing after this many milliseconds.
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Only recompute forward of this edge's target.
        #[arg(long)]
        trigger_edge: Option<i64>,
    },
    /// Print a process emission record.
    Process { id: i64 },
    /// Print a product emission record.
    Product { id: i64 },
    /// Print the summary of the continue chain starting at a process.
    Chain { id: i64 },
    /// List edges, optionally those touching one node.
    Edges {
        /// Only edges of this kind: continue, produce, consume.
        #[arg(long)]
        kind: Option<String>,

        /// Node kind (process or product), together with --node-id.
        #[arg(long, requires = "node_id")]
        node_kind: Option<String>,

        #[arg(long, requires = "node_kind")]
        node_id: Option<i64>,
    },
}

#[derive(Serialize)]
struct RecalculateOutput {
    #[serde(flatten)]
    result: PropagationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    violations: Option<Vec<ViolationView>>,
}

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let exit_code = match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            exit_code_for(&e)
        }
    };
    process::exit(exit_code);
}

/// Executes the chosen subcommand, printing its JSON output on stdout.
fn run(cli: &Cli) -> Result<i32, ApiError> {
    let mut service = EmissionService::<SqliteStore>::new(&cli.db)?;

    match &cli.command {
        Commands::Recalculate {
            validate,
            deadline_ms,
            trigger_edge,
        } => {
            let options = RecomputeOptions {
                trigger_edge: trigger_edge.map(EdgeId),
                include_validation: *validate,
                deadline: deadline_ms.map(|ms| Instant::now() + Duration::from_millis(ms)),
            };
            let report = service.recompute_graph(&options)?;
            let complete = report.result.is_complete()
                && report.violations.as_ref().is_none_or(|v| v.is_empty());
            print_json(&RecalculateOutput {
                result: report.result,
                violations: report
                    .violations
                    .map(|vs| vs.into_iter().map(ViolationView::from).collect()),
            })?;
            Ok(if complete { 0 } else { EXIT_INCOMPLETE })
        }
        Commands::Process { id } => {
            let record = service.process_emission(ProcessId(*id))?;
            print_json(&ProcessEmissionView::from(record))?;
            Ok(0)
        }
        Commands::Product { id } => {
            let record = service.product_emission(ProductId(*id))?;
            print_json(&ProductEmissionView::from(record))?;
            Ok(0)
        }
        Commands::Chain { id } => {
            let summary = service.chain_summary(ProcessId(*id))?;
            print_json(&ChainSummaryView::from(summary))?;
            Ok(0)
        }
        Commands::Edges {
            kind,
            node_kind,
            node_id,
        } => {
            let filter = ListEdgesQuery {
                edge_kind: kind.clone(),
                node_kind: node_kind.clone(),
                node_id: *node_id,
            }
            .to_filter()?;
            let edges: Vec<EdgeView> = service
                .list_edges(&filter)?
                .into_iter()
                .map(EdgeView::from)
                .collect();
            print_json(&edges)?;
            Ok(0)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ApiError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::InternalError(format!("failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn exit_code_for(err: &ApiError) -> i32 {
    match err {
        ApiError::NotFound(_) | ApiError::BadRequest(_) => EXIT_INVALID,
        _ => EXIT_STORAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_recalculate_flags() {
        let cli = Cli::parse_from(["cbam", "--db", "x.db", "recalculate", "--validate", "--deadline-ms", "250"]);
        assert_eq!(cli.db, "x.db");
        match cli.command {
            Commands::Recalculate {
                validate,
                deadline_ms,
                trigger_edge,
            } => {
                assert!(validate);
                assert_eq!(deadline_ms, Some(250));
                assert!(trigger_edge.is_none());
            }
            _ => panic!("expected recalculate"),
        }
    }

    #[test]
    fn missing_records_map_to_invalid_exit() {
        assert_eq!(exit_code_for(&ApiError::NotFound("x".into())), EXIT_INVALID);
        assert_eq!(exit_code_for(&ApiError::InternalError("x".into())), EXIT_STORAGE);
    }
}
