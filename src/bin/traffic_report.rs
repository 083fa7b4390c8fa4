//! traffic-report: replays recorded requests and prints the analyzer's view.
//!
//! Usage:
//!   traffic-report <records.jsonl> [--export] [--suggestions]
//!
//! Each input line is one JSON `RequestRecord`
//! (`{"endpoint","method","timestampMs","durationMs","success","responseBytes","cached"}`).
//! Blank lines are skipped; malformed lines are reported and skipped.

use anyhow::{bail, Context};
use api_traffic_optimizer::analyzer::{PerformanceAnalyzer, RequestRecord};
use api_traffic_optimizer::telemetry::init_tracing;
use std::io::{BufRead, BufReader};
use tracing::warn;

fn print_usage() {
    println!(
        r#"traffic-report: API traffic analysis

USAGE:
    traffic-report <records.jsonl> [OPTIONS]

OPTIONS:
    --export         Print the full metrics export instead of the report
    --suggestions    Print only the ranked optimization suggestions
    -h, --help       Show this help message

ENVIRONMENT:
    RUST_LOG         Log filter (default: warn)"#
    );
}

enum Output {
    Report,
    Export,
    Suggestions,
}

fn main() -> anyhow::Result<()> {
    init_tracing("warn");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        return Ok(());
    }

    let mut path = None;
    let mut output = Output::Report;
    for arg in &args {
        match arg.as_str() {
            "--export" => output = Output::Export,
            "--suggestions" => output = Output::Suggestions,
            flag if flag.starts_with('-') => bail!("unknown option: {flag}"),
            p => path = Some(p.to_string()),
        }
    }
    let Some(path) = path else {
        bail!("missing input file");
    };

    let file = std::fs::File::open(&path).with_context(|| format!("cannot open {path}"))?;
    let analyzer = PerformanceAnalyzer::new();
    let mut skipped = 0usize;
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read error at line {}", n + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RequestRecord>(&line) {
            Ok(record) => analyzer.record(record),
            Err(e) => {
                skipped += 1;
                warn!(line = n + 1, error = %e, "skipping malformed record");
            }
        }
    }
    if skipped > 0 {
        eprintln!("skipped {skipped} malformed record(s)");
    }

    match output {
        Output::Report => println!("{}", serde_json::to_string_pretty(&analyzer.report())?),
        Output::Export => println!("{}", analyzer.export_metrics()),
        Output::Suggestions => println!("{}", serde_json::to_string_pretty(&analyzer.suggest())?),
    }
    Ok(())
}
