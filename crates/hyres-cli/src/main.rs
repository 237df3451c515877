//! hyres CLI
//!
//! Command-line interface for the hyperresolution CHC engine.
//!
//! # Usage
//!
//! - `hyres <file.smt2>` - Solve over the default domain `[-8, 8]`
//! - `hyres <file.smt2> --min 0 --max 20 --trace` - Custom domain, log every derivation
//! - `hyres <file.smt2> --format json --verify` - JSON output, re-check the answer
//!
//! Set `RUST_LOG=debug` for classification decisions.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use hyres_chc::{
    normalize_problem, verify_counterexample, verify_solution, ChcParser, EngineConfig,
    FiniteDomainOracle, HyperResolutionEngine, SolveResult, SymbolFactory,
};
use serde_json::json;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hyres")]
#[command(about = "Hyperresolution solver for Constrained Horn Clauses")]
#[command(version)]
struct Cli {
    /// SMT-LIB2 file with the Horn clauses
    file: PathBuf,
    /// Smallest integer value considered by the oracle
    #[arg(long, default_value_t = -8, allow_hyphen_values = true)]
    min: i64,
    /// Largest integer value considered by the oracle
    #[arg(long, default_value_t = 8, allow_hyphen_values = true)]
    max: i64,
    /// Stop with `unknown` after this many iterations
    #[arg(long)]
    max_iterations: Option<usize>,
    /// Abort after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Log every derivation
    #[arg(long)]
    trace: bool,
    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
    /// Re-check the model or counterexample before printing it
    #[arg(long)]
    verify: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_iterations: self.max_iterations,
            timeout: self.timeout_secs.map(Duration::from_secs),
            cancel: None,
            trace: self.trace,
        }
    }
}

/// Solve `input` with the options in `cli` and render the answer
fn solve_input(input: &str, cli: &Cli) -> anyhow::Result<String> {
    let problem = ChcParser::parse(input).context("failed to parse input")?;
    let normalized = normalize_problem(&problem)?;
    let mut oracle = FiniteDomainOracle::new(cli.min, cli.max);
    let mut symbols = SymbolFactory::new();
    let mut engine = HyperResolutionEngine::new(normalized, cli.engine_config());

    let start = Instant::now();
    let result = engine.solve(&mut oracle, &mut symbols)?;
    let stats = engine.stats();
    info!(
        iterations = stats.iterations,
        derivations = stats.derivations,
        inserted = stats.inserted,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "done"
    );

    let relations = &engine.problem().relations;
    if cli.verify {
        let verified = match &result {
            SolveResult::Sat(solution) => verify_solution(solution, &problem, &mut oracle)?,
            SolveResult::Unsat(cex) => verify_counterexample(cex, engine.problem(), &mut oracle)?,
            SolveResult::Unknown => true,
        };
        if !verified {
            bail!("answer failed verification");
        }
    }

    let output = match (cli.format, &result) {
        (Format::Text, SolveResult::Sat(solution)) => {
            format!("sat\n{}", solution.to_smtlib(relations))
        }
        (Format::Text, SolveResult::Unsat(cex)) => {
            format!("unsat\n{}", cex.to_readable_string(relations))
        }
        (Format::Text, SolveResult::Unknown) => "unknown\n".to_string(),
        (Format::Json, SolveResult::Sat(solution)) => {
            let model: serde_json::Map<String, serde_json::Value> = solution
                .interpretations
                .iter()
                .filter_map(|(id, interp)| {
                    let name = relations.get(id.index())?.name.clone();
                    Some((
                        name,
                        json!({
                            "vars": interp.vars.iter().map(|v| v.name.clone()).collect::<Vec<_>>(),
                            "existentials": interp
                                .existentials
                                .iter()
                                .map(|v| v.name.clone())
                                .collect::<Vec<_>>(),
                            "formula": interp.formula.to_string(),
                        }),
                    ))
                })
                .collect();
            format!("{}\n", json!({ "result": "sat", "model": model }))
        }
        (Format::Json, SolveResult::Unsat(cex)) => format!(
            "{}\n",
            json!({ "result": "unsat", "counterexample": cex.to_json(relations) })
        ),
        (Format::Json, SolveResult::Unknown) => format!("{}\n", json!({ "result": "unknown" })),
    };
    Ok(output)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let input = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("failed to read {}", cli.file.display()))?;
    print!("{}", solve_input(&input, &cli)?);
    Ok(())
}
