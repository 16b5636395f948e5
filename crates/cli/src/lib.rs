//! isocop CLI -- elicit isolation anomalies on the simulated backend.

use core::fmt::{self, Display, Formatter};
use core::time::Duration;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::{fs, io};

use clap::{Parser, Subcommand, ValueEnum};
use isocop_core::scenario::{builtin, display};
use isocop_core::session::SessionId;
use isocop_core::{CancelToken, ConnectionPool as _, Dialect, EngineConfig, EngineError, Scenario, ScenarioEngine, ScenarioReport};
use isocop_parser::ParseError;
use isocop_sim::{SimConfig, SimPool};
use rayon::prelude::*;

#[derive(Debug, Parser)]
#[command(
    name = "isocop",
    about = "Deterministically reproduce transaction isolation anomalies"
)]
pub struct App {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the built-in scenarios
    List,
    /// Print a built-in scenario in the .scn format
    Show(ShowArgs),
    /// Run scenarios against the simulated backend
    Run(RunArgs),
    /// Format scenario (.scn) files
    Fmt(FmtArgs),
    /// Print the JSON Schema of a scenario report to stdout
    Schema,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Name of the built-in scenario
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DialectArg {
    Postgres,
    Mysql,
    All,
}

impl DialectArg {
    #[must_use]
    pub fn dialects(self) -> Vec<Dialect> {
        match self {
            Self::Postgres => vec![Dialect::Postgres],
            Self::Mysql => vec![Dialect::MySql],
            Self::All => Dialect::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Backend dialect to emulate
    #[arg(long, value_enum, default_value_t = DialectArg::All)]
    pub dialect: DialectArg,
    /// Scenario to run, or `all`
    #[arg(long, default_value = "all")]
    pub scenario: String,
    /// Read scenarios from a .scn file instead of the built-in catalog
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// How long a session waits for its partner at a barrier
    #[arg(long, default_value_t = 5000)]
    pub barrier_timeout_ms: u64,
    /// Lock wait bound set on every session; must be positive
    #[arg(long, default_value_t = 2000)]
    pub lock_timeout_ms: u64,
    /// Upper bound of a random pause before each statement
    #[arg(long, default_value_t = 0)]
    pub jitter_ms: u64,
    /// Seed of the jitter generator
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
    /// Cancel all runs after this many milliseconds
    #[arg(long)]
    pub cancel_after_ms: Option<u64>,
    /// Print every step of every run
    #[arg(long)]
    pub verbose: bool,
    /// Output reports as JSON (one object per line)
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::builder()
            .barrier_timeout(Duration::from_millis(self.barrier_timeout_ms))
            .lock_timeout(Duration::from_millis(self.lock_timeout_ms))
            .build()
    }

    #[must_use]
    pub fn sim_config(&self, dialect: Dialect) -> SimConfig {
        SimConfig::builder()
            .dialect(dialect)
            .jitter(Duration::from_millis(self.jitter_ms))
            .seed(self.seed)
            .build()
    }
}

#[derive(Debug, Parser)]
pub struct FmtArgs {
    /// Input files or directories to format
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// Check formatting without modifying files (exit 1 if unformatted)
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug)]
pub enum CliError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: ParseError },
    UnknownScenario(String),
    NoScenarios(PathBuf),
    Engine(EngineError),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Parse { path, source } => write!(f, "{}: {source}", path.display()),
            Self::UnknownScenario(name) => write!(f, "unknown scenario `{name}`"),
            Self::NoScenarios(path) => write!(f, "{}: no scenario found", path.display()),
            Self::Engine(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

/// Read and parse every scenario of a `.scn` file.
///
/// # Errors
///
/// Returns [`CliError::Io`] or [`CliError::Parse`].
pub fn read_scenarios(path: &Path) -> Result<Vec<Scenario>, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    isocop_parser::parse_scenarios(&text).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The scenarios a `run` asks for, from `--file` or the built-in catalog.
///
/// # Errors
///
/// Fails when the file cannot be read or parsed, holds no scenario, or
/// `--scenario` names none of the candidates.
pub fn select_scenarios(args: &RunArgs) -> Result<Vec<Scenario>, CliError> {
    let candidates = match &args.file {
        Some(path) => {
            let scenarios = read_scenarios(path)?;
            if scenarios.is_empty() {
                return Err(CliError::NoScenarios(path.clone()));
            }
            scenarios
        }
        None => builtin::all(),
    };
    if args.scenario == "all" {
        return Ok(candidates);
    }
    let picked: Vec<Scenario> = candidates
        .into_iter()
        .filter(|s| s.name() == args.scenario)
        .collect();
    if picked.is_empty() {
        Err(CliError::UnknownScenario(args.scenario.clone()))
    } else {
        Ok(picked)
    }
}

/// Run `scenarios` at every level of every requested dialect.
///
/// Dialects run in parallel, each on its own simulated database. Reports come
/// back grouped by dialect, then scenario, then ascending level.
///
/// # Errors
///
/// Returns [`CliError::Engine`] when the engine configuration is invalid for
/// one of the dialects; nothing runs in that case.
pub fn run_reports(
    args: &RunArgs,
    scenarios: &[Scenario],
    cancel: &CancelToken,
) -> Result<Vec<ScenarioReport>, CliError> {
    let config = args.engine_config();
    let pools: Vec<SimPool> = args
        .dialect
        .dialects()
        .into_iter()
        .map(|dialect| SimPool::new(args.sim_config(dialect)))
        .collect();
    let engines = pools
        .iter()
        .map(|pool| {
            ScenarioEngine::new(pool, config.clone())
                .map(|engine| engine.with_cancel_token(cancel.clone()))
                .map_err(EngineError::from)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let reports = pools
        .par_iter()
        .zip(engines.par_iter())
        .map(|(pool, engine)| {
            tracing::info!(backend = %pool.name(), scenarios = scenarios.len(), "starting sweep");
            scenarios
                .iter()
                .flat_map(|scenario| engine.run_levels(scenario))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    Ok(reports.into_iter().flatten().collect())
}

/// One line per report, followed by its steps when `verbose`.
#[must_use]
pub fn render_report(report: &ScenarioReport, verbose: bool) -> String {
    let mut out = format!(
        "{:<8} {:<20} {:<17} {:<18} {} ms",
        report.dialect().name(),
        report.scenario(),
        report.isolation_level().sql_name(),
        report.verdict().name(),
        report.total_elapsed().as_millis(),
    );
    if let Some(failure) = report.failure() {
        let _ = write!(out, " ({}: {})", failure.kind, failure.message);
    }
    if !verbose {
        return out;
    }
    for (key, value) in report.captures() {
        let _ = write!(out, "\n  {key} = {}", value.to_sql_literal());
    }
    let fixture = report.fixture().iter();
    let steps = SessionId::BOTH
        .into_iter()
        .flat_map(|session| report.steps(session));
    for step in fixture.chain(steps) {
        let _ = write!(
            out,
            "\n  {:>8}us {} #{:<2} {:<16}",
            step.offset_micros(),
            step.session(),
            step.index(),
            step.label(),
        );
        match (step.error_kind(), step.message()) {
            (Some(kind), Some(message)) => {
                let _ = write!(out, " FAIL {kind}: {message}");
            }
            (Some(kind), None) => {
                let _ = write!(out, " FAIL {kind}");
            }
            _ => {
                if let Some(value) = step.value() {
                    let _ = write!(out, " -> {}", value.to_sql_literal());
                }
            }
        }
    }
    out
}

/// Normalize the text of a `.scn` file.
///
/// # Errors
///
/// Returns the [`ParseError`] of malformed input.
pub fn format_text(text: &str) -> Result<String, ParseError> {
    let scenarios = isocop_parser::parse_scenarios(text)?;
    Ok(display::format_scenarios(&scenarios))
}

/// Expand directories to the `.scn` files they contain, sorted.
///
/// # Errors
///
/// Returns [`CliError::Io`] for an unreadable directory.
pub fn collect_scn_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>, CliError> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        let entries = fs::read_dir(path).map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        })?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "scn"))
            .collect();
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use isocop_core::Verdict;

    use super::*;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["isocop", "run"];
        argv.extend_from_slice(extra);
        match App::parse_from(argv).command {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn test_run_defaults() {
        let args = run_args(&[]);
        assert_eq!(args.dialect, DialectArg::All);
        assert_eq!(args.scenario, "all");
        let config = args.engine_config();
        assert_eq!(config.barrier_timeout, Duration::from_secs(5));
        assert_eq!(config.lock_timeout, Duration::from_secs(2));
        assert_eq!(select_scenarios(&args).unwrap().len(), builtin::NAMES.len());
    }

    #[test]
    fn test_unknown_scenario() {
        let args = run_args(&["--scenario", "write-skew"]);
        assert!(matches!(
            select_scenarios(&args),
            Err(CliError::UnknownScenario(name)) if name == "write-skew"
        ));
    }

    #[test]
    fn test_run_one_scenario_on_postgres() {
        let args = run_args(&[
            "--dialect",
            "postgres",
            "--scenario",
            "dirty-read",
            "--barrier-timeout-ms",
            "2000",
            "--lock-timeout-ms",
            "500",
        ]);
        let scenarios = select_scenarios(&args).unwrap();
        let reports = run_reports(&args, &scenarios, &CancelToken::new()).unwrap();
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.verdict() == Verdict::AnomalyPrevented));
        let line = render_report(&reports[0], false);
        assert!(line.starts_with("postgres dirty-read"), "{line}");
        assert!(line.contains("anomaly-prevented"));
        let detailed = render_report(&reports[0], true);
        assert!(detailed.contains("query dirty"), "{detailed}");
    }

    #[test]
    fn test_invalid_config_runs_nothing() {
        let args = run_args(&[
            "--dialect",
            "mysql",
            "--barrier-timeout-ms",
            "500",
            "--lock-timeout-ms",
            "100",
        ]);
        let scenarios = select_scenarios(&args).unwrap();
        let err = run_reports(&args, &scenarios, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, CliError::Engine(EngineError::Config(_))));
    }

    #[test]
    fn test_cancelled_runs_are_engine_errors() {
        let args = run_args(&["--dialect", "all", "--scenario", "lost-update"]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let reports = run_reports(&args, &select_scenarios(&args).unwrap(), &cancel).unwrap();
        assert_eq!(reports.len(), 7);
        assert!(reports.iter().all(|r| r.verdict() == Verdict::EngineError));
        assert!(render_report(&reports[0], false).contains("cancelled"));
    }

    #[test]
    fn test_reports_serialize_to_json() {
        let args = run_args(&["--dialect", "mysql", "--scenario", "phantom-read"]);
        let reports = run_reports(&args, &select_scenarios(&args).unwrap(), &CancelToken::new()).unwrap();
        let json = serde_json::to_value(&reports[0]).unwrap();
        assert_eq!(json["scenario"], "phantom-read");
        assert_eq!(json["verdict"], "anomaly-observed");
        assert_eq!(json["captures"]["c1"], 2);
        assert_eq!(json["dialect"], serde_json::to_value(Dialect::MySql).unwrap());
    }

    #[test]
    fn test_format_text_normalizes() {
        let messy = "scenario  x\n   A: query a = SELECT 1\nB:   query b = SELECT 2   \nverdict changed a b\n";
        let formatted = format_text(messy).unwrap();
        assert_eq!(
            formatted,
            "scenario x\n\nA: query a = SELECT 1\n\nB: query b = SELECT 2\n\nverdict changed a b\n"
        );
        assert_eq!(format_text(&formatted).unwrap(), formatted);
        assert!(format_text("scenario x\nA: fly\n").is_err());
    }

    #[test]
    fn test_decoded_scenarios_are_validated() {
        let scenario = builtin::dirty_read().unwrap();
        let json = serde_json::to_value(&scenario).unwrap();
        let decoded: Scenario = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(decoded, scenario);

        let mut unnamed = json.clone();
        unnamed["name"] = "".into();
        let err = serde_json::from_value::<Scenario>(unnamed).unwrap_err();
        assert!(err.to_string().contains("name"), "{err}");

        let mut doubled = json;
        let steps = doubled["steps"].as_array_mut().unwrap();
        let read = steps
            .iter()
            .find(|step| step["capture"] == "dirty")
            .cloned()
            .unwrap();
        steps.push(read);
        let err = serde_json::from_value::<Scenario>(doubled).unwrap_err();
        assert!(err.to_string().contains("capture `dirty` is recorded twice"), "{err}");
    }
}
