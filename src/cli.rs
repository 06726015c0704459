//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_catalog_adapter::JsonCatalogAdapter;
use crate::adapters::memory_result_adapter::MemoryResultAdapter;
use crate::domain::config_validation::parse_date;
use crate::domain::error::ProbeError;
use crate::domain::risk::RiskProfile;
use crate::domain::run_tracker::{RunStatus, RunSummary};
use crate::domain::runner::{ParallelRunner, RunReport, RunRequest, RunnerConfig};
use crate::domain::strategy::{StrategyRegistry, StrategySpec};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::result_port::ResultPort;
use crate::ports::strategy_port::StrategySourcePort;

/// Exit code for a run that finished with some combinations not completed.
pub const EXIT_PARTIAL: u8 = 7;

#[derive(Parser, Debug)]
#[command(
    name = "stratprobe",
    version,
    about = "Concurrent strategy probe over historical bar series"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate every strategy against every symbol, timeframe and risk profile
    Run(RunArgs),
    /// List the strategies in a catalog
    ListStrategies {
        #[arg(long)]
        catalog: PathBuf,
    },
    /// Validate every condition tree in a catalog
    Validate {
        #[arg(long)]
        catalog: PathBuf,
    },
    /// Show the persisted summary of one run
    Status {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        run_id: String,
    },
    /// List recent runs
    Runs {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Export aggregate rows of a run as CSV
    Results {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        symbol: Option<String>,
        #[arg(long)]
        timeframe: Option<String>,
        #[arg(long)]
        strategy: Option<u32>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load a CSV bar file into the SQLite bar store
    Import {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        timeframe: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[arg(short, long)]
    pub config: PathBuf,
    /// Strategy catalog; overrides `[catalog] path`
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub timeframes: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    pub risk_profiles: Vec<String>,
    #[arg(long)]
    pub start: Option<NaiveDate>,
    #[arg(long)]
    pub end: Option<NaiveDate>,
    /// Resume an earlier run
    #[arg(long)]
    pub run_id: Option<String>,
    /// Only run these strategy ids
    #[arg(long = "strategy", num_args = 1..)]
    pub strategies: Vec<u32>,
    #[arg(long)]
    pub workers: Option<usize>,
    #[arg(long)]
    pub deadline_secs: Option<u64>,
    /// Keep results in memory instead of the SQLite store
    #[arg(long)]
    pub no_persist: bool,
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Run(args) => run_probe(&args),
        Command::ListStrategies { catalog } => run_list_strategies(&catalog),
        Command::Validate { catalog } => run_validate(&catalog),
        Command::Status { config, run_id } => run_status(&config, &run_id),
        Command::Runs {
            config,
            status,
            symbol,
            limit,
        } => run_list_runs(&config, status.as_deref(), symbol.as_deref(), limit),
        Command::Results {
            config,
            run_id,
            symbol,
            timeframe,
            strategy,
            output,
        } => run_results(
            &config,
            &run_id,
            symbol.as_deref(),
            timeframe.as_deref(),
            strategy,
            output.as_deref(),
        ),
        Command::Import {
            config,
            csv,
            symbol,
            timeframe,
        } => run_import(&config, &csv, &symbol, &timeframe),
    }
}

fn fail(err: &ProbeError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

fn load_specs(path: &Path) -> Result<Vec<StrategySpec>, ProbeError> {
    JsonCatalogAdapter::new(path.to_path_buf()).load_strategies()
}

fn catalog_path(config: &dyn ConfigPort, flag: Option<&PathBuf>) -> Result<PathBuf, ProbeError> {
    match flag {
        Some(path) => Ok(path.clone()),
        None => config
            .get_string("catalog", "path")
            .map(PathBuf::from)
            .ok_or_else(|| ProbeError::ConfigMissing {
                section: "catalog".into(),
                key: "path".into(),
            }),
    }
}

/// Merge `[run]` with the command-line overrides. Flags win.
pub fn build_request(config: &dyn ConfigPort, args: &RunArgs) -> Result<RunRequest, ProbeError> {
    let list = |flag: &[String], key: &str| -> Result<Vec<String>, ProbeError> {
        if !flag.is_empty() {
            return Ok(flag.iter().map(|s| s.trim().to_string()).collect());
        }
        config
            .get_list("run", key)
            .ok_or_else(|| ProbeError::ConfigMissing {
                section: "run".into(),
                key: key.into(),
            })
    };
    let symbols = list(&args.symbols, "symbols")?;
    let timeframes = list(&args.timeframes, "timeframes")?;

    let risk_names = if args.risk_profiles.is_empty() {
        config
            .get_list("run", "risk_profiles")
            .unwrap_or_else(|| vec!["medium".to_string()])
    } else {
        args.risk_profiles.clone()
    };
    let risk_profiles = risk_names
        .iter()
        .map(|name| RiskProfile::from_config(config, name.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    let start = match args.start {
        Some(date) => date,
        None => parse_date(config.get_string("run", "start_date").as_deref(), "start_date")?,
    };
    let end = match args.end {
        Some(date) => date,
        None => parse_date(config.get_string("run", "end_date").as_deref(), "end_date")?,
    };

    let mut request = RunRequest::new(symbols, timeframes, start, end);
    request.risk_profiles = risk_profiles;
    request.run_id = args.run_id.clone();
    request.strategy_ids = args.strategies.clone();
    request.validate()?;
    Ok(request)
}

pub fn build_runner_config(
    config: &dyn ConfigPort,
    args: &RunArgs,
) -> Result<RunnerConfig, ProbeError> {
    let mut runner = RunnerConfig::from_config(config)?;
    if let Some(workers) = args.workers {
        runner.workers = workers;
    }
    if let Some(secs) = args.deadline_secs {
        runner.deadline = (secs > 0).then(|| std::time::Duration::from_secs(secs));
    }
    Ok(runner)
}

type SharedData = Arc<dyn DataPort + Send + Sync>;
type SharedStore = Arc<dyn ResultPort + Send + Sync>;

fn open_data_source(config: &dyn ConfigPort) -> Result<SharedData, ProbeError> {
    let source = config
        .get_string("data", "source")
        .unwrap_or_else(|| "csv".to_string())
        .to_lowercase();
    match source.as_str() {
        "csv" => {
            let dir = config
                .get_string("data", "csv_dir")
                .ok_or_else(|| ProbeError::ConfigMissing {
                    section: "data".into(),
                    key: "csv_dir".into(),
                })?;
            Ok(Arc::new(CsvAdapter::new(PathBuf::from(dir))))
        }
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            use crate::adapters::sqlite_adapter::SqliteAdapter;
            Ok(Arc::new(SqliteAdapter::from_config(config)?))
        }
        other => Err(ProbeError::ConfigInvalid {
            section: "data".into(),
            key: "source".into(),
            reason: format!("unsupported data source '{}'", other),
        }),
    }
}

#[cfg(feature = "sqlite")]
fn open_store(config: &dyn ConfigPort) -> Result<SharedStore, ProbeError> {
    use crate::adapters::sqlite_adapter::SqliteAdapter;
    Ok(Arc::new(SqliteAdapter::from_config(config)?))
}

#[cfg(not(feature = "sqlite"))]
fn open_store(_config: &dyn ConfigPort) -> Result<SharedStore, ProbeError> {
    Err(ProbeError::ConfigInvalid {
        section: "sqlite".into(),
        key: "path".into(),
        reason: "built without the sqlite feature; use --no-persist".into(),
    })
}

pub fn run_probe(args: &RunArgs) -> ExitCode {
    eprintln!("Loading config from {}", args.config.display());
    let config = match load_config(&args.config) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let request = match build_request(&config, args) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };
    let runner_config = match build_runner_config(&config, args) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    let catalog = match catalog_path(&config, args.catalog.as_ref()) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    eprintln!("Loading strategies from {}", catalog.display());
    let registry = match load_specs(&catalog).and_then(|specs| StrategyRegistry::from_specs(&specs))
    {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    let data = match open_data_source(&config) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };
    let store: SharedStore = if args.no_persist {
        Arc::new(MemoryResultAdapter::new())
    } else {
        match open_store(&config) {
            Ok(s) => s,
            Err(e) => return fail(&e),
        }
    };

    eprintln!(
        "Probing {} strategies x {} symbols x {} timeframes x {} risk profiles ({} workers)",
        if request.strategy_ids.is_empty() {
            registry.len()
        } else {
            request.strategy_ids.len()
        },
        request.symbols.len(),
        request.timeframes.len(),
        request.risk_profiles.len(),
        runner_config.effective_workers(),
    );

    let runner = ParallelRunner::new(Arc::new(registry), data, store, runner_config);
    match runner.submit(&request) {
        Ok(report) => {
            print_report(&report);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_PARTIAL)
            }
        }
        Err(e) => fail(&e),
    }
}

pub fn print_report(report: &RunReport) {
    let c = &report.counts;
    println!("Run {}: {}", report.run_id, report.outcome.as_str());
    println!(
        "  jobs:      {} submitted, {} completed, {} resumed, {} data-skipped, {} failed, {} cancelled",
        c.submitted, c.completed, c.resumed, c.data_skipped, c.failed, c.cancelled
    );
    println!("  trades:    {}", report.total_trades);
    println!(
        "  written:   {} rows, {} trades, {} jobs",
        report.written.rows_inserted, report.written.trades_inserted, report.written.jobs_marked
    );
    if report.failed_batches > 0 {
        println!("  failed batches: {}", report.failed_batches);
    }
    if report.cancelled {
        println!("  cancelled before all jobs ran");
    }
    println!("  elapsed:   {:.2}s", report.elapsed.as_secs_f64());
    if !report.failures.is_empty() {
        println!("\nNot completed:");
        for failure in &report.failures {
            println!(
                "  {} [{}] {}",
                failure.key,
                failure.status.as_str(),
                failure.message
            );
        }
    }
}

pub fn run_list_strategies(catalog: &Path) -> ExitCode {
    let registry = match load_specs(catalog).and_then(|specs| StrategyRegistry::from_specs(&specs))
    {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    println!(
        "{:>5}  {:<32} {:<16} {:<10}",
        "ID", "NAME", "CATEGORY", "DIRECTION"
    );
    for def in registry.all() {
        println!(
            "{:>5}  {:<32} {:<16} {:<10}",
            def.id,
            def.name,
            def.category,
            def.direction.as_str()
        );
    }
    eprintln!("{} strategies", registry.len());
    ExitCode::SUCCESS
}

pub fn run_validate(catalog: &Path) -> ExitCode {
    eprintln!("Validating catalog: {}", catalog.display());
    let specs = match load_specs(catalog) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };

    let mut problems = 0usize;
    for spec in &specs {
        for err in spec.validate_conditions() {
            eprintln!("  strategy {} ({}): {}", spec.id, spec.name, err);
            problems += 1;
        }
    }
    if problems == 0 {
        if let Err(e) = StrategyRegistry::from_specs(&specs) {
            eprintln!("  {e}");
            problems += 1;
        }
    }

    if problems > 0 {
        eprintln!("\n{} problem(s) found in {} strategies", problems, specs.len());
        return ExitCode::from(4);
    }
    eprintln!("\nCatalog is valid: {} strategies", specs.len());
    ExitCode::SUCCESS
}

fn print_summary(summary: &RunSummary) {
    let c = &summary.counts;
    println!("Run:         {}", summary.run_id);
    println!("Status:      {}", summary.status.as_str());
    println!("Symbols:     {}", summary.symbols.join(", "));
    println!("Timeframes:  {}", summary.timeframes.join(", "));
    println!("Risk:        {}", summary.risk_profiles.join(", "));
    println!("Started:     {}", summary.started_at.format("%Y-%m-%d %H:%M:%S"));
    match summary.finished_at {
        Some(at) => println!("Finished:    {}", at.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Finished:    -"),
    }
    println!(
        "Jobs:        {} submitted, {} completed, {} resumed, {} data-skipped, {} failed, {} cancelled",
        c.submitted, c.completed, c.resumed, c.data_skipped, c.failed, c.cancelled
    );
    println!("Trades:      {}", summary.total_trades);
    if summary.failed_batches > 0 {
        println!("Failed batches: {}", summary.failed_batches);
    }
    if let Some(message) = &summary.message {
        println!("Message:     {}", message);
    }
}

pub fn run_status(config_path: &Path, run_id: &str) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    match store.load_run(run_id) {
        Ok(Some(summary)) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Ok(None) => {
            eprintln!("error: no run with id {}", run_id);
            ExitCode::from(1)
        }
        Err(e) => fail(&e),
    }
}

pub fn run_list_runs(
    config_path: &Path,
    status: Option<&str>,
    symbol: Option<&str>,
    limit: usize,
) -> ExitCode {
    let status = match status {
        Some(s) => match RunStatus::parse(s) {
            Some(st) => Some(st),
            None => {
                eprintln!("error: unknown run status '{}'", s);
                return ExitCode::from(2);
            }
        },
        None => None,
    };
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let runs = match store.list_runs(status, symbol, limit) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    if runs.is_empty() {
        eprintln!("No runs found");
        return ExitCode::SUCCESS;
    }
    println!(
        "{:<10} {:<20} {:<20} {:>6} {:>6} {:>8}",
        "RUN", "STATUS", "STARTED", "JOBS", "FAILED", "TRADES"
    );
    for run in &runs {
        println!(
            "{:<10} {:<20} {:<20} {:>6} {:>6} {:>8}",
            run.run_id,
            run.status.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.counts.submitted,
            run.counts.failed,
            run.total_trades
        );
    }
    eprintln!("{} runs", runs.len());
    ExitCode::SUCCESS
}

pub fn run_results(
    config_path: &Path,
    run_id: &str,
    symbol: Option<&str>,
    timeframe: Option<&str>,
    strategy: Option<u32>,
    output: Option<&Path>,
) -> ExitCode {
    use crate::adapters::csv_report_adapter::CsvReportAdapter;
    use crate::ports::report_port::ReportPort;
    use crate::ports::result_port::ResultFilter;

    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let filter = ResultFilter {
        run_id: Some(run_id.to_string()),
        symbol: symbol.map(str::to_string),
        timeframe: timeframe.map(str::to_string),
        strategy_id: strategy,
        risk_profile: None,
    };
    let rows = match store.fetch_results(&filter) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };
    if let Err(e) = CsvReportAdapter::new().write_results(&rows, output) {
        return fail(&e);
    }
    match output {
        Some(path) => eprintln!("{} rows written to {}", rows.len(), path.display()),
        None => eprintln!("{} rows", rows.len()),
    }
    ExitCode::SUCCESS
}

#[cfg(feature = "sqlite")]
pub fn run_import(config_path: &Path, csv: &Path, symbol: &str, timeframe: &str) -> ExitCode {
    use crate::adapters::csv_adapter::load_csv_file;
    use crate::adapters::sqlite_adapter::SqliteAdapter;

    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let series = match load_csv_file(csv, symbol, timeframe, None) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    let store = match SqliteAdapter::from_config(&config) {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    match store.insert_series(&series) {
        Ok(n) => {
            eprintln!(
                "Imported {} bars for {} ({})",
                n,
                series.symbol(),
                timeframe
            );
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

#[cfg(not(feature = "sqlite"))]
pub fn run_import(_config_path: &Path, _csv: &Path, _symbol: &str, _timeframe: &str) -> ExitCode {
    eprintln!("error: sqlite feature is required for import");
    ExitCode::from(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const BASE: &str = "[run]\nsymbols = AAPL,MSFT\ntimeframes = 1Hour\n\
                        start_date = 2024-01-01\nend_date = 2024-06-30\n";

    fn args() -> RunArgs {
        RunArgs {
            config: PathBuf::from("probe.ini"),
            ..Default::default()
        }
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "stratprobe",
            "run",
            "--config",
            "probe.ini",
            "--symbols",
            "AAPL,NVDA",
            "--strategy",
            "3",
            "7",
            "--start",
            "2024-02-01",
            "--no-persist",
        ])
        .unwrap();
        let Command::Run(run) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(run.symbols, vec!["AAPL", "NVDA"]);
        assert_eq!(run.strategies, vec![3, 7]);
        assert_eq!(run.start, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert!(run.no_persist);
    }

    #[test]
    fn request_comes_from_config() {
        let request = build_request(&config(BASE), &args()).unwrap();
        assert_eq!(request.symbols, vec!["AAPL", "MSFT"]);
        assert_eq!(request.risk_profiles.len(), 1);
        assert_eq!(request.risk_profiles[0].name, "medium");
    }

    #[test]
    fn flags_override_config() {
        let mut a = args();
        a.symbols = vec!["TSLA".into()];
        a.risk_profiles = vec!["low".into(), "high".into()];
        a.end = NaiveDate::from_ymd_opt(2024, 3, 1);
        a.strategies = vec![2];
        let request = build_request(&config(BASE), &a).unwrap();
        assert_eq!(request.symbols, vec!["TSLA"]);
        assert_eq!(request.risk_profiles.len(), 2);
        assert_eq!(request.end, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(request.strategy_ids, vec![2]);
    }

    #[test]
    fn missing_symbols_is_config_missing() {
        let err = build_request(&config("[run]\ntimeframes = 1Day\n"), &args()).unwrap_err();
        assert!(matches!(err, ProbeError::ConfigMissing { key, .. } if key == "symbols"));
    }

    #[test]
    fn reversed_dates_are_rejected() {
        let mut a = args();
        a.start = NaiveDate::from_ymd_opt(2024, 7, 1);
        let err = build_request(&config(BASE), &a).unwrap_err();
        assert!(matches!(err, ProbeError::ConfigInvalid { key, .. } if key == "start_date"));
    }

    #[test]
    fn runner_overrides_apply() {
        let mut a = args();
        a.workers = Some(3);
        a.deadline_secs = Some(90);
        let runner = build_runner_config(&config(BASE), &a).unwrap();
        assert_eq!(runner.workers, 3);
        assert_eq!(runner.deadline, Some(std::time::Duration::from_secs(90)));
    }

    #[test]
    fn catalog_flag_wins_over_config() {
        let cfg = config("[catalog]\npath = /etc/catalog.json\n");
        let flag = PathBuf::from("mine.json");
        assert_eq!(catalog_path(&cfg, Some(&flag)).unwrap(), flag);
        assert_eq!(
            catalog_path(&cfg, None).unwrap(),
            PathBuf::from("/etc/catalog.json")
        );
        assert!(catalog_path(&config(""), None).is_err());
    }

    #[test]
    fn unknown_data_source_is_invalid() {
        let err = open_data_source(&config("[data]\nsource = parquet\n"))
            .err()
            .unwrap();
        assert!(matches!(err, ProbeError::ConfigInvalid { key, .. } if key == "source"));
    }
}
