//! Command-line front end.
//!
//! `analyze` reads tabular JSON (an array of row objects or JSON Lines),
//! runs the engine and prints either human tables or the full JSON report.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Duration;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::{AuditConfig, ConfigError};
use crate::error::EngineError;
use crate::model::timestamp::{Timestamp, parse_timestamp};
use crate::model::{Column, Flag, RawTable};
use crate::output::render_report;
use crate::pipeline::Engine;
use crate::query::{DateRange, FilterCriteria, filter_events, filter_records};
use crate::sample::{DEFAULT_ROWS, generate};
use crate::scoring::StrategyKind;

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "POCT_AUDIT_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "poct-audit",
    version,
    about = "Flag suspicious point-of-care testing patterns and score operators"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, env = "POCT_AUDIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit machine-readable JSON, including errors
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a device log
    Analyze(AnalyzeArgs),

    /// Print a demo dataset with planted anomalies
    Sample {
        /// Regular rows before the planted anomalies
        #[arg(long, default_value_t = DEFAULT_ROWS)]
        rows: usize,
    },

    /// Print the effective configuration
    Config {
        /// Print the default config path instead
        #[arg(long)]
        path: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct AnalyzeArgs {
    /// JSON array or JSON Lines file; `-` reads stdin
    pub input: PathBuf,

    /// Keep events of these operators
    #[arg(long = "operator")]
    pub operators: Vec<String>,

    /// Keep events on these devices
    #[arg(long = "device")]
    pub devices: Vec<String>,

    /// Keep events with these barcodes
    #[arg(long = "barcode")]
    pub barcodes: Vec<String>,

    /// Keep events raising any of these flags (e.g. RAPID, SHARED_KEY)
    #[arg(long = "flag", value_parser = parse_flag)]
    pub flags: Vec<Flag>,

    /// Earliest timestamp to show (inclusive)
    #[arg(long, value_parser = parse_since)]
    pub since: Option<Timestamp>,

    /// Latest timestamp to show (inclusive; a bare date covers the whole day)
    #[arg(long, value_parser = parse_until)]
    pub until: Option<Timestamp>,

    /// Keep events whose operator scores at least this much
    #[arg(long)]
    pub min_score: Option<f64>,

    /// Override the configured scoring strategy
    #[arg(long, value_enum)]
    pub scoring: Option<StrategyKind>,

    /// Also run the legacy "Shared barcode" and "Rapid succession" rules
    #[arg(long)]
    pub legacy_rules: bool,
}

impl AnalyzeArgs {
    pub fn criteria(&self) -> FilterCriteria {
        FilterCriteria {
            operator_ids: self.operators.clone(),
            device_ids: self.devices.clone(),
            barcodes: self.barcodes.clone(),
            flags: self.flags.clone(),
            date_range: DateRange {
                start: self.since,
                end: self.until,
            },
            min_score: self.min_score,
        }
    }
}

fn parse_flag(raw: &str) -> Result<Flag, String> {
    Flag::from_column(raw).ok_or_else(|| {
        let known: Vec<&str> = Flag::ALL.iter().map(|f| f.column()).collect();
        format!("unknown flag '{raw}' (expected one of {})", known.join(", "))
    })
}

fn parse_since(raw: &str) -> Result<Timestamp, String> {
    parse_timestamp(raw).ok_or_else(|| format!("unrecognized timestamp '{raw}'"))
}

fn parse_until(raw: &str) -> Result<Timestamp, String> {
    let ts = parse_since(raw)?;
    if raw.contains(':') {
        Ok(ts)
    } else {
        Ok(ts + Duration::days(1) - Duration::milliseconds(1))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error surfaced to the user, with a process exit code and a stable kind for
/// JSON output.
#[derive(Debug, Clone, PartialEq)]
pub struct CliError {
    pub code: i32,
    pub kind: &'static str,
    pub message: String,
    pub hint: Option<String>,
    pub retryable: bool,
}

impl CliError {
    fn input(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self {
            code: 3,
            kind: "input",
            message: message.into(),
            hint: hint.map(str::to_string),
            retryable: false,
        }
    }

    /// A command line clap rejected. Exit code 2 matches clap's own.
    pub fn usage(err: &clap::Error) -> Self {
        let rendered = err.to_string();
        let message = rendered
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches("error: ")
            .to_string();
        Self {
            code: 2,
            kind: "usage",
            message,
            hint: Some("run `poct-audit --help` for usage".to_string()),
            retryable: false,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "error": {
                "code": self.code,
                "kind": self.kind,
                "message": self.message,
                "hint": self.hint,
                "retryable": self.retryable,
            }
        })
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\nhint: {hint}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CliError {}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        let hint = match &err {
            EngineError::MissingColumns { .. } => {
                Some("rows need Timestamp, Operator_ID and Device_ID fields")
            }
            EngineError::InvalidTimestamp { .. } => {
                Some("use ISO-8601 (2025-06-01T08:00:00) or day-first (01/06/2025 08:00)")
            }
            EngineError::EmptyRequiredValue { .. } => None,
            EngineError::Detector {
                detector: "SESSION",
                ..
            } => Some("check the [sessions] section of the config"),
            EngineError::Detector { .. } => Some("check the [detectors] section of the config"),
        };
        Self {
            code: 4,
            kind: err.kind(),
            message: err.to_string(),
            hint: hint.map(str::to_string),
            retryable: false,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        Self {
            code: 5,
            kind: "config",
            message: err.to_string(),
            hint: Some("run `poct-audit config` to see the effective settings".to_string()),
            retryable: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// True when the raw arguments ask for JSON output. Checked before parsing
/// so usage errors can honor `--json` too.
pub fn is_json_mode_args<I, S>(args: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter().any(|arg| arg.as_ref() == "--json")
}

/// Install the stderr fmt subscriber. `POCT_AUDIT_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<AuditConfig, CliError> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                return Err(CliError {
                    code: 5,
                    kind: "config",
                    message: format!("Config file not found: {}", path.display()),
                    hint: None,
                    retryable: false,
                });
            }
            AuditConfig::load_from(path)?
        }
        None => AuditConfig::load()?,
    };
    debug!(?path, "Configuration loaded");
    Ok(config)
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert row objects to a [`RawTable`]. Columns are listed in first-seen
/// row order, each row's keys in the sorted order `serde_json` keeps them.
/// An input without rows gets the required columns so it analyzes as empty.
pub fn table_from_rows(rows: Vec<Value>) -> Result<RawTable, CliError> {
    let mut columns: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut table = RawTable::default();
    for (i, row) in rows.into_iter().enumerate() {
        let Value::Object(map) = row else {
            return Err(CliError::input(
                format!("Row {} is not a JSON object", i + 1),
                Some("each row must look like {\"Timestamp\": ..., \"Operator_ID\": ...}"),
            ));
        };
        for key in map.keys() {
            if seen.insert(key.clone()) {
                columns.push(key.clone());
            }
        }
        table.push_row(map.iter().map(|(k, v)| (k.clone(), cell(v))));
    }
    if columns.is_empty() {
        columns = Column::REQUIRED.iter().map(|c| c.name().to_string()).collect();
    }
    table.columns = columns;
    table.header_lines = 0;
    Ok(table)
}

/// Parse a JSON array of objects, or one object per line.
pub fn parse_input(text: &str) -> Result<RawTable, CliError> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return table_from_rows(Vec::new());
    }
    if trimmed.starts_with('[') {
        let rows: Vec<Value> = serde_json::from_str(trimmed)
            .map_err(|e| CliError::input(format!("Invalid JSON input: {e}"), None))?;
        return table_from_rows(rows);
    }
    let rows = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<Value>(line).map_err(|e| {
                CliError::input(
                    format!("Invalid JSON on line {}: {e}", n + 1),
                    Some("expected a JSON array or one JSON object per line"),
                )
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    table_from_rows(rows)
}

fn read_input(path: &Path) -> Result<String, CliError> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| CliError::input(format!("Failed to read stdin: {e}"), None))?;
        return Ok(text);
    }
    std::fs::read_to_string(path).map_err(|e| {
        CliError::input(
            format!("Failed to read {}: {e}", path.display()),
            Some("pass a JSON or JSON Lines export, or `-` for stdin"),
        )
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn to_pretty<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|e| CliError {
        code: 1,
        kind: "serialize",
        message: format!("Failed to serialize output: {e}"),
        hint: None,
        retryable: false,
    })
}

fn run_analyze(args: &AnalyzeArgs, config_path: Option<&Path>, json: bool) -> Result<(), CliError> {
    let mut config = load_config(config_path)?;
    if let Some(kind) = args.scoring {
        config.scoring.strategy = kind;
    }
    if args.legacy_rules {
        config.rules.legacy = true;
    }

    let table = parse_input(&read_input(&args.input)?)?;
    info!(rows = table.rows.len(), input = %args.input.display(), "Input loaded");
    let report = Engine::new(config).run(&table)?;

    let criteria = args.criteria();
    let events = filter_events(&report.flagged_events, &report.operator_scores, &criteria);
    let records = filter_records(
        &report.records,
        &report.flagged_events,
        &report.operator_scores,
        &criteria,
    );

    if json {
        let payload = serde_json::json!({
            "strategy": report.strategy,
            "flagged_events": events,
            "records": records,
            "operator_scores": report.operator_scores,
            "sessions": report.sessions,
            "device_scores": report.device_scores,
            "locations": report.locations,
            "rule_failures": report.rule_failures,
        });
        println!("{}", to_pretty(&payload)?);
    } else {
        print!("{}", render_report(&report, &events, &records));
    }
    Ok(())
}

/// Execute a parsed command line.
pub fn run(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        Commands::Analyze(args) => run_analyze(args, cli.config.as_deref(), cli.json),
        Commands::Sample { rows } => {
            println!("{}", to_pretty(&generate(*rows))?);
            Ok(())
        }
        Commands::Config { path } => {
            if *path {
                println!("{}", AuditConfig::config_path()?.display());
            } else {
                let config = load_config(cli.config.as_deref())?;
                print!("{}", config.to_toml()?);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_and_lines_alike() {
        let array = r#"[{"Timestamp": "2025-06-01 09:00", "Operator_ID": "OP1", "Device_ID": 7}]"#;
        let lines = "{\"Timestamp\": \"2025-06-01 09:00\", \"Operator_ID\": \"OP1\", \"Device_ID\": 7}\n\n";
        let a = parse_input(array).unwrap();
        let b = parse_input(lines).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.header_lines, 0);
        assert_eq!(a.rows[0]["Device_ID"], "7");
    }

    #[test]
    fn empty_input_analyzes_as_empty_log() {
        for text in ["", "[]", "\n\n"] {
            let table = parse_input(text).unwrap();
            assert!(table.rows.is_empty());
            let report = Engine::default().run(&table).unwrap();
            assert!(report.operator_scores.is_empty());
        }
    }

    #[test]
    fn non_object_rows_are_rejected() {
        let err = parse_input("[1, 2]").unwrap_err();
        assert_eq!(err.code, 3);
        assert_eq!(err.kind, "input");
    }

    #[test]
    fn columns_accumulate_across_rows_in_key_order() {
        let table = parse_input(
            "{\"b\": 1, \"a\": 2}\n{\"a\": 3, \"c\": null}\n",
        )
        .unwrap();
        assert_eq!(table.columns, vec!["a", "b", "c"]);
        assert_eq!(table.rows[1]["c"], "");
    }

    #[test]
    fn until_date_covers_whole_day() {
        let end = parse_until("2025-06-01").unwrap();
        assert_eq!(end.naive_local().to_string(), "2025-06-01 23:59:59.999");
        let exact = parse_until("2025-06-01 12:00:00").unwrap();
        assert_eq!(exact.naive_local().to_string(), "2025-06-01 12:00:00");
        let offset = parse_until("2025-06-01T12:00:00+02:00").unwrap();
        assert_eq!(offset.naive_utc().to_string(), "2025-06-01 10:00:00");
    }

    #[test]
    fn json_mode_is_detected_before_parsing() {
        assert!(is_json_mode_args(["poct-audit", "--json", "analyze", "--bogus"]));
        assert!(!is_json_mode_args(["poct-audit", "analyze", "log.json"]));
    }

    #[test]
    fn usage_errors_map_to_exit_code_two() {
        use clap::Parser as _;
        let err = Cli::try_parse_from(["poct-audit", "analyze", "--flag", "BOGUS"]).unwrap_err();
        let err = CliError::usage(&err);
        assert_eq!(err.code, 2);
        assert_eq!(err.kind, "usage");
        assert!(err.message.contains("BOGUS"));
        assert!(!err.message.starts_with("error:"));
    }

    #[test]
    fn flags_parse_case_insensitively() {
        assert_eq!(parse_flag("shared_key"), Ok(Flag::SharedKey));
        assert!(parse_flag("NOPE").is_err());
    }

    #[test]
    fn engine_errors_map_to_exit_code_four() {
        let err = CliError::from(EngineError::MissingColumns {
            missing: vec!["Device_ID".into()],
            found: vec!["Timestamp".into()],
        });
        assert_eq!(err.code, 4);
        assert_eq!(err.kind, "missing_columns");
        assert_eq!(err.to_json()["error"]["kind"], "missing_columns");
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
