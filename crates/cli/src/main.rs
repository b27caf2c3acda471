// CalcGraph CLI - report calculations without a host application

mod exit_codes;
mod output;
mod util;

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use calcgraph_config::Settings;
use calcgraph_engine::CheckpointInput;
use calcgraph_expr::FormulaConstant;
use calcgraph_protocol::{ApiError, ApiResponse, AssumptionUpdate, PreviewRequest, UncertaintyOptions};
use calcgraph_service::CalcApi;
use calcgraph_store::{FormulaKey, NewCustomFormula};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use exit_codes::*;

#[derive(Parser)]
#[command(name = "calcgraph")]
#[command(about = "Deterministic financial calculations for AI opportunity research")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct GlobalArgs {
    /// Settings file (TOML). Without it the platform default is used if present
    #[arg(long, global = true, env = "CALCGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Custom formula database, overriding the settings file
    #[arg(long, global = true, env = "CALCGRAPH_DB")]
    db: Option<PathBuf>,

    /// Print the full response envelope as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Log more to stderr (-v info, -vv debug). CALCGRAPH_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Calculate a report from research output
    #[command(after_help = "\
Examples:
  calcgraph calculate research.json
  calcgraph calculate research.json --json > report.json
  cat research.json | calcgraph calculate -")]
    Calculate {
        /// Research JSON file, or - for stdin
        input: PathBuf,
    },

    /// Calculate with assumption overrides applied to a fresh engine
    #[command(after_help = "\
Examples:
  calcgraph recalculate research.json --set adoption_rate=0.6
  calcgraph recalculate research.json --set value_weight=50 --set effort_weight=25 --json")]
    Recalculate {
        /// Research JSON file, or - for stdin
        input: PathBuf,

        /// Assumption override as ID=VALUE (repeatable)
        #[arg(long = "set", value_name = "ID=VALUE", value_parser = parse_update)]
        overrides: Vec<AssumptionUpdate>,
    },

    /// Monte Carlo ranges for each opportunity's risk-adjusted value
    #[command(after_help = "\
Examples:
  calcgraph uncertainty research.json
  calcgraph uncertainty research.json --samples 20000 --seed 7 --json")]
    Uncertainty {
        /// Research JSON file, or - for stdin
        input: PathBuf,

        /// Samples per opportunity (clamped to the configured bounds)
        #[arg(long)]
        samples: Option<usize>,

        /// RNG seed; the same seed reproduces the same ranges
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Inspect and validate calculation assumptions
    #[command(subcommand)]
    Assumptions(AssumptionCommands),

    /// Inspect the built-in formula registry
    #[command(subcommand)]
    Formulas(FormulaCommands),

    /// Validate and evaluate sandboxed expressions
    #[command(subcommand)]
    Expr(ExprCommands),

    /// Manage versioned custom formulas
    #[command(subcommand)]
    Custom(CustomCommands),

    /// Export or restore engine checkpoints
    #[command(subcommand)]
    State(StateCommands),

    /// Engine and protocol versions, registry sizes
    Health,
}

#[derive(Subcommand)]
enum AssumptionCommands {
    /// List every assumption with its current value and range
    List {
        /// Group by category
        #[arg(long)]
        by_category: bool,
    },

    /// Check a set of values against their ranges (all or nothing)
    #[command(after_help = "\
Examples:
  calcgraph assumptions set adoption_rate=0.6 data_maturity_factor=0.5")]
    Set {
        #[arg(required = true, value_name = "ID=VALUE", value_parser = parse_update)]
        updates: Vec<AssumptionUpdate>,
    },
}

#[derive(Subcommand)]
enum FormulaCommands {
    /// List registered formulas
    List,

    /// Show one formula's derivation and inputs
    Show { id: String },
}

#[derive(Subcommand)]
enum ExprCommands {
    /// Validate then evaluate an expression
    #[command(after_help = "\
Examples:
  calcgraph expr preview '(hours + 100) * rate' --var hours=200 --var rate=0.8
  calcgraph expr preview 'max(a, b) / 2' --var a=3 --var b=9 --json")]
    Preview {
        expression: String,

        /// Input value as NAME=VALUE (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        vars: Vec<(String, f64)>,

        /// Named constant as NAME=VALUE (repeatable)
        #[arg(long = "const", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        constants: Vec<(String, f64)>,
    },

    /// List the input fields expressions may reference
    Inputs,
}

#[derive(Subcommand)]
enum CustomCommands {
    /// Save a new version; only the first version of a field starts active
    #[command(after_help = "\
Examples:
  calcgraph custom create --field annual_value --label 'Adjusted value' \\
      --expr '(hours + 100) * rate' --input hours --input rate")]
    Create {
        #[command(flatten)]
        key: KeyArgs,

        #[arg(long)]
        label: String,

        #[arg(long = "expr")]
        expression: String,

        /// Input field the expression uses (repeatable)
        #[arg(long = "input")]
        inputs: Vec<String>,

        /// Named constant as NAME=VALUE (repeatable)
        #[arg(long = "const", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        constants: Vec<(String, f64)>,

        #[arg(long)]
        notes: Option<String>,

        #[arg(long)]
        author: Option<String>,
    },

    /// List every version for a field, newest first
    List {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Make a stored version the active one
    Activate { id: String },

    /// Evaluate the active version
    Eval {
        #[command(flatten)]
        key: KeyArgs,

        /// Input value as NAME=VALUE (repeatable)
        #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_assignment)]
        vars: Vec<(String, f64)>,
    },
}

#[derive(Args)]
struct KeyArgs {
    /// Report field the formula computes
    #[arg(long)]
    field: String,

    #[arg(long)]
    report: Option<String>,

    #[arg(long)]
    use_case: Option<String>,
}

impl KeyArgs {
    fn into_key(self) -> FormulaKey {
        FormulaKey { report_id: self.report, use_case_id: self.use_case, field_key: self.field }.normalized()
    }
}

#[derive(Subcommand)]
enum StateCommands {
    /// Export assumptions, formulas and audit log with a fingerprint
    #[command(after_help = "\
Examples:
  calcgraph state export --set adoption_rate=0.7 > checkpoint.json
  calcgraph state import checkpoint.json")]
    Export {
        /// Apply ID=VALUE before exporting (repeatable)
        #[arg(long = "set", value_name = "ID=VALUE", value_parser = parse_update)]
        overrides: Vec<AssumptionUpdate>,
    },

    /// Restore a checkpoint, verifying its fingerprint
    Import {
        /// Checkpoint JSON file, or - for stdin
        input: PathBuf,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:   calcgraph-engine ", env!("CARGO_PKG_VERSION"),
        "\ntarget:   ", env!("TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    let result = match cli.command {
        None => {
            eprintln!("Usage: calcgraph <command> [options]");
            eprintln!("       calcgraph --help for more information");
            Ok(())
        }
        Some(command) => run(command, &cli.global),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_env("CALCGRAPH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // stdout carries command output only
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run(command: Commands, global: &GlobalArgs) -> Result<(), CliError> {
    let settings = load_settings(global)?;
    let json = global.json;

    match command {
        Commands::Calculate { input } => {
            let api = CalcApi::in_memory(settings).map_err(CliError::service)?;
            emit(api.calculate(read_json(&input)?), json, output::report)
        }
        Commands::Recalculate { input, overrides } => {
            let api = CalcApi::in_memory(settings).map_err(CliError::service)?;
            emit(api.recalculate(read_json(&input)?, &overrides), json, output::report)
        }
        Commands::Uncertainty { input, samples, seed } => {
            let api = CalcApi::in_memory(settings).map_err(CliError::service)?;
            let options = UncertaintyOptions { sample_size: samples, seed };
            emit(api.uncertainty(read_json(&input)?, &options), json, output::uncertainty)
        }
        Commands::Assumptions(cmd) => {
            let api = CalcApi::in_memory(settings).map_err(CliError::service)?;
            match cmd {
                AssumptionCommands::List { by_category: false } => {
                    emit(api.list_assumptions(), json, |a| output::assumptions(a))
                }
                AssumptionCommands::List { by_category: true } => {
                    emit(api.assumptions_by_category(), json, |g| output::assumption_groups(g))
                }
                AssumptionCommands::Set { updates } => emit(api.batch_update(&updates), json, output::batch),
            }
        }
        Commands::Formulas(cmd) => {
            let api = CalcApi::in_memory(settings).map_err(CliError::service)?;
            match cmd {
                FormulaCommands::List => emit(api.list_formulas(), json, |f| output::formulas(f)),
                FormulaCommands::Show { id } => emit(api.get_formula(&id), json, output::formula),
            }
        }
        Commands::Expr(cmd) => {
            let api = CalcApi::in_memory(settings).map_err(CliError::service)?;
            match cmd {
                ExprCommands::Preview { expression, vars, constants } => {
                    let request = PreviewRequest {
                        expression,
                        context: vars.into_iter().collect(),
                        constants: to_constants(constants),
                    };
                    emit_evaluation(api.preview_formula(&request), json)
                }
                ExprCommands::Inputs => emit(api.list_available_inputs(), json, output::pretty),
            }
        }
        Commands::Custom(cmd) => {
            let api = CalcApi::from_settings(settings).map_err(CliError::service)?;
            match cmd {
                CustomCommands::Create { key, label, expression, inputs, constants, notes, author } => {
                    let new = NewCustomFormula {
                        key: key.into_key(),
                        label,
                        expression,
                        input_fields: inputs,
                        constants: to_constants(constants),
                        notes,
                        created_by: author,
                    };
                    emit(api.create_custom_formula(new), json, output::custom_formula)
                }
                CustomCommands::List { key } => {
                    emit(api.list_custom_formulas(&key.into_key()), json, output::custom_versions)
                }
                CustomCommands::Activate { id } => {
                    emit(api.activate_custom_formula(&id), json, output::custom_formula)
                }
                CustomCommands::Eval { key, vars } => {
                    let context = vars.into_iter().collect();
                    let response = api.evaluate_custom_formula(&key.into_key(), &context);
                    emit(response, json, |e| output::evaluation(&e.evaluation))
                }
            }
        }
        Commands::State(cmd) => {
            let api = CalcApi::in_memory(settings).map_err(CliError::service)?;
            match cmd {
                StateCommands::Export { overrides } => {
                    if !overrides.is_empty() {
                        let applied = api.batch_update(&overrides);
                        if !applied.success {
                            return emit(applied, json, output::batch);
                        }
                    }
                    emit(api.export_state(), json, output::pretty)
                }
                StateCommands::Import { input } => {
                    let checkpoint = read_checkpoint(&input)?;
                    emit(api.import_state(checkpoint), json, output::state_summary)
                }
            }
        }
        Commands::Health => {
            let api = CalcApi::in_memory(settings).map_err(CliError::service)?;
            emit(api.health(), json, output::pretty)
        }
    }
}

fn load_settings(global: &GlobalArgs) -> Result<Settings, CliError> {
    let mut settings = match &global.config {
        Some(path) => Settings::load_from(path).map_err(|e| CliError::config(e.to_string()))?,
        None => Settings::load(),
    };
    if let Some(db) = &global.db {
        settings.store.database_path = Some(db.clone());
    }
    Ok(settings)
}

/// Print a response. With `--json` the envelope goes to stdout as a single
/// value even on failure; otherwise `human` renders the data.
fn emit<T: Serialize>(response: ApiResponse<T>, json: bool, human: impl FnOnce(&T)) -> Result<(), CliError> {
    if json {
        let text = serde_json::to_string_pretty(&response)
            .map_err(|e| CliError::new(EXIT_ERROR, format!("cannot serialize response: {}", e)))?;
        println!("{}", text);
        return match response.error {
            Some(error) => Err(CliError::silent(api_exit_code(error.code))),
            None => Ok(()),
        };
    }
    match response.into_result() {
        Ok(data) => {
            human(&data);
            Ok(())
        }
        Err(error) => Err(CliError::api(error)),
    }
}

/// A preview that validated but failed to evaluate still succeeds at the API
/// level; the command reports it as a validation failure.
fn emit_evaluation(response: ApiResponse<calcgraph_expr::Evaluation>, json: bool) -> Result<(), CliError> {
    let failed = response.data.as_ref().and_then(|e| e.error.clone());
    emit(response, json, output::evaluation)?;
    match failed {
        Some(message) if json => {
            log::debug!("preview failed: {}", message);
            Err(CliError::silent(EXIT_VALIDATION))
        }
        Some(message) => Err(CliError::new(EXIT_VALIDATION, message)),
        None => Ok(()),
    }
}

fn read_input(path: &Path) -> Result<String, CliError> {
    if path.as_os_str() == "-" {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| CliError::usage(format!("cannot read stdin: {}", e)))?;
        if input.trim().is_empty() {
            return Err(CliError::usage("no input received on stdin")
                .with_hint("cat research.json | calcgraph calculate -"));
        }
        return Ok(input);
    }
    std::fs::read_to_string(path).map_err(|e| CliError::usage(format!("cannot read {}: {}", path.display(), e)))
}

fn read_json(path: &Path) -> Result<serde_json::Value, CliError> {
    let text = read_input(path)?;
    serde_json::from_str(&text)
        .map_err(|e| CliError::new(EXIT_VALIDATION, format!("{} is not valid JSON: {}", path.display(), e)))
}

/// Accepts a bare checkpoint or the `--json` envelope of `state export`.
fn read_checkpoint(path: &Path) -> Result<CheckpointInput, CliError> {
    let mut value = read_json(path)?;
    if value.get("success").is_some() {
        if let Some(data) = value.get_mut("data") {
            value = data.take();
        }
    }
    serde_json::from_value(value)
        .map_err(|e| CliError::new(EXIT_VALIDATION, format!("{} is not a checkpoint: {}", path.display(), e)))
}

fn to_constants(pairs: Vec<(String, f64)>) -> Vec<FormulaConstant> {
    pairs
        .into_iter()
        .map(|(key, value)| FormulaConstant { label: key.clone(), key, value })
        .collect()
}

fn parse_assignment(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{}'", s));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    Ok((name.to_string(), value))
}

fn parse_update(s: &str) -> Result<AssumptionUpdate, String> {
    parse_assignment(s).map(|(id, value)| AssumptionUpdate::new(id, value))
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::new(EXIT_USAGE, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(EXIT_CONFIG, msg).with_hint("check the file passed with --config or $CALCGRAPH_CONFIG")
    }

    /// Exit code only; the JSON envelope already described the failure.
    pub fn silent(code: u8) -> Self {
        Self::new(code, "")
    }

    pub fn api(error: ApiError) -> Self {
        Self::new(api_exit_code(error.code), error.to_string())
    }

    pub fn service(err: calcgraph_service::ServiceError) -> Self {
        Self::api(err.into())
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
