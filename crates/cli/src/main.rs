// dosegrid CLI - find dose-response datasets in spreadsheets

mod cell_ref;
mod exit_codes;
mod load;
mod report;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dosegrid_detect::{analyze, analyze_gate, extract_points, DetectConfig};

use exit_codes::{EXIT_CONFIG, EXIT_IO, EXIT_NO_CANDIDATES, EXIT_PARSE, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "dosegrid")]
#[command(about = "Detect dose-response datasets in spreadsheet files")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Log engine checkpoints to stderr (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a CSV, TSV or workbook and list dataset candidates
    #[command(after_help = "\
Examples:
  dosegrid detect plate.csv
  dosegrid detect screen.xlsx --sheet 'Plate 2' --json
  dosegrid detect screen.xlsx --gate B3:M20 --points
  dosegrid detect data.csv --config detect.toml --fail-empty")]
    Detect {
        /// Input file (.csv, .tsv, .xlsx, .xls, .xlsb, .ods)
        file: PathBuf,

        /// Worksheet name (workbooks only; defaults to the first sheet)
        #[arg(long)]
        sheet: Option<String>,

        /// Analyze only this range (e.g. A1:D20) instead of segmenting the sheet
        #[arg(long)]
        gate: Option<String>,

        /// Detection config (TOML); defaults apply when absent
        #[arg(long, env = "DOSEGRID_CONFIG")]
        config: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Include extracted (concentration, responses) points per candidate
        #[arg(long)]
        points: bool,

        /// Exit with code 6 when no candidate is found
        #[arg(long)]
        fail_empty: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("DOSEGRID_COMMIT"), ")",
        "\nengine:  dosegrid-detect ", env!("CARGO_PKG_VERSION"),
        "\ntarget:  ", env!("DOSEGRID_TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Detect {
            file,
            sheet,
            gate,
            config,
            json,
            points,
            fail_empty,
        } => cmd_detect(DetectArgs {
            file,
            sheet,
            gate,
            config,
            json,
            points,
            fail_empty,
        }),
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

// ============================================================================
// detect
// ============================================================================

struct DetectArgs {
    file: PathBuf,
    sheet: Option<String>,
    gate: Option<String>,
    config: Option<PathBuf>,
    json: bool,
    points: bool,
    fail_empty: bool,
}

fn cmd_detect(args: DetectArgs) -> Result<(), CliError> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => DetectConfig::default(),
    };

    let gate = args
        .gate
        .as_deref()
        .map(|g| {
            cell_ref::parse_gate(g).ok_or_else(|| {
                CliError::args(format!("invalid gate '{}'", g))
                    .with_hint("use an A1-style range such as B3:M20")
            })
        })
        .transpose()?;

    let loaded = load::load(&args.file, args.sheet.as_deref())?;
    log::info!(
        "analyzing {} ({} x {})",
        args.file.display(),
        loaded.grid.height(),
        loaded.grid.width()
    );

    let result = match gate {
        Some(g) => analyze_gate(&loaded.grid, g, &config),
        None => analyze(&loaded.grid, &config),
    };

    let points: Option<Vec<Vec<_>>> = args.points.then(|| {
        result
            .candidates
            .iter()
            .map(|c| extract_points(&loaded.grid, c, &config.vocabulary))
            .collect()
    });

    let file = args.file.display().to_string();
    let report = report::Report {
        file: &file,
        sheet: loaded.sheet_name.as_deref(),
        result: &result,
        points,
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let written = if args.json {
        let body = report::to_json(&report)
            .map_err(|e| CliError::io(format!("failed to serialize result: {}", e)))?;
        writeln!(out, "{}", body)
    } else {
        report::write_text(&mut out, &report)
    };
    written.map_err(|e| CliError::io(format!("failed to write output: {}", e)))?;

    if args.fail_empty && result.candidates.is_empty() {
        return Err(CliError {
            code: EXIT_NO_CANDIDATES,
            message: "no dose-response dataset found".to_string(),
            hint: Some("try --gate to point at the data block".to_string()),
        });
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<DetectConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("cannot read config {}: {}", path.display(), e)))?;
    DetectConfig::from_toml(&text).map_err(|e| {
        CliError::config(format!("{}: {}", path.display(), e))
            .with_hint("unknown keys are rejected; see the [vocabulary], [layout] and [biology] sections")
    })
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self { code: EXIT_PARSE, message: msg.into(), hint: None }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CONFIG, message: msg.into(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
