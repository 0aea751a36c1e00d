use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid output format '{other}', expected one of: table, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Args)]
pub struct RecordArgs {
    #[arg(long, help = "Path to a coverage snapshot JSON produced by the profile parser")]
    pub coverage: PathBuf,

    #[arg(long, help = "Branch name (defaults to main)")]
    pub branch: Option<String>,

    #[arg(long, help = "Commit SHA (synthesized when omitted)")]
    pub commit: Option<String>,

    #[arg(long, requires = "commit", help = "Link to the commit")]
    pub commit_url: Option<String>,

    #[arg(long, help = "Project identifier stored in entry metadata")]
    pub project: Option<String>,

    #[arg(
        long = "meta",
        value_name = "KEY=VALUE",
        value_parser = parse_key_value,
        help = "Extra metadata, repeatable"
    )]
    pub metadata: Vec<(String, String)>,

    #[arg(long, help = "Attach CI build information read from the environment")]
    pub build_info_from_env: bool,

    #[arg(long, help = "Skip the retention pass after recording")]
    pub no_cleanup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct LatestArgs {
    #[arg(long, default_value = "main")]
    pub branch: String,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct TrendArgs {
    #[arg(long, default_value = "main")]
    pub branch: String,

    #[arg(long, default_value_t = 30, help = "Look-back window in days")]
    pub days: u32,

    #[arg(long, default_value_t = 100, help = "Maximum data points (clamped to 1..1000)")]
    pub max_points: usize,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct StatsArgs {
    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Commands {
    /// Record a coverage snapshot into the history store
    Record(RecordArgs),
    /// Show the newest entry for a branch from the last 7 days
    Latest(LatestArgs),
    /// Summarize and analyze coverage over time
    Trend(TrendArgs),
    /// Show store-wide statistics
    Stats(StatsArgs),
    /// Apply the retention policy now
    Cleanup,
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Coverage history and trend tracker")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Workspace root holding .covtrend/config.toml"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    let (key, val) = value
        .split_once('=')
        .ok_or_else(|| format!("invalid metadata '{value}', expected KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid metadata '{value}', key is empty"));
    }
    Ok((key.to_owned(), val.trim().to_owned()))
}
