//! Command line argument parsing for the facetree CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::member::Value;

/// facetree - index dimension members of BI domains
#[derive(Parser, Debug, Clone)]
#[command(name = "facetree")]
#[command(about = "Build, plan and browse dimension hierarchies of BI domains")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct FacetreeArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE", env = "FACETREE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl FacetreeArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }

    /// Log filter matching the verbosity level.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity() {
            0 => "error",
            1 => "warn",
            2 => "info",
            _ => "debug",
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build a domain hierarchy and index its members
    Build(BuildArgs),

    /// Show the queries that would populate a domain hierarchy
    Plan(PlanArgs),

    /// List the members of one dimension
    Facet(FacetArgs),
}

/// Model fixture and domain shared by every command.
#[derive(Parser, Debug, Clone)]
pub struct DomainArgs {
    /// Model fixture file (JSON)
    #[arg(value_name = "FIXTURE")]
    pub fixture: PathBuf,

    /// Domain id
    #[arg(short, long)]
    pub domain: String,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub target: DomainArgs,

    /// Milliseconds to wait for indexing (omit to wait until done, 0 to not wait)
    #[arg(short, long, value_name = "MILLIS")]
    pub timeout_ms: Option<u64>,

    /// Persist index statuses to this file
    #[arg(long, value_name = "STATUS_FILE")]
    pub status_file: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub target: DomainArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct FacetArgs {
    #[command(flatten)]
    pub target: DomainArgs,

    /// Axis key of the dimension, e.g. `sales/country`
    #[arg(short, long)]
    pub axis: String,

    /// Case-insensitive substring filter on members
    #[arg(long)]
    pub filter: Option<String>,

    /// Selection on another axis, as `AXIS=VALUE` (repeatable)
    #[arg(short, long = "select", value_name = "AXIS=VALUE", value_parser = parse_selection)]
    pub selections: Vec<(String, Value)>,

    #[arg(long, default_value = "0")]
    pub offset: usize,

    #[arg(long, default_value = "50")]
    pub size: usize,

    /// Milliseconds to wait for the dimension (omit to wait until done, 0 to not wait)
    #[arg(short, long, value_name = "MILLIS")]
    pub timeout_ms: Option<u64>,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Parse `AXIS=VALUE`. Values read as integers, floats or booleans when they
/// parse as such, text otherwise.
pub fn parse_selection(raw: &str) -> std::result::Result<(String, Value), String> {
    let (axis, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected AXIS=VALUE, got '{raw}'"))?;
    if axis.is_empty() {
        return Err(format!("missing axis in '{raw}'"));
    }
    let value = if let Ok(int) = value.parse::<i64>() {
        Value::Int(int)
    } else if let Ok(float) = value.parse::<f64>() {
        Value::Float(float)
    } else if let Ok(flag) = value.parse::<bool>() {
        Value::Bool(flag)
    } else {
        Value::text(value)
    };
    Ok((axis.to_string(), value))
}
