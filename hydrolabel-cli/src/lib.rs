//! hydrolabel command-line front end
//!
//! Thin dispatch over the schema engine: validate documents, convert
//! legacy label files, inspect review state, and append verification
//! rounds through the locked store. Errors from the library surface with
//! their error kind and field path verbatim so the offending JSON can be
//! corrected at the source.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub mod commands;

/// Labeling and verification tooling for hydrophone spectrogram data
#[derive(Debug, Parser)]
#[command(name = "hydrolabel", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check a document against the unified schema and its invariants
    Validate(ValidateArgs),
    /// Convert a legacy label/prediction file into the unified schema
    Convert(ConvertArgs),
    /// Print review statistics for a document
    Summary(SummaryArgs),
    /// Print the current labels of one or all items
    Labels(LabelsArgs),
    /// Append one verification round to an item
    Verify(VerifyArgs),
    /// Show label changes between two verification rounds of an item
    Diff(DiffArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Document to validate
    pub file: PathBuf,
    /// Tolerate keys outside the closed schema
    #[arg(long)]
    pub lenient: bool,
    /// Taxonomy JSON to resolve labels against (default: built-in snapshot)
    #[arg(long)]
    pub taxonomy: Option<PathBuf>,
    /// Skip label resolution entirely
    #[arg(long)]
    pub skip_labels: bool,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Legacy input file
    pub input: PathBuf,
    /// Destination for the converted unified document
    pub output: PathBuf,
    /// Folder prepended to MAT filenames from flat label maps
    #[arg(long)]
    pub mat_folder: Option<PathBuf>,
    /// Folder prepended to image filenames from dashboard maps
    #[arg(long)]
    pub image_folder: Option<PathBuf>,
    /// Device code for formats that do not record one
    #[arg(long)]
    pub device_code: Option<String>,
    /// Task type when the input does not state one
    /// (whale_detection | anomaly_detection | classification)
    #[arg(long)]
    pub task_type: Option<String>,
    /// Reviewer identity recorded for unattributed legacy labels
    #[arg(long)]
    pub labeled_by: Option<String>,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Document to summarize
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct LabelsArgs {
    /// Document to read
    pub file: PathBuf,
    /// Restrict output to one item
    #[arg(long)]
    pub item: Option<String>,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Document to update in place
    pub file: PathBuf,
    /// Item to verify
    #[arg(long)]
    pub item: String,
    /// Reviewer identifier (email or username)
    #[arg(long, env = "HYDROLABEL_REVIEWER")]
    pub reviewer: String,
    /// Labels to accept (repeatable)
    #[arg(long = "accept")]
    pub accept: Vec<String>,
    /// Labels to reject (repeatable)
    #[arg(long = "reject")]
    pub reject: Vec<String>,
    /// Labels to add manually (repeatable)
    #[arg(long = "add")]
    pub add: Vec<String>,
    /// Score threshold applied to accepted/rejected labels
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Overall judgement (verified | rejected | uncertain)
    #[arg(long)]
    pub status: Option<String>,
    /// Reviewer confidence (high | medium | low)
    #[arg(long)]
    pub confidence: Option<String>,
    /// Free-text reviewer comment
    #[arg(long)]
    pub notes: Option<String>,
    /// Reviewer affiliation, e.g. "ONC"
    #[arg(long)]
    pub affiliation: Option<String>,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Document to read
    pub file: PathBuf,
    /// Item to inspect
    #[arg(long)]
    pub item: String,
    /// Earlier round number
    pub round_a: u32,
    /// Later round number
    pub round_b: u32,
}

/// Dispatch one parsed invocation
pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Validate(args) => commands::validate(args),
        Command::Convert(args) => commands::convert(args),
        Command::Summary(args) => commands::summary(args),
        Command::Labels(args) => commands::labels(args),
        Command::Verify(args) => commands::verify(args),
        Command::Diff(args) => commands::diff(args),
    }
}
