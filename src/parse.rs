use crate::gbif::GBIF_API_URL;
use crate::record::{Confidence, FieldType};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "insect-id")]
#[command(about = "Record insect species identifications against the GBIF taxonomy")]
#[command(version)]
pub(crate) struct Args {
    /// Directory holding identifications, custom fields and recent taxa
    #[arg(long, env = "INSECT_ID_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// GBIF API base URL
    #[arg(long, env = "INSECT_ID_GBIF_URL", default_value = GBIF_API_URL, global = true)]
    pub gbif_url: String,

    /// Maximum number of search suggestions
    #[arg(long, default_value = "10", global = true)]
    pub limit: usize,

    /// Search debounce in milliseconds
    #[arg(long, default_value = "300", global = true)]
    pub debounce: u64,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "10", global = true)]
    pub timeout: u64,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Look up taxa by name
    Search {
        query: String,
    },

    /// Save an identification in one step
    Identify(IdentifyArgs),

    /// Interactive identification session
    Session,

    /// Manage custom fields
    #[command(subcommand)]
    Fields(FieldsCommand),

    /// List saved identifications
    History {
        /// Print a summary instead of every record
        #[arg(short, long)]
        summary: bool,
    },

    /// List recently selected taxa
    Recent,

    /// Export saved identifications as CSV
    Export {
        /// Output file, defaults to insect-identifications-<date>.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete all stored data
    Purge {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(clap::Args)]
pub(crate) struct IdentifyArgs {
    /// GBIF taxon key
    #[arg(short, long)]
    pub taxon: u64,

    /// Identification date (YYYY-MM-DD), defaults to today
    #[arg(long, value_parser = parse_date)]
    pub date: Option<String>,

    #[arg(long, value_parser = parse_date)]
    pub observation_date: Option<String>,

    #[arg(short, long)]
    pub location: Option<String>,

    #[arg(long)]
    pub habitat: Option<String>,

    #[arg(long)]
    pub collector: Option<String>,

    /// Person making the identification
    #[arg(short, long)]
    pub identifier: Option<String>,

    #[arg(short, long, value_enum)]
    pub confidence: Option<Confidence>,

    #[arg(short, long)]
    pub method: Option<String>,

    #[arg(short, long)]
    pub notes: Option<String>,

    /// Custom field value as <id-or-label>=<value>, repeatable
    #[arg(short, long = "field", value_parser = parse_field_value)]
    pub fields: Vec<(String, String)>,
}

#[derive(Subcommand)]
pub(crate) enum FieldsCommand {
    List,

    Add {
        label: String,

        #[arg(short = 't', long = "type", value_enum, default_value = "text")]
        field_type: FieldType,

        #[arg(short, long)]
        required: bool,

        /// Option for select fields, repeatable
        #[arg(short, long = "option")]
        options: Vec<String>,
    },

    Remove {
        id: String,
    },
}

/// Accepts `YYYY-MM-DD` only.
pub(crate) fn parse_date(s: &str) -> Result<String, String> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|_| s.to_string())
        .map_err(|_| format!("'{}' is not a date in YYYY-MM-DD form", s))
}

pub(crate) fn parse_field_value(s: &str) -> Result<(String, String), String> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <field>=<value>, got '{}'", s))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{}'", s));
    }
    Ok((field.to_string(), value.to_string()))
}
