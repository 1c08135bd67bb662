use crate::tracing::{LogLevel, TracingFormat};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use dirpack_engine::DEFAULT_TAG;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dirpack")]
#[command(about = "Push directories to, and pull them from, OCI registries")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'l',
        long,
        global = true,
        env = "DIRPACK_LOG_LEVEL",
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub log_level: LogLevel,

    #[arg(
        long,
        global = true,
        env = "DIRPACK_LOG_FORMAT",
        help = "Log output format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    #[arg(
        long,
        global = true,
        env = "DIRPACK_DEFAULT_TAG",
        help = "Tag used when a reference names none",
        default_value = DEFAULT_TAG
    )]
    pub default_tag: String,

    #[arg(
        long,
        global = true,
        env = "DIRPACK_INSECURE_REGISTRIES",
        value_delimiter = ',',
        help = "Registries (host[:port]) reached over plain HTTP"
    )]
    pub insecure_registries: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Archive a directory and push it as an artifact")]
    Push(PushArgs),
    #[command(about = "Pull an artifact and extract it into a directory")]
    Pull(PullArgs),
    #[command(about = "List the tags of a repository")]
    Tags(TagsArgs),
}

#[derive(Args, Debug)]
pub struct PushArgs {
    #[arg(help = "Destination reference, e.g. ghcr.io/org/app:v1.0.0")]
    pub reference: String,

    #[arg(long, short = 'p', help = "Directory to archive", default_value = ".")]
    pub path: PathBuf,

    #[arg(long, help = "Origin of the content (URL or identifier)")]
    pub source: String,

    #[arg(long, help = "Source revision (e.g. branch@sha1:<commit>)")]
    pub revision: String,

    #[arg(
        long,
        help = "Creation time as RFC 3339 (defaults to now)",
        value_parser = parse_timestamp
    )]
    pub created: Option<DateTime<Utc>>,

    #[arg(
        long = "ignore-paths",
        value_delimiter = ',',
        help = "Extra gitignore patterns to exclude"
    )]
    pub ignore_paths: Vec<String>,

    #[arg(
        long = "annotation",
        short = 'a',
        help = "Extra manifest annotation as key=value",
        value_parser = parse_annotation
    )]
    pub annotations: Vec<(String, String)>,

    #[arg(long, help = "Archive symlink targets instead of rejecting links")]
    pub follow_symlinks: bool,

    #[arg(
        long,
        conflicts_with = "follow_symlinks",
        help = "Leave symlinks out of the archive"
    )]
    pub skip_symlinks: bool,

    #[arg(long, help = "Include version-control directories such as .git")]
    pub include_vcs: bool,

    #[arg(
        long,
        help = "Gzip level for the content layer",
        default_value_t = 6,
        value_parser = clap::value_parser!(u32).range(0..=9)
    )]
    pub compression_level: u32,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    #[arg(help = "Reference to pull, by tag or digest")]
    pub reference: String,

    #[arg(long, short = 'o', help = "Directory to extract into")]
    pub output: PathBuf,

    #[arg(long, help = "Refuse archives that expand beyond this many bytes")]
    pub max_size: Option<u64>,
}

#[derive(Args, Debug)]
pub struct TagsArgs {
    #[arg(help = "Repository, e.g. ghcr.io/org/app")]
    pub repository: String,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("'{value}' is not an RFC 3339 timestamp: {e}"))
}

fn parse_annotation(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.trim().is_empty() => Ok((key.trim().to_string(), val.to_string())),
        _ => Err(format!("expected key=value, got '{value}'")),
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
