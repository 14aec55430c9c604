//! Schema Compatibility CLI
//!
//! Compares two provider package schema files and reports breaking changes.
//! When aliasing metadata is supplied for both sides, proven token renames
//! and maxItemsOne transitions are normalized away before the comparison.
//!
//! Usage:
//!   schema-compat --old old.json --new new.json
//!   schema-compat --old old.json --new new.json \
//!       --old-meta old-meta.json --new-meta new-meta.json --format json

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use schema_compat::meta::MetadataEnvelope;
use schema_compat::schema::PackageSpec;
use schema_compat::{compare, normalize, report};

#[derive(Parser)]
#[command(name = "schema-compat")]
#[command(about = "Detect breaking changes between two provider schema versions")]
struct Cli {
    /// Path to the old (baseline) schema file
    #[arg(long)]
    old: PathBuf,

    /// Path to the new (candidate) schema file
    #[arg(long)]
    new: PathBuf,

    /// Aliasing metadata for the old side
    #[arg(long)]
    old_meta: Option<PathBuf>,

    /// Aliasing metadata for the new side
    #[arg(long)]
    new_meta: Option<PathBuf>,

    /// Provider name used to shorten tokens in the report
    #[arg(long)]
    provider: Option<String>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Maximum violations rendered in text output (-1 = unlimited)
    #[arg(long, default_value_t = 500)]
    max_items: i64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let old = load_schema(&cli.old)?;
    let new = load_schema(&cli.new)?;
    let old_meta = cli.old_meta.as_deref().map(load_metadata).transpose()?;
    let new_meta = cli.new_meta.as_deref().map(load_metadata).transpose()?;

    let normalized = normalize::normalize(&old, &new, old_meta.as_ref(), new_meta.as_ref())
        .context("schema normalization failed")?;

    let provider = cli
        .provider
        .as_deref()
        .unwrap_or(new.name.as_str())
        .to_string();
    let comparison = compare::compare_packages(&old, &normalized.schema, &provider);

    match cli.format.as_str() {
        "json" => {
            let value = report::to_json(&comparison, &normalized);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        "text" => {
            let mut out = String::new();
            report::write_text(&mut out, &comparison, &normalized, cli.max_items)?;
            print!("{}", out);
        }
        other => anyhow::bail!("unknown output format: {}", other),
    }

    Ok(report::exit_code(&comparison))
}

fn load_schema(path: &std::path::Path) -> anyhow::Result<PackageSpec> {
    let payload = fs::read_to_string(path)
        .with_context(|| format!("reading schema file {}", path.display()))?;
    PackageSpec::from_str(&payload)
        .with_context(|| format!("parsing schema file {}", path.display()))
}

fn load_metadata(path: &std::path::Path) -> anyhow::Result<MetadataEnvelope> {
    let payload = fs::read_to_string(path)
        .with_context(|| format!("reading metadata file {}", path.display()))?;
    MetadataEnvelope::from_str(&payload)
        .with_context(|| format!("parsing metadata file {}", path.display()))
}
