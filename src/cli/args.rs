use std::path::PathBuf;

use clap::Parser;

use sargraph::types::ProductFormat;

pub const DEFAULT_TARGET: &str = "./target.dim";

/// Splits `name=value`; the value may itself contain `=`.
fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Parser, Debug)]
#[command(
    name = "sargraph",
    version,
    about = "SARGRAPH graph processing tool",
    disable_help_flag = true
)]
pub struct CliArgs {
    /// Operator alias or graph file (.xml)
    pub target: Option<String>,

    /// Source product files
    pub sources: Vec<PathBuf>,

    /// Show usage, or the usage of an operator or graph file
    #[arg(
        short = 'h',
        long = "help",
        num_args = 0..=1,
        default_missing_value = "",
        value_name = "OPERATOR|GRAPH"
    )]
    pub help: Option<String>,

    /// Print the full causal chain of an error
    #[arg(short = 'e', long = "errors", default_value_t = false)]
    pub errors: bool,

    /// Target file written by the synthesized Write node
    #[arg(short = 'x', long = "target-file", default_value = DEFAULT_TARGET)]
    pub target_file: PathBuf,

    /// Output format (BEAM-DIMAP, GeoTIFF or JPEG); inferred from the target
    /// file extension when omitted, BEAM-DIMAP otherwise
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<ProductFormat>,

    /// Parameter file: name=value lines, or a JSON object for *.json
    #[arg(short = 't', long = "param-file")]
    pub param_file: Option<PathBuf>,

    /// Operator or graph parameter (repeatable), e.g. -PfilterSize=5
    #[arg(short = 'P', value_parser = parse_key_value, value_name = "NAME=VALUE")]
    pub parameters: Vec<(String, String)>,

    /// Source product by id (repeatable), e.g. -Smaster=a.dim
    #[arg(short = 'S', value_parser = parse_key_value, value_name = "ID=PATH")]
    pub source_ids: Vec<(String, String)>,

    /// Number of worker threads
    #[arg(short = 'q', long = "workers")]
    pub workers: Option<usize>,

    /// Tile cache size, in bytes or with a K/M/G suffix
    #[arg(short = 'c', long = "cache-size")]
    pub cache_size: Option<String>,

    /// Engine configuration file (JSON)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}
