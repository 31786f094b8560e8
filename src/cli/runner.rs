use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::CommandFactory;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sargraph::core::{EngineConfig, OperatorRegistry, ProgressMonitor, Scheduler};
use sargraph::graph::{Graph, read_graph_file, rewrite_product_sets, template_variables};
use sargraph::io::FileIo;
use sargraph::operators::builtin_registry;

use super::args::CliArgs;
use super::errors::AppError;
use super::params::{merge_variables, parse_cache_size, read_param_file, source_specs};
use super::wiring::{operator_graph, wire_graph};

const PROGRESS_STEPS: u64 = 1000;

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn is_graph_file(target: &str) -> bool {
    let path = Path::new(target);
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xml"))
        || path.is_file()
}

pub fn general_usage(registry: &OperatorRegistry) -> String {
    let mut out = CliArgs::command().render_help().to_string();
    out.push_str("\nOperators:\n");
    for entry in registry.entries() {
        out.push_str(&format!("  {:<20}{}\n", entry.name, entry.description));
    }
    out
}

fn graph_usage(path: &Path) -> Result<String, AppError> {
    let template = fs::read_to_string(path)?;
    let mut out = format!("Usage:\n  sargraph {} [options] <source-file>...\n\n", path.display());
    let variables = template_variables(&template);
    if variables.is_empty() {
        out.push_str("The graph declares no template variables.\n");
    } else {
        out.push_str("Template variables (set with -P<name>=<value> or -t):\n");
        for name in variables {
            out.push_str(&format!("  ${{{name}}}\n"));
        }
    }
    Ok(out)
}

fn help_text(registry: &OperatorRegistry, topic: &str) -> Result<String, AppError> {
    if topic.is_empty() {
        return Ok(general_usage(registry));
    }
    if let Ok(entry) = registry.resolve(topic) {
        return Ok(entry.usage());
    }
    if is_graph_file(topic) {
        return graph_usage(Path::new(topic));
    }
    Err(AppError::usage(
        format!("Unknown operator or graph file: {topic}"),
        general_usage(registry),
    ))
}

fn engine_config(args: &CliArgs) -> Result<EngineConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = args.workers {
        config.worker_threads = Some(workers);
    }
    if let Some(size) = &args.cache_size {
        config.cache_size_bytes = parse_cache_size(size)?;
    }
    config.validate()?;
    Ok(config)
}

fn param_file(args: &CliArgs) -> Result<BTreeMap<String, String>, AppError> {
    match &args.param_file {
        Some(path) => read_param_file(path),
        None => Ok(BTreeMap::new()),
    }
}

fn build_graph(args: &CliArgs, target: &str, registry: &OperatorRegistry) -> Result<Graph, AppError> {
    let sources = source_specs(&args.sources, &args.source_ids);
    let file_params = param_file(args)?;

    if is_graph_file(target) {
        let variables = merge_variables(&sources, &file_params, &args.parameters);
        debug!(?variables, "Graph substitutions");
        let mut graph = read_graph_file(Path::new(target), &variables)?;
        let wiring = wire_graph(&mut graph, &sources, &args.target_file, args.format)?;
        debug!(?wiring, "Auto-wired graph");
        return Ok(graph);
    }

    let entry = registry
        .resolve(target)
        .map_err(|e| AppError::usage(e.to_string(), general_usage(registry)))?;
    let params: Vec<(String, String)> = file_params
        .into_iter()
        .chain(args.parameters.iter().cloned())
        .collect();
    operator_graph(entry, &params, &sources, &args.target_file, args.format)
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(PROGRESS_STEPS);
    let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] [{bar:40}] {percent}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

pub fn run(args: CliArgs) -> Result<(), AppError> {
    init_logging(args.log);
    let registry = Arc::new(builtin_registry());

    if let Some(topic) = args.help.as_deref() {
        print!("{}", help_text(&registry, topic)?);
        return Ok(());
    }

    let Some(target) = args.target.as_deref() else {
        return Err(AppError::usage(
            "No operator or graph file given",
            general_usage(&registry),
        ));
    };

    let mut graph = build_graph(&args, target, &registry)?;
    let rewrite = rewrite_product_sets(&mut graph).map_err(sargraph::Error::from)?;
    if !rewrite.is_noop() {
        info!(
            expanded = ?rewrite.expanded,
            created = rewrite.created.len(),
            "Expanded product sets"
        );
    }

    let config = engine_config(&args)?;
    let scheduler = Scheduler::new(config, registry, Arc::new(FileIo))?;

    let bar = progress_bar();
    let listener = bar.clone();
    let progress = ProgressMonitor::with_listener(move |fraction| {
        listener.set_position((fraction * PROGRESS_STEPS as f64).round() as u64);
    });

    let result = scheduler.execute(&graph, &progress);
    bar.finish_and_clear();
    let report = result?;

    info!(
        terminals = ?report.terminals,
        tiles = report.tiles_computed,
        cache_hits = report.cache.hits,
        elapsed = ?report.elapsed,
        "Processing complete"
    );
    Ok(())
}
