use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use console::style;
use signal_hook::consts::{SIGINT, SIGTERM};

use kiln::config::{UserConfig, discover_config, load_config, parse_override};
use kiln::{
    CancelToken, ConfigFragment, KilnError, PluginCatalog, Prepared, Project, RunOptions,
    SolcToolchain,
};

/// Plugin activated when the configuration file lists none.
const DEFAULT_PLUGIN: &str = "toolbox";

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Plugin-composable build orchestrator for smart contract projects."
)]
struct Cli {
    /// Task to run.
    #[arg(default_value = "compile")]
    task: String,

    /// Configuration file (default: kiln.toml or kiln.json in the working directory).
    #[arg(long, env = "KILN_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Override a configuration value, e.g. `--set solidity=0.8.20`. Values
    /// are read as JSON where they parse, compiler versions always as text.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Maximum number of tasks running at the same time.
    #[arg(long, short)]
    jobs: Option<usize>,

    /// List the available tasks and exit.
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Print the task graph as a Mermaid diagram and exit.
    #[arg(long, default_value_t = false)]
    graph: bool,
}

fn main() -> ExitCode {
    if let Err(e) = kiln::init_logging() {
        eprintln!("{} couldn't set up logging: {}", style("warning:").yellow().bold(), e);
    }

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.downcast_ref::<KilnError>().map_or(1, KilnError::exit_code);
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let start = Instant::now();

    let cancel = CancelToken::new();
    for signal in [SIGINT, SIGTERM] {
        // A second signal while the first is being honored exits right away.
        signal_hook::flag::register_conditional_shutdown(signal, 130, cancel.flag())
            .context("couldn't install signal handlers")?;
        signal_hook::flag::register(signal, cancel.flag())
            .context("couldn't install signal handlers")?;
    }

    let prepared = prepare(&cli)?;

    if cli.list {
        for name in prepared.graph.task_names() {
            let description = prepared
                .graph
                .definition(name)
                .and_then(|task| task.description())
                .unwrap_or_default();
            println!("  {:<24} {}", style(name).cyan(), description);
        }
        return Ok(());
    }

    if cli.graph {
        print!("{}", prepared.graph);
        return Ok(());
    }

    let mut options = RunOptions::default().with_cancel(cancel);
    if let Some(jobs) = cli.jobs {
        options = options.with_jobs(jobs);
    }

    let output = prepared.run(&cli.task, options)?;

    for (name, execution) in &output.diagnostics.execution_times {
        tracing::debug!("{} took {:.2?}", name, execution.duration);
    }

    eprintln!(
        "{} {} {}",
        style("Finished").green().bold(),
        cli.task,
        kiln::as_overhead(start)
    );

    Ok(())
}

/// Loads the configuration file, applies `--set` overrides and validates the
/// whole invocation.
fn prepare(cli: &Cli) -> anyhow::Result<Prepared> {
    let path = cli
        .config
        .clone()
        .or_else(|| discover_config(Utf8Path::new(".")));

    let user = match &path {
        Some(path) => load_config(path).map_err(KilnError::from)?,
        None => {
            tracing::warn!("No kiln.toml found, using plugin defaults");
            UserConfig::default()
        }
    };

    let mut overrides = ConfigFragment::new();
    for raw in &cli.set {
        overrides = parse_override(raw)
            .and_then(|fragment| overrides.overlay(&fragment))
            .map_err(KilnError::from)?;
    }

    let plugins = if user.plugins.is_empty() {
        vec![DEFAULT_PLUGIN.to_string()]
    } else {
        user.plugins
    };

    let catalog = PluginCatalog::builtin(Arc::new(SolcToolchain::new()));

    let prepared = Project::new()
        .activate(&catalog, &plugins)
        .map_err(KilnError::from)?
        .user(user.fragment)
        .overrides(overrides)
        .prepare()?;

    Ok(prepared)
}
