use clap::{Parser, Subcommand};
use config::Config;
use router::config::ConfigSources;
use router::{DylibLoader, PropertyBag, RouteGrammar, Router, RoutingDriver};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser)]
#[command(name = "dynroute", version, about = "Inspect versioned backend routing")]
struct Cli {
    /// Settings file for this binary.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Backend configuration file or directory, searched with the highest priority.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `router=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Build the registry and list every backend.
    Check,
    /// Print the routing properties of a request.
    Describe {
        request: String,
        #[arg(short = 'p', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
    /// Resolve a request to its backend without loading it.
    Route {
        request: String,
        #[arg(short = 'p', long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,
    },
    /// Print the routed form of a plain backend URL.
    Url {
        url: String,
        #[arg(value_name = "VERSION")]
        backend_version: String,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] config::ConfigError),
    #[error(transparent)]
    Registry(#[from] router::ConfigError),
    #[error(transparent)]
    Route(#[from] router::RouteError),
    #[error("`{0}` is not addressed to this router")]
    NotRouted(String),
    #[error("could not write output: {0}")]
    Io(#[from] io::Error),
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw.split_once('=').unwrap_or((raw, ""));
    if key.is_empty() {
        return Err(format!("property `{raw}` has an empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn init_tracing(cli_level: Option<&str>, settings_level: Option<&str>) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(settings_level.unwrap_or(DEFAULT_LOG_LEVEL))),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => match Config::from_file(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("error: {e}");
                process::exit(1);
            }
        },
        None => Config::default(),
    };

    init_tracing(cli.log_level.as_deref(), settings.log_level.as_deref());
    shared::metrics_defs::describe_all(router::metrics_defs::ALL_METRICS);

    let mut stdout = io::stdout().lock();
    if let Err(e) = run(&cli, &settings, &mut stdout) {
        tracing::debug!(error = ?e, "Command failed");
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(cli: &Cli, settings: &Config, out: &mut impl Write) -> Result<(), CliError> {
    match &cli.command {
        CliCommand::Check => {
            let registry = build_router(cli, settings).registry()?;
            writeln!(out, "{} backend(s) registered", registry.len())?;
            for descriptor in registry.descriptors() {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    descriptor.route_key(),
                    descriptor.entry_point(),
                    descriptor.artifact().path.display()
                )?;
            }
        }
        CliCommand::Describe {
            request,
            properties,
        } => {
            let driver = RoutingDriver::new(build_router(cli, settings));
            for info in driver.describe_properties(request, &to_bag(properties)) {
                let required = if info.required { "required" } else { "optional" };
                writeln!(
                    out,
                    "{}\t{}\t{}\t{}",
                    info.name, required, info.current_value, info.description
                )?;
            }
        }
        CliCommand::Route {
            request,
            properties,
        } => {
            let router = build_router(cli, settings);
            let plan = router
                .plan(request, &to_bag(properties))?
                .ok_or_else(|| CliError::NotRouted(request.clone()))?;
            writeln!(out, "backend\t{}", plan.route_key)?;
            writeln!(out, "artifact\t{}", plan.descriptor.artifact().path.display())?;
            writeln!(out, "entry point\t{}", plan.descriptor.entry_point())?;
            writeln!(out, "target\t{}", plan.forward_target)?;
            for (key, value) in plan.properties.without_reserved().iter() {
                writeln!(out, "property\t{key}={value}")?;
            }
        }
        CliCommand::Url {
            url,
            backend_version,
        } => {
            writeln!(out, "{}", RouteGrammar::default().routed_url(url, backend_version))?;
        }
    }
    Ok(())
}

fn build_router(cli: &Cli, settings: &Config) -> Router {
    let sources = if settings.sources.is_empty() {
        ConfigSources::standard(cli.config.clone())
    } else {
        let sources = settings
            .sources
            .iter()
            .fold(ConfigSources::new(), |sources, path| sources.push(path));
        match &cli.config {
            Some(path) => sources.push(path),
            None => sources,
        }
    };
    Router::from_sources(sources, Arc::new(DylibLoader))
        .defaults(settings.defaults.clone().into())
}

fn to_bag(properties: &[(String, String)]) -> PropertyBag {
    properties.iter().cloned().collect()
}
