//! CLI command definitions for ephemera.
//!
//! `host` prints the address containers are reachable at; `run` launches one
//! container, waits for it and reports its published ports.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::Settings;
use crate::container::{ContainerOrchestrator, ContainerSpec};
use crate::wait::{HttpProbe, WaitStrategy};

/// Ephemeral containers for integration tests.
#[derive(Parser, Debug)]
#[command(name = "ephemera")]
#[command(about = "Provision ephemeral containers and report how to reach them")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Runtime endpoint, overriding DOCKER_HOST.
    #[arg(long, global = true)]
    pub docker_host: Option<String>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Print the host address published container ports are reachable at.
    Host,

    /// Start a container, wait until it is ready and print its ports.
    Run(RunArgs),
}

/// Arguments for `run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Image reference, e.g. `redis:7`.
    pub image: String,

    /// Container port to publish (TCP); repeatable.
    #[arg(short, long = "port")]
    pub ports: Vec<u16>,

    /// Environment variable as KEY=VALUE; repeatable.
    #[arg(short, long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Wait until every published port accepts connections.
    #[arg(long, conflicts_with_all = ["wait_log", "wait_http"])]
    pub wait_port: bool,

    /// Wait until the logs contain this regex.
    #[arg(long, conflicts_with = "wait_http")]
    pub wait_log: Option<String>,

    /// Wait until GET on this path of the first port returns 200.
    #[arg(long)]
    pub wait_http: Option<String>,

    /// Readiness timeout in seconds.
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Leave the container running instead of removing it on exit.
    #[arg(long)]
    pub keep: bool,

    /// Command to run instead of the image default.
    #[arg(last = true)]
    pub cmd: Vec<String>,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parse the process arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with already-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let mut settings = Settings::from_env();
    if let Some(host) = cli.docker_host {
        settings = settings.with_docker_host(host);
    }
    let orchestrator = ContainerOrchestrator::from_settings(Arc::new(settings))
        .context("Failed to connect to the container runtime")?;

    match cli.command {
        Commands::Host => {
            let host = orchestrator.resolver().resolve_host().await?;
            println!("{host}");
        }
        Commands::Run(args) => run_container(&orchestrator, args).await?,
    }
    Ok(())
}

fn wait_strategy(args: &RunArgs) -> anyhow::Result<WaitStrategy> {
    let strategy = if args.wait_port {
        WaitStrategy::port_open()
    } else if let Some(pattern) = &args.wait_log {
        WaitStrategy::log(pattern).with_context(|| format!("Invalid log pattern '{pattern}'"))?
    } else if let Some(path) = &args.wait_http {
        WaitStrategy::http(HttpProbe::new(path.clone()))
    } else {
        WaitStrategy::running()
    };
    Ok(strategy.with_timeout(Duration::from_secs(args.timeout)))
}

fn build_spec(args: &RunArgs) -> anyhow::Result<ContainerSpec> {
    let mut spec = ContainerSpec::new(&args.image).with_wait(wait_strategy(args)?);
    for port in &args.ports {
        spec = spec.with_exposed_port(*port);
    }
    for (key, value) in &args.env {
        spec = spec.with_env(key, value);
    }
    if !args.cmd.is_empty() {
        spec = spec.with_cmd(args.cmd.iter().cloned());
    }
    Ok(spec)
}

async fn run_container(orchestrator: &ContainerOrchestrator, args: RunArgs) -> anyhow::Result<()> {
    let spec = build_spec(&args)?;
    let container = orchestrator.start(spec).await?;
    let host = container.host().await?;

    println!("id: {}", container.id());
    println!("host: {host}");
    for port in &args.ports {
        let mapped = container.mapped_port(*port).await?;
        println!("{port}/tcp -> {host}:{mapped}");
    }

    if args.keep {
        info!(container = %container.id(), "Leaving container running");
        return Ok(());
    }
    let stopped = container.stop().await?;
    info!(container = %stopped.id(), "Container removed");
    Ok(())
}
