#![allow(clippy::result_large_err)]

use anyhow::{anyhow, Context};
use armproxy::cache;
use armproxy::config::ProxyConfig;
use armproxy::limiter::ConcurrencyLimiter;
use armproxy::peering::reconciler::PeeringReconciler;
use armproxy::provider::rest::RestProvider;
use armproxy::retry::RetryPolicy;
use armproxy::telemetry;
use armproxy::topology::graph::{ConnectivityReport, ReachabilityGraph};
use armproxy::topology::machines::{load_gateway_routes, load_machines, DEFAULT_GATEWAY_IP};
use std::path::{Path, PathBuf};
use std::sync::Arc;

enum CliCommand {
    Serve,
    Connectivity {
        source: String,
        destination: String,
        folder: PathBuf,
        gateway_ip: String,
        routes_file: Option<PathBuf>,
    },
    PeeringReport {
        subscription: String,
        resource_group: Option<String>,
        refresh: bool,
    },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args()? {
        CliCommand::Serve => {
            let config = ProxyConfig::load().context("failed to load configuration")?;
            let app = armproxy::app::ProxyApp::initialise(config)
                .context("failed to construct application")?;
            app.run().await.context("application runtime error")
        }
        CliCommand::Connectivity {
            source,
            destination,
            folder,
            gateway_ip,
            routes_file,
        } => run_connectivity(&source, &destination, &folder, &gateway_ip, routes_file.as_deref()),
        CliCommand::PeeringReport {
            subscription,
            resource_group,
            refresh,
        } => run_peering_report(&subscription, resource_group.as_deref(), refresh).await,
        CliCommand::Help => {
            print_usage();
            Ok(())
        }
    }
}

fn run_connectivity(
    source: &str,
    destination: &str,
    folder: &Path,
    gateway_ip: &str,
    routes_file: Option<&Path>,
) -> anyhow::Result<()> {
    let machines = load_machines(folder)
        .with_context(|| format!("failed to read machine data from {}", folder.display()))?;
    if machines.is_empty() {
        return Err(anyhow!(
            "no machine data found in {}",
            folder.display()
        ));
    }

    let gateway_routes = load_gateway_routes(routes_file);
    let graph = ReachabilityGraph::build(&machines, gateway_ip, &gateway_routes);
    let report = ConnectivityReport::evaluate(&graph, source, destination);

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_peering_report(
    subscription: &str,
    resource_group: Option<&str>,
    refresh: bool,
) -> anyhow::Result<()> {
    let config = ProxyConfig::load().context("failed to load configuration")?;
    let limiter = ConcurrencyLimiter::new(config.limits.max_concurrent);
    let retry = RetryPolicy::from_config(&config.retry);
    let provider = Arc::new(
        RestProvider::new(&config.upstream, limiter, retry)
            .context("failed to construct upstream provider")?,
    );
    let cache = cache::from_config(&config.cache).context("failed to construct cache")?;
    let ttl = config.cache.ttl().context("invalid cache TTL")?;

    let reconciler = PeeringReconciler::new(provider, cache, ttl);
    let report = reconciler
        .report(subscription, resource_group, refresh)
        .await
        .context("peering reconciliation failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let Some(command) = args.first() else {
        return Ok(CliCommand::Help);
    };

    match command.as_str() {
        "serve" => Ok(CliCommand::Serve),
        "connectivity" => parse_connectivity_args(&args[1..]),
        "peering-report" => parse_peering_report_args(&args[1..]),
        "help" | "--help" | "-h" => Ok(CliCommand::Help),
        other => Err(anyhow!("unknown command `{other}`; run `armproxy help`")),
    }
}

fn parse_connectivity_args(args: &[String]) -> anyhow::Result<CliCommand> {
    let mut source = None;
    let mut destination = None;
    let mut folder = None;
    let mut gateway_ip = DEFAULT_GATEWAY_IP.to_string();
    let mut routes_file = None;

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value_for = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match flag.as_str() {
            "--source" | "-s" => source = Some(value_for(flag)?),
            "--destination" | "-d" => destination = Some(value_for(flag)?),
            "--folder" | "-f" => folder = Some(PathBuf::from(value_for(flag)?)),
            "--gateway-ip" | "-g" => gateway_ip = value_for(flag)?,
            "--routes-file" | "-r" => routes_file = Some(PathBuf::from(value_for(flag)?)),
            other => return Err(anyhow!("unknown connectivity flag `{other}`")),
        }
    }

    Ok(CliCommand::Connectivity {
        source: source.ok_or_else(|| anyhow!("--source is required"))?,
        destination: destination.ok_or_else(|| anyhow!("--destination is required"))?,
        folder: folder.ok_or_else(|| anyhow!("--folder is required"))?,
        gateway_ip,
        routes_file,
    })
}

fn parse_peering_report_args(args: &[String]) -> anyhow::Result<CliCommand> {
    let mut subscription = None;
    let mut resource_group = None;
    let mut refresh = false;

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value_for = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("missing value for {flag}"))
        };
        match flag.as_str() {
            "--subscription" | "-s" => subscription = Some(value_for(flag)?),
            "--resource-group" | "-g" => resource_group = Some(value_for(flag)?),
            "--refresh" => refresh = true,
            other => return Err(anyhow!("unknown peering-report flag `{other}`")),
        }
    }

    Ok(CliCommand::PeeringReport {
        subscription: subscription.ok_or_else(|| anyhow!("--subscription is required"))?,
        resource_group,
        refresh,
    })
}

fn print_usage() {
    println!(
        "armproxy — cached resource-manager facade with network topology analysis\n\
         \n\
         USAGE:\n\
         \x20   armproxy serve\n\
         \x20       Run the HTTP facade (configuration from config/local and ARMPROXY__* env vars)\n\
         \n\
         \x20   armproxy connectivity --source <vm> --destination <vm> --folder <path>\n\
         \x20                         [--gateway-ip <ip>] [--routes-file <path>]\n\
         \x20       Evaluate reachability between two machines from per-machine JSON route data\n\
         \n\
         \x20   armproxy peering-report --subscription <id> [--resource-group <name>] [--refresh]\n\
         \x20       Reconcile virtual-network peerings into bidirectional pair facts\n\
         \n\
         \x20   armproxy help\n\
         \x20       Show this message"
    );
}
