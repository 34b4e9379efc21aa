//! Open5GS operator: runs Open5GS 5G cores and their subscribers on Kubernetes

use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt, ResourceExt};

use open5gs_common::crd::{Open5GS, Open5GSUser};
use open5gs_common::telemetry::{init_telemetry, TelemetryConfig};
use open5gs_common::{DEFAULT_DATASTORE_PORT, OPERATOR_NAME};

mod controller_runner;

use controller_runner::{build_subscriber_controller, build_topology_controller, RunnerSettings};

/// Open5GS operator - reconciles Open5GS and Open5GSUser resources
#[derive(Parser, Debug)]
#[command(name = "open5gs-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    Controller,
}

#[derive(Args, Debug, Clone, PartialEq)]
struct ControllerArgs {
    /// Seconds between passes of one object, also used after errors
    #[arg(long, global = true, env = "OPEN5GS_REQUEUE_SECS", default_value_t = 10)]
    requeue_secs: u64,

    /// Objects reconciled in parallel per controller
    #[arg(long, global = true, env = "OPEN5GS_CONCURRENCY", default_value_t = 4)]
    concurrency: u16,

    /// Port of the subscriber datastore Service
    #[arg(long, global = true, env = "OPEN5GS_DATASTORE_PORT", default_value_t = DEFAULT_DATASTORE_PORT)]
    datastore_port: u16,

    /// Do not apply the CRDs on startup
    #[arg(long, global = true)]
    skip_crd_install: bool,
}

impl ControllerArgs {
    fn settings(&self) -> RunnerSettings {
        RunnerSettings {
            requeue: Duration::from_secs(self.requeue_secs),
            concurrency: self.concurrency,
            datastore_port: self.datastore_port,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube and the datastore driver both pull in rustls; pin one provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    let telemetry = init_telemetry(TelemetryConfig::from_env())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;
    tracing::debug!(exporting = telemetry.exporting(), "telemetry initialized");

    let result = match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    };
    telemetry.shutdown();
    result
}

fn crds() -> Vec<CustomResourceDefinition> {
    vec![Open5GS::crd(), Open5GSUser::crd()]
}

/// Both CRDs as a multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let mut out = String::new();
    for crd in crds() {
        let yaml = serde_yaml::to_string(&crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

/// Install the CRDs with server-side apply so they always match this build
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(OPERATOR_NAME).force();

    for crd in crds() {
        let name = crd.name_any();
        tracing::info!(crd = %name, "Installing CRD");
        api.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!(?args, "Open5GS operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if args.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crds_installed(&client).await?;
    }

    let settings = args.settings();
    tracing::info!("Starting controllers:");
    let topology = build_topology_controller(client.clone(), &settings);
    let subscribers = build_subscriber_controller(client, &settings);

    // both controllers stop on the same signal
    tokio::join!(topology, subscribers);

    tracing::info!("Open5GS operator shutting down");
    Ok(())
}
