//! skyforged: the skyforge command-line entry point.
//!
//! # Usage
//!
//! ```text
//! skyforged init --name api --image ghcr.io/acme/api
//! skyforged targets --max-cost 10
//! skyforged deploy --reason "initial rollout" --approve-as alice
//! skyforged run
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use skyforge_catalog::TargetFilter;
use skyforge_core::{Approval, Provider, SkyforgeConfig, Tier};
use skyforge_planner::PlanRequest;
use skyforged::Orchestrator;

#[derive(Parser)]
#[command(name = "skyforged", about = "Multi-provider deployment orchestrator")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "skyforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter configuration file.
    Init {
        #[arg(long, default_value = "app")]
        name: String,

        #[arg(long, default_value = "registry.local/app")]
        image: String,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// List deployment targets, cheapest first.
    Targets {
        #[arg(long)]
        provider: Vec<String>,

        #[arg(long)]
        region: Vec<String>,

        /// Maximum monthly cost in USD.
        #[arg(long)]
        max_cost: Option<f64>,

        #[arg(long)]
        tier: Option<String>,
    },

    /// Create a deployment plan and print it without executing.
    Plan {
        #[arg(long, default_value = "manual deployment")]
        reason: String,

        /// Minimum tier for the chosen target.
        #[arg(long)]
        min_tier: Option<String>,

        /// Bypass the cost approval gate.
        #[arg(long)]
        urgent: bool,
    },

    /// Plan and execute a deployment.
    Deploy {
        #[arg(long, default_value = "manual deployment")]
        reason: String,

        #[arg(long)]
        min_tier: Option<String>,

        #[arg(long)]
        urgent: bool,

        /// Approve the plan as this operator if it needs approval.
        #[arg(long)]
        approve_as: Option<String>,
    },

    /// Run the health and autoscale loops until Ctrl-C.
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,skyforged=debug,skyforge=debug")
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Init { name, image, force } => init(&cli.config, &name, &image, force),
        Command::Targets {
            provider,
            region,
            max_cost,
            tier,
        } => {
            let orch = load(&cli.config)?;
            let providers = provider
                .iter()
                .map(|p| parse_provider(p))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let filter = TargetFilter {
                providers: non_empty(providers),
                regions: non_empty(region),
                max_cost,
                tier: tier.as_deref().map(parse_tier).transpose()?,
            };
            let targets = orch.discover_targets(&filter).await;
            println!("{}", serde_json::to_string_pretty(&targets)?);
            Ok(())
        }
        Command::Plan {
            reason,
            min_tier,
            urgent,
        } => {
            let orch = load(&cli.config)?;
            let plan = orch.create_plan(request(reason, min_tier, urgent)?).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Command::Deploy {
            reason,
            min_tier,
            urgent,
            approve_as,
        } => {
            let orch = load(&cli.config)?;
            let plan = orch.create_plan(request(reason, min_tier, urgent)?).await?;
            info!(plan = %plan.id, target = %plan.target.id, status = %plan.status, "plan created");

            let approval = approve_as.map(Approval::granted);
            if plan.requires_approval && approval.is_none() {
                warn!(
                    plan = %plan.id,
                    reason = plan.approval_reason.as_deref().unwrap_or_default(),
                    "plan requires approval; rerun with --approve-as"
                );
            }

            let result = orch.execute_plan(&plan.id, approval.as_ref()).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                anyhow::bail!(
                    "deployment failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Command::Run => run(&cli.config).await,
    }
}

fn init(path: &Path, name: &str, image: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let content = SkyforgeConfig::scaffold(name, image).to_toml_string()?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "configuration written");
    Ok(())
}

async fn run(path: &Path) -> anyhow::Result<()> {
    let orch = load(path)?;
    info!("skyforged starting");

    tokio::select! {
        _ = orch.run_control_loop() => {}
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received Ctrl-C");
            orch.shutdown();
        }
    }

    let status = orch.status().await;
    info!(
        live = status.live_instances,
        monthly_spend = status.monthly_spend,
        "skyforged stopped"
    );
    Ok(())
}

/// Load the orchestrator from `path`, or from built-in defaults when the
/// file does not exist.
fn load(path: &Path) -> anyhow::Result<Orchestrator> {
    let config = if path.exists() {
        SkyforgeConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        warn!(path = %path.display(), "config not found, using defaults");
        SkyforgeConfig::default()
    };
    Orchestrator::from_config_with_stubs(&config)
}

fn request(reason: String, min_tier: Option<String>, urgent: bool) -> anyhow::Result<PlanRequest> {
    let mut req = PlanRequest::new(reason);
    if let Some(tier) = min_tier.as_deref() {
        req = req.with_min_tier(parse_tier(tier)?);
    }
    if urgent {
        req = req.urgent();
    }
    Ok(req)
}

fn parse_provider(s: &str) -> anyhow::Result<Provider> {
    Provider::parse(s).ok_or_else(|| anyhow::anyhow!("unknown provider: {s}"))
}

fn parse_tier(s: &str) -> anyhow::Result<Tier> {
    Tier::parse(s).ok_or_else(|| anyhow::anyhow!("unknown tier: {s}"))
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    if v.is_empty() { None } else { Some(v) }
}
