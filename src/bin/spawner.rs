//! Spawner pod entrypoint: discovers work items for one TaskSpawner and
//! materialises Tasks, either in a periodic loop (Deployment) or as a
//! single `--one-shot` cycle (CronJob).

use clap::Parser;
use kelos_operator::logger;
use kelos_operator::metrics_registry::{MetricsRegistry, StdMetricsRegistry};
use kelos_operator::services::kube_client::KubeService;
use kelos_operator::spawner::{CycleOutcome, SourceOverrides, SpawnEngine};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "kelos-spawner", about = "Work-item discovery loop for one TaskSpawner")]
struct Args {
    /// Name of the TaskSpawner this pod serves.
    #[arg(long)]
    taskspawner_name: String,

    /// Namespace of the TaskSpawner.
    #[arg(long)]
    taskspawner_namespace: String,

    /// GitHub repository owner (github mode).
    #[arg(long)]
    github_owner: Option<String>,

    /// GitHub repository name (github mode).
    #[arg(long)]
    github_repo: Option<String>,

    /// Enterprise API endpoint, e.g. https://github.example.com/api/v3.
    #[arg(long)]
    github_api_base_url: Option<String>,

    /// File holding a refreshable GitHub token (GitHub App mode);
    /// re-read every cycle. Falls back to $GITHUB_TOKEN when unset.
    #[arg(long)]
    github_token_file: Option<PathBuf>,

    /// Jira base url (jira mode).
    #[arg(long)]
    jira_base_url: Option<String>,

    /// Jira project key (jira mode).
    #[arg(long)]
    jira_project: Option<String>,

    /// Extra JQL filter (jira mode).
    #[arg(long)]
    jira_jql: Option<String>,

    /// Run exactly one cycle and exit (cron mode).
    #[arg(long)]
    one_shot: bool,
}

#[tokio::main]
async fn main() {
    logger::init();
    let args = Args::parse();

    let kube = match KubeService::new().await {
        Ok(kube) => kube,
        Err(err) => {
            error!("cannot connect to the cluster: {err}");
            std::process::exit(1);
        }
    };
    let metrics: Box<dyn MetricsRegistry> = Box::new(StdMetricsRegistry::new());
    let engine = SpawnEngine::new(
        kube,
        metrics,
        args.taskspawner_name.clone(),
        args.taskspawner_namespace.clone(),
        args.github_token_file.clone(),
        SourceOverrides {
            github_owner: args.github_owner.clone(),
            github_repo: args.github_repo.clone(),
            github_api_base_url: args.github_api_base_url.clone(),
            jira_base_url: args.jira_base_url.clone(),
            jira_project: args.jira_project.clone(),
            jira_jql: args.jira_jql.clone(),
        },
    );

    info!(
        "kelos spawner starting for {}/{}",
        args.taskspawner_namespace, args.taskspawner_name
    );

    if args.one_shot {
        match engine.run_once().await {
            Ok(CycleOutcome::Completed { discovered, created }) => {
                info!("one-shot cycle done: discovered {discovered}, created {created}");
            }
            Ok(CycleOutcome::Suspended) => info!("spawner is suspended, nothing to do"),
            Ok(CycleOutcome::SpawnerGone) => info!("spawner no longer exists, nothing to do"),
            Err(err) => {
                error!("one-shot cycle failed: {err}");
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(err) = engine.run().await {
        error!("spawner loop failed: {err}");
        std::process::exit(1);
    }
}
