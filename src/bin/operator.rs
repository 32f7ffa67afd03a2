//! Control-plane entrypoint: runs the Task and TaskSpawner controllers
//! until the process is signalled.

use kelos_operator::controllers;
use kelos_operator::errors::OperatorError;
use kelos_operator::logger;
use kelos_operator::metrics_registry::{MetricsRegistry, StdMetricsRegistry};
use kelos_operator::services::kube_client::KubeService;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    logger::init();

    if let Err(err) = run().await {
        error!("operator failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), OperatorError> {
    let kube = KubeService::new().await?;
    let metrics: Box<dyn MetricsRegistry> = Box::new(StdMetricsRegistry::new());

    info!("kelos operator starting");
    tokio::try_join!(
        controllers::task::run_task_controller(kube.clone(), metrics.clone()),
        controllers::task_spawner::run_spawner_controller(kube.clone(), metrics.clone()),
    )?;

    info!("kelos operator stopped");
    Ok(())
}
