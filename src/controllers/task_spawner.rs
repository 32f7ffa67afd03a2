//! TaskSpawner reconciler: keeps the per-spawner infrastructure (service
//! account, role binding, Deployment or CronJob) matching the declared
//! `when` mode and the suspend flag, reconciling observed drift.

use crate::constants::{
    DEFAULT_POLL_INTERVAL_SECS, ENV_GITHUB_TOKEN, ENV_JIRA_TOKEN, ENV_JIRA_USER,
    GITHUB_TOKEN_FILE, LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE, LABEL_SPAWNER,
    SPAWNER_FINALIZER, SPAWNER_ROLE, SPAWNER_SERVICE_ACCOUNT, TOKEN_REFRESHER_IMAGE,
    spawner_image,
};
use crate::errors::{OperatorError, is_kube_error_code};
use crate::io_models::task_spawner::{
    CONDITION_SUSPENDED, SpawnerMode, SpawnerPhase, TaskSpawner, TaskSpawnerStatus, set_condition,
};
use crate::io_models::workspace::Workspace;
use crate::job_builder::{env_from_secret, env_value};
use crate::kubers_utils::kube_create_if_absent;
use crate::metrics_registry::MetricsRegistry;
use crate::services::kube_client::KubeService;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, PodSpec, PodTemplateSpec, Secret, ServiceAccount,
    Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{EventType, Recorder};
use kube::runtime::finalizer::{Event as FinalizerEvent, finalizer};
use kube::runtime::reflector::{ObjectRef, store::Writer};
use kube::runtime::{reflector, watcher};
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const CONTROLLER_NAME: &str = "taskspawner";
const TOKEN_VOLUME: &str = "github-token";
const TOKEN_MOUNT_PATH: &str = "/var/run/kelos";

pub struct Context {
    pub kube: KubeService,
    pub metrics: Box<dyn MetricsRegistry>,
    pub recorder: Recorder,
}

/// Run the TaskSpawner controller until shutdown.
///
/// Reconciles on spawner changes, changes to the owned workload, changes
/// to any Workspace referenced by a spawner, and changes to any Secret
/// referenced by such a Workspace.
pub async fn run_spawner_controller(
    kube: KubeService,
    metrics: Box<dyn MetricsRegistry>,
) -> Result<(), OperatorError> {
    let spawners: Api<TaskSpawner> = Api::all(kube.client());
    let deployments: Api<Deployment> = Api::all(kube.client());
    let cronjobs: Api<CronJob> = Api::all(kube.client());
    let workspaces: Api<Workspace> = Api::all(kube.client());
    let secrets: Api<Secret> = Api::all(kube.client());

    // Secondary reflectors so the watch mappers can answer "which
    // spawners care about this object" without API round-trips.
    let spawner_reader = {
        let writer = Writer::<TaskSpawner>::default();
        let reader = writer.as_reader();
        let stream = reflector(writer, watcher(spawners.clone(), watcher::Config::default()));
        tokio::spawn(async move {
            stream
                .for_each(|event| async {
                    if let Err(err) = event {
                        warn!("taskspawner reflector error: {err:?}");
                    }
                })
                .await;
        });
        reader
    };
    let workspace_reader = {
        let writer = Writer::<Workspace>::default();
        let reader = writer.as_reader();
        let stream = reflector(writer, watcher(workspaces.clone(), watcher::Config::default()));
        tokio::spawn(async move {
            stream
                .for_each(|event| async {
                    if let Err(err) = event {
                        warn!("workspace reflector error: {err:?}");
                    }
                })
                .await;
        });
        reader
    };

    let workspace_mapper = {
        let spawner_reader = spawner_reader.clone();
        move |workspace: Workspace| {
            let name = workspace.name_any();
            let namespace = workspace.namespace();
            spawner_reader
                .state()
                .into_iter()
                .filter(|s| {
                    s.namespace() == namespace
                        && s.spec.task_template.workspace_ref.as_deref() == Some(name.as_str())
                })
                .map(|s| ObjectRef::from_obj(s.as_ref()))
                .collect::<Vec<_>>()
        }
    };
    let secret_mapper = {
        let spawner_reader = spawner_reader.clone();
        let workspace_reader = workspace_reader.clone();
        move |secret: Secret| {
            let secret_name = secret.name_any();
            let namespace = secret.namespace();
            let referencing_workspaces: Vec<String> = workspace_reader
                .state()
                .into_iter()
                .filter(|w| {
                    w.namespace() == namespace
                        && w.spec.secret_ref.as_deref() == Some(secret_name.as_str())
                })
                .map(|w| w.name_any())
                .collect();
            spawner_reader
                .state()
                .into_iter()
                .filter(|s| {
                    s.namespace() == namespace
                        && s.spec
                            .task_template
                            .workspace_ref
                            .as_deref()
                            .map(|ws| referencing_workspaces.iter().any(|r| r == ws))
                            .unwrap_or(false)
                })
                .map(|s| ObjectRef::from_obj(s.as_ref()))
                .collect::<Vec<_>>()
        }
    };

    let recorder = Recorder::new(kube.client(), super::reporter());
    let context = Arc::new(Context { kube, metrics, recorder });

    info!("Starting taskspawner controller");
    Controller::new(spawners, watcher::Config::default())
        .owns(deployments, watcher::Config::default())
        .owns(cronjobs, watcher::Config::default())
        .watches(workspaces, watcher::Config::default(), workspace_mapper)
        .watches(secrets, watcher::Config::default(), secret_mapper)
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            if let Err(err) = result {
                debug!("taskspawner reconcile round failed: {err:?}");
            }
        })
        .await;

    Ok(())
}

async fn reconcile(spawner: Arc<TaskSpawner>, ctx: Arc<Context>) -> Result<Action, OperatorError> {
    let namespace = spawner
        .namespace()
        .ok_or_else(|| OperatorError::invalid_spec("taskspawner has no namespace"))?;
    let api: Api<TaskSpawner> = Api::namespaced(ctx.kube.client(), &namespace);

    finalizer(&api, SPAWNER_FINALIZER, spawner, |event| async {
        match event {
            FinalizerEvent::Apply(spawner) => apply(spawner, &ctx).await,
            FinalizerEvent::Cleanup(spawner) => cleanup(spawner).await,
        }
    })
    .await
    .map_err(|err| match err {
        kube::runtime::finalizer::Error::ApplyFailed(e)
        | kube::runtime::finalizer::Error::CleanupFailed(e) => e,
        kube::runtime::finalizer::Error::AddFinalizer(e)
        | kube::runtime::finalizer::Error::RemoveFinalizer(e) => OperatorError::KubeApi(e),
        kube::runtime::finalizer::Error::UnnamedObject => {
            OperatorError::invalid_spec("taskspawner has no name")
        }
        kube::runtime::finalizer::Error::InvalidFinalizer => {
            OperatorError::invalid_spec("invalid finalizer name")
        }
    })
}

async fn apply(spawner: Arc<TaskSpawner>, ctx: &Context) -> Result<Action, OperatorError> {
    let name = spawner.name_any();
    let namespace = spawner.namespace().expect("checked in reconcile");
    debug!("Reconciling taskspawner {namespace}/{name}");

    let mode = match spawner.spec.when.mode() {
        Ok(mode) => mode,
        Err(reason) => {
            // Invalid union: surface and stop until the spec changes.
            let mut status = spawner.status.clone().unwrap_or_default();
            status.phase = SpawnerPhase::Failed;
            patch_spawner_status(&ctx.kube.client(), &namespace, &name, &status).await?;
            super::record_event(
                &ctx.recorder,
                spawner.as_ref(),
                EventType::Warning,
                "InvalidSpec",
                "Reconciling",
                reason,
            )
            .await;
            return Ok(Action::await_change());
        }
    };

    ensure_rbac(ctx, &namespace).await?;

    // Workspace secret shape decides between plain token injection and
    // the token-refresher sidecar (GitHub App credentials).
    let workspace_secret = match &spawner.spec.task_template.workspace_ref {
        Some(ws_name) => {
            let api: Api<Workspace> = Api::namespaced(ctx.kube.client(), &namespace);
            match api.get(ws_name).await {
                Ok(ws) => ws.spec.secret_ref,
                Err(e) if is_kube_error_code(&e, 404) => {
                    return Err(OperatorError::reference_not_found("Workspace", ws_name));
                }
                Err(e) => return Err(e.into()),
            }
        }
        None => None,
    };
    let github_app = match &workspace_secret {
        Some(secret) if mode == SpawnerMode::GithubIssues => {
            let keys = ctx.kube.get_secret_keys(&namespace, secret).await?;
            is_github_app_secret(&keys)
        }
        _ => false,
    };

    let suspended = spawner.spec.is_suspended();
    let workload_name = spawner_workload_name(&name);
    let pod = build_pod_parts(&spawner, mode, workspace_secret.as_deref(), github_app);

    match mode {
        SpawnerMode::Cron => {
            let schedule = spawner.spec.when.cron.as_ref().expect("mode checked").schedule.clone();
            let desired = build_cronjob(&spawner, &workload_name, &schedule, suspended, pod);
            apply_workload::<CronJob>(ctx, &namespace, &workload_name, &desired).await?;
        }
        _ => {
            let desired = build_deployment(&spawner, &workload_name, suspended, pod);
            let deployments: Api<Deployment> = Api::namespaced(ctx.kube.client(), &namespace);
            match deployments.get_opt(&workload_name).await? {
                None => {
                    apply_workload::<Deployment>(ctx, &namespace, &workload_name, &desired).await?;
                    super::record_event(
                        &ctx.recorder,
                        spawner.as_ref(),
                        EventType::Normal,
                        "DeploymentCreated",
                        "Reconciling",
                        format!("Created spawner deployment {workload_name}"),
                    )
                    .await;
                }
                Some(existing) if deployment_needs_update(&existing, &desired) => {
                    info!("spawner deployment {namespace}/{workload_name} drifted, updating");
                    apply_workload::<Deployment>(ctx, &namespace, &workload_name, &desired).await?;
                }
                Some(_) => {}
            }
        }
    }

    let mut status = spawner.status.clone().unwrap_or_default();
    status.deployment_name = Some(workload_name);
    status.phase = if suspended {
        SpawnerPhase::Suspended
    } else if status.last_discovery_time.is_some() {
        SpawnerPhase::Running
    } else {
        SpawnerPhase::Pending
    };
    set_condition(
        &mut status.conditions,
        CONDITION_SUSPENDED,
        suspended,
        suspended.then_some("SpecSuspended"),
        None,
        Utc::now(),
    );
    patch_spawner_status(&ctx.kube.client(), &namespace, &name, &status).await?;

    // Drift safety net on top of the owns() watches.
    Ok(Action::requeue(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)))
}

/// The Deployment/CronJob is garbage-collected through its owner
/// reference; nothing else to tear down.
async fn cleanup(spawner: Arc<TaskSpawner>) -> Result<Action, OperatorError> {
    info!("taskspawner {} deleted", spawner.name_any());
    Ok(Action::await_change())
}

fn error_policy(_spawner: Arc<TaskSpawner>, error: &OperatorError, ctx: Arc<Context>) -> Action {
    ctx.metrics.record_reconcile_error(CONTROLLER_NAME);
    match error {
        err if err.is_terminal() => {
            error!("terminal taskspawner reconcile error, waiting for spec change: {err}");
            Action::await_change()
        }
        OperatorError::ReferenceNotFound { .. } => {
            warn!("taskspawner reconcile blocked on missing reference: {error}");
            Action::requeue(Duration::from_secs(10))
        }
        _ => {
            error!("taskspawner reconcile error: {error}");
            Action::requeue(Duration::from_secs(30))
        }
    }
}

/// ServiceAccount and RoleBinding every spawner pod in the namespace
/// shares. Created when missing, left alone otherwise.
async fn ensure_rbac(ctx: &Context, namespace: &str) -> Result<(), OperatorError> {
    let service_account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(SPAWNER_SERVICE_ACCOUNT.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        ..Default::default()
    };
    kube_create_if_absent(&ctx.kube.client(), namespace, &service_account).await?;

    let role_binding = RoleBinding {
        metadata: ObjectMeta {
            name: Some(format!("{SPAWNER_SERVICE_ACCOUNT}-binding")),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: SPAWNER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: SPAWNER_SERVICE_ACCOUNT.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    };
    kube_create_if_absent(&ctx.kube.client(), namespace, &role_binding).await?;
    Ok(())
}

async fn apply_workload<K>(
    ctx: &Context,
    namespace: &str,
    name: &str,
    desired: &K,
) -> Result<(), OperatorError>
where
    K: Clone
        + std::fmt::Debug
        + serde::Serialize
        + serde::de::DeserializeOwned
        + Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(ctx.kube.client(), namespace);
    let mut params = PatchParams::apply(super::REPORTER);
    params.force = true;
    api.patch(name, &params, &Patch::Apply(desired)).await?;
    Ok(())
}

async fn patch_spawner_status(
    client: &kube::Client,
    namespace: &str,
    name: &str,
    status: &TaskSpawnerStatus,
) -> Result<(), OperatorError> {
    let api: Api<TaskSpawner> = Api::namespaced(client.clone(), namespace);
    let patch = json!({ "status": status });
    match api
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if is_kube_error_code(&e, 404) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn spawner_workload_name(spawner: &str) -> String {
    format!("{spawner}-spawner")
}

/// A secret holding a GitHub App credential bundle rather than a plain
/// token, detected from its key shape.
pub fn is_github_app_secret(keys: &[String]) -> bool {
    let has = |k: &str| keys.iter().any(|key| key == k);
    has("appId") && has("installationId") && has("privateKey")
}

pub struct PodParts {
    pub init_containers: Vec<Container>,
    pub container: Container,
    pub volumes: Vec<Volume>,
}

/// One pod shape for both workload envelopes, so a spawner behaves the
/// same whether it runs as a Deployment or as a CronJob.
pub fn build_pod_parts(
    spawner: &TaskSpawner,
    mode: SpawnerMode,
    workspace_secret: Option<&str>,
    github_app: bool,
) -> PodParts {
    let name = spawner.name_any();
    let namespace = spawner.namespace().unwrap_or_default();

    let mut args = vec![
        "--taskspawner-name".to_string(),
        name.clone(),
        "--taskspawner-namespace".to_string(),
        namespace,
    ];
    let mut env: Vec<EnvVar> = vec![];
    let mut volumes: Vec<Volume> = vec![];
    let mut volume_mounts: Vec<VolumeMount> = vec![];
    let mut init_containers: Vec<Container> = vec![];

    match mode {
        SpawnerMode::GithubIssues => {
            let config = spawner.spec.when.github_issues.as_ref().expect("mode checked");
            args.extend([
                "--github-owner".to_string(),
                config.owner.clone(),
                "--github-repo".to_string(),
                config.repo.clone(),
            ]);
            if let Some(base_url) = &config.api_base_url {
                args.extend(["--github-api-base-url".to_string(), base_url.clone()]);
            }

            if github_app {
                // Native sidecar keeps a fresh installation token on a
                // shared volume; the spawner re-reads it every cycle.
                args.extend(["--github-token-file".to_string(), GITHUB_TOKEN_FILE.to_string()]);
                volumes.push(Volume {
                    name: TOKEN_VOLUME.to_string(),
                    empty_dir: Some(EmptyDirVolumeSource::default()),
                    ..Default::default()
                });
                volume_mounts.push(VolumeMount {
                    name: TOKEN_VOLUME.to_string(),
                    mount_path: TOKEN_MOUNT_PATH.to_string(),
                    ..Default::default()
                });
                init_containers.push(token_refresher_container(
                    workspace_secret.expect("github app implies a secret"),
                    config.api_base_url.as_deref(),
                ));
            } else if let Some(secret) = workspace_secret {
                env.push(env_from_secret(ENV_GITHUB_TOKEN, secret, ENV_GITHUB_TOKEN));
            }
        }
        SpawnerMode::Jira => {
            let config = spawner.spec.when.jira.as_ref().expect("mode checked");
            args.extend([
                "--jira-base-url".to_string(),
                config.base_url.clone(),
                "--jira-project".to_string(),
                config.project.clone(),
            ]);
            if let Some(jql) = &config.jql {
                args.extend(["--jira-jql".to_string(), jql.clone()]);
            }
            if let Some(secret) = &config.secret_ref {
                let mut user = env_from_secret(ENV_JIRA_USER, secret, ENV_JIRA_USER);
                if let Some(source) = user.value_from.as_mut() {
                    if let Some(selector) = source.secret_key_ref.as_mut() {
                        selector.optional = Some(true);
                    }
                }
                env.push(user);
                env.push(env_from_secret(ENV_JIRA_TOKEN, secret, ENV_JIRA_TOKEN));
            }
        }
        SpawnerMode::Cron => {
            args.push("--one-shot".to_string());
        }
    }

    let container = Container {
        name: "spawner".to_string(),
        image: Some(spawner_image()),
        args: Some(args),
        env: (!env.is_empty()).then_some(env),
        volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
        ..Default::default()
    };

    PodParts { init_containers, container, volumes }
}

fn token_refresher_container(secret: &str, api_base_url: Option<&str>) -> Container {
    let mut env = vec![
        env_from_secret("GITHUB_APP_ID", secret, "appId"),
        env_from_secret("GITHUB_APP_INSTALLATION_ID", secret, "installationId"),
        env_from_secret("GITHUB_APP_PRIVATE_KEY", secret, "privateKey"),
    ];
    if let Some(base_url) = api_base_url {
        env.push(env_value("GITHUB_API_BASE_URL", base_url));
    }
    Container {
        name: "token-refresher".to_string(),
        image: Some(TOKEN_REFRESHER_IMAGE.to_string()),
        args: Some(vec!["--output-file".to_string(), GITHUB_TOKEN_FILE.to_string()]),
        env: Some(env),
        volume_mounts: Some(vec![VolumeMount {
            name: TOKEN_VOLUME.to_string(),
            mount_path: TOKEN_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        // Native sidecar: restartable init container outliving the
        // ordinary init phase.
        restart_policy: Some("Always".to_string()),
        ..Default::default()
    }
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_VALUE.to_string())])
}

fn workload_labels(spawner: &TaskSpawner) -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.insert("app".to_string(), "kelos-spawner".to_string());
    labels.insert(LABEL_SPAWNER.to_string(), spawner.name_any());
    labels
}

fn pod_template(spawner: &TaskSpawner, parts: PodParts, restart_policy: &str) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(workload_labels(spawner)),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            service_account_name: Some(SPAWNER_SERVICE_ACCOUNT.to_string()),
            containers: vec![parts.container],
            init_containers: (!parts.init_containers.is_empty()).then_some(parts.init_containers),
            volumes: (!parts.volumes.is_empty()).then_some(parts.volumes),
            restart_policy: Some(restart_policy.to_string()),
            ..Default::default()
        }),
    }
}

pub fn build_deployment(
    spawner: &TaskSpawner,
    workload_name: &str,
    suspended: bool,
    parts: PodParts,
) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(workload_name.to_string()),
            namespace: spawner.namespace(),
            labels: Some(workload_labels(spawner)),
            owner_references: spawner.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(if suspended { 0 } else { 1 }),
            selector: LabelSelector {
                match_labels: Some(workload_labels(spawner)),
                ..Default::default()
            },
            template: pod_template(spawner, parts, "Always"),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn build_cronjob(
    spawner: &TaskSpawner,
    workload_name: &str,
    schedule: &str,
    suspended: bool,
    parts: PodParts,
) -> CronJob {
    CronJob {
        metadata: ObjectMeta {
            name: Some(workload_name.to_string()),
            namespace: spawner.namespace(),
            labels: Some(workload_labels(spawner)),
            owner_references: spawner.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: schedule.to_string(),
            suspend: Some(suspended),
            concurrency_policy: Some("Forbid".to_string()),
            job_template: JobTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(workload_labels(spawner)),
                    ..Default::default()
                }),
                spec: Some(JobSpec {
                    backoff_limit: Some(0),
                    template: pod_template(spawner, parts, "Never"),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The slice of a container the operator owns. Comparing whole structs
/// would flag API-server defaulting (pull policy, probe defaults) as
/// drift on every pass.
fn container_projection(container: &Container) -> (
    &str,
    Option<&String>,
    Option<&Vec<String>>,
    Option<&Vec<EnvVar>>,
    Option<&Vec<VolumeMount>>,
    Option<&String>,
) {
    (
        container.name.as_str(),
        container.image.as_ref(),
        container.args.as_ref(),
        container.env.as_ref(),
        container.volume_mounts.as_ref(),
        container.restart_policy.as_ref(),
    )
}

fn pod_projection(pod: &PodSpec) -> (
    Vec<(
        &str,
        Option<&String>,
        Option<&Vec<String>>,
        Option<&Vec<EnvVar>>,
        Option<&Vec<VolumeMount>>,
        Option<&String>,
    )>,
    Vec<&str>,
) {
    let containers = pod
        .containers
        .iter()
        .chain(pod.init_containers.iter().flatten())
        .map(container_projection)
        .collect();
    let volumes = pod
        .volumes
        .iter()
        .flatten()
        .map(|v| v.name.as_str())
        .collect();
    (containers, volumes)
}

/// True when the observed Deployment no longer matches the desired one
/// in any dimension the operator cares about: replicas, the main
/// container's image/args/env/mounts, the init containers, the volumes.
pub fn deployment_needs_update(existing: &Deployment, desired: &Deployment) -> bool {
    let existing_spec = existing.spec.as_ref();
    let desired_spec = desired.spec.as_ref();

    if existing_spec.and_then(|s| s.replicas) != desired_spec.and_then(|s| s.replicas) {
        return true;
    }

    let existing_pod = existing_spec.and_then(|s| s.template.spec.as_ref());
    let desired_pod = desired_spec.and_then(|s| s.template.spec.as_ref());
    match (existing_pod, desired_pod) {
        (Some(existing_pod), Some(desired_pod)) => {
            pod_projection(existing_pod) != pod_projection(desired_pod)
        }
        _ => true,
    }
}
