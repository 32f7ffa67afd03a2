//! Task reconciler: drives a Task through `Pending -> Running ->
//! Succeeded|Failed` by managing its backing batch Job, captures
//! structured results from the job pod's logs once on the first terminal
//! observation, and deletes the Task after its finish-time TTL.

use crate::constants::{LABEL_SPAWNER, MAX_STATUS_MESSAGE_LEN};
use crate::controllers::job_output::{
    RESULT_COST_USD, RESULT_INPUT_TOKENS, RESULT_OUTPUT_TOKENS, numeric_result, parse_outputs,
};
use crate::errors::{OperatorError, is_kube_error_code};
use crate::io_models::agent_config::AgentConfig;
use crate::io_models::task::{Task, TaskPhase, TaskStatus};
use crate::io_models::workspace::Workspace;
use crate::job_builder::build_job;
use crate::kubers_utils::kube_delete_if_present;
use crate::metrics_registry::{MetricsRegistry, TaskLabels};
use crate::secret_manager::resolve_mcp_secret_refs;
use crate::services::kube_client::KubeService;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::batch::v1::{Job, JobCondition};
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{EventType, Recorder};
use kube::runtime::watcher;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const CONTROLLER_NAME: &str = "task";
const RUNNING_REQUEUE: Duration = Duration::from_secs(30);
const STATUS_CONFLICT_RETRIES: usize = 3;

pub struct Context {
    pub kube: KubeService,
    pub metrics: Box<dyn MetricsRegistry>,
    pub recorder: Recorder,
}

/// Run the Task controller until shutdown. Reconciles on Task changes
/// and on changes to the owned Jobs.
pub async fn run_task_controller(
    kube: KubeService,
    metrics: Box<dyn MetricsRegistry>,
) -> Result<(), OperatorError> {
    let tasks: Api<Task> = Api::all(kube.client());
    let jobs: Api<Job> = Api::all(kube.client());
    let recorder = Recorder::new(kube.client(), super::reporter());
    let context = Arc::new(Context { kube, metrics, recorder });

    info!("Starting task controller");
    Controller::new(tasks, watcher::Config::default())
        .owns(jobs, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            if let Err(err) = result {
                debug!("task reconcile round failed: {err:?}");
            }
        })
        .await;

    Ok(())
}

async fn reconcile(task: Arc<Task>, ctx: Arc<Context>) -> Result<Action, OperatorError> {
    let name = task.name_any();
    let namespace = task
        .namespace()
        .ok_or_else(|| OperatorError::invalid_spec("task has no namespace"))?;
    debug!("Reconciling task {namespace}/{name}");

    if task.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    if let Some(ttl) = task.spec.ttl_seconds_after_finished {
        if ttl < 0 {
            fail_task(&ctx, &task, &namespace, format!("invalid spec: ttlSecondsAfterFinished {ttl} is negative"))
                .await?;
            return Ok(Action::await_change());
        }
    }

    // TTL handling runs first: an expired Task only needs deleting.
    let (expired, requeue_in) = ttl_expired(&task, Utc::now());
    if expired {
        info!("task {namespace}/{name} exceeded its ttl, deleting");
        kube_delete_if_present::<Task>(&ctx.kube.client(), &namespace, &name).await?;
        return Ok(Action::await_change());
    }

    if task.phase().is_terminal() {
        return Ok(match requeue_in {
            Some(wait) => Action::requeue(wait),
            None => Action::await_change(),
        });
    }

    // Resolve references, then build and ensure the Job.
    let workspace = match &task.spec.workspace_ref {
        Some(ws_name) => {
            let api: Api<Workspace> = Api::namespaced(ctx.kube.client(), &namespace);
            match api.get(ws_name).await {
                Ok(ws) => Some(ws.spec),
                Err(e) if is_kube_error_code(&e, 404) => {
                    return Err(OperatorError::reference_not_found("Workspace", ws_name));
                }
                Err(e) => return Err(e.into()),
            }
        }
        None => None,
    };

    let agent_config = match &task.spec.agent_config_ref {
        Some(config_name) => {
            let api: Api<AgentConfig> = Api::namespaced(ctx.kube.client(), &namespace);
            match api.get(config_name).await {
                Ok(config) => {
                    let mut spec = config.spec;
                    resolve_mcp_secret_refs(&ctx.kube, &namespace, &mut spec.mcp_servers).await?;
                    Some(spec)
                }
                Err(e) if is_kube_error_code(&e, 404) => {
                    return Err(OperatorError::reference_not_found("AgentConfig", config_name));
                }
                Err(e) => return Err(e.into()),
            }
        }
        None => None,
    };

    let job = match build_job(&task, workspace.as_ref(), agent_config.as_ref(), &task.spec.prompt) {
        Ok(job) => job,
        Err(build_err) => {
            // Spec errors are terminal: record and stop until the spec
            // changes.
            fail_task(&ctx, &task, &namespace, build_err.to_string()).await?;
            return Ok(Action::await_change());
        }
    };

    let jobs: Api<Job> = Api::namespaced(ctx.kube.client(), &namespace);
    let job_name = job.metadata.name.clone().unwrap_or_else(|| name.clone());
    match jobs.create(&PostParams::default(), &job).await {
        Ok(_) => {
            info!("created job {job_name} for task {namespace}/{name}");
            super::record_event(
                &ctx.recorder,
                task.as_ref(),
                EventType::Normal,
                "JobCreated",
                "Reconciling",
                format!("Created job {job_name}"),
            )
            .await;
        }
        Err(e) if is_kube_error_code(&e, 409) => {}
        Err(e) => return Err(e.into()),
    }

    let observed = jobs.get_opt(&job_name).await?;
    let mut status = task.status.clone().unwrap_or_default();
    status.job_name = Some(job_name.clone());

    if let Some(job) = &observed {
        apply_job_state(&ctx, &task, &namespace, &job_name, job, &mut status).await?;
    }

    patch_task_status(&ctx.kube.client(), &namespace, &name, &status).await?;

    if status.phase.is_terminal() {
        let (_, requeue_in) = ttl_expired_with(&status, &task, Utc::now());
        Ok(match requeue_in {
            Some(wait) => Action::requeue(wait),
            None => Action::await_change(),
        })
    } else {
        Ok(Action::requeue(RUNNING_REQUEUE))
    }
}

/// Reflect the observed job state into the task status, capturing
/// outputs and metrics exactly once on the first terminal observation.
async fn apply_job_state(
    ctx: &Context,
    task: &Task,
    namespace: &str,
    job_name: &str,
    job: &Job,
    status: &mut TaskStatus,
) -> Result<(), OperatorError> {
    let job_status = job.status.as_ref();

    let active = job_status.and_then(|s| s.active).unwrap_or(0) > 0;
    if status.phase == TaskPhase::Pending && active {
        status.phase = TaskPhase::Running;
        let started = job_status
            .and_then(|s| s.start_time.as_ref())
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);
        status.start_time = Some(started.to_rfc3339());
    }

    if status.phase == TaskPhase::Running && status.pod_name.is_none() {
        status.pod_name = ctx.kube.find_job_pod(namespace, job_name).await.unwrap_or_default();
    }

    let terminal = if let Some(cond) = job_condition(job, "Complete") {
        Some((TaskPhase::Succeeded, cond))
    } else {
        job_condition(job, "Failed").map(|cond| (TaskPhase::Failed, cond))
    };

    let Some((phase, condition)) = terminal else {
        return Ok(());
    };
    if status.phase.is_terminal() {
        return Ok(());
    }

    status.phase = phase;
    let completed: DateTime<Utc> = condition
        .last_transition_time
        .as_ref()
        .map(|t| t.0)
        .unwrap_or_else(Utc::now);
    status.completion_time = Some(completed.to_rfc3339());
    status.message = Some(match phase {
        TaskPhase::Succeeded => "Job completed successfully".to_string(),
        _ => crate::string::cut(
            format!(
                "Job failed: {} {}",
                condition.reason.clone().unwrap_or_default(),
                condition.message.clone().unwrap_or_default()
            )
            .trim()
            .to_string(),
            MAX_STATUS_MESSAGE_LEN,
        ),
    });

    // Output capture is best-effort: a log fetch failure still lets the
    // phase advance with empty results.
    let pod_name = match &status.pod_name {
        Some(pod) => Some(pod.clone()),
        None => ctx.kube.find_job_pod(namespace, job_name).await.unwrap_or_default(),
    };
    if let Some(pod) = &pod_name {
        status.pod_name = Some(pod.clone());
        match ctx.kube.fetch_pod_logs(namespace, pod).await {
            Ok(logs) => status.results = parse_outputs(&logs),
            Err(err) => warn!("cannot fetch logs of pod {namespace}/{pod}: {err}"),
        }
    }

    let labels = task_metric_labels(task, namespace);
    let duration = duration_between(status.start_time.as_deref(), completed);
    ctx.metrics.record_task_completed(&labels, phase, duration);
    ctx.metrics.record_task_cost(
        &labels,
        numeric_result(&status.results, RESULT_COST_USD),
        numeric_result(&status.results, RESULT_INPUT_TOKENS),
        numeric_result(&status.results, RESULT_OUTPUT_TOKENS),
    );

    let (event_type, reason) = match phase {
        TaskPhase::Succeeded => (EventType::Normal, "TaskSucceeded"),
        _ => (EventType::Warning, "TaskFailed"),
    };
    super::record_event(
        &ctx.recorder,
        task,
        event_type,
        reason,
        "Reconciling",
        status.message.clone().unwrap_or_default(),
    )
    .await;

    Ok(())
}

/// Move a task to Failed with a user-visible message. Used for spec
/// errors, which do not retry until the spec changes.
async fn fail_task(
    ctx: &Context,
    task: &Task,
    namespace: &str,
    message: String,
) -> Result<(), OperatorError> {
    warn!("task {namespace}/{} rejected: {message}", task.name_any());
    let mut status = task.status.clone().unwrap_or_default();
    if status.phase.is_terminal() {
        return Ok(());
    }
    status.phase = TaskPhase::Failed;
    status.completion_time = Some(Utc::now().to_rfc3339());
    status.message = Some(crate::string::cut(message.clone(), MAX_STATUS_MESSAGE_LEN));
    patch_task_status(&ctx.kube.client(), namespace, &task.name_any(), &status).await?;

    ctx.metrics.record_task_completed(
        &task_metric_labels(task, namespace),
        TaskPhase::Failed,
        Duration::ZERO,
    );
    super::record_event(
        &ctx.recorder,
        task,
        EventType::Warning,
        "InvalidSpec",
        "Reconciling",
        message,
    )
    .await;
    Ok(())
}

fn error_policy(_task: Arc<Task>, error: &OperatorError, ctx: Arc<Context>) -> Action {
    ctx.metrics.record_reconcile_error(CONTROLLER_NAME);
    match error {
        err if err.is_terminal() => {
            error!("terminal task reconcile error, waiting for spec change: {err}");
            Action::await_change()
        }
        OperatorError::ReferenceNotFound { .. } => {
            warn!("task reconcile blocked on missing reference: {error}");
            Action::requeue(Duration::from_secs(10))
        }
        _ => {
            error!("task reconcile error: {error}");
            Action::requeue(Duration::from_secs(30))
        }
    }
}

/// TTL decision for a task: `(expired, requeue_in)`.
///
/// Never expires without a ttl, a terminal phase and a completion time.
/// When the deadline is in the future the second component carries the
/// exact wait until it is due.
pub fn ttl_expired(task: &Task, now: DateTime<Utc>) -> (bool, Option<Duration>) {
    let status = task.status.clone().unwrap_or_default();
    ttl_expired_with(&status, task, now)
}

fn ttl_expired_with(status: &TaskStatus, task: &Task, now: DateTime<Utc>) -> (bool, Option<Duration>) {
    let Some(ttl) = task.spec.ttl_seconds_after_finished else {
        return (false, None);
    };
    if !status.phase.is_terminal() {
        return (false, None);
    }
    let completed = status
        .completion_time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));
    let Some(completed) = completed else {
        return (false, None);
    };

    let deadline = completed + chrono::Duration::seconds(ttl.max(0));
    if now >= deadline {
        (true, None)
    } else {
        let wait = (deadline - now).to_std().unwrap_or(Duration::ZERO);
        (false, Some(wait))
    }
}

/// Merge-patch the task status, retrying a few times on write conflicts.
async fn patch_task_status(
    client: &kube::Client,
    namespace: &str,
    name: &str,
    status: &TaskStatus,
) -> Result<(), OperatorError> {
    let api: Api<Task> = Api::namespaced(client.clone(), namespace);
    let patch = json!({ "status": status });

    let mut attempt = 0;
    loop {
        match api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if is_kube_error_code(&e, 409) && attempt < STATUS_CONFLICT_RETRIES => {
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
            }
            Err(e) if is_kube_error_code(&e, 404) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

fn job_condition<'a>(job: &'a Job, condition_type: &str) -> Option<&'a JobCondition> {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| {
            conds
                .iter()
                .find(|c| c.type_ == condition_type && c.status == "True")
        })
}

fn task_metric_labels(task: &Task, namespace: &str) -> TaskLabels {
    TaskLabels {
        namespace: namespace.to_string(),
        agent_type: task.spec.agent_type.clone(),
        spawner: task.labels().get(LABEL_SPAWNER).cloned().unwrap_or_default(),
        model: task.spec.model.clone().unwrap_or_default(),
    }
}

fn duration_between(start: Option<&str>, end: DateTime<Utc>) -> Duration {
    start
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .and_then(|started| (end - started).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_models::task::TaskSpec;
    use chrono::TimeZone;

    fn task(ttl: Option<i64>, phase: TaskPhase, completed: Option<DateTime<Utc>>) -> Task {
        let spec: TaskSpec = serde_json::from_value(serde_json::json!({
            "type": "claude-code",
            "prompt": "p",
            "credentials": {"type": "api-key", "secretRef": "s"}
        }))
        .unwrap();
        let mut task = Task::new("t", spec);
        task.spec.ttl_seconds_after_finished = ttl;
        task.status = Some(TaskStatus {
            phase,
            completion_time: completed.map(|t| t.to_rfc3339()),
            ..Default::default()
        });
        task
    }

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, second).unwrap()
    }

    #[test]
    fn unset_ttl_never_expires() {
        let task = task(None, TaskPhase::Succeeded, Some(at(0)));
        assert_eq!(ttl_expired(&task, at(59)), (false, None));
    }

    #[test]
    fn non_terminal_phase_never_expires() {
        let task = task(Some(10), TaskPhase::Running, Some(at(0)));
        assert_eq!(ttl_expired(&task, at(59)), (false, None));
    }

    #[test]
    fn missing_completion_time_never_expires() {
        let task = task(Some(10), TaskPhase::Succeeded, None);
        assert_eq!(ttl_expired(&task, at(59)), (false, None));
    }

    #[test]
    fn future_deadline_requeues_for_the_remainder() {
        // given: completed at t=0, ttl 10s, now t=4
        let task = task(Some(10), TaskPhase::Succeeded, Some(at(0)));

        // when
        let (expired, wait) = ttl_expired(&task, at(4));

        // then
        assert!(!expired);
        assert_eq!(wait, Some(Duration::from_secs(6)));
    }

    #[test]
    fn past_deadline_expires() {
        let task = task(Some(10), TaskPhase::Failed, Some(at(0)));
        assert_eq!(ttl_expired(&task, at(30)), (true, None));
        // exactly at the deadline counts as expired
        assert_eq!(ttl_expired(&task, at(10)), (true, None));
    }

    #[test]
    fn expiry_is_monotone_in_time() {
        let task = task(Some(10), TaskPhase::Succeeded, Some(at(0)));
        let mut was_expired = false;
        for second in 0..60 {
            let (expired, _) = ttl_expired(&task, at(second));
            assert!(!was_expired || expired, "once expired it must stay expired");
            was_expired = expired;
        }
        assert!(was_expired);
    }

    #[test]
    fn zero_ttl_expires_immediately_after_completion() {
        let task = task(Some(0), TaskPhase::Succeeded, Some(at(5)));
        assert_eq!(ttl_expired(&task, at(5)), (true, None));
    }

    #[test]
    fn job_condition_requires_true_status() {
        let job: Job = serde_json::from_value(serde_json::json!({
            "status": {"conditions": [
                {"type": "Complete", "status": "False"},
                {"type": "Failed", "status": "True", "reason": "DeadlineExceeded"}
            ]}
        }))
        .unwrap();
        assert!(job_condition(&job, "Complete").is_none());
        assert_eq!(
            job_condition(&job, "Failed").unwrap().reason.as_deref(),
            Some("DeadlineExceeded")
        );
    }

    #[test]
    fn duration_between_tolerates_bad_timestamps() {
        assert_eq!(duration_between(None, at(10)), Duration::ZERO);
        assert_eq!(duration_between(Some("garbage"), at(10)), Duration::ZERO);
        assert_eq!(
            duration_between(Some(&at(0).to_rfc3339()), at(10)),
            Duration::from_secs(10)
        );
    }
}
