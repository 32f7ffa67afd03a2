//! The spawn cycle: the loop running inside each spawner pod that turns
//! discovered work items into Task resources under policy and budget.

pub mod policy;
pub mod sources;

use crate::constants::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE, LABEL_SPAWNER};
use crate::errors::{OperatorError, is_kube_error_code};
use crate::io_models::task::{Task, TaskSpec};
use crate::io_models::task_spawner::{
    CONDITION_BUDGET_EXHAUSTED, CONDITION_SUSPENDED, SpawnerMode, SpawnerPhase, TaskSpawner,
    TaskSpawnerStatus, set_condition,
};
use crate::kubers_utils::kube_delete_if_present;
use crate::metrics_registry::{MetricsRegistry, TaskLabels};
use crate::services::kube_client::KubeService;
use crate::template::{render_error_message, render_work_item_template};
use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use policy::should_retrigger;
use serde_json::json;
use sources::cron::CronSource;
use sources::github::{GithubSource, GithubToken};
use sources::jira::JiraSource;
use sources::{DiscoveryContext, Source, WorkItem};
use std::collections::HashMap;
use std::path::PathBuf;

/// Annotation carrying the discovered item's URL on spawned Tasks.
pub const ANNOTATION_WORK_ITEM_URL: &str = "kelos.dev/work-item-url";

#[derive(Debug, PartialEq)]
pub enum CycleOutcome {
    /// The spawner resource is gone; the pod should exit cleanly.
    SpawnerGone,
    Suspended,
    Completed { discovered: usize, created: usize },
}

/// Source coordinates handed to the pod as CLI flags. The workload args
/// are the pod's contract: when set they win over the (possibly newer)
/// CRD fields, which only take effect once the spawner reconciler has
/// rolled the workload.
#[derive(Clone, Debug, Default)]
pub struct SourceOverrides {
    pub github_owner: Option<String>,
    pub github_repo: Option<String>,
    pub github_api_base_url: Option<String>,
    pub jira_base_url: Option<String>,
    pub jira_project: Option<String>,
    pub jira_jql: Option<String>,
}

pub struct SpawnEngine {
    kube: KubeService,
    metrics: Box<dyn MetricsRegistry>,
    spawner_name: String,
    namespace: String,
    github_token_file: Option<PathBuf>,
    overrides: SourceOverrides,
}

impl SpawnEngine {
    pub fn new(
        kube: KubeService,
        metrics: Box<dyn MetricsRegistry>,
        spawner_name: String,
        namespace: String,
        github_token_file: Option<PathBuf>,
        overrides: SourceOverrides,
    ) -> Self {
        SpawnEngine { kube, metrics, spawner_name, namespace, github_token_file, overrides }
    }

    /// Poll until the spawner disappears or the process is told to stop.
    pub async fn run(&self) -> Result<(), OperatorError> {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .map_err(|e| OperatorError::Source(anyhow::anyhow!("cannot install signal handler: {e}")))?;

        loop {
            match self.run_once().await {
                Ok(CycleOutcome::SpawnerGone) => {
                    info!("taskspawner {}/{} is gone, exiting", self.namespace, self.spawner_name);
                    return Ok(());
                }
                Ok(CycleOutcome::Suspended) => {
                    debug!("taskspawner {}/{} is suspended", self.namespace, self.spawner_name);
                }
                Ok(CycleOutcome::Completed { discovered, created }) => {
                    info!(
                        "cycle done for {}/{}: discovered {discovered}, created {created}",
                        self.namespace, self.spawner_name
                    );
                }
                // A failed cycle leaves status untouched; the next tick
                // retries from the last recorded state.
                Err(err) => {
                    error!("spawn cycle failed for {}/{}: {err}", self.namespace, self.spawner_name);
                    self.metrics.record_reconcile_error("spawner-cycle");
                }
            }

            let interval = self.current_poll_interval().await;
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = sigterm.recv() => {
                    info!("received SIGTERM, exiting between cycles");
                    return Ok(());
                }
            }
        }
    }

    /// One discovery/admission/creation pass plus its status write.
    pub async fn run_once(&self) -> Result<CycleOutcome, OperatorError> {
        let api: Api<TaskSpawner> = Api::namespaced(self.kube.client(), &self.namespace);
        let Some(spawner) = api.get_opt(&self.spawner_name).await? else {
            return Ok(CycleOutcome::SpawnerGone);
        };

        if spawner.spec.is_suspended() {
            let mut status = spawner.status.clone().unwrap_or_default();
            status.phase = SpawnerPhase::Suspended;
            set_condition(
                &mut status.conditions,
                CONDITION_SUSPENDED,
                true,
                Some("SpecSuspended"),
                Some("spawner is suspended, skipping discovery"),
                Utc::now(),
            );
            self.patch_status(&status).await?;
            return Ok(CycleOutcome::Suspended);
        }

        let stats = self.cycle(&spawner).await?;
        Ok(CycleOutcome::Completed { discovered: stats.discovered, created: stats.created })
    }

    async fn cycle(&self, spawner: &TaskSpawner) -> Result<CycleStats, OperatorError> {
        let now = Utc::now();
        let source = self.build_source(spawner)?;

        let last_discovery = spawner
            .status
            .as_ref()
            .and_then(|s| s.last_discovery_time.as_deref())
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        let items = source
            .discover(&DiscoveryContext { last_discovery_time: last_discovery, now })
            .await?;
        let discovered = items.len();
        debug!("discovered {discovered} work items");

        let existing = self
            .kube
            .list_spawner_tasks(&self.namespace, &self.spawner_name)
            .await?;

        let mut plan = plan_candidates(&self.spawner_name, items, &existing);
        for stale in &plan.retrigger_deletes {
            info!("retriggering {stale}: deleting completed task");
            kube_delete_if_present::<Task>(&self.kube.client(), &self.namespace, stale).await?;
        }

        policy::sort_by_priority(&mut plan.candidates, source.priority_labels());

        let active_at_start = existing
            .iter()
            .filter(|t| !t.phase().is_terminal())
            .count();
        let total_at_start = existing.len() - plan.retrigger_deletes.len();
        let mut budget = AdmissionBudget::new(
            spawner.spec.max_concurrency.unwrap_or(0),
            spawner.spec.max_total_tasks.unwrap_or(0),
            active_at_start,
            total_at_start,
        );

        let tasks: Api<Task> = Api::namespaced(self.kube.client(), &self.namespace);
        let mut created = 0usize;
        for item in &plan.candidates {
            if !budget.allows_another() {
                debug!("admission budget exhausted, skipping remaining candidates");
                break;
            }
            let task = match self.render_task(spawner, item) {
                Ok(task) => task,
                Err(err) => {
                    warn!("cannot render templates for item {}: {}", item.id, render_error_message(&err));
                    continue;
                }
            };

            match tasks.create(&PostParams::default(), &task).await {
                Ok(_) => {
                    info!("created task {}", task.name_any());
                    budget.record_created();
                    created += 1;
                    self.metrics.record_task_created(&TaskLabels {
                        namespace: self.namespace.clone(),
                        agent_type: spawner.spec.task_template.agent_type.clone(),
                        spawner: self.spawner_name.clone(),
                        model: spawner.spec.task_template.model.clone().unwrap_or_default(),
                    });
                }
                // Benign duplicate: someone else created it first.
                Err(e) if is_kube_error_code(&e, 409) => {
                    debug!("task {} already exists", task.name_any());
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut status = spawner.status.clone().unwrap_or_default();
        status.phase = SpawnerPhase::Running;
        status.last_discovery_time = Some(now.to_rfc3339());
        status.total_discovered = discovered as i32;
        status.total_tasks_created += created as i32;
        status.active_tasks = (active_at_start + created) as i32;
        set_condition(&mut status.conditions, CONDITION_SUSPENDED, false, None, None, now);
        let max_total = spawner.spec.max_total_tasks.unwrap_or(0);
        set_condition(
            &mut status.conditions,
            CONDITION_BUDGET_EXHAUSTED,
            max_total > 0 && (total_at_start + created) as i32 >= max_total,
            Some("MaxTotalTasks"),
            None,
            now,
        );
        self.patch_status(&status).await?;

        Ok(CycleStats { discovered, created })
    }

    fn build_source(&self, spawner: &TaskSpawner) -> Result<Box<dyn Source>, OperatorError> {
        let when = &spawner.spec.when;
        let mode = when.mode().map_err(OperatorError::invalid_spec)?;
        match mode {
            SpawnerMode::GithubIssues => {
                let mut config = when.github_issues.clone().expect("mode checked");
                if let Some(owner) = &self.overrides.github_owner {
                    config.owner = owner.clone();
                }
                if let Some(repo) = &self.overrides.github_repo {
                    config.repo = repo.clone();
                }
                if let Some(base_url) = &self.overrides.github_api_base_url {
                    config.api_base_url = Some(base_url.clone());
                }
                let token = match &self.github_token_file {
                    Some(path) => GithubToken::File(path.clone()),
                    None => GithubToken::Env,
                };
                Ok(Box::new(GithubSource::new(config, token)?))
            }
            SpawnerMode::Jira => {
                let mut config = when.jira.clone().expect("mode checked");
                if let Some(base_url) = &self.overrides.jira_base_url {
                    config.base_url = base_url.clone();
                }
                if let Some(project) = &self.overrides.jira_project {
                    config.project = project.clone();
                }
                if let Some(jql) = &self.overrides.jira_jql {
                    config.jql = Some(jql.clone());
                }
                Ok(Box::new(JiraSource::new(config)?))
            }
            SpawnerMode::Cron => {
                let config = when.cron.as_ref().expect("mode checked");
                Ok(Box::new(CronSource::new(&config.schedule)?))
            }
        }
    }

    /// Render one work item into the Task the template describes.
    fn render_task(&self, spawner: &TaskSpawner, item: &WorkItem) -> Result<Task, tera::Error> {
        let template = &spawner.spec.task_template;
        let prompt = render_work_item_template(&template.prompt_template, item)?;
        let branch = template
            .branch_template
            .as_deref()
            .map(|t| render_work_item_template(t, item))
            .transpose()?;

        let spec = TaskSpec {
            agent_type: template.agent_type.clone(),
            prompt,
            credentials: template.credentials.clone(),
            model: template.model.clone(),
            image: template.image.clone(),
            workspace_ref: template.workspace_ref.clone(),
            agent_config_ref: template.agent_config_ref.clone(),
            branch,
            depends_on: vec![],
            ttl_seconds_after_finished: template.ttl_seconds_after_finished,
            pod_overrides: template.pod_overrides.clone(),
        };

        let mut task = Task::new(&task_name(&self.spawner_name, item), spec);
        task.metadata.namespace = Some(self.namespace.clone());
        let labels = task.metadata.labels.get_or_insert_with(Default::default);
        labels.insert(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_VALUE.to_string());
        labels.insert(LABEL_SPAWNER.to_string(), self.spawner_name.clone());
        if !item.url.is_empty() {
            task.metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(ANNOTATION_WORK_ITEM_URL.to_string(), item.url.clone());
        }
        Ok(task)
    }

    async fn patch_status(&self, status: &TaskSpawnerStatus) -> Result<(), OperatorError> {
        let api: Api<TaskSpawner> = Api::namespaced(self.kube.client(), &self.namespace);
        let patch = json!({ "status": status });
        match api
            .patch_status(&self.spawner_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_kube_error_code(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn current_poll_interval(&self) -> std::time::Duration {
        let api: Api<TaskSpawner> = Api::namespaced(self.kube.client(), &self.namespace);
        match api.get_opt(&self.spawner_name).await {
            Ok(Some(spawner)) => spawner.spec.effective_poll_interval(),
            _ => std::time::Duration::from_secs(crate::constants::DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

struct CycleStats {
    discovered: usize,
    created: usize,
}

/// `<spawner>-<workItem.id>`: the unique link between a work item and
/// its agent run.
pub fn task_name(spawner: &str, item: &WorkItem) -> String {
    format!("{spawner}-{}", item.id)
}

pub(crate) struct CandidatePlan {
    pub candidates: Vec<WorkItem>,
    /// Names of completed tasks deleted to make room for a retrigger.
    pub retrigger_deletes: Vec<String>,
}

/// Dedup discovered items against existing tasks and apply the
/// retrigger rule: a terminal task whose item carries a newer trigger
/// time is deleted and its item becomes a candidate again.
pub(crate) fn plan_candidates(
    spawner_name: &str,
    items: Vec<WorkItem>,
    existing: &[Task],
) -> CandidatePlan {
    let by_name: HashMap<String, &Task> =
        existing.iter().map(|t| (t.name_any(), t)).collect();

    let mut candidates = vec![];
    let mut retrigger_deletes = vec![];

    for item in items {
        let name = task_name(spawner_name, &item);
        match by_name.get(&name) {
            None => candidates.push(item),
            Some(task) if task.phase().is_terminal() => {
                if should_retrigger(&item, task.completion_time()) {
                    retrigger_deletes.push(name);
                    candidates.push(item);
                }
            }
            Some(_) => {}
        }
    }

    CandidatePlan { candidates, retrigger_deletes }
}

/// The single enforcement point for `maxConcurrency` and
/// `maxTotalTasks`. Zero means unlimited. The total budget counts
/// cluster-visible tasks, not the status counter, so it stays correct
/// across spawner restarts.
pub(crate) struct AdmissionBudget {
    max_concurrency: i32,
    max_total: i32,
    active: i32,
    total: i32,
}

impl AdmissionBudget {
    pub fn new(max_concurrency: i32, max_total: i32, active: usize, total: usize) -> Self {
        AdmissionBudget {
            max_concurrency,
            max_total,
            active: active as i32,
            total: total as i32,
        }
    }

    pub fn allows_another(&self) -> bool {
        if self.max_concurrency > 0 && self.active >= self.max_concurrency {
            return false;
        }
        if self.max_total > 0 && self.total >= self.max_total {
            return false;
        }
        true
    }

    pub fn record_created(&mut self) {
        self.active += 1;
        self.total += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_models::task::{TaskPhase, TaskStatus};
    use chrono::TimeZone;

    fn item(id: &str, trigger_time: Option<DateTime<Utc>>) -> WorkItem {
        WorkItem { id: id.to_string(), trigger_time, ..Default::default() }
    }

    fn existing_task(name: &str, phase: TaskPhase, completed: Option<DateTime<Utc>>) -> Task {
        let spec: TaskSpec = serde_json::from_value(serde_json::json!({
            "type": "claude-code",
            "prompt": "p",
            "credentials": {"type": "api-key", "secretRef": "s"}
        }))
        .unwrap();
        let mut task = Task::new(name, spec);
        task.status = Some(TaskStatus {
            phase,
            completion_time: completed.map(|t| t.to_rfc3339()),
            ..Default::default()
        });
        task
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn new_items_become_candidates() {
        let plan = plan_candidates("triage", vec![item("1", None), item("2", None)], &[]);
        assert_eq!(plan.candidates.len(), 2);
        assert!(plan.retrigger_deletes.is_empty());
    }

    #[test]
    fn existing_tasks_dedup_their_items() {
        // given: task triage-1 exists and is still running
        let existing = vec![existing_task("triage-1", TaskPhase::Running, None)];

        // when
        let plan = plan_candidates("triage", vec![item("1", None), item("2", None)], &existing);

        // then: only the unseen item survives
        let ids: Vec<&str> = plan.candidates.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
    }

    #[test]
    fn terminal_task_without_newer_trigger_stays_done() {
        let existing = vec![existing_task("triage-42", TaskPhase::Succeeded, Some(at(10)))];

        // item retriggered before completion: not a candidate
        let plan = plan_candidates("triage", vec![item("42", Some(at(9)))], &existing);
        assert!(plan.candidates.is_empty());

        // no trigger time at all: not a candidate
        let plan = plan_candidates("triage", vec![item("42", None)], &existing);
        assert!(plan.candidates.is_empty());
    }

    #[test]
    fn newer_trigger_deletes_and_recreates() {
        // given: triage-42 succeeded at 10:10, trigger posted at 10:11
        let existing = vec![existing_task("triage-42", TaskPhase::Succeeded, Some(at(10)))];

        // when
        let plan = plan_candidates("triage", vec![item("42", Some(at(11)))], &existing);

        // then
        assert_eq!(plan.retrigger_deletes, vec!["triage-42".to_string()]);
        assert_eq!(plan.candidates.len(), 1);
        assert_eq!(plan.candidates[0].id, "42");
    }

    #[test]
    fn running_task_is_never_retriggered() {
        let existing = vec![existing_task("triage-42", TaskPhase::Running, None)];
        let plan = plan_candidates("triage", vec![item("42", Some(at(11)))], &existing);
        assert!(plan.candidates.is_empty());
        assert!(plan.retrigger_deletes.is_empty());
    }

    #[test]
    fn concurrency_cap_counts_active_plus_created() {
        // given: cap 2, no active tasks
        let mut budget = AdmissionBudget::new(2, 0, 0, 0);

        assert!(budget.allows_another());
        budget.record_created();
        assert!(budget.allows_another());
        budget.record_created();

        // then: third admission is refused
        assert!(!budget.allows_another());
    }

    #[test]
    fn concurrency_cap_includes_preexisting_active_tasks() {
        let budget = AdmissionBudget::new(2, 0, 2, 5);
        assert!(!budget.allows_another());
    }

    #[test]
    fn total_budget_counts_cluster_tasks() {
        // given: lifetime cap of 3 with 2 tasks already in the cluster
        let mut budget = AdmissionBudget::new(0, 3, 0, 2);

        assert!(budget.allows_another());
        budget.record_created();
        assert!(!budget.allows_another(), "3 of 3 used");
    }

    #[test]
    fn zero_means_unlimited() {
        let mut budget = AdmissionBudget::new(0, 0, 100, 100);
        for _ in 0..10 {
            assert!(budget.allows_another());
            budget.record_created();
        }
    }

    #[test]
    fn task_names_link_spawner_and_item() {
        assert_eq!(task_name("triage", &item("42", None)), "triage-42");
        assert_eq!(task_name("nightly", &item("20260701-1005", None)), "nightly-20260701-1005");
    }

    #[test]
    fn priority_orders_admission_under_a_concurrency_cap() {
        // given: A(no label), B(p2), C(p1); priority [p1, p2]; cap 2
        let labelled = |id: &str, labels: &[&str]| WorkItem {
            id: id.to_string(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let mut candidates = vec![
            labelled("a", &[]),
            labelled("b", &["p2"]),
            labelled("c", &["p1"]),
        ];
        let mut budget = AdmissionBudget::new(2, 0, 0, 0);

        // when: the cycle sorts then admits in order
        policy::sort_by_priority(&mut candidates, &["p1".to_string(), "p2".to_string()]);
        let mut created = vec![];
        for candidate in &candidates {
            if !budget.allows_another() {
                break;
            }
            budget.record_created();
            created.push(candidate.id.clone());
        }

        // then: C and B are created, A is cut by the cap
        assert_eq!(created, vec!["c", "b"]);
    }
}
