use crate::io_models::task::TaskPhase;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const METRIC_TASKS_CREATED: &str = "kelos_tasks_created_total";
pub const METRIC_TASKS_COMPLETED: &str = "kelos_tasks_completed_total";
pub const METRIC_TASK_DURATION: &str = "kelos_task_duration_seconds";
pub const METRIC_TASK_COST_USD: &str = "kelos_task_cost_usd_total";
pub const METRIC_TASK_INPUT_TOKENS: &str = "kelos_task_input_tokens_total";
pub const METRIC_TASK_OUTPUT_TOKENS: &str = "kelos_task_output_tokens_total";
pub const METRIC_RECONCILE_ERRORS: &str = "kelos_reconcile_errors_total";

/// Label set shared by the task-level instruments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TaskLabels {
    pub namespace: String,
    pub agent_type: String,
    pub spawner: String,
    pub model: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub name: &'static str,
    pub labels: Vec<(&'static str, String)>,
}

/// Seam between the control loops and whatever exporter the deployment
/// wires up. The in-process implementation below is also what tests
/// assert against.
pub trait MetricsRegistry: Send + Sync {
    fn record_task_created(&self, labels: &TaskLabels);
    fn record_task_completed(&self, labels: &TaskLabels, phase: TaskPhase, duration: Duration);
    fn record_task_cost(
        &self,
        labels: &TaskLabels,
        cost_usd: Option<f64>,
        input_tokens: Option<f64>,
        output_tokens: Option<f64>,
    );
    fn record_reconcile_error(&self, controller: &'static str);
    fn clone_dyn(&self) -> Box<dyn MetricsRegistry>;
}

impl Clone for Box<dyn MetricsRegistry> {
    fn clone(&self) -> Self {
        self.clone_dyn()
    }
}

#[derive(Default)]
struct Instruments {
    counters: HashMap<MetricKey, f64>,
    histograms: HashMap<MetricKey, Vec<f64>>,
}

/// Mutex-guarded in-process registry.
#[derive(Clone, Default)]
pub struct StdMetricsRegistry {
    instruments: Arc<Mutex<Instruments>>,
}

impl StdMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_counter(&self, key: MetricKey, delta: f64) {
        let mut instruments = self.instruments.lock().unwrap();
        *instruments.counters.entry(key).or_insert(0.0) += delta;
    }

    fn observe(&self, key: MetricKey, value: f64) {
        let mut instruments = self.instruments.lock().unwrap();
        instruments.histograms.entry(key).or_default().push(value);
    }

    pub fn counter_value(&self, key: &MetricKey) -> f64 {
        let instruments = self.instruments.lock().unwrap();
        instruments.counters.get(key).copied().unwrap_or(0.0)
    }

    pub fn histogram_values(&self, key: &MetricKey) -> Vec<f64> {
        let instruments = self.instruments.lock().unwrap();
        instruments.histograms.get(key).cloned().unwrap_or_default()
    }
}

fn task_label_pairs(labels: &TaskLabels) -> Vec<(&'static str, String)> {
    vec![
        ("namespace", labels.namespace.clone()),
        ("type", labels.agent_type.clone()),
        ("spawner", labels.spawner.clone()),
        ("model", labels.model.clone()),
    ]
}

impl MetricsRegistry for StdMetricsRegistry {
    fn record_task_created(&self, labels: &TaskLabels) {
        self.add_counter(
            MetricKey {
                name: METRIC_TASKS_CREATED,
                labels: vec![
                    ("namespace", labels.namespace.clone()),
                    ("spawner", labels.spawner.clone()),
                ],
            },
            1.0,
        );
    }

    fn record_task_completed(&self, labels: &TaskLabels, phase: TaskPhase, duration: Duration) {
        let mut label_pairs = task_label_pairs(labels);
        label_pairs.push(("phase", phase.to_string()));
        self.add_counter(MetricKey { name: METRIC_TASKS_COMPLETED, labels: label_pairs }, 1.0);
        self.observe(
            MetricKey { name: METRIC_TASK_DURATION, labels: task_label_pairs(labels) },
            duration.as_secs_f64(),
        );
    }

    fn record_task_cost(
        &self,
        labels: &TaskLabels,
        cost_usd: Option<f64>,
        input_tokens: Option<f64>,
        output_tokens: Option<f64>,
    ) {
        let pairs = task_label_pairs(labels);
        if let Some(cost) = cost_usd {
            self.add_counter(MetricKey { name: METRIC_TASK_COST_USD, labels: pairs.clone() }, cost);
        }
        if let Some(tokens) = input_tokens {
            self.add_counter(
                MetricKey { name: METRIC_TASK_INPUT_TOKENS, labels: pairs.clone() },
                tokens,
            );
        }
        if let Some(tokens) = output_tokens {
            self.add_counter(MetricKey { name: METRIC_TASK_OUTPUT_TOKENS, labels: pairs }, tokens);
        }
    }

    fn record_reconcile_error(&self, controller: &'static str) {
        self.add_counter(
            MetricKey {
                name: METRIC_RECONCILE_ERRORS,
                labels: vec![("controller", controller.to_string())],
            },
            1.0,
        );
    }

    fn clone_dyn(&self) -> Box<dyn MetricsRegistry> {
        Box::new(self.clone())
    }
}
