pub mod agent_config;
pub mod task;
pub mod task_spawner;
pub mod workspace;

pub use agent_config::{AgentConfig, AgentConfigSpec, McpServerSpec, PluginSpec};
pub use task::{Task, TaskPhase, TaskSpec, TaskStatus};
pub use task_spawner::{SpawnerMode, SpawnerPhase, TaskSpawner, TaskSpawnerSpec, TaskSpawnerStatus};
pub use workspace::{Workspace, WorkspaceSpec};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a namespace-local Secret by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
}

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        SecretRef { name: name.into() }
    }
}
