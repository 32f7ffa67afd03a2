/// Numeric UID/GID shared by the git init containers and the agent
/// container so that files written during setup stay readable.
pub const AGENT_UID: i64 = 61100;

/// Mount point of the scratch volume holding the cloned repository.
pub const WORKSPACE_MOUNT_PATH: &str = "/workspace";

/// Where the workspace repository is cloned inside the pod.
pub const REPO_DIR: &str = "/workspace/repo";

/// Root directory under which plugins are materialised.
pub const PLUGIN_DIR: &str = "/workspace/plugins";

/// Entrypoint script baked into every agent image. The rendered prompt
/// is handed over as `$1`.
pub const AGENT_ENTRYPOINT: &str = "/kelos_entrypoint.sh";

/// Prefix reserved for operator-provided container env vars. User env
/// from pod overrides never shadows names carrying this prefix.
pub const ENV_PREFIX: &str = "KELOS_";

pub const ENV_AGENT_TYPE: &str = "KELOS_AGENT_TYPE";
pub const ENV_MODEL: &str = "KELOS_MODEL";
pub const ENV_BRANCH: &str = "KELOS_BRANCH";
pub const ENV_BASE_BRANCH: &str = "KELOS_BASE_BRANCH";
pub const ENV_UPSTREAM_REPO: &str = "KELOS_UPSTREAM_REPO";
pub const ENV_TASKSPAWNER: &str = "KELOS_TASKSPAWNER";
pub const ENV_AGENTS_MD: &str = "KELOS_AGENTS_MD";
pub const ENV_PLUGIN_DIR: &str = "KELOS_PLUGIN_DIR";
pub const ENV_MCP_SERVERS: &str = "KELOS_MCP_SERVERS";
pub const ENV_MARKETPLACE_PLUGINS: &str = "KELOS_MARKETPLACE_PLUGINS";

/// Per-plugin token env vars are named `KELOS_PLUGIN_TOKEN_<i>` so each
/// clone helper only ever sees its own credential.
pub const ENV_PLUGIN_TOKEN_PREFIX: &str = "KELOS_PLUGIN_TOKEN_";

pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_GH_TOKEN: &str = "GH_TOKEN";
pub const ENV_GH_ENTERPRISE_TOKEN: &str = "GH_ENTERPRISE_TOKEN";
pub const ENV_GH_HOST: &str = "GH_HOST";

pub const ENV_JIRA_USER: &str = "JIRA_USER";
pub const ENV_JIRA_TOKEN: &str = "JIRA_TOKEN";

/// Labels stamped on every object the operator creates.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_MANAGED_BY_VALUE: &str = "kelos-operator";
pub const LABEL_TASK: &str = "kelos.dev/task";
pub const LABEL_SPAWNER: &str = "kelos.dev/spawner";
pub const LABEL_AGENT_TYPE: &str = "kelos.dev/agent-type";

pub const API_GROUP: &str = "kelos.dev";
pub const API_VERSION: &str = "v1alpha1";

pub const SPAWNER_FINALIZER: &str = "kelos.dev/spawner-cleanup";

/// Status messages are bounded so a noisy failure cannot bloat etcd.
pub const MAX_STATUS_MESSAGE_LEN: usize = 1024;

/// Log lines bracketing the structured result block an agent prints.
pub const OUTPUTS_START_MARKER: &str = "---KELOS_OUTPUTS_START---";
pub const OUTPUTS_END_MARKER: &str = "---KELOS_OUTPUTS_END---";

/// Upper bound for a single pod log fetch when scraping results.
pub const MAX_LOG_BYTES: i64 = 512 * 1024;

/// Image used for all generated init containers (clone, remotes,
/// branch, file injection, plugin setup).
pub const GIT_IMAGE: &str = "alpine/git:2.47.2";

/// ServiceAccount name shared by every spawner pod in a namespace.
pub const SPAWNER_SERVICE_ACCOUNT: &str = "kelos-spawner";

/// Cluster-wide Role granting what the spawner pod needs.
pub const SPAWNER_ROLE: &str = "kelos-spawner-role";

/// Default spawner pod image; override with `KELOS_SPAWNER_IMAGE`.
pub const DEFAULT_SPAWNER_IMAGE: &str = "ghcr.io/kelos-dev/kelos-spawner:latest";

/// Image of the token-refresher native sidecar used for GitHub App
/// credentials.
pub const TOKEN_REFRESHER_IMAGE: &str = "ghcr.io/kelos-dev/token-refresher:latest";

/// Where the token-refresher sidecar writes short-lived tokens.
pub const GITHUB_TOKEN_FILE: &str = "/var/run/kelos/github-token";

/// Cron spawners poll on a fixed one minute tick.
pub const CRON_POLL_INTERVAL_SECS: u64 = 60;

/// Default poll interval for GitHub and Jira spawners.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// A cron source never emits more than this many ticks per discovery,
/// so a long spawner outage cannot flood the cluster with tasks.
pub const MAX_CRON_TICKS: usize = 10;

/// Comment bytes fetched per work item before filtering.
pub const MAX_COMMENT_BYTES: usize = 64 * 1024;

pub fn spawner_image() -> String {
    std::env::var("KELOS_SPAWNER_IMAGE").unwrap_or_else(|_| DEFAULT_SPAWNER_IMAGE.to_string())
}
