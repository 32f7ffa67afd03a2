//! Deterministic Task -> batch Job assembly.
//!
//! Given a Task plus its resolved Workspace and AgentConfig, produce the
//! Job spec the cluster will run, or fail naming the first invariant
//! violated. Nothing here talks to the API server: the reconciler owns
//! all I/O.

mod init;
mod mcp;
mod paths;

pub use init::{PLUGIN_VOLUME, WORKSPACE_VOLUME, env_from_secret, env_value};
pub use mcp::render_mcp_servers;
pub use paths::{validate_path_component, validate_workspace_file_path};

use crate::constants::{
    AGENT_ENTRYPOINT, AGENT_UID, ENV_AGENT_TYPE, ENV_AGENTS_MD, ENV_BASE_BRANCH, ENV_BRANCH,
    ENV_GH_ENTERPRISE_TOKEN, ENV_GH_HOST, ENV_GH_TOKEN, ENV_GITHUB_TOKEN,
    ENV_MARKETPLACE_PLUGINS, ENV_MCP_SERVERS, ENV_MODEL, ENV_PLUGIN_DIR, ENV_PREFIX,
    ENV_TASKSPAWNER, ENV_UPSTREAM_REPO, LABEL_AGENT_TYPE, LABEL_MANAGED_BY,
    LABEL_MANAGED_BY_VALUE, LABEL_SPAWNER, LABEL_TASK, PLUGIN_DIR, REPO_DIR,
};
use crate::errors::OperatorError;
use crate::io_models::agent_config::AgentConfigSpec;
use crate::io_models::task::{CredentialsKind, Task, TaskSpec};
use crate::io_models::workspace::WorkspaceSpec;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, PodSecurityContext, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecurityContext, Volume,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum BuildError {
    #[error("unsupported agent type {0:?}")]
    UnsupportedAgentType(String),

    #[error("agent type {agent_type:?} does not support {credentials} credentials")]
    UnsupportedCredentials {
        agent_type: String,
        credentials: String,
    },

    #[error("{field} name {value:?} must be a single path component")]
    UnsafePathComponent { field: &'static str, value: String },

    #[error("workspace file path {0:?} is absolute or escapes the repository root")]
    UnsafeFilePath(String),

    #[error("duplicate plugin name {0:?}")]
    DuplicatePlugin(String),

    #[error("duplicate mcp server name {0:?}")]
    DuplicateMcpServer(String),

    #[error("plugin {0:?} sets both github and inline content")]
    PluginSourceConflict(String),

    #[error("plugin {0:?} has neither a github source nor inline content")]
    EmptyPlugin(String),

    #[error("plugin {name:?} repo {repo:?} is not of the form owner/repo")]
    InvalidPluginRepo { name: String, repo: String },

    #[error("remote name `origin` is reserved")]
    ReservedRemoteName,

    #[error("remote entries need a non-empty name and url")]
    EmptyRemote,

    #[error("duplicate remote name {0:?}")]
    DuplicateRemote(String),

    #[error("cannot serialize mcp servers: {0}")]
    McpSerialization(String),
}

impl From<BuildError> for OperatorError {
    fn from(err: BuildError) -> Self {
        OperatorError::invalid_spec(err.to_string())
    }
}

struct AgentTypeInfo {
    default_image: &'static str,
    api_key_env: &'static str,
    oauth_env: Option<&'static str>,
}

fn agent_type_info(agent_type: &str) -> Option<AgentTypeInfo> {
    match agent_type {
        "claude-code" => Some(AgentTypeInfo {
            default_image: "ghcr.io/kelos-dev/agent-claude-code:latest",
            api_key_env: "ANTHROPIC_API_KEY",
            oauth_env: Some("CLAUDE_CODE_OAUTH_TOKEN"),
        }),
        "codex" => Some(AgentTypeInfo {
            default_image: "ghcr.io/kelos-dev/agent-codex:latest",
            api_key_env: "OPENAI_API_KEY",
            oauth_env: None,
        }),
        "gemini" => Some(AgentTypeInfo {
            default_image: "ghcr.io/kelos-dev/agent-gemini:latest",
            api_key_env: "GEMINI_API_KEY",
            oauth_env: None,
        }),
        _ => None,
    }
}

/// Build the Job realising one Task.
///
/// The workspace and agent config are the already-resolved referenced
/// objects; MCP secret references must have been folded in beforehand.
pub fn build_job(
    task: &Task,
    workspace: Option<&WorkspaceSpec>,
    agent_config: Option<&AgentConfigSpec>,
    prompt: &str,
) -> Result<Job, BuildError> {
    let spec = &task.spec;
    let info = agent_type_info(&spec.agent_type)
        .ok_or_else(|| BuildError::UnsupportedAgentType(spec.agent_type.clone()))?;

    let spawner = task.labels().get(LABEL_SPAWNER).cloned();
    let env = build_env(spec, workspace, agent_config, &info, spawner.as_deref())?;

    let has_plugins = agent_config.map(|c| !c.plugins.is_empty()).unwrap_or(false);

    let mut init_containers: Vec<Container> = vec![];
    let mut volumes: Vec<Volume> = vec![];

    if let Some(ws) = workspace {
        volumes.push(Volume {
            name: WORKSPACE_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        init_containers.push(init::git_clone_container(ws));
        if !ws.remotes.is_empty() {
            init_containers.push(init::remote_setup_container(&ws.remotes)?);
        }
        if let Some(branch) = &spec.branch {
            init_containers.push(init::branch_setup_container(branch, ws));
        }
        if !ws.files.is_empty() {
            init_containers.push(init::workspace_files_container(&ws.files)?);
        }
    }

    if has_plugins {
        volumes.push(Volume {
            name: PLUGIN_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        let config = agent_config.expect("has_plugins implies agent_config");
        init_containers.push(init::plugin_setup_container(
            &config.plugins,
            workspace.and_then(|w| w.secret_ref.as_deref()),
        )?);
    }

    let mut agent_mounts = vec![];
    if workspace.is_some() {
        agent_mounts.push(init::workspace_mount());
    }
    if has_plugins {
        agent_mounts.push(init::plugin_mount());
    }

    let overrides = spec.pod_overrides.as_ref();
    let agent_container = Container {
        name: "agent".to_string(),
        image: Some(
            spec.image
                .clone()
                .unwrap_or_else(|| info.default_image.to_string()),
        ),
        command: Some(vec![AGENT_ENTRYPOINT.to_string()]),
        args: Some(vec![prompt.to_string()]),
        env: Some(env),
        working_dir: workspace.map(|_| REPO_DIR.to_string()),
        volume_mounts: (!agent_mounts.is_empty()).then_some(agent_mounts),
        security_context: (workspace.is_some() || has_plugins).then(|| SecurityContext {
            run_as_user: Some(AGENT_UID),
            ..Default::default()
        }),
        resources: overrides.and_then(|o| o.resources.as_ref()).map(|r| {
            ResourceRequirements {
                requests: to_quantities(&r.requests),
                limits: to_quantities(&r.limits),
                ..Default::default()
            }
        }),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![agent_container],
        init_containers: (!init_containers.is_empty()).then_some(init_containers),
        volumes: (!volumes.is_empty()).then_some(volumes),
        restart_policy: Some("Never".to_string()),
        security_context: (workspace.is_some() || has_plugins).then(|| PodSecurityContext {
            fs_group: Some(AGENT_UID),
            ..Default::default()
        }),
        node_selector: overrides
            .filter(|o| !o.node_selector.is_empty())
            .map(|o| o.node_selector.clone()),
        ..Default::default()
    };

    let labels = job_labels(task, spawner.as_deref());
    Ok(Job {
        metadata: ObjectMeta {
            name: Some(task.name_any()),
            namespace: task.namespace(),
            labels: Some(labels.clone()),
            owner_references: task.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: overrides.and_then(|o| o.active_deadline_seconds),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        status: None,
    })
}

/// Assemble the agent container env in precedence order. Every name
/// produced here is reserved: colliding or `KELOS_`-prefixed user
/// entries from pod overrides are silently dropped.
fn build_env(
    spec: &TaskSpec,
    workspace: Option<&WorkspaceSpec>,
    agent_config: Option<&AgentConfigSpec>,
    info: &AgentTypeInfo,
    spawner: Option<&str>,
) -> Result<Vec<EnvVar>, BuildError> {
    let mut env: Vec<EnvVar> = vec![];

    // 1. agent type and model
    env.push(env_value(ENV_AGENT_TYPE, &spec.agent_type));
    if let Some(model) = &spec.model {
        env.push(env_value(ENV_MODEL, model));
    }

    // 2. branch tags
    if let Some(branch) = &spec.branch {
        env.push(env_value(ENV_BRANCH, branch));
    }
    if let Some(base) = workspace.and_then(|w| w.git_ref.as_deref()) {
        env.push(env_value(ENV_BASE_BRANCH, base));
    }

    // 3. agent credentials
    let credential_env = match spec.credentials.kind {
        CredentialsKind::ApiKey => info.api_key_env,
        CredentialsKind::Oauth => info.oauth_env.ok_or_else(|| {
            BuildError::UnsupportedCredentials {
                agent_type: spec.agent_type.clone(),
                credentials: spec.credentials.kind.to_string(),
            }
        })?,
    };
    env.push(env_from_secret(
        credential_env,
        &spec.credentials.secret_ref,
        credential_env,
    ));

    // 4. workspace auth
    if let Some(ws) = workspace {
        if let Some(secret) = &ws.secret_ref {
            env.push(env_from_secret(ENV_GITHUB_TOKEN, secret, ENV_GITHUB_TOKEN));
            if ws.is_enterprise() {
                env.push(env_from_secret(ENV_GH_ENTERPRISE_TOKEN, secret, ENV_GITHUB_TOKEN));
                if let Some(host) = ws.host() {
                    env.push(env_value(ENV_GH_HOST, &host));
                }
            } else {
                env.push(env_from_secret(ENV_GH_TOKEN, secret, ENV_GITHUB_TOKEN));
            }
        }

        // 5. upstream repo hint
        if let Some(upstream) = ws.upstream_repo() {
            env.push(env_value(ENV_UPSTREAM_REPO, &upstream));
        }
    }

    if let Some(spawner) = spawner {
        env.push(env_value(ENV_TASKSPAWNER, spawner));
    }

    // 6. agent config
    if let Some(config) = agent_config {
        if let Some(agents_md) = &config.agents_md {
            env.push(env_value(ENV_AGENTS_MD, agents_md));
        }
        if !config.plugins.is_empty() {
            env.push(env_value(ENV_PLUGIN_DIR, PLUGIN_DIR));
        }
        if !config.mcp_servers.is_empty() {
            env.push(env_value(ENV_MCP_SERVERS, &render_mcp_servers(&config.mcp_servers)?));
        }
        if !config.marketplace_plugins.is_empty() {
            env.push(env_value(
                ENV_MARKETPLACE_PLUGINS,
                &config.marketplace_plugins.join(","),
            ));
        }
    }

    // 7. pod override env, minus anything colliding with the above
    let reserved: HashSet<String> = env.iter().map(|e| e.name.clone()).collect();
    if let Some(overrides) = &spec.pod_overrides {
        for entry in &overrides.env {
            if reserved.contains(entry.name.as_str()) || entry.name.starts_with(ENV_PREFIX) {
                debug!("dropping user env {} shadowing a built-in", entry.name);
                continue;
            }
            env.push(env_value(&entry.name, &entry.value));
        }
    }

    Ok(dedup_user_env(env))
}

/// Later duplicates among user entries are dropped so the container spec
/// stays valid; built-ins are unique by construction.
fn dedup_user_env(env: Vec<EnvVar>) -> Vec<EnvVar> {
    let mut seen = HashSet::new();
    env.into_iter()
        .filter(|e| seen.insert(e.name.clone()))
        .collect()
}

fn to_quantities(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if map.is_empty() {
        return None;
    }
    Some(
        map.iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

fn job_labels(task: &Task, spawner: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_VALUE.to_string());
    labels.insert(LABEL_TASK.to_string(), task.name_any());
    labels.insert(LABEL_AGENT_TYPE.to_string(), task.spec.agent_type.clone());
    if let Some(spawner) = spawner {
        labels.insert(LABEL_SPAWNER.to_string(), spawner.to_string());
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_models::task::{
        CredentialsSpec, EnvVarOverride, PodOverrides, ResourcesOverride,
    };
    use crate::io_models::workspace::RemoteSpec;
    use maplit::btreemap;

    fn task(spec_json: serde_json::Value) -> Task {
        let spec: TaskSpec = serde_json::from_value(spec_json).unwrap();
        let mut task = Task::new("demo-task", spec);
        task.metadata.namespace = Some("agents".to_string());
        task
    }

    fn bare_task() -> Task {
        task(serde_json::json!({
            "type": "claude-code",
            "prompt": "Hello",
            "credentials": {"type": "api-key", "secretRef": "s"}
        }))
    }

    fn workspace(repo: &str, secret: Option<&str>) -> WorkspaceSpec {
        WorkspaceSpec {
            repo: repo.to_string(),
            git_ref: Some("main".to_string()),
            secret_ref: secret.map(str::to_string),
            remotes: vec![],
            files: vec![],
        }
    }

    fn agent_env(job: &Job) -> Vec<EnvVar> {
        job.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .clone()
            .unwrap()
    }

    fn env_names(job: &Job) -> Vec<String> {
        agent_env(job).iter().map(|e| e.name.clone()).collect()
    }

    fn env_lookup(job: &Job, name: &str) -> Option<EnvVar> {
        agent_env(job).into_iter().find(|e| e.name == name)
    }

    #[test]
    fn bare_prompt_task_builds_a_minimal_job() {
        // given: no workspace, no agent config
        let job = build_job(&bare_task(), None, None, "Hello").unwrap();

        // then: one container, default image, prompt as $1
        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.containers.len(), 1);
        let agent = &pod.containers[0];
        assert_eq!(agent.image.as_deref(), Some("ghcr.io/kelos-dev/agent-claude-code:latest"));
        assert_eq!(agent.command.as_ref().unwrap().as_slice(), &["/kelos_entrypoint.sh"]);
        assert_eq!(agent.args.as_ref().unwrap().as_slice(), &["Hello"]);
        assert!(agent.working_dir.is_none());

        // no init containers, no volumes
        assert!(pod.init_containers.is_none());
        assert!(pod.volumes.is_none());

        // env carries the agent type and the api key reference
        let type_tag = env_lookup(&job, "KELOS_AGENT_TYPE").unwrap();
        assert_eq!(type_tag.value.as_deref(), Some("claude-code"));
        let key = env_lookup(&job, "ANTHROPIC_API_KEY").unwrap();
        let selector = key.value_from.unwrap().secret_key_ref.unwrap();
        assert_eq!(selector.name, "s");
        assert_eq!(selector.key, "ANTHROPIC_API_KEY");

        // job envelope
        assert_eq!(job.metadata.name.as_deref(), Some("demo-task"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("agents"));
        assert_eq!(job.spec.as_ref().unwrap().backoff_limit, Some(0));
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn workspace_clone_with_secret_wires_auth_and_uid() {
        // given
        let ws = workspace("https://github.com/ex/r.git", Some("gh"));
        let job = build_job(&bare_task(), Some(&ws), None, "Hello").unwrap();
        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();

        // then: git-clone init container runs as the shared uid
        let init = pod.init_containers.as_ref().unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, "git-clone");
        assert_eq!(init[0].security_context.as_ref().unwrap().run_as_user, Some(61100));

        // pod fs-group matches, agent works inside the clone
        assert_eq!(pod.security_context.as_ref().unwrap().fs_group, Some(61100));
        assert_eq!(pod.containers[0].working_dir.as_deref(), Some("/workspace/repo"));

        // both token flavours come from the workspace secret
        assert!(env_lookup(&job, "GITHUB_TOKEN").unwrap().value_from.is_some());
        assert!(env_lookup(&job, "GH_TOKEN").is_some());
        assert!(env_lookup(&job, "GH_ENTERPRISE_TOKEN").is_none());
        assert!(env_lookup(&job, "GH_HOST").is_none());

        // base branch tag follows workspace.ref
        assert_eq!(
            env_lookup(&job, "KELOS_BASE_BRANCH").unwrap().value.as_deref(),
            Some("main")
        );
    }

    #[test]
    fn enterprise_workspace_switches_token_variables() {
        let ws = workspace("https://github.example.com/ex/r.git", Some("gh"));
        let job = build_job(&bare_task(), Some(&ws), None, "Hello").unwrap();

        assert!(env_lookup(&job, "GH_TOKEN").is_none());
        assert!(env_lookup(&job, "GH_ENTERPRISE_TOKEN").is_some());
        assert_eq!(
            env_lookup(&job, "GH_HOST").unwrap().value.as_deref(),
            Some("github.example.com")
        );
        assert!(env_lookup(&job, "GITHUB_TOKEN").is_some());
    }

    #[test]
    fn upstream_remote_sets_the_hint_env() {
        let mut ws = workspace("https://github.com/fork/r.git", None);
        ws.remotes.push(RemoteSpec {
            name: "upstream".to_string(),
            url: "https://github.com/parent/r.git".to_string(),
        });
        let job = build_job(&bare_task(), Some(&ws), None, "Hello").unwrap();

        assert_eq!(
            env_lookup(&job, "KELOS_UPSTREAM_REPO").unwrap().value.as_deref(),
            Some("parent/r")
        );
        // remote-setup follows git-clone
        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let names: Vec<&str> = pod
            .init_containers
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["git-clone", "remote-setup"]);
    }

    #[test]
    fn init_chain_keeps_its_documented_order() {
        // given: everything at once
        let mut ws = workspace("https://github.com/ex/r.git", Some("gh"));
        ws.remotes.push(RemoteSpec {
            name: "fork".to_string(),
            url: "https://github.com/other/r.git".to_string(),
        });
        ws.files.push(crate::io_models::workspace::WorkspaceFileSpec {
            path: "NOTES.md".to_string(),
            content: "hi".to_string(),
        });
        let config: AgentConfigSpec = serde_json::from_value(serde_json::json!({
            "plugins": [{"name": "helpers", "skills": [{"name": "s", "content": "c"}]}]
        }))
        .unwrap();
        let mut task = bare_task();
        task.spec.branch = Some("kelos/fix".to_string());

        // when
        let job = build_job(&task, Some(&ws), Some(&config), "Hello").unwrap();

        // then
        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        let names: Vec<&str> = pod
            .init_containers
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["git-clone", "remote-setup", "branch-setup", "workspace-files", "plugin-setup"]
        );

        let volumes: Vec<&str> = pod
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(volumes, vec!["workspace", "plugins"]);
    }

    #[test]
    fn agent_config_env_is_complete() {
        let config: AgentConfigSpec = serde_json::from_value(serde_json::json!({
            "agentsMD": "# Rules",
            "plugins": [{"name": "helpers", "skills": [{"name": "s", "content": "c"}]}],
            "mcpServers": [{"name": "git", "type": "stdio", "command": "uvx"}],
            "marketplacePlugins": ["a", "b"]
        }))
        .unwrap();
        let job = build_job(&bare_task(), None, Some(&config), "Hello").unwrap();

        assert_eq!(env_lookup(&job, "KELOS_AGENTS_MD").unwrap().value.as_deref(), Some("# Rules"));
        assert_eq!(
            env_lookup(&job, "KELOS_PLUGIN_DIR").unwrap().value.as_deref(),
            Some("/workspace/plugins")
        );
        assert_eq!(
            env_lookup(&job, "KELOS_MARKETPLACE_PLUGINS").unwrap().value.as_deref(),
            Some("a,b")
        );
        let mcp_json = env_lookup(&job, "KELOS_MCP_SERVERS").unwrap().value.unwrap();
        let value: serde_json::Value = serde_json::from_str(&mcp_json).unwrap();
        assert_eq!(value["mcpServers"]["git"]["command"], "uvx");
    }

    #[test]
    fn user_env_never_shadows_built_ins() {
        // given: overrides colliding with a built-in, a reserved-prefix
        // name, and one legitimate entry
        let mut task = bare_task();
        task.spec.model = Some("opus".to_string());
        task.spec.pod_overrides = Some(PodOverrides {
            env: vec![
                EnvVarOverride { name: "KELOS_MODEL".to_string(), value: "evil".to_string() },
                EnvVarOverride { name: "ANTHROPIC_API_KEY".to_string(), value: "evil".to_string() },
                EnvVarOverride { name: "KELOS_CUSTOM".to_string(), value: "evil".to_string() },
                EnvVarOverride { name: "HTTP_PROXY".to_string(), value: "http://p:3128".to_string() },
            ],
            ..Default::default()
        });

        // when
        let job = build_job(&task, None, None, "Hello").unwrap();

        // then
        assert_eq!(env_lookup(&job, "KELOS_MODEL").unwrap().value.as_deref(), Some("opus"));
        assert!(env_lookup(&job, "ANTHROPIC_API_KEY").unwrap().value_from.is_some());
        assert!(env_lookup(&job, "KELOS_CUSTOM").is_none());
        assert_eq!(
            env_lookup(&job, "HTTP_PROXY").unwrap().value.as_deref(),
            Some("http://p:3128")
        );

        // no duplicate names survive
        let names = env_names(&job);
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn overrides_apply_resources_deadline_and_node_selector() {
        let mut task = bare_task();
        task.spec.pod_overrides = Some(PodOverrides {
            env: vec![],
            resources: Some(ResourcesOverride {
                requests: btreemap! {"cpu".to_string() => "500m".to_string()},
                limits: btreemap! {"memory".to_string() => "2Gi".to_string()},
            }),
            active_deadline_seconds: Some(1800),
            node_selector: btreemap! {"kubernetes.io/arch".to_string() => "arm64".to_string()},
        });

        let job = build_job(&task, None, None, "Hello").unwrap();
        let job_spec = job.spec.as_ref().unwrap();
        assert_eq!(job_spec.active_deadline_seconds, Some(1800));

        let pod = job_spec.template.spec.as_ref().unwrap();
        assert_eq!(
            pod.node_selector.as_ref().unwrap()["kubernetes.io/arch"],
            "arm64"
        );
        let resources = pod.containers[0].resources.as_ref().unwrap();
        assert_eq!(resources.requests.as_ref().unwrap()["cpu"].0, "500m");
        assert_eq!(resources.limits.as_ref().unwrap()["memory"].0, "2Gi");
    }

    #[test]
    fn oauth_credentials_follow_the_agent_type() {
        let mut task = bare_task();
        task.spec.credentials = CredentialsSpec {
            kind: CredentialsKind::Oauth,
            secret_ref: "s".to_string(),
        };
        let job = build_job(&task, None, None, "Hello").unwrap();
        let oauth = env_lookup(&job, "CLAUDE_CODE_OAUTH_TOKEN").unwrap();
        assert_eq!(
            oauth.value_from.unwrap().secret_key_ref.unwrap().key,
            "CLAUDE_CODE_OAUTH_TOKEN"
        );

        task.spec.agent_type = "codex".to_string();
        let err = build_job(&task, None, None, "Hello").unwrap_err();
        assert_eq!(
            err,
            BuildError::UnsupportedCredentials {
                agent_type: "codex".to_string(),
                credentials: "oauth".to_string(),
            }
        );
    }

    #[test]
    fn unsupported_agent_type_is_rejected() {
        let mut task = bare_task();
        task.spec.agent_type = "sorcerer".to_string();
        assert_eq!(
            build_job(&task, None, None, "Hello").unwrap_err(),
            BuildError::UnsupportedAgentType("sorcerer".to_string())
        );
    }

    #[test]
    fn invalid_workspace_file_produces_no_job() {
        let mut ws = workspace("https://github.com/ex/r.git", None);
        ws.files.push(crate::io_models::workspace::WorkspaceFileSpec {
            path: "/etc/passwd".to_string(),
            content: String::new(),
        });
        assert!(matches!(
            build_job(&bare_task(), Some(&ws), None, "Hello").unwrap_err(),
            BuildError::UnsafeFilePath(_)
        ));
    }

    #[test]
    fn spawner_label_propagates_to_job_and_env() {
        let mut task = bare_task();
        task.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("kelos.dev/spawner".to_string(), "triage".to_string());

        let job = build_job(&task, None, None, "Hello").unwrap();
        assert_eq!(
            job.metadata.labels.as_ref().unwrap()["kelos.dev/spawner"],
            "triage"
        );
        assert_eq!(
            env_lookup(&job, "KELOS_TASKSPAWNER").unwrap().value.as_deref(),
            Some("triage")
        );
    }

    #[test]
    fn model_and_branch_tags_are_optional() {
        let job = build_job(&bare_task(), None, None, "Hello").unwrap();
        assert!(env_lookup(&job, "KELOS_MODEL").is_none());
        assert!(env_lookup(&job, "KELOS_BRANCH").is_none());
        assert!(env_lookup(&job, "KELOS_BASE_BRANCH").is_none());

        let mut task = bare_task();
        task.spec.branch = Some("kelos/fix-42".to_string());
        let ws = workspace("https://github.com/ex/r.git", None);
        let job = build_job(&task, Some(&ws), None, "Hello").unwrap();
        assert_eq!(
            env_lookup(&job, "KELOS_BRANCH").unwrap().value.as_deref(),
            Some("kelos/fix-42")
        );
    }
}
