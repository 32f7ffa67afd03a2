use super::BuildError;
use super::paths::{parent_dir, validate_path_component, validate_workspace_file_path};
use crate::constants::{
    AGENT_UID, ENV_BRANCH, ENV_GITHUB_TOKEN, ENV_PLUGIN_TOKEN_PREFIX, GIT_IMAGE, PLUGIN_DIR,
    REPO_DIR, WORKSPACE_MOUNT_PATH,
};
use crate::io_models::agent_config::PluginSpec;
use crate::io_models::workspace::{RemoteSpec, WorkspaceFileSpec, WorkspaceSpec, parse_owner_repo};
use crate::string::shell_single_quote;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, SecretKeySelector, SecurityContext, VolumeMount,
};
use std::collections::HashSet;

pub const WORKSPACE_VOLUME: &str = "workspace";
pub const PLUGIN_VOLUME: &str = "plugins";

/// Inline git credential helper reading the token from the named env
/// var. Tokens never appear in argv or in the script text.
fn credential_helper(token_env: &str) -> String {
    format!(r#"!f() {{ echo "username=x-access-token"; echo "password=${{{token_env}}}"; }}; f"#)
}

pub fn workspace_mount() -> VolumeMount {
    VolumeMount {
        name: WORKSPACE_VOLUME.to_string(),
        mount_path: WORKSPACE_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

pub fn plugin_mount() -> VolumeMount {
    VolumeMount {
        name: PLUGIN_VOLUME.to_string(),
        mount_path: PLUGIN_DIR.to_string(),
        ..Default::default()
    }
}

fn run_as_agent() -> SecurityContext {
    SecurityContext {
        run_as_user: Some(AGENT_UID),
        ..Default::default()
    }
}

pub fn env_value(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

pub fn env_from_secret(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret_name.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}

fn shell_container(name: &str, script: String) -> Container {
    Container {
        name: name.to_string(),
        image: Some(GIT_IMAGE.to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
        volume_mounts: Some(vec![workspace_mount()]),
        security_context: Some(run_as_agent()),
        ..Default::default()
    }
}

/// Init container 1: shallow clone of the workspace repository.
///
/// The clone goes through an inline credential helper when a secret is
/// configured, and the helper is persisted into the clone's git config
/// so the agent's own pushes and fetches authenticate too.
pub fn git_clone_container(workspace: &WorkspaceSpec) -> Container {
    let script = match &workspace.secret_ref {
        Some(_) => format!(
            "set -e\n\
             helper='{helper}'\n\
             git -c credential.helper=\"$helper\" \"$@\"\n\
             git -C {repo_dir} config credential.helper \"$helper\"\n",
            helper = credential_helper(ENV_GITHUB_TOKEN),
            repo_dir = REPO_DIR,
        ),
        None => "set -e\ngit \"$@\"\n".to_string(),
    };

    let mut args = vec!["--".to_string(), "clone".to_string()];
    if let Some(git_ref) = &workspace.git_ref {
        args.push("--branch".to_string());
        args.push(git_ref.clone());
    }
    args.extend(
        ["--no-single-branch", "--depth", "1", "--"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(workspace.repo.clone());
    args.push(REPO_DIR.to_string());

    let mut container = shell_container("git-clone", script);
    container.args = Some(args);
    if let Some(secret) = &workspace.secret_ref {
        container.env = Some(vec![env_from_secret(ENV_GITHUB_TOKEN, secret, ENV_GITHUB_TOKEN)]);
    }
    container
}

/// Init container 2: add extra git remotes. Names and URLs are
/// single-quoted so shell metacharacters in either cannot split words.
pub fn remote_setup_container(remotes: &[RemoteSpec]) -> Result<Container, BuildError> {
    let mut seen = HashSet::new();
    let mut script = format!("set -e\ncd {REPO_DIR}\n");
    for remote in remotes {
        if remote.name == "origin" {
            return Err(BuildError::ReservedRemoteName);
        }
        if remote.name.is_empty() || remote.url.is_empty() {
            return Err(BuildError::EmptyRemote);
        }
        if !seen.insert(remote.name.clone()) {
            return Err(BuildError::DuplicateRemote(remote.name.clone()));
        }
        script.push_str(&format!(
            "git remote add {} {}\n",
            shell_single_quote(&remote.name),
            shell_single_quote(&remote.url),
        ));
    }
    Ok(shell_container("remote-setup", script))
}

/// Init container 3: check out (or create) the task branch. The branch
/// name crosses into the shell through an env var, never by
/// interpolation. A failed fetch is fine: the branch may not exist yet.
pub fn branch_setup_container(branch: &str, workspace: &WorkspaceSpec) -> Container {
    let fetch = match &workspace.secret_ref {
        Some(_) => format!(
            "helper='{helper}'\n\
             git -c credential.helper=\"$helper\" fetch origin \"${{{env}}}:${{{env}}}\" || true\n",
            helper = credential_helper(ENV_GITHUB_TOKEN),
            env = ENV_BRANCH,
        ),
        None => format!("git fetch origin \"${{{env}}}:${{{env}}}\" || true\n", env = ENV_BRANCH),
    };
    let script = format!(
        "set -e\n\
         cd {REPO_DIR}\n\
         {fetch}\
         if git show-ref --verify --quiet \"refs/heads/${{{env}}}\"; then\n\
         \tgit checkout \"${{{env}}}\"\n\
         else\n\
         \tgit checkout -b \"${{{env}}}\"\n\
         fi\n",
        env = ENV_BRANCH,
    );

    let mut container = shell_container("branch-setup", script);
    let mut env = vec![env_value(ENV_BRANCH, branch)];
    if let Some(secret) = &workspace.secret_ref {
        env.push(env_from_secret(ENV_GITHUB_TOKEN, secret, ENV_GITHUB_TOKEN));
    }
    container.env = Some(env);
    container
}

/// Init container 4: write declared workspace files into the fresh
/// clone. Content travels base64-encoded inside the script literal, so
/// no byte of it is interpreted by the shell.
pub fn workspace_files_container(files: &[WorkspaceFileSpec]) -> Result<Container, BuildError> {
    let mut script = String::from("set -e\n");
    for file in files {
        validate_workspace_file_path(&file.path)?;
        if let Some(dir) = parent_dir(&file.path) {
            script.push_str(&format!(
                "mkdir -p {}\n",
                shell_single_quote(&format!("{REPO_DIR}/{dir}"))
            ));
        }
        script.push_str(&format!(
            "printf '%s' {} | base64 -d > {}\n",
            shell_single_quote(&BASE64.encode(file.content.as_bytes())),
            shell_single_quote(&format!("{REPO_DIR}/{}", file.path)),
        ));
    }
    Ok(shell_container("workspace-files", script))
}

/// Init container 5: materialise plugins under the plugin root. GitHub
/// plugins are shallow clones through a per-plugin scoped token env;
/// inline plugins are written file by file like workspace files.
pub fn plugin_setup_container(
    plugins: &[PluginSpec],
    workspace_secret: Option<&str>,
) -> Result<Container, BuildError> {
    let mut seen = HashSet::new();
    let mut script = String::from("set -e\n");
    let mut env: Vec<EnvVar> = vec![];

    for (index, plugin) in plugins.iter().enumerate() {
        validate_path_component("plugin", &plugin.name)?;
        if !seen.insert(plugin.name.clone()) {
            return Err(BuildError::DuplicatePlugin(plugin.name.clone()));
        }
        if plugin.github.is_some() && plugin.has_inline_content() {
            return Err(BuildError::PluginSourceConflict(plugin.name.clone()));
        }

        let plugin_dir = format!("{PLUGIN_DIR}/{}", plugin.name);
        match &plugin.github {
            Some(github) => {
                let owner_repo = parse_owner_repo(&format!("https://github.com/{}", github.repo))
                    .filter(|parsed| parsed == &github.repo)
                    .ok_or_else(|| BuildError::InvalidPluginRepo {
                        name: plugin.name.clone(),
                        repo: github.repo.clone(),
                    })?;

                let token_secret = github.secret_ref.as_deref().or(workspace_secret);
                let clone_prefix = match token_secret {
                    Some(secret) => {
                        let token_env = format!("{ENV_PLUGIN_TOKEN_PREFIX}{index}");
                        env.push(env_from_secret(&token_env, secret, ENV_GITHUB_TOKEN));
                        format!(
                            "git -c credential.helper='{}'",
                            credential_helper(&token_env)
                        )
                    }
                    None => "git".to_string(),
                };

                let branch = match &github.git_ref {
                    Some(git_ref) => format!("--branch {} ", shell_single_quote(git_ref)),
                    None => String::new(),
                };
                script.push_str(&format!(
                    "{clone_prefix} clone --depth 1 {branch}-- {} {}\n",
                    shell_single_quote(&format!("https://github.com/{owner_repo}.git")),
                    shell_single_quote(&plugin_dir),
                ));
            }
            None => {
                if !plugin.has_inline_content() {
                    return Err(BuildError::EmptyPlugin(plugin.name.clone()));
                }
                for skill in &plugin.skills {
                    validate_path_component("skill", &skill.name)?;
                    let skill_dir = format!("{plugin_dir}/skills/{}", skill.name);
                    script.push_str(&format!("mkdir -p {}\n", shell_single_quote(&skill_dir)));
                    script.push_str(&format!(
                        "printf '%s' {} | base64 -d > {}\n",
                        shell_single_quote(&BASE64.encode(skill.content.as_bytes())),
                        shell_single_quote(&format!("{skill_dir}/SKILL.md")),
                    ));
                }
                if !plugin.agents.is_empty() {
                    let agents_dir = format!("{plugin_dir}/agents");
                    script.push_str(&format!("mkdir -p {}\n", shell_single_quote(&agents_dir)));
                    for agent in &plugin.agents {
                        validate_path_component("agent", &agent.name)?;
                        script.push_str(&format!(
                            "printf '%s' {} | base64 -d > {}\n",
                            shell_single_quote(&BASE64.encode(agent.content.as_bytes())),
                            shell_single_quote(&format!("{agents_dir}/{}.md", agent.name)),
                        ));
                    }
                }
            }
        }
    }

    let mut container = Container {
        name: "plugin-setup".to_string(),
        image: Some(GIT_IMAGE.to_string()),
        command: Some(vec!["sh".to_string(), "-c".to_string(), script]),
        volume_mounts: Some(vec![plugin_mount()]),
        security_context: Some(run_as_agent()),
        ..Default::default()
    };
    if !env.is_empty() {
        container.env = Some(env);
    }
    Ok(container)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_models::agent_config::{GithubPluginSource, InlineAgentSpec, InlineSkillSpec};

    fn workspace(secret: Option<&str>) -> WorkspaceSpec {
        WorkspaceSpec {
            repo: "https://github.com/ex/r.git".to_string(),
            git_ref: Some("main".to_string()),
            secret_ref: secret.map(str::to_string),
            remotes: vec![],
            files: vec![],
        }
    }

    fn script_of(container: &Container) -> &str {
        &container.command.as_ref().unwrap()[2]
    }

    #[test]
    fn clone_container_matches_contract() {
        // given
        let container = git_clone_container(&workspace(Some("gh")));

        // then: sh -c <script> with git args appended after `--`
        let command = container.command.as_ref().unwrap();
        assert_eq!(command[0], "sh");
        assert_eq!(command[1], "-c");
        assert_eq!(
            container.args.as_ref().unwrap().as_slice(),
            &[
                "--",
                "clone",
                "--branch",
                "main",
                "--no-single-branch",
                "--depth",
                "1",
                "--",
                "https://github.com/ex/r.git",
                "/workspace/repo"
            ]
        );

        // helper is used for the clone and persisted for later git ops
        let script = script_of(&container);
        assert!(script.contains("credential.helper"));
        assert!(script.contains("git -C /workspace/repo config credential.helper"));
        assert!(script.contains("${GITHUB_TOKEN}"));

        // token comes from the secret, not from a literal
        let env = container.env.as_ref().unwrap();
        let token = env.iter().find(|e| e.name == "GITHUB_TOKEN").unwrap();
        let selector = token.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(selector.name, "gh");
        assert_eq!(selector.key, "GITHUB_TOKEN");

        assert_eq!(container.security_context.as_ref().unwrap().run_as_user, Some(61100));
    }

    #[test]
    fn clone_without_secret_has_no_helper() {
        let container = git_clone_container(&workspace(None));
        assert!(!script_of(&container).contains("credential.helper"));
        assert!(container.env.is_none());
    }

    #[test]
    fn clone_without_ref_omits_branch_flag() {
        let mut ws = workspace(None);
        ws.git_ref = None;
        let container = git_clone_container(&ws);
        assert!(!container.args.as_ref().unwrap().contains(&"--branch".to_string()));
    }

    #[test]
    fn remote_setup_quotes_hostile_values() {
        // given
        let remotes = vec![RemoteSpec {
            name: "fork".to_string(),
            url: "https://example.com/x.git; rm -rf /".to_string(),
        }];

        // when
        let container = remote_setup_container(&remotes).unwrap();

        // then: the url stays one shell word
        assert!(
            script_of(&container).contains("git remote add 'fork' 'https://example.com/x.git; rm -rf /'")
        );
    }

    #[test]
    fn remote_setup_escapes_embedded_quotes() {
        let remotes = vec![RemoteSpec {
            name: "fo'rk".to_string(),
            url: "https://example.com/x.git".to_string(),
        }];
        let container = remote_setup_container(&remotes).unwrap();
        assert!(script_of(&container).contains(r#"'fo'"'"'rk'"#));
    }

    #[test]
    fn remote_setup_rejects_origin_and_duplicates() {
        let origin = vec![RemoteSpec { name: "origin".to_string(), url: "u".to_string() }];
        assert_eq!(remote_setup_container(&origin).unwrap_err(), BuildError::ReservedRemoteName);

        let dup = vec![
            RemoteSpec { name: "fork".to_string(), url: "a".to_string() },
            RemoteSpec { name: "fork".to_string(), url: "b".to_string() },
        ];
        assert_eq!(
            remote_setup_container(&dup).unwrap_err(),
            BuildError::DuplicateRemote("fork".to_string())
        );
    }

    #[test]
    fn branch_setup_passes_branch_via_env() {
        // given
        let container = branch_setup_container("feat/retry; echo pwned", &workspace(Some("gh")));

        // then: the branch value appears in env, never in the script
        let script = script_of(&container);
        assert!(!script.contains("pwned"));
        assert!(script.contains("${KELOS_BRANCH}"));
        assert!(script.contains("git checkout -b"));
        assert!(script.contains("|| true"));

        let env = container.env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "KELOS_BRANCH"
            && e.value.as_deref() == Some("feat/retry; echo pwned")));
        assert!(env.iter().any(|e| e.name == "GITHUB_TOKEN"));
    }

    #[test]
    fn workspace_files_are_base64_encoded() {
        // given
        let files = vec![WorkspaceFileSpec {
            path: "docs/NOTES.md".to_string(),
            content: "hello $world `cmd`".to_string(),
        }];

        // when
        let container = workspace_files_container(&files).unwrap();

        // then
        let script = script_of(&container);
        assert!(script.contains("mkdir -p '/workspace/repo/docs'"));
        assert!(script.contains("base64 -d > '/workspace/repo/docs/NOTES.md'"));
        assert!(!script.contains("$world"), "raw content must not reach the shell");
    }

    #[test]
    fn workspace_files_reject_traversal() {
        let files = vec![WorkspaceFileSpec {
            path: "../outside".to_string(),
            content: String::new(),
        }];
        assert!(matches!(
            workspace_files_container(&files).unwrap_err(),
            BuildError::UnsafeFilePath(_)
        ));
    }

    fn github_plugin(name: &str, repo: &str, secret: Option<&str>) -> PluginSpec {
        PluginSpec {
            name: name.to_string(),
            github: Some(GithubPluginSource {
                repo: repo.to_string(),
                git_ref: Some("v1".to_string()),
                secret_ref: secret.map(str::to_string),
            }),
            skills: vec![],
            agents: vec![],
        }
    }

    #[test]
    fn github_plugin_clones_with_scoped_token() {
        // given: first plugin has its own secret, second falls back to
        // the workspace token
        let plugins = vec![
            github_plugin("linter", "org/linter-plugin", Some("plugin-secret")),
            github_plugin("docs", "org/docs-plugin", None),
        ];

        // when
        let container = plugin_setup_container(&plugins, Some("gh")).unwrap();

        // then
        let script = script_of(&container);
        assert!(script.contains("${KELOS_PLUGIN_TOKEN_0}"));
        assert!(script.contains("${KELOS_PLUGIN_TOKEN_1}"));
        assert!(script.contains("'https://github.com/org/linter-plugin.git' '/workspace/plugins/linter'"));
        assert!(script.contains("--branch 'v1'"));

        let env = container.env.as_ref().unwrap();
        let token0 = env.iter().find(|e| e.name == "KELOS_PLUGIN_TOKEN_0").unwrap();
        assert_eq!(
            token0.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap().name,
            "plugin-secret"
        );
        let token1 = env.iter().find(|e| e.name == "KELOS_PLUGIN_TOKEN_1").unwrap();
        assert_eq!(
            token1.value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap().name,
            "gh"
        );
    }

    #[test]
    fn github_plugin_without_any_token_clones_anonymously() {
        let plugins = vec![github_plugin("linter", "org/linter-plugin", None)];
        let container = plugin_setup_container(&plugins, None).unwrap();
        assert!(!script_of(&container).contains("credential.helper"));
        assert!(container.env.is_none());
    }

    #[test]
    fn inline_plugin_writes_skills_and_agents() {
        // given
        let plugins = vec![PluginSpec {
            name: "helpers".to_string(),
            github: None,
            skills: vec![InlineSkillSpec {
                name: "summarize".to_string(),
                content: "# Summarize".to_string(),
            }],
            agents: vec![InlineAgentSpec {
                name: "reviewer".to_string(),
                content: "You review code.".to_string(),
            }],
        }];

        // when
        let container = plugin_setup_container(&plugins, None).unwrap();

        // then
        let script = script_of(&container);
        assert!(script.contains("mkdir -p '/workspace/plugins/helpers/skills/summarize'"));
        assert!(script.contains("base64 -d > '/workspace/plugins/helpers/skills/summarize/SKILL.md'"));
        assert!(script.contains("base64 -d > '/workspace/plugins/helpers/agents/reviewer.md'"));
    }

    #[test]
    fn plugin_invariants_are_enforced() {
        // duplicate names
        let dup = vec![
            github_plugin("x", "a/b", None),
            github_plugin("x", "c/d", None),
        ];
        assert_eq!(
            plugin_setup_container(&dup, None).unwrap_err(),
            BuildError::DuplicatePlugin("x".to_string())
        );

        // github and inline at once
        let mut conflicted = github_plugin("x", "a/b", None);
        conflicted.skills.push(InlineSkillSpec { name: "s".to_string(), content: String::new() });
        assert_eq!(
            plugin_setup_container(&[conflicted], None).unwrap_err(),
            BuildError::PluginSourceConflict("x".to_string())
        );

        // repo must be exactly owner/repo
        let bad_repo = github_plugin("x", "a/b/c", None);
        assert!(matches!(
            plugin_setup_container(&[bad_repo], None).unwrap_err(),
            BuildError::InvalidPluginRepo { .. }
        ));

        // traversal in plugin name
        let traversal = github_plugin("../x", "a/b", None);
        assert!(matches!(
            plugin_setup_container(&[traversal], None).unwrap_err(),
            BuildError::UnsafePathComponent { .. }
        ));

        // plugin with no source at all
        let empty = PluginSpec { name: "x".to_string(), ..Default::default() };
        assert_eq!(
            plugin_setup_container(&[empty], None).unwrap_err(),
            BuildError::EmptyPlugin("x".to_string())
        );
    }
}
