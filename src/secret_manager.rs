//! Resolution of `headersFrom`/`envFrom` secret references on MCP server
//! declarations.
//!
//! Inline header/env values are defaults; the referenced secrets are the
//! authoritative source and override them on key collision. References
//! are cleared once folded in, so the builder only ever sees literal
//! maps.

use crate::errors::OperatorError;
use crate::io_models::agent_config::McpServerSpec;
use crate::services::kube_client::KubeService;
use std::collections::BTreeMap;

/// Merge secret data over an inline map. Secret values win.
fn overlay(target: &mut BTreeMap<String, String>, secret_data: BTreeMap<String, String>) {
    for (key, value) in secret_data {
        target.insert(key, value);
    }
}

/// Resolve every secret reference on the given MCP servers against
/// namespace-local Secrets. A missing Secret is a reconcile error; the
/// caller requeues.
pub async fn resolve_mcp_secret_refs(
    kube: &KubeService,
    namespace: &str,
    servers: &mut [McpServerSpec],
) -> Result<(), OperatorError> {
    for server in servers.iter_mut() {
        for secret_ref in std::mem::take(&mut server.headers_from) {
            let data = kube.get_secret_data(namespace, &secret_ref.name).await?;
            overlay(&mut server.headers, data);
        }
        for secret_ref in std::mem::take(&mut server.env_from) {
            let data = kube.get_secret_data(namespace, &secret_ref.name).await?;
            overlay(&mut server.env, data);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn secret_values_override_inline_defaults() {
        // given
        let mut headers = btreemap! {
            "Authorization".to_string() => "Bearer default".to_string(),
            "X-Env".to_string() => "dev".to_string(),
        };

        // when
        overlay(
            &mut headers,
            btreemap! {
                "Authorization".to_string() => "Bearer from-secret".to_string(),
                "X-Extra".to_string() => "added".to_string(),
            },
        );

        // then
        assert_eq!(headers["Authorization"], "Bearer from-secret");
        assert_eq!(headers["X-Env"], "dev");
        assert_eq!(headers["X-Extra"], "added");
    }

    #[test]
    fn overlay_with_empty_secret_is_a_noop() {
        let mut env = btreemap! {"A".to_string() => "1".to_string()};
        overlay(&mut env, BTreeMap::new());
        assert_eq!(env.len(), 1);
    }
}
