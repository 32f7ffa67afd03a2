use thiserror::Error;

/// Error taxonomy shared by the reconcilers and the spawn cycle.
///
/// The split that matters operationally is [`OperatorError::is_terminal`]:
/// a terminal error is caused by the resource itself (the spec violates an
/// invariant) and retrying without a spec change is pointless, while every
/// other class is requeued with backoff.
#[derive(Error, Debug)]
pub enum OperatorError {
    /// A resource violates an invariant: path traversal, duplicate name,
    /// unsupported agent type, mutually exclusive fields, missing required
    /// field. Surfaced in `status.message` and a Kubernetes event.
    #[error("invalid spec: {reason}")]
    InvalidSpec { reason: String },

    /// A referenced Workspace, AgentConfig or Secret does not exist.
    /// Requeued with a short backoff.
    #[error("{kind} {name:?} not found")]
    ReferenceNotFound { kind: &'static str, name: String },

    #[error("kubernetes api error: {0}")]
    KubeApi(#[from] kube::Error),

    #[error("template rendering failed: {0}")]
    TemplateRender(String),

    /// Discovery against an external source failed; the spawn cycle ends
    /// without advancing status and the next cycle retries.
    #[error("source discovery failed: {0}")]
    Source(#[from] anyhow::Error),

    #[error("secret resolution failed: {0}")]
    SecretResolution(String),
}

impl OperatorError {
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        OperatorError::InvalidSpec { reason: reason.into() }
    }

    pub fn reference_not_found(kind: &'static str, name: impl Into<String>) -> Self {
        OperatorError::ReferenceNotFound { kind, name: name.into() }
    }

    /// Terminal errors are not requeued until the offending spec changes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperatorError::InvalidSpec { .. } | OperatorError::TemplateRender(_)
        )
    }

    /// Message suitable for `status.message` and events. Kubernetes API
    /// errors stay in logs and metrics only.
    pub fn user_facing_message(&self) -> Option<String> {
        match self {
            OperatorError::InvalidSpec { .. }
            | OperatorError::ReferenceNotFound { .. }
            | OperatorError::TemplateRender(_)
            | OperatorError::SecretResolution(_) => Some(self.to_string()),
            OperatorError::KubeApi(_) | OperatorError::Source(_) => None,
        }
    }
}

/// True when the kube API rejected the call with the given HTTP code.
pub fn is_kube_error_code(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_spec_is_terminal() {
        assert!(OperatorError::invalid_spec("duplicate plugin name `x`").is_terminal());
        assert!(OperatorError::TemplateRender("bad variable".to_string()).is_terminal());
    }

    #[test]
    fn missing_reference_is_retried() {
        let err = OperatorError::reference_not_found("Workspace", "main-repo");
        assert!(!err.is_terminal());
        assert_eq!(err.to_string(), "Workspace \"main-repo\" not found");
    }

    #[test]
    fn api_errors_are_not_user_facing() {
        let err = OperatorError::Source(anyhow::anyhow!("github: 502"));
        assert!(err.user_facing_message().is_none());

        let err = OperatorError::invalid_spec("remote name `origin` is reserved");
        assert_eq!(
            err.user_facing_message().as_deref(),
            Some("invalid spec: remote name `origin` is reserved")
        );
    }
}
