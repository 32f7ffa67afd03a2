use crate::constants::{LABEL_SPAWNER, MAX_LOG_BYTES};
use crate::errors::{OperatorError, is_kube_error_code};
use crate::io_models::Task;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{ListParams, LogParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::ops::Deref;

/// Thin wrapper over the kube client owning construction and the small
/// set of typed lookups the reconcilers and the spawn cycle share.
#[derive(Clone)]
pub struct KubeService {
    client: Client,
}

impl Deref for KubeService {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl KubeService {
    /// Infer config from the environment: in-cluster service account
    /// when running in a pod, kubeconfig otherwise.
    pub async fn new() -> Result<Self, OperatorError> {
        let client = Client::try_default().await?;
        Ok(KubeService { client })
    }

    pub fn from_client(client: Client) -> Self {
        KubeService { client }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Fetch a secret's data decoded to UTF-8 strings. Returns
    /// `ReferenceNotFound` when missing so reconcilers surface the right
    /// error class.
    pub async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, OperatorError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get(name).await {
            Ok(secret) => secret,
            Err(e) if is_kube_error_code(&e, 404) => {
                return Err(OperatorError::reference_not_found("Secret", name));
            }
            Err(e) => return Err(e.into()),
        };

        let mut data = BTreeMap::new();
        for (key, value) in secret.data.unwrap_or_default() {
            match String::from_utf8(value.0) {
                Ok(text) => {
                    data.insert(key, text);
                }
                Err(_) => {
                    warn!("secret {namespace}/{name} key {key} is not utf-8, skipping");
                }
            }
        }
        Ok(data)
    }

    /// Keys of a secret without decoding values. Used for GitHub App
    /// shape detection.
    pub async fn get_secret_keys(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<String>, OperatorError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = match api.get(name).await {
            Ok(secret) => secret,
            Err(e) if is_kube_error_code(&e, 404) => {
                return Err(OperatorError::reference_not_found("Secret", name));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(secret.data.unwrap_or_default().into_keys().collect())
    }

    /// Name of a running or completed pod backing the given job, if any.
    pub async fn find_job_pod(
        &self,
        namespace: &str,
        job_name: &str,
    ) -> Result<Option<String>, OperatorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default().labels(&format!("job-name={job_name}")))
            .await?;
        Ok(pods.items.into_iter().find_map(|p| p.metadata.name))
    }

    /// Bounded, best-effort fetch of a pod's logs for output scraping.
    pub async fn fetch_pod_logs(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<String, OperatorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some("agent".to_string()),
            limit_bytes: Some(MAX_LOG_BYTES),
            ..Default::default()
        };
        Ok(api.logs(pod_name, &params).await?)
    }

    /// All Tasks labelled as spawned by the given spawner.
    pub async fn list_spawner_tasks(
        &self,
        namespace: &str,
        spawner: &str,
    ) -> Result<Vec<Task>, OperatorError> {
        let list = crate::kubers_utils::kube_get_resources_by_selector::<Task>(
            &self.client,
            namespace,
            &format!("{LABEL_SPAWNER}={spawner}"),
        )
        .await?;
        Ok(list.items)
    }
}
