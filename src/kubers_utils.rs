use crate::errors::is_kube_error_code;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, ListParams, ObjectList, PostParams};
use kube::{Api, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

pub async fn kube_get_resources_by_selector<K>(
    client: &kube::Client,
    namespace: &str,
    selector: &str,
) -> Result<ObjectList<K>, kube::Error>
where
    K: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    let obj_name = K::kind(&K::DynamicType::default()).to_string();
    debug!("Getting k8s {} from selector {}", obj_name, selector);

    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    api.list(&ListParams::default().labels(selector)).await
}

/// Create a namespaced resource, treating 409 AlreadyExists as success.
/// Returns whether the resource was actually created.
pub async fn kube_create_if_absent<K>(
    client: &kube::Client,
    namespace: &str,
    resource: &K,
) -> Result<bool, kube::Error>
where
    K: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope> + Serialize,
    <K as Resource>::DynamicType: Default,
{
    let obj_name = K::kind(&K::DynamicType::default()).to_string();

    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    match api.create(&PostParams::default(), resource).await {
        Ok(_) => {
            info!("Created k8s {} in {}", obj_name, namespace);
            Ok(true)
        }
        Err(e) if is_kube_error_code(&e, 409) => {
            debug!("k8s {} already exists in {}", obj_name, namespace);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Delete a namespaced resource, treating 404 NotFound as success.
/// Owned children follow through the background cascade.
pub async fn kube_delete_if_present<K>(
    client: &kube::Client,
    namespace: &str,
    name: &str,
) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    let obj_name = K::kind(&K::DynamicType::default()).to_string();
    info!("Deleting k8s {} {}/{}", obj_name, namespace, name);

    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(e) if is_kube_error_code(&e, 404) => Ok(()),
        Err(e) => Err(e),
    }
}
