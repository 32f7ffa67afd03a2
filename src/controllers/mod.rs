pub mod job_output;
pub mod task;
pub mod task_spawner;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

pub const REPORTER: &str = "kelos-operator";

pub fn reporter() -> Reporter {
    Reporter {
        controller: REPORTER.to_string(),
        instance: None,
    }
}

fn object_reference<K>(obj: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(K::api_version(&()).to_string()),
        kind: Some(K::kind(&()).to_string()),
        name: obj.meta().name.clone(),
        namespace: obj.meta().namespace.clone(),
        uid: obj.meta().uid.clone(),
        ..Default::default()
    }
}

/// Record a Kubernetes event against the given object. Event delivery is
/// advisory: failures are logged, never propagated.
pub async fn record_event<K>(
    recorder: &Recorder,
    obj: &K,
    event_type: EventType,
    reason: &str,
    action: &str,
    note: String,
) where
    K: Resource<DynamicType = ()>,
{
    let event = Event {
        type_: event_type,
        reason: reason.to_string(),
        note: Some(note),
        action: action.to_string(),
        secondary: None,
    };
    if let Err(err) = recorder.publish(&event, &object_reference(obj)).await {
        warn!("cannot record event {reason}: {err}");
    }
}
