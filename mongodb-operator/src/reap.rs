use std::time::Duration;

use async_trait::async_trait;
use kube::{Api, Client};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use serde_json::json;

use crate::k8s::builders::default_label_selector;
use crate::k8s::client::{self, Outcome};
use crate::util::Error;

const MAX_WAVES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    Done,
    Retry,
    Fatal,
}

/// The cluster-API calls the reap state machine needs, abstracted so the
/// bounded-retry logic can be exercised with a fake in tests instead of a
/// live cluster.
#[async_trait]
pub trait ReapGateway {
    async fn scale_to_zero(&self, name: &str, namespace: &str) -> Outcome<()>;
    async fn pod_count(&self, namespace: &str, label_selector: &str) -> Outcome<usize>;
    async fn delete_workload(&self, name: &str, namespace: &str) -> Outcome<()>;
    async fn sleep(&self, duration: Duration);
}

pub struct K8sReapGateway {
    client: Client,
}

impl K8sReapGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReapGateway for K8sReapGateway {
    async fn scale_to_zero(&self, name: &str, namespace: &str) -> Outcome<()> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let patch = kube::api::Patch::Merge(json!({ "spec": { "replicas": 0 } }));
        match api
            .patch(name, &kube::api::PatchParams::default(), &patch)
            .await
        {
            Ok(_) => Outcome::Found(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Outcome::NotFound,
            Err(kube::Error::Api(ae)) if ae.code == 409 => Outcome::Conflict,
            Err(e) => Outcome::Transport(Error::from(e)),
        }
    }

    async fn pod_count(&self, namespace: &str, label_selector: &str) -> Outcome<usize> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        client::list(&api, label_selector).await.map(|pods| pods.len())
    }

    async fn delete_workload(&self, name: &str, namespace: &str) -> Outcome<()> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        client::delete(&api, name).await
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Scales a stateful workload to zero, waits for its pods to terminate, then
/// deletes it. Bounded at 5 internal waves with back-off `2*i` seconds; a
/// caller that needs to guarantee eventual removal invokes this repeatedly
/// from the periodic sweeper.
pub async fn reap_stateful_workload(
    gateway: &impl ReapGateway,
    name: &str,
    namespace: &str,
) -> Result<ReapOutcome, Error> {
    let selector = default_label_selector(name);
    for wave in 0..MAX_WAVES {
        gateway.sleep(Duration::from_secs(2 * wave as u64)).await;

        match gateway.scale_to_zero(name, namespace).await {
            Outcome::NotFound => return Ok(ReapOutcome::Done),
            Outcome::Transport(_) => return Ok(ReapOutcome::Fatal),
            Outcome::Found(()) | Outcome::Conflict => {}
        }

        match gateway.pod_count(namespace, &selector).await {
            Outcome::Found(0) => {
                return match gateway.delete_workload(name, namespace).await {
                    Outcome::Transport(_) => Ok(ReapOutcome::Fatal),
                    Outcome::Found(()) | Outcome::NotFound | Outcome::Conflict => {
                        Ok(ReapOutcome::Done)
                    }
                };
            }
            Outcome::Transport(_) => return Ok(ReapOutcome::Fatal),
            Outcome::Found(_) | Outcome::NotFound | Outcome::Conflict => {}
        }
    }
    Ok(ReapOutcome::Retry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeGateway {
        scale_outcome: Outcome<()>,
        pod_count: AtomicUsize,
        delete_outcome: Outcome<()>,
        sleeps: Mutex<Vec<u64>>,
    }

    impl Default for Outcome<()> {
        fn default() -> Self {
            Outcome::Found(())
        }
    }

    #[async_trait]
    impl ReapGateway for FakeGateway {
        async fn scale_to_zero(&self, _name: &str, _namespace: &str) -> Outcome<()> {
            clone_outcome(&self.scale_outcome)
        }

        async fn pod_count(&self, _namespace: &str, _label_selector: &str) -> Outcome<usize> {
            Outcome::Found(self.pod_count.load(Ordering::SeqCst))
        }

        async fn delete_workload(&self, _name: &str, _namespace: &str) -> Outcome<()> {
            clone_outcome(&self.delete_outcome)
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration.as_secs());
        }
    }

    fn clone_outcome(o: &Outcome<()>) -> Outcome<()> {
        match o {
            Outcome::Found(()) => Outcome::Found(()),
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Conflict => Outcome::Conflict,
            Outcome::Transport(_) => Outcome::Transport(Error::UserInput("fake transport error".into())),
        }
    }

    #[tokio::test]
    async fn scale_not_found_returns_done_immediately_with_no_sleep() {
        let gw = FakeGateway {
            scale_outcome: Outcome::NotFound,
            ..Default::default()
        };
        let outcome = reap_stateful_workload(&gw, "t1", "n1").await.unwrap();
        assert_eq!(outcome, ReapOutcome::Done);
        assert_eq!(gw.sleeps.lock().unwrap().as_slice(), &[0]);
    }

    #[tokio::test]
    async fn empty_pod_list_proceeds_to_delete_and_returns_done() {
        let gw = FakeGateway {
            pod_count: AtomicUsize::new(0),
            ..Default::default()
        };
        let outcome = reap_stateful_workload(&gw, "t1", "n1").await.unwrap();
        assert_eq!(outcome, ReapOutcome::Done);
    }

    #[tokio::test]
    async fn nonzero_pod_count_exhausts_all_five_waves_and_retries() {
        let gw = FakeGateway {
            pod_count: AtomicUsize::new(3),
            ..Default::default()
        };
        let outcome = reap_stateful_workload(&gw, "t1", "n1").await.unwrap();
        assert_eq!(outcome, ReapOutcome::Retry);
        assert_eq!(gw.sleeps.lock().unwrap().as_slice(), &[0, 2, 4, 6, 8]);
    }
}
