use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{Api, Client, ResourceExt};
use mongodb_operator_common::logging::{self, Level};
use mongodb_operator_types::MongoDBCluster;
use tokio_util::sync::CancellationToken;

use crate::cache::ResourceVersionCache;
use crate::k8s::builders::{managed_label_selector, CLUSTER_LABEL};
use crate::k8s::client::{self, Outcome};
use crate::reap::{self, K8sReapGateway};
use crate::reconcile::reconcile;

const WORKER: &str = "PeriodicCheck";

/// Timer-driven full sweep, matching the original system's thread name
/// exactly: `ensure` reconciles every declared cluster, `collect garbage`
/// tears down derived objects whose owner has vanished. The two passes are
/// independent — a failure in one never blocks the other.
pub async fn run(
    client: Client,
    cache: Arc<ResourceVersionCache>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    logging::log(Level::Info, WORKER, "starting".to_string());
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        if let Err(e) = ensure_pass(&client, &cache).await {
            logging::log(Level::Warn, WORKER, format!("ensure pass failed: {e}"));
        }
        if let Err(e) = collect_garbage_pass(&client).await {
            logging::log(Level::Warn, WORKER, format!("garbage collection pass failed: {e}"));
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    logging::log(Level::Info, WORKER, "stopped".to_string());
}

async fn ensure_pass(
    client: &Client,
    cache: &ResourceVersionCache,
) -> Result<(), crate::util::Error> {
    let api: Api<MongoDBCluster> = Api::all(client.clone());
    let clusters = match client::list(&api, "").await {
        Outcome::Found(items) => items,
        Outcome::NotFound => Vec::new(),
        Outcome::Conflict => Vec::new(),
        Outcome::Transport(e) => return Err(e),
    };
    for decl in &clusters {
        if let Err(e) = reconcile(client, cache, decl).await {
            logging::log(
                Level::Warn,
                WORKER,
                format!("reconcile failed for {}/{}: {e}", decl.namespace().unwrap_or_default(), decl.name_any()),
            );
        }
    }
    Ok(())
}

/// Returns true if `name`/`namespace` still has a declaring `MongoDBCluster`.
async fn owner_exists(client: &Client, name: &str, namespace: &str) -> Result<bool, crate::util::Error> {
    let api: Api<MongoDBCluster> = Api::namespaced(client.clone(), namespace);
    match client::get(&api, name).await {
        Outcome::Found(_) => Ok(true),
        Outcome::NotFound => Ok(false),
        Outcome::Conflict => Ok(true),
        Outcome::Transport(e) => Err(e),
    }
}

async fn collect_garbage_pass(client: &Client) -> Result<(), crate::util::Error> {
    let selector = managed_label_selector();

    let services: Api<Service> = Api::all(client.clone());
    if let Outcome::Found(items) = client::list(&services, &selector).await {
        for svc in items {
            let (Some(name), Some(namespace)) = (svc.metadata.name, svc.metadata.namespace) else {
                continue;
            };
            if !owner_exists(client, &name, &namespace).await? {
                let api: Api<Service> = Api::namespaced(client.clone(), &namespace);
                if let Outcome::Transport(e) = client::delete(&api, &name).await {
                    logging::log(Level::Warn, WORKER, format!("failed to delete svc/{name} in ns/{namespace}: {e}"));
                } else {
                    logging::log(Level::Info, WORKER, format!("deleted svc/{name} from ns/{namespace}"));
                }
            }
        }
    }

    let workloads: Api<StatefulSet> = Api::all(client.clone());
    if let Outcome::Found(items) = client::list(&workloads, &selector).await {
        for sts in items {
            let (Some(name), Some(namespace)) = (sts.metadata.name, sts.metadata.namespace) else {
                continue;
            };
            if !owner_exists(client, &name, &namespace).await? {
                let gateway = K8sReapGateway::new(client.clone());
                match reap::reap_stateful_workload(&gateway, &name, &namespace).await {
                    Ok(_) => logging::log(Level::Info, WORKER, format!("reaped statefulset/{name} from ns/{namespace}")),
                    Err(e) => logging::log(Level::Warn, WORKER, format!("failed to reap statefulset/{name} in ns/{namespace}: {e}")),
                }
            }
        }
    }

    let secrets: Api<Secret> = Api::all(client.clone());
    if let Outcome::Found(items) = client::list(&secrets, &selector).await {
        for secret in items {
            let Some(namespace) = secret.metadata.namespace else {
                continue;
            };
            let Some(name) = secret.metadata.name else {
                continue;
            };
            let Some(cluster) = secret
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(CLUSTER_LABEL))
                .cloned()
            else {
                continue;
            };
            if !owner_exists(client, &cluster, &namespace).await? {
                let api: Api<Secret> = Api::namespaced(client.clone(), &namespace);
                if let Outcome::Transport(e) = client::delete(&api, &name).await {
                    logging::log(Level::Warn, WORKER, format!("failed to delete secret/{name} in ns/{namespace}: {e}"));
                } else {
                    logging::log(Level::Info, WORKER, format!("deleted secret/{name} from ns/{namespace}"));
                }
            }
        }
    }

    Ok(())
}
