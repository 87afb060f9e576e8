use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::Service;
use kube::api::{WatchEvent, WatchParams};
use kube::{Api, Client, ResourceExt};
use mongodb_operator_common::logging::{self, Level};
use mongodb_operator_types::MongoDBCluster;
use tokio_util::sync::CancellationToken;

use crate::cache::ResourceVersionCache;
use crate::k8s::builders::{
    self, SECRET_SUFFIX_ADMIN_CREDENTIALS, SECRET_SUFFIX_CA, SECRET_SUFFIX_CLIENT_CERT,
    SECRET_SUFFIX_MONITORING_CREDENTIALS,
};
use crate::k8s::client::{self, Outcome};
use crate::reap::{self, K8sReapGateway};
use crate::reconcile::{ensure_secrets, ensure_service, ensure_stateful_workload};
use crate::util::Error;

const WORKER: &str = "EventListener";

/// Consumes the custom-resource watch stream, matching the original thread
/// name exactly. The stream ends at the server-side timeout; this loop
/// re-opens it until cancelled. Any stream-level exception is logged and
/// followed by a one-timeout-period sleep before the watch resumes.
pub async fn run(
    client: Client,
    cache: Arc<ResourceVersionCache>,
    timeout_secs: u32,
    shutdown: CancellationToken,
) {
    logging::log(Level::Info, WORKER, "starting".to_string());
    let api: Api<MongoDBCluster> = Api::all(client.clone());
    while !shutdown.is_cancelled() {
        let params = WatchParams::default().timeout(timeout_secs);
        let mut stream = match api.watch(&params, "0").await {
            Ok(stream) => stream.boxed(),
            Err(e) => {
                logging::log(Level::Warn, WORKER, format!("failed to open watch: {e}"));
                sleep_or_stop(&shutdown, timeout_secs).await;
                continue;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => {
                            if let Err(e) = handle_event(&client, &cache, event).await {
                                logging::log(Level::Warn, WORKER, format!("failed to handle event: {e}"));
                            }
                        }
                        Some(Err(e)) => {
                            logging::log(Level::Warn, WORKER, format!("watch stream error: {e}"));
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
        sleep_or_stop(&shutdown, timeout_secs).await;
    }
    logging::log(Level::Info, WORKER, "stopped".to_string());
}

async fn sleep_or_stop(shutdown: &CancellationToken, timeout_secs: u32) {
    tokio::select! {
        _ = shutdown.cancelled() => {},
        _ = tokio::time::sleep(Duration::from_secs(timeout_secs as u64)) => {},
    }
}

async fn handle_event(
    client: &Client,
    cache: &ResourceVersionCache,
    event: WatchEvent<MongoDBCluster>,
) -> Result<(), Error> {
    match event {
        WatchEvent::Added(decl) => on_added(client, cache, &decl).await,
        WatchEvent::Modified(decl) => on_modified(&decl),
        WatchEvent::Deleted(decl) => on_deleted(client, &decl).await,
        WatchEvent::Bookmark(_) | WatchEvent::Error(_) => Ok(()),
    }
}

async fn on_added(
    client: &Client,
    cache: &ResourceVersionCache,
    decl: &MongoDBCluster,
) -> Result<(), Error> {
    let name = decl.name_any();
    let namespace = decl
        .namespace()
        .ok_or_else(|| Error::UserInput(format!("MongoDBCluster '{name}' has no namespace")))?;

    // Same create-or-patch policy as the periodic sweeper's ensure pass, but
    // without consulting the resource-version cache: a freshly added object
    // has no derived objects yet, so there is nothing to skip.
    ensure_secrets(client, decl, &name, &namespace).await?;
    ensure_service(client, cache, decl, &name, &namespace).await?;
    ensure_stateful_workload(client, cache, decl, &name, &namespace).await?;
    Ok(())
}

fn on_modified(decl: &MongoDBCluster) -> Result<(), Error> {
    logging::log(
        Level::Warn,
        WORKER,
        format!("UPDATE NOT IMPLEMENTED YET ({}/{})", decl.namespace().unwrap_or_default(), decl.name_any()),
    );
    Ok(())
}

async fn on_deleted(client: &Client, decl: &MongoDBCluster) -> Result<(), Error> {
    let name = decl.name_any();
    let namespace = decl
        .namespace()
        .ok_or_else(|| Error::UserInput(format!("MongoDBCluster '{name}' has no namespace")))?;

    let services: Api<Service> = Api::namespaced(client.clone(), &namespace);
    if let Outcome::Transport(e) = client::delete(&services, &name).await {
        logging::log(Level::Warn, WORKER, format!("failed to delete svc/{name} in ns/{namespace}: {e}"));
    } else {
        logging::log(Level::Info, WORKER, format!("deleted svc/{name} from ns/{namespace}"));
    }

    let gateway = K8sReapGateway::new(client.clone());
    match reap::reap_stateful_workload(&gateway, &name, &namespace).await {
        Ok(_) => logging::log(Level::Info, WORKER, format!("reaped statefulset/{name} from ns/{namespace}")),
        Err(e) => logging::log(Level::Warn, WORKER, format!("failed to reap statefulset/{name} in ns/{namespace}: {e}")),
    }

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    for suffix in [
        SECRET_SUFFIX_CA,
        SECRET_SUFFIX_CLIENT_CERT,
        SECRET_SUFFIX_ADMIN_CREDENTIALS,
        SECRET_SUFFIX_MONITORING_CREDENTIALS,
    ] {
        let secret_name = builders::secret_name(&name, suffix);
        if let Outcome::Transport(e) = client::delete(&secrets, &secret_name).await {
            logging::log(Level::Warn, WORKER, format!("failed to delete secret/{secret_name} in ns/{namespace}: {e}"));
        } else {
            logging::log(Level::Info, WORKER, format!("deleted secret/{secret_name} from ns/{namespace}"));
        }
    }

    Ok(())
}
