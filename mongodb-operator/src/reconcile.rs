use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use kube::{Api, Client, ResourceExt};
use mongodb_operator_common::logging::{self, Level};
use mongodb_operator_types::MongoDBCluster;

use crate::bootstrap::{self, BootstrapState, PodExecShell};
use crate::cache::ResourceVersionCache;
use crate::credentials;
use crate::k8s::builders::{
    self, SECRET_SUFFIX_ADMIN_CREDENTIALS, SECRET_SUFFIX_CA, SECRET_SUFFIX_CLIENT_CERT,
    SECRET_SUFFIX_MONITORING_CREDENTIALS,
};
use crate::k8s::client::{self, Outcome};
use crate::util::Error;

const WORKER: &str = "Reconcile";

/// Ensures every derived object for `decl` exists and matches, then advances
/// the bootstrap state machine by one probe. Every mutation is create-or-
/// patch: creation tolerates `Conflict`, patches are server-side apply so
/// they are diff-agnostic.
pub async fn reconcile(
    client: &Client,
    cache: &ResourceVersionCache,
    decl: &MongoDBCluster,
) -> Result<(), Error> {
    let name = decl.name_any();
    let namespace = decl
        .namespace()
        .ok_or_else(|| Error::UserInput(format!("MongoDBCluster '{name}' has no namespace")))?;

    ensure_secrets(client, decl, &name, &namespace).await?;
    ensure_service(client, cache, decl, &name, &namespace).await?;
    ensure_stateful_workload(client, cache, decl, &name, &namespace).await?;
    run_bootstrap_probe(client, decl, &name, &namespace).await?;

    Ok(())
}

async fn secret_exists(client: &Client, namespace: &str, name: &str) -> Result<bool, Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match client::get(&api, name).await {
        Outcome::Found(_) => Ok(true),
        Outcome::NotFound => Ok(false),
        Outcome::Conflict => Ok(true),
        Outcome::Transport(e) => Err(e),
    }
}

async fn create_secret(
    client: &Client,
    namespace: &str,
    secret: &Secret,
) -> Result<(), Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match client::create(&api, secret).await {
        Outcome::Found(_) | Outcome::Conflict => Ok(()),
        Outcome::NotFound => Ok(()),
        Outcome::Transport(e) => Err(e),
    }
}

async fn read_secret_strings(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<BTreeMap<String, String>, Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match client::get(&api, name).await {
        Outcome::Found(secret) => Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
            .collect()),
        Outcome::NotFound => Err(Error::UserInput(format!("secret '{name}' not found"))),
        Outcome::Conflict => Err(Error::UserInput(format!("secret '{name}' conflicted"))),
        Outcome::Transport(e) => Err(e),
    }
}

/// Creates the four per-cluster secrets that do not yet exist. The client
/// certificate secret depends on the CA secret — order is fixed.
pub(crate) async fn ensure_secrets(
    client: &Client,
    decl: &MongoDBCluster,
    name: &str,
    namespace: &str,
) -> Result<(), Error> {
    if !secret_exists(client, namespace, &builders::secret_name(name, SECRET_SUFFIX_CA)).await? {
        let (ca_pem, ca_key_pem, _csr) = credentials::generate_ca(name, namespace)?;
        let mut data = BTreeMap::new();
        data.insert("ca.pem".to_string(), ca_pem);
        data.insert("ca-key.pem".to_string(), ca_key_pem);
        let secret = builders::build_secret(decl, SECRET_SUFFIX_CA, data);
        create_secret(client, namespace, &secret).await?;
        logging::log(Level::Info, WORKER, format!("created secret/{name}{SECRET_SUFFIX_CA} in ns/{namespace}"));
    }

    if !secret_exists(client, namespace, &builders::secret_name(name, SECRET_SUFFIX_CLIENT_CERT)).await? {
        let ca = read_secret_strings(client, namespace, &builders::secret_name(name, SECRET_SUFFIX_CA)).await?;
        let ca_pem = ca.get("ca.pem").cloned().unwrap_or_default();
        let ca_key_pem = ca.get("ca-key.pem").cloned().unwrap_or_default();
        let (mongod_pem, _csr) = credentials::generate_client(&ca_pem, &ca_key_pem, name)?;
        let mut data = BTreeMap::new();
        data.insert("mongod.pem".to_string(), mongod_pem);
        data.insert("ca.pem".to_string(), ca_pem);
        let secret = builders::build_secret(decl, SECRET_SUFFIX_CLIENT_CERT, data);
        create_secret(client, namespace, &secret).await?;
        logging::log(Level::Info, WORKER, format!("created secret/{name}{SECRET_SUFFIX_CLIENT_CERT} in ns/{namespace}"));
    }

    if !secret_exists(client, namespace, &builders::secret_name(name, SECRET_SUFFIX_ADMIN_CREDENTIALS)).await? {
        let mut data = BTreeMap::new();
        data.insert("username".to_string(), "root".to_string());
        data.insert("password".to_string(), credentials::random_password());
        let secret = builders::build_secret(decl, SECRET_SUFFIX_ADMIN_CREDENTIALS, data);
        create_secret(client, namespace, &secret).await?;
        logging::log(Level::Info, WORKER, format!("created secret/{name}{SECRET_SUFFIX_ADMIN_CREDENTIALS} in ns/{namespace}"));
    }

    if !secret_exists(client, namespace, &builders::secret_name(name, SECRET_SUFFIX_MONITORING_CREDENTIALS)).await? {
        let mut data = BTreeMap::new();
        data.insert("username".to_string(), "monitoring".to_string());
        data.insert("password".to_string(), credentials::random_password());
        let secret = builders::build_secret(decl, SECRET_SUFFIX_MONITORING_CREDENTIALS, data);
        create_secret(client, namespace, &secret).await?;
        logging::log(Level::Info, WORKER, format!("created secret/{name}{SECRET_SUFFIX_MONITORING_CREDENTIALS} in ns/{namespace}"));
    }

    Ok(())
}

pub(crate) async fn ensure_service(
    client: &Client,
    cache: &ResourceVersionCache,
    decl: &MongoDBCluster,
    name: &str,
    namespace: &str,
) -> Result<(), Error> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    let desired = builders::build_service(decl);
    match client::get(&api, name).await {
        Outcome::NotFound => match client::create(&api, &desired).await {
            Outcome::Found(created) => {
                cache.record(&created);
                logging::log(Level::Info, WORKER, format!("created svc/{name} in ns/{namespace}"));
                Ok(())
            }
            Outcome::Conflict | Outcome::NotFound => Ok(()),
            Outcome::Transport(e) => Err(e),
        },
        Outcome::Found(existing) => {
            if cache.is_current(&existing) {
                return Ok(());
            }
            match client::apply(&api, name, &desired).await {
                Outcome::Found(patched) => {
                    cache.record(&patched);
                    logging::log(Level::Info, WORKER, format!("updated svc/{name} in ns/{namespace}"));
                    Ok(())
                }
                Outcome::NotFound | Outcome::Conflict => Ok(()),
                Outcome::Transport(e) => Err(e),
            }
        }
        Outcome::Conflict => Ok(()),
        Outcome::Transport(e) => Err(e),
    }
}

pub(crate) async fn ensure_stateful_workload(
    client: &Client,
    cache: &ResourceVersionCache,
    decl: &MongoDBCluster,
    name: &str,
    namespace: &str,
) -> Result<(), Error> {
    let api: Api<StatefulSet> = Api::namespaced(client.clone(), namespace);
    let desired = builders::build_stateful_workload(decl);
    match client::get(&api, name).await {
        Outcome::NotFound => match client::create(&api, &desired).await {
            Outcome::Found(created) => {
                cache.record(&created);
                logging::log(Level::Info, WORKER, format!("created statefulset/{name} in ns/{namespace}"));
                Ok(())
            }
            Outcome::Conflict | Outcome::NotFound => Ok(()),
            Outcome::Transport(e) => Err(e),
        },
        Outcome::Found(existing) => {
            if cache.is_current(&existing) {
                return Ok(());
            }
            match client::apply(&api, name, &desired).await {
                Outcome::Found(patched) => {
                    cache.record(&patched);
                    logging::log(Level::Info, WORKER, format!("updated statefulset/{name} in ns/{namespace}"));
                    Ok(())
                }
                Outcome::NotFound | Outcome::Conflict => Ok(()),
                Outcome::Transport(e) => Err(e),
            }
        }
        Outcome::Conflict => Ok(()),
        Outcome::Transport(e) => Err(e),
    }
}

async fn run_bootstrap_probe(
    client: &Client,
    decl: &MongoDBCluster,
    name: &str,
    namespace: &str,
) -> Result<(), Error> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let shell = PodExecShell::new(pods);
    let replicas = decl.spec.replicas();
    let (state, outcome) = bootstrap::probe(&shell, name, namespace, replicas).await?;
    logging::log(
        Level::Debug,
        WORKER,
        format!("bootstrap probe for {name}/{namespace}: {state:?} ({outcome:?})"),
    );
    if state == BootstrapState::CreateUsers {
        let admin = read_secret_strings(client, namespace, &builders::secret_name(name, SECRET_SUFFIX_ADMIN_CREDENTIALS)).await?;
        let monitoring = read_secret_strings(client, namespace, &builders::secret_name(name, SECRET_SUFFIX_MONITORING_CREDENTIALS)).await?;
        let admin_password = admin.get("password").cloned().unwrap_or_default();
        let monitoring_password = monitoring.get("password").cloned().unwrap_or_default();
        let created = bootstrap::create_users(&shell, name, replicas, &admin_password, &monitoring_password).await?;
        if created {
            logging::log(Level::Info, WORKER, format!("created administrative users for {name}/{namespace}"));
        }
    }
    Ok(())
}
