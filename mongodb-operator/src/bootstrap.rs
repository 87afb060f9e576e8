use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use mongodb_operator_common::logging::{self, Level};

use crate::k8s::builders::member_hosts;
use crate::k8s::client;
use crate::util::Error;

const WORKER: &str = "Reconcile";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Probe,
    Initiate,
    CreateUsers,
}

/// The outcome of classifying raw `mongo --eval` output. Isolating the
/// substring matching here keeps the bug-for-bug-compatible contract
/// (`"ok" : 0`, `"NotYetInitialized"`, `"NodeNotFound"`, ...) in exactly one
/// place instead of scattered through the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    NotInitialized,
    Ok,
    NodeNotFound,
    NotMaster,
    UserCreated,
    Other(String),
}

pub fn classify_eval_output(output: &str) -> EvalOutcome {
    if output.contains("\"ok\" : 0") && output.contains("\"codeName\" : \"NotYetInitialized\"") {
        return EvalOutcome::NotInitialized;
    }
    if output.contains("\"ok\" : 0") && output.contains("\"codeName\" : \"NodeNotFound\"") {
        return EvalOutcome::NodeNotFound;
    }
    if output.contains("Error: couldn't add user: not master :") {
        return EvalOutcome::NotMaster;
    }
    if output.contains("Successfully added user: {") {
        return EvalOutcome::UserCreated;
    }
    if output.contains("\"ok\" : 1") || output.contains("{ \"ok\" : 1 }") {
        return EvalOutcome::Ok;
    }
    EvalOutcome::Other(output.to_string())
}

#[async_trait]
pub trait MongoShell {
    async fn eval(&self, pod: &str, script: &str) -> Result<String, Error>;
}

pub struct PodExecShell {
    api: Api<Pod>,
}

impl PodExecShell {
    pub fn new(api: Api<Pod>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MongoShell for PodExecShell {
    async fn eval(&self, pod: &str, script: &str) -> Result<String, Error> {
        let command = vec![
            "mongo".to_string(),
            "--ssl".to_string(),
            "--sslCAFile".to_string(),
            "/etc/ssl/mongod/ca.pem".to_string(),
            "--sslPEMKeyFile".to_string(),
            "/etc/ssl/mongod/mongod.pem".to_string(),
            "--eval".to_string(),
            script.to_string(),
        ];
        client::exec(&self.api, pod, "mongod", command).await
    }
}

fn initiate_config(name: &str, namespace: &str, replicas: u32) -> serde_json::Value {
    let members: Vec<serde_json::Value> = member_hosts(name, namespace, replicas)
        .into_iter()
        .enumerate()
        .map(|(i, host)| serde_json::json!({ "_id": i, "host": host }))
        .collect();
    serde_json::json!({ "_id": name, "version": 1, "members": members })
}

/// Runs one probe of the bootstrap state machine: `rs.status()` against
/// member 0, dispatching to Initiate or CreateUsers as warranted. Returns
/// the classified outcome of the probe itself for callers that want to log
/// or test the dispatch decision.
pub async fn probe(
    shell: &impl MongoShell,
    name: &str,
    namespace: &str,
    replicas: u32,
) -> Result<(BootstrapState, EvalOutcome), Error> {
    let pod0 = format!("{name}-0");
    let output = shell.eval(&pod0, "rs.status()").await?;
    let outcome = classify_eval_output(&output);
    match outcome {
        EvalOutcome::NotInitialized => {
            initiate(shell, name, namespace, replicas).await
        }
        EvalOutcome::Ok => Ok((BootstrapState::CreateUsers, outcome)),
        _ => Ok((BootstrapState::Probe, outcome)),
    }
}

async fn initiate(
    shell: &impl MongoShell,
    name: &str,
    namespace: &str,
    replicas: u32,
) -> Result<(BootstrapState, EvalOutcome), Error> {
    let config = initiate_config(name, namespace, replicas);
    let script = format!("rs.initiate({config})");
    let pod0 = format!("{name}-0");
    let output = shell.eval(&pod0, &script).await?;
    let outcome = classify_eval_output(&output);
    match outcome {
        EvalOutcome::Ok => Ok((BootstrapState::CreateUsers, outcome)),
        _ => Ok((BootstrapState::Probe, outcome)),
    }
}

/// Iterates pods `<name>-0..<name>-(replicas-1)` in order until one accepts
/// the admin/monitoring user creation script; a `NotMaster` response means
/// the primary is a different member, so the loop continues.
pub async fn create_users(
    shell: &impl MongoShell,
    name: &str,
    replicas: u32,
    admin_password: &str,
    monitoring_password: &str,
) -> Result<bool, Error> {
    let script = format!(
        "db.getSiblingDB('admin').createUser({{user:'root',pwd:'{admin_password}',roles:[{{role:'root',db:'admin'}}]}}); \
         db=db.getSiblingDB('admin'); db.auth('root','{admin_password}'); \
         db.createUser({{user:'monitoring',pwd:'{monitoring_password}',roles:[{{role:'clusterMonitor',db:'admin'}}]}})"
    );
    for i in 0..replicas {
        let pod = format!("{name}-{i}");
        let output = shell.eval(&pod, &script).await?;
        match classify_eval_output(&output) {
            EvalOutcome::UserCreated => return Ok(true),
            EvalOutcome::NotMaster => continue,
            other => {
                logging::log(
                    Level::Warn,
                    WORKER,
                    format!("user creation on {pod} failed: {other:?}"),
                );
                return Ok(false);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_yet_initialized() {
        let out = classify_eval_output(r#"{ "ok" : 0, "codeName" : "NotYetInitialized" }"#);
        assert_eq!(out, EvalOutcome::NotInitialized);
    }

    #[test]
    fn classifies_node_not_found() {
        let out = classify_eval_output(r#"{ "ok" : 0, "codeName" : "NodeNotFound" }"#);
        assert_eq!(out, EvalOutcome::NodeNotFound);
    }

    #[test]
    fn classifies_successful_status() {
        assert_eq!(classify_eval_output(r#"{ "ok" : 1 }"#), EvalOutcome::Ok);
    }

    #[test]
    fn classifies_user_created() {
        let out = classify_eval_output("Successfully added user: { \"user\" : \"root\" }");
        assert_eq!(out, EvalOutcome::UserCreated);
    }

    #[test]
    fn classifies_not_master() {
        let out = classify_eval_output("Error: couldn't add user: not master : {}");
        assert_eq!(out, EvalOutcome::NotMaster);
    }

    #[test]
    fn falls_through_to_other_for_unrecognized_output() {
        let out = classify_eval_output("garbage");
        assert_eq!(out, EvalOutcome::Other("garbage".to_string()));
    }

    #[test]
    fn initiate_config_hosts_follow_the_member_naming_scheme() {
        let config = initiate_config("t1", "n1", 3);
        assert_eq!(config["_id"], "t1");
        assert_eq!(config["members"][0]["host"], "t1-0.t1.n1.svc.cluster.local");
        assert_eq!(config["members"][2]["host"], "t1-2.t1.n1.svc.cluster.local");
    }

    struct ScriptedShell {
        responses: std::sync::Mutex<std::collections::VecDeque<String>>,
    }

    #[async_trait]
    impl MongoShell for ScriptedShell {
        async fn eval(&self, _pod: &str, _script: &str) -> Result<String, Error> {
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn probe_dispatches_to_initiate_on_not_yet_initialized() {
        let shell = ScriptedShell {
            responses: std::sync::Mutex::new(
                vec![
                    r#"{ "ok" : 0, "codeName" : "NotYetInitialized" }"#.to_string(),
                    r#"{ "ok" : 1 }"#.to_string(),
                ]
                .into(),
            ),
        };
        let (state, _) = probe(&shell, "t1", "n1", 3).await.unwrap();
        assert_eq!(state, BootstrapState::CreateUsers);
    }

    #[tokio::test]
    async fn create_users_stops_at_first_pod_that_succeeds() {
        let shell = ScriptedShell {
            responses: std::sync::Mutex::new(
                vec![
                    "Error: couldn't add user: not master : {}".to_string(),
                    "Successfully added user: { \"user\" : \"root\" }".to_string(),
                ]
                .into(),
            ),
        };
        let created = create_users(&shell, "t1", 3, "pw1", "pw2").await.unwrap();
        assert!(created);
    }
}
