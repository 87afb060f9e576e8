use futures::TryStreamExt;
use kube::api::{AttachParams, DeleteParams, ListParams, Patch, PatchParams};
use kube::Api;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tokio::io::AsyncReadExt;

use crate::util::{Error, MANAGER_NAME};

/// Distinguishable result of a single cluster-API verb. Every verb in this
/// module returns one of these four shapes rather than a raw `kube::Error`
/// so call sites can pattern-match uniformly instead of re-deriving
/// not-found/conflict from the wire error on every call.
#[derive(Debug)]
pub enum Outcome<T> {
    Found(T),
    NotFound,
    Conflict,
    Transport(Error),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Found(v) => Outcome::Found(f(v)),
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Conflict => Outcome::Conflict,
            Outcome::Transport(e) => Outcome::Transport(e),
        }
    }
}

fn classify<T>(result: Result<T, kube::Error>) -> Outcome<T> {
    match result {
        Ok(v) => Outcome::Found(v),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Outcome::NotFound,
        Err(kube::Error::Api(ae)) if ae.code == 409 => Outcome::Conflict,
        Err(e) => Outcome::Transport(e.into()),
    }
}

pub async fn get<K>(api: &Api<K>, name: &str) -> Outcome<K>
where
    K: Clone + DeserializeOwned + Debug,
{
    classify(api.get(name).await)
}

pub async fn list<K>(api: &Api<K>, label_selector: &str) -> Outcome<Vec<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    let params = ListParams::default().labels(label_selector);
    classify(api.list(&params).await.map(|l| l.items))
}

pub async fn create<K>(api: &Api<K>, object: &K) -> Outcome<K>
where
    K: Clone + DeserializeOwned + Debug + Serialize,
{
    classify(api.create(&Default::default(), object).await)
}

/// Server-side apply patch under the controller's field manager. Diff-agnostic:
/// the caller supplies the full desired object and the API server computes
/// what changed, rather than us shipping a client-computed JSON diff.
pub async fn apply<K>(api: &Api<K>, name: &str, object: &K) -> Outcome<K>
where
    K: Clone + DeserializeOwned + Debug + Serialize,
{
    let patch = Patch::Apply(object);
    classify(
        api.patch(name, &PatchParams::apply(MANAGER_NAME), &patch)
            .await,
    )
}

pub async fn delete<K>(api: &Api<K>, name: &str) -> Outcome<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    let params = DeleteParams::foreground();
    classify(api.delete(name, &params).await.map(|_| ()))
}

/// Runs `command` inside `container` of `pod` and returns the concatenated
/// stdout. The bootstrap controller inspects this text with substring
/// matching (see `crate::bootstrap`); this function has no opinion about
/// the content, only about collecting it.
pub async fn exec(
    api: &Api<k8s_openapi::api::core::v1::Pod>,
    pod: &str,
    container: &str,
    command: Vec<String>,
) -> Result<String, Error> {
    let params = AttachParams::default()
        .container(container)
        .stdin(false)
        .stdout(true)
        .stderr(true);
    let mut process = api.exec(pod, command, &params).await?;
    let mut stdout = process
        .stdout()
        .ok_or_else(|| Error::UserInput("exec channel produced no stdout".to_string()))?;
    let mut output = String::new();
    stdout
        .read_to_string(&mut output)
        .await
        .map_err(|source| Error::Process { source })?;
    process.join().await.ok();
    Ok(output)
}
