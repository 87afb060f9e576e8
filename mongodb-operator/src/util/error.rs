#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("signing tool process failed: {source}")]
    Process {
        #[from]
        source: std::io::Error,
    },

    #[error("signing tool emitted unparseable output: {source}")]
    CfsslOutput { source: serde_json::Error },
}
