use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_replicas() -> u32 {
    3
}

fn default_mongodb_limit_cpu() -> String {
    "100m".to_string()
}

fn default_mongodb_limit_memory() -> String {
    "64Mi".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct MongoDbSettings {
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default = "default_mongodb_limit_cpu")]
    pub mongodb_limit_cpu: String,

    #[serde(default = "default_mongodb_limit_memory")]
    pub mongodb_limit_memory: String,
}

impl Default for MongoDbSettings {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            mongodb_limit_cpu: default_mongodb_limit_cpu(),
            mongodb_limit_memory: default_mongodb_limit_memory(),
        }
    }
}

/// A declared MongoDB replica-set cluster. Carries no status subresource —
/// reconciliation health is not observable on the object itself (see DESIGN.md).
#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "operator.kubestack.com",
    version = "v1",
    kind = "MongoDBCluster",
    plural = "mongodbs",
    derive = "PartialEq",
    namespaced
)]
#[kube(derive = "Default")]
pub struct MongoDBClusterSpec {
    #[serde(default)]
    pub mongodb: MongoDbSettings,
}

impl MongoDBClusterSpec {
    pub fn replicas(&self) -> u32 {
        self.mongodb.replicas
    }

    pub fn limit_cpu(&self) -> &str {
        &self.mongodb.mongodb_limit_cpu
    }

    pub fn limit_memory(&self) -> &str {
        &self.mongodb.mongodb_limit_memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_contract() {
        let settings = MongoDbSettings::default();
        assert_eq!(settings.replicas, 3);
        assert_eq!(settings.mongodb_limit_cpu, "100m");
        assert_eq!(settings.mongodb_limit_memory, "64Mi");
    }

    #[test]
    fn missing_mongodb_block_falls_back_to_defaults() {
        let spec: MongoDBClusterSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.replicas(), 3);
        assert_eq!(spec.limit_cpu(), "100m");
        assert_eq!(spec.limit_memory(), "64Mi");
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let spec: MongoDBClusterSpec = serde_json::from_value(serde_json::json!({
            "mongodb": { "replicas": 5 }
        }))
        .unwrap();
        assert_eq!(spec.replicas(), 5);
        assert_eq!(spec.limit_cpu(), "100m");
    }
}
