use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector, PodAffinityTerm,
    PodAntiAffinity, PodSpec, PodTemplateSpec, ResourceRequirements, Secret, SecretKeySelector,
    SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use mongodb_operator_types::MongoDBCluster;

pub const OPERATED_BY_LABEL: &str = "operated-by";
pub const OPERATED_BY_VALUE: &str = "mongodb.operator.kubestack.com";
pub const HERITAGE_LABEL: &str = "heritage";
pub const HERITAGE_VALUE: &str = "kubestack.com";
pub const CLUSTER_LABEL: &str = "cluster";

/// Labels every derived object carries. With `name`, also ties the object to
/// its owning declaration via `cluster=<name>`.
pub fn default_labels(name: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(OPERATED_BY_LABEL.to_string(), OPERATED_BY_VALUE.to_string());
    labels.insert(HERITAGE_LABEL.to_string(), HERITAGE_VALUE.to_string());
    if let Some(name) = name {
        labels.insert(CLUSTER_LABEL.to_string(), name.to_string());
    }
    labels
}

/// The same entries as `default_labels`, joined `k=v,k=v` for use as a list
/// selector and as a human-readable invariant string in tests.
pub fn default_label_selector(name: &str) -> String {
    let labels = default_labels(Some(name));
    labels
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector for every object this controller has ever labelled, regardless
/// of owning cluster — used by the sweeper's garbage-collection pass.
pub fn managed_label_selector() -> String {
    format!("{OPERATED_BY_LABEL}={OPERATED_BY_VALUE},{HERITAGE_LABEL}={HERITAGE_VALUE}")
}

fn member_host(cluster: &str, namespace: &str, index: u32) -> String {
    format!("{cluster}-{index}.{cluster}.{namespace}.svc.cluster.local")
}

pub fn service_name(cluster: &str) -> String {
    cluster.to_string()
}

pub fn secret_name(cluster: &str, suffix: &str) -> String {
    format!("{cluster}{suffix}")
}

pub const SECRET_SUFFIX_CA: &str = "-ca";
pub const SECRET_SUFFIX_CLIENT_CERT: &str = "-client-certificate";
pub const SECRET_SUFFIX_ADMIN_CREDENTIALS: &str = "-admin-credentials";
pub const SECRET_SUFFIX_MONITORING_CREDENTIALS: &str = "-monitoring-credentials";

/// Headless service fronting the stateful workload's stable member DNS names.
pub fn build_service(decl: &MongoDBCluster) -> Service {
    let name = decl.name_any();
    let namespace = decl.namespace();
    let mut selector = BTreeMap::new();
    selector.insert(CLUSTER_LABEL.to_string(), name.clone());

    let mut labels = default_labels(Some(&name));
    labels.insert("monitoring.kubestack.com".to_string(), "metrics".to_string());

    Service {
        metadata: ObjectMeta {
            name: Some(service_name(&name)),
            namespace,
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector),
            ports: Some(vec![
                ServicePort {
                    name: Some("mongod".to_string()),
                    port: 27017,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("metrics".to_string()),
                    port: 9001,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Stateful workload running `replicas` mongod members with a TLS bootstrap
/// init container and a sidecar metrics exporter.
pub fn build_stateful_workload(decl: &MongoDBCluster) -> StatefulSet {
    let name = decl.name_any();
    let namespace = decl.namespace();
    let replicas = decl.spec.replicas();
    let cpu_limit = decl.spec.limit_cpu().to_string();
    let memory_limit = decl.spec.limit_memory().to_string();

    let mut match_labels = BTreeMap::new();
    match_labels.insert(CLUSTER_LABEL.to_string(), name.clone());

    let mongod_command = vec![
        "mongod".to_string(),
        "--auth".to_string(),
        "--replSet".to_string(),
        name.clone(),
        "--sslMode".to_string(),
        "requireSSL".to_string(),
        "--clusterAuthMode".to_string(),
        "x509".to_string(),
        "--sslPEMKeyFile".to_string(),
        "/etc/ssl/mongod/mongod.pem".to_string(),
        "--sslCAFile".to_string(),
        "/etc/ssl/mongod/ca.pem".to_string(),
    ];

    let mongod_container = Container {
        name: "mongod".to_string(),
        image: Some("mongo:3.4.1".to_string()),
        command: Some(mongod_command),
        ports: Some(vec![ContainerPort {
            name: Some("mongodb".to_string()),
            container_port: 27017,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "mongo-tls".to_string(),
                mount_path: "/etc/ssl/mongod".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "mongo-data".to_string(),
                mount_path: "/data/db".to_string(),
                ..Default::default()
            },
        ]),
        resources: Some(ResourceRequirements {
            limits: Some({
                let mut m = BTreeMap::new();
                m.insert("cpu".to_string(), Quantity(cpu_limit.clone()));
                m.insert("memory".to_string(), Quantity(memory_limit.clone()));
                m
            }),
            requests: Some({
                let mut m = BTreeMap::new();
                m.insert("cpu".to_string(), Quantity(cpu_limit));
                m.insert("memory".to_string(), Quantity(memory_limit));
                m
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let metrics_container = Container {
        name: "metrics".to_string(),
        image: Some("quay.io/kubestack/prometheus-mongodb-exporter:latest".to_string()),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".to_string()),
            container_port: 9001,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(vec![
            EnvVar {
                name: "MONGODB_USER".to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret_name(&name, SECRET_SUFFIX_MONITORING_CREDENTIALS),
                        key: "username".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvVar {
                name: "MONGODB_PASSWORD".to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret_name(&name, SECRET_SUFFIX_MONITORING_CREDENTIALS),
                        key: "password".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        resources: Some(ResourceRequirements {
            limits: Some({
                let mut m = BTreeMap::new();
                m.insert("cpu".to_string(), Quantity("50m".to_string()));
                m.insert("memory".to_string(), Quantity("16Mi".to_string()));
                m
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let cert_init_container = Container {
        name: "cert-init".to_string(),
        image: Some("quay.io/kubestack/mongodb-init:latest".to_string()),
        command: Some(vec!["ansible-playbook".to_string(), "member-cert.yml".to_string()]),
        env: Some(vec![
            EnvVar {
                name: "METADATA_NAME".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.name".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
            EnvVar {
                name: "NAMESPACE".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.namespace".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: "mongo-ca".to_string(),
                mount_path: "/etc/ssl/mongod-ca".to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: "mongo-tls".to_string(),
                mount_path: "/etc/ssl/mongod".to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: "mongo-ca".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name(&name, SECRET_SUFFIX_CA)),
                items: Some(vec![
                    k8s_openapi::api::core::v1::KeyToPath {
                        key: "ca.pem".to_string(),
                        path: "ca.pem".to_string(),
                        ..Default::default()
                    },
                    k8s_openapi::api::core::v1::KeyToPath {
                        key: "ca-key.pem".to_string(),
                        path: "ca-key.pem".to_string(),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: "mongo-tls".to_string(),
            empty_dir: Some(Default::default()),
            ..Default::default()
        },
        Volume {
            name: "mongo-data".to_string(),
            empty_dir: Some(Default::default()),
            ..Default::default()
        },
    ];

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: namespace.clone(),
            labels: Some(default_labels(Some(&name))),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas as i32),
            service_name: Some(name.clone()),
            selector: LabelSelector {
                match_labels: Some(match_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(default_labels(Some(&name))),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    init_containers: Some(vec![cert_init_container]),
                    containers: vec![mongod_container, metrics_container],
                    volumes: Some(volumes),
                    affinity: Some(Affinity {
                        pod_anti_affinity: Some(PodAntiAffinity {
                            required_during_scheduling_ignored_during_execution: Some(vec![
                                PodAffinityTerm {
                                    label_selector: Some(LabelSelector {
                                        match_labels: Some(match_labels),
                                        ..Default::default()
                                    }),
                                    topology_key: "kubernetes.io/hostname".to_string(),
                                    ..Default::default()
                                },
                            ]),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Secret named `<name><suffix>` carrying `string_data` — the API server,
/// not this function, performs the base64 encoding.
pub fn build_secret(
    decl: &MongoDBCluster,
    suffix: &str,
    string_data: BTreeMap<String, String>,
) -> Secret {
    let name = decl.name_any();
    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(&name, suffix)),
            namespace: decl.namespace(),
            labels: Some(default_labels(Some(&name))),
            ..Default::default()
        },
        string_data: Some(string_data),
        ..Default::default()
    }
}

/// Member DNS hosts used both by the stateful workload's peers and the
/// bootstrap controller's `rs.initiate` config.
pub fn member_hosts(cluster: &str, namespace: &str, replicas: u32) -> Vec<String> {
    (0..replicas)
        .map(|i| member_host(cluster, namespace, i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb_operator_types::{MongoDBClusterSpec, MongoDbSettings};
    use kube::api::ObjectMeta as KubeObjectMeta;

    fn decl(name: &str, namespace: &str, replicas: u32) -> MongoDBCluster {
        MongoDBCluster {
            metadata: KubeObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: MongoDBClusterSpec {
                mongodb: MongoDbSettings {
                    replicas,
                    ..Default::default()
                },
            },
        }
    }

    #[test]
    fn default_labels_carry_the_invariant_triple() {
        let labels = default_labels(Some("t1"));
        assert_eq!(labels.get(OPERATED_BY_LABEL).unwrap(), OPERATED_BY_VALUE);
        assert_eq!(labels.get(HERITAGE_LABEL).unwrap(), HERITAGE_VALUE);
        assert_eq!(labels.get(CLUSTER_LABEL).unwrap(), "t1");
    }

    #[test]
    fn service_is_headless_with_both_ports() {
        let svc = build_service(&decl("t1", "n1", 3));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert!(ports.iter().any(|p| p.name.as_deref() == Some("mongod") && p.port == 27017));
        assert!(ports.iter().any(|p| p.name.as_deref() == Some("metrics") && p.port == 9001));
    }

    #[test]
    fn stateful_workload_uses_declared_replica_count() {
        let sts = build_stateful_workload(&decl("t1", "n1", 5));
        assert_eq!(sts.spec.unwrap().replicas, Some(5));
    }

    #[test]
    fn mongod_container_carries_the_declared_resource_limits() {
        let mut d = decl("t1", "n1", 3);
        d.spec.mongodb.mongodb_limit_cpu = "250m".to_string();
        d.spec.mongodb.mongodb_limit_memory = "128Mi".to_string();
        let sts = build_stateful_workload(&d);
        let pod_spec = sts.spec.unwrap().template.spec.unwrap();
        let mongod = pod_spec.containers.iter().find(|c| c.name == "mongod").unwrap();
        let resources = mongod.resources.as_ref().unwrap();
        let limits = resources.limits.as_ref().unwrap();
        assert_eq!(limits.get("cpu").unwrap().0, "250m");
        assert_eq!(limits.get("memory").unwrap().0, "128Mi");
        let requests = resources.requests.as_ref().unwrap();
        assert_eq!(requests.get("cpu").unwrap().0, "250m");
        assert_eq!(requests.get("memory").unwrap().0, "128Mi");
    }

    #[test]
    fn member_hosts_are_fully_qualified_per_replica() {
        let hosts = member_hosts("t1", "n1", 3);
        assert_eq!(hosts.len(), 3);
        assert_eq!(hosts[0], "t1-0.t1.n1.svc.cluster.local");
        assert_eq!(hosts[2], "t1-2.t1.n1.svc.cluster.local");
    }

    #[test]
    fn secret_name_matches_suffix_convention() {
        assert_eq!(secret_name("t1", SECRET_SUFFIX_CA), "t1-ca");
        assert_eq!(secret_name("t1", SECRET_SUFFIX_ADMIN_CREDENTIALS), "t1-admin-credentials");
    }
}
