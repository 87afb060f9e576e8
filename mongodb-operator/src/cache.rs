use std::collections::HashMap;
use std::sync::Mutex;

use kube::{Resource, ResourceExt};

/// Mapping from object UID to last observed resource-version. Owned by the
/// reconcile engine (constructed once in `main` and shared via `Arc`), not a
/// process-wide singleton. Used to skip patches that would be no-ops.
#[derive(Default)]
pub struct ResourceVersionCache {
    versions: Mutex<HashMap<String, String>>,
}

impl ResourceVersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff the cached resource-version for `obj`'s UID matches its
    /// current resource-version.
    pub fn is_current<K>(&self, obj: &K) -> bool
    where
        K: Resource,
    {
        let Some(uid) = obj.uid() else {
            return false;
        };
        let Some(version) = obj.resource_version() else {
            return false;
        };
        self.versions
            .lock()
            .expect("resource version cache poisoned")
            .get(&uid)
            .is_some_and(|cached| cached == &version)
    }

    /// Records the current `(uid, resource_version)` pair.
    pub fn record<K>(&self, obj: &K)
    where
        K: Resource,
    {
        let (Some(uid), Some(version)) = (obj.uid(), obj.resource_version()) else {
            return;
        };
        self.versions
            .lock()
            .expect("resource version cache poisoned")
            .insert(uid, version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use kube::api::ObjectMeta;

    fn svc(uid: &str, rv: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                uid: Some(uid.to_string()),
                resource_version: Some(rv.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn uncached_object_is_not_current() {
        let cache = ResourceVersionCache::new();
        assert!(!cache.is_current(&svc("u1", "1")));
    }

    #[test]
    fn recorded_object_is_current_until_its_version_changes() {
        let cache = ResourceVersionCache::new();
        let obj = svc("u1", "1");
        cache.record(&obj);
        assert!(cache.is_current(&obj));
        assert!(!cache.is_current(&svc("u1", "2")));
    }

    #[test]
    fn object_without_a_uid_is_never_current() {
        let cache = ResourceVersionCache::new();
        let mut obj = svc("u1", "1");
        obj.metadata.uid = None;
        cache.record(&obj);
        assert!(!cache.is_current(&obj));
    }
}
