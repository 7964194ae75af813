//! In-memory object store
//!
//! Behaves like the API server where the reconcilers can tell the
//! difference: resource versions bump on every write, a stale version on
//! update is a conflict, deletes of missing objects are no-ops. Writes are
//! logged so tests can assert exactly what a pass did.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use super::{parse_selector, ObjectStore};
use crate::kube_utils::{labels_of, name_of, namespace_of};
use crate::{Error, Result};

type ObjectKey = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    version: u64,
    writes: Vec<String>,
    apply_failures: BTreeMap<String, String>,
    delete_failures: BTreeMap<String, String>,
}

/// Thread-safe in-memory [`ObjectStore`]
#[derive(Default)]
pub struct MemoryObjectStore {
    state: Mutex<State>,
}

fn kind_key(ar: &ApiResource) -> String {
    format!("{}/{}", ar.group, ar.plural)
}

fn key(ar: &ApiResource, namespace: &str, name: &str) -> ObjectKey {
    (kind_key(ar), namespace.to_string(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: impl Into<String>) -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    }))
}

impl MemoryObjectStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::internal_with_context("memory store", "lock poisoned"))
    }

    /// Seed an object without counting it as a write
    pub fn insert(&self, ar: &ApiResource, mut obj: DynamicObject) {
        if let Ok(mut state) = self.lock() {
            state.version += 1;
            let version = state.version;
            obj.metadata.resource_version = Some(version.to_string());
            if obj.metadata.uid.is_none() {
                obj.metadata.uid = Some(format!("uid-{}", version));
            }
            let k = key(ar, namespace_of(&obj), name_of(&obj));
            state.objects.insert(k, obj);
        }
    }

    /// Make every apply of the named object fail with the given server message
    pub fn fail_apply(&self, name: &str, message: &str) {
        if let Ok(mut state) = self.lock() {
            state
                .apply_failures
                .insert(name.to_string(), message.to_string());
        }
    }

    /// Make every delete of the named object fail with the given server message
    pub fn fail_delete(&self, name: &str, message: &str) {
        if let Ok(mut state) = self.lock() {
            state
                .delete_failures
                .insert(name.to_string(), message.to_string());
        }
    }

    /// Look up an object without going through the async trait
    pub fn object(&self, ar: &ApiResource, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.lock()
            .ok()
            .and_then(|s| s.objects.get(&key(ar, namespace, name)).cloned())
    }

    /// Names (`namespace/name`) of every stored object of a kind
    pub fn names(&self, ar: &ApiResource) -> Vec<String> {
        let kk = kind_key(ar);
        self.lock()
            .map(|s| {
                s.objects
                    .keys()
                    .filter(|(k, _, _)| *k == kk)
                    .map(|(_, ns, name)| format!("{}/{}", ns, name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Log of writes (`verb Kind namespace/name`) in the order they happened
    pub fn writes(&self) -> Vec<String> {
        self.lock().map(|s| s.writes.clone()).unwrap_or_default()
    }

    /// Forget the write log
    pub fn clear_writes(&self) {
        if let Ok(mut state) = self.lock() {
            state.writes.clear();
        }
    }

    fn store(
        state: &mut State,
        ar: &ApiResource,
        verb: &str,
        mut obj: DynamicObject,
    ) -> DynamicObject {
        state.version += 1;
        let version = state.version;
        obj.metadata.resource_version = Some(version.to_string());
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(format!("uid-{}", version));
        }
        let ns = namespace_of(&obj).to_string();
        let name = name_of(&obj).to_string();
        state
            .writes
            .push(format!("{} {} {}/{}", verb, ar.kind, ns, name));
        state.objects.insert(key(ar, &ns, &name), obj.clone());
        obj
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let state = self.lock()?;
        Ok(state
            .objects
            .get(&key(ar, namespace.unwrap_or_default(), name))
            .cloned())
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let kk = kind_key(ar);
        let terms = label_selector.map(parse_selector).unwrap_or_default();
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kk && namespace.map_or(true, |want| want == ns.as_str())
            })
            .filter(|(_, obj)| {
                let labels = labels_of(obj);
                terms.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut state = self.lock()?;
        let k = key(ar, namespace_of(obj), name_of(obj));
        if state.objects.contains_key(&k) {
            return Err(Error::conflict(
                &ar.kind,
                namespace_of(obj),
                name_of(obj),
                "already exists",
            ));
        }
        let mut fresh = obj.clone();
        fresh.metadata.uid = None;
        Ok(Self::store(&mut state, ar, "create", fresh))
    }

    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut state = self.lock()?;
        let k = key(ar, namespace_of(obj), name_of(obj));
        let live = state.objects.get(&k).ok_or_else(|| {
            api_error(
                404,
                "NotFound",
                format!("{} {} not found", ar.kind, name_of(obj)),
            )
        })?;
        if obj.metadata.resource_version != live.metadata.resource_version {
            return Err(Error::conflict(
                &ar.kind,
                namespace_of(obj),
                name_of(obj),
                "the object has been modified; please apply your changes to the latest version",
            ));
        }
        let mut next = obj.clone();
        next.metadata.uid = live.metadata.uid.clone();
        Ok(Self::store(&mut state, ar, "update", next))
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
        _field_manager: &str,
    ) -> Result<DynamicObject> {
        let mut state = self.lock()?;
        if let Some(message) = state.apply_failures.get(name_of(obj)) {
            return Err(api_error(400, "BadRequest", message.clone()));
        }
        let k = key(ar, namespace_of(obj), name_of(obj));
        let mut next = obj.clone();
        next.metadata.uid = state.objects.get(&k).and_then(|l| l.metadata.uid.clone());
        Ok(Self::store(&mut state, ar, "apply", next))
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        if let Some(message) = state.delete_failures.get(name) {
            return Err(api_error(500, "InternalError", message.clone()));
        }
        let ns = namespace.unwrap_or_default();
        let existed = state.objects.remove(&key(ar, ns, name)).is_some();
        if existed {
            state
                .writes
                .push(format!("delete {} {}/{}", ar.kind, ns, name));
        }
        Ok(existed)
    }
}
