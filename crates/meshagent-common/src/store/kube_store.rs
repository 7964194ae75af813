//! kube-rs backed object store

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

use super::ObjectStore;
use crate::kube_utils::{name_of, namespace_of};
use crate::{Error, Result};

/// Object store talking to the API server through a shared client
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if !ns.is_empty() => Api::namespaced_with(self.client.clone(), ns, ar),
            _ => Api::all_with(self.client.clone(), ar),
        }
    }

    fn object_api(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<Api<DynamicObject>> {
        if name_of(obj).is_empty() {
            return Err(Error::store(&ar.kind, "object has no name"));
        }
        Ok(self.api(ar, obj.metadata.namespace.as_deref()))
    }
}

fn conflict_or(ar: &ApiResource, obj: &DynamicObject, e: kube::Error) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => {
            Error::conflict(&ar.kind, namespace_of(obj), name_of(obj), ae.message)
        }
        other => other.into(),
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(ar, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>> {
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        Ok(self.api(ar, namespace).list(&lp).await?.items)
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        debug!(kind = %ar.kind, namespace = %namespace_of(obj), name = %name_of(obj), "creating");
        self.object_api(ar, obj)?
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| conflict_or(ar, obj, e))
    }

    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        debug!(kind = %ar.kind, namespace = %namespace_of(obj), name = %name_of(obj), "updating");
        self.object_api(ar, obj)?
            .replace(name_of(obj), &PostParams::default(), obj)
            .await
            .map_err(|e| conflict_or(ar, obj, e))
    }

    async fn apply(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject> {
        debug!(kind = %ar.kind, namespace = %namespace_of(obj), name = %name_of(obj), "applying");
        let params = PatchParams::apply(field_manager).force();
        Ok(self
            .object_api(ar, obj)?
            .patch(name_of(obj), &params, &Patch::Apply(obj))
            .await?)
    }

    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool> {
        match self
            .api(ar, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
