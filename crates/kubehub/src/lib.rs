//! Spares kubehub: per-kind listing and deletion against the cluster API.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::{
    apps::v1::{DaemonSet, Deployment, StatefulSet},
    core::v1::Service,
    networking::v1::Ingress,
};
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, DeleteParams, ListParams},
    Client, Resource, ResourceExt,
};
use metrics::{counter, histogram};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use spares_core::{
    Deleter, GenericObject, LabelKeys, Lister, ObjectDescriptor, ReconcileReport, RetentionEngine, RetentionError,
    RetentionPlan, VersionTimeline,
};
use tracing::{debug, info, warn};

/// Resource kinds subject to cleanup, in the order they are processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Deployments,
    StatefulSets,
    DaemonSets,
    Services,
    Ingresses,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Deployments,
        ResourceKind::StatefulSets,
        ResourceKind::DaemonSets,
        ResourceKind::Services,
        ResourceKind::Ingresses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Deployments => "deployments",
            ResourceKind::StatefulSets => "statefulsets",
            ResourceKind::DaemonSets => "daemonsets",
            ResourceKind::Services => "services",
            ResourceKind::Ingresses => "ingresses",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for ResourceKind {
    type Err = anyhow::Error;

    /// Accepts plural, singular and kubectl short names, case-insensitively.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "deployments" | "deployment" | "deploy" => Ok(ResourceKind::Deployments),
            "statefulsets" | "statefulset" | "sts" => Ok(ResourceKind::StatefulSets),
            "daemonsets" | "daemonset" | "ds" => Ok(ResourceKind::DaemonSets),
            "services" | "service" | "svc" => Ok(ResourceKind::Services),
            "ingresses" | "ingress" | "ing" => Ok(ResourceKind::Ingresses),
            _ => Err(anyhow!("unsupported resource kind: {} (expect one of deployments, statefulsets, daemonsets, services, ingresses)", s)),
        }
    }
}

/// Borrowed view of a typed kube resource as a [`GenericObject`].
pub struct KubeObject<'a, K>(pub &'a K);

impl<K: Resource> GenericObject for KubeObject<'_, K> {
    fn name(&self) -> &str { self.0.meta().name.as_deref().unwrap_or("") }
    fn labels(&self) -> &BTreeMap<String, String> { self.0.labels() }
    fn annotations(&self) -> &BTreeMap<String, String> { self.0.annotations() }
    fn creation_timestamp(&self) -> Option<DateTime<Utc>> { self.0.meta().creation_timestamp.as_ref().map(|t| t.0) }
}

/// Lister + Deleter for one typed, namespaced resource kind.
pub struct KindAdapter<K> {
    api: Api<K>,
    kind: ResourceKind,
    keys: LabelKeys,
}

impl<K> KindAdapter<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    pub fn new(client: Client, namespace: &str, kind: ResourceKind, keys: LabelKeys) -> Self {
        Self { api: Api::namespaced(client, namespace), kind, keys }
    }
}

#[async_trait::async_trait]
impl<K> Lister for KindAdapter<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    async fn list(&self, kind: &str) -> Result<Vec<ObjectDescriptor>> {
        let started = std::time::Instant::now();
        let list = self.api.list(&ListParams::default()).await.with_context(|| format!("listing {}", kind))?;
        histogram!("spares_list_ms", started.elapsed().as_secs_f64() * 1000.0, "kind" => self.kind.as_str());
        debug!(kind, count = list.items.len(), "listed");
        Ok(list.items.iter().map(|o| ObjectDescriptor::from_object(&KubeObject(o), &self.keys)).collect())
    }
}

#[async_trait::async_trait]
impl<K> Deleter for KindAdapter<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + DeserializeOwned + fmt::Debug + Send + Sync + 'static,
{
    async fn delete(&self, identity: &str) -> Result<()> {
        // background propagation so owned ReplicaSets/Pods are collected too
        match self.api.delete(identity, &DeleteParams::background()).await {
            Ok(_) => {
                counter!("spares_delete_total", 1u64, "kind" => self.kind.as_str());
                Ok(())
            }
            Err(e) => {
                counter!("spares_delete_errors_total", 1u64, "kind" => self.kind.as_str());
                Err(anyhow::Error::new(e).context(format!("deleting {} {}", self.kind, identity)))
            }
        }
    }
}

/// Deleter that records and logs instead of calling the API.
#[derive(Debug, Default)]
pub struct DryRunDeleter {
    kind: String,
    would_delete: Mutex<Vec<String>>,
}

impl DryRunDeleter {
    pub fn new(kind: impl Into<String>) -> Self { Self { kind: kind.into(), would_delete: Mutex::new(Vec::new()) } }

    pub fn would_delete(&self) -> Vec<String> {
        self.would_delete.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Deleter for DryRunDeleter {
    async fn delete(&self, identity: &str) -> Result<()> {
        info!(kind = %self.kind, identity, "dry run: would delete");
        self.would_delete
            .lock()
            .map_err(|_| anyhow!("dry-run recorder poisoned"))?
            .push(identity.to_string());
        Ok(())
    }
}

/// Both halves of a per-kind adapter behind one object.
pub trait KindOps: Lister + Deleter {}
impl<T: Lister + Deleter> KindOps for T {}

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from kubeconfig or in-cluster env")
}

/// A namespace on a live cluster.
#[derive(Clone)]
pub struct Cluster {
    client: Client,
    namespace: String,
    keys: LabelKeys,
}

impl Cluster {
    /// Connect using the default kube config. Without `namespace`, the
    /// context's default namespace is used.
    pub async fn connect(namespace: Option<&str>, keys: LabelKeys) -> Result<Self> {
        let client = get_kube_client().await?;
        Ok(Self::new(client, namespace, keys))
    }

    pub fn new(client: Client, namespace: Option<&str>, keys: LabelKeys) -> Self {
        let namespace = namespace.map(|s| s.to_string()).unwrap_or_else(|| client.default_namespace().to_string());
        Self { client, namespace, keys }
    }

    pub fn namespace(&self) -> &str { &self.namespace }

    fn typed<K>(&self, kind: ResourceKind) -> KindAdapter<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        KindAdapter::new(self.client.clone(), &self.namespace, kind, self.keys.clone())
    }

    pub fn adapter(&self, kind: ResourceKind) -> Box<dyn KindOps> {
        match kind {
            ResourceKind::Deployments => Box::new(self.typed::<Deployment>(kind)),
            ResourceKind::StatefulSets => Box::new(self.typed::<StatefulSet>(kind)),
            ResourceKind::DaemonSets => Box::new(self.typed::<DaemonSet>(kind)),
            ResourceKind::Services => Box::new(self.typed::<Service>(kind)),
            ResourceKind::Ingresses => Box::new(self.typed::<Ingress>(kind)),
        }
    }

    /// Descriptors for every supported kind, listed concurrently.
    pub async fn list_supported_objects(&self) -> Result<Vec<(ResourceKind, ObjectDescriptor)>> {
        debug!(ns = %self.namespace, "listing supported objects");
        let lists = futures::future::try_join_all(ResourceKind::ALL.iter().map(|&kind| async move {
            let items = self.adapter(kind).list(kind.as_str()).await?;
            Ok::<_, anyhow::Error>(items.into_iter().map(move |d| (kind, d)))
        }))
        .await?;
        let out: Vec<_> = lists.into_iter().flatten().collect();
        debug!(ns = %self.namespace, count = out.len(), "found objects");
        Ok(out)
    }

    pub async fn latest_git_ref(&self) -> Result<Option<String>> {
        let descriptors: Vec<_> = self.list_supported_objects().await?.into_iter().map(|(_, d)| d).collect();
        Ok(spares_core::latest_git_ref(&descriptors))
    }

    /// Distinct git refs in the namespace, newest first.
    pub async fn git_refs(&self) -> Result<VersionTimeline> {
        let descriptors: Vec<_> = self.list_supported_objects().await?.into_iter().map(|(_, d)| d).collect();
        Ok(spares_core::git_refs(&descriptors))
    }

    /// List one kind and compute its retention plan without deleting anything.
    pub async fn plan_kind(&self, engine: &RetentionEngine, kind: ResourceKind) -> Result<RetentionPlan> {
        let descriptors = self.adapter(kind).list(kind.as_str()).await?;
        Ok(engine.plan(kind.as_str(), &descriptors)?)
    }

    /// One engine pass for one kind. With `dry_run` deletions are only logged.
    pub async fn cleanup_kind(&self, engine: &RetentionEngine, kind: ResourceKind, dry_run: bool) -> Result<ReconcileReport, RetentionError> {
        info!(kind = %kind, ns = %self.namespace, dry_run, "cleaning up old objects");
        let adapter = self.adapter(kind);
        if dry_run {
            let deleter = DryRunDeleter::new(kind.as_str());
            engine.reconcile(kind.as_str(), adapter.as_ref(), &deleter).await
        } else {
            engine.reconcile(kind.as_str(), adapter.as_ref(), adapter.as_ref()).await
        }
    }

    /// Run a pass per kind. Kinds do not share budgets and a failing kind does
    /// not stop the others; every outcome is returned in kind order.
    pub async fn cleanup_all(
        &self,
        engine: &RetentionEngine,
        kinds: &[ResourceKind],
        dry_run: bool,
    ) -> Vec<(ResourceKind, Result<ReconcileReport, RetentionError>)> {
        let mut out = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            let res = self.cleanup_kind(engine, kind, dry_run).await;
            if let Err(e) = &res {
                warn!(kind = %kind, error = ?e, "cleanup pass failed");
            }
            out.push((kind, res));
        }
        out
    }

    /// Delete every supported object deployed at `git_ref`. Stops at the first failure.
    pub async fn delete_git_ref(&self, git_ref: &str, dry_run: bool) -> Result<Vec<(ResourceKind, String)>> {
        if git_ref.is_empty() {
            return Err(anyhow!("refusing to delete objects with an empty git ref"));
        }
        info!(ns = %self.namespace, git_ref, dry_run, "deleting app deployment");
        let mut deleted = Vec::new();
        for kind in ResourceKind::ALL {
            let adapter = self.adapter(kind);
            let descriptors = adapter.list(kind.as_str()).await?;
            for d in spares_core::descriptors_with_version(&descriptors, git_ref) {
                if dry_run {
                    DryRunDeleter::new(kind.as_str()).delete(&d.identity).await?;
                } else {
                    adapter.delete(&d.identity).await?;
                }
                deleted.push((kind, d.identity.clone()));
            }
        }
        Ok(deleted)
    }
}
