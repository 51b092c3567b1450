#![forbid(unsafe_code)]

use std::sync::Mutex;

use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};
use spares_core::{Deleter, LabelKeys, LiteObject, Lister, ObjectDescriptor, RetentionConfig, RetentionEngine, RetentionError};

fn ts(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

fn obj(name: &str, app: &str, version: &str, secs: i64) -> LiteObject {
    let mut o = LiteObject::new(name).created(ts(secs));
    if !app.is_empty() { o = o.label(spares_core::NAME_LABEL, app); }
    if !version.is_empty() { o = o.label(spares_core::VERSION_LABEL, version); }
    o
}

/// In-memory namespace: listing reflects deletions, failures can be injected.
struct FakeCluster {
    objects: Mutex<Vec<LiteObject>>,
    keys: LabelKeys,
    fail_list: bool,
    fail_delete: Option<String>,
    lists: Mutex<usize>,
    deletes: Mutex<Vec<String>>,
}

impl FakeCluster {
    fn new(objects: Vec<LiteObject>) -> Self {
        Self {
            objects: Mutex::new(objects),
            keys: LabelKeys::default(),
            fail_list: false,
            fail_delete: None,
            lists: Mutex::new(0),
            deletes: Mutex::new(Vec::new()),
        }
    }

    fn deletes(&self) -> Vec<String> { self.deletes.lock().unwrap().clone() }
    fn remaining(&self) -> Vec<String> { self.objects.lock().unwrap().iter().map(|o| o.name.clone()).collect() }
}

#[async_trait::async_trait]
impl Lister for FakeCluster {
    async fn list(&self, _kind: &str) -> anyhow::Result<Vec<ObjectDescriptor>> {
        *self.lists.lock().unwrap() += 1;
        if self.fail_list { return Err(anyhow!("apiserver unavailable")); }
        Ok(self.objects.lock().unwrap().iter().map(|o| ObjectDescriptor::from_object(o, &self.keys)).collect())
    }
}

#[async_trait::async_trait]
impl Deleter for FakeCluster {
    async fn delete(&self, identity: &str) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(identity.to_string());
        if self.fail_delete.as_deref() == Some(identity) { return Err(anyhow!("conflict")); }
        self.objects.lock().unwrap().retain(|o| o.name != identity);
        Ok(())
    }
}

fn engine(reserve: usize, git_ref: &str) -> RetentionEngine {
    RetentionEngine::new(RetentionConfig { default_reserve: reserve, current_git_ref: git_ref.into(), verbose: true })
}

fn web_four() -> Vec<LiteObject> {
    vec![
        obj("web-v1", "web", "v1", 1),
        obj("web-v2", "web", "v2", 2),
        obj("web-v3", "web", "v3", 3),
        obj("web-v4", "web", "v4", 4),
    ]
}

#[tokio::test]
async fn deletes_oldest_beyond_reserve() {
    let cluster = FakeCluster::new(web_four());
    let report = engine(1, "v4").reconcile("deployments", &cluster, &cluster).await.unwrap();
    assert_eq!(report.kind, "deployments");
    assert_eq!(report.applications, 1);
    assert_eq!(report.deleted, vec!["web-v2", "web-v1"]);
    assert_eq!(cluster.deletes(), vec!["web-v2", "web-v1"]);
    assert_eq!(cluster.remaining(), vec!["web-v3", "web-v4"]);
    assert_eq!(*cluster.lists.lock().unwrap(), 1);
}

#[tokio::test]
async fn second_pass_is_noop() {
    let cluster = FakeCluster::new(web_four());
    let e = engine(1, "v4");
    e.reconcile("deployments", &cluster, &cluster).await.unwrap();
    let again = e.reconcile("deployments", &cluster, &cluster).await.unwrap();
    assert!(again.deleted.is_empty());
    assert_eq!(cluster.deletes().len(), 2);
}

#[tokio::test]
async fn spares_annotation_on_current_ref_wins() {
    let keys = LabelKeys::default();
    let objects = vec![
        obj("batch-a", "batch", "a", 1),
        obj("batch-b", "batch", "b", 2),
        obj("batch-c", "batch", "c", 3).annotation(keys.spares_annotation.clone(), "0"),
    ];
    let cluster = FakeCluster::new(objects);
    let report = engine(3, "c").reconcile("deployments", &cluster, &cluster).await.unwrap();
    assert_eq!(report.deleted, vec!["batch-b", "batch-a"]);
}

#[tokio::test]
async fn unmanaged_objects_are_never_deleted() {
    let objects = vec![
        obj("kube-dns", "", "", 0),
        obj("legacy-0a1b2c3d", "", "", 1),
        obj("api-1", "api", "v1", 2),
        obj("api-2", "api", "v2", 3),
    ];
    let cluster = FakeCluster::new(objects);
    let report = engine(0, "v2").reconcile("services", &cluster, &cluster).await.unwrap();
    assert_eq!(report.deleted, vec!["api-1"]);
    assert!(cluster.remaining().contains(&"kube-dns".to_string()));
    assert!(cluster.remaining().contains(&"legacy-0a1b2c3d".to_string()));
}

#[tokio::test]
async fn listing_failure_deletes_nothing() {
    let mut cluster = FakeCluster::new(web_four());
    cluster.fail_list = true;
    let err = engine(0, "v4").reconcile("statefulsets", &cluster, &cluster).await.unwrap_err();
    assert!(matches!(err, RetentionError::Listing { .. }));
    assert_eq!(err.kind(), "statefulsets");
    assert!(cluster.deletes().is_empty());
}

#[tokio::test]
async fn bad_spares_value_aborts_whole_pass() {
    let keys = LabelKeys::default();
    let mut objects = web_four();
    objects.push(obj("api-1", "api", "v1", 1).annotation(keys.spares_annotation.clone(), "two"));
    let cluster = FakeCluster::new(objects);
    let err = engine(0, "v4").reconcile("deployments", &cluster, &cluster).await.unwrap_err();
    assert_eq!(err.identity(), Some("api-1"));
    assert!(matches!(err, RetentionError::OverrideParse { .. }));
    assert!(cluster.deletes().is_empty());
}

#[tokio::test]
async fn deletion_failure_stops_at_failing_candidate() {
    let mut objects = web_four();
    objects.extend([obj("zeta-1", "zeta", "v1", 1), obj("zeta-2", "zeta", "v2", 2)]);
    let mut cluster = FakeCluster::new(objects);
    cluster.fail_delete = Some("web-v2".into());
    let err = engine(0, "v4").reconcile("deployments", &cluster, &cluster).await.unwrap_err();

    match &err {
        RetentionError::Deletion { identity, kind, .. } => {
            assert_eq!(identity, "web-v2");
            assert_eq!(kind, "deployments");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // web-v3 went first and stays deleted; nothing after the failure was attempted
    assert_eq!(cluster.deletes(), vec!["web-v3", "web-v2"]);
    assert!(!cluster.remaining().contains(&"web-v3".to_string()));
    assert!(cluster.remaining().contains(&"zeta-1".to_string()));
}

#[tokio::test]
async fn budgets_are_per_application() {
    let objects = vec![
        obj("web-1", "web", "v1", 1),
        obj("web-2", "web", "v2", 2),
        obj("api-1", "api", "v1", 1),
        obj("api-2", "api", "v2", 2),
    ];
    let cluster = FakeCluster::new(objects);
    let report = engine(1, "v2").reconcile("deployments", &cluster, &cluster).await.unwrap();
    assert!(report.deleted.is_empty());
    assert_eq!(report.applications, 2);
}
