//! Generic object abstraction and the descriptor projection fed to the engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label carrying the logical application name.
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// Label carrying the deployed git ref.
pub const VERSION_LABEL: &str = "app.kubernetes.io/version";
/// Annotation prefix used when none is configured.
pub const DEFAULT_ANNOTATION_PREFIX: &str = "foo.com";
/// Final path segment of the spares annotation (`<prefix>/spares`).
pub const SPARES_ANNOTATION_SUFFIX: &str = "spares";

/// Legacy object names end in `-<first 8 chars of the git hash>`.
const LEGACY_REF_LEN: usize = 8;

/// Minimal view over any cluster object: a name, labels, annotations and a creation time.
pub trait GenericObject {
    fn name(&self) -> &str;
    fn labels(&self) -> &BTreeMap<String, String>;
    fn annotations(&self) -> &BTreeMap<String, String>;
    fn creation_timestamp(&self) -> Option<DateTime<Utc>>;
}

/// The key names read off each object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelKeys {
    pub spares_annotation: String,
    pub name_label: String,
    pub version_label: String,
}

impl LabelKeys {
    /// Keys with the spares annotation placed under `prefix`.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            spares_annotation: format!("{}/{}", prefix, SPARES_ANNOTATION_SUFFIX),
            name_label: NAME_LABEL.to_string(),
            version_label: VERSION_LABEL.to_string(),
        }
    }
}

impl Default for LabelKeys {
    fn default() -> Self { Self::with_prefix(DEFAULT_ANNOTATION_PREFIX) }
}

/// Resolve the git ref of an object.
///
/// The version label wins. Objects deployed before the label existed encode
/// the ref as the trailing `-xxxxxxxx` segment of their name; that is used as
/// a fallback. An empty string means the object is unversioned.
pub fn resolve_git_ref(obj: &dyn GenericObject, keys: &LabelKeys) -> String {
    if let Some(v) = obj.labels().get(&keys.version_label).filter(|v| !v.is_empty()) {
        return v.clone();
    }
    legacy_ref(obj.name()).unwrap_or_default()
}

fn legacy_ref(name: &str) -> Option<String> {
    let (_, tail) = name.rsplit_once('-')?;
    let is_ref = tail.len() == LEGACY_REF_LEN && tail.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    is_ref.then(|| tail.to_string())
}

/// One deployed object as seen by the retention engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Identity used for deletion (the object name within its kind and namespace).
    pub identity: String,
    /// Logical application; empty means unmanaged.
    pub application: String,
    /// Deployed git ref; empty for static resources.
    pub version: String,
    /// Raw spares annotation value. Parsed by the engine.
    pub spares: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
}

impl ObjectDescriptor {
    pub fn from_object(obj: &dyn GenericObject, keys: &LabelKeys) -> Self {
        Self {
            identity: obj.name().to_string(),
            application: obj.labels().get(&keys.name_label).cloned().unwrap_or_default(),
            version: resolve_git_ref(obj, keys),
            spares: obj.annotations().get(&keys.spares_annotation).filter(|s| !s.is_empty()).cloned(),
            creation_timestamp: obj.creation_timestamp().unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// Plain in-memory object, useful offline and in tests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiteObject {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl LiteObject {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into(), ..Default::default() } }

    pub fn label(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.labels.insert(k.into(), v.into());
        self
    }

    pub fn annotation(mut self, k: impl Into<String>, v: impl Into<String>) -> Self {
        self.annotations.insert(k.into(), v.into());
        self
    }

    pub fn created(mut self, ts: DateTime<Utc>) -> Self {
        self.creation_timestamp = Some(ts);
        self
    }
}

impl GenericObject for LiteObject {
    fn name(&self) -> &str { &self.name }
    fn labels(&self) -> &BTreeMap<String, String> { &self.labels }
    fn annotations(&self) -> &BTreeMap<String, String> { &self.annotations }
    fn creation_timestamp(&self) -> Option<DateTime<Utc>> { self.creation_timestamp }
}
