//! Retention engine: groups descriptors per application and selects the
//! objects that fall outside each application's retention window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{ObjectDescriptor, RetentionError, VersionRecord, VersionTimeline};

/// Produces the current descriptors for a resource kind.
#[async_trait::async_trait]
pub trait Lister: Send + Sync {
    async fn list(&self, kind: &str) -> anyhow::Result<Vec<ObjectDescriptor>>;
}

/// Deletes one object by identity. A non-error return is trusted as success.
#[async_trait::async_trait]
pub trait Deleter: Send + Sync {
    async fn delete(&self, identity: &str) -> anyhow::Result<()>;
}

/// Engine configuration, fixed for the lifetime of the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Spare versions kept per application in addition to the live one.
    pub default_reserve: usize,
    /// Version being rolled out. Only its spares annotation is honoured; empty disables overrides.
    pub current_git_ref: String,
    /// Promote per-application diagnostics from debug to info. Never affects decisions.
    pub verbose: bool,
}

/// Per-application state built during one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionState {
    pub application: String,
    pub versions: VersionTimeline,
    pub allowed_reserve: usize,
}

impl RetentionState {
    pub fn new(application: impl Into<String>, allowed_reserve: usize) -> Self {
        Self { application: application.into(), versions: VersionTimeline::new(), allowed_reserve }
    }

    /// Spares plus the live version.
    pub fn total_allowed(&self) -> usize { self.allowed_reserve.saturating_add(1) }

    /// Sort the timeline and split it into kept records and deletion candidates.
    pub fn into_plan(mut self) -> AppPlan {
        self.versions.sort_newest_first();
        let total_allowed = self.total_allowed();
        let (keep, delete) = self.versions.split_at(total_allowed);
        AppPlan {
            application: self.application,
            allowed_reserve: self.allowed_reserve,
            total_allowed,
            keep: keep.to_vec(),
            delete: delete.to_vec(),
        }
    }
}

/// Decision for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPlan {
    pub application: String,
    pub allowed_reserve: usize,
    pub total_allowed: usize,
    /// Newest first.
    pub keep: Vec<VersionRecord>,
    /// Newest first; every entry is at least as old as every kept record.
    pub delete: Vec<VersionRecord>,
}

/// Decisions for one resource kind, applications ordered by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPlan {
    pub kind: String,
    pub apps: Vec<AppPlan>,
}

impl RetentionPlan {
    /// Deletion candidates in the order `reconcile` issues them.
    pub fn deletions(&self) -> impl Iterator<Item = &VersionRecord> { self.apps.iter().flat_map(|a| a.delete.iter()) }

    pub fn is_noop(&self) -> bool { self.apps.iter().all(|a| a.delete.is_empty()) }

    pub fn app(&self, application: &str) -> Option<&AppPlan> { self.apps.iter().find(|a| a.application == application) }
}

/// Outcome of a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub kind: String,
    pub applications: usize,
    pub deleted: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RetentionEngine {
    config: RetentionConfig,
}

impl RetentionEngine {
    pub fn new(config: RetentionConfig) -> Self { Self { config } }

    pub fn config(&self) -> &RetentionConfig { &self.config }

    fn is_current(&self, version: &str) -> bool {
        !self.config.current_git_ref.is_empty() && version == self.config.current_git_ref
    }

    /// Group managed descriptors by application and resolve each reserve.
    ///
    /// Descriptors without an application name are skipped. Every spares value
    /// on a managed descriptor must parse, but only the one on the current git
    /// ref takes effect (the last one wins if several carry it).
    pub fn group(&self, kind: &str, descriptors: &[ObjectDescriptor]) -> Result<BTreeMap<String, RetentionState>, RetentionError> {
        let mut apps: BTreeMap<String, RetentionState> = BTreeMap::new();
        for d in descriptors {
            if d.application.is_empty() {
                continue;
            }
            debug!(kind, app = %d.application, version = %d.version, spares = ?d.spares, identity = %d.identity, "found object");
            let spares = match d.spares.as_deref() {
                Some(raw) => Some(raw.parse::<usize>().map_err(|source| RetentionError::OverrideParse {
                    kind: kind.to_string(),
                    identity: d.identity.clone(),
                    value: raw.to_string(),
                    source,
                })?),
                None => None,
            };
            let state = apps
                .entry(d.application.clone())
                .or_insert_with(|| RetentionState::new(d.application.clone(), self.config.default_reserve));
            state.versions.push(VersionRecord {
                identity: d.identity.clone(),
                version: d.version.clone(),
                creation_timestamp: d.creation_timestamp,
            });
            if let Some(n) = spares.filter(|_| self.is_current(&d.version)) {
                state.allowed_reserve = n;
            }
        }
        Ok(apps)
    }

    /// Compute the retention decision for `descriptors` without side effects.
    pub fn plan(&self, kind: &str, descriptors: &[ObjectDescriptor]) -> Result<RetentionPlan, RetentionError> {
        let apps = self.group(kind, descriptors)?;
        let mut out = Vec::with_capacity(apps.len());
        for state in apps.into_values() {
            let app = state.into_plan();
            if self.config.verbose {
                info!(kind, app = %app.application, total = app.keep.len() + app.delete.len(), allowed = app.total_allowed, "retention window");
            } else {
                debug!(kind, app = %app.application, total = app.keep.len() + app.delete.len(), allowed = app.total_allowed, "retention window");
            }
            if !app.delete.is_empty() {
                let doomed: VersionTimeline = app.delete.iter().cloned().collect();
                debug!(kind, app = %app.application, over = app.delete.len(), doomed = %doomed, "over retention window");
            }
            out.push(app);
        }
        Ok(RetentionPlan { kind: kind.to_string(), apps: out })
    }

    /// List, decide and delete for one resource kind.
    ///
    /// Deletions run sequentially, newest candidate first within each
    /// application and applications in name order. The first failure aborts
    /// the pass; deletions already issued are not undone.
    pub async fn reconcile<L, D>(&self, kind: &str, lister: &L, deleter: &D) -> Result<ReconcileReport, RetentionError>
    where
        L: Lister + ?Sized,
        D: Deleter + ?Sized,
    {
        let descriptors = lister
            .list(kind)
            .await
            .map_err(|source| RetentionError::Listing { kind: kind.to_string(), source })?;
        debug!(kind, count = descriptors.len(), "listed objects");

        let plan = self.plan(kind, &descriptors)?;
        let mut deleted = Vec::new();
        for rec in plan.deletions() {
            info!(kind, identity = %rec.identity, version = %rec.version, "deleting object");
            deleter.delete(&rec.identity).await.map_err(|source| RetentionError::Deletion {
                kind: kind.to_string(),
                identity: rec.identity.clone(),
                source,
            })?;
            deleted.push(rec.identity.clone());
        }
        if deleted.is_empty() {
            debug!(kind, "nothing to clean up");
        } else {
            info!(kind, deleted = deleted.len(), "cleanup pass finished");
        }
        Ok(ReconcileReport { kind: plan.kind, applications: plan.apps.len(), deleted })
    }
}
