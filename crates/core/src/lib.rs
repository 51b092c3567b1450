//! Spares core: object model, version timelines and the retention engine.
//!
//! Nothing in this crate talks to a cluster. Callers hand in listing and
//! deletion collaborators (see [`Lister`] and [`Deleter`]) and the engine
//! decides which objects fall outside the retention window.

#![forbid(unsafe_code)]

mod engine;
mod error;
mod object;
mod refs;
mod timeline;

pub use engine::{AppPlan, Deleter, Lister, ReconcileReport, RetentionConfig, RetentionEngine, RetentionPlan, RetentionState};
pub use error::RetentionError;
pub use object::{
    resolve_git_ref, GenericObject, LabelKeys, LiteObject, ObjectDescriptor, DEFAULT_ANNOTATION_PREFIX, NAME_LABEL,
    SPARES_ANNOTATION_SUFFIX, VERSION_LABEL,
};
pub use refs::{descriptors_with_version, git_refs, latest_git_ref};
pub use timeline::{VersionRecord, VersionTimeline};

pub mod prelude {
    pub use super::{
        Deleter, GenericObject, LabelKeys, Lister, ObjectDescriptor, ReconcileReport, RetentionConfig, RetentionEngine,
        RetentionError, RetentionPlan, VersionRecord, VersionTimeline,
    };
}
