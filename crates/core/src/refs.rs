//! Namespace-wide git ref queries over descriptors.

use std::collections::BTreeMap;

use crate::{ObjectDescriptor, VersionRecord, VersionTimeline};

/// Git ref of the most recently created versioned object.
///
/// Unversioned objects are ignored. Ties on creation time go to the
/// lexically smallest identity.
pub fn latest_git_ref(descriptors: &[ObjectDescriptor]) -> Option<String> {
    descriptors
        .iter()
        .filter(|d| !d.version.is_empty())
        .max_by(|a, b| a.creation_timestamp.cmp(&b.creation_timestamp).then_with(|| b.identity.cmp(&a.identity)))
        .map(|d| d.version.clone())
}

/// Distinct git refs, newest first. Each ref carries the newest creation time
/// seen for it and the identity of that object.
pub fn git_refs(descriptors: &[ObjectDescriptor]) -> VersionTimeline {
    let mut newest: BTreeMap<&str, &ObjectDescriptor> = BTreeMap::new();
    for d in descriptors.iter().filter(|d| !d.version.is_empty()) {
        newest
            .entry(d.version.as_str())
            .and_modify(|cur| {
                if d.creation_timestamp > cur.creation_timestamp {
                    *cur = d;
                }
            })
            .or_insert(d);
    }
    let mut refs: VersionTimeline = newest
        .into_values()
        .map(|d| VersionRecord { identity: d.identity.clone(), version: d.version.clone(), creation_timestamp: d.creation_timestamp })
        .collect();
    refs.sort_newest_first();
    refs
}

/// Every descriptor deployed at `version`.
pub fn descriptors_with_version<'a>(descriptors: &'a [ObjectDescriptor], version: &'a str) -> impl Iterator<Item = &'a ObjectDescriptor> + 'a {
    descriptors.iter().filter(move |d| !version.is_empty() && d.version == version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn desc(id: &str, version: &str, secs: i64) -> ObjectDescriptor {
        ObjectDescriptor {
            identity: id.into(),
            application: "web".into(),
            version: version.into(),
            spares: None,
            creation_timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn latest_skips_unversioned() {
        let ds = vec![desc("a", "v1", 1), desc("b", "v2", 5), desc("static", "", 9)];
        assert_eq!(latest_git_ref(&ds).as_deref(), Some("v2"));
        assert_eq!(latest_git_ref(&[desc("s", "", 1)]), None);
        assert_eq!(latest_git_ref(&[]), None);
    }

    #[test]
    fn refs_are_distinct_and_newest_first() {
        let ds = vec![
            desc("web-v1", "v1", 1),
            desc("svc-v1", "v1", 7),
            desc("web-v2", "v2", 5),
            desc("static", "", 10),
        ];
        let refs = git_refs(&ds);
        let got: Vec<_> = refs.iter().map(|r| (r.version.as_str(), r.identity.as_str())).collect();
        assert_eq!(got, vec![("v1", "svc-v1"), ("v2", "web-v2")]);
    }

    #[test]
    fn filter_by_version() {
        let ds = vec![desc("a", "v1", 1), desc("b", "v2", 2), desc("c", "v1", 3), desc("d", "", 4)];
        let ids: Vec<_> = descriptors_with_version(&ds, "v1").map(|d| d.identity.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(descriptors_with_version(&ds, "").count(), 0);
    }
}
