use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One deployed unit inside an application's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub identity: String,
    pub version: String,
    pub creation_timestamp: DateTime<Utc>,
}

/// Deployed-version history of a single application.
///
/// Records are kept in insertion order until [`sort_newest_first`](Self::sort_newest_first)
/// is called. Duplicate versions are allowed: several objects of one kind may
/// carry the same git ref.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTimeline {
    records: Vec<VersionRecord>,
}

impl VersionTimeline {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.records.len() }
    pub fn is_empty(&self) -> bool { self.records.is_empty() }
    pub fn records(&self) -> &[VersionRecord] { &self.records }
    pub fn iter(&self) -> std::slice::Iter<'_, VersionRecord> { self.records.iter() }

    pub fn push(&mut self, record: VersionRecord) { self.records.push(record); }

    pub fn contains(&self, version: &str) -> bool { self.records.iter().any(|r| r.version == version) }

    /// Sort by creation time, newest first. Equal timestamps are ordered by
    /// identity ascending so the result never depends on listing order.
    pub fn sort_newest_first(&mut self) {
        self.records.sort_by(|a, b| {
            b.creation_timestamp
                .cmp(&a.creation_timestamp)
                .then_with(|| a.identity.cmp(&b.identity))
        });
    }

    /// Split at `keep`: the first `keep` records and the remainder.
    /// Only meaningful after sorting.
    pub fn split_at(&self, keep: usize) -> (&[VersionRecord], &[VersionRecord]) {
        self.records.split_at(keep.min(self.records.len()))
    }

    /// Diagnostic dump of `ref: timestamp` pairs in stored order.
    pub fn render(&self) -> String { self.to_string() }
}

impl fmt::Display for VersionTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[")?;
        for r in &self.records {
            writeln!(f, "  {}: {}", r.version, r.creation_timestamp.to_rfc3339())?;
        }
        write!(f, "]")
    }
}

impl FromIterator<VersionRecord> for VersionTimeline {
    fn from_iter<I: IntoIterator<Item = VersionRecord>>(iter: I) -> Self {
        Self { records: iter.into_iter().collect() }
    }
}

impl<'a> IntoIterator for &'a VersionTimeline {
    type Item = &'a VersionRecord;
    type IntoIter = std::slice::Iter<'a, VersionRecord>;
    fn into_iter(self) -> Self::IntoIter { self.records.iter() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rec(id: &str, version: &str, secs: i64) -> VersionRecord {
        VersionRecord { identity: id.into(), version: version.into(), creation_timestamp: Utc.timestamp_opt(secs, 0).unwrap() }
    }

    fn versions(t: &VersionTimeline) -> Vec<&str> { t.iter().map(|r| r.version.as_str()).collect() }

    #[test]
    fn contains_is_exact_match() {
        let t: VersionTimeline = vec![rec("a", "v1", 1), rec("b", "v10", 2)].into_iter().collect();
        assert!(t.contains("v1"));
        assert!(t.contains("v10"));
        assert!(!t.contains("v"));
        assert!(!VersionTimeline::new().contains(""));
    }

    #[test]
    fn sorts_newest_first() {
        let mut t: VersionTimeline = vec![rec("a", "v1", 1), rec("c", "v3", 3), rec("b", "v2", 2), rec("d", "v4", 4)]
            .into_iter()
            .collect();
        t.sort_newest_first();
        assert_eq!(versions(&t), vec!["v4", "v3", "v2", "v1"]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_identity() {
        let mut fwd: VersionTimeline = vec![rec("b", "x", 5), rec("a", "y", 5), rec("c", "z", 9)].into_iter().collect();
        let mut rev: VersionTimeline = fwd.records().iter().rev().cloned().collect();
        fwd.sort_newest_first();
        rev.sort_newest_first();
        assert_eq!(fwd, rev);
        assert_eq!(versions(&fwd), vec!["z", "y", "x"]);
    }

    #[test]
    fn split_at_clamps() {
        let t: VersionTimeline = vec![rec("a", "v1", 1)].into_iter().collect();
        let (keep, drop) = t.split_at(3);
        assert_eq!(keep.len(), 1);
        assert!(drop.is_empty());
    }

    #[test]
    fn render_keeps_stored_order() {
        let t: VersionTimeline = vec![rec("a", "v1", 0), rec("b", "v2", 60)].into_iter().collect();
        assert_eq!(t.render(), "[\n  v1: 1970-01-01T00:00:00+00:00\n  v2: 1970-01-01T00:01:00+00:00\n]");
    }
}
