use serde::{Deserialize, Serialize};

use super::lifespan::MvRegion;
use super::Version;
use crate::container::PageId;
use crate::errors::{PageTreeError, PageTreeResult};
use crate::tree::IndexEntry;

/// One root of the tree over the versions it served.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootRecord<K> {
    /// Key domain of the tree and the lifespan of this root
    pub region: MvRegion<K>,
    pub id: PageId,
    /// Level of the root plus one, i.e. the height at that time
    pub parent_level: u32,
}

impl<K: Clone> RootRecord<K> {
    pub fn entry(&self) -> IndexEntry<MvRegion<K>> {
        IndexEntry::new(self.id, self.region.clone(), self.parent_level)
    }
}

/// Version-ordered list of every root the tree had.
///
/// Lifespans of consecutive records touch; only the last record may still be
/// alive. Lookups binary-search by version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootHistory<K> {
    records: Vec<RootRecord<K>>,
}

impl<K> Default for RootHistory<K> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<K: Ord + Clone> RootHistory<K> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[RootRecord<K>] {
        &self.records
    }

    /// The current root.
    pub fn live(&self) -> Option<&RootRecord<K>> {
        self.records.last().filter(|r| r.region.lifespan.is_alive())
    }

    /// The root that served `version`.
    pub fn at(&self, version: Version) -> Option<&RootRecord<K>> {
        let pos = self
            .records
            .partition_point(|r| r.region.lifespan.begin <= version);
        if pos == 0 {
            return None;
        }
        self.records
            .get(pos - 1)
            .filter(|r| r.region.lifespan.alive_at(version))
    }

    /// Installs a new live root. The current root is closed at the new
    /// root's begin version, or dropped when it began at that same version.
    pub fn replace_live(&mut self, record: RootRecord<K>) -> PageTreeResult<()> {
        let now = record.region.lifespan.begin;
        if let Some(last) = self.records.last_mut() {
            if last.region.lifespan.begin > now {
                return Err(PageTreeError::invariant(&format!(
                    "root history would go back from version {} to {}",
                    last.region.lifespan.begin, now
                )));
            }
            if last.region.lifespan.begin == now {
                self.records.pop();
            } else if last.region.lifespan.is_alive() {
                last.region.lifespan.end = Some(now);
            }
        }
        self.records.push(record);
        Ok(())
    }

    pub fn check(&self) -> PageTreeResult<()> {
        for pair in self.records.windows(2) {
            let (older, newer) = (&pair[0], &pair[1]);
            if older.region.lifespan.end != Some(newer.region.lifespan.begin) {
                return Err(PageTreeError::invariant(&format!(
                    "root {} ends at {:?} but its successor {} begins at {}",
                    older.id, older.region.lifespan.end, newer.id, newer.region.lifespan.begin
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvbt::Lifespan;

    fn record(id: PageId, begin: Version) -> RootRecord<u32> {
        RootRecord {
            region: MvRegion::new(0, None, Lifespan::starting(begin)),
            id,
            parent_level: 1,
        }
    }

    #[test]
    fn test_lookup_by_version() {
        let mut history = RootHistory::default();
        assert!(history.at(0).is_none());
        history.replace_live(record(1, 2)).unwrap();
        history.replace_live(record(2, 5)).unwrap();
        history.replace_live(record(3, 9)).unwrap();

        assert!(history.at(1).is_none());
        assert_eq!(history.at(2).unwrap().id, 1);
        assert_eq!(history.at(4).unwrap().id, 1);
        assert_eq!(history.at(5).unwrap().id, 2);
        assert_eq!(history.at(100).unwrap().id, 3);
        assert_eq!(history.live().unwrap().id, 3);
        history.check().unwrap();
    }

    #[test]
    fn test_same_version_replaces() {
        let mut history = RootHistory::default();
        history.replace_live(record(1, 0)).unwrap();
        history.replace_live(record(2, 3)).unwrap();
        history.replace_live(record(3, 3)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.at(3).unwrap().id, 3);
        assert!(history.replace_live(record(4, 1)).is_err());
    }
}
