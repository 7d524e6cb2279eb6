//! Directory snapshot vs. mirror diff

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use vpn_types::{DirectoryUser, MirrorRecord, PrincipalName, SyncCounts};

/// Principals added, updated and removed by one pass. The three sets are
/// disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryDiff {
    pub added: BTreeSet<PrincipalName>,
    pub updated: BTreeSet<PrincipalName>,
    pub removed: BTreeSet<PrincipalName>,
}

impl DirectoryDiff {
    /// Diff `directory` against `mirror` by principal name.
    ///
    /// A principal in both with the same external id and display name is in
    /// none of the sets. `directory` is expected to hold each principal once;
    /// see [`dedup_snapshot`].
    pub fn compute(directory: &[DirectoryUser], mirror: &[MirrorRecord]) -> Self {
        let mirror: BTreeMap<&PrincipalName, &MirrorRecord> =
            mirror.iter().map(|r| (&r.principal_name, r)).collect();
        let mut diff = Self::default();

        for user in directory {
            match mirror.get(&user.principal_name) {
                None => {
                    diff.added.insert(user.principal_name.clone());
                }
                Some(record) if record.differs_from(user) => {
                    diff.updated.insert(user.principal_name.clone());
                }
                Some(_) => {}
            }
        }

        let present: BTreeSet<&PrincipalName> =
            directory.iter().map(|u| &u.principal_name).collect();
        diff.removed = mirror
            .keys()
            .filter(|p| !present.contains(*p))
            .map(|p| (*p).clone())
            .collect();
        diff
    }

    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }

    pub fn counts(&self, total_users: usize) -> SyncCounts {
        SyncCounts {
            added: self.added.len(),
            updated: self.updated.len(),
            deleted: self.removed.len(),
            total_users,
        }
    }
}

/// Collapse repeated principals in a directory snapshot. The last occurrence
/// wins and keeps the position of the first.
pub fn dedup_snapshot(users: Vec<DirectoryUser>) -> (Vec<DirectoryUser>, usize) {
    let mut position: BTreeMap<PrincipalName, usize> = BTreeMap::new();
    let mut unique: Vec<DirectoryUser> = Vec::with_capacity(users.len());
    let mut duplicates = 0;

    for user in users {
        match position.get(&user.principal_name) {
            Some(&i) => {
                unique[i] = user;
                duplicates += 1;
            }
            None => {
                position.insert(user.principal_name.clone(), unique.len());
                unique.push(user);
            }
        }
    }
    (unique, duplicates)
}
