//! Property-based tests for the directory diff
//!
//! Snapshots are drawn from a small principal space so that directory and
//! mirror overlap, with a couple of display names so updates happen.

use crate::diff::{dedup_snapshot, DirectoryDiff};
use proptest::prelude::*;
use std::collections::BTreeSet;
use vpn_types::{DirectoryUser, MirrorRecord, PrincipalName};

/// Strategy for principals over a key space small enough to collide
pub fn principal_strategy() -> impl Strategy<Value = PrincipalName> {
    "[a-f]@(x\\.com|y\\.org)".prop_map(|name| {
        PrincipalName::parse(name).expect("generated principal is valid")
    })
}

/// Strategy for directory users, possibly repeating a principal
pub fn directory_strategy() -> impl Strategy<Value = Vec<DirectoryUser>> {
    prop::collection::vec(
        (principal_strategy(), "[12]", prop_oneof![Just("Ann"), Just("Bea")]),
        0..16,
    )
    .prop_map(|users| {
        users
            .into_iter()
            .map(|(principal, id, name)| DirectoryUser::new(id, name, principal))
            .collect()
    })
}

/// Strategy for a mirror snapshot, unique by principal
pub fn mirror_strategy() -> impl Strategy<Value = Vec<MirrorRecord>> {
    directory_strategy().prop_map(|users| {
        dedup_snapshot(users)
            .0
            .into_iter()
            .map(MirrorRecord::from)
            .collect()
    })
}

fn names<'a>(it: impl Iterator<Item = &'a PrincipalName>) -> BTreeSet<PrincipalName> {
    it.cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        /// added, updated and removed never share a principal.
        #[test]
        fn test_diff_sets_are_disjoint(directory in directory_strategy(), mirror in mirror_strategy()) {
            let (directory, _) = dedup_snapshot(directory);
            let diff = DirectoryDiff::compute(&directory, &mirror);

            prop_assert!(diff.added.is_disjoint(&diff.updated));
            prop_assert!(diff.added.is_disjoint(&diff.removed));
            prop_assert!(diff.updated.is_disjoint(&diff.removed));
        }

        /// The union is the symmetric difference plus the changed overlap.
        #[test]
        fn test_diff_union(directory in directory_strategy(), mirror in mirror_strategy()) {
            let (directory, _) = dedup_snapshot(directory);
            let diff = DirectoryDiff::compute(&directory, &mirror);

            let d = names(directory.iter().map(|u| &u.principal_name));
            let m = names(mirror.iter().map(|r| &r.principal_name));
            let changed: BTreeSet<PrincipalName> = directory
                .iter()
                .filter(|u| mirror.iter().any(|r| r.principal_name == u.principal_name && r.differs_from(u)))
                .map(|u| u.principal_name.clone())
                .collect();

            let mut expected: BTreeSet<PrincipalName> = d.symmetric_difference(&m).cloned().collect();
            expected.extend(changed);

            let mut union = diff.added.clone();
            union.extend(diff.updated.iter().cloned());
            union.extend(diff.removed.iter().cloned());
            prop_assert_eq!(union, expected);
        }

        /// Diffing a snapshot against its own mirror finds nothing.
        #[test]
        fn test_diff_against_applied_mirror_is_empty(directory in directory_strategy()) {
            let (directory, _) = dedup_snapshot(directory);
            let mirror: Vec<MirrorRecord> = directory.iter().map(MirrorRecord::from).collect();
            prop_assert!(!DirectoryDiff::compute(&directory, &mirror).has_changes());
        }

        /// Dedup keeps one entry per principal, carrying the last occurrence.
        #[test]
        fn test_dedup_keeps_last(directory in directory_strategy()) {
            let (unique, duplicates) = dedup_snapshot(directory.clone());
            prop_assert_eq!(unique.len() + duplicates, directory.len());
            for user in &unique {
                let last = directory.iter().rev().find(|u| u.principal_name == user.principal_name);
                prop_assert_eq!(Some(user), last);
            }
        }
    }
}
