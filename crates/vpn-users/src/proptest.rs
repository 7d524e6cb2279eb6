//! Property-based tests for the in-memory store
//!
//! Strategies generate mirror snapshots and grant sets; the properties check
//! that a committed sync transaction leaves the mirror equal to the records
//! it was given and that dropped transactions change nothing.

use crate::batch::mirror_batches;
use crate::memory::InMemoryStore;
use crate::store::{AccessStore, MirrorStore, RadiusServerStore, SyncStore};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use vpn_types::{AccessGrant, MirrorRecord, PrincipalName, SyncCounts};

/// Strategy for generating valid principal names over a small key space so
/// that generated snapshots overlap.
pub fn principal_strategy() -> impl Strategy<Value = PrincipalName> {
    ("[a-e]{1,2}", prop_oneof![Just("x.com"), Just("y.org")]).prop_map(|(local, domain)| {
        PrincipalName::parse(format!("{}@{}", local, domain)).expect("generated principal is valid")
    })
}

/// Strategy for generating mirror records
pub fn mirror_record_strategy() -> impl Strategy<Value = MirrorRecord> {
    (principal_strategy(), "[0-9]{1,3}", "[A-Z][a-z]{0,6}").prop_map(
        |(principal_name, external_id, display_name)| MirrorRecord {
            external_id,
            display_name,
            principal_name,
        },
    )
}

/// Strategy for generating snapshots with unique principal names
pub fn snapshot_strategy() -> impl Strategy<Value = Vec<MirrorRecord>> {
    prop::collection::vec(mirror_record_strategy(), 0..40).prop_map(|records| {
        records
            .into_iter()
            .map(|r| (r.principal_name.clone(), r))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        /// A committed replace leaves exactly the given records in the mirror.
        #[test]
        fn test_committed_replace_mirrors_snapshot(
            before in snapshot_strategy(),
            after in snapshot_strategy(),
            batch_size in 1usize..8,
        ) {
            let result = tokio_test::block_on(async {
                let store = InMemoryStore::new().with_batch_size(batch_size);
                store.seed_mirror(before).await;

                let mut tx = store.begin_sync().await?;
                tx.replace_mirror(&after).await?;
                tx.commit().await?;
                store.read_mirror().await
            });

            let mirror = result.expect("in-memory sync succeeds");
            prop_assert_eq!(mirror, after);
        }

        /// Dropping a transaction leaves mirror and grants untouched.
        #[test]
        fn test_dropped_transaction_changes_nothing(
            before in snapshot_strategy(),
            after in snapshot_strategy(),
        ) {
            let result = tokio_test::block_on(async {
                let store = InMemoryStore::new();
                store.seed_mirror(before.clone()).await;
                let server = store.create_server("rad", None).await?;
                for record in &before {
                    store.grant_access(&AccessGrant {
                        principal_name: record.principal_name.clone(),
                        radius_server_id: server.id,
                    }).await?;
                }

                let removed: BTreeSet<PrincipalName> =
                    before.iter().map(|r| r.principal_name.clone()).collect();
                let mut tx = store.begin_sync().await?;
                tx.delete_access_grants(&removed).await?;
                tx.replace_mirror(&after).await?;
                tx.insert_sync_event(&SyncCounts::default()).await?;
                drop(tx);

                let grants = store.find_access_grants(&removed).await?;
                Ok::<_, crate::StoreError>((store.read_mirror().await?, grants))
            });

            let (mirror, grants) = result.expect("in-memory operations succeed");
            prop_assert_eq!(&mirror, &before);
            prop_assert_eq!(grants.len(), before.len());
        }

        /// Batches cover every record exactly once, in order.
        #[test]
        fn test_batches_partition_records(
            records in snapshot_strategy(),
            batch_size in 0usize..12,
        ) {
            let rejoined: Vec<MirrorRecord> = mirror_batches(&records, batch_size)
                .flat_map(|b| b.iter().cloned())
                .collect();
            prop_assert_eq!(rejoined, records.clone());
            prop_assert!(mirror_batches(&records, batch_size).all(|b| b.len() <= batch_size.max(1)));
        }
    }
}
