//! Batched mirror writes

use vpn_types::MirrorRecord;

/// Rows per insert statement when replacing the mirror.
pub const MIRROR_BATCH_SIZE: usize = 1000;

/// Split `records` into insert batches of at most `batch_size` rows.
///
/// A zero batch size is treated as one row per batch.
pub fn mirror_batches(records: &[MirrorRecord], batch_size: usize) -> std::slice::Chunks<'_, MirrorRecord> {
    records.chunks(batch_size.max(1))
}
