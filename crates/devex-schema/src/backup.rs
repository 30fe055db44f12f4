//! Backup metadata (§4.E).

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide counter breaking ties between backups created within the
/// same millisecond (§3 "`id` is unique"): a millisecond timestamp alone
/// collides easily across a fast multi-app batch with no intervening I/O.
static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Metadata describing one configuration-tree snapshot.
///
/// The payload itself (a directory copy or a `.tar.zst`) lives alongside this
/// record under `backups/<id>/` or `backups/<id>.tar.zst`; this struct is the
/// durable index entry, not the snapshot contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMeta {
    /// Identifier of the form `<kind>-<timestamp>`.
    pub id: String,
    /// When the backup was taken.
    pub created_at: DateTime<Utc>,
    /// Human-readable description.
    pub description: String,
    /// Free-form tag (e.g. the undo-op id or `"pre-undo"`).
    pub tag: String,
    /// Whether the payload is a compressed archive rather than a raw directory copy.
    pub compressed: bool,
    /// Path to the payload, relative to the backups directory.
    pub path: String,
}

impl BackupMeta {
    /// Builds an id of the form `<kind>-<timestamp>-<seq>` using an
    /// RFC3339-ish, filesystem-safe stamp plus a monotonic sequence number,
    /// so two backups created within the same millisecond never collide.
    pub fn make_id(kind: &str, now: DateTime<Utc>) -> String {
        let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!("{kind}-{}-{seq:06}", now.format("%Y%m%d%H%M%S%3f"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_id_is_unique_for_the_same_instant() {
        let now = Utc::now();
        let a = BackupMeta::make_id("config", now);
        let b = BackupMeta::make_id("config", now);
        assert_ne!(a, b, "two backups stamped at the same instant must not collide");
    }
}
