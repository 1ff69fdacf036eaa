//! Linear schema migration chain for password records.
//!
//! Each step is pure, total, and idempotent: re-applying a step to data that
//! already carries the target version is a no-op. Migrations never drop
//! titles, timestamps, or other content; they only backfill fields introduced
//! by the target version.

use crate::codec::record::{PasswordRecord, CURRENT_VERSION};
use crate::error::{VaultError, VaultResult};

/// Brings a record decoded at `wire_version` up to [`CURRENT_VERSION`].
///
/// The chain runs in order: v0 -> v1 -> v2. A record already at or beyond a
/// step's target version passes through that step unchanged.
///
/// # Errors
///
/// Returns [`VaultError::UnsupportedVersion`] when `wire_version` is newer
/// than this build understands.
pub fn migrate_to_current(record: &mut PasswordRecord, wire_version: u8) -> VaultResult<()> {
    if wire_version > CURRENT_VERSION {
        return Err(VaultError::UnsupportedVersion {
            found: wire_version,
            current: CURRENT_VERSION,
        });
    }

    // Payloads older than the version stamp carry defaults for missing
    // fields; start from what the wire claims.
    if record.schema_version < wire_version {
        record.schema_version = wire_version;
    }

    migrate_v0_to_v1(record);
    migrate_v1_to_v2(record);
    Ok(())
}

/// v0 -> v1: introduces `category_id`. v0 entries become uncategorized.
fn migrate_v0_to_v1(record: &mut PasswordRecord) {
    if record.schema_version >= 1 {
        return;
    }
    record.category_id = 0;
    record.schema_version = 1;
}

/// v1 -> v2: introduces `custom_fields`. Older entries have none.
fn migrate_v1_to_v2(record: &mut PasswordRecord) {
    if record.schema_version >= 2 {
        return;
    }
    record.custom_fields.clear();
    record.schema_version = 2;
}
