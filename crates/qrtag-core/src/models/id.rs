//! Temporary record identifiers

use uuid::Uuid;

/// Prefix marking ids minted locally before the remote authority assigns one.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Mint a temporary id (UUID v7, so temporary ids sort by creation time).
#[must_use]
pub fn temporary_id() -> String {
    format!("{TEMP_ID_PREFIX}{}", Uuid::now_v7())
}

/// Whether an id was minted locally and is still awaiting confirmation.
#[must_use]
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}
