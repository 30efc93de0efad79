//! Time-ordered message identifiers.

use uuid::{NoContext, Timestamp, Uuid};

const URN_PREFIX: &str = "urn:uuid:";

/// Mint a v7 message id in URN form.
///
/// Lexicographic order of the embedded timestamp matches publish order at
/// millisecond grain.
pub fn new_urn() -> String {
    format!("{URN_PREFIX}{}", Uuid::new_v7(Timestamp::now(NoContext)))
}

/// Embedded timestamp of an id, in 100 ns ticks since the Unix epoch.
///
/// Accepts both the bare and the URN form. Returns 0 when the id does not
/// parse or carries no timestamp.
pub fn timestamp_of(id: &str) -> u64 {
    let raw = id.strip_prefix(URN_PREFIX).unwrap_or(id);
    let Ok(uuid) = Uuid::parse_str(raw) else {
        return 0;
    };
    let Some(ts) = uuid.get_timestamp() else {
        return 0;
    };
    let (secs, nanos) = ts.to_unix();
    secs * 10_000_000 + u64::from(nanos) / 100
}
