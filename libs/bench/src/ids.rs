//! Deterministic UUID-shaped identifiers for integer ids.
//!
//! Backends want UUID strings for point ids and label values. The mapping is
//! a pure function of the index: its big-endian bytes fill both halves of the
//! UUID, then version 4 and the RFC 4122 variant are stamped in. The second
//! half keeps bytes 1..8 intact, so indices below `2^56` map back losslessly.

use uuid::Uuid;

/// Largest index that survives the round trip.
pub const MAX_FAKE_UUID_INDEX: u64 = (1 << 56) - 1;

/// Map an index to its UUID form.
pub fn index_to_fake_uuid(index: u64) -> Uuid {
    let half = index.to_be_bytes();
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&half);
    bytes[8..].copy_from_slice(&half);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

/// Recover the index from a UUID built by [`index_to_fake_uuid`].
///
/// Returns `None` for any UUID that is not exactly the image of an index, so
/// foreign ids returned by a backend are detected instead of aliased.
pub fn fake_uuid_to_index(uuid: Uuid) -> Option<u64> {
    let mut half = [0u8; 8];
    half.copy_from_slice(&uuid.as_bytes()[8..]);
    // variant bits live in the first byte of the second half
    half[0] = 0;
    let index = u64::from_be_bytes(half);
    (index_to_fake_uuid(index) == uuid).then_some(index)
}

/// Parse a UUID string and recover its index.
pub fn parse_fake_uuid(text: &str) -> Option<u64> {
    Uuid::parse_str(text).ok().and_then(fake_uuid_to_index)
}
