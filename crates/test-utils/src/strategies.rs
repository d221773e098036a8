//! Proptest strategies shared by storage-layer property tests.

use proptest::prelude::*;

/// Strategy producing short opaque byte keys.
///
/// Keys are drawn from a small alphabet so that randomly generated keys and
/// intervals actually collide, which is where interval-index bugs live.
pub fn byte_key() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(proptest::sample::select(b"abcdefgh".to_vec()), 1..4)
}

/// Strategy producing an ordered `(lower, upper)` key pair with
/// `lower <= upper`, suitable as a closed query interval.
pub fn key_interval() -> impl Strategy<Value = (Vec<u8>, Vec<u8>)> {
    (byte_key(), byte_key()).prop_map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
}
