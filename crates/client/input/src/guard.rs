//! Replay protection: nonces and timestamp freshness.

use std::time::Duration;

use sha3::{Digest, Keccak256};

/// Maximum distance between a batched subunit timestamp and the block it lands in.
pub const MAX_SUBUNIT_DRIFT: Duration = Duration::from_secs(24 * 60 * 60);

/// Nonce of a direct command: the same wallet submitting the same input twice in a block is one command.
pub fn direct_nonce(block_height: u64, real_address: &str, input_data: &str) -> String {
    nonce(&[&block_height.to_string(), real_address, input_data])
}

/// Nonce of a batched subunit. The millisecond timestamp is signed by the user, so a batcher cannot replay the
/// subunit under a fresh nonce.
pub fn batched_nonce(millisecond_timestamp: &str, user_address: &str, input_data: &str) -> String {
    nonce(&[millisecond_timestamp, user_address, input_data])
}

/// Each part is hashed behind its big-endian byte length.
fn nonce(parts: &[&str]) -> String {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// `|subunit - block| < 24h`, with the subunit in milliseconds and the block in unix seconds.
pub fn is_timestamp_fresh(subunit_timestamp_ms: u64, block_timestamp_secs: u64) -> bool {
    let block_ms = block_timestamp_secs.saturating_mul(1000);
    u128::from(subunit_timestamp_ms.abs_diff(block_ms)) < MAX_SUBUNIT_DRIFT.as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BLOCK_TS: u64 = 1_690_000_000;

    #[rstest]
    #[case(1_690_000_000_000, true)]
    #[case(1_690_000_000_000 + 86_399_999, true)]
    #[case(1_690_000_000_000 + 86_400_000, false)]
    #[case(1_690_000_000_000 - 86_399_999, true)]
    #[case(1_690_000_000_000 - 86_400_000, false)]
    #[case(0, false)]
    fn freshness_window_is_open_24h(#[case] subunit_ms: u64, #[case] fresh: bool) {
        assert_eq!(is_timestamp_fresh(subunit_ms, BLOCK_TS), fresh);
    }

    #[test]
    fn nonces_are_deterministic_and_distinct() {
        let a = batched_nonce("1690000000000", "0xabc", "xp:5");
        assert_eq!(a, batched_nonce("1690000000000", "0xabc", "xp:5"));
        assert_ne!(a, batched_nonce("1690000000001", "0xabc", "xp:5"));
        assert_ne!(a, batched_nonce("1690000000000", "0xabd", "xp:5"));
        assert_ne!(a, batched_nonce("1690000000000", "0xabc", "xp:6"));
        assert_eq!(a.len(), 66);

        assert_eq!(direct_nonce(7, "0xabc", "xp:5"), direct_nonce(7, "0xabc", "xp:5"));
        assert_ne!(direct_nonce(7, "0xabc", "xp:5"), direct_nonce(8, "0xabc", "xp:5"));
    }

    #[rstest]
    #[case(("1", "a|b", "c"), ("1", "a", "b|c"))]
    #[case(("1", "ab", "c"), ("1", "a", "bc"))]
    #[case(("", "a", "b"), ("a", "", "b"))]
    fn field_boundaries_are_part_of_the_nonce(#[case] left: (&str, &str, &str), #[case] right: (&str, &str, &str)) {
        assert_ne!(batched_nonce(left.0, left.1, left.2), batched_nonce(right.0, right.1, right.2));
    }
}
