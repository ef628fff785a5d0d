/// 32-bit polynomial string hash (`h * 31 + unit`) over UTF-16 code units,
/// wrapping like a JavaScript int32 so ids hash the same way in every client.
#[inline]
pub fn id_hash(id: &str) -> i32 {
    id.encode_utf16().fold(0i32, |h, unit| {
        h.wrapping_shl(5).wrapping_sub(h).wrapping_add(unit as i32)
    })
}

/// Fold a hash into `0..len`
#[inline]
pub fn fold_index(hash: i32, len: usize) -> usize {
    debug_assert!(len > 0);
    ((hash as i64).unsigned_abs() % len as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(id_hash(""), 0);
        assert_eq!(id_hash("1"), 49);
        assert_eq!(id_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn test_wraps_without_panic() {
        let long = "soldier-".repeat(64);
        let h = id_hash(&long);
        assert!(fold_index(h, 9) < 9);
        assert_eq!(fold_index(i32::MIN, 9), (2_147_483_648u64 % 9) as usize);
    }
}
