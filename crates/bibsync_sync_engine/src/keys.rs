//! Object key generation.

use rand::Rng;

/// Characters allowed in object keys (no 0, 1, O or lowercase).
const KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHIJKLMNPQRSTUVWXYZ";

/// Length of an object key.
pub const KEY_LENGTH: usize = 8;

/// Generates a new random object key.
pub fn generate_key() -> String {
    let mut rng = rand::thread_rng();
    (0..KEY_LENGTH)
        .map(|_| char::from(KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())]))
        .collect()
}

/// Returns true if `key` is a well-formed object key.
pub fn is_valid_key(key: &str) -> bool {
    key.len() == KEY_LENGTH && key.bytes().all(|b| KEY_ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_valid() {
        for _ in 0..100 {
            let key = generate_key();
            assert!(is_valid_key(&key), "{key}");
        }
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!is_valid_key("ABCD234"));
        assert!(!is_valid_key("ABCD2340"));
        assert!(!is_valid_key("abcd2345"));
        assert!(is_valid_key("ABCD2345"));
    }
}
