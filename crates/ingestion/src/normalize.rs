//! Hex normalization helpers.
//!
//! Every byte-string field leaving the pipeline is rendered as `0x` followed by
//! lowercase hex digits. These functions are pure and hold no state.

/// Encode raw bytes as lowercase `0x`-prefixed hex.
pub fn encode_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Normalize a hex string to lowercase with a `0x` prefix.
///
/// Accepts input with or without a `0x`/`0X` prefix. Applying it to its own
/// output returns the same string. Production fields are decoded into typed
/// values and rendered with [`encode_hex`], so this only checks that the
/// rendered form is a fixed point.
#[cfg(test)]
fn normalize_hex(value: &str) -> String {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    format!("0x{}", digits.to_ascii_lowercase())
}

/// Whether `value` is already in normalized form.
///
/// Intended for consumers and tests validating published payloads.
pub fn is_normalized_hex(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|digits| digits.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_lowercase_with_prefix() {
        assert_eq!(encode_hex([0xdeu8, 0xad, 0xBE, 0xef]), "0xdeadbeef");
        assert_eq!(encode_hex([0u8; 0]), "0x");
    }

    #[test]
    fn normalizes_case_and_prefix() {
        assert_eq!(normalize_hex("0xABCdef"), "0xabcdef");
        assert_eq!(normalize_hex("0XABCDEF"), "0xabcdef");
        assert_eq!(normalize_hex("abcdef"), "0xabcdef");
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in ["0xAbCd", "abcd", "0x", "0X00FF"] {
            let once = normalize_hex(input);
            assert_eq!(normalize_hex(&once), once);
            assert!(is_normalized_hex(&once));
        }

        let encoded = encode_hex([0x01u8, 0xA0]);
        assert_eq!(normalize_hex(&encoded), encoded);
    }

    #[test]
    fn detects_non_normalized_values() {
        assert!(!is_normalized_hex("0xABCD"));
        assert!(!is_normalized_hex("abcd"));
        assert!(!is_normalized_hex("0xzz"));
    }
}
