use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};

const TOKEN_BYTES: usize = 32;

/// Opaque bearer identifier: 256 random bits, URL-safe base64 without padding.
/// Carries no data; every token is resolved through a server-side lookup.
pub fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_url_safe_and_fixed_length() {
        let t = generate();
        assert_eq!(t.len(), 43);
        assert!(t
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let seen: HashSet<String> = (0..256).map(|_| generate()).collect();
        assert_eq!(seen.len(), 256);
    }
}
