//! Connect-token and hub-key generation.
//!
//! Connect tokens are short human-memorable strings drawn from an alphabet
//! with the ambiguous glyphs `0/O/1/I/L` removed. Only a SHA-256 digest
//! and a trailing display hint are stored at rest.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Case-sensitive alphabet without `0/O/1/I/L`.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of the short connect-token form.
pub const TOKEN_LEN: usize = 6;

/// Prefix of the legacy long user-token shape, kept for migration.
pub const LEGACY_TOKEN_PREFIX: &str = "user_";

/// Prefix every hub API key carries.
pub const HUB_KEY_PREFIX: &str = "hub_live_";

const HUB_KEY_SUFFIX_LEN: usize = 24;

/// Generate a fresh short connect token.
pub fn generate_connect_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Generate a fresh hub API key (`hub_live_` + random suffix).
pub fn generate_hub_key() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..HUB_KEY_SUFFIX_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();
    format!("{HUB_KEY_PREFIX}{suffix}")
}

/// SHA-256 digest of a credential for at-rest storage.
pub fn credential_digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Trailing display hint (last 6 characters).
pub fn credential_hint(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let start = chars.len().saturating_sub(6);
    chars[start..].iter().collect()
}

/// Whether a presented token has the short connect-token shape.
pub fn is_short_form(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| TOKEN_ALPHABET.contains(&b))
}

/// Whether a presented token has the legacy prefixed shape.
pub fn is_legacy_form(token: &str) -> bool {
    token.len() > TOKEN_LEN && token.starts_with(LEGACY_TOKEN_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_has_no_ambiguous_glyphs() {
        for c in ['0', 'O', '1', 'I', 'L'] {
            assert!(!TOKEN_ALPHABET.contains(&(c as u8)), "ambiguous glyph {c}");
        }
    }

    #[test]
    fn generated_tokens_are_short_form() {
        for _ in 0..50 {
            let token = generate_connect_token();
            assert!(is_short_form(&token), "bad token {token}");
        }
    }

    #[test]
    fn hub_keys_carry_prefix() {
        let key = generate_hub_key();
        assert!(key.starts_with(HUB_KEY_PREFIX));
        assert_eq!(key.len(), HUB_KEY_PREFIX.len() + HUB_KEY_SUFFIX_LEN);
    }

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(credential_digest("ABC234"), credential_digest("ABC234"));
        assert_ne!(credential_digest("ABC234"), credential_digest("abc234"));
    }

    #[test]
    fn hint_is_last_six() {
        assert_eq!(credential_hint("hub_live_WXYZ2345"), "YZ2345");
        assert_eq!(credential_hint("ABC234"), "ABC234");
        assert_eq!(credential_hint("AB"), "AB");
    }

    #[test]
    fn short_and_legacy_shapes() {
        assert!(is_short_form("ABC234"));
        assert!(!is_short_form("ABC23"));
        assert!(!is_short_form("ABC0IL"));
        assert!(is_legacy_form("user_8f2b91c4d"));
        assert!(!is_legacy_form("ABC234"));
    }
}
