//! Session token generation.

use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;

/// Source of session tokens. Injected into the session manager so tests can
/// script the generated ids (e.g. to force collisions).
pub trait TokenSource: Send + Sync {
    fn session_token(&self) -> String;
}

/// The production token source: 32 bytes (256 bits) of cryptographically
/// secure random data, base64url without padding.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureTokens;

impl TokenSource for SecureTokens {
    fn session_token(&self) -> String {
        let mut token_bytes = [0u8; 32];
        rng().fill(&mut token_bytes);

        general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = SecureTokens.session_token();

        // 32 bytes encode to 43 base64url characters, no padding
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_tokens_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(SecureTokens.session_token()), "generated duplicate session token");
        }
    }
}
